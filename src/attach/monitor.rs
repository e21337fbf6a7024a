use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Activity,
    Silence,
}

/// Tracks output on the current window for activity and silence messages.
///
/// Activity fires once on the first output after a window switch. Silence
/// fires once per quiet period of at least `silence_timeout`.
#[derive(Debug)]
pub struct Monitor {
    activity: bool,
    silence_timeout: Option<Duration>,
    last_output: Mutex<Instant>,
    armed: AtomicBool,
    silence_reported: AtomicBool,
    notices: mpsc::UnboundedSender<Notice>,
}

impl Monitor {
    pub fn new(
        activity: bool,
        silence_timeout: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = Self {
            activity,
            silence_timeout: silence_timeout.filter(|t| !t.is_zero()),
            last_output: Mutex::new(Instant::now()),
            armed: AtomicBool::new(false),
            silence_reported: AtomicBool::new(false),
            notices: tx,
        };
        (monitor, rx)
    }

    pub fn window_switched(&self) {
        self.touch();
        self.silence_reported.store(false, Ordering::SeqCst);
        self.armed.store(self.activity, Ordering::SeqCst);
    }

    pub fn record_output(&self) {
        self.touch();
        self.silence_reported.store(false, Ordering::SeqCst);
        if self.armed.swap(false, Ordering::SeqCst) {
            let _ = self.notices.send(Notice::Activity);
        }
    }

    fn touch(&self) {
        *self.last_output.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    /// Emit a silence notice if the window has been quiet long enough and
    /// this quiet period has not been reported yet.
    pub fn check_silence(&self, now: Instant) -> bool {
        let Some(timeout) = self.silence_timeout else {
            return false;
        };
        let last = *self.last_output.lock().unwrap_or_else(|p| p.into_inner());
        if now.saturating_duration_since(last) < timeout {
            return false;
        }
        if self.silence_reported.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.notices.send(Notice::Silence);
        true
    }

    pub fn watches_silence(&self) -> bool {
        self.silence_timeout.is_some()
    }

    /// Poll for silence once a second until cancelled.
    pub async fn watch_silence(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.check_silence(Instant::now());
                }
            }
        }
    }
}

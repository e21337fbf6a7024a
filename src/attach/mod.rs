//! The attach loop: connects the controlling terminal to the current window
//! of a session until the user detaches or the session ends.

mod commands;
mod decoder;
mod flow;
mod input;
mod monitor;
mod pipeline;
mod scrollback;
mod status;
mod terminal;

pub use commands::{CopyMode, TailCopy};
pub use decoder::{Action, Command, CommandDecoder, DecoderConfig, DEFAULT_COMMAND_BYTE, DEFAULT_LITERAL_BYTE};
pub use flow::{FlowControl, FlowMode};
pub use input::{spawn_stdin_reader, InputPump};
pub use monitor::{Monitor, Notice};
pub use pipeline::PipelineOptions;
pub use scrollback::ScrollbackBuffer;
pub use terminal::{size as terminal_size, TerminalGuard};

use crate::error::{Error, Result};
use crate::keeper::DetachHook;
use crate::models::{Session, SessionConfig, Window, DEFAULT_SCROLLBACK};
use crate::pty::{default_shell, PtyHandle};
use crate::store::{lock_session, SessionStore};
use chrono::Local;
use commands::{After, CommandContext};
use flow::{copy_output, CopyEnd, PollingReader};
use input::InputEnd;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Settings for one attachment, resolved from config and flags.
#[derive(Debug, Clone)]
pub struct AttachConfig {
    /// Program started by the create-window command.
    pub shell: String,
    pub session: SessionConfig,
    pub flow: FlowControl,
    pub optimal_output: bool,
    pub log_file: Option<PathBuf>,
    pub activity_message: Option<String>,
    pub silence_message: Option<String>,
    pub silence_timeout: Option<Duration>,
    pub status_format: Option<String>,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            session: SessionConfig::default(),
            flow: FlowControl::default(),
            optimal_output: false,
            log_file: None,
            activity_message: None,
            silence_message: None,
            silence_timeout: None,
            status_format: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Windows keep running; the session can be reattached.
    Detached,
    /// Every window is gone or the user quit.
    Ended,
}

/// Process signals the loop reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Hangup,
    /// Forwarded to every window, carrying the signal number received.
    Terminate(i32),
}

enum Event {
    Signal(Interrupt),
    Input(InputEnd),
    Output(io::Result<CopyEnd>),
    Failed(Error),
}

struct Signals {
    hangup: Signal,
    terminate: Signal,
    interrupt: Signal,
}

impl Signals {
    fn install() -> Result<Self> {
        let install = |kind| signal(kind).map_err(|e| Error::io("installing signal handlers", e));
        Ok(Self {
            hangup: install(SignalKind::hangup())?,
            terminate: install(SignalKind::terminate())?,
            interrupt: install(SignalKind::interrupt())?,
        })
    }

    async fn recv(&mut self) -> Option<Interrupt> {
        tokio::select! {
            got = self.hangup.recv() => got.map(|_| Interrupt::Hangup),
            got = self.terminate.recv() => got.map(|_| Interrupt::Terminate(libc::SIGTERM)),
            got = self.interrupt.recv() => got.map(|_| Interrupt::Terminate(libc::SIGINT)),
        }
    }
}

async fn forward_signals(mut signals: Signals, tx: mpsc::UnboundedSender<Interrupt>, cancel: CancellationToken) {
    loop {
        let interrupt = tokio::select! {
            _ = cancel.cancelled() => return,
            got = signals.recv() => got,
        };
        match interrupt {
            Some(interrupt) if tx.send(interrupt).is_ok() => {}
            _ => return,
        }
    }
}

fn signal_name(signal: i32) -> String {
    match signal {
        libc::SIGTERM => "SIGTERM".to_string(),
        libc::SIGINT => "SIGINT".to_string(),
        libc::SIGHUP => "SIGHUP".to_string(),
        other => format!("signal {other}"),
    }
}

pub struct AttachLoop {
    store: Arc<SessionStore>,
    session_id: String,
    config: AttachConfig,
    hook: DetachHook,
    copy_mode: Box<dyn CopyMode>,
    scrollbacks: HashMap<String, Arc<ScrollbackBuffer>>,
    shown_window: Option<String>,
    /// Where window output is drawn.
    output: fn() -> Box<dyn io::Write + Send>,
}

impl AttachLoop {
    pub fn new(store: Arc<SessionStore>, session_id: &str, config: AttachConfig, hook: DetachHook) -> Self {
        Self {
            store,
            session_id: session_id.to_string(),
            config,
            hook,
            copy_mode: Box::new(TailCopy),
            scrollbacks: HashMap::new(),
            shown_window: None,
            output: stdout_sink,
        }
    }

    pub async fn run(mut self, input: InputPump) -> Result<AttachOutcome> {
        let mut terminal = TerminalGuard::enter().map_err(|e| Error::io("entering raw mode", e))?;
        let signals = Signals::install()?;
        info!(session = %self.session_id, "attach: attached");

        let background = CancellationToken::new();
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        let signal_task = tokio::spawn(forward_signals(signals, signal_tx, background.clone()));
        let resize = tokio::spawn(watch_resize(
            self.store.clone(),
            self.session_id.clone(),
            background.clone(),
        ));

        let silence_timeout = self.config.silence_message.as_ref().and(self.config.silence_timeout);
        let (monitor, mut notices) = Monitor::new(self.config.activity_message.is_some(), silence_timeout);
        let monitor = Arc::new(monitor);
        let silence = monitor.watches_silence().then(|| {
            let monitor = monitor.clone();
            let cancel = background.clone();
            tokio::spawn(async move { monitor.watch_silence(cancel).await })
        });

        let result = self
            .iterate(input, Some(&mut terminal), &mut signal_rx, &monitor, &mut notices)
            .await;

        background.cancel();
        let _ = signal_task.await;
        let _ = resize.await;
        if let Some(task) = silence {
            let _ = task.await;
        }
        drop(terminal);

        match &result {
            Ok(outcome) => info!(session = %self.session_id, ?outcome, "attach: finished"),
            Err(e) => warn!(session = %self.session_id, kind = %e.kind(), "attach: failed: {e}"),
        }
        result
    }

    async fn iterate(
        &mut self,
        mut input: InputPump,
        mut terminal: Option<&mut TerminalGuard>,
        signals: &mut mpsc::UnboundedReceiver<Interrupt>,
        monitor: &Arc<Monitor>,
        notices: &mut mpsc::UnboundedReceiver<Notice>,
    ) -> Result<AttachOutcome> {
        loop {
            let window = self.store.current_window(&self.session_id)?;
            let Some(pty) = self.handle_for(&window)? else {
                debug!(session = %self.session_id, window = %window.number, "attach: window has no live PTY");
                if self.advance_after_exit(None)? {
                    continue;
                }
                return Ok(self.finish());
            };

            let scrollback = self.scrollback_for(&window);
            if let Some((rows, cols)) = terminal::size() {
                if let Err(e) = pty.resize(rows, cols) {
                    debug!("attach: initial resize failed: {e}");
                }
            }
            let key = scrollback_key(&window);
            if self.shown_window.as_ref() != Some(&key) {
                monitor.window_switched();
                self.shown_window = Some(key);
            }
            debug!(session = %self.session_id, window = %window.number, "attach: iteration");

            let options = PipelineOptions {
                encoding: window.encoding.clone(),
                optimal_output: self.config.optimal_output,
                log_file: self.config.log_file.clone(),
            };
            let mut sink = pipeline::build(
                (self.output)(),
                scrollback.clone(),
                Some(monitor.clone()),
                &window.number,
                &options,
            );

            let cancel = CancellationToken::new();
            let reader = pty.reader();
            let output_pty = pty.clone();
            let output_cancel = cancel.clone();
            let flow = self.config.flow;
            let pid = window.pid;
            let mut output_task = tokio::task::spawn_blocking(move || {
                let reader = reader.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                let mut src = PollingReader::new(output_pty, reader).watch_pid(pid);
                copy_output(&mut src, &mut sink, flow, &output_cancel)
            });

            // Writes to the window block, so they run on their own thread.
            let (write_tx, write_rx) = std::sync::mpsc::channel::<Vec<u8>>();
            let writer_pty = pty.clone();
            let writer_task = tokio::task::spawn_blocking(move || {
                for data in write_rx {
                    if let Err(e) = writer_pty.write_all(&data) {
                        debug!("attach: window write failed: {e}");
                        return;
                    }
                }
            });

            let input_cancel = cancel.clone();
            let mut input_task = tokio::spawn(async move {
                let forward = |data: &[u8]| {
                    write_tx
                        .send(data.to_vec())
                        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "window writer stopped"))
                };
                let end = input.run(forward, input_cancel).await;
                (input, end)
            });

            let mut returned_input = None;
            let mut output_done = false;
            let event = loop {
                tokio::select! {
                    Some(interrupt) = signals.recv() => break Event::Signal(interrupt),
                    joined = &mut input_task => match joined {
                        Ok((pump, end)) => {
                            returned_input = Some(pump);
                            break Event::Input(end);
                        }
                        Err(e) => break Event::Failed(Error::Fatal(format!("input task: {e}"))),
                    },
                    joined = &mut output_task => {
                        output_done = true;
                        match joined {
                            Ok(end) => break Event::Output(end),
                            Err(e) => break Event::Failed(Error::Fatal(format!("output task: {e}"))),
                        }
                    },
                    Some(notice) = notices.recv() => self.show_notice(notice),
                }
            };

            // Both tasks end before the next iteration starts.
            cancel.cancel();
            if !output_done {
                let _ = output_task.await;
            }
            input = match returned_input {
                Some(pump) => pump,
                None => match input_task.await {
                    Ok((pump, _)) => pump,
                    Err(e) => return Err(Error::Fatal(format!("input task: {e}"))),
                },
            };
            let _ = writer_task.await;

            match event {
                Event::Signal(Interrupt::Hangup) => {
                    info!(session = %self.session_id, "attach: hangup");
                    return Ok(self.detach());
                }
                Event::Signal(Interrupt::Terminate(signal)) => {
                    self.forward_termination(signal);
                    return Err(Error::Fatal(signal_name(signal)));
                }
                Event::Failed(e) => return Err(e),
                Event::Input(InputEnd::Action(Action::Detach)) | Event::Input(InputEnd::Eof) => {
                    return Ok(self.detach());
                }
                Event::Input(InputEnd::Action(Action::Command(command))) => {
                    let after = {
                        let mut out = io::stdout();
                        let mut ctx = CommandContext {
                            store: &self.store,
                            session_id: &self.session_id,
                            config: &self.config,
                            scrollback: &scrollback,
                            copy_mode: self.copy_mode.as_ref(),
                            input: &mut input,
                            out: &mut out,
                            terminal: terminal.as_deref_mut(),
                        };
                        commands::execute(&mut ctx, command).await
                    };
                    match after {
                        Ok(After::Continue) => self.show_status(),
                        Ok(After::Detach) => return Ok(self.detach()),
                        Ok(After::Quit) => return Ok(self.finish()),
                        Err(e) => show_line(&e.to_string()),
                    }
                }
                Event::Input(InputEnd::Cancelled) => {}
                Event::Input(InputEnd::Error(e)) | Event::Output(Err(e)) => {
                    if pty.is_alive() {
                        return Err(Error::io(format!("session {}", self.session_id), e));
                    }
                    debug!(session = %self.session_id, "attach: window i/o failed after exit: {e}");
                    if !self.advance_after_exit(Some(&pty))? {
                        return Ok(self.finish());
                    }
                }
                Event::Output(Ok(_)) => {
                    debug!(session = %self.session_id, window = %window.number, "attach: window output ended");
                    if !self.advance_after_exit(Some(&pty))? {
                        return Ok(self.finish());
                    }
                }
            }
        }
    }

    /// The window's live handle, reconnecting through the store if needed.
    fn handle_for(&self, window: &Window) -> Result<Option<Arc<PtyHandle>>> {
        if let Some(pty) = window.pty() {
            return Ok(Some(pty));
        }
        self.store.load(&self.session_id)?;
        Ok(self.store.current_window(&self.session_id)?.pty())
    }

    fn scrollback_for(&mut self, window: &Window) -> Arc<ScrollbackBuffer> {
        let capacity = self
            .store
            .get(&self.session_id)
            .map(|s| lock_session(&s).scrollback_for(window))
            .unwrap_or(DEFAULT_SCROLLBACK);
        self.scrollbacks
            .entry(scrollback_key(window))
            .or_insert_with(|| Arc::new(ScrollbackBuffer::new(capacity)))
            .clone()
    }

    /// Move on from a window whose output ended. Returns false when it was
    /// the last window.
    fn advance_after_exit(&mut self, pty: Option<&PtyHandle>) -> Result<bool> {
        advance_after_exit(&self.store, &self.session_id, pty)
    }

    /// Remove the session once nothing in it is running. A window still
    /// running is handed to a keeper like any other detach.
    fn finish(&mut self) -> AttachOutcome {
        let Some(session) = self.store.get(&self.session_id) else {
            return AttachOutcome::Ended;
        };
        let alive = lock_session(&session).has_alive_window();
        if alive {
            debug!(session = %self.session_id, "attach: output ended with windows still running");
            return self.detach();
        }
        if let Err(e) = self.store.delete(&self.session_id) {
            debug!(session = %self.session_id, "attach: could not remove ended session: {e}");
        }
        AttachOutcome::Ended
    }

    fn detach(&mut self) -> AttachOutcome {
        let fds = self.store.master_fds(&self.session_id);
        self.hook.fire(&self.session_id, &fds);
        if let Err(e) = self.store.persist(&self.session_id) {
            warn!(session = %self.session_id, "attach: could not save session on detach: {e}");
        }
        if let Err(e) = self.store.force_detach(&self.session_id) {
            debug!(session = %self.session_id, "attach: {e}");
        }
        AttachOutcome::Detached
    }

    fn forward_termination(&self, signal: i32) {
        let Some(session) = self.store.get(&self.session_id) else {
            return;
        };
        for window in &lock_session(&session).windows {
            let result = match window.pty() {
                Some(pty) => pty.signal(signal),
                None => window
                    .pid
                    .map_or(Ok(()), |pid| crate::pty::sys::signal_pid(pid, signal)),
            };
            if let Err(e) = result {
                warn!(
                    session = %self.session_id,
                    "attach: could not forward {} to window {}: {e}",
                    signal_name(signal),
                    window.number
                );
            }
        }
    }

    fn show_notice(&self, notice: Notice) {
        let template = match notice {
            Notice::Activity => self.config.activity_message.as_deref(),
            Notice::Silence => self.config.silence_message.as_deref(),
        };
        let Some(template) = template else { return };
        if let Ok(window) = self.store.current_window(&self.session_id) {
            show_line(&status::format_message(template, &window));
        }
    }

    fn show_status(&self) {
        let Some(format) = self.config.status_format.as_deref() else {
            return;
        };
        if let Some(session) = self.store.get(&self.session_id) {
            let text = status::format_status(format, &lock_session(&session), Local::now());
            show_line(&text);
        }
    }
}

fn stdout_sink() -> Box<dyn io::Write + Send> {
    Box::new(io::stdout())
}

fn show_line(text: &str) {
    let _ = status::render(&mut io::stdout(), text);
}

/// Scrollback survives window renumbering by following the process.
fn scrollback_key(window: &Window) -> String {
    match window.pid {
        Some(pid) => format!("pid:{pid}"),
        None => format!("window:{}", window.number),
    }
}

fn advance_after_exit(store: &SessionStore, id: &str, pty: Option<&PtyHandle>) -> Result<bool> {
    if store.window_count(id)? <= 1 {
        return Ok(false);
    }
    match pty {
        Some(pty) if pty.is_alive() => store.next_window(id)?,
        _ => store.retire_current_window(id)?,
    }
    Ok(true)
}

async fn watch_resize(store: Arc<SessionStore>, id: String, cancel: CancellationToken) {
    let mut winch = match signal(SignalKind::window_change()) {
        Ok(winch) => winch,
        Err(e) => {
            warn!("attach: cannot watch terminal size: {e}");
            return;
        }
    };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            got = winch.recv() => {
                if got.is_none() {
                    return;
                }
                resize_current(&store, &id);
            }
        }
    }
}

fn resize_current(store: &SessionStore, id: &str) {
    let Some((rows, cols)) = terminal::size() else {
        return;
    };
    let Some(pty) = store.current_window(id).ok().and_then(|w| w.pty()) else {
        return;
    };
    match pty.resize(rows, cols) {
        Ok(()) => debug!(rows, cols, "attach: resized"),
        Err(e) => debug!("attach: resize failed: {e}"),
    }
}

/// Session state as shown by `ls`.
pub fn describe(session: &Session) -> &'static str {
    if session.windows.iter().any(|w| w.pty().is_some()) {
        "Attached"
    } else if session.has_alive_window() {
        "Detached"
    } else {
        "Dead"
    }
}

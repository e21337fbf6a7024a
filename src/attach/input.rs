use super::decoder::{Action, CommandDecoder};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const ESC: u8 = 0x1b;
const BACKSPACE: u8 = 0x08;
const DEL: u8 = 0x7f;

/// Read stdin on a dedicated thread for the whole process lifetime. The
/// channel closes when stdin reaches end of file or fails.
pub fn spawn_stdin_reader() -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(64);
    let spawned = std::thread::Builder::new()
        .name("rescreen-stdin".to_string())
        .spawn(move || {
            let mut stdin = io::stdin().lock();
            let mut buf = [0u8; 1024];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("input: stdin read failed: {e}");
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        debug!("input: cannot start stdin reader: {e}");
    }
    rx
}

#[derive(Debug)]
pub enum InputEnd {
    Action(Action),
    Cancelled,
    /// Input closed.
    Eof,
    Error(io::Error),
}

/// Terminal input source shared by every attach iteration. Bytes left over
/// after a command fires stay queued for whoever reads next.
#[derive(Debug)]
pub struct InputPump {
    rx: mpsc::Receiver<Vec<u8>>,
    leftover: VecDeque<u8>,
    decoder: CommandDecoder,
}

impl InputPump {
    pub fn new(rx: mpsc::Receiver<Vec<u8>>, decoder: CommandDecoder) -> Self {
        Self {
            rx,
            leftover: VecDeque::new(),
            decoder,
        }
    }

    async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if !self.leftover.is_empty() {
            return Some(self.leftover.drain(..).collect());
        }
        self.rx.recv().await
    }

    /// Decode input and forward pass-through bytes to `forward` until the
    /// decoder produces an action, input closes or `cancel` fires.
    pub async fn run<F>(&mut self, mut forward: F, cancel: CancellationToken) -> InputEnd
    where
        F: FnMut(&[u8]) -> io::Result<()>,
    {
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return InputEnd::Cancelled,
                chunk = self.next_chunk() => chunk,
            };
            let Some(chunk) = chunk else {
                return InputEnd::Eof;
            };

            for (i, &byte) in chunk.iter().enumerate() {
                let Some(action) = self.decoder.push(byte) else {
                    continue;
                };
                self.leftover.extend(&chunk[i + 1..]);
                if let Err(e) = self.flush(&mut forward) {
                    return InputEnd::Error(e);
                }
                return InputEnd::Action(action);
            }
            if let Err(e) = self.flush(&mut forward) {
                return InputEnd::Error(e);
            }
        }
    }

    fn flush<F>(&mut self, forward: &mut F) -> io::Result<()>
    where
        F: FnMut(&[u8]) -> io::Result<()>,
    {
        if !self.decoder.has_output() {
            return Ok(());
        }
        forward(&self.decoder.take_output())
    }

    /// Next raw byte, bypassing the decoder.
    pub async fn read_key(&mut self) -> Option<u8> {
        if let Some(b) = self.leftover.pop_front() {
            return Some(b);
        }
        let chunk = self.rx.recv().await?;
        let (&first, rest) = chunk.split_first()?;
        self.leftover.extend(rest);
        Some(first)
    }

    /// Read a line with simple editing. With `mask` set, each typed byte is
    /// echoed as that character instead of itself. ESC cancels and returns
    /// `None`, as does closed input.
    pub async fn read_line(&mut self, out: &mut impl Write, mask: Option<char>) -> Option<String> {
        let mut line: Vec<u8> = Vec::new();
        loop {
            let b = self.read_key().await?;
            match b {
                b'\r' | b'\n' => {
                    let _ = out.write_all(b"\r\n");
                    let _ = out.flush();
                    return Some(String::from_utf8_lossy(&line).into_owned());
                }
                ESC => {
                    let _ = out.write_all(b"\r\n");
                    let _ = out.flush();
                    return None;
                }
                BACKSPACE | DEL => {
                    if line.pop().is_some() {
                        let _ = out.write_all(b"\x08 \x08");
                    }
                }
                _ if b < 0x20 => {}
                _ => {
                    line.push(b);
                    let _ = match mask {
                        Some(c) => write!(out, "{c}"),
                        None => out.write_all(&[b]),
                    };
                }
            }
            let _ = out.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::decoder::{Command, DecoderConfig};

    fn pump() -> (mpsc::Sender<Vec<u8>>, InputPump) {
        let (tx, rx) = mpsc::channel(16);
        (tx, InputPump::new(rx, CommandDecoder::new(DecoderConfig::default())))
    }

    #[tokio::test]
    async fn test_plain_input_is_forwarded() {
        let (tx, mut pump) = pump();
        tx.send(b"ls -l\r".to_vec()).await.unwrap();
        drop(tx);

        let mut forwarded = Vec::new();
        let end = pump
            .run(
                |data| {
                    forwarded.extend_from_slice(data);
                    Ok(())
                },
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(end, InputEnd::Eof));
        assert_eq!(forwarded, b"ls -l\r".to_vec());
    }

    #[tokio::test]
    async fn test_command_keeps_remaining_bytes() {
        let (tx, mut pump) = pump();
        tx.send(vec![b'x', 0x01, b'n', b'y', b'z']).await.unwrap();

        let mut forwarded = Vec::new();
        let end = pump
            .run(
                |data| {
                    forwarded.extend_from_slice(data);
                    Ok(())
                },
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(end, InputEnd::Action(Action::Command(Command::Next))));
        assert_eq!(forwarded, b"x".to_vec());
        assert_eq!(pump.read_key().await, Some(b'y'));
        assert_eq!(pump.read_key().await, Some(b'z'));
    }

    #[tokio::test]
    async fn test_detach_action() {
        let (tx, mut pump) = pump();
        tx.send(vec![0x01, b'd']).await.unwrap();
        let end = pump.run(|_| Ok(()), CancellationToken::new()).await;
        assert!(matches!(end, InputEnd::Action(Action::Detach)));
    }

    #[tokio::test]
    async fn test_cancel_ends_run() {
        let (_tx, mut pump) = pump();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let end = pump.run(|_| Ok(()), cancel).await;
        assert!(matches!(end, InputEnd::Cancelled));
    }

    #[tokio::test]
    async fn test_forward_error_is_reported() {
        let (tx, mut pump) = pump();
        tx.send(b"abc".to_vec()).await.unwrap();
        let end = pump
            .run(
                |_| Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed")),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(end, InputEnd::Error(e) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[tokio::test]
    async fn test_read_line_editing() {
        let (tx, mut pump) = pump();
        tx.send(b"tiz\x7fp\r".to_vec()).await.unwrap();
        let mut echo = Vec::new();
        let line = pump.read_line(&mut echo, None).await;
        assert_eq!(line.as_deref(), Some("tip"));
    }

    #[tokio::test]
    async fn test_read_line_masked_and_cancelled() {
        let (tx, mut pump) = pump();
        tx.send(b"pw\r".to_vec()).await.unwrap();
        let mut echo = Vec::new();
        assert_eq!(pump.read_line(&mut echo, Some('*')).await.as_deref(), Some("pw"));
        assert_eq!(echo, b"**\r\n".to_vec());

        tx.send(vec![b'q', ESC]).await.unwrap();
        assert_eq!(pump.read_line(&mut Vec::new(), None).await, None);
    }
}

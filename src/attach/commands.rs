use super::decoder::Command;
use super::input::InputPump;
use super::scrollback::ScrollbackBuffer;
use super::terminal::{self, TerminalGuard, PRESS_ANY_KEY};
use super::AttachConfig;
use crate::error::{Error, Result};
use crate::pty::DEFAULT_ROWS;
use crate::store::{lock_session, SessionStore};
use chrono::Local;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

const HELP: &str = "
rescreen key bindings (C-a is the command key):

Windows:
  C-a c        create a new window
  C-a n        next window
  C-a p        previous window
  C-a 0-9 B-Z  switch to window
  C-a C-a      toggle to last window
  C-a '        select window by label
  C-a \"        window list
  C-a k        kill current window
  C-a A        set window title
  C-a \\        kill all windows

Scrollback and paste buffer:
  C-a [        copy the last screenful to the paste buffer
  C-a ]        paste
  C-a {        write paste buffer to file
  C-a }        read paste buffer from file
  C-a < / >    write scrollback to file

Other:
  C-a ?        this help
  C-a :        command prompt
  C-a .        redraw
  C-a x        lock
  C-a s        suspend
  C-a v ,  t   version, license, time
  C-a _        blank the screen
  C-a C-v      enter a byte as two hex digits
  C-a d        detach
  C-a a        send a literal C-a

";

const LICENSE: &str = "
rescreen is free software, distributed under the MIT license.
There is NO WARRANTY, to the extent permitted by law.

";

/// Copy-mode collaborator: given the scrollback of the current window,
/// return the bytes to place in the paste buffer, if any.
pub trait CopyMode: Send + Sync {
    fn copy(&self, scrollback: &ScrollbackBuffer, rows: usize) -> Option<Vec<u8>>;
}

/// Copies the last screenful of scrollback.
#[derive(Debug, Default)]
pub struct TailCopy;

impl CopyMode for TailCopy {
    fn copy(&self, scrollback: &ScrollbackBuffer, rows: usize) -> Option<Vec<u8>> {
        let lines = scrollback.tail(rows.max(1));
        if lines.is_empty() {
            return None;
        }
        Some(lines.join(&b'\n'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum After {
    Continue,
    Detach,
    /// The session was torn down.
    Quit,
}

/// Everything a command may touch while the copy tasks are stopped.
pub struct CommandContext<'a, W: Write> {
    pub store: &'a SessionStore,
    pub session_id: &'a str,
    pub config: &'a AttachConfig,
    pub scrollback: &'a ScrollbackBuffer,
    pub copy_mode: &'a dyn CopyMode,
    pub input: &'a mut InputPump,
    pub out: &'a mut W,
    pub terminal: Option<&'a mut TerminalGuard>,
}

pub async fn execute<W: Write>(ctx: &mut CommandContext<'_, W>, command: Command) -> Result<After> {
    let command = match command {
        Command::Prompt => match prompt(ctx).await {
            Some(command) => command,
            None => return Ok(After::Continue),
        },
        other => other,
    };
    debug!(session = ctx.session_id, ?command, "attach: command");
    apply(ctx, command).await
}

async fn prompt<W: Write>(ctx: &mut CommandContext<'_, W>) -> Option<Command> {
    write_out(ctx.out, b"\r\n: ");
    let line = ctx.input.read_line(ctx.out, None).await?;
    if line.trim().is_empty() {
        return None;
    }
    match Command::from_name(&line) {
        Command::Prompt => None,
        command => Some(command),
    }
}

async fn apply<W: Write>(ctx: &mut CommandContext<'_, W>, command: Command) -> Result<After> {
    let store = ctx.store;
    let id = ctx.session_id;

    match command {
        Command::Create => {
            store.create_window(id, &ctx.config.shell, &[], &ctx.config.session)?;
        }
        Command::Next => store.next_window(id)?,
        Command::Prev => store.prev_window(id)?,
        Command::Toggle => store.toggle_last_window(id)?,
        Command::Select(label) => store.switch_to_window(id, label.trim())?,
        Command::Kill => store.kill_current_window(id)?,
        Command::Title(title) => store.set_title(id, &title)?,
        Command::SaveLayout(name) => store.save_layout(id, &name)?,
        Command::SelectLayout(name) => store.select_layout(id, &name)?,

        Command::CopyMode => {
            let rows = terminal::size().map_or(DEFAULT_ROWS, |(rows, _)| rows) as usize;
            let data = ctx
                .copy_mode
                .copy(ctx.scrollback, rows)
                .ok_or_else(|| Error::NotFound("scrollback".to_string()))?;
            store.set_paste_buffer(data);
        }
        Command::Paste => {
            let data = store.paste_buffer();
            if !data.is_empty() {
                let pty = store
                    .current_window(id)?
                    .pty()
                    .ok_or_else(|| Error::Unavailable("window has no PTY".to_string()))?;
                pty.write_all(&data)
                    .map_err(|e| Error::io("pasting into window", e))?;
            }
        }
        Command::WriteBuffer(path) => store.write_paste_buffer(&file_name(&path)?)?,
        Command::ReadBuffer(path) => store.read_paste_buffer(&file_name(&path)?)?,
        Command::Dump(path) | Command::WriteScrollback(path) => {
            store.dump_scrollback(ctx.scrollback, &file_name(&path)?)?
        }

        Command::WindowList => window_list(ctx).await?,
        Command::Help => show_and_wait(ctx, HELP).await,
        Command::Version => {
            let text = format!("\nrescreen {}\nA screen-like terminal multiplexer\n\n", env!("CARGO_PKG_VERSION"));
            show_and_wait(ctx, &text).await
        }
        Command::License => show_and_wait(ctx, LICENSE).await,
        Command::Time => {
            let mut text = format!("\nTime: {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"));
            if let Ok(load) = std::fs::read_to_string("/proc/loadavg") {
                text.push_str(&format!("Load: {}\n", load.trim()));
            }
            text.push('\n');
            show_and_wait(ctx, &text).await
        }
        Command::Blank => {
            let _ = terminal::clear_screen(ctx.out);
            ctx.input.read_key().await;
        }
        Command::Redraw => {
            let _ = terminal::clear_screen(ctx.out);
        }
        Command::Lock => lock(ctx).await,
        Command::Suspend => suspend(ctx)?,

        Command::KillAll => {
            let session = store.load(id)?;
            lock_session(&session).kill_all();
        }
        Command::Quit => {
            store.delete(id)?;
            return Ok(After::Quit);
        }
        Command::Detach => return Ok(After::Detach),
        Command::Prompt => {}
        Command::Custom(name) => {
            return Err(Error::NotFound(format!("command {name:?}")));
        }
    }
    Ok(After::Continue)
}

fn file_name(text: &str) -> Result<PathBuf> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::NotFound("file name".to_string()));
    }
    Ok(PathBuf::from(text))
}

fn write_out(out: &mut impl Write, data: &[u8]) {
    let _ = out.write_all(data);
    let _ = out.flush();
}

async fn show_and_wait<W: Write>(ctx: &mut CommandContext<'_, W>, text: &str) {
    let _ = terminal::print_block(ctx.out, text);
    let _ = terminal::print_block(ctx.out, PRESS_ANY_KEY);
    ctx.input.read_key().await;
    write_out(ctx.out, b"\r\n");
}

async fn window_list<W: Write>(ctx: &mut CommandContext<'_, W>) -> Result<()> {
    let listing = {
        let session = ctx.store.load(ctx.session_id)?;
        let session = lock_session(&session);
        session
            .windows
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let marker = if i == session.current_window { '*' } else { ' ' };
                format!("{marker} {}: {}\n", w.number, w.display_title())
            })
            .collect::<String>()
    };

    let _ = terminal::print_block(ctx.out, &format!("\nWindows:\n{listing}\nSelect window (Enter to cancel): "));
    let Some(label) = ctx.input.read_line(ctx.out, None).await else {
        return Ok(());
    };
    let label = label.trim();
    if label.is_empty() {
        return Ok(());
    }
    ctx.store.switch_to_window(ctx.session_id, label)
}

async fn lock<W: Write>(ctx: &mut CommandContext<'_, W>) {
    write_out(ctx.out, b"\r\nScreen locked. Enter password: ");
    if ctx.input.read_line(ctx.out, Some('*')).await.is_none() {
        return;
    }
    show_and_wait(ctx, "Screen unlocked.\n").await;
}

fn suspend<W: Write>(ctx: &mut CommandContext<'_, W>) -> Result<()> {
    let Some(terminal) = ctx.terminal.as_deref_mut() else {
        return Err(Error::Unavailable("no terminal to suspend".to_string()));
    };
    terminal
        .release()
        .map_err(|e| Error::io("restoring terminal", e))?;
    #[cfg(unix)]
    unsafe {
        libc::raise(libc::SIGTSTP);
    }
    terminal
        .resume()
        .map_err(|e| Error::io("re-entering raw mode", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::decoder::{CommandDecoder, DecoderConfig};
    use crate::models::SessionConfig;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct Fixture {
        _dir: TempDir,
        store: SessionStore,
        config: AttachConfig,
        scrollback: ScrollbackBuffer,
        input: InputPump,
        keys: mpsc::Sender<Vec<u8>>,
        out: Vec<u8>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path());
        let config = AttachConfig {
            shell: "sleep".to_string(),
            ..Default::default()
        };
        store
            .create("cmds", "sleep", &["30".to_string()], &SessionConfig::default())
            .unwrap();
        let (keys, rx) = mpsc::channel(16);
        Fixture {
            _dir: dir,
            store,
            config,
            scrollback: ScrollbackBuffer::new(100),
            input: InputPump::new(rx, CommandDecoder::new(DecoderConfig::default())),
            keys,
            out: Vec::new(),
        }
    }

    async fn run(f: &mut Fixture, command: Command) -> Result<After> {
        let mut ctx = CommandContext {
            store: &f.store,
            session_id: "cmds",
            config: &f.config,
            scrollback: &f.scrollback,
            copy_mode: &TailCopy,
            input: &mut f.input,
            out: &mut f.out,
            terminal: None,
        };
        execute(&mut ctx, command).await
    }

    fn window_count(f: &Fixture) -> usize {
        lock_session(&f.store.get("cmds").unwrap()).windows.len()
    }

    fn kill_all(f: &Fixture) {
        if let Some(session) = f.store.get("cmds") {
            lock_session(&session).kill_all();
        }
    }

    // ==== Window commands ====

    #[tokio::test]
    async fn test_create_next_and_kill() {
        let mut f = fixture();
        f.config.shell = "/bin/sh".to_string();
        run(&mut f, Command::Create).await.unwrap();
        assert_eq!(window_count(&f), 2);
        assert_eq!(f.store.current_window("cmds").unwrap().number, "1");

        run(&mut f, Command::Next).await.unwrap();
        assert_eq!(f.store.current_window("cmds").unwrap().number, "0");

        run(&mut f, Command::Kill).await.unwrap();
        assert_eq!(window_count(&f), 1);

        let err = run(&mut f, Command::Kill).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::LastWindow);
        kill_all(&f);
    }

    #[tokio::test]
    async fn test_title_and_unknown_window() {
        let mut f = fixture();
        run(&mut f, Command::Title("logs".to_string())).await.unwrap();
        assert_eq!(f.store.current_window("cmds").unwrap().title, "logs");

        let err = run(&mut f, Command::Select("9".to_string())).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        kill_all(&f);
    }

    // ==== Buffers ====

    #[tokio::test]
    async fn test_copy_write_and_read_buffer() {
        let mut f = fixture();
        f.scrollback.append_bytes(b"alpha\nbeta\n");
        run(&mut f, Command::CopyMode).await.unwrap();
        assert_eq!(f.store.paste_buffer(), b"alpha\nbeta".to_vec());

        let path = f._dir.path().join("buffer.txt");
        let path_text = path.to_string_lossy().into_owned();
        run(&mut f, Command::WriteBuffer(path_text.clone())).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"alpha\nbeta".to_vec());

        std::fs::write(&path, b"replaced").unwrap();
        run(&mut f, Command::ReadBuffer(path_text)).await.unwrap();
        assert_eq!(f.store.paste_buffer(), b"replaced".to_vec());
        kill_all(&f);
    }

    #[tokio::test]
    async fn test_copy_with_empty_scrollback_fails() {
        let mut f = fixture();
        let err = run(&mut f, Command::CopyMode).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        kill_all(&f);
    }

    #[tokio::test]
    async fn test_dump_scrollback() {
        let mut f = fixture();
        f.scrollback.append_bytes(b"one\r\ntwo\r\n");
        let path = f._dir.path().join("hardcopy");
        run(&mut f, Command::Dump(path.to_string_lossy().into_owned()))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");

        let err = run(&mut f, Command::Dump(String::new())).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        kill_all(&f);
    }

    #[tokio::test]
    async fn test_read_missing_buffer_file() {
        let mut f = fixture();
        let err = run(&mut f, Command::ReadBuffer("/nonexistent/rescreen-buffer".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        kill_all(&f);
    }

    // ==== Interactive commands ====

    #[tokio::test]
    async fn test_prompt_dispatches_by_name() {
        let mut f = fixture();
        f.keys.send(b"title build\r".to_vec()).await.unwrap();
        let after = run(&mut f, Command::Prompt).await.unwrap();
        assert_eq!(after, After::Continue);
        assert_eq!(f.store.current_window("cmds").unwrap().title, "build");

        f.keys.send(b"detach\r".to_vec()).await.unwrap();
        assert_eq!(run(&mut f, Command::Prompt).await.unwrap(), After::Detach);
        kill_all(&f);
    }

    #[tokio::test]
    async fn test_help_waits_for_key() {
        let mut f = fixture();
        f.keys.send(b"qx".to_vec()).await.unwrap();
        run(&mut f, Command::Help).await.unwrap();
        let shown = String::from_utf8_lossy(&f.out).into_owned();
        assert!(shown.contains("C-a d        detach"));
        assert!(shown.contains(PRESS_ANY_KEY));
        // Only one key was consumed.
        assert_eq!(f.input.read_key().await, Some(b'x'));
        kill_all(&f);
    }

    #[tokio::test]
    async fn test_window_list_selects() {
        let mut f = fixture();
        f.config.shell = "/bin/sh".to_string();
        run(&mut f, Command::Create).await.unwrap();
        f.keys.send(b"0\r".to_vec()).await.unwrap();
        run(&mut f, Command::WindowList).await.unwrap();
        assert_eq!(f.store.current_window("cmds").unwrap().number, "0");
        assert!(String::from_utf8_lossy(&f.out).contains("* 1: /bin/sh"));
        kill_all(&f);
    }

    #[tokio::test]
    async fn test_custom_command_is_reported() {
        let mut f = fixture();
        let err = run(&mut f, Command::Custom("zoom".to_string())).await.unwrap_err();
        assert!(err.to_string().contains("zoom"));
        kill_all(&f);
    }

    #[tokio::test]
    async fn test_quit_deletes_session() {
        let mut f = fixture();
        assert_eq!(run(&mut f, Command::Quit).await.unwrap(), After::Quit);
        assert!(f.store.get("cmds").is_none());
        assert!(!f.store.registry().exists("cmds"));
    }

    #[test]
    fn test_tail_copy_takes_last_rows() {
        let scrollback = ScrollbackBuffer::new(10);
        scrollback.append_bytes(b"1\n2\n3\n4\n");
        assert_eq!(TailCopy.copy(&scrollback, 2), Some(b"3\n4".to_vec()));
        assert_eq!(TailCopy.copy(&ScrollbackBuffer::new(10), 2), None);
    }
}

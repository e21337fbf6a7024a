//! Keystroke decoder for the attach loop.
//!
//! Input is consumed one byte at a time. Ordinary bytes are queued for the
//! PTY; a command byte starts a two-key sequence that either produces a
//! [`Command`], requests a detach, or (when unrecognised) is replayed to the
//! PTY verbatim.

use std::collections::{HashMap, VecDeque};

pub const DEFAULT_COMMAND_BYTE: u8 = 0x01;
pub const DEFAULT_LITERAL_BYTE: u8 = b'a';

const BACKSPACE: u8 = 0x08;
const DEL: u8 = 0x7f;
const ESC: u8 = 0x1b;
const CTRL_V: u8 = 0x16;

/// Multiplexer commands. Built-in commands are closed variants; anything
/// bound by name that is not built in arrives as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create,
    Next,
    Prev,
    Toggle,
    Select(String),
    Kill,
    Title(String),
    CopyMode,
    Paste,
    WriteBuffer(String),
    ReadBuffer(String),
    Dump(String),
    WriteScrollback(String),
    Help,
    Prompt,
    Redraw,
    Lock,
    Version,
    License,
    Time,
    Blank,
    Suspend,
    KillAll,
    Quit,
    Detach,
    WindowList,
    SaveLayout(String),
    SelectLayout(String),
    Custom(String),
}

impl Command {
    /// Parse a command line such as `select 3` or `title build`.
    pub fn from_name(line: &str) -> Command {
        let line = line.trim();
        let (name, arg) = match line.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (line, ""),
        };
        let arg = arg.to_string();

        match name {
            "create" | "screen" => Command::Create,
            "next" => Command::Next,
            "prev" => Command::Prev,
            "other" | "toggle" => Command::Toggle,
            "select" => Command::Select(arg),
            "kill" => Command::Kill,
            "title" => Command::Title(arg),
            "copy" | "copymode" => Command::CopyMode,
            "paste" => Command::Paste,
            "writebuf" => Command::WriteBuffer(arg),
            "readbuf" => Command::ReadBuffer(arg),
            "hardcopy" => Command::Dump(arg),
            "help" => Command::Help,
            "colon" => Command::Prompt,
            "redisplay" | "redraw" => Command::Redraw,
            "lockscreen" | "lock" => Command::Lock,
            "version" => Command::Version,
            "license" => Command::License,
            "time" => Command::Time,
            "blank" => Command::Blank,
            "suspend" => Command::Suspend,
            "killall" => Command::KillAll,
            "quit" | "exit" => Command::Quit,
            "detach" => Command::Detach,
            "windows" => Command::WindowList,
            "layout" => match arg.split_once(char::is_whitespace) {
                Some(("save", name)) => Command::SaveLayout(name.trim().to_string()),
                Some(("select", name)) => Command::SelectLayout(name.trim().to_string()),
                _ => Command::Custom(line.to_string()),
            },
            _ => Command::Custom(line.to_string()),
        }
    }
}

/// What a single input byte resolved to, beyond any bytes it queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Command(Command),
    Detach,
}

#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub command_byte: u8,
    pub literal_byte: u8,
    /// Checked before the built-in table.
    pub bindings: HashMap<u8, String>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            command_byte: DEFAULT_COMMAND_BYTE,
            literal_byte: DEFAULT_LITERAL_BYTE,
            bindings: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    Title,
    WindowSelect,
    WriteBuffer,
    ReadBuffer,
    Dump,
    WriteScrollback,
}

impl TextTarget {
    fn finish(self, text: String) -> Command {
        match self {
            TextTarget::Title => Command::Title(text),
            TextTarget::WindowSelect => Command::Select(text),
            TextTarget::WriteBuffer => Command::WriteBuffer(text),
            TextTarget::ReadBuffer => Command::ReadBuffer(text),
            TextTarget::Dump => Command::Dump(text),
            TextTarget::WriteScrollback => Command::WriteScrollback(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    SawCommandByte,
    Text(TextTarget),
    Digraph,
}

/// Result of the second key of a command sequence.
enum Sequence {
    Action(Action),
    Enter(State),
    Forward(u8),
    Unmatched,
}

#[derive(Debug)]
pub struct CommandDecoder {
    config: DecoderConfig,
    state: State,
    pending: VecDeque<u8>,
    text: Vec<u8>,
}

impl CommandDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            state: State::Normal,
            pending: VecDeque::new(),
            text: Vec::new(),
        }
    }

    /// True while a multi-byte sequence is in progress.
    pub fn in_sequence(&self) -> bool {
        self.state != State::Normal
    }

    /// Pass-through bytes queued so far, in input order.
    pub fn take_output(&mut self) -> Vec<u8> {
        self.pending.drain(..).collect()
    }

    pub fn has_output(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn push(&mut self, byte: u8) -> Option<Action> {
        match self.state {
            State::Normal => {
                if byte == self.config.command_byte {
                    self.state = State::SawCommandByte;
                } else {
                    self.pending.push_back(byte);
                }
                None
            }
            State::SawCommandByte => {
                self.state = State::Normal;
                match self.sequence(byte) {
                    Sequence::Action(action) => Some(action),
                    Sequence::Enter(state) => {
                        self.state = state;
                        self.text.clear();
                        None
                    }
                    Sequence::Forward(b) => {
                        self.pending.push_back(b);
                        None
                    }
                    Sequence::Unmatched => {
                        self.pending.push_back(self.config.command_byte);
                        self.pending.push_back(byte);
                        None
                    }
                }
            }
            State::Text(target) => self.push_text(target, byte),
            State::Digraph => {
                self.text.push(byte);
                if self.text.len() == 2 {
                    match hex_pair(self.text[0], self.text[1]) {
                        Some(value) => self.pending.push_back(value),
                        None => self.pending.extend(self.text.iter().copied()),
                    }
                    self.text.clear();
                    self.state = State::Normal;
                }
                None
            }
        }
    }

    fn sequence(&self, byte: u8) -> Sequence {
        if let Some(name) = self.config.bindings.get(&byte) {
            return Sequence::Action(match Command::from_name(name) {
                Command::Detach => Action::Detach,
                command => Action::Command(command),
            });
        }
        if byte == b'd' {
            return Sequence::Action(Action::Detach);
        }
        // The literal byte may equal the command byte ("``"); literal wins.
        if byte == self.config.literal_byte || byte == DEFAULT_LITERAL_BYTE {
            return Sequence::Forward(self.config.command_byte);
        }
        if byte == self.config.command_byte {
            return Sequence::Action(Action::Command(Command::Toggle));
        }

        let command = match byte {
            b'c' => Command::Create,
            b'n' | b' ' => Command::Next,
            b'p' | BACKSPACE | DEL => Command::Prev,
            b'k' => Command::Kill,
            b'A' => return Sequence::Enter(State::Text(TextTarget::Title)),
            b'[' => Command::CopyMode,
            b']' => Command::Paste,
            b'{' => return Sequence::Enter(State::Text(TextTarget::WriteBuffer)),
            b'}' => return Sequence::Enter(State::Text(TextTarget::ReadBuffer)),
            b'<' => return Sequence::Enter(State::Text(TextTarget::Dump)),
            b'>' => return Sequence::Enter(State::Text(TextTarget::WriteScrollback)),
            b'?' => Command::Help,
            b':' => Command::Prompt,
            b'.' => Command::Redraw,
            b'x' => Command::Lock,
            b'v' => Command::Version,
            b',' => Command::License,
            b't' => Command::Time,
            b'_' => Command::Blank,
            b's' => Command::Suspend,
            b'\\' => Command::KillAll,
            CTRL_V => return Sequence::Enter(State::Digraph),
            b'\'' => return Sequence::Enter(State::Text(TextTarget::WindowSelect)),
            b'"' => Command::WindowList,
            b'0'..=b'9' | b'B'..=b'Z' => Command::Select(char::from(byte).to_string()),
            _ => return Sequence::Unmatched,
        };
        Sequence::Action(Action::Command(command))
    }

    fn push_text(&mut self, target: TextTarget, byte: u8) -> Option<Action> {
        match byte {
            b'\r' | b'\n' => {
                self.state = State::Normal;
                let text = String::from_utf8_lossy(&self.text).into_owned();
                self.text.clear();
                Some(Action::Command(target.finish(text)))
            }
            BACKSPACE | DEL => {
                self.text.pop();
                None
            }
            ESC => {
                self.state = State::Normal;
                self.text.clear();
                None
            }
            _ => {
                self.text.push(byte);
                None
            }
        }
    }
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some(((hi << 4) | lo) as u8)
}

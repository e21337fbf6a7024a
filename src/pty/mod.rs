mod handle;
mod slave_path;
pub mod sys;

pub use handle::{default_shell, PtyHandle, DEFAULT_COLS, DEFAULT_ROWS};

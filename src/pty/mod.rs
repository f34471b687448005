//! PTY (Pseudo-Terminal) abstraction layer.
//!
//! Backends run their processes (a shell, a tmux client or an `ssh` client)
//! inside a PTY allocated here, then bridge the blocking reader/writer onto
//! channels with the async adapters.

mod async_adapter;
mod native;

pub use async_adapter::{AsyncPtyReader, AsyncPtyWriter, PumpExit};
pub use native::{default_shell, NativePty, PtyControl, PtyHandle};

use tokio::sync::mpsc;

/// Default terminal width for new backends.
pub const DEFAULT_COLS: u16 = 120;
/// Default terminal height for new backends.
pub const DEFAULT_ROWS: u16 = 40;
/// Default `TERM` for new backends.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Size of a PTY in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Number of rows (height).
    pub rows: u16,
    /// Number of columns (width).
    pub cols: u16,
}

impl PtySize {
    /// Create a new PtySize with the given dimensions.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Clamp to at least one row and column.
    pub fn clamped(self) -> Self {
        Self {
            rows: self.rows.max(1),
            cols: self.cols.max(1),
        }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
        }
    }
}

/// Duplex byte stream to a running backend.
///
/// `output` closing is the backend's terminal `closed` event.
#[derive(Debug)]
pub struct ByteStream {
    /// Output chunks from the backend.
    pub output: mpsc::Receiver<Vec<u8>>,
    /// Input bytes for the backend.
    pub input: mpsc::Sender<Vec<u8>>,
}

impl ByteStream {
    /// Bridge a spawned PTY's reader and writer onto channels.
    pub fn from_pty(
        reader: Box<dyn std::io::Read + Send>,
        writer: Box<dyn std::io::Write + Send>,
    ) -> Self {
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);

        tokio::spawn(AsyncPtyReader::new(reader, out_tx).run());
        tokio::spawn(AsyncPtyWriter::new(writer, in_rx).run());

        Self {
            output: out_rx,
            input: in_tx,
        }
    }
}

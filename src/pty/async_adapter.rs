//! Channel pumps for PTY I/O.
//!
//! PTY readers and writers block, so each direction runs on a blocking
//! thread and talks to the async side over an `mpsc` channel. The output
//! pump dropping its sender is how consumers observe that a backend closed.

use std::io::{self, Read, Write};
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

const DEFAULT_CHUNK: usize = 4096;

/// Why a pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The PTY side reached EOF or its slave was closed.
    PtyClosed,
    /// The async side dropped its end of the channel.
    ChannelClosed,
    /// An unexpected I/O error.
    Failed,
}

/// Errors that just mean the process on the other side went away.
fn is_hangup(e: &io::Error) -> bool {
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::EIO) {
        return true;
    }
    e.kind() == io::ErrorKind::BrokenPipe
}

/// Moves PTY output into a channel, one chunk per read.
pub struct AsyncPtyReader<R: Read + Send + 'static> {
    reader: R,
    tx: mpsc::Sender<Vec<u8>>,
    chunk: usize,
}

impl<R: Read + Send + 'static> AsyncPtyReader<R> {
    pub fn new(reader: R, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            reader,
            tx,
            chunk: DEFAULT_CHUNK,
        }
    }

    /// Largest chunk forwarded per read.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.chunk = size.max(1);
        self
    }

    fn pump(mut self) -> PumpExit {
        let mut buf = vec![0u8; self.chunk];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return PumpExit::PtyClosed,
                Ok(n) => {
                    trace!("pty output: {} bytes", n);
                    if self.tx.blocking_send(buf[..n].to_vec()).is_err() {
                        return PumpExit::ChannelClosed;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if is_hangup(&e) => return PumpExit::PtyClosed,
                Err(e) => {
                    error!("pty read failed: {}", e);
                    return PumpExit::Failed;
                }
            }
        }
    }

    /// Run until the PTY closes or nobody is listening.
    pub async fn run(self) -> PumpExit {
        match tokio::task::spawn_blocking(move || self.pump()).await {
            Ok(exit) => {
                debug!("pty output pump stopped: {:?}", exit);
                exit
            }
            Err(e) => {
                error!("pty output pump panicked: {}", e);
                PumpExit::Failed
            }
        }
    }
}

/// Feeds channel input into the PTY, flushing after every message.
pub struct AsyncPtyWriter<W: Write + Send + 'static> {
    writer: W,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl<W: Write + Send + 'static> AsyncPtyWriter<W> {
    pub fn new(writer: W, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { writer, rx }
    }

    fn pump(mut self) -> PumpExit {
        while let Some(data) = self.rx.blocking_recv() {
            trace!("pty input: {} bytes", data.len());
            if let Err(e) = self
                .writer
                .write_all(&data)
                .and_then(|()| self.writer.flush())
            {
                if is_hangup(&e) {
                    return PumpExit::PtyClosed;
                }
                error!("pty write failed: {}", e);
                return PumpExit::Failed;
            }
        }
        PumpExit::ChannelClosed
    }

    /// Run until every input sender is dropped or the PTY goes away.
    pub async fn run(self) -> PumpExit {
        match tokio::task::spawn_blocking(move || self.pump()).await {
            Ok(exit) => {
                debug!("pty input pump stopped: {:?}", exit);
                exit
            }
            Err(e) => {
                error!("pty input pump panicked: {}", e);
                PumpExit::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct HungUp;

    impl Write for HungUp {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_output_is_chunked_and_complete() {
        let data = b"Hello, World!\nTest line 2\n";
        let (tx, mut rx) = mpsc::channel(32);
        let handle = tokio::spawn(
            AsyncPtyReader::new(Cursor::new(data.to_vec()), tx)
                .with_buffer_size(8)
                .run(),
        );

        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            assert!(chunk.len() <= 8);
            received.extend(chunk);
        }
        assert_eq!(received, data);
        assert_eq!(handle.await.unwrap(), PumpExit::PtyClosed);
    }

    #[tokio::test]
    async fn test_output_stops_when_consumer_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let exit = AsyncPtyReader::new(Cursor::new(b"unread".to_vec()), tx)
            .run()
            .await;
        assert_eq!(exit, PumpExit::ChannelClosed);
    }

    #[tokio::test]
    async fn test_input_written_in_order() {
        let sink = SharedBuf::default();
        let (tx, rx) = mpsc::channel(32);
        tx.send(b"Hello".to_vec()).await.unwrap();
        tx.send(b", World!".to_vec()).await.unwrap();
        drop(tx);

        let exit = AsyncPtyWriter::new(sink.clone(), rx).run().await;
        assert_eq!(exit, PumpExit::ChannelClosed);
        assert_eq!(sink.0.lock().unwrap().as_slice(), b"Hello, World!");
    }

    #[tokio::test]
    async fn test_input_stops_on_hangup() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(b"exit\n".to_vec()).await.unwrap();
        let exit = AsyncPtyWriter::new(HungUp, rx).run().await;
        assert_eq!(exit, PumpExit::PtyClosed);
    }
}

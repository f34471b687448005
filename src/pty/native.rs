//! Native PTY implementation using portable-pty.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portable_pty::{native_pty_system, CommandBuilder, PtySize as NativePtySize};
use tracing::debug;

use super::PtySize;
use crate::error::BridgeError;
use crate::Result;

/// Get the default shell for the current platform.
pub fn default_shell() -> String {
    #[cfg(unix)]
    {
        std::env::var("SHELL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
    #[cfg(windows)]
    {
        "powershell.exe".to_string()
    }
}

fn to_native(size: PtySize) -> NativePtySize {
    let size = size.clamped();
    NativePtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Wrapper around the native PTY system.
pub struct NativePty {
    pty_system: Box<dyn portable_pty::PtySystem + Send>,
}

impl NativePty {
    /// Create a new NativePty instance.
    pub fn new() -> Self {
        Self {
            pty_system: native_pty_system(),
        }
    }

    /// Spawn `cmd` in a new PTY of the given size.
    pub fn spawn(&self, cmd: CommandBuilder, size: PtySize) -> Result<PtyHandle> {
        let pair = self
            .pty_system
            .openpty(to_native(size))
            .map_err(|e| BridgeError::Pty(e.to_string()))?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| BridgeError::Pty(e.to_string()))?;
        // The child holds its own copy of the slave side.
        drop(pair.slave);

        let pid = child.process_id().unwrap_or(0);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| BridgeError::Pty(e.to_string()))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| BridgeError::Pty(e.to_string()))?;

        Ok(PtyHandle {
            reader,
            writer,
            pid,
            control: PtyControl {
                master: Mutex::new(pair.master),
                child: Arc::new(Mutex::new(child)),
            },
        })
    }

    /// Spawn the default interactive shell.
    pub fn spawn_default(&self, size: PtySize) -> Result<PtyHandle> {
        self.spawn(CommandBuilder::new(default_shell()), size)
    }
}

impl Default for NativePty {
    fn default() -> Self {
        Self::new()
    }
}

/// A spawned PTY process.
pub struct PtyHandle {
    /// Reader for the PTY output.
    pub reader: Box<dyn Read + Send>,
    /// Writer for the PTY input.
    pub writer: Box<dyn Write + Send>,
    /// Process ID of the spawned child.
    pub pid: u32,
    /// Resize and lifecycle control.
    pub control: PtyControl,
}

/// Resize/terminate operations on a spawned PTY.
///
/// Holding this keeps the master side open.
pub struct PtyControl {
    master: Mutex<Box<dyn portable_pty::MasterPty + Send>>,
    child: Arc<Mutex<ChildBox>>,
}

type ChildBox = Box<dyn portable_pty::Child + Send + Sync>;

const REAP_INTERVAL: Duration = Duration::from_millis(20);
const REAP_ATTEMPTS: u32 = 250;

impl PtyControl {
    /// Resize the terminal.
    pub fn resize(&self, size: PtySize) -> Result<()> {
        let master = self.master.lock().map_err(|_| BridgeError::LockPoisoned)?;
        master
            .resize(to_native(size))
            .map_err(|e| BridgeError::Pty(e.to_string()))
    }

    /// Kill the child process if it is still running.
    ///
    /// Never blocks on the exit: inside a tokio runtime the child is reaped
    /// on a blocking thread.
    pub fn kill(&self) -> Result<()> {
        {
            let mut child = self.child.lock().map_err(|_| BridgeError::LockPoisoned)?;
            if matches!(child.try_wait(), Ok(Some(_))) {
                return Ok(());
            }
            child.kill().map_err(|e| {
                debug!("PTY kill failed: {}", e);
                BridgeError::Io(e)
            })?;
        }

        let child = Arc::clone(&self.child);
        let reap = move || reap(&child);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => drop(runtime.spawn_blocking(reap)),
            Err(_) => reap(),
        }
        Ok(())
    }

    /// Check whether the child has exited.
    pub fn has_exited(&self) -> bool {
        self.child
            .lock()
            .map(|mut c| matches!(c.try_wait(), Ok(Some(_))))
            .unwrap_or(true)
    }
}

/// Poll until the killed child is collected, releasing the lock between
/// polls so `has_exited` callers are never held up.
fn reap(child: &Mutex<ChildBox>) {
    for _ in 0..REAP_ATTEMPTS {
        match child.lock() {
            Ok(mut child) => {
                if !matches!(child.try_wait(), Ok(None)) {
                    return;
                }
            }
            Err(_) => return,
        }
        std::thread::sleep(REAP_INTERVAL);
    }
    debug!("PTY child still running after kill");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_shell() {
        let shell = default_shell();
        assert!(!shell.is_empty());

        #[cfg(unix)]
        {
            assert!(shell.starts_with('/') || !shell.contains('/'));
        }
    }

    #[test]
    fn test_to_native_clamps() {
        let native = to_native(PtySize::new(0, 0));
        assert_eq!(native.rows, 1);
        assert_eq!(native.cols, 1);
    }

    #[test]
    #[cfg(unix)]
    fn test_spawn_resize_and_kill() {
        let pty = NativePty::new();
        let handle = pty
            .spawn(CommandBuilder::new("/bin/sh"), PtySize::default())
            .expect("spawn /bin/sh");

        assert!(handle.pid > 0, "PID should be positive");
        assert!(handle.control.resize(PtySize::new(30, 100)).is_ok());
        assert!(handle.control.kill().is_ok());
        assert!(handle.control.has_exited());
        // Killing twice is harmless.
        assert!(handle.control.kill().is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_kill_inside_runtime_reaps_in_background() {
        let pty = NativePty::new();
        let handle = pty
            .spawn(CommandBuilder::new("/bin/sh"), PtySize::default())
            .expect("spawn /bin/sh");

        assert!(handle.control.kill().is_ok());
        let reaped = tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.control.has_exited() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(reaped.is_ok());
    }

    #[test]
    fn test_spawn_default() {
        let pty = NativePty::new();
        match pty.spawn_default(PtySize::default()) {
            Ok(handle) => {
                let _ = handle.control.kill();
            }
            Err(e) => panic!("Failed to spawn shell: {}", e),
        }
    }
}

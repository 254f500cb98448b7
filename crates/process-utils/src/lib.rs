//! Small process-related helpers shared across the workspace.
//!
//! Spawning goes through [`tokio_command`] so child processes never pop a
//! console window on Windows. Signalling goes through [`send_signal`], which
//! addresses a child by its platform pid so callers do not need to hold a
//! mutable borrow of the `Child` while it is being awaited.

use std::ffi::OsStr;
use std::io;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Signals a supervisor can deliver to a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the process to shut down cleanly (SIGINT).
    Interrupt,
    /// Terminate the process immediately (SIGKILL).
    Kill,
}

impl Signal {
    #[cfg(unix)]
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// Whether [`Signal::Interrupt`] can be delivered on this platform.
///
/// Callers fall back to killing the child through its handle when this
/// returns `false`.
pub const fn supports_interrupt() -> bool {
    cfg!(unix)
}

/// Deliver `signal` to the process identified by `pid`.
///
/// Returns `ErrorKind::NotFound` if the process is already gone and
/// `ErrorKind::Unsupported` on platforms without POSIX signals.
pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    #[cfg(unix)]
    {
        let raw_pid = libc::pid_t::try_from(pid).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid} out of range"))
        })?;
        if raw_pid <= 0 {
            // 0 and negative values address process groups, never a single child.
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to signal pid {pid}"),
            ));
        }
        let rc = unsafe { libc::kill(raw_pid, signal.as_raw()) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no process with pid {pid}"),
            ));
        }
        Err(err)
    }

    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "signals are not supported on this platform",
        ))
    }
}

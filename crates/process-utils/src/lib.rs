//! Process helpers shared across the workspace.
//!
//! - [`tokio_command`] builds a child command that never pops a console
//!   window on Windows.
//! - [`ExtraPipes`] (unix) attaches additional pipe channels to a child on
//!   fixed descriptor numbers, beyond the standard stdin/stdout/stderr trio.

use std::ffi::OsStr;

#[cfg(all(unix, feature = "tokio"))]
mod pipes;

#[cfg(all(unix, feature = "tokio"))]
pub use pipes::{ChildEnds, ExtraPipes, FIRST_EXTRA_FD, LAST_EXTRA_FD};

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

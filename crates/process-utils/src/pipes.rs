//! Extra pipe channels mapped onto fixed descriptor numbers in a child process.
//!
//! A program such as ffmpeg can read `pipe:4` or write `pipe:3` when those
//! descriptors are open in its process. [`ExtraPipes`] allocates one pipe per
//! channel, hands the parent end back as a tokio pipe handle and installs a
//! `pre_exec` hook that moves each child end onto its target descriptor.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tokio::net::unix::pipe;
use tokio::process::Command;

/// Lowest descriptor number an extra channel may be mapped onto.
pub const FIRST_EXTRA_FD: RawFd = 3;

/// Highest descriptor number an extra channel may be mapped onto.
pub const LAST_EXTRA_FD: RawFd = 9;

// Child ends are parked above the mapping range so the `dup2` calls made in
// the child never clobber a descriptor that is still waiting to be mapped.
const PARKING_FLOOR: RawFd = LAST_EXTRA_FD + 1;

/// A set of pipes to attach to a child process on fixed descriptors.
#[derive(Debug, Default)]
pub struct ExtraPipes {
    mappings: Vec<(OwnedFd, RawFd)>,
}

impl ExtraPipes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a pipe the child reads from on descriptor `target`.
    ///
    /// Returns the parent's write end. Must be called inside a tokio runtime.
    pub fn child_reads(&mut self, target: RawFd) -> io::Result<pipe::Sender> {
        self.check_target(target)?;
        let (read, write) = cloexec_pipe()?;
        let parked = park(read)?;
        let sender = pipe::Sender::from_owned_fd(write)?;
        self.mappings.push((parked, target));
        Ok(sender)
    }

    /// Allocate a pipe the child writes to on descriptor `target`.
    ///
    /// Returns the parent's read end. Must be called inside a tokio runtime.
    pub fn child_writes(&mut self, target: RawFd) -> io::Result<pipe::Receiver> {
        self.check_target(target)?;
        let (read, write) = cloexec_pipe()?;
        let parked = park(write)?;
        let receiver = pipe::Receiver::from_owned_fd(read)?;
        self.mappings.push((parked, target));
        Ok(receiver)
    }

    /// Number of channels allocated so far.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Install the descriptor mapping on `command`.
    ///
    /// The returned [`ChildEnds`] must outlive the `spawn` call and should be
    /// dropped right after it, otherwise the parent keeps the child's ends
    /// open and never observes end-of-stream.
    pub fn attach(self, command: &mut Command) -> ChildEnds {
        let plan: Vec<(RawFd, RawFd)> = self
            .mappings
            .iter()
            .map(|(fd, target)| (fd.as_raw_fd(), *target))
            .collect();

        // SAFETY: the hook runs between fork and exec and only calls `dup2`,
        // which is async-signal-safe. It neither allocates nor takes locks.
        unsafe {
            command.pre_exec(move || {
                for &(source, target) in &plan {
                    if libc::dup2(source, target) == -1 {
                        return Err(io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }

        ChildEnds {
            _fds: self.mappings.into_iter().map(|(fd, _)| fd).collect(),
        }
    }

    fn check_target(&self, target: RawFd) -> io::Result<()> {
        if !(FIRST_EXTRA_FD..=LAST_EXTRA_FD).contains(&target) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "descriptor {target} is outside the extra channel range \
                     {FIRST_EXTRA_FD}..={LAST_EXTRA_FD}"
                ),
            ));
        }
        if self.mappings.iter().any(|(_, mapped)| *mapped == target) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("descriptor {target} is already mapped"),
            ));
        }
        Ok(())
    }
}

/// Child-side pipe ends kept open until the child has been spawned.
#[must_use = "drop the child ends once the child has been spawned"]
#[derive(Debug)]
pub struct ChildEnds {
    _fds: Vec<OwnedFd>,
}

impl ChildEnds {
    /// Close the parent's copies of the child ends.
    pub fn close(self) {}
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
))]
fn cloexec_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` is a valid two-element buffer for `pipe2` to fill.
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: both descriptors were just created and are owned by nobody else.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
fn cloexec_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` is a valid two-element buffer for `pipe` to fill.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: both descriptors were just created and are owned by nobody else.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(&read)?;
    set_cloexec(&write)?;
    Ok((read, write))
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` is a valid open descriptor borrowed from `fd`.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Move `fd` to a descriptor number at or above [`PARKING_FLOOR`].
fn park(fd: OwnedFd) -> io::Result<OwnedFd> {
    // SAFETY: `fd` is a valid open descriptor; the duplicate is owned below.
    let raw = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, PARKING_FLOOR) };
    if raw == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `raw` was just returned by `fcntl` and nothing else owns it.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn child_copies_between_extra_descriptors() {
        let mut pipes = ExtraPipes::new();
        let mut feed = pipes.child_writes(3).unwrap();
        let mut input = pipes.child_reads(4).unwrap();

        let mut cmd = crate::tokio_command("sh");
        cmd.args(["-c", "cat <&4 >&3"]).stdin(Stdio::null());
        let ends = pipes.attach(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        ends.close();

        input.write_all(b"frame=1\n").await.unwrap();
        drop(input);

        let mut received = String::new();
        feed.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "frame=1\n");
        assert!(child.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn rejects_standard_and_duplicate_descriptors() {
        let mut pipes = ExtraPipes::new();
        let err = pipes.child_reads(1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let _sender = pipes.child_reads(4).unwrap();
        let err = pipes.child_writes(4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(pipes.len(), 1);
    }
}

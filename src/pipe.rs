//! The wake channel: a one-byte-per-wake, non-blocking self-pipe.

use crate::error::{Result, WorkerError};
use std::os::unix::io::RawFd;

/// The sentinel byte written to and expected from the wake pipe. Deviation
/// from this value is logged but never fatal: the listener re-arms
/// regardless, since the byte value is a sanity check, not a protocol.
const SENTINEL: u8 = 0x07;

/// A self-pipe used to rouse the scheduler's listener task from any thread.
///
/// Only [`WakePipe::read_end`] is ever registered with a scheduler's
/// fd-readiness facility; the read end is non-blocking so a spurious wakeup
/// (or a wakeup that races a concurrent drain) never stalls the listener.
#[derive(Debug)]
pub struct WakePipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl WakePipe {
    /// Creates a new pipe with the read end set non-blocking.
    pub fn new() -> Result<Self> {
        let mut fds = [0 as RawFd; 2];

        // Safety: `fds` is a valid, appropriately sized buffer for `pipe2` to
        // fill in, and `O_NONBLOCK | O_CLOEXEC` are recognized flags.
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if rc != 0 {
            tracing::error!(errno = std::io::Error::last_os_error().raw_os_error(), "pipe2 failed");
            return Err(WorkerError::Signal);
        }

        Ok(Self {
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    /// The read end, suitable for registration with a scheduler's
    /// fd-readiness primitive. Never readable for any reason other than a
    /// pending wake byte.
    pub fn read_end(&self) -> RawFd {
        self.read_fd
    }

    /// Writes exactly one sentinel byte. Called by submitters and by the
    /// teardown path to rouse the listener.
    pub fn beep(&self) -> Result<()> {
        let byte = [SENTINEL];
        loop {
            // Safety: `write_fd` is a valid, open file descriptor owned by
            // this struct, and `byte` outlives the call.
            let rc = unsafe {
                libc::write(self.write_fd, byte.as_ptr().cast(), byte.len())
            };
            if rc == 1 {
                return Ok(());
            }
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::warn!(%err, "wake pipe write failed");
                return Err(WorkerError::Signal);
            }
            // A short write of a single byte should be impossible; treat it
            // as a broken channel rather than spin.
            tracing::error!(rc, "wake pipe write returned unexpected length");
            return Err(WorkerError::Signal);
        }
    }

    /// Drains exactly one byte from the pipe. Intended to be called only by
    /// the listener task after the scheduler reports the read end readable.
    /// Logs (but does not fail on) unexpected content, per the "byte value
    /// is a sanity check only" design note.
    pub fn drain_one(&self) -> Result<()> {
        let mut buf = [0u8; 1];
        loop {
            // Safety: `read_fd` is a valid, open, non-blocking file
            // descriptor owned by this struct, and `buf` is a live 1-byte
            // buffer for `read` to fill in.
            let rc = unsafe { libc::read(self.read_fd, buf.as_mut_ptr().cast(), buf.len()) };
            if rc == 1 {
                if buf[0] != SENTINEL {
                    tracing::warn!(byte = buf[0], "wake pipe produced unexpected content");
                }
                return Ok(());
            }
            if rc == 0 {
                tracing::error!("wake pipe read end observed EOF");
                return Err(WorkerError::Signal);
            }
            let err = std::io::Error::last_os_error();
            match err.kind() {
                std::io::ErrorKind::Interrupted => continue,
                std::io::ErrorKind::WouldBlock => {
                    // The scheduler reported readiness but the byte was
                    // already drained by a previous wakeup; nothing to do.
                    return Ok(());
                }
                _ => {
                    tracing::warn!(%err, "wake pipe read failed");
                    return Err(WorkerError::Signal);
                }
            }
        }
    }
}

impl Drop for WakePipe {
    fn drop(&mut self) {
        // Safety: both descriptors were created by this struct's
        // constructor and are not shared with anyone who outlives it.
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

// Safety: the two raw descriptors are never dereferenced as pointers and
// the kernel object they name tolerates concurrent read/write from
// different threads; `beep` (write) and `drain_one` (read) are the only
// operations and each is safe to call concurrently with the other.
unsafe impl Send for WakePipe {}
unsafe impl Sync for WakePipe {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beep_then_drain_round_trips() {
        let pipe = WakePipe::new().expect("pipe creation failed");
        pipe.beep().expect("beep failed");
        pipe.drain_one().expect("drain failed");
    }

    #[test]
    fn drain_without_beep_does_not_block() {
        let pipe = WakePipe::new().expect("pipe creation failed");
        // The read end is non-blocking, so this must return promptly with
        // `WouldBlock` folded into `Ok(())`.
        pipe.drain_one().expect("drain failed");
    }

    #[test]
    fn multiple_beeps_drain_one_at_a_time() {
        let pipe = WakePipe::new().expect("pipe creation failed");
        pipe.beep().expect("beep failed");
        pipe.beep().expect("beep failed");
        pipe.drain_one().expect("drain failed");
        pipe.drain_one().expect("drain failed");
    }
}

//! Pipe primitives for worker result channels.
//!
//! Each worker gets its own pipe. Both ends are created close-on-exec; the
//! write end is made inheritable only inside the child that owns it (see
//! `spawn`), so sibling workers never hold each other's channels.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, FdFlag, fcntl};

/// A pipe end that implements Read/Write with EINTR handling.
#[derive(Debug)]
pub struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    /// Create from an owned file descriptor.
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Adopt a descriptor inherited from the parent process.
    ///
    /// The descriptor is checked with `F_GETFD` first so a stale number is
    /// reported as EBADF instead of being silently wrapped.
    pub fn inherited(raw: RawFd) -> io::Result<Self> {
        if raw < 0 {
            return Err(io::Error::from_raw_os_error(Errno::EBADF as i32));
        }
        // Safety: the borrow only lives for the validity probe below.
        let borrowed = unsafe { BorrowedFd::borrow_raw(raw) };
        fcntl(borrowed, FcntlArg::F_GETFD).map_err(io::Error::from)?;
        // Safety: the parent passed this descriptor to us for exclusive use
        // and nothing else in this process refers to it.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(raw) },
        })
    }

    /// Perform exactly one read of at most `max` bytes.
    ///
    /// Returns an empty buffer on EOF. This never loops to fill the buffer:
    /// a worker's record is written with a single `write` well below
    /// `PIPE_BUF`, so it is either wholly present or absent.
    pub fn read_once(&mut self, max: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        let n = self.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl IntoRawFd for PipeFd {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Create a result channel as `(read_end, write_end)`, both close-on-exec.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub fn channel() -> io::Result<(PipeFd, PipeFd)> {
    let (read_fd, write_fd) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)?;
    Ok((PipeFd::new(read_fd), PipeFd::new(write_fd)))
}

/// Create a result channel as `(read_end, write_end)`, both close-on-exec.
///
/// Platforms without `pipe2` set the flag after creation.
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
pub fn channel() -> io::Result<(PipeFd, PipeFd)> {
    let (read_fd, write_fd) = nix::unistd::pipe()?;
    set_cloexec(read_fd.as_fd(), true)?;
    set_cloexec(write_fd.as_fd(), true)?;
    Ok((PipeFd::new(read_fd), PipeFd::new(write_fd)))
}

/// Set or clear `FD_CLOEXEC` on a descriptor.
///
/// Only performs a single `fcntl`, so it is safe to call between fork and
/// exec.
pub fn set_cloexec(fd: BorrowedFd<'_>, enabled: bool) -> io::Result<()> {
    let flags = if enabled {
        FdFlag::FD_CLOEXEC
    } else {
        FdFlag::empty()
    };
    fcntl(fd, FcntlArg::F_SETFD(flags))?;
    Ok(())
}

use std::io;
use std::os::fd::AsFd;
use std::os::fd::BorrowedFd;

use nix::errno::Errno;
use nix::poll::poll;
use nix::poll::PollFd;
use nix::poll::PollFlags;
use nix::poll::PollTimeout;
use nix::sys::eventfd::EfdFlags;
use nix::sys::eventfd::EventFd;

use crate::GpioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Edge,
    Cancelled,
}

/// Extra wakeable handle that is part of every wait set. Once cancelled it
/// stays cancelled: every later [`wait_any`] returns [`Wake::Cancelled`]
/// immediately.
#[derive(Debug)]
pub struct Canceller {
    fd: EventFd,
}

impl Canceller {
    pub fn new() -> Result<Self, GpioError> {
        let fd = EventFd::from_flags(EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)
            .map_err(io::Error::from)?;
        Ok(Self { fd })
    }

    pub fn cancel(&self) -> Result<(), GpioError> {
        match self.fd.write(1) {
            Ok(_) => Ok(()),
            // counter saturated, already signalled
            Err(Errno::EAGAIN) => Ok(()),
            Err(e) => Err(io::Error::from(e).into()),
        }
    }
}

impl AsFd for Canceller {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Block until any of `lines` has a pending edge or `cancel` fires. Each
/// line is polled for its own edge events only. There is no timeout. An
/// interrupted wait is reported as an edge; the caller re-reads the levels
/// and sees nothing changed. A line whose descriptor is hung up or invalid
/// fails the wait.
pub fn wait_any(
    lines: &[(BorrowedFd<'_>, PollFlags)],
    cancel: &Canceller,
) -> Result<Wake, GpioError> {
    let mut fds: Vec<PollFd> = Vec::with_capacity(lines.len() + 1);
    fds.push(PollFd::new(cancel.as_fd(), PollFlags::POLLIN));
    fds.extend(lines.iter().map(|(fd, events)| PollFd::new(*fd, *events)));

    match poll(&mut fds, PollTimeout::NONE) {
        Ok(_) => {}
        Err(Errno::EINTR) => return Ok(Wake::Edge),
        Err(e) => return Err(GpioError::Poll(e)),
    }

    let cancelled = fds[0]
        .revents()
        .map_or(false, |r| r.intersects(PollFlags::POLLIN));
    if cancelled {
        return Ok(Wake::Cancelled);
    }

    for fd in &fds[1..] {
        let revents = fd.revents().unwrap_or(PollFlags::empty());
        if revents.contains(PollFlags::POLLNVAL) {
            return Err(GpioError::Poll(Errno::EBADF));
        }
        if revents.intersects(PollFlags::POLLERR | PollFlags::POLLHUP) {
            return Err(GpioError::Poll(Errno::EIO));
        }
    }
    Ok(Wake::Edge)
}

use std::io;
use std::os::fd::AsRawFd;
use std::os::fd::BorrowedFd;
use std::os::fd::RawFd;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use gpio_cdev::Chip;
use gpio_cdev::EventRequestFlags;
use gpio_cdev::LineEventHandle;
use gpio_cdev::LineRequestFlags;
use log::*;
use nix::errno::Errno;
use nix::fcntl::fcntl;
use nix::fcntl::FcntlArg;
use nix::fcntl::OFlag;
use nix::poll::PollFlags;

use crate::cdev_errno;
use crate::Direction;
use crate::Edge;
use crate::GpioError;
use crate::LineHandle;
use crate::LineProvider;

/// Lines of one GPIO character device (`/dev/gpiochipN`).
///
/// A claim is a kernel line request as an input with both edges armed. The
/// kernel refuses a second request for a line that is held, and drops the
/// request when the handle is closed.
#[derive(Clone)]
pub struct CdevGpio {
    chip: Arc<Mutex<Chip>>,
    consumer: Arc<str>,
}

pub struct CdevLine {
    line: u32,
    events: LineEventHandle,
}

impl CdevGpio {
    /// `consumer` is the label the kernel shows for lines held by us.
    pub fn open(path: impl AsRef<Path>, consumer: &str) -> Result<Self, GpioError> {
        let chip = Chip::new(path)?;
        info!(
            "gpio chip {} ({}) with {} lines",
            chip.name(),
            chip.label(),
            chip.num_lines()
        );
        Ok(Self {
            chip: Arc::new(Mutex::new(chip)),
            consumer: consumer.into(),
        })
    }
}

impl LineProvider for CdevGpio {
    type Handle = CdevLine;

    fn claim(&self, line: u32) -> Result<CdevLine, GpioError> {
        let request = self
            .chip
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_line(line)?;
        let events = request
            .events(
                LineRequestFlags::INPUT,
                EventRequestFlags::BOTH_EDGES,
                &self.consumer,
            )
            .map_err(|e| match cdev_errno(&e) {
                Errno::EBUSY => GpioError::AlreadyClaimed(line),
                _ => e.into(),
            })?;
        // reads drain queued events until EAGAIN
        set_nonblocking(events.as_raw_fd())?;
        debug!("requested line {line} as {}", self.consumer);
        Ok(CdevLine { line, events })
    }

    fn configure(
        &self,
        handle: &CdevLine,
        direction: Direction,
        edge: Edge,
    ) -> Result<(), GpioError> {
        check_request(handle.line, direction, edge)
    }

    fn release(&self, line: u32) -> Result<(), GpioError> {
        // the request went away with the handle
        debug!("released line {line}");
        Ok(())
    }
}

/// Request flags are fixed for the life of a request, and claims are always
/// edge-watched inputs.
fn check_request(line: u32, direction: Direction, edge: Edge) -> Result<(), GpioError> {
    match direction {
        Direction::Out => Err(GpioError::Config {
            line,
            reason: "only input lines report edges",
        }),
        Direction::In if edge != Edge::BOTH => Err(GpioError::Config {
            line,
            reason: "lines are requested with both edges armed",
        }),
        Direction::In => Ok(()),
    }
}

fn set_nonblocking(fd: RawFd) -> Result<(), GpioError> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
    Ok(())
}

impl LineHandle for CdevLine {
    fn line(&self) -> u32 {
        self.line
    }

    fn read(&mut self) -> Result<bool, GpioError> {
        loop {
            match self.events.get_event() {
                Ok(event) => trace!("line {}: {:?}", self.line, event.event_type()),
                Err(e) if cdev_errno(&e) == Errno::EAGAIN => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.events.get_value()? != 0)
    }

    fn edge_fd(&self) -> (BorrowedFd<'_>, PollFlags) {
        // SAFETY: the descriptor is owned by `self.events` and outlives the
        // returned borrow
        let fd = unsafe { BorrowedFd::borrow_raw(self.events.as_raw_fd()) };
        // readable only while events are queued
        (fd, PollFlags::POLLIN)
    }
}

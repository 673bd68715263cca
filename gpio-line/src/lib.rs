//! GPIO input lines that can be read and waited on for edges.
//!
//! A [`LineProvider`] claims, configures and releases lines on the host. The
//! [`LineMonitor`] wraps one claimed line as an input with both edges armed,
//! and [`wait_any`] blocks on several lines at once until one of them reports
//! an edge or a [`Canceller`] fires.

use std::io;
use std::os::fd::BorrowedFd;

use bitflags::bitflags;
use nix::errno::Errno;
use nix::poll::PollFlags;

mod cdev;
mod monitor;
mod wait;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use cdev::CdevGpio;
pub use cdev::CdevLine;
pub use monitor::LineMonitor;
pub use wait::wait_any;
pub use wait::Canceller;
pub use wait::Wake;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

bitflags! {
    /// Edges that wake a waiter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Edge: u8 {
        const RISING = 0b01;
        const FALLING = 0b10;
        const BOTH = Self::RISING.bits() | Self::FALLING.bits();
    }
}

impl Edge {
    pub const NONE: Edge = Edge::empty();
}

/// Host facility that hands out exclusive GPIO lines.
pub trait LineProvider: Clone + Send + 'static {
    type Handle: LineHandle;

    /// Reserve `line` for exclusive use. Fails with
    /// [`GpioError::AlreadyClaimed`] if someone else holds it.
    fn claim(&self, line: u32) -> Result<Self::Handle, GpioError>;

    fn configure(
        &self,
        handle: &Self::Handle,
        direction: Direction,
        edge: Edge,
    ) -> Result<(), GpioError>;

    fn release(&self, line: u32) -> Result<(), GpioError>;
}

/// A claimed line.
pub trait LineHandle: Send + 'static {
    fn line(&self) -> u32;

    /// Current level. Pending edge notifications are consumed, so a later
    /// wait only returns for edges that arrive after this read.
    fn read(&mut self) -> Result<bool, GpioError>;

    /// Descriptor to poll for edges, and the poll events that mean an edge
    /// is pending on it.
    fn edge_fd(&self) -> (BorrowedFd<'_>, PollFlags);
}

#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("line {0} is already claimed")]
    AlreadyClaimed(u32),
    #[error("line {line}: {reason}")]
    Config { line: u32, reason: &'static str },
    #[error("line {line}: short read ({len} bytes)")]
    ShortRead { line: u32, len: usize },
    #[error(transparent)]
    Cdev(#[from] gpio_cdev::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("poll failed: {0}")]
    Poll(Errno),
}

impl GpioError {
    /// Platform error code for this failure.
    pub fn code(&self) -> Errno {
        match self {
            GpioError::AlreadyClaimed(_) => Errno::EBUSY,
            GpioError::Config { .. } => Errno::EINVAL,
            GpioError::ShortRead { .. } => Errno::EIO,
            GpioError::Cdev(e) => cdev_errno(e),
            GpioError::Io(e) => errno_of(e),
            GpioError::Poll(errno) => *errno,
        }
    }
}

fn errno_of(e: &io::Error) -> Errno {
    e.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::EIO)
}

fn cdev_errno(e: &gpio_cdev::Error) -> Errno {
    // gpio-cdev keeps `ErrorKind` private; its `source()` exposes the io
    // error or the (gpio-cdev's own nix) errno cause for the same variants.
    let source = std::error::Error::source(e);
    if let Some(e) = source.and_then(|s| s.downcast_ref::<io::Error>()) {
        errno_of(e)
    } else if let Some(cause) = source.and_then(|s| s.downcast_ref::<cdev_nix::errno::Errno>()) {
        Errno::from_raw(*cause as i32)
    } else {
        Errno::EINVAL
    }
}

impl embedded_hal::digital::Error for GpioError {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}

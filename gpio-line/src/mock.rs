//! In-memory lines for exercising line consumers without hardware.
//!
//! Every claimed line gets an eventfd that becomes readable on an armed edge
//! and is drained by the next successful read, the way a kernel line event
//! queue behaves under `poll(2)`.

use std::collections::HashMap;
use std::collections::HashSet;
use std::io;
use std::os::fd::AsFd;
use std::os::fd::BorrowedFd;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use nix::errno::Errno;
use nix::poll::PollFlags;
use nix::sys::eventfd::EfdFlags;
use nix::sys::eventfd::EventFd;

use crate::Direction;
use crate::Edge;
use crate::GpioError;
use crate::LineHandle;
use crate::LineProvider;

#[derive(Debug, Clone, Default)]
pub struct MockGpio {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    lines: HashMap<u32, LineState>,
    claimed: HashSet<u32>,
    fail_configure: HashSet<u32>,
    fail_release: HashSet<u32>,
}

#[derive(Debug, Default)]
struct LineState {
    level: bool,
    edge: Option<Edge>,
    direction: Option<Direction>,
    read_faults: u32,
    wait_faults: u32,
    releases: usize,
    notify: Option<Arc<EventFd>>,
}

impl LineState {
    fn signal(&self) {
        if let Some(notify) = &self.notify {
            // EAGAIN only when the counter is saturated, still readable
            let _ = notify.write(1);
        }
    }

    fn set_level(&mut self, level: bool) {
        if self.level == level {
            return;
        }
        self.level = level;
        let wanted = if level { Edge::RISING } else { Edge::FALLING };
        if self.edge.map_or(false, |edge| edge.contains(wanted)) {
            self.signal();
        }
    }
}

#[derive(Debug)]
pub struct MockLine {
    line: u32,
    notify: Arc<EventFd>,
    // read end of a pipe with no writer, polls as hung up
    hangup: OwnedFd,
    inner: Arc<Mutex<Inner>>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_level(&self, line: u32, level: bool) {
        self.set_levels(&[(line, level)]);
    }

    /// Change several lines in one step; a reader never sees only part of it.
    pub fn set_levels(&self, levels: &[(u32, bool)]) {
        let mut inner = self.lock();
        for (line, level) in levels {
            inner.lines.entry(*line).or_default().set_level(*level);
        }
    }

    /// Wake waiters on `line` without changing its level.
    pub fn pulse(&self, line: u32) {
        if let Some(state) = self.lock().lines.get(&line) {
            state.signal();
        }
    }

    pub fn level(&self, line: u32) -> bool {
        self.lock().lines.get(&line).map_or(false, |s| s.level)
    }

    /// Make the next `count` reads of `line` come back short.
    pub fn fail_reads(&self, line: u32, count: u32) {
        self.lock().lines.entry(line).or_default().read_faults += count;
    }

    /// Make the next `count` waits that include `line` fail as if its
    /// descriptor had been hung up.
    pub fn fail_waits(&self, line: u32, count: u32) {
        self.lock().lines.entry(line).or_default().wait_faults += count;
    }

    pub fn fail_configure(&self, line: u32) {
        self.lock().fail_configure.insert(line);
    }

    pub fn fail_release(&self, line: u32) {
        self.lock().fail_release.insert(line);
    }

    pub fn is_claimed(&self, line: u32) -> bool {
        self.lock().claimed.contains(&line)
    }

    pub fn releases(&self, line: u32) -> usize {
        self.lock().lines.get(&line).map_or(0, |s| s.releases)
    }

    pub fn edge(&self, line: u32) -> Option<Edge> {
        self.lock().lines.get(&line).and_then(|s| s.edge)
    }

    pub fn direction(&self, line: u32) -> Option<Direction> {
        self.lock().lines.get(&line).and_then(|s| s.direction)
    }
}

impl LineProvider for MockGpio {
    type Handle = MockLine;

    fn claim(&self, line: u32) -> Result<MockLine, GpioError> {
        let mut inner = self.lock();
        if inner.claimed.contains(&line) {
            return Err(GpioError::AlreadyClaimed(line));
        }
        let (hangup, _) = nix::unistd::pipe().map_err(io::Error::from)?;
        let state = inner.lines.entry(line).or_default();
        let notify = match &state.notify {
            Some(notify) => notify.clone(),
            None => {
                let notify = EventFd::from_flags(EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)
                    .map_err(io::Error::from)?;
                let notify = Arc::new(notify);
                state.notify = Some(notify.clone());
                notify
            }
        };
        inner.claimed.insert(line);
        Ok(MockLine {
            line,
            notify,
            hangup,
            inner: self.inner.clone(),
        })
    }

    fn configure(
        &self,
        handle: &MockLine,
        direction: Direction,
        edge: Edge,
    ) -> Result<(), GpioError> {
        let mut inner = self.lock();
        if inner.fail_configure.contains(&handle.line) {
            return Err(GpioError::Config {
                line: handle.line,
                reason: "edge detection not supported",
            });
        }
        let state = inner.lines.entry(handle.line).or_default();
        state.direction = Some(direction);
        state.edge = Some(edge);
        Ok(())
    }

    fn release(&self, line: u32) -> Result<(), GpioError> {
        let mut inner = self.lock();
        if !inner.claimed.remove(&line) {
            return Err(io::Error::from_raw_os_error(Errno::EINVAL as i32).into());
        }
        let fail = inner.fail_release.contains(&line);
        let state = inner.lines.entry(line).or_default();
        state.releases += 1;
        state.edge = None;
        state.direction = None;
        if fail {
            return Err(io::Error::from_raw_os_error(Errno::EIO as i32).into());
        }
        Ok(())
    }
}

impl LineHandle for MockLine {
    fn line(&self) -> u32 {
        self.line
    }

    fn read(&mut self) -> Result<bool, GpioError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let state = inner.lines.entry(self.line).or_default();
        if state.read_faults > 0 {
            state.read_faults -= 1;
            return Err(GpioError::ShortRead {
                line: self.line,
                len: 0,
            });
        }
        match self.notify.read() {
            Ok(_) | Err(Errno::EAGAIN) => Ok(state.level),
            Err(e) => Err(io::Error::from(e).into()),
        }
    }

    fn edge_fd(&self) -> (BorrowedFd<'_>, PollFlags) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let state = inner.lines.entry(self.line).or_default();
        if state.wait_faults > 0 {
            state.wait_faults -= 1;
            return (self.hangup.as_fd(), PollFlags::POLLIN);
        }
        (self.notify.as_fd(), PollFlags::POLLIN)
    }
}

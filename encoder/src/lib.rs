//! Quadrature encoder decoding on two GPIO lines.
//!
//! [`Encoder::start`] claims phase A and phase B, then runs a background
//! thread that sleeps until either line has an edge, decodes the transition
//! and adds it to a shared position. Readers call [`Encoder::sample`] or a
//! cloned [`Sampler`] from any thread.

use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use gpio_line::Canceller;
use gpio_line::GpioError;
use gpio_line::LineMonitor;
use gpio_line::LineProvider;
use gpio_line::Wake;
use log::*;
use nix::errno::Errno;

mod decode;
mod shared;

pub use decode::decode;
pub use decode::Levels;
pub use shared::Sampler;

use shared::Shared;

#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub line_a: u32,
    pub line_b: u32,
    /// report the position negated, for encoders wired the other way round
    pub invert: bool,
    /// pause after a failed wait so a broken line can't spin the thread
    pub error_backoff: Duration,
}

impl Config {
    pub const fn new(line_a: u32, line_b: u32) -> Self {
        Self {
            line_a,
            line_b,
            invert: false,
            error_backoff: Duration::from_millis(10),
        }
    }
}

pub struct Encoder<P: LineProvider> {
    config: Config,
    shared: Arc<Shared>,
    cancel: Arc<Canceller>,
    thread: Option<JoinHandle<Lines<P>>>,
}

struct Lines<P: LineProvider> {
    a: LineMonitor<P>,
    b: LineMonitor<P>,
}

impl<P: LineProvider> Encoder<P> {
    pub fn start(provider: &P, line_a: u32, line_b: u32) -> Result<Self, ConstructionError> {
        Self::start_with_config(provider, Config::new(line_a, line_b))
    }

    /// Claim both lines and start acquiring. Whatever was claimed before a
    /// failing step is released again before the error is returned.
    pub fn start_with_config(provider: &P, config: Config) -> Result<Self, ConstructionError> {
        let (line_a, line_b) = (config.line_a, config.line_b);
        if line_a == line_b {
            return Err(ConstructionError::SameLine(line_a));
        }

        let mut a = LineMonitor::new(provider, line_a).map_err(ConstructionError::Line)?;
        let mut b = LineMonitor::new(provider, line_b).map_err(ConstructionError::Line)?;
        let levels = Levels::new(
            a.current_level().map_err(ConstructionError::Line)?,
            b.current_level().map_err(ConstructionError::Line)?,
        );

        let cancel = Arc::new(Canceller::new().map_err(ConstructionError::Canceller)?);
        let shared = Arc::new(Shared::default());

        let thread = {
            let cancel = cancel.clone();
            let shared = shared.clone();
            let backoff = config.error_backoff;
            thread::Builder::new()
                .name(format!("encoder-{line_a}-{line_b}"))
                .spawn(move || acquire(Lines { a, b }, levels, &shared, &cancel, backoff))
                .map_err(ConstructionError::Spawn)?
        };

        info!(
            "encoder on lines {line_a}/{line_b} started: a={} b={}",
            levels.a, levels.b
        );
        Ok(Self {
            config,
            shared,
            cancel,
            thread: Some(thread),
        })
    }

    pub fn sample(&self) -> Result<i64, AcquisitionError> {
        self.sampler().sample()
    }

    pub fn latency(&self) -> Duration {
        self.shared.latency()
    }

    pub fn sampler(&self) -> Sampler {
        Sampler::new(self.shared.clone(), self.config.invert)
    }

    /// Interrupt the acquisition thread, wait for it to exit and release both
    /// lines.
    pub fn stop(mut self) -> Result<(), TeardownError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), TeardownError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let (line_a, line_b) = (self.config.line_a, self.config.line_b);

        // if this fails the thread can't be woken; it is detached and keeps
        // its lines until the process exits
        self.cancel.cancel().map_err(TeardownError::Cancel)?;
        let lines = thread.join().map_err(|_| TeardownError::Join)?;

        let released_a = lines.a.release();
        let released_b = lines.b.release();
        released_a.and(released_b).map_err(TeardownError::Release)?;

        info!("encoder on lines {line_a}/{line_b} stopped");
        Ok(())
    }
}

impl<P: LineProvider> Drop for Encoder<P> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(
                "encoder on lines {}/{}: {e}",
                self.config.line_a, self.config.line_b
            );
        }
    }
}

/// Runs until cancelled. Failures are recorded for the next reader and never
/// end the loop.
fn acquire<P: LineProvider>(
    mut lines: Lines<P>,
    mut levels: Levels,
    shared: &Shared,
    cancel: &Canceller,
    backoff: Duration,
) -> Lines<P> {
    let name = format!("{}/{}", lines.a.line(), lines.b.line());
    loop {
        match lines.a.wait_for_change(&lines.b, cancel) {
            Ok(Wake::Cancelled) => break,
            Ok(Wake::Edge) => {}
            Err(e) => {
                fail(&name, shared, Fault::Wait(e.code()));
                thread::sleep(backoff);
                continue;
            }
        }

        let start = Instant::now();
        let new = match read_levels(&mut lines) {
            Ok(new) => new,
            Err(e) => {
                fail(&name, shared, Fault::Read(e.code()));
                continue;
            }
        };

        match decode(levels, new) {
            Ok(None) => debug!("{name}: spurious wake"),
            Ok(Some(delta)) => {
                shared.apply(delta, || start.elapsed());
                trace!("{name}: delta={delta}");
            }
            Err(fault) => fail(&name, shared, fault),
        }
        levels = new;
    }
    lines
}

fn read_levels<P: LineProvider>(lines: &mut Lines<P>) -> Result<Levels, GpioError> {
    Ok(Levels::new(
        lines.a.current_level()?,
        lines.b.current_level()?,
    ))
}

fn fail(name: &str, shared: &Shared, fault: Fault) {
    warn!("{name}: {fault}");
    shared.record(fault);
}

/// A failed acquisition cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("reading a line failed: {0}")]
    Read(Errno),
    #[error("waiting for an edge failed: {0}")]
    Wait(Errno),
    #[error("both channels changed between samples")]
    InvalidTransition,
}

impl Fault {
    pub fn code(&self) -> Errno {
        match self {
            Fault::Read(errno) | Fault::Wait(errno) => *errno,
            Fault::InvalidTransition => Errno::EIO,
        }
    }
}

/// Cycles were lost since the previous sample; the position is withheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{count} acquisition cycle(s) lost, last: {last}")]
pub struct AcquisitionError {
    pub count: u32,
    pub last: Fault,
}

#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    #[error("phase A and phase B are both line {0}")]
    SameLine(u32),
    #[error("line setup failed: {0}")]
    Line(#[source] GpioError),
    #[error("failed to create the cancellation handle: {0}")]
    Canceller(#[source] GpioError),
    #[error("failed to spawn the acquisition thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TeardownError {
    #[error("failed to cancel the acquisition thread: {0}")]
    Cancel(#[source] GpioError),
    #[error("the acquisition thread panicked")]
    Join,
    #[error("failed to release a line: {0}")]
    Release(#[source] GpioError),
}

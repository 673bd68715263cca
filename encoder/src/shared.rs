use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use crate::AcquisitionError;
use crate::Fault;

/// State handed from the acquisition thread to readers. Only ever touched
/// under the one lock.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    position: i64,
    pending: Option<Pending>,
    latency: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    count: u32,
    last: Fault,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // plain counters, consistent even if a holder panicked
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn apply(&self, delta: i64, latency: impl FnOnce() -> Duration) {
        let mut state = self.lock();
        state.position += delta;
        state.latency = latency();
    }

    pub(crate) fn record(&self, fault: Fault) {
        let mut state = self.lock();
        match state.pending.as_mut() {
            Some(pending) => {
                pending.count = pending.count.saturating_add(1);
                pending.last = fault;
            }
            None => {
                state.pending = Some(Pending {
                    count: 1,
                    last: fault,
                })
            }
        }
    }

    pub(crate) fn sample(&self) -> Result<i64, AcquisitionError> {
        let mut state = self.lock();
        match state.pending.take() {
            Some(Pending { count, last }) => Err(AcquisitionError { count, last }),
            None => Ok(state.position),
        }
    }

    pub(crate) fn latency(&self) -> Duration {
        self.lock().latency
    }
}

/// Read side of an [`Encoder`](crate::Encoder), for any number of consumer
/// threads. Clones share the same state.
#[derive(Debug, Clone)]
pub struct Sampler {
    shared: Arc<Shared>,
    invert: bool,
}

impl Sampler {
    pub(crate) fn new(shared: Arc<Shared>, invert: bool) -> Self {
        Self { shared, invert }
    }

    /// Current position, or the cycles lost since the previous call.
    ///
    /// A pending error is reported exactly once; the next call returns the
    /// position again.
    pub fn sample(&self) -> Result<i64, AcquisitionError> {
        let position = self.shared.sample()?;
        Ok(if self.invert { -position } else { position })
    }

    /// Time spent on the most recent decode and update.
    pub fn latency(&self) -> Duration {
        self.shared.latency()
    }
}

#[cfg(test)]
mod tests {
    use nix::errno::Errno;

    use super::*;

    #[test]
    fn sample_returns_the_running_total() {
        let shared = Shared::default();
        shared.apply(1, Duration::default);
        shared.apply(1, Duration::default);
        shared.apply(-1, || Duration::from_micros(7));
        assert_eq!(shared.sample(), Ok(1));
        assert_eq!(shared.sample(), Ok(1));
        assert_eq!(shared.latency(), Duration::from_micros(7));
    }

    #[test]
    fn pending_faults_are_reported_once() {
        let shared = Shared::default();
        shared.apply(3, Duration::default);
        shared.record(Fault::InvalidTransition);
        shared.record(Fault::Read(Errno::EIO));
        shared.record(Fault::Wait(Errno::EBADF));

        assert_eq!(
            shared.sample(),
            Err(AcquisitionError {
                count: 3,
                last: Fault::Wait(Errno::EBADF),
            })
        );
        assert_eq!(shared.sample(), Ok(3));
    }

    #[test]
    fn faults_leave_the_position_alone() {
        let shared = Shared::default();
        shared.apply(-2, Duration::default);
        shared.record(Fault::InvalidTransition);
        assert!(shared.sample().is_err());
        assert_eq!(shared.sample(), Ok(-2));
    }

    #[test]
    fn inverted_sampler_negates() {
        let shared = Arc::new(Shared::default());
        shared.apply(5, Duration::default);
        let sampler = Sampler::new(shared.clone(), true);
        assert_eq!(sampler.sample(), Ok(-5));
        assert_eq!(Sampler::new(shared, false).sample(), Ok(5));
    }
}

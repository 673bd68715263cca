use log::*;

use crate::wait_any;
use crate::Canceller;
use crate::Direction;
use crate::Edge;
use crate::GpioError;
use crate::LineHandle;
use crate::LineProvider;
use crate::Wake;

/// One claimed input line with rising and falling edges armed.
///
/// The line is released again when the monitor is dropped, or explicitly
/// with [`LineMonitor::release`] when the caller cares about the outcome.
pub struct LineMonitor<P: LineProvider> {
    // declared first so the handle is closed before the line is released
    handle: P::Handle,
    claim: Claim<P>,
}

struct Claim<P: LineProvider> {
    provider: P,
    line: u32,
    held: bool,
}

impl<P: LineProvider> LineMonitor<P> {
    pub fn new(provider: &P, line: u32) -> Result<Self, GpioError> {
        let handle = provider.claim(line)?;
        let monitor = LineMonitor {
            handle,
            claim: Claim {
                provider: provider.clone(),
                line,
                held: true,
            },
        };
        // on failure the monitor is dropped here, which releases the claim
        provider.configure(&monitor.handle, Direction::In, Edge::BOTH)?;
        debug!("monitoring line {line}");
        Ok(monitor)
    }

    pub fn line(&self) -> u32 {
        self.claim.line
    }

    /// Read the level. Edges reported before the read are consumed.
    pub fn current_level(&mut self) -> Result<bool, GpioError> {
        self.handle.read()
    }

    /// Block until this line or `other` reports an edge, or `cancel` fires.
    pub fn wait_for_change(&self, other: &Self, cancel: &Canceller) -> Result<Wake, GpioError> {
        wait_any(&[self.handle.edge_fd(), other.handle.edge_fd()], cancel)
    }

    pub fn release(self) -> Result<(), GpioError> {
        let LineMonitor { handle, claim } = self;
        drop(handle);
        claim.release()
    }
}

impl<P: LineProvider> Claim<P> {
    fn release(mut self) -> Result<(), GpioError> {
        self.held = false;
        self.provider.release(self.line)
    }
}

impl<P: LineProvider> Drop for Claim<P> {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = self.provider.release(self.line) {
                warn!("failed to release line {}: {e}", self.line);
            }
        }
    }
}

impl<P: LineProvider> embedded_hal::digital::ErrorType for LineMonitor<P> {
    type Error = GpioError;
}

impl<P: LineProvider> embedded_hal::digital::InputPin for LineMonitor<P> {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.current_level()
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.current_level()?)
    }
}

#[cfg(test)]
mod tests {
    use embedded_hal::digital::InputPin;

    use super::*;
    use crate::mock::MockGpio;

    #[test]
    fn new_claims_and_arms_both_edges() {
        let gpio = MockGpio::new();
        let monitor = LineMonitor::new(&gpio, 3).unwrap();
        assert!(gpio.is_claimed(3));
        assert_eq!(gpio.edge(3), Some(Edge::BOTH));
        assert_eq!(gpio.direction(3), Some(Direction::In));
        assert_eq!(monitor.line(), 3);

        drop(monitor);
        assert!(!gpio.is_claimed(3));
    }

    #[test]
    fn failed_configure_releases_the_line() {
        let gpio = MockGpio::new();
        gpio.fail_configure(3);
        assert!(LineMonitor::new(&gpio, 3).is_err());
        assert!(!gpio.is_claimed(3));
    }

    #[test]
    fn explicit_release_reports_and_does_not_release_twice() {
        let gpio = MockGpio::new();
        let monitor = LineMonitor::new(&gpio, 4).unwrap();
        monitor.release().unwrap();
        assert!(!gpio.is_claimed(4));
        assert_eq!(gpio.releases(4), 1);
    }

    #[test]
    fn reads_levels_through_embedded_hal() {
        let gpio = MockGpio::new();
        let mut monitor = LineMonitor::new(&gpio, 1).unwrap();
        assert!(monitor.is_low().unwrap());
        gpio.set_level(1, true);
        assert!(monitor.is_high().unwrap());
    }

    #[test]
    fn wakes_on_either_line() {
        let gpio = MockGpio::new();
        let cancel = Canceller::new().unwrap();
        let a = LineMonitor::new(&gpio, 1).unwrap();
        let mut b = LineMonitor::new(&gpio, 2).unwrap();

        gpio.set_level(2, true);
        assert_eq!(a.wait_for_change(&b, &cancel).unwrap(), Wake::Edge);
        assert!(b.current_level().unwrap());

        cancel.cancel().unwrap();
        assert_eq!(a.wait_for_change(&b, &cancel).unwrap(), Wake::Cancelled);
    }

    #[test]
    fn failed_wait_is_reported() {
        let gpio = MockGpio::new();
        let cancel = Canceller::new().unwrap();
        let a = LineMonitor::new(&gpio, 1).unwrap();
        let b = LineMonitor::new(&gpio, 2).unwrap();

        gpio.fail_waits(1, 1);
        match a.wait_for_change(&b, &cancel) {
            Err(GpioError::Poll(errno)) => assert_eq!(errno, nix::errno::Errno::EIO),
            other => panic!("unexpected {other:?}"),
        }

        gpio.set_level(1, true);
        assert_eq!(a.wait_for_change(&b, &cancel).unwrap(), Wake::Edge);
    }
}

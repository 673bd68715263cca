use crate::Fault;

/// Levels of the two phase lines at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Levels {
    pub a: bool,
    pub b: bool,
}

impl Levels {
    pub const fn new(a: bool, b: bool) -> Self {
        Self { a, b }
    }
}

/// Position change between two consecutive samples.
///
/// `Ok(None)` when nothing changed, `Ok(Some(±1))` for a quarter-cycle
/// transition on one channel. The sign depends on which channel moved, its
/// new level, and the level the other channel held. Both channels moving at
/// once cannot come from a working quadrature source.
pub fn decode(old: Levels, new: Levels) -> Result<Option<i64>, Fault> {
    let old_a = old.a as i64;
    let old_b = old.b as i64;
    let delta = match (old.a != new.a, old.b != new.b) {
        (false, false) => return Ok(None),
        (true, true) => return Err(Fault::InvalidTransition),
        (true, false) if new.a => 2 * old_b - 1,
        (true, false) => -2 * old_b + 1,
        (false, true) if new.b => -2 * old_a + 1,
        (false, true) => 2 * old_a - 1,
    };
    Ok(Some(delta))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const L00: Levels = Levels::new(false, false);
    const L01: Levels = Levels::new(false, true);
    const L10: Levels = Levels::new(true, false);
    const L11: Levels = Levels::new(true, true);

    // position of (a, b) along the cycle 00 -> 01 -> 11 -> 10 that counts up
    fn phase(levels: Levels) -> i64 {
        match (levels.a, levels.b) {
            (false, false) => 0,
            (false, true) => 1,
            (true, true) => 2,
            (true, false) => 3,
        }
    }

    fn oracle(old: Levels, new: Levels) -> i64 {
        match (phase(new) - phase(old)).rem_euclid(4) {
            0 => 0,
            1 => 1,
            3 => -1,
            _ => unreachable!("not a single-channel step"),
        }
    }

    fn toggle(levels: Levels, channel_a: bool) -> Levels {
        if channel_a {
            Levels::new(!levels.a, levels.b)
        } else {
            Levels::new(levels.a, !levels.b)
        }
    }

    #[test]
    fn canonical_table() {
        // A rises / falls with B held
        assert_eq!(decode(L00, L10), Ok(Some(-1)));
        assert_eq!(decode(L01, L11), Ok(Some(1)));
        assert_eq!(decode(L10, L00), Ok(Some(1)));
        assert_eq!(decode(L11, L01), Ok(Some(-1)));
        // B rises / falls with A held
        assert_eq!(decode(L00, L01), Ok(Some(1)));
        assert_eq!(decode(L10, L11), Ok(Some(-1)));
        assert_eq!(decode(L01, L00), Ok(Some(-1)));
        assert_eq!(decode(L11, L10), Ok(Some(1)));
    }

    #[test]
    fn unchanged_levels_are_not_a_step() {
        for levels in [L00, L01, L10, L11] {
            assert_eq!(decode(levels, levels), Ok(None));
        }
    }

    #[test]
    fn both_channels_changing_is_invalid() {
        for (old, new) in [(L00, L11), (L11, L00), (L01, L10), (L10, L01)] {
            assert_eq!(decode(old, new), Err(Fault::InvalidTransition));
        }
    }

    #[test]
    fn full_cycles() {
        let b_leads = [L00, L01, L11, L10, L00];
        let a_leads = [L00, L10, L11, L01, L00];
        let sum = |cycle: &[Levels]| -> i64 {
            cycle
                .windows(2)
                .map(|w| decode(w[0], w[1]).unwrap().unwrap())
                .sum()
        };
        assert_eq!(sum(&b_leads), 4);
        assert_eq!(sum(&a_leads), -4);
    }

    proptest! {
        #[test]
        fn walk_matches_gray_cycle(
            start_a in any::<bool>(),
            start_b in any::<bool>(),
            steps in prop::collection::vec(any::<bool>(), 0..200),
        ) {
            let mut levels = Levels::new(start_a, start_b);
            let mut position = 0i64;
            let mut expected = 0i64;
            for channel_a in steps {
                let next = toggle(levels, channel_a);
                position += decode(levels, next).unwrap().unwrap();
                expected += oracle(levels, next);
                levels = next;
            }
            prop_assert_eq!(position, expected);
        }

        #[test]
        fn undoing_a_step_cancels_it(
            a in any::<bool>(),
            b in any::<bool>(),
            channel_a in any::<bool>(),
        ) {
            let old = Levels::new(a, b);
            let new = toggle(old, channel_a);
            let forward = decode(old, new).unwrap().unwrap();
            let back = decode(new, old).unwrap().unwrap();
            prop_assert_eq!(forward.abs(), 1);
            prop_assert_eq!(forward, -back);
        }
    }
}

//! Saturating demand arithmetic on an atomic counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Demand value meaning "deliver without limit". Once reached it is sticky.
///
/// Matches the largest count a subscriber can pass to `request`, so a single
/// `request(i64::MAX)` switches the subscription to unbounded delivery.
pub const UNBOUNDED: u64 = i64::MAX as u64;

/// Add `n` to `requested`, capping at [`UNBOUNDED`]. Returns the previous value.
pub fn add(requested: &AtomicU64, n: u64) -> u64 {
    let mut current = requested.load(Ordering::Acquire);
    loop {
        if current == UNBOUNDED {
            return UNBOUNDED;
        }
        let next = current.saturating_add(n).min(UNBOUNDED);
        match requested.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(prev) => return prev,
            Err(actual) => current = actual,
        }
    }
}

/// Subtract `emitted` from `requested`, flooring at zero. [`UNBOUNDED`] is left
/// untouched. Returns the value after the update.
pub fn produced(requested: &AtomicU64, emitted: u64) -> u64 {
    let mut current = requested.load(Ordering::Acquire);
    loop {
        if current == 0 || current == UNBOUNDED {
            return current;
        }
        let next = current.saturating_sub(emitted);
        match requested.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => return next,
            Err(actual) => current = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_accumulates_and_returns_previous() {
        let requested = AtomicU64::new(0);
        assert_eq!(add(&requested, 3), 0);
        assert_eq!(add(&requested, 4), 3);
        assert_eq!(requested.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn add_saturates_at_unbounded() {
        let requested = AtomicU64::new(UNBOUNDED - 1);
        add(&requested, 10);
        assert_eq!(requested.load(Ordering::Relaxed), UNBOUNDED);
        // sticky
        produced(&requested, 5);
        assert_eq!(requested.load(Ordering::Relaxed), UNBOUNDED);
    }

    #[test]
    fn produced_floors_at_zero() {
        let requested = AtomicU64::new(2);
        assert_eq!(produced(&requested, 5), 0);
        assert_eq!(produced(&requested, 1), 0);
    }

    #[test]
    fn concurrent_adds_are_not_lost() {
        let requested = std::sync::Arc::new(AtomicU64::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let requested = requested.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        add(&requested, 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(requested.load(Ordering::Relaxed), 8000);
    }
}

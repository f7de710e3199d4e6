//! Global instrumentation level.
//!
//! A process-wide monotonic epoch counter. Raising it (done once per
//! activation of a global observation mode) forces every frame to re-run
//! its verification routine before the next specialized execution. The fast
//! path is a single relaxed-ish atomic load; a slightly stale read only
//! means a frame re-verifies a moment later, which is safe because
//! verification is idempotent.

use std::sync::atomic::{AtomicU32, Ordering};

/// Per-frame "verified at level N" stamp. Starts at 0, so every frame is
/// verified once before its first specialized run.
#[derive(Debug, Default)]
pub struct FrameStamp(AtomicU32);

impl FrameStamp {
    /// A fresh, unverified stamp.
    pub fn new() -> Self {
        FrameStamp(AtomicU32::new(0))
    }

    /// Level the frame was last verified at.
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, level: u32) {
        self.0.store(level, Ordering::Release);
    }
}

/// Process-wide instrumentation level controller.
pub struct Instrumentation {
    level: AtomicU32,
}

impl Instrumentation {
    /// Level starts at 1 so that every frame is verified before its first
    /// execution.
    pub fn new() -> Self {
        Instrumentation {
            level: AtomicU32::new(1),
        }
    }

    /// Current global level.
    #[inline]
    pub fn current(&self) -> u32 {
        self.level.load(Ordering::Acquire)
    }

    /// Raise the level by exactly one. Called once per activation of a mode
    /// that changes entry-time obligations; never called on deactivation.
    /// Returns the new level.
    pub fn raise(&self) -> u32 {
        self.level.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Fast entry check: does `stamp` need verification right now?
    #[inline]
    pub fn needs_verification(&self, stamp: &FrameStamp) -> bool {
        stamp.get() < self.current()
    }

    /// Bring `stamp` up to the current level, running `verify` as many
    /// times as needed.
    ///
    /// `raise` can race with a verification in progress on another thread,
    /// so this is a loop, not a single test: the stamp is set to the level
    /// observed *before* the verification ran, and the global level is
    /// re-read afterwards. Terminates only when the stamp is not below the
    /// most recently observed level. Returns that level.
    pub fn ensure_verified<F>(&self, stamp: &FrameStamp, mut verify: F) -> u32
    where
        F: FnMut(u32),
    {
        let mut observed = self.current();
        while stamp.get() < observed {
            verify(observed);
            stamp.set(observed);
            observed = self.current();
        }
        observed
    }
}

impl Default for Instrumentation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_level_starts_at_one() {
        let instr = Instrumentation::new();
        assert_eq!(instr.current(), 1);
        // A fresh frame is stale by construction.
        assert!(instr.needs_verification(&FrameStamp::new()));
    }

    #[test]
    fn test_raise_n_times_yields_one_plus_n() {
        let instr = Instrumentation::new();
        for _ in 0..5 {
            instr.raise();
        }
        assert_eq!(instr.current(), 6);
    }

    #[test]
    fn test_verification_runs_exactly_once_when_stale() {
        let instr = Instrumentation::new();
        let stamp = FrameStamp::new();

        let mut runs = 0;
        instr.ensure_verified(&stamp, |_| runs += 1);
        assert_eq!(runs, 1);
        assert_eq!(stamp.get(), 1);

        // No raise since: no spurious re-verification.
        instr.ensure_verified(&stamp, |_| runs += 1);
        assert_eq!(runs, 1);
    }

    #[test]
    fn test_raise_then_single_reverification() {
        let instr = Instrumentation::new();
        let stamp = FrameStamp::new();
        instr.ensure_verified(&stamp, |_| {});
        assert_eq!(stamp.get(), 1);

        instr.raise();
        let mut runs = 0;
        let level = instr.ensure_verified(&stamp, |_| runs += 1);
        assert_eq!(runs, 1);
        assert_eq!(level, 2);
        assert_eq!(stamp.get(), 2);
    }

    #[test]
    fn test_raise_during_verification_forces_another_pass() {
        let instr = Arc::new(Instrumentation::new());
        let stamp = FrameStamp::new();

        let mut runs = 0;
        let raced = instr.clone();
        instr.ensure_verified(&stamp, |observed| {
            runs += 1;
            if observed == 1 {
                // Another thread enables a mode mid-verification.
                raced.raise();
            }
        });
        assert_eq!(runs, 2);
        assert_eq!(stamp.get(), 2);
    }

    #[test]
    fn test_concurrent_raise_and_verify() {
        let instr = Arc::new(Instrumentation::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let instr = instr.clone();
            handles.push(std::thread::spawn(move || {
                let stamp = FrameStamp::new();
                for _ in 0..100 {
                    instr.ensure_verified(&stamp, |_| {});
                    assert!(stamp.get() <= instr.current());
                }
            }));
        }
        for _ in 0..10 {
            instr.raise();
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(instr.current(), 11);
    }
}

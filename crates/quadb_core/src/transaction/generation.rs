//! Generation reference counting.

use crate::types::Generation;
use std::collections::BTreeMap;

/// Tracks the current generation and how many transactions read each one.
///
/// A generation is *released* when it is older than the current one and no
/// transaction reads it any more. Every method that can release one returns
/// it so the caller can notify components outside its lock.
#[derive(Debug, Default)]
pub(crate) struct GenerationTracker {
    current: Generation,
    refcounts: BTreeMap<Generation, usize>,
}

impl GenerationTracker {
    pub(crate) fn current(&self) -> Generation {
        self.current
    }

    /// Sets the baseline after recovery.
    pub(crate) fn set_current(&mut self, generation: Generation) {
        self.current = generation;
    }

    /// Pins the current generation for a new transaction.
    pub(crate) fn acquire(&mut self) -> Generation {
        let generation = self.current;
        *self.refcounts.entry(generation).or_insert(0) += 1;
        generation
    }

    /// Unpins `generation`.
    pub(crate) fn release(&mut self, generation: Generation) -> Option<Generation> {
        let count = self.refcounts.get_mut(&generation)?;
        *count -= 1;
        if *count > 0 {
            return None;
        }
        self.refcounts.remove(&generation);
        (generation < self.current).then_some(generation)
    }

    /// Moves a pin from `from` to the current generation.
    pub(crate) fn repin(&mut self, from: Generation) -> (Generation, Option<Generation>) {
        let released = self.release(from);
        (self.acquire(), released)
    }

    /// Publishes the next generation.
    ///
    /// Returns the new generation and the previous one if nobody reads it.
    pub(crate) fn advance(&mut self) -> (Generation, Option<Generation>) {
        let previous = self.current;
        self.current = previous.next();
        let released = (!self.refcounts.contains_key(&previous)).then_some(previous);
        (self.current, released)
    }

    pub(crate) fn refcount(&self, generation: Generation) -> usize {
        self.refcounts.get(&generation).copied().unwrap_or(0)
    }

    pub(crate) fn oldest_active(&self) -> Option<Generation> {
        self.refcounts.keys().next().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pins_and_releases() {
        let mut tracker = GenerationTracker::default();
        let g0 = tracker.acquire();
        tracker.acquire();
        assert_eq!(tracker.refcount(g0), 2);
        assert_eq!(tracker.oldest_active(), Some(g0));

        // Current generation is never reported as released.
        assert_eq!(tracker.release(g0), None);
        assert_eq!(tracker.release(g0), None);
        assert_eq!(tracker.refcount(g0), 0);
        assert_eq!(tracker.oldest_active(), None);
    }

    #[test]
    fn superseded_generation_released_by_last_reader() {
        let mut tracker = GenerationTracker::default();
        let g0 = tracker.acquire();

        let (g1, released) = tracker.advance();
        assert_eq!(g1, Generation::new(1));
        assert_eq!(released, None);

        assert_eq!(tracker.release(g0), Some(g0));
    }

    #[test]
    fn unreferenced_generation_released_by_advance() {
        let mut tracker = GenerationTracker::default();
        let (_, released) = tracker.advance();
        assert_eq!(released, Some(Generation::new(0)));
    }

    #[test]
    fn repin_moves_to_current() {
        let mut tracker = GenerationTracker::default();
        let g0 = tracker.acquire();
        tracker.advance();
        let (now, released) = tracker.repin(g0);
        assert_eq!(now, Generation::new(1));
        assert_eq!(released, Some(g0));
        assert_eq!(tracker.refcount(now), 1);
    }

    #[test]
    fn release_of_unknown_generation_is_ignored() {
        let mut tracker = GenerationTracker::default();
        assert_eq!(tracker.release(Generation::new(7)), None);
    }
}

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::tags::{ScoreTag, WeightTable};

const IDLE: u8 = 0;
const INITIALIZING: u8 = 1;
const ACTIVE: u8 = 2;
const FROZEN: u8 = 3;

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    counts: [u64; ScoreTag::COUNT],
}

impl Default for CounterSnapshot {
    fn default() -> Self {
        Self {
            counts: [0; ScoreTag::COUNT],
        }
    }
}

impl CounterSnapshot {
    #[inline]
    pub fn get(&self, tag: ScoreTag) -> u64 {
        self.counts[tag.index()]
    }

    /// Tags with a non-zero count, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (ScoreTag, u64)> + '_ {
        ScoreTag::all()
            .map(|tag| (tag, self.get(tag)))
            .filter(|(_, v)| *v > 0)
    }

    /// Weighted sum over revenue tags.
    ///
    /// Tags are folded in declaration order over final counts, so the result
    /// only depends on the count vector.
    pub fn profit(&self, weights: &WeightTable) -> u64 {
        ScoreTag::all()
            .filter(|tag| tag.is_revenue())
            .fold(0u64, |acc, tag| {
                acc.saturating_add(weights.weight(tag).saturating_mul(self.get(tag)))
            })
    }

    pub fn delta_since(&self, prev: &CounterSnapshot, tag: ScoreTag) -> u64 {
        self.get(tag).saturating_sub(prev.get(tag))
    }
}

/// Tagged event counters for one phase of a run.
///
/// Each tag owns its own atomic, so workers bumping different tags never
/// contend on a shared lock. `done` waits for in-flight increments to drain
/// before it takes the frozen snapshot.
#[derive(Debug)]
pub struct CounterRegistry {
    counts: [AtomicU64; ScoreTag::COUNT],
    weights: WeightTable,
    state: AtomicU8,
    in_flight: AtomicU64,
    late_increments: AtomicU64,
    frozen: RwLock<Option<CounterSnapshot>>,
}

impl Default for CounterRegistry {
    fn default() -> Self {
        Self::new(WeightTable::default())
    }
}

impl CounterRegistry {
    pub fn new(weights: WeightTable) -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
            weights,
            state: AtomicU8::new(IDLE),
            in_flight: AtomicU64::new(0),
            late_increments: AtomicU64::new(0),
            frozen: RwLock::new(None),
        }
    }

    /// Zeroes every counter and starts accepting increments.
    pub fn init(&self) -> Result<()> {
        let mut cur = self.state.load(Ordering::SeqCst);
        loop {
            if cur == ACTIVE || cur == INITIALIZING {
                return Err(Error::AlreadyActive);
            }
            match self
                .state
                .compare_exchange(cur, INITIALIZING, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }

        for c in &self.counts {
            c.store(0, Ordering::Relaxed);
        }
        self.late_increments.store(0, Ordering::Relaxed);
        *self.frozen.write() = None;

        self.state.store(ACTIVE, Ordering::SeqCst);
        Ok(())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::SeqCst) == ACTIVE
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.state.load(Ordering::SeqCst) == FROZEN
    }

    pub fn increment(&self, tag: ScoreTag, delta: u64) -> Result<()> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.state.load(Ordering::SeqCst) != ACTIVE {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.late_increments.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%tag, delta, "discarding increment on inactive counter registry");
            return Err(Error::NotActive);
        }

        self.counts[tag.index()].fetch_add(delta, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    #[inline]
    pub fn add(&self, tag: ScoreTag) -> Result<()> {
        self.increment(tag, 1)
    }

    /// Increments a tag given by its wire name. Unknown names are rejected.
    pub fn increment_by_name(&self, name: &str, delta: u64) -> Result<()> {
        let tag = ScoreTag::parse(name)?;
        self.increment(tag, delta)
    }

    /// Current value of a tag. After `done` this reads the frozen snapshot.
    pub fn get_by_tag(&self, tag: ScoreTag) -> u64 {
        if let Some(snapshot) = self.frozen.read().as_ref() {
            return snapshot.get(tag);
        }
        self.counts[tag.index()].load(Ordering::Relaxed)
    }

    /// Stops accepting increments and freezes the counters for reporting.
    pub fn done(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(ACTIVE, FROZEN, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::NotActive);
        }

        while self.in_flight.load(Ordering::SeqCst) != 0 {
            std::hint::spin_loop();
        }

        let snapshot = self.load_counts();
        *self.frozen.write() = Some(snapshot);
        Ok(())
    }

    /// Snapshot of an active registry, for progress reporting.
    pub fn live_snapshot(&self) -> CounterSnapshot {
        self.load_counts()
    }

    /// Frozen snapshot. Fails before `done`.
    pub fn snapshot(&self) -> Result<CounterSnapshot> {
        self.frozen.read().clone().ok_or(Error::NotFrozen)
    }

    /// Weighted revenue total. Only a frozen registry has a score.
    pub fn total_profit(&self) -> Result<u64> {
        let frozen = self.frozen.read();
        let snapshot = frozen.as_ref().ok_or(Error::NotFrozen)?;
        Ok(snapshot.profit(&self.weights))
    }

    /// Increments that arrived while the registry was not active.
    pub fn late_increments(&self) -> u64 {
        self.late_increments.load(Ordering::Relaxed)
    }

    pub fn weights(&self) -> &WeightTable {
        &self.weights
    }

    fn load_counts(&self) -> CounterSnapshot {
        CounterSnapshot {
            counts: std::array::from_fn(|i| self.counts[i].load(Ordering::Acquire)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn active() -> CounterRegistry {
        let reg = CounterRegistry::default();
        reg.init().unwrap_or_else(|e| panic!("init: {e}"));
        reg
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        const THREADS: u64 = 8;
        const PER_THREAD: u64 = 10_000;

        let reg = Arc::new(active());
        std::thread::scope(|s| {
            for _ in 0..THREADS {
                let reg = reg.clone();
                s.spawn(move || {
                    for _ in 0..PER_THREAD {
                        let _ = reg.add(ScoreTag::PostTip);
                        let _ = reg.add(ScoreTag::BrowseLivestreams);
                    }
                });
            }
        });
        reg.done().unwrap_or_else(|e| panic!("done: {e}"));

        assert_eq!(reg.get_by_tag(ScoreTag::PostTip), THREADS * PER_THREAD);
        assert_eq!(reg.get_by_tag(ScoreTag::BrowseLivestreams), THREADS * PER_THREAD);
        assert_eq!(reg.late_increments(), 0);
    }

    #[test]
    fn profit_does_not_depend_on_increment_order() {
        let forward = active();
        for delta in [500, 1, 20, 7] {
            let _ = forward.increment(ScoreTag::Tip, delta);
        }
        for _ in 0..3 {
            let _ = forward.add(ScoreTag::Reservation);
        }

        let backward = active();
        for _ in 0..3 {
            let _ = backward.add(ScoreTag::Reservation);
        }
        for delta in [7, 20, 1, 500] {
            let _ = backward.increment(ScoreTag::Tip, delta);
        }

        let _ = forward.done();
        let _ = backward.done();

        let a = forward.total_profit().unwrap_or_else(|e| panic!("{e}"));
        let b = backward.total_profit().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(a, 528 + 30);
        assert_eq!(a, b);
    }

    #[test]
    fn profit_requires_frozen_registry() {
        let reg = active();
        let _ = reg.increment(ScoreTag::Tip, 10);
        assert_eq!(reg.total_profit(), Err(Error::NotFrozen));
        assert_eq!(reg.snapshot(), Err(Error::NotFrozen));
    }

    #[test]
    fn increments_after_done_are_discarded_and_flagged() {
        let reg = active();
        let _ = reg.add(ScoreTag::RegisterViewer);
        let _ = reg.done();

        assert_eq!(reg.add(ScoreTag::RegisterViewer), Err(Error::NotActive));
        assert_eq!(reg.get_by_tag(ScoreTag::RegisterViewer), 1);
        assert_eq!(reg.late_increments(), 1);
    }

    #[test]
    fn init_twice_fails_but_reinit_after_done_resets() {
        let reg = active();
        assert_eq!(reg.init(), Err(Error::AlreadyActive));

        let _ = reg.add(ScoreTag::DnsResolve);
        let _ = reg.done();
        assert_eq!(reg.get_by_tag(ScoreTag::DnsResolve), 1);

        reg.init().unwrap_or_else(|e| panic!("reinit: {e}"));
        assert_eq!(reg.get_by_tag(ScoreTag::DnsResolve), 0);
    }

    #[test]
    fn increment_by_name_rejects_unknown_tags() {
        let reg = active();
        assert!(reg.increment_by_name("post-tip", 2).is_ok());
        assert_eq!(
            reg.increment_by_name("free-money", 1),
            Err(Error::UnknownTag("free-money".to_string()))
        );
        assert_eq!(reg.get_by_tag(ScoreTag::PostTip), 2);
    }

    #[test]
    fn snapshot_lists_non_zero_tags_in_order() {
        let reg = active();
        let _ = reg.increment(ScoreTag::PostTipFail, 2);
        let _ = reg.add(ScoreTag::RegisterViewer);
        let _ = reg.done();

        let snapshot = reg.snapshot().unwrap_or_else(|e| panic!("{e}"));
        let listed: Vec<_> = snapshot.iter().collect();
        assert_eq!(
            listed,
            vec![(ScoreTag::RegisterViewer, 1), (ScoreTag::PostTipFail, 2)]
        );
    }
}

//! Completion scheduler
//!
//! A command that mutates the simulation cannot be answered straight away:
//! the simulation only enqueues effects and settles over later ticks. The
//! handler therefore registers a [`Completion`] (a structural [`Condition`]
//! plus an optional minimum settle duration) together with a continuation,
//! and the scheduler re-checks every pending entry once per tick.
//!
//! Everything here is plain data. Conditions are evaluated against an
//! [`Observe`] view of the simulation; continuations are an opaque type
//! parameter handed back to the caller when the entry resolves.
//!
//! Invariants:
//! - at most one pending entry per key;
//! - an entry is removed in the same call that reports it resolved, so it is
//!   never evaluated again and can never produce a second response.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::sim::{Blind, Phase, Simulation};

/// Read-only view the scheduler needs from a simulation.
pub trait Observe {
    /// Current phase.
    fn phase(&self) -> Phase;
    /// Pending effect count.
    fn effect_queue_len(&self) -> usize;
    /// Blind on deck, if a run is active.
    fn blind_on_deck(&self) -> Option<Blind>;
}

impl<S: Simulation + ?Sized> Observe for S {
    fn phase(&self) -> Phase {
        Simulation::phase(self)
    }

    fn effect_queue_len(&self) -> usize {
        Simulation::effect_queue_len(self)
    }

    fn blind_on_deck(&self) -> Option<Blind> {
        self.round().blind_on_deck
    }
}

/// Structural settle condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Phase is one of the listed phases.
    PhaseIn(Vec<Phase>),
    /// Phase is not transient.
    PhaseNotTransient,
    /// Effect queue holds at most this many entries.
    QueueAtMost(usize),
    /// At least this long since registration.
    Elapsed(Duration),
    /// Blind on deck differs from the recorded one.
    BlindNot(Option<Blind>),
    /// Every sub-condition holds.
    All(Vec<Condition>),
    /// Some sub-condition holds.
    Any(Vec<Condition>),
}

impl Condition {
    /// Evaluate against the simulation. `elapsed` is the time since the
    /// owning entry was registered.
    pub fn holds<V: Observe + ?Sized>(&self, view: &V, elapsed: Duration) -> bool {
        match self {
            Condition::PhaseIn(phases) => phases.contains(&view.phase()),
            Condition::PhaseNotTransient => !view.phase().is_transient(),
            Condition::QueueAtMost(limit) => view.effect_queue_len() <= *limit,
            Condition::Elapsed(min) => elapsed >= *min,
            Condition::BlindNot(blind) => view.blind_on_deck() != *blind,
            Condition::All(conds) => conds.iter().all(|c| c.holds(view, elapsed)),
            Condition::Any(conds) => conds.iter().any(|c| c.holds(view, elapsed)),
        }
    }
}

/// Condition plus minimum settle duration.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Structural condition.
    pub condition: Condition,
    /// How long the condition must hold continuously before resolving.
    pub hold: Option<Duration>,
}

impl Completion {
    /// Resolve as soon as `condition` holds.
    pub fn when(condition: Condition) -> Self {
        Self {
            condition,
            hold: None,
        }
    }

    /// Require the condition to hold for `hold` before resolving.
    pub fn held_for(mut self, hold: Duration) -> Self {
        self.hold = Some(hold);
        self
    }
}

/// Scheduler errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// An entry with this key is still pending.
    #[error("command '{0}' is already awaiting completion")]
    AlreadyPending(String),
}

#[derive(Debug)]
struct PendingCompletion<C> {
    seq: u64,
    completion: Completion,
    registered: Instant,
    first_true: Option<Instant>,
    deadline: Option<Instant>,
    continuation: C,
}

enum Check {
    Waiting,
    Settled,
    Expired,
}

impl<C> PendingCompletion<C> {
    fn check<V: Observe + ?Sized>(&mut self, view: &V, now: Instant) -> Check {
        let elapsed = now.saturating_duration_since(self.registered);
        if self.completion.condition.holds(view, elapsed) {
            let since = *self.first_true.get_or_insert(now);
            let held = now.saturating_duration_since(since);
            if self.completion.hold.is_none_or(|hold| held >= hold) {
                return Check::Settled;
            }
        } else {
            self.first_true = None;
        }

        match self.deadline {
            Some(deadline) if now >= deadline => Check::Expired,
            _ => Check::Waiting,
        }
    }
}

/// How a pending entry ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Condition held for the required duration.
    Settled,
    /// Deadline passed first.
    TimedOut,
}

/// A resolved entry handed back to the caller.
#[derive(Debug)]
pub struct Resolution<C> {
    /// Entry key.
    pub key: String,
    /// How it ended.
    pub outcome: Outcome,
    /// Time from registration to resolution.
    pub waited: Duration,
    /// Continuation supplied at registration.
    pub continuation: C,
}

/// Pending completions keyed by command.
#[derive(Debug)]
pub struct Scheduler<C> {
    pending: HashMap<String, PendingCompletion<C>>,
    timeout: Option<Duration>,
    next_seq: u64,
}

impl<C> Scheduler<C> {
    /// Scheduler whose entries expire after `timeout` (`None` = never).
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
            next_seq: 0,
        }
    }

    /// Register a completion. Rejects a key that is already pending and
    /// hands the continuation back.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        completion: Completion,
        continuation: C,
        now: Instant,
    ) -> Result<(), (SchedulerError, C)> {
        let key = key.into();
        if self.pending.contains_key(&key) {
            return Err((SchedulerError::AlreadyPending(key), continuation));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        tracing::debug!(key = %key, condition = ?completion.condition, "completion registered");
        self.pending.insert(
            key,
            PendingCompletion {
                seq,
                completion,
                registered: now,
                first_true: None,
                deadline: self.timeout.map(|timeout| now + timeout),
                continuation,
            },
        );
        Ok(())
    }

    /// Evaluate every pending entry once and remove the ones that resolved.
    /// Results are ordered by registration.
    pub fn poll<V: Observe + ?Sized>(&mut self, view: &V, now: Instant) -> Vec<Resolution<C>> {
        let mut resolved: Vec<(String, Outcome)> = Vec::new();
        for (key, entry) in self.pending.iter_mut() {
            match entry.check(view, now) {
                Check::Waiting => {}
                Check::Settled => resolved.push((key.clone(), Outcome::Settled)),
                Check::Expired => resolved.push((key.clone(), Outcome::TimedOut)),
            }
        }

        let mut out: Vec<(u64, Resolution<C>)> = resolved
            .into_iter()
            .filter_map(|(key, outcome)| {
                let entry = self.pending.remove(&key)?;
                let waited = now.saturating_duration_since(entry.registered);
                Some((
                    entry.seq,
                    Resolution {
                        key,
                        outcome,
                        waited,
                        continuation: entry.continuation,
                    },
                ))
            })
            .collect();
        out.sort_by_key(|(seq, _)| *seq);
        out.into_iter().map(|(_, resolution)| resolution).collect()
    }

    /// Remove every pending entry, returning keys and continuations in
    /// registration order.
    pub fn abort_all(&mut self) -> Vec<(String, C)> {
        let mut drained: Vec<(u64, String, C)> = self
            .pending
            .drain()
            .map(|(key, entry)| (entry.seq, key, entry.continuation))
            .collect();
        drained.sort_by_key(|(seq, _, _)| *seq);
        drained.into_iter().map(|(_, key, c)| (key, c)).collect()
    }

    /// Whether `key` is pending.
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Number of pending entries.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Configured expiry.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeSim {
        phase: Cell<Phase>,
        queue: Cell<usize>,
        blind: Cell<Option<Blind>>,
    }

    impl FakeSim {
        fn new(phase: Phase, queue: usize) -> Self {
            Self {
                phase: Cell::new(phase),
                queue: Cell::new(queue),
                blind: Cell::new(Some(Blind::Small)),
            }
        }
    }

    impl Observe for FakeSim {
        fn phase(&self) -> Phase {
            self.phase.get()
        }

        fn effect_queue_len(&self) -> usize {
            self.queue.get()
        }

        fn blind_on_deck(&self) -> Option<Blind> {
            self.blind.get()
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn hand_resolved() -> Completion {
        Completion::when(Condition::All(vec![
            Condition::PhaseIn(vec![Phase::SelectingHand, Phase::RoundEval, Phase::GameOver]),
            Condition::QueueAtMost(0),
        ]))
    }

    #[test]
    fn test_scheduler_resolves_when_condition_holds() {
        let t0 = Instant::now();
        let sim = FakeSim::new(Phase::HandPlayed, 3);
        let mut scheduler = Scheduler::new(None);
        scheduler.register("play_hand_or_discard", hand_resolved(), 1u32, t0).unwrap();

        assert!(scheduler.poll(&sim, t0 + ms(16)).is_empty());
        sim.phase.set(Phase::SelectingHand);
        assert!(scheduler.poll(&sim, t0 + ms(32)).is_empty());
        sim.queue.set(0);

        let resolved = scheduler.poll(&sim, t0 + ms(48));
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].key, "play_hand_or_discard");
        assert_eq!(resolved[0].outcome, Outcome::Settled);
        assert_eq!(resolved[0].continuation, 1);
        assert_eq!(resolved[0].waited, ms(48));
    }

    #[test]
    fn test_scheduler_never_resolves_twice() {
        let t0 = Instant::now();
        let sim = FakeSim::new(Phase::Shop, 0);
        let mut scheduler = Scheduler::new(None);
        scheduler
            .register("cash_out", Completion::when(Condition::PhaseIn(vec![Phase::Shop])), (), t0)
            .unwrap();

        assert_eq!(scheduler.poll(&sim, t0).len(), 1);
        assert_eq!(scheduler.pending_count(), 0);
        assert!(scheduler.poll(&sim, t0 + ms(16)).is_empty());
    }

    #[test]
    fn test_scheduler_rejects_duplicate_key() {
        let t0 = Instant::now();
        let mut scheduler = Scheduler::new(None);
        scheduler
            .register("shop", Completion::when(Condition::QueueAtMost(0)), 1, t0)
            .unwrap();
        let (err, rejected) = scheduler
            .register("shop", Completion::when(Condition::QueueAtMost(0)), 2, t0)
            .unwrap_err();

        assert_eq!(err, SchedulerError::AlreadyPending("shop".into()));
        assert_eq!(rejected, 2);
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[test]
    fn test_hold_requires_continuous_truth() {
        let t0 = Instant::now();
        let sim = FakeSim::new(Phase::Shop, 0);
        let mut scheduler = Scheduler::new(None);
        let completion = Completion::when(Condition::QueueAtMost(0)).held_for(ms(100));
        scheduler.register("shop", completion, (), t0).unwrap();

        // First true at t0+10; not yet held long enough.
        assert!(scheduler.poll(&sim, t0 + ms(10)).is_empty());
        assert!(scheduler.poll(&sim, t0 + ms(60)).is_empty());

        // Condition flaps false: the stamp resets.
        sim.queue.set(1);
        assert!(scheduler.poll(&sim, t0 + ms(80)).is_empty());
        sim.queue.set(0);
        assert!(scheduler.poll(&sim, t0 + ms(90)).is_empty());
        assert!(scheduler.poll(&sim, t0 + ms(150)).is_empty());

        // 100ms after the second first-true stamp.
        assert_eq!(scheduler.poll(&sim, t0 + ms(190)).len(), 1);
    }

    #[test]
    fn test_deadline_times_out() {
        let t0 = Instant::now();
        let sim = FakeSim::new(Phase::HandPlayed, 5);
        let mut scheduler = Scheduler::new(Some(ms(500)));
        scheduler.register("play_hand_or_discard", hand_resolved(), (), t0).unwrap();

        assert!(scheduler.poll(&sim, t0 + ms(499)).is_empty());
        let resolved = scheduler.poll(&sim, t0 + ms(500));
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].outcome, Outcome::TimedOut);
        assert!(!scheduler.is_pending("play_hand_or_discard"));
    }

    #[test]
    fn test_settled_wins_over_deadline() {
        let t0 = Instant::now();
        let sim = FakeSim::new(Phase::SelectingHand, 0);
        let mut scheduler = Scheduler::new(Some(ms(10)));
        scheduler.register("play_hand_or_discard", hand_resolved(), (), t0).unwrap();

        let resolved = scheduler.poll(&sim, t0 + ms(20));
        assert_eq!(resolved[0].outcome, Outcome::Settled);
    }

    #[test]
    fn test_blind_not_condition() {
        let t0 = Instant::now();
        let sim = FakeSim::new(Phase::BlindSelect, 0);
        let mut scheduler = Scheduler::new(None);
        let completion = Completion::when(Condition::All(vec![
            Condition::BlindNot(Some(Blind::Small)),
            Condition::PhaseIn(vec![Phase::BlindSelect]),
        ]));
        scheduler.register("skip_or_select_blind", completion, (), t0).unwrap();

        assert!(scheduler.poll(&sim, t0).is_empty());
        sim.blind.set(Some(Blind::Big));
        assert_eq!(scheduler.poll(&sim, t0 + ms(16)).len(), 1);
    }

    #[test]
    fn test_elapsed_and_any() {
        let sim = FakeSim::new(Phase::Menu, 9);
        let cond = Condition::Any(vec![Condition::QueueAtMost(0), Condition::Elapsed(ms(50))]);
        assert!(!cond.holds(&sim, ms(10)));
        assert!(cond.holds(&sim, ms(50)));
        assert!(Condition::PhaseNotTransient.holds(&sim, ms(0)));
        sim.phase.set(Phase::DrawToHand);
        assert!(!Condition::PhaseNotTransient.holds(&sim, ms(0)));
    }

    #[test]
    fn test_abort_all_returns_in_registration_order() {
        let t0 = Instant::now();
        let mut scheduler = Scheduler::new(None);
        for (i, key) in ["b", "a", "c"].iter().enumerate() {
            scheduler
                .register(*key, Completion::when(Condition::QueueAtMost(0)), i, t0)
                .unwrap();
        }

        let aborted = scheduler.abort_all();
        let keys: Vec<&str> = aborted.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(scheduler.pending_count(), 0);
    }
}

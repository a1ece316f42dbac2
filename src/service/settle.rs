//! Completion predicates for each command
//!
//! A command is answered once the simulation has absorbed its effects. What
//! "absorbed" means differs per command; each factory here spells it out as
//! a [`Completion`]. All of them include an empty effect queue.

use std::time::Duration;

use crate::runtime::scheduler::{Completion, Condition};
use crate::sim::{Blind, Phase};

fn settled_in(phases: &[Phase]) -> Condition {
    Condition::All(vec![
        Condition::PhaseIn(phases.to_vec()),
        Condition::QueueAtMost(0),
    ])
}

/// Back at the main menu.
pub fn menu(hold: Duration) -> Completion {
    Completion::when(settled_in(&[Phase::Menu])).held_for(hold)
}

/// Run started and waiting for a blind choice.
pub fn run_started() -> Completion {
    Completion::when(settled_in(&[Phase::BlindSelect]))
}

/// Blind selected and the hand dealt.
pub fn blind_selected() -> Completion {
    Completion::when(settled_in(&[Phase::SelectingHand]))
}

/// Blind skipped: the blind on deck moved past `skipped`.
pub fn blind_skipped(skipped: Option<Blind>) -> Completion {
    Completion::when(Condition::All(vec![
        Condition::BlindNot(skipped),
        settled_in(&[Phase::BlindSelect]),
    ]))
}

/// Hand played or discarded and the outcome known.
pub fn hand_resolved(hold: Duration) -> Completion {
    Completion::when(settled_in(&[
        Phase::SelectingHand,
        Phase::RoundEval,
        Phase::GameOver,
    ]))
    .held_for(hold)
}

/// Shop open and idle.
pub fn shop_ready(hold: Duration) -> Completion {
    Completion::when(settled_in(&[Phase::Shop])).held_for(hold)
}

/// Left the shop for the next blind choice.
pub fn next_round() -> Completion {
    Completion::when(settled_in(&[Phase::BlindSelect]))
}

/// Effect queue drained.
pub fn queue_drained() -> Completion {
    Completion::when(Condition::QueueAtMost(0))
}

/// Effect queue drained and stayed drained for `hold`.
pub fn queue_drained_held(hold: Duration) -> Completion {
    queue_drained().held_for(hold)
}

/// Save restored and the simulation resting in a stable phase.
pub fn restored() -> Completion {
    Completion::when(Condition::All(vec![
        Condition::QueueAtMost(0),
        Condition::PhaseNotTransient,
    ]))
}

//! Merge semantics: when a join fires and with which liveness
//!
//! AND-joins (synchronization, discriminator, partial join, thread merge)
//! fire once per cycle, as soon as enough live arrivals are in. Branches
//! that arrived dead can no longer deliver a live token, so the threshold
//! shrinks with them: the join fires on the live arrival that makes
//! `true_count >= min(accept, expected - dead_count)`, and only if at
//! least one arrival was live.
//!
//! OR-joins pass live arrivals: every one for a multi merge, at most one
//! per instant for a simple merge. Under the generalized strategy a live
//! arrival queued for a later cycle still passes at once; it only counts
//! as delivered liveness once its cycle opens.
//!
//! Every join resets when all predecessors have contributed. A cycle that
//! never fired sends one dead continuation downstream on reset.

use crate::merge_control::{MergeArrival, MergeControl};
use flowsim_types::{FlowResult, MergeKind, SimTime};

/// Whether two simulated times count as the same instant
pub type InstantEquivalence = dyn Fn(SimTime, SimTime) -> bool + Send + Sync;

/// A continuation leaving a merge node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Continuation {
    pub live: bool,
}

impl Continuation {
    pub const LIVE: Self = Self { live: true };
    pub const DEAD: Self = Self { live: false };
}

/// Fan-in behaviour of a merge node
pub trait Merger {
    /// Register an arrival and return the continuations it releases,
    /// in dispatch order
    fn on_arrival(
        &self,
        control: &mut MergeControl,
        arrival: MergeArrival,
        now: SimTime,
        same_instant: &InstantEquivalence,
    ) -> FlowResult<Vec<Continuation>>;
}

impl Merger for MergeKind {
    fn on_arrival(
        &self,
        control: &mut MergeControl,
        arrival: MergeArrival,
        now: SimTime,
        same_instant: &InstantEquivalence,
    ) -> FlowResult<Vec<Continuation>> {
        let mut out = Vec::new();

        let in_cycle = control.register(arrival)?;
        if self.is_and_join() {
            if in_cycle {
                self.try_pass(control, &mut out);
            }
        } else if arrival.live {
            self.pass_live(control, in_cycle, now, same_instant, &mut out);
        }

        while control.can_reset() {
            if !control.is_activated() {
                out.push(Continuation::DEAD);
            }
            control.reset();

            // arrivals carried into the new cycle get their turn now
            if self.is_and_join() {
                self.try_pass(control, &mut out);
            } else if control.true_count() > 0 {
                // already passed when they arrived
                control.activate();
            }
        }

        Ok(out)
    }
}

trait JoinRules {
    fn try_pass(&self, control: &mut MergeControl, out: &mut Vec<Continuation>);
    fn pass_live(
        &self,
        control: &mut MergeControl,
        in_cycle: bool,
        now: SimTime,
        same_instant: &InstantEquivalence,
        out: &mut Vec<Continuation>,
    );
}

impl JoinRules for MergeKind {
    fn try_pass(&self, control: &mut MergeControl, out: &mut Vec<Continuation>) {
        if control.is_activated() || control.true_count() == 0 {
            return;
        }
        let expected = control.expected();
        let threshold = self
            .accept_threshold(expected)
            .min(expected.saturating_sub(control.dead_count()));
        if control.true_count() >= threshold {
            control.activate();
            out.push(Continuation::LIVE);
        }
    }

    fn pass_live(
        &self,
        control: &mut MergeControl,
        in_cycle: bool,
        now: SimTime,
        same_instant: &InstantEquivalence,
        out: &mut Vec<Continuation>,
    ) {
        // a swallowed arrival still counts as delivered liveness
        if in_cycle {
            control.activate();
        }
        if let MergeKind::SimpleMerge = self {
            if control.last_pass().is_some_and(|t| same_instant(t, now)) {
                return;
            }
        }
        control.set_last_pass(now);
        out.push(Continuation::LIVE);
    }
}

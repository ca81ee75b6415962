//! Merge-control records: per-entity arrival ledgers for merge nodes
//!
//! Each merge node keeps one record per entity currently traversing it,
//! keyed by `(merge node, entity)` and owned by the engine. A record
//! counts the live and dead arrivals of the current cycle and knows when
//! every predecessor has contributed, which is when the cycle resets.

use flowsim_types::{ControlStrategy, EntityId, FlowError, FlowId, FlowResult, SimTime};
use std::collections::{BTreeMap, VecDeque};

/// An arrival at a merge node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeArrival {
    /// Node the arriving executor came from
    pub predecessor: FlowId,
    pub live: bool,
}

#[derive(Clone, Debug)]
enum Ledger {
    /// Arrivals per predecessor in the current cycle
    Safe { counts: BTreeMap<FlowId, u32> },
    /// Liveness of every arrival per predecessor; the first
    /// `per_predecessor` entries of each queue form the current cycle
    Generalized {
        queues: BTreeMap<FlowId, VecDeque<bool>>,
    },
}

/// Arrival bookkeeping of one merge node for one entity
#[derive(Clone, Debug)]
pub struct MergeControl {
    node: FlowId,
    entity: EntityId,
    predecessors: Vec<FlowId>,
    per_predecessor: u32,
    activated: bool,
    true_count: u32,
    dead_count: u32,
    last_pass: Option<SimTime>,
    ledger: Ledger,
}

impl MergeControl {
    pub fn new(
        node: FlowId,
        entity: EntityId,
        predecessors: &[FlowId],
        per_predecessor: u32,
        strategy: ControlStrategy,
    ) -> Self {
        let ledger = match strategy {
            ControlStrategy::Safe => Ledger::Safe {
                counts: BTreeMap::new(),
            },
            ControlStrategy::Generalized => Ledger::Generalized {
                queues: predecessors.iter().map(|p| (*p, VecDeque::new())).collect(),
            },
        };
        Self {
            node,
            entity,
            predecessors: predecessors.to_vec(),
            per_predecessor: per_predecessor.max(1),
            activated: false,
            true_count: 0,
            dead_count: 0,
            last_pass: None,
            ledger,
        }
    }

    fn inconsistency(&self, reason: String) -> FlowError {
        FlowError::MergeLedger {
            node: self.node,
            entity: self.entity,
            reason,
        }
    }

    /// Arrivals that make up a full cycle
    pub fn expected(&self) -> u32 {
        self.predecessors.len() as u32 * self.per_predecessor
    }

    pub fn true_count(&self) -> u32 {
        self.true_count
    }

    pub fn dead_count(&self) -> u32 {
        self.dead_count
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    pub fn activate(&mut self) {
        self.activated = true;
    }

    pub fn last_pass(&self) -> Option<SimTime> {
        self.last_pass
    }

    pub fn set_last_pass(&mut self, time: SimTime) {
        self.last_pass = Some(time);
    }

    /// Arrivals waiting for a later cycle
    pub fn pending(&self) -> usize {
        match &self.ledger {
            Ledger::Safe { .. } => 0,
            Ledger::Generalized { queues } => queues
                .values()
                .map(|q| q.len().saturating_sub(self.per_predecessor as usize))
                .sum(),
        }
    }

    /// Record an arrival. Returns whether it counts toward the current
    /// cycle; under the generalized strategy it may instead be queued for
    /// a later one.
    pub fn register(&mut self, arrival: MergeArrival) -> FlowResult<bool> {
        if !self.predecessors.contains(&arrival.predecessor) {
            return Err(self.inconsistency(format!(
                "arrival from unregistered predecessor {}",
                arrival.predecessor
            )));
        }

        let per_predecessor = self.per_predecessor;
        let in_cycle = match &mut self.ledger {
            Ledger::Safe { counts } => {
                let count = counts.entry(arrival.predecessor).or_insert(0);
                if *count >= per_predecessor {
                    let reason = format!(
                        "predecessor {} arrived more than {} time(s) in one cycle",
                        arrival.predecessor, per_predecessor
                    );
                    return Err(self.inconsistency(reason));
                }
                *count += 1;
                true
            }
            Ledger::Generalized { queues } => {
                let queue = queues.entry(arrival.predecessor).or_default();
                queue.push_back(arrival.live);
                queue.len() <= per_predecessor as usize
            }
        };

        if in_cycle {
            self.tally(arrival.live)?;
        }
        Ok(in_cycle)
    }

    fn tally(&mut self, live: bool) -> FlowResult<()> {
        let counter = if live {
            &mut self.true_count
        } else {
            &mut self.dead_count
        };
        *counter = counter
            .checked_add(1)
            .ok_or_else(|| FlowError::MergeLedger {
                node: self.node,
                entity: self.entity,
                reason: "arrival counter overflow".to_string(),
            })?;
        Ok(())
    }

    /// Whether every predecessor has contributed to the current cycle
    pub fn can_reset(&self) -> bool {
        let per_predecessor = self.per_predecessor;
        match &self.ledger {
            Ledger::Safe { counts } => self
                .predecessors
                .iter()
                .all(|p| counts.get(p).copied().unwrap_or(0) >= per_predecessor),
            Ledger::Generalized { queues } => self.predecessors.iter().all(|p| {
                queues
                    .get(p)
                    .is_some_and(|q| q.len() >= per_predecessor as usize)
            }),
        }
    }

    /// Start the next cycle. Queued arrivals move into it and are counted.
    pub fn reset(&mut self) {
        self.activated = false;
        self.true_count = 0;
        self.dead_count = 0;

        let per_predecessor = self.per_predecessor as usize;
        let mut carried = Vec::new();
        match &mut self.ledger {
            Ledger::Safe { counts } => counts.clear(),
            Ledger::Generalized { queues } => {
                for queue in queues.values_mut() {
                    let drain = per_predecessor.min(queue.len());
                    queue.drain(..drain);
                    carried.extend(queue.iter().take(per_predecessor).copied());
                }
            }
        }
        for live in carried {
            if live {
                self.true_count += 1;
            } else {
                self.dead_count += 1;
            }
        }
    }
}

/// All merge-control records of a run, keyed by merge node and entity
#[derive(Debug, Default)]
pub struct MergeControlTable {
    records: BTreeMap<(FlowId, EntityId), MergeControl>,
}

impl MergeControlTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: FlowId, entity: EntityId) -> Option<&MergeControl> {
        self.records.get(&(node, entity))
    }

    pub fn get_or_insert_with(
        &mut self,
        node: FlowId,
        entity: EntityId,
        create: impl FnOnce() -> MergeControl,
    ) -> &mut MergeControl {
        self.records.entry((node, entity)).or_insert_with(create)
    }

    /// Drop every record of a finished entity
    pub fn clear_entity(&mut self, entity: EntityId) -> usize {
        let before = self.records.len();
        self.records.retain(|(_, e), _| *e != entity);
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: FlowId = FlowId(1);
    const B: FlowId = FlowId(2);

    fn arrival(predecessor: FlowId, live: bool) -> MergeArrival {
        MergeArrival { predecessor, live }
    }

    fn control(strategy: ControlStrategy) -> MergeControl {
        MergeControl::new(FlowId(9), EntityId(0), &[A, B], 1, strategy)
    }

    #[test]
    fn test_safe_counts_and_resets() {
        let mut c = control(ControlStrategy::Safe);
        assert!(c.register(arrival(A, true)).unwrap());
        assert!(!c.can_reset());
        assert!(c.register(arrival(B, false)).unwrap());
        assert_eq!((c.true_count(), c.dead_count()), (1, 1));
        assert!(c.can_reset());

        c.activate();
        c.reset();
        assert!(!c.is_activated());
        assert_eq!((c.true_count(), c.dead_count()), (0, 0));
        assert!(!c.can_reset());
    }

    #[test]
    fn test_safe_rejects_duplicate_predecessor() {
        let mut c = control(ControlStrategy::Safe);
        c.register(arrival(A, true)).unwrap();
        let err = c.register(arrival(A, true)).unwrap_err();
        assert!(matches!(err, FlowError::MergeLedger { .. }));
    }

    #[test]
    fn test_unregistered_predecessor_rejected() {
        for strategy in [ControlStrategy::Safe, ControlStrategy::Generalized] {
            let mut c = control(strategy);
            assert!(c.register(arrival(FlowId(77), true)).is_err());
        }
    }

    #[test]
    fn test_generalized_queues_and_carries() {
        let mut c = control(ControlStrategy::Generalized);
        assert!(c.register(arrival(A, true)).unwrap());
        // second arrival from A waits for the next cycle
        assert!(!c.register(arrival(A, false)).unwrap());
        assert_eq!(c.pending(), 1);
        assert_eq!(c.true_count(), 1);

        assert!(c.register(arrival(B, true)).unwrap());
        assert!(c.can_reset());
        c.reset();

        assert_eq!((c.true_count(), c.dead_count()), (0, 1));
        assert_eq!(c.pending(), 0);
        assert!(!c.can_reset());
    }

    #[test]
    fn test_thread_merge_multiplicity() {
        let mut c = MergeControl::new(FlowId(9), EntityId(0), &[A], 3, ControlStrategy::Safe);
        assert_eq!(c.expected(), 3);
        c.register(arrival(A, true)).unwrap();
        c.register(arrival(A, false)).unwrap();
        assert!(!c.can_reset());
        c.register(arrival(A, true)).unwrap();
        assert!(c.can_reset());
        assert!(c.register(arrival(A, true)).is_err());
    }

    #[test]
    fn test_table_keyed_by_entity() {
        let mut table = MergeControlTable::new();
        for entity in [EntityId(0), EntityId(1)] {
            table
                .get_or_insert_with(FlowId(9), entity, || {
                    MergeControl::new(FlowId(9), entity, &[A, B], 1, ControlStrategy::Safe)
                })
                .register(arrival(A, true))
                .unwrap();
        }
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(FlowId(9), EntityId(1)).unwrap().true_count(), 1);
        assert_eq!(table.clear_entity(EntityId(0)), 1);
        assert!(table.get(FlowId(9), EntityId(0)).is_none());
    }
}

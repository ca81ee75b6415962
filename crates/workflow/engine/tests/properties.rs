//! Property tests: join firing and loop counts hold for any input.

use flowsim_engine::{EngineConfig, FlowEngine, FlowEventKind};
use flowsim_types::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

fn guard(holds: bool) -> Condition {
    if holds {
        Condition::always()
    } else {
        Condition::never()
    }
}

/// `split -> one delay per duration -> join`
fn fan(
    split: fn(&mut FlowGraphBuilder) -> FlowId,
    join: MergeKind,
    durations: &[f64],
    guards: Option<&[bool]>,
) -> (FlowEngine, FlowId, Vec<FlowId>) {
    let mut b = FlowGraphBuilder::new();
    let start = split(&mut b);
    let merge = b.merge("join", join, ControlStrategy::Safe);
    let mut branches = Vec::new();
    for (i, d) in durations.iter().enumerate() {
        let delay = b.delay(format!("branch {}", i), Distribution::constant(*d));
        match guards {
            Some(guards) => b.link_when(start, delay, guard(guards[i])).unwrap(),
            None => b.link(start, delay).unwrap(),
        }
        b.link(delay, merge).unwrap();
        branches.push(delay);
    }
    let graph = Arc::new(b.build().unwrap());
    let mut engine = FlowEngine::new(graph, EngineConfig::default());
    engine.start_entity(start, BTreeMap::new(), 0.0).unwrap();
    (engine, merge, branches)
}

proptest! {
    #[test]
    fn synchronization_fires_once_at_latest_branch(
        durations in prop::collection::vec(0.0f64..100.0, 1..6)
    ) {
        let (mut engine, join, branches) =
            fan(|b| b.parallel("fork"), MergeKind::Synchronization, &durations, None);
        engine.run().unwrap();

        let latest = durations.iter().cloned().fold(0.0, f64::max);
        let log = engine.event_log();
        prop_assert_eq!(log.times(join, &FlowEventKind::Fired { live: true }), vec![latest]);
        prop_assert_eq!(log.count(join, &FlowEventKind::Fired { live: false }), 0);
        for branch in branches {
            prop_assert_eq!(log.count(branch, &FlowEventKind::Finished), 1);
        }
        prop_assert!(engine.merge_records().is_empty());
    }

    #[test]
    fn exclusive_choice_runs_at_most_one_branch(
        guards in prop::collection::vec(any::<bool>(), 1..6)
    ) {
        let durations = vec![1.0; guards.len()];
        let (mut engine, join, branches) = fan(
            |b| b.exclusive_choice("choice"),
            MergeKind::SimpleMerge,
            &durations,
            Some(guards.as_slice()),
        );
        engine.run().unwrap();

        let log = engine.event_log();
        let started: Vec<usize> = branches
            .iter()
            .enumerate()
            .filter(|(_, n)| log.count(**n, &FlowEventKind::Started) == 1)
            .map(|(i, _)| i)
            .collect();
        let first_true = guards.iter().position(|g| *g);
        prop_assert_eq!(started.first().copied(), first_true);
        prop_assert!(started.len() <= 1);

        let live = log.count(join, &FlowEventKind::Fired { live: true });
        let dead = log.count(join, &FlowEventKind::Fired { live: false });
        prop_assert_eq!((live, dead), if first_true.is_some() { (1, 0) } else { (0, 1) });
    }

    #[test]
    fn multi_choice_join_fires_exactly_once(
        guards in prop::collection::vec(any::<bool>(), 1..6)
    ) {
        let durations: Vec<f64> = (0..guards.len()).map(|i| i as f64 + 1.0).collect();
        let (mut engine, join, _) = fan(
            |b| b.multi_choice("choice"),
            MergeKind::Synchronization,
            &durations,
            Some(guards.as_slice()),
        );
        engine.run().unwrap();

        let log = engine.event_log();
        let live = log.count(join, &FlowEventKind::Fired { live: true });
        let dead = log.count(join, &FlowEventKind::Fired { live: false });
        prop_assert_eq!(live + dead, 1);
        prop_assert_eq!(live == 1, guards.iter().any(|g| *g));
        if live == 1 {
            // fires on the last live branch
            let last_live = guards.iter().rposition(|g| *g).unwrap() as f64 + 1.0;
            prop_assert_eq!(log.times(join, &FlowEventKind::Fired { live: true }), vec![last_live]);
        }
    }

    #[test]
    fn for_loop_runs_rounded_count(n in -3.0f64..10.0) {
        let mut b = FlowGraphBuilder::new();
        let repeat = b.for_loop("repeat", Expression::attribute("n"));
        let body = b.user_action("body", Action::increment("runs", 1.0));
        b.add_branch(repeat, body, body).unwrap();
        let graph = Arc::new(b.build().unwrap());
        let mut engine = FlowEngine::new(graph, EngineConfig::default());

        let mut attributes = BTreeMap::new();
        attributes.insert("n".to_string(), n);
        let entity = engine.start_entity(repeat, attributes, 0.0).unwrap();
        engine.run().unwrap();

        let expected = n.round().max(0.0);
        let runs = engine.entity(entity).unwrap().attribute("runs").unwrap_or(0.0);
        prop_assert_eq!(runs, expected);
        prop_assert!(engine.is_finished(entity));
    }
}

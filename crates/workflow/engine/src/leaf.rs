//! Leaf actions: the domain work done at delay, generator, user-action
//! and wait-for-signal nodes

use crate::variates::VariateSource;
use flowsim_types::{
    ActionContext, Distribution, Entity, ExecutorId, FlowError, FlowId, FlowResult,
    GeneratorSpec, LeafKind, SimTime,
};

/// What the engine does after a leaf has run
#[derive(Clone, Debug, PartialEq)]
pub enum LeafOutcome {
    /// Continue to the successor now
    Continue,
    /// Resume after the given duration
    SuspendFor(SimTime),
    /// Park until signalled
    AwaitSignal,
    /// Start the generation cycle, then continue now
    Generate(GeneratorSpec),
}

/// Everything a leaf may touch while it runs
pub struct LeafContext<'a> {
    pub entity: &'a mut Entity,
    pub executor: ExecutorId,
    pub node: FlowId,
    pub now: SimTime,
    pub variates: &'a mut dyn VariateSource,
}

/// Work performed by a leaf node on a live arrival
pub trait ActionLeaf {
    fn perform(&self, cx: &mut LeafContext<'_>) -> FlowResult<LeafOutcome>;
}

impl ActionLeaf for LeafKind {
    fn perform(&self, cx: &mut LeafContext<'_>) -> FlowResult<LeafOutcome> {
        match self {
            LeafKind::Delay(Distribution::WorkGroupDuration { resources_id }) => {
                let acquisition = cx.entity.acquisition(*resources_id).ok_or(
                    FlowError::ResourcesNotHeld {
                        entity: cx.entity.id,
                        resources: *resources_id,
                    },
                )?;
                Ok(LeafOutcome::SuspendFor(acquisition.duration))
            }
            LeafKind::Delay(distribution) => {
                let duration = cx.variates.sample(cx.entity.id, distribution)?;
                Ok(LeafOutcome::SuspendFor(duration))
            }
            LeafKind::Generator(spec) => Ok(LeafOutcome::Generate(spec.clone())),
            LeafKind::UserAction(action) => {
                action.run(&mut ActionContext {
                    entity: &mut *cx.entity,
                    executor: cx.executor,
                    node: cx.node,
                    now: cx.now,
                })?;
                Ok(LeafOutcome::Continue)
            }
            LeafKind::WaitForSignal => Ok(LeafOutcome::AwaitSignal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variates::SeededVariates;
    use flowsim_types::{Acquisition, Action, EntityId, ResourcesId, WorkGroupId};

    fn perform(leaf: &LeafKind, entity: &mut Entity) -> FlowResult<LeafOutcome> {
        let mut variates = SeededVariates::new(0);
        leaf.perform(&mut LeafContext {
            entity,
            executor: ExecutorId(0),
            node: FlowId(0),
            now: 1.0,
            variates: &mut variates,
        })
    }

    #[test]
    fn test_delay_samples() {
        let mut entity = Entity::new(EntityId(0), 0.0);
        let outcome = perform(&LeafKind::Delay(Distribution::constant(3.0)), &mut entity).unwrap();
        assert_eq!(outcome, LeafOutcome::SuspendFor(3.0));
    }

    #[test]
    fn test_workgroup_delay_uses_acquisition() {
        let mut entity = Entity::new(EntityId(0), 0.0);
        let leaf = LeafKind::Delay(Distribution::WorkGroupDuration {
            resources_id: ResourcesId(2),
        });
        assert!(matches!(
            perform(&leaf, &mut entity),
            Err(FlowError::ResourcesNotHeld { .. })
        ));

        entity.acquisitions.insert(
            ResourcesId(2),
            Acquisition {
                resources_id: ResourcesId(2),
                workgroup: WorkGroupId(0),
                duration: 7.5,
                acquired_at: 0.0,
            },
        );
        assert_eq!(perform(&leaf, &mut entity).unwrap(), LeafOutcome::SuspendFor(7.5));
    }

    #[test]
    fn test_user_action_runs_synchronously() {
        let mut entity = Entity::new(EntityId(0), 0.0);
        let leaf = LeafKind::UserAction(Action::new("stamp", |ctx| {
            ctx.entity.set_attribute("stamped_at", ctx.now);
            Ok(())
        }));
        assert_eq!(perform(&leaf, &mut entity).unwrap(), LeafOutcome::Continue);
        assert_eq!(entity.attribute("stamped_at"), Some(1.0));
    }

    #[test]
    fn test_wait_and_generate() {
        let mut entity = Entity::new(EntityId(0), 0.0);
        assert_eq!(
            perform(&LeafKind::WaitForSignal, &mut entity).unwrap(),
            LeafOutcome::AwaitSignal
        );
        let spec = GeneratorSpec::new(FlowId(3), 2, 1.0, 4);
        assert_eq!(
            perform(&LeafKind::Generator(spec.clone()), &mut entity).unwrap(),
            LeafOutcome::Generate(spec)
        );
    }
}

//! User-supplied callbacks: guards, numeric expressions and actions
//!
//! Callbacks are attached at construction time and shared between every
//! entity that runs through the graph, so they are stored behind `Arc` and
//! must be `Send + Sync`. Failures are reported through `anyhow` and turned
//! into fatal [`FlowError`]s carrying the callback's label.

use crate::{Entity, ExecutorId, FlowError, FlowId, FlowResult, ResourcesId, SimTime, WorkGroupId};
use std::fmt;
use std::sync::Arc;

/// Read-only view handed to guards and expressions
#[derive(Clone, Copy, Debug)]
pub struct EvalContext<'a> {
    pub entity: &'a Entity,
    pub executor: ExecutorId,
    pub node: FlowId,
    pub now: SimTime,
}

/// Mutable view handed to user actions
#[derive(Debug)]
pub struct ActionContext<'a> {
    pub entity: &'a mut Entity,
    pub executor: ExecutorId,
    pub node: FlowId,
    pub now: SimTime,
}

type GuardFn = dyn Fn(&EvalContext<'_>) -> anyhow::Result<bool> + Send + Sync;
type ExpressionFn = dyn Fn(&EvalContext<'_>) -> anyhow::Result<f64> + Send + Sync;
type ActionFn = dyn Fn(&mut ActionContext<'_>) -> anyhow::Result<()> + Send + Sync;

// ── Condition ────────────────────────────────────────────────────────

/// A boolean guard evaluated against an executor's entity
#[derive(Clone)]
pub struct Condition {
    label: String,
    eval: Arc<GuardFn>,
}

impl Condition {
    pub fn new<F>(label: impl Into<String>, eval: F) -> Self
    where
        F: Fn(&EvalContext<'_>) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            eval: Arc::new(eval),
        }
    }

    /// Guard built from an infallible predicate
    pub fn from_fn<F>(label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&EvalContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self::new(label, move |ctx| Ok(predicate(ctx)))
    }

    pub fn always() -> Self {
        Self::from_fn("true", |_| true)
    }

    pub fn never() -> Self {
        Self::from_fn("false", |_| false)
    }

    /// True when the entity attribute is at least `threshold`.
    /// Fails when the attribute is missing.
    pub fn attribute_at_least(name: impl Into<String>, threshold: f64) -> Self {
        let name = name.into();
        let label = format!("{} >= {}", name, threshold);
        Self::new(label, move |ctx| match ctx.entity.attribute(&name) {
            Some(value) => Ok(value >= threshold),
            None => anyhow::bail!("attribute '{}' is not set on {}", name, ctx.entity.id),
        })
    }

    /// True when `workgroup` was the one chosen for `resources_id`
    pub fn workgroup_selected(resources_id: ResourcesId, workgroup: WorkGroupId) -> Self {
        Self::from_fn(
            format!("{} selected for {}", workgroup, resources_id),
            move |ctx| {
                ctx.entity
                    .acquisition(resources_id)
                    .is_some_and(|acq| acq.workgroup == workgroup)
            },
        )
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> FlowResult<bool> {
        (self.eval)(ctx).map_err(|source| FlowError::ConditionFailed {
            label: self.label.clone(),
            source,
        })
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Condition").field(&self.label).finish()
    }
}

// ── Expression ───────────────────────────────────────────────────────

/// A numeric expression, used for loop iteration counts
#[derive(Clone)]
pub struct Expression {
    label: String,
    eval: Arc<ExpressionFn>,
}

impl Expression {
    pub fn new<F>(label: impl Into<String>, eval: F) -> Self
    where
        F: Fn(&EvalContext<'_>) -> anyhow::Result<f64> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            eval: Arc::new(eval),
        }
    }

    pub fn constant(value: f64) -> Self {
        Self::new(value.to_string(), move |_| Ok(value))
    }

    /// The value of an entity attribute
    pub fn attribute(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(name.clone(), move |ctx| {
            ctx.entity
                .attribute(&name)
                .ok_or_else(|| anyhow::anyhow!("attribute '{}' is not set", name))
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Evaluate and reject non-finite results
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> FlowResult<f64> {
        let value = (self.eval)(ctx).map_err(|source| FlowError::ExpressionFailed {
            label: self.label.clone(),
            source,
        })?;
        if !value.is_finite() {
            return Err(FlowError::ExpressionFailed {
                label: self.label.clone(),
                source: anyhow::anyhow!("non-finite value {}", value),
            });
        }
        Ok(value)
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Expression").field(&self.label).finish()
    }
}

// ── Action ───────────────────────────────────────────────────────────

/// Side-effecting logic run synchronously against an entity
#[derive(Clone)]
pub struct Action {
    label: String,
    run: Arc<ActionFn>,
}

impl Action {
    pub fn new<F>(label: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut ActionContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            run: Arc::new(run),
        }
    }

    /// Action that overwrites one attribute
    pub fn set_attribute(name: impl Into<String>, value: f64) -> Self {
        let name = name.into();
        Self::new(format!("{} = {}", name, value), move |ctx| {
            ctx.entity.set_attribute(name.clone(), value);
            Ok(())
        })
    }

    /// Action that adds `delta` to an attribute, starting from zero
    pub fn increment(name: impl Into<String>, delta: f64) -> Self {
        let name = name.into();
        Self::new(format!("{} += {}", name, delta), move |ctx| {
            let current = ctx.entity.attribute(&name).unwrap_or(0.0);
            ctx.entity.set_attribute(name.clone(), current + delta);
            Ok(())
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn run(&self, ctx: &mut ActionContext<'_>) -> FlowResult<()> {
        (self.run)(ctx).map_err(|source| FlowError::ActionFailed {
            label: self.label.clone(),
            source,
        })
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Action").field(&self.label).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Acquisition, EntityId};

    fn ctx(entity: &Entity) -> EvalContext<'_> {
        EvalContext {
            entity,
            executor: ExecutorId(0),
            node: FlowId(0),
            now: 0.0,
        }
    }

    #[test]
    fn test_constant_conditions() {
        let entity = Entity::new(EntityId(0), 0.0);
        assert!(Condition::always().evaluate(&ctx(&entity)).unwrap());
        assert!(!Condition::never().evaluate(&ctx(&entity)).unwrap());
    }

    #[test]
    fn test_attribute_condition() {
        let entity = Entity::new(EntityId(0), 0.0).with_attribute("age", 70.0);
        let senior = Condition::attribute_at_least("age", 65.0);
        assert_eq!(senior.label(), "age >= 65");
        assert!(senior.evaluate(&ctx(&entity)).unwrap());

        let missing = Condition::attribute_at_least("bmi", 30.0);
        let err = missing.evaluate(&ctx(&entity)).unwrap_err();
        assert!(matches!(err, FlowError::ConditionFailed { .. }));
    }

    #[test]
    fn test_workgroup_selected() {
        let mut entity = Entity::new(EntityId(0), 0.0);
        let cond = Condition::workgroup_selected(ResourcesId(1), WorkGroupId(2));
        assert!(!cond.evaluate(&ctx(&entity)).unwrap());

        entity.acquisitions.insert(
            ResourcesId(1),
            Acquisition {
                resources_id: ResourcesId(1),
                workgroup: WorkGroupId(2),
                duration: 1.0,
                acquired_at: 0.0,
            },
        );
        assert!(cond.evaluate(&ctx(&entity)).unwrap());
    }

    #[test]
    fn test_expression_rejects_non_finite() {
        let entity = Entity::new(EntityId(0), 0.0);
        assert_eq!(Expression::constant(3.6).evaluate(&ctx(&entity)).unwrap(), 3.6);
        let nan = Expression::new("nan", |_| Ok(f64::NAN));
        assert!(nan.evaluate(&ctx(&entity)).is_err());
    }

    #[test]
    fn test_actions_mutate_entity() {
        let mut entity = Entity::new(EntityId(0), 0.0);
        let mut action_ctx = ActionContext {
            entity: &mut entity,
            executor: ExecutorId(0),
            node: FlowId(0),
            now: 0.0,
        };
        Action::increment("visits", 1.0).run(&mut action_ctx).unwrap();
        Action::increment("visits", 1.0).run(&mut action_ctx).unwrap();
        Action::set_attribute("done", 1.0).run(&mut action_ctx).unwrap();
        assert_eq!(entity.attribute("visits"), Some(2.0));
        assert_eq!(entity.attribute("done"), Some(1.0));
    }

    #[test]
    fn test_failing_action_is_labelled() {
        let mut entity = Entity::new(EntityId(0), 0.0);
        let action = Action::new("explode", |_| anyhow::bail!("boom"));
        let err = action
            .run(&mut ActionContext {
                entity: &mut entity,
                executor: ExecutorId(0),
                node: FlowId(0),
                now: 0.0,
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "Action 'explode' failed: boom");
    }
}

//! Resource pools and workgroup selection
//!
//! The engine only sees two outcomes of a request: granted or deferred.
//! A deferred request is not an error; the requesting executor waits in
//! FIFO order until a release or an explicit availability notice lets the
//! engine retry.

use flowsim_types::{
    EntityId, EvalContext, FlowResult, ResourceNeed, ResourcesId, WorkGroup, WorkGroupId,
};
use std::collections::BTreeMap;

/// One attempt to acquire the resources of a workgroup
#[derive(Clone, Copy, Debug)]
pub struct ResourceRequest<'a> {
    pub entity: EntityId,
    pub resources_id: ResourcesId,
    pub workgroup: WorkGroupId,
    pub needs: &'a [ResourceNeed],
}

/// Outcome of an acquisition attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    Deferred,
}

/// Allocates resources to workgroups
pub trait ResourcePool {
    /// Acquire every need of the request, or nothing
    fn try_acquire(&mut self, request: &ResourceRequest<'_>) -> Acquire;

    /// Return what a granted request took
    fn release(&mut self, request: &ResourceRequest<'_>);
}

/// Named integer capacities. Unknown resource types have no capacity.
#[derive(Clone, Debug, Default)]
pub struct CapacityPool {
    capacity: BTreeMap<String, u32>,
    in_use: BTreeMap<String, u32>,
}

impl CapacityPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, resource_type: impl Into<String>, amount: u32) -> Self {
        self.add_capacity(resource_type, amount);
        self
    }

    /// Grow capacity at run time, e.g. when a shift starts.
    /// Callers should follow up with `notify_resources_available`.
    pub fn add_capacity(&mut self, resource_type: impl Into<String>, amount: u32) {
        let entry = self.capacity.entry(resource_type.into()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    pub fn available(&self, resource_type: &str) -> u32 {
        let capacity = self.capacity.get(resource_type).copied().unwrap_or(0);
        capacity.saturating_sub(self.in_use(resource_type))
    }

    pub fn in_use(&self, resource_type: &str) -> u32 {
        self.in_use.get(resource_type).copied().unwrap_or(0)
    }
}

impl ResourcePool for CapacityPool {
    fn try_acquire(&mut self, request: &ResourceRequest<'_>) -> Acquire {
        // needs may name the same type twice
        let mut wanted: BTreeMap<&str, u32> = BTreeMap::new();
        for need in request.needs {
            let amount = wanted.entry(need.resource_type.as_str()).or_insert(0);
            *amount = amount.saturating_add(need.amount);
        }
        if wanted
            .iter()
            .any(|(resource_type, amount)| self.available(resource_type) < *amount)
        {
            return Acquire::Deferred;
        }
        for (resource_type, amount) in wanted {
            *self.in_use.entry(resource_type.to_string()).or_insert(0) += amount;
        }
        Acquire::Granted
    }

    fn release(&mut self, request: &ResourceRequest<'_>) {
        for need in request.needs {
            if let Some(used) = self.in_use.get_mut(&need.resource_type) {
                *used = used.saturating_sub(need.amount);
            }
        }
    }
}

/// Try the workgroups in priority order and return the first the pool
/// grants. Workgroups whose condition is false are skipped.
pub(crate) fn select_workgroup<'g>(
    workgroups: &'g [WorkGroup],
    resources_id: ResourcesId,
    ctx: &EvalContext<'_>,
    pool: &mut dyn ResourcePool,
) -> FlowResult<Option<&'g WorkGroup>> {
    let mut ordered: Vec<&WorkGroup> = workgroups.iter().collect();
    ordered.sort_by_key(|wg| wg.priority);

    for workgroup in ordered {
        if let Some(condition) = &workgroup.condition {
            if !condition.evaluate(ctx)? {
                continue;
            }
        }
        let request = ResourceRequest {
            entity: ctx.entity.id,
            resources_id,
            workgroup: workgroup.id,
            needs: &workgroup.needs,
        };
        if pool.try_acquire(&request) == Acquire::Granted {
            return Ok(Some(workgroup));
        }
    }
    Ok(None)
}

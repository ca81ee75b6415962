//! Simulated entities and the resources they currently hold

use crate::{EntityId, ResourcesId, SimTime, WorkGroupId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A resource acquisition made by a request node and held until the
/// matching release node runs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Acquisition {
    /// Request/release pair this acquisition belongs to
    pub resources_id: ResourcesId,
    /// Workgroup that satisfied the request
    pub workgroup: WorkGroupId,
    /// Duration sampled for the workgroup when it was chosen
    pub duration: SimTime,
    pub acquired_at: SimTime,
}

/// An entity travelling through the flow graph
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// Numeric attributes read by guards and written by user actions
    #[serde(default)]
    pub attributes: BTreeMap<String, f64>,
    /// Resources held right now, keyed by request identifier
    #[serde(default)]
    pub acquisitions: BTreeMap<ResourcesId, Acquisition>,
    pub created_at: SimTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<SimTime>,
}

impl Entity {
    pub fn new(id: EntityId, created_at: SimTime) -> Self {
        Self {
            id,
            attributes: BTreeMap::new(),
            acquisitions: BTreeMap::new(),
            created_at,
            finished_at: None,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: f64) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<f64> {
        self.attributes.get(name).copied()
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: f64) {
        self.attributes.insert(name.into(), value);
    }

    pub fn acquisition(&self, resources_id: ResourcesId) -> Option<&Acquisition> {
        self.acquisitions.get(&resources_id)
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

//! Duration distributions sampled by delays and workgroups

use crate::{FlowError, FlowResult, ResourcesId, SimTime};
use serde::{Deserialize, Serialize};

/// How long a delay or workgroup takes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Distribution {
    /// Always the same value
    Constant { value: SimTime },
    /// Uniform on `[low, high)`
    Uniform { low: SimTime, high: SimTime },
    /// Exponential with the given mean
    Exponential { mean: SimTime },
    /// The duration fixed when the entity acquired `resources_id`
    WorkGroupDuration { resources_id: ResourcesId },
}

impl Distribution {
    pub fn constant(value: SimTime) -> Self {
        Self::Constant { value }
    }

    pub fn uniform(low: SimTime, high: SimTime) -> Self {
        Self::Uniform { low, high }
    }

    pub fn exponential(mean: SimTime) -> Self {
        Self::Exponential { mean }
    }

    /// Check the parameters describe non-negative durations
    pub fn validate(&self) -> FlowResult<()> {
        let ok = match *self {
            Self::Constant { value } => value.is_finite() && value >= 0.0,
            Self::Uniform { low, high } => {
                low.is_finite() && high.is_finite() && low >= 0.0 && low <= high
            }
            Self::Exponential { mean } => mean.is_finite() && mean > 0.0,
            Self::WorkGroupDuration { .. } => true,
        };
        if ok {
            Ok(())
        } else {
            Err(FlowError::InvalidDistribution(format!("{:?}", self)))
        }
    }

    /// Expected value, when the distribution carries one
    pub fn mean(&self) -> Option<SimTime> {
        match *self {
            Self::Constant { value } => Some(value),
            Self::Uniform { low, high } => Some((low + high) / 2.0),
            Self::Exponential { mean } => Some(mean),
            Self::WorkGroupDuration { .. } => None,
        }
    }
}

//! Forecast horizon: which valid hours a snapshot covers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

/// Valid hours `0..=max_hour` at a fixed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForecastHorizon {
    pub max_hour: u32,
    pub step: u32,
}

impl ForecastHorizon {
    pub fn new(max_hour: u32, step: u32) -> CommonResult<Self> {
        if step == 0 {
            return Err(CommonError::InvalidHorizon("step must be at least 1".into()));
        }
        if max_hour % step != 0 {
            return Err(CommonError::InvalidHorizon(format!(
                "max hour {} is not a multiple of step {}",
                max_hour, step
            )));
        }
        Ok(Self { max_hour, step })
    }

    pub fn valid_hours(&self) -> Vec<u32> {
        (0..=self.max_hour).step_by(self.step.max(1) as usize).collect()
    }

    pub fn len(&self) -> usize {
        (self.max_hour / self.step.max(1)) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, hour: u32) -> bool {
        hour <= self.max_hour && hour % self.step.max(1) == 0
    }

    /// Stable label used in manifests and logs, e.g. `72h-step1`.
    pub fn label(&self) -> String {
        format!("{}h-step{}", self.max_hour, self.step)
    }
}

impl Default for ForecastHorizon {
    fn default() -> Self {
        Self {
            max_hour: 72,
            step: 1,
        }
    }
}

impl fmt::Display for ForecastHorizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::context::primary_window_key;
use super::period::ReferencePeriod;
use super::significance::SignificanceConfig;
use super::window::WindowSpec;
use crate::error::{EngineError, EngineResult};

/// One configured insight: which metric, which comparisons, when to publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightTemplate {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub metric_id: String,
    #[serde(default)]
    pub reference_period: ReferencePeriod,
    pub windows: Vec<WindowSpec>,
    pub significance: SignificanceConfig,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl InsightTemplate {
    pub fn validate(&self) -> EngineResult<()> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(EngineError::invalid_window("template id must not be blank"));
        }
        if self.metric_id.trim().is_empty() {
            return Err(EngineError::invalid_window(format!(
                "template {id}: metric_id must not be blank"
            )));
        }
        if self.windows.is_empty() {
            return Err(EngineError::invalid_window(format!(
                "template {id}: at least one window is required"
            )));
        }

        let mut keys = HashSet::new();
        for window in &self.windows {
            window.validate().map_err(|err| match err {
                EngineError::InvalidWindowSpec { reason } => {
                    EngineError::invalid_window(format!("template {id}: {reason}"))
                }
                other => other,
            })?;
            let key = window.label();
            if !keys.insert(key.clone()) {
                return Err(EngineError::invalid_window(format!(
                    "template {id}: duplicate window key {key}"
                )));
            }
        }

        self.significance.validate().map_err(|err| match err {
            EngineError::InvalidWindowSpec { reason } => {
                EngineError::invalid_window(format!("template {id}: {reason}"))
            }
            other => other,
        })?;
        let primary = primary_window_key(&self.windows, &self.significance);
        if !keys.contains(&primary) {
            return Err(EngineError::invalid_window(format!(
                "template {id}: significance window {primary} is not configured"
            )));
        }
        Ok(())
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ExportError;

pub const MAX_CONSOLIDATION_WORKERS: usize = 16;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Upper bound on threads used for node consolidation. 1 = sequential.
    pub consolidation_workers: usize,
    pub propane: PropaneConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            consolidation_workers: 1,
            propane: PropaneConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Propane
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PropaneConfig {
    /// The single station that sells propane.
    pub station_id: String,
    /// Raw fuel grade carrying propane litres.
    pub grade_id: u32,
    pub write_mode: PropaneWriteMode,
    /// Dispenser id -> tank id.
    pub tanks: BTreeMap<String, u32>,
}

impl Default for PropaneConfig {
    fn default() -> Self {
        let tanks = [
            ("56e7593f982d82eeff262cd5".to_string(), 475),
            ("56e7593f982d82eeff262cd6".to_string(), 476),
        ]
        .into_iter()
        .collect();
        Self {
            station_id: "56cf1815982d82b0f3000012".into(),
            grade_id: 6,
            write_mode: PropaneWriteMode::Insert,
            tanks,
        }
    }
}

impl PropaneConfig {
    /// Tank for a dispenser. Unknown dispensers map to tank 0.
    pub fn tank_for(&self, dispenser_id: &str) -> u32 {
        self.tanks.get(dispenser_id).copied().unwrap_or(0)
    }
}

/// How propane export rows reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropaneWriteMode {
    /// Plain insert. Re-running an overlapping range duplicates rows.
    #[default]
    Insert,
    /// Keyed on `{date}-{tank}`, same discipline as fuel exports.
    Upsert,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl PipelineConfig {
    pub fn from_toml(input: &str) -> Result<Self, ExportError> {
        let config: PipelineConfig =
            toml::from_str(input).map_err(|e| ExportError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ExportError> {
        if self.consolidation_workers == 0 || self.consolidation_workers > MAX_CONSOLIDATION_WORKERS
        {
            return Err(ExportError::ConfigValidation(format!(
                "consolidation_workers must be between 1 and {MAX_CONSOLIDATION_WORKERS}, got {}",
                self.consolidation_workers
            )));
        }

        let propane = &self.propane;
        if propane.station_id.trim().is_empty() {
            return Err(ExportError::ConfigValidation(
                "propane.station_id must not be empty".into(),
            ));
        }
        if !(1..=6).contains(&propane.grade_id) {
            return Err(ExportError::ConfigValidation(format!(
                "propane.grade_id must be between 1 and 6, got {}",
                propane.grade_id
            )));
        }
        // Tank 0 is what unknown dispensers resolve to.
        if let Some((dispenser, _)) = propane.tanks.iter().find(|(_, tank)| **tank == 0) {
            return Err(ExportError::ConfigValidation(format!(
                "propane.tanks: dispenser '{dispenser}' maps to reserved tank 0"
            )));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

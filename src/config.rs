use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::services::insights::season::SeasonMapping;
use crate::services::insights::template::InsightTemplate;

pub const CONFIG_PATH_ENV: &str = "INSIGHT_ENGINE_CONFIG";
const DEFAULT_MAX_PARALLEL: usize = 4;

/// Config file location: CLI flag first, then `INSIGHT_ENGINE_CONFIG`.
pub fn config_path(cli_path: Option<PathBuf>) -> Option<PathBuf> {
    cli_path
        .filter(|path| !path.as_os_str().is_empty())
        .or_else(|| env_optional_path(CONFIG_PATH_ENV))
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    #[serde(default)]
    data_path: Option<String>,
    #[serde(default)]
    max_parallel: Option<usize>,
    #[serde(default)]
    min_sample_size: Option<usize>,
    #[serde(default)]
    seasons: Option<BTreeMap<String, Vec<u32>>>,
    #[serde(default)]
    templates: Vec<JsonValue>,
}

/// Environment overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub data_path: Option<PathBuf>,
    pub max_parallel: Option<usize>,
    pub min_sample_size: Option<usize>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            data_path: env_optional_path("INSIGHT_ENGINE_DATA_PATH"),
            max_parallel: env_optional_usize("INSIGHT_ENGINE_MAX_PARALLEL"),
            min_sample_size: env_optional_usize("INSIGHT_ENGINE_MIN_SAMPLE_SIZE"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_path: Option<PathBuf>,
    pub max_parallel: usize,
    pub seasons: SeasonMapping,
    pub templates: Vec<InsightTemplate>,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let config = Self::parse(&contents, base_dir, &EnvOverrides::from_env())
            .with_context(|| format!("invalid config file {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            templates = config.templates.len(),
            max_parallel = config.max_parallel,
            "loaded insight engine config"
        );
        Ok(config)
    }

    /// Parses and validates a config document. Relative data paths resolve
    /// against `base_dir`.
    pub fn parse(contents: &str, base_dir: &Path, overrides: &EnvOverrides) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(contents).context("failed to parse config JSON")?;

        let seasons = match raw.seasons.as_ref() {
            Some(groups) => SeasonMapping::from_groups(groups).context("invalid season mapping")?,
            None => SeasonMapping::default(),
        };

        let default_min_sample_size = overrides.min_sample_size.or(raw.min_sample_size);
        let mut templates = Vec::with_capacity(raw.templates.len());
        let mut ids = HashSet::new();
        for (idx, mut value) in raw.templates.into_iter().enumerate() {
            if let Some(min) = default_min_sample_size {
                apply_default_min_sample_size(&mut value, min);
            }
            let template: InsightTemplate = serde_json::from_value(value)
                .with_context(|| format!("invalid template at index {idx}"))?;
            template.validate()?;
            if !ids.insert(template.id.clone()) {
                anyhow::bail!("duplicate template id {}", template.id);
            }
            templates.push(template);
        }

        let data_path = overrides.data_path.clone().or_else(|| {
            raw.data_path
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| base_dir.join(v))
        });
        let max_parallel = overrides
            .max_parallel
            .or(raw.max_parallel)
            .unwrap_or(DEFAULT_MAX_PARALLEL)
            .max(1);

        Ok(Self {
            data_path,
            max_parallel,
            seasons,
            templates,
        })
    }

    pub fn template(&self, id: &str) -> Option<&InsightTemplate> {
        self.templates.iter().find(|template| template.id == id)
    }
}

fn apply_default_min_sample_size(template: &mut JsonValue, min: usize) {
    let Some(significance) = template
        .get_mut("significance")
        .and_then(JsonValue::as_object_mut)
    else {
        return;
    };
    significance
        .entry("min_sample_size")
        .or_insert_with(|| JsonValue::from(min));
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_optional_path(key: &str) -> Option<PathBuf> {
    env_optional_string(key).map(PathBuf::from)
}

fn env_optional_usize(key: &str) -> Option<usize> {
    env_optional_string(key).and_then(|value| value.parse::<usize>().ok())
}

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{Feature, Generation, Severity, trash_controls};
use crate::error::KiraError;
use crate::namer::NamingPolicy;

/// Immutable fetch configuration. Use [`QuickSettings::using`] to derive a modified copy.
#[derive(Debug, Clone, PartialEq)]
pub struct QuickSettings {
    pub feature: Feature,
    pub generation: Generation,
    /// Ceiling on run time for expression queries; required to use them.
    pub as_of: Option<DateTime<Utc>>,
    pub enable_checks: bool,
    pub auto_fix: bool,
    pub discard_controls: BTreeSet<String>,
    pub well_namer: NamingPolicy,
    pub min_log_severity: Severity,
}

impl QuickSettings {
    /// Defaults for `generation`, using its preferred feature.
    pub fn for_generation(generation: Generation, as_of: Option<DateTime<Utc>>) -> Self {
        if let Some(as_of) = as_of
            && as_of > Utc::now()
        {
            warn!("as_of is set in the future: {as_of}");
        }
        Self {
            feature: generation.preferred_feature(),
            generation,
            as_of,
            enable_checks: true,
            auto_fix: true,
            discard_controls: trash_controls().into_iter().collect(),
            well_namer: NamingPolicy::default(),
            min_log_severity: Severity::Caution,
        }
    }

    pub fn pointgrey(as_of: Option<DateTime<Utc>>) -> Self {
        Self::for_generation(Generation::Pointgrey, as_of)
    }

    pub fn legacy_pike_sauronx(as_of: Option<DateTime<Utc>>) -> Self {
        Self::for_generation(Generation::PikeSauronx, as_of)
    }

    pub fn legacy_pike_legacy(as_of: Option<DateTime<Utc>>) -> Self {
        Self::for_generation(Generation::PikeLegacy, as_of)
    }

    pub fn legacy_pike_mgh(as_of: Option<DateTime<Utc>>) -> Self {
        Self::for_generation(Generation::PikeMgh, as_of)
    }

    pub fn using(&self) -> SettingsBuilder {
        SettingsBuilder {
            settings: self.clone(),
        }
    }
}

/// Copy of a [`QuickSettings`] with selected fields replaced.
#[derive(Debug, Clone)]
pub struct SettingsBuilder {
    settings: QuickSettings,
}

impl SettingsBuilder {
    pub fn feature(mut self, feature: Feature) -> Self {
        self.settings.feature = feature;
        self
    }

    pub fn generation(mut self, generation: Generation) -> Self {
        self.settings.generation = generation;
        self
    }

    pub fn as_of(mut self, as_of: Option<DateTime<Utc>>) -> Self {
        self.settings.as_of = as_of;
        self
    }

    pub fn enable_checks(mut self, enable: bool) -> Self {
        self.settings.enable_checks = enable;
        self
    }

    pub fn auto_fix(mut self, enable: bool) -> Self {
        self.settings.auto_fix = enable;
        self
    }

    pub fn discard_controls(mut self, controls: BTreeSet<String>) -> Self {
        self.settings.discard_controls = controls;
        self
    }

    pub fn well_namer(mut self, namer: NamingPolicy) -> Self {
        self.settings.well_namer = namer;
        self
    }

    pub fn min_log_severity(mut self, severity: Severity) -> Self {
        self.settings.min_log_severity = severity;
        self
    }

    pub fn build(self) -> QuickSettings {
        self.settings
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub generation: Option<String>,
    #[serde(default)]
    pub feature: Option<String>,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
    #[serde(default)]
    pub enable_checks: Option<bool>,
    #[serde(default)]
    pub auto_fix: Option<bool>,
    #[serde(default)]
    pub discard_controls: Option<Vec<String>>,
    #[serde(default)]
    pub well_namer: Option<String>,
    #[serde(default)]
    pub min_log_severity: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub settings: QuickSettings,
    pub cache_dir: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("kira-wf.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(KiraError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let generation = match config.generation {
            Some(value) => value.parse()?,
            None => Generation::Pointgrey,
        };
        let mut builder = QuickSettings::for_generation(generation, config.as_of).using();
        if let Some(feature) = config.feature {
            builder = builder.feature(feature.parse()?);
        }
        if let Some(enable) = config.enable_checks {
            builder = builder.enable_checks(enable);
        }
        if let Some(enable) = config.auto_fix {
            builder = builder.auto_fix(enable);
        }
        if let Some(controls) = config.discard_controls {
            builder = builder.discard_controls(controls.into_iter().collect());
        }
        if let Some(namer) = config.well_namer {
            builder = builder.well_namer(namer.parse()?);
        }
        if let Some(severity) = config.min_log_severity {
            builder = builder.min_log_severity(severity.parse()?);
        }

        Ok(ResolvedConfig {
            settings: builder.build(),
            cache_dir: config.cache_dir,
        })
    }
}

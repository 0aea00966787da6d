use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{MIN_BOX_SIZE, Severity};

const APP_DIR: &str = "damage-review";

/// Log level setting for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to log crate's LevelFilter.
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// One inspection section, in review order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDef {
    pub id: String,
    pub name: String,
}

/// Reviewer configuration, loaded from JSON. Every field has a default so a
/// missing or partial file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewConfig {
    #[serde(default = "default_reviewer_id")]
    pub reviewer_id: String,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub log_level: LogLevel,

    /// Smallest accepted box side, in image pixels.
    #[serde(default = "default_min_box_size")]
    pub min_box_size: f64,

    /// Zoom change per wheel notch.
    #[serde(default = "default_zoom_step")]
    pub zoom_step: f64,

    #[serde(default = "default_manual_damage_type")]
    pub manual_damage_type: String,

    #[serde(default = "default_manual_severity")]
    pub manual_severity: Severity,

    /// Fixed section order. Section and part ids are free-form strings; this
    /// only orders and names the ones a report uses.
    #[serde(default = "default_sections")]
    pub sections: Vec<SectionDef>,
}

fn default_reviewer_id() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "reviewer".to_string())
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("review.db")
}

fn default_min_box_size() -> f64 {
    MIN_BOX_SIZE
}

fn default_zoom_step() -> f64 {
    crate::canvas::DEFAULT_ZOOM_STEP
}

fn default_manual_damage_type() -> String {
    "manual".to_string()
}

fn default_manual_severity() -> Severity {
    Severity::MODERATE
}

fn default_sections() -> Vec<SectionDef> {
    [
        ("exterior", "Exterior"),
        ("glass", "Glass"),
        ("tires", "Wheels & Tires"),
        ("interior", "Interior"),
        ("underbody", "Underbody"),
    ]
    .into_iter()
    .map(|(id, name)| SectionDef {
        id: id.to_string(),
        name: name.to_string(),
    })
    .collect()
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            reviewer_id: default_reviewer_id(),
            database_path: default_database_path(),
            log_level: LogLevel::default(),
            min_box_size: default_min_box_size(),
            zoom_step: default_zoom_step(),
            manual_damage_type: default_manual_damage_type(),
            manual_severity: default_manual_severity(),
            sections: default_sections(),
        }
    }
}

impl ReviewConfig {
    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.json"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: ReviewConfig = serde_json::from_str(text)?;
        Ok(config)
    }

    /// Log file used while the terminal UI owns the screen.
    pub fn log_path(&self) -> PathBuf {
        self.database_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
            .join("damage-review.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = ReviewConfig::from_json("{}").unwrap();
        assert_eq!(config.min_box_size, MIN_BOX_SIZE);
        assert_eq!(config.manual_severity.value(), 3);
        assert_eq!(config.sections[0].id, "exterior");
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn partial_config_overrides_fields() {
        let config = ReviewConfig::from_json(
            r#"{"reviewer_id": "alice", "log_level": "debug",
                "sections": [{"id": "tires", "name": "Tires"}]}"#,
        )
        .unwrap();
        assert_eq!(config.reviewer_id, "alice");
        assert_eq!(config.log_level.to_level_filter(), log::LevelFilter::Debug);
        assert_eq!(config.sections.len(), 1);
    }

    #[test]
    fn out_of_range_severity_is_rejected() {
        assert!(ReviewConfig::from_json(r#"{"manual_severity": 8}"#).is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReviewConfig::load(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(config.zoom_step, crate::canvas::DEFAULT_ZOOM_STEP);
    }

    #[test]
    fn log_file_sits_next_to_database() {
        let config = ReviewConfig {
            database_path: PathBuf::from("/tmp/reviews/review.db"),
            ..ReviewConfig::default()
        };
        assert_eq!(config.log_path(), PathBuf::from("/tmp/reviews/damage-review.log"));
    }
}

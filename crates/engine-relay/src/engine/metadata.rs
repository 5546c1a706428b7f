//! Best-effort metadata scraping from engine diagnostic output.
//!
//! Engines print their backend, network and version on stderr while loading. Each line is
//! run through a fixed set of patterns; whatever matches becomes a partial update that is
//! merged over the engine's current record. Nothing here can fail.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref BACKEND: Regex = Regex::new(r"(?i)backend\s*(.*)thread").unwrap();
    static ref MODEL_NAME: Regex = Regex::new(r"(?i)Model name:\s*([\w\-.]+)").unwrap();
    static ref MODEL_VERSION: Regex = Regex::new(r"(?i)Model version\s*(\d+)").unwrap();
    static ref ENGINE_VERSION: Regex = Regex::new(r"(?i)KataGo v(\d+\.\d+\.\d+)").unwrap();
}

/// Everything observed so far about one engine. Fields stay `None` until first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineMetadata {
    pub backend: Option<String>,
    pub model_name: Option<String>,
    pub model_version: Option<u32>,
    pub engine_version: Option<String>,
}

/// Fields extracted from a single diagnostic line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub backend: Option<String>,
    pub model_name: Option<String>,
    pub model_version: Option<u32>,
    pub engine_version: Option<String>,
}

impl EngineMetadata {
    /// Later observations win; fields absent from `update` are left alone.
    pub fn merge(&mut self, update: MetadataUpdate) {
        if let Some(backend) = update.backend {
            self.backend = Some(backend);
        }
        if let Some(name) = update.model_name {
            self.model_name = Some(name);
        }
        if let Some(version) = update.model_version {
            self.model_version = Some(version);
        }
        if let Some(version) = update.engine_version {
            self.engine_version = Some(version);
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == EngineMetadata::default()
    }
}

/// Apply every rule to `line`. Returns `None` when nothing matched.
pub fn parse_line(line: &str) -> Option<MetadataUpdate> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let update = MetadataUpdate {
        backend: BACKEND
            .captures(line)
            .map(|c| c[1].trim().to_string()),
        model_name: MODEL_NAME.captures(line).map(|c| c[1].to_string()),
        model_version: MODEL_VERSION
            .captures(line)
            .and_then(|c| c[1].parse().ok()),
        engine_version: ENGINE_VERSION.captures(line).map(|c| c[1].to_string()),
    };

    if update == MetadataUpdate::default() {
        None
    } else {
        Some(update)
    }
}

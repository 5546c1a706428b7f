//! Static engine definitions and the startup registry.
//!
//! Each definition names an executable, a model file and an analysis config. Paths default
//! to a layout derived from the engine name under the engines directory and can be
//! overridden one by one.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{EngineError, Result};

/// Built-in layout for the stock difficulty levels: (name, directory, weight file).
const KNOWN_LAYOUTS: &[(&str, &str, &str)] = &[
    ("easy", "easy_b6", "kata1-b6c96-s50894592-d7380655.txt.gz"),
    ("normal", "normal_b10", "kata1-b6c96-s175395328-d26788732.txt.gz"),
    ("hard", "hard_b18", "kata1-b10c128-s1141046784-d204142634.txt.gz"),
];

const FALLBACK_MODEL_FILE: &str = "model.txt.gz";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineDefinition {
    pub name: String,
    pub executable: PathBuf,
    pub model: PathBuf,
    pub config: PathBuf,
}

impl EngineDefinition {
    /// Definition with every path derived from `name` under `engines_dir`.
    pub fn with_defaults(name: &str, engines_dir: &Path) -> Self {
        let (dir, file) = KNOWN_LAYOUTS
            .iter()
            .find(|(known, _, _)| *known == name)
            .map(|(_, dir, file)| (dir.to_string(), file.to_string()))
            .unwrap_or_else(|| (name.to_string(), FALLBACK_MODEL_FILE.to_string()));

        let engine_dir = engines_dir.join(dir);
        Self {
            name: name.to_string(),
            executable: engines_dir.join("bin").join("katago"),
            model: engine_dir.join("weights").join(file),
            config: engine_dir.join("analysis.cfg"),
        }
    }

    /// Fixed argument set for analysis mode.
    pub fn analysis_args(&self) -> Vec<OsString> {
        vec![
            OsString::from("analysis"),
            OsString::from("-model"),
            self.model.clone().into_os_string(),
            OsString::from("-config"),
            self.config.clone().into_os_string(),
        ]
    }

    /// Locate the executable: the configured path, the same path with `.exe` on Windows,
    /// then the bare file name on `PATH`.
    pub fn resolve_executable(&self) -> Option<PathBuf> {
        if self.executable.is_file() {
            return Some(self.executable.clone());
        }

        if cfg!(windows) {
            let mut with_ext = self.executable.clone().into_os_string();
            with_ext.push(".exe");
            let with_ext = PathBuf::from(with_ext);
            if with_ext.is_file() {
                return Some(with_ext);
            }
        }

        self.executable
            .file_name()
            .and_then(|bare| which::which(bare).ok())
    }

    /// Check that config, model and executable are all present.
    ///
    /// Returns the resolved executable path to launch.
    pub fn validate(&self) -> Result<PathBuf> {
        if !self.config.is_file() {
            return Err(self.missing("config", &self.config));
        }
        if !self.model.is_file() {
            return Err(self.missing("model", &self.model));
        }
        self.resolve_executable()
            .ok_or_else(|| self.missing("executable", &self.executable))
    }

    fn missing(&self, kind: &'static str, path: &Path) -> EngineError {
        EngineError::MissingFile {
            name: self.name.clone(),
            kind,
            path: path.to_path_buf(),
        }
    }

    pub fn log_paths(&self, resolved: Option<&Path>) {
        let exe = resolved.unwrap_or(&self.executable);
        info!("[{}] exe={}", self.name, exe.display());
        info!("[{}] model={}", self.name, self.model.display());
        info!("[{}] cfg={}", self.name, self.config.display());
    }
}

/// Ordered set of engine definitions, unique by name.
#[derive(Debug, Clone, Default)]
pub struct EngineRegistry {
    definitions: Vec<EngineDefinition>,
}

impl EngineRegistry {
    pub fn new(definitions: Vec<EngineDefinition>) -> Self {
        let mut unique: Vec<EngineDefinition> = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if unique.iter().any(|d| d.name == definition.name) {
                warn!("Duplicate engine definition '{}' ignored", definition.name);
                continue;
            }
            unique.push(definition);
        }
        Self { definitions: unique }
    }

    pub fn get(&self, name: &str) -> Option<&EngineDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.definitions.iter().map(|d| d.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EngineDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_known_layout_defaults() {
        let def = EngineDefinition::with_defaults("hard", Path::new("/srv/engines"));
        assert_eq!(def.executable, PathBuf::from("/srv/engines/bin/katago"));
        assert_eq!(
            def.model,
            PathBuf::from("/srv/engines/hard_b18/weights/kata1-b10c128-s1141046784-d204142634.txt.gz")
        );
        assert_eq!(def.config, PathBuf::from("/srv/engines/hard_b18/analysis.cfg"));
    }

    #[test]
    fn test_unknown_name_uses_name_as_directory() {
        let def = EngineDefinition::with_defaults("b40", Path::new("engines"));
        assert_eq!(def.model, PathBuf::from("engines/b40/weights/model.txt.gz"));
        assert_eq!(def.config, PathBuf::from("engines/b40/analysis.cfg"));
    }

    #[test]
    fn test_analysis_args_point_at_model_and_config() {
        let def = EngineDefinition::with_defaults("easy", Path::new("e"));
        let args: Vec<String> = def
            .analysis_args()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "analysis");
        assert_eq!(args[1], "-model");
        assert!(args[2].ends_with("kata1-b6c96-s50894592-d7380655.txt.gz"));
        assert_eq!(args[3], "-config");
        assert!(args[4].ends_with("analysis.cfg"));
    }

    #[test]
    fn test_validate_reports_missing_config_first() {
        let dir = TempDir::new().unwrap();
        let def = EngineDefinition::with_defaults("easy", dir.path());
        match def.validate() {
            Err(EngineError::MissingFile { kind, .. }) => assert_eq!(kind, "config"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_validate_reports_missing_model() {
        let dir = TempDir::new().unwrap();
        let def = EngineDefinition::with_defaults("easy", dir.path());
        touch(&def.config);
        match def.validate() {
            Err(EngineError::MissingFile { kind, .. }) => assert_eq!(kind, "model"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_validate_resolves_existing_executable() {
        let dir = TempDir::new().unwrap();
        let mut def = EngineDefinition::with_defaults("easy", dir.path());
        def.executable = dir.path().join("bin").join("relay-test-engine-binary");
        touch(&def.config);
        touch(&def.model);
        assert!(def.validate().is_err());

        touch(&def.executable);
        assert_eq!(def.validate().unwrap(), def.executable);
    }

    #[test]
    fn test_registry_drops_duplicates() {
        let base = Path::new("engines");
        let registry = EngineRegistry::new(vec![
            EngineDefinition::with_defaults("easy", base),
            EngineDefinition::with_defaults("hard", base),
            EngineDefinition::with_defaults("easy", Path::new("other")),
        ]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["easy".to_string(), "hard".to_string()]);
        assert_eq!(
            registry.get("easy").unwrap().executable,
            PathBuf::from("engines/bin/katago")
        );
    }
}

// engine-relay/crates/engine-relay/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::analysis::AnalysisDefaults;
use crate::bootstrap::DEFAULT_MIRRORS;
use crate::engine::{EngineDefinition, EngineRegistry, SupervisorSettings, WarmupSettings};
use crate::router::{FallbackSettings, ReadinessGate};

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub engines_dir: PathBuf,
    pub engines: Vec<EngineDefinition>,
    pub priority: Vec<String>,
    pub default_engine: String,
    pub request_timeout_ms: u64,
    pub restart_delay_ms: u64,
    pub warmup_schedule_ms: Vec<u64>,
    pub warmup_timeout_ms: u64,
    pub readiness_gate: ReadinessGate,
    pub retry_after_seconds: u64,
    pub default_rules: String,
    pub default_komi: f64,
    pub default_max_visits: u32,
    pub body_limit_bytes: usize,
    pub static_dir: Option<PathBuf>,
    pub bootstrap_weights: bool,
    pub weight_mirrors: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let text = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let engines_dir = PathBuf::from(text("ENGINES_DIR", "./engines"));

        let names = name_list(&text("ENGINE_NAMES", "easy,normal,hard"));
        if names.is_empty() {
            anyhow::bail!("ENGINE_NAMES must name at least one engine");
        }

        let engines = names
            .iter()
            .map(|name| {
                let mut def = EngineDefinition::with_defaults(name, &engines_dir);
                let prefix = format!("KATAGO_{}", name.to_uppercase().replace('-', "_"));
                if let Some(exe) = get(&format!("{}_EXE", prefix)) {
                    def.executable = PathBuf::from(exe);
                }
                if let Some(model) = get(&format!("{}_MODEL", prefix)) {
                    def.model = PathBuf::from(model);
                }
                if let Some(cfg) = get(&format!("{}_CFG", prefix)) {
                    def.config = PathBuf::from(cfg);
                }
                def
            })
            .collect();

        let priority = name_list(&text("ENGINE_PRIORITY", "hard,normal,easy"));
        let default_engine = text("DEFAULT_ENGINE", "normal").to_lowercase();

        let warmup_schedule_ms = text("ENGINE_WARMUP_SCHEDULE_MS", "1000,2000,4000,8000,12000")
            .split(',')
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(|v| v.parse::<u64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("ENGINE_WARMUP_SCHEDULE_MS must be a comma-separated list of milliseconds")?;

        let weight_mirrors = match get("WEIGHT_MIRRORS") {
            Some(list) => list
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
            None => DEFAULT_MIRRORS.iter().map(|m| m.to_string()).collect(),
        };

        Ok(Self {
            api_host: text("HOST", "0.0.0.0"),
            api_port: number(&get, "PORT", "5173")?,
            engines_dir,
            engines,
            priority,
            default_engine,
            request_timeout_ms: number(&get, "ENGINE_REQUEST_TIMEOUT_MS", "30000")?,
            restart_delay_ms: number(&get, "ENGINE_RESTART_DELAY_MS", "1500")?,
            warmup_schedule_ms,
            warmup_timeout_ms: number(&get, "ENGINE_WARMUP_TIMEOUT_MS", "10000")?,
            readiness_gate: text("ENGINE_READINESS_GATE", "opportunistic")
                .parse::<ReadinessGate>()
                .context("ENGINE_READINESS_GATE")?,
            retry_after_seconds: number(&get, "RETRY_AFTER_SECONDS", "2")?,
            default_rules: text("DEFAULT_RULES", "japanese"),
            default_komi: number(&get, "DEFAULT_KOMI", "6.5")?,
            default_max_visits: number(&get, "DEFAULT_MAX_VISITS", "128")?,
            body_limit_bytes: number(&get, "BODY_LIMIT_BYTES", "2097152")?,
            static_dir: get("STATIC_DIR").map(PathBuf::from),
            bootstrap_weights: flag(&get, "BOOTSTRAP_WEIGHTS")?,
            weight_mirrors,
        })
    }

    pub fn registry(&self) -> EngineRegistry {
        EngineRegistry::new(self.engines.clone())
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            restart_delay: Duration::from_millis(self.restart_delay_ms),
            warmup: WarmupSettings {
                schedule: self
                    .warmup_schedule_ms
                    .iter()
                    .copied()
                    .map(Duration::from_millis)
                    .collect(),
                timeout: Duration::from_millis(self.warmup_timeout_ms),
                ..WarmupSettings::default()
            },
        }
    }

    pub fn fallback_settings(&self) -> FallbackSettings {
        FallbackSettings {
            priority: self.priority.clone(),
            default_engine: self.default_engine.clone(),
            gate: self.readiness_gate,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub fn analysis_defaults(&self) -> AnalysisDefaults {
        AnalysisDefaults {
            rules: self.default_rules.clone(),
            komi: self.default_komi,
            max_visits: self.default_max_visits,
        }
    }

    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_seconds)
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Engines Dir: {}", self.engines_dir.display());
        info!(
            "- Engines: {}",
            self.engines
                .iter()
                .map(|e| e.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        info!("- Priority: {}", self.priority.join(" > "));
        info!("- Default Engine: {}", self.default_engine);
        info!("- Request Timeout: {}ms", self.request_timeout_ms);
        info!("- Restart Delay: {}ms", self.restart_delay_ms);
        info!("- Warmup Schedule: {:?}ms", self.warmup_schedule_ms);
        info!("- Readiness Gate: {:?}", self.readiness_gate);
        info!("- Static Dir: {}", display_opt(self.static_dir.as_deref()));
        info!("- Bootstrap Weights: {}", self.bootstrap_weights);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid listen address {}:{}", self.api_host, self.api_port))
    }
}

fn name_list(raw: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in raw.split(',').map(|n| n.trim().to_lowercase()) {
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn number<T, G>(get: &G, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .unwrap_or_else(|| default.to_string())
        .parse::<T>()
        .with_context(|| format!("{} must be a number", key))
}

fn flag<G>(get: &G, key: &str) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_lowercase()).as_deref() {
        None | Some("0") | Some("false") | Some("no") | Some("off") => Ok(false),
        Some("1") | Some("true") | Some("yes") | Some("on") => Ok(true),
        Some(other) => Err(anyhow::anyhow!("{} must be a boolean, got '{}'", key, other)),
    }
}

fn display_opt(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "(none)".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    // ===== Defaults =====

    #[test]
    fn test_defaults_without_any_variables() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.api_host, "0.0.0.0");
        assert_eq!(config.api_port, 5173);
        assert_eq!(config.engines_dir, PathBuf::from("./engines"));
        assert_eq!(
            config.engines.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["easy", "normal", "hard"]
        );
        assert_eq!(config.priority, vec!["hard", "normal", "easy"]);
        assert_eq!(config.default_engine, "normal");
        assert_eq!(config.request_timeout_ms, 30000);
        assert_eq!(config.restart_delay_ms, 1500);
        assert_eq!(config.warmup_schedule_ms, vec![1000, 2000, 4000, 8000, 12000]);
        assert_eq!(config.readiness_gate, ReadinessGate::Opportunistic);
        assert_eq!(config.retry_after_seconds, 2);
        assert_eq!(config.default_komi, 6.5);
        assert_eq!(config.body_limit_bytes, 2 * 1024 * 1024);
        assert!(config.static_dir.is_none());
        assert!(!config.bootstrap_weights);
        assert_eq!(config.weight_mirrors.len(), DEFAULT_MIRRORS.len());
    }

    #[test]
    fn test_engine_paths_derive_from_name() {
        let config = config_from(&[("ENGINES_DIR", "/opt/engines")]).unwrap();
        let hard = &config.engines[2];
        assert_eq!(hard.executable, PathBuf::from("/opt/engines/bin/katago"));
        assert_eq!(hard.config, PathBuf::from("/opt/engines/hard_b18/analysis.cfg"));
    }

    // ===== Overrides =====

    #[test]
    fn test_per_engine_overrides() {
        let config = config_from(&[
            ("ENGINE_NAMES", "easy, Hard ,easy"),
            ("KATAGO_HARD_EXE", "/usr/local/bin/katago-cuda"),
            ("KATAGO_HARD_MODEL", "/models/b18.bin.gz"),
        ])
        .unwrap();

        assert_eq!(config.engines.len(), 2);
        let hard = &config.engines[1];
        assert_eq!(hard.name, "hard");
        assert_eq!(hard.executable, PathBuf::from("/usr/local/bin/katago-cuda"));
        assert_eq!(hard.model, PathBuf::from("/models/b18.bin.gz"));
        assert_eq!(hard.config, PathBuf::from("./engines/hard_b18/analysis.cfg"));
        assert_eq!(config.engines[0].executable, PathBuf::from("./engines/bin/katago"));
    }

    #[test]
    fn test_gate_and_schedule_overrides() {
        let config = config_from(&[
            ("ENGINE_READINESS_GATE", "require_ready"),
            ("ENGINE_WARMUP_SCHEDULE_MS", "10, 20,40"),
            ("ENGINE_RESTART_DELAY_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.readiness_gate, ReadinessGate::RequireReady);
        let settings = config.supervisor_settings();
        assert_eq!(settings.restart_delay, Duration::from_millis(250));
        assert_eq!(
            settings.warmup.schedule,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40)
            ]
        );
        assert_eq!(config.fallback_settings().gate, ReadinessGate::RequireReady);
    }

    // ===== Errors =====

    #[test]
    fn test_invalid_numbers_are_errors() {
        assert!(config_from(&[("PORT", "eighty")]).is_err());
        assert!(config_from(&[("ENGINE_REQUEST_TIMEOUT_MS", "-1")]).is_err());
        assert!(config_from(&[("ENGINE_WARMUP_SCHEDULE_MS", "1000,soon")]).is_err());
        assert!(config_from(&[("ENGINE_READINESS_GATE", "eventually")]).is_err());
        assert!(config_from(&[("BOOTSTRAP_WEIGHTS", "maybe")]).is_err());
    }

    #[test]
    fn test_empty_engine_list_is_rejected() {
        assert!(config_from(&[("ENGINE_NAMES", " , ")]).is_err());
    }

    // ===== API Address =====

    #[test]
    fn test_api_addr_parsing() {
        let config = config_from(&[("HOST", "127.0.0.1"), ("PORT", "8000")]).unwrap();
        let addr = config.api_addr().unwrap();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 8000);
    }

    #[test]
    fn test_api_addr_rejects_hostnames() {
        let config = config_from(&[("HOST", "not a host")]).unwrap();
        assert!(config.api_addr().is_err());
    }

    #[test]
    fn test_mirror_list_override() {
        let config = config_from(&[
            ("BOOTSTRAP_WEIGHTS", "true"),
            ("WEIGHT_MIRRORS", "https://a.example/w.gz, https://b.example/w.gz"),
        ])
        .unwrap();
        assert!(config.bootstrap_weights);
        assert_eq!(
            config.weight_mirrors,
            vec!["https://a.example/w.gz", "https://b.example/w.gz"]
        );
    }
}

//! Solver configuration persisted as `config.json` in the app home directory.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::gateway::openai::DEFAULT_BASE_URL;

pub const CONFIG_FILE: &str = "config.json";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Retired exact model id and its replacement.
const RETIRED_MODEL: &str = "gpt-5";
const RETIRED_MODEL_REPLACEMENT: &str = "gpt-5.2";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing API key (config.json or OPENAI_API_KEY)")]
    MissingApiKey,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolverConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub available_models: Vec<String>,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_classify_timeout")]
    pub classify_timeout: u64,
    #[serde(default = "default_ocr_timeout")]
    pub ocr_timeout: u64,
    #[serde(default = "default_graph_detect_timeout")]
    pub graph_detect_timeout: u64,
    #[serde(default = "default_graph_extraction_timeout")]
    pub graph_extraction_timeout: u64,
    /// Delay between the two delivery writes, in milliseconds.
    #[serde(default = "default_clipboard_settle_ms")]
    pub clipboard_settle_ms: u64,
    #[serde(default)]
    pub notify_on_complete: bool,
    #[serde(default = "default_telemetry_file")]
    pub telemetry_file: String,
    #[serde(default)]
    pub debug: bool,

    #[serde(default, alias = "ENABLE_GRAPH_EVIDENCE_PARSING")]
    pub enable_graph_evidence_parsing: bool,
    #[serde(default, alias = "ENABLE_CONSISTENCY_WARNINGS")]
    pub enable_consistency_warnings: bool,
    #[serde(default, alias = "ENABLE_FORCED_VISUAL_EXTRACTION")]
    pub enable_forced_visual_extraction: bool,
    #[serde(default, alias = "ENABLE_AUTO_GRAPH_DETECT_REF_PRIME")]
    pub enable_auto_graph_detect_ref_prime: bool,
    #[serde(default)]
    pub retry_on_weak_graph_evidence: bool,
    #[serde(default)]
    pub enable_key_point_refinement: bool,

    /// Attempt budget for the no-retry model family, regardless of `retries`.
    #[serde(default = "default_no_retry_family_attempts")]
    pub no_retry_family_attempts: u32,
    #[serde(default = "default_graph_extraction_model")]
    pub graph_extraction_model: String,
    #[serde(default = "default_aux_model")]
    pub graph_detect_model: String,
    #[serde(default = "default_aux_model")]
    pub reference_summary_model: String,

    /// Keys this crate does not interpret, preserved across rewrites.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_request_timeout() -> u64 {
    25
}

fn default_retries() -> u32 {
    1
}

fn default_max_output_tokens() -> u32 {
    2200
}

fn default_classify_timeout() -> u64 {
    8
}

fn default_ocr_timeout() -> u64 {
    12
}

fn default_graph_detect_timeout() -> u64 {
    12
}

fn default_graph_extraction_timeout() -> u64 {
    45
}

fn default_clipboard_settle_ms() -> u64 {
    600
}

fn default_telemetry_file() -> String {
    "solver_telemetry.jsonl".to_string()
}

fn default_no_retry_family_attempts() -> u32 {
    1
}

fn default_graph_extraction_model() -> String {
    RETIRED_MODEL_REPLACEMENT.to_string()
}

fn default_aux_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            model: default_model(),
            available_models: vec![default_model()],
            temperature: 0.0,
            request_timeout: default_request_timeout(),
            retries: default_retries(),
            max_output_tokens: default_max_output_tokens(),
            classify_timeout: default_classify_timeout(),
            ocr_timeout: default_ocr_timeout(),
            graph_detect_timeout: default_graph_detect_timeout(),
            graph_extraction_timeout: default_graph_extraction_timeout(),
            clipboard_settle_ms: default_clipboard_settle_ms(),
            notify_on_complete: false,
            telemetry_file: default_telemetry_file(),
            debug: false,
            enable_graph_evidence_parsing: false,
            enable_consistency_warnings: false,
            enable_forced_visual_extraction: false,
            enable_auto_graph_detect_ref_prime: false,
            retry_on_weak_graph_evidence: false,
            enable_key_point_refinement: false,
            no_retry_family_attempts: default_no_retry_family_attempts(),
            graph_extraction_model: default_graph_extraction_model(),
            graph_detect_model: default_aux_model(),
            reference_summary_model: default_aux_model(),
            extra: Map::new(),
        }
    }
}

impl SolverConfig {
    /// Load `path`, creating it with defaults when absent.
    ///
    /// Missing keys are filled, retired model ids migrated, and the file is
    /// rewritten when normalization changed anything.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            let cfg = Self::default();
            cfg.save(path)?;
            tracing::info!(path = %path.display(), "created default config");
            return Ok(cfg);
        }

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let mut cfg: SolverConfig = serde_json::from_value(raw.clone())?;
        cfg.normalize();

        if serde_json::to_value(&cfg)? != raw {
            cfg.save(path)?;
            tracing::debug!(path = %path.display(), "config normalized and rewritten");
        }
        Ok(cfg)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let body = serde_json::to_vec_pretty(self)?;
        write_atomic(path.as_ref(), &body)?;
        Ok(())
    }

    /// Apply model migration and derive the model list.
    pub fn normalize(&mut self) {
        self.model = self.model.trim().to_string();
        if self.model.is_empty() {
            self.model = default_model();
        }
        if self.model == RETIRED_MODEL {
            self.model = RETIRED_MODEL_REPLACEMENT.to_string();
        }

        let mut models: Vec<String> = Vec::new();
        for raw in &self.available_models {
            let mut m = raw.trim().to_string();
            if m == RETIRED_MODEL {
                m = RETIRED_MODEL_REPLACEMENT.to_string();
            }
            if !m.is_empty() && !models.contains(&m) {
                models.push(m);
            }
        }
        if !models.contains(&self.model) {
            models.insert(0, self.model.clone());
        }
        self.available_models = models;
        self.no_retry_family_attempts = self.no_retry_family_attempts.max(1);
    }

    /// API key from config, else `OPENAI_API_KEY`.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        let key = self.api_key.trim();
        if !key.is_empty() {
            return Ok(key.to_string());
        }
        std::env::var("OPENAI_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn resolve_base_url(&self) -> String {
        let url = self.base_url.trim();
        if !url.is_empty() {
            return url.to_string();
        }
        std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_secs(self.classify_timeout)
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout)
    }

    pub fn graph_detect_timeout(&self) -> Duration {
        Duration::from_secs(self.graph_detect_timeout)
    }

    pub fn graph_extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.graph_extraction_timeout)
    }

    pub fn clipboard_settle(&self) -> Duration {
        Duration::from_millis(self.clipboard_settle_ms)
    }
}

/// Write `bytes` to `path` through a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

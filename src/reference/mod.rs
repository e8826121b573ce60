//! Pinned reference (STAR) persistence.
//!
//! The record lives in `STARRED_META.json` under the app home directory, next
//! to the payload files it points at. All read-modify-write sequences go
//! through one store-level lock.

pub mod prime;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::write_atomic;
use crate::gateway::ImageInput;
use crate::telemetry::{TelemetryEvent, TelemetrySink};

pub const META_FILE: &str = "STARRED_META.json";
pub const TEXT_FILE: &str = "STARRED.txt";
pub const IMAGE_DIR: &str = "REFERENCE_IMG";
pub const IMAGE_STEM: &str = "current_starred";

pub const SUMMARY_MAX_CHARS: usize = 140;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReferenceKind {
    #[serde(rename = "TEXT")]
    Text,
    #[serde(rename = "IMG")]
    Img,
}

impl ReferenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceKind::Text => "TEXT",
            ReferenceKind::Img => "IMG",
        }
    }
}

/// Persisted pinned-context record.
///
/// `kind` is `None` exactly when `active` is false. `graph_evidence` and
/// `last_primed_at` only carry data while `graph_mode` is on.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferenceRecord {
    #[serde(rename = "reference_active", default)]
    pub active: bool,
    #[serde(rename = "reference_type", default)]
    pub kind: Option<ReferenceKind>,
    #[serde(default)]
    pub text_path: String,
    #[serde(default)]
    pub image_path: String,
    #[serde(rename = "reference_summary", default)]
    pub summary: String,
    #[serde(default)]
    pub graph_mode: bool,
    #[serde(default)]
    pub graph_evidence: Option<String>,
    /// Unix seconds of the last graph priming, 0 when never primed.
    #[serde(rename = "last_primed_ts", default)]
    pub last_primed_at: i64,
}

impl ReferenceRecord {
    /// Drop the pinned context. Graph mode survives a clear.
    pub fn clear(&mut self) {
        self.active = false;
        self.kind = None;
        self.text_path.clear();
        self.image_path.clear();
        self.summary.clear();
        self.graph_evidence = None;
        self.last_primed_at = 0;
    }

    /// Enforce the record invariants in place.
    pub fn normalize(&mut self) {
        if self.kind.is_none() {
            self.active = false;
        }
        if !self.active {
            self.clear();
        }
        if !self.graph_mode {
            self.graph_evidence = None;
            self.last_primed_at = 0;
        }
        if let Some(ev) = &self.graph_evidence {
            let trimmed = ev.trim();
            self.graph_evidence = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            };
        }
        self.summary = summarize(&self.summary);
    }

    /// Decode a stored document, translating the legacy `enabled`/`mode`
    /// toggles before any other normalization.
    pub fn from_value(raw: Value) -> Result<Self, serde_json::Error> {
        let mut raw = raw;
        if let Value::Object(map) = &mut raw {
            if map.contains_key("enabled") || map.contains_key("mode") {
                let legacy_active = map.get("enabled").map(truthy).unwrap_or(false);
                let legacy_mode = map
                    .get("mode")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .trim()
                    .to_ascii_lowercase();
                map.insert("reference_active".into(), Value::Bool(legacy_active));
                match legacy_mode.as_str() {
                    "text" => {
                        map.insert("reference_type".into(), "TEXT".into());
                    }
                    "visual" => {
                        map.insert("reference_type".into(), "IMG".into());
                    }
                    _ if !legacy_active => {
                        map.insert("reference_type".into(), Value::Null);
                    }
                    _ => {}
                }
                map.remove("enabled");
                map.remove("mode");
            }
            // Unknown kinds decode as none rather than failing the record.
            let known = matches!(
                map.get("reference_type").and_then(Value::as_str),
                Some("TEXT") | Some("IMG")
            );
            if !known {
                map.insert("reference_type".into(), Value::Null);
            }
            for key in ["text_path", "image_path", "reference_summary"] {
                if matches!(map.get(key), Some(Value::Null)) {
                    map.insert(key.into(), Value::String(String::new()));
                }
            }
            if let Some(v) = map.get("reference_active").map(truthy) {
                map.insert("reference_active".into(), Value::Bool(v));
            }
            if let Some(v) = map.get("graph_mode").map(truthy) {
                map.insert("graph_mode".into(), Value::Bool(v));
            }
            if let Some(ts) = map.get("last_primed_ts") {
                let ts = ts.as_f64().map(|f| f as i64).unwrap_or(0);
                map.insert("last_primed_ts".into(), Value::from(ts));
            }
        }
        let mut record: ReferenceRecord = serde_json::from_value(raw)?;
        record.normalize();
        Ok(record)
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Null => false,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Collapse whitespace and cap at [`SUMMARY_MAX_CHARS`] characters.
pub fn summarize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(SUMMARY_MAX_CHARS)
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reference payload loaded for a solve.
#[derive(Debug, Clone)]
pub enum ReferencePayload {
    Text(String),
    Image(ImageInput),
}

/// Outcome of resolving the pinned reference for a solve.
#[derive(Debug, Clone)]
pub struct ResolvedReference {
    pub record: ReferenceRecord,
    pub payload: Option<ReferencePayload>,
    /// Set when an invalid reference was cleared during resolution.
    pub cleared_reason: Option<String>,
}

pub struct ReferenceStore {
    home: PathBuf,
    lock: Mutex<()>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl ReferenceStore {
    pub fn new(home: impl Into<PathBuf>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            home: home.into(),
            lock: Mutex::new(()),
            telemetry,
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn meta_path(&self) -> PathBuf {
        self.home.join(META_FILE)
    }

    pub fn text_path(&self) -> PathBuf {
        self.home.join(TEXT_FILE)
    }

    pub fn image_path(&self, extension: &str) -> PathBuf {
        self.home
            .join(IMAGE_DIR)
            .join(format!("{IMAGE_STEM}.{extension}"))
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load the record, creating defaults on first use.
    ///
    /// Malformed storage is reset to defaults and persisted.
    pub fn load(&self) -> Result<ReferenceRecord, StoreError> {
        let _g = self.guard();
        self.load_locked()
    }

    pub fn save(&self, record: &ReferenceRecord) -> Result<(), StoreError> {
        let _g = self.guard();
        self.save_locked(record)
    }

    fn load_locked(&self) -> Result<ReferenceRecord, StoreError> {
        let path = self.meta_path();
        if !path.exists() {
            let record = ReferenceRecord::default();
            self.save_locked(&record)?;
            return Ok(record);
        }

        let bytes = std::fs::read(&path)?;
        let decoded = String::from_utf8(bytes)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()))
            .and_then(|raw| {
                if raw.is_object() {
                    Ok(raw)
                } else {
                    Err("reference record is not an object".to_string())
                }
            })
            .and_then(|raw| {
                ReferenceRecord::from_value(raw.clone())
                    .map(|rec| (raw, rec))
                    .map_err(|e| e.to_string())
            });

        match decoded {
            Ok((raw, record)) => {
                if serde_json::to_value(&record)? != raw {
                    self.save_locked(&record)?;
                }
                Ok(record)
            }
            Err(reason) => {
                tracing::warn!(path = %path.display(), error = %reason, "malformed reference record; resetting");
                self.telemetry.record(
                    TelemetryEvent::new("reference_meta_reset").field("error", reason),
                );
                let record = ReferenceRecord::default();
                self.save_locked(&record)?;
                Ok(record)
            }
        }
    }

    fn save_locked(&self, record: &ReferenceRecord) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.meta_path(), &body)?;
        Ok(())
    }

    /// Clear the pinned context. Persistence is best-effort.
    pub fn clear(&self, source: &str) -> ReferenceRecord {
        let _g = self.guard();
        let mut record = self.load_locked().unwrap_or_default();
        record.clear();
        if let Err(e) = self.save_locked(&record) {
            tracing::warn!(source, error = %e, "failed to persist cleared reference");
        }
        self.telemetry
            .record(TelemetryEvent::new("reference_cleared").field("source", source));
        record
    }

    /// Set graph mode and return the resulting state. Disabling wipes cached
    /// evidence and the priming timestamp.
    pub fn set_graph_mode(&self, enabled: bool) -> Result<bool, StoreError> {
        let _g = self.guard();
        let mut record = self.load_locked()?;
        record.graph_mode = enabled;
        if !enabled {
            record.graph_evidence = None;
            record.last_primed_at = 0;
        }
        self.save_locked(&record)?;
        self.telemetry
            .record(TelemetryEvent::new("graph_mode_set").field("enabled", enabled));
        Ok(record.graph_mode)
    }

    /// Pin text. Overwrites `STARRED.txt`.
    pub fn assign_text(&self, text: &str, summary: &str) -> Result<ReferenceRecord, StoreError> {
        let _g = self.guard();
        let path = self.text_path();
        write_atomic(&path, text.as_bytes())?;

        let mut record = self.load_locked()?;
        record.clear();
        record.active = true;
        record.kind = Some(ReferenceKind::Text);
        record.text_path = path.to_string_lossy().into_owned();
        record.summary = summary.to_string();
        record.normalize();
        self.save_locked(&record)?;
        Ok(record)
    }

    /// Pin an image, optionally with validated graph evidence.
    ///
    /// Evidence turns graph mode on and stamps the priming time.
    pub fn assign_image(
        &self,
        image: &ImageInput,
        summary: &str,
        graph_evidence: Option<String>,
    ) -> Result<ReferenceRecord, StoreError> {
        let _g = self.guard();
        let path = self.write_image_locked(image)?;

        let mut record = self.load_locked()?;
        record.clear();
        record.active = true;
        record.kind = Some(ReferenceKind::Img);
        record.image_path = path.to_string_lossy().into_owned();
        record.summary = summary.to_string();
        if let Some(evidence) = graph_evidence {
            record.graph_mode = true;
            record.graph_evidence = Some(evidence);
            record.last_primed_at = chrono::Utc::now().timestamp();
        }
        record.normalize();
        self.save_locked(&record)?;
        Ok(record)
    }

    /// Persist an image payload without changing the record.
    pub fn stage_image(&self, image: &ImageInput) -> Result<PathBuf, StoreError> {
        let _g = self.guard();
        self.write_image_locked(image)
    }

    fn write_image_locked(&self, image: &ImageInput) -> Result<PathBuf, StoreError> {
        let path = self.image_path(image.extension());
        write_atomic(&path, &image.bytes)?;
        Ok(path)
    }

    /// Load the record and its payload for a solve.
    ///
    /// An active reference whose backing file is missing, unreadable or
    /// empty is cleared and reported; the caller proceeds without it.
    pub fn resolve(&self) -> ResolvedReference {
        let record = match self.load() {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "reference load failed; solving without reference");
                return ResolvedReference {
                    record: ReferenceRecord::default(),
                    payload: None,
                    cleared_reason: None,
                };
            }
        };

        if !record.active {
            return ResolvedReference {
                record,
                payload: None,
                cleared_reason: None,
            };
        }

        let loaded = match record.kind {
            Some(ReferenceKind::Text) => load_text_payload(&record.text_path),
            Some(ReferenceKind::Img) => load_image_payload(&record.image_path),
            None => Err("REF invalid: unknown reference type. REF CLEARED".to_string()),
        };

        match loaded {
            Ok(payload) => ResolvedReference {
                record,
                payload: Some(payload),
                cleared_reason: None,
            },
            Err(reason) => {
                self.telemetry.record(
                    TelemetryEvent::new("reference_invalid")
                        .field("kind", record.kind.map(|k| k.as_str()).unwrap_or("none"))
                        .field("reason", reason.clone()),
                );
                let record = self.clear("solve");
                ResolvedReference {
                    record,
                    payload: None,
                    cleared_reason: Some(reason),
                }
            }
        }
    }
}

fn load_text_payload(path: &str) -> Result<ReferencePayload, String> {
    if path.is_empty() || !Path::new(path).exists() {
        return Err("REF invalid: missing TEXT source. REF CLEARED".to_string());
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("REF invalid: TEXT read failed. REF CLEARED. Error: {e}"))?;
    let text = text.trim();
    if text.is_empty() {
        return Err("REF invalid: empty TEXT source. REF CLEARED".to_string());
    }
    Ok(ReferencePayload::Text(text.to_string()))
}

fn load_image_payload(path: &str) -> Result<ReferencePayload, String> {
    if path.is_empty() || !Path::new(path).exists() {
        return Err("REF invalid: missing IMG source. REF CLEARED".to_string());
    }
    let image = ImageInput::from_path(path)
        .map_err(|e| format!("REF invalid: IMG read failed. REF CLEARED. Error: {e}"))?;
    if image.bytes.is_empty() {
        return Err("REF invalid: IMG read failed. REF CLEARED. Error: empty file".to_string());
    }
    Ok(ReferencePayload::Image(image))
}

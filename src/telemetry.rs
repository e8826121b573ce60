//! Best-effort telemetry sinks.
//!
//! Every pipeline stage reports through a [`TelemetrySink`]. Recording must
//! never block or fail the caller, so sinks swallow their own errors and log
//! them through `tracing` instead.

use serde::Serialize;
use serde_json::{Map, Value};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TelemetryEvent {
    pub timestamp_ms: i64,
    pub event: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TelemetryEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            timestamp_ms: now_epoch_ms(),
            event: event.into(),
            fields: Map::new(),
        }
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Attach a serializable value; values that fail to serialize become null.
    pub fn field_json<T: Serialize>(mut self, key: &str, value: &T) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("telemetry worker failed: {0}")]
    Join(String),
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Forwards events to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        let fields = Value::Object(event.fields);
        tracing::debug!(event = %event.event, fields = %fields, "telemetry");
    }
}

/// Appends one JSON object per line from a background writer thread.
#[derive(Clone)]
pub struct JsonlTelemetrySink {
    sender: mpsc::Sender<TelemetryEvent>,
}

pub struct TelemetryWorker {
    handle: Option<std::thread::JoinHandle<Result<(), TelemetryError>>>,
}

impl TelemetryWorker {
    /// Wait for the writer to drain. All sink clones must be dropped first.
    pub fn join(mut self) -> Result<(), TelemetryError> {
        let handle = self.handle.take();
        match handle {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(TelemetryError::Join("telemetry worker panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlTelemetrySink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, TelemetryWorker), TelemetryError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let (sender, receiver) = mpsc::channel::<TelemetryEvent>();
        let handle = std::thread::spawn(move || write_event_loop(file, receiver));
        Ok((
            Self { sender },
            TelemetryWorker {
                handle: Some(handle),
            },
        ))
    }
}

impl TelemetrySink for JsonlTelemetrySink {
    fn record(&self, event: TelemetryEvent) {
        if self.sender.send(event).is_err() {
            tracing::warn!("telemetry channel closed; event dropped");
        }
    }
}

fn write_event_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<TelemetryEvent>,
) -> Result<(), TelemetryError> {
    let mut writer = BufWriter::new(file);
    for event in receiver {
        let line =
            serde_json::to_string(&event).map_err(|e| TelemetryError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
    }
    writer.flush()?;
    Ok(())
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

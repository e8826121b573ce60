//! Clipboard-like transport and status surface.
//!
//! The pipeline reads its input from and writes its results to a
//! [`ClipboardTransport`]. Platform clipboards live outside this crate; the
//! transports here cover the CLI (console) and tests (memory).

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::gateway::ImageInput;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardContent {
    Text(String),
    Image(ImageInput),
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait ClipboardTransport: Send + Sync {
    fn read(&self) -> Result<ClipboardContent, ClipboardError>;

    /// Returns whether the write took place.
    fn write(&self, text: &str) -> bool;
}

pub trait StatusSurface: Send + Sync {
    fn announce(&self, message: &str);
}

/// Status surface that logs announcements.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatus;

impl StatusSurface for TracingStatus {
    fn announce(&self, message: &str) {
        tracing::info!(status = %message, "announce");
    }
}

type WriteHook = Box<dyn Fn(&str) + Send + Sync>;

/// In-memory clipboard keeping every write in order.
#[derive(Default)]
pub struct MemoryClipboard {
    content: Mutex<Option<ClipboardContent>>,
    writes: Mutex<Vec<String>>,
    on_write: Mutex<Option<WriteHook>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(content: ClipboardContent) -> Self {
        let clip = Self::new();
        clip.set(content);
        clip
    }

    pub fn set(&self, content: ClipboardContent) {
        if let Ok(mut slot) = self.content.lock() {
            *slot = Some(content);
        }
    }

    /// Run `hook` after every successful write.
    pub fn on_write(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.on_write.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl ClipboardTransport for MemoryClipboard {
    fn read(&self) -> Result<ClipboardContent, ClipboardError> {
        let slot = self
            .content
            .lock()
            .map_err(|_| ClipboardError::Unavailable("poisoned".to_string()))?;
        Ok(slot.clone().unwrap_or(ClipboardContent::Empty))
    }

    fn write(&self, text: &str) -> bool {
        match self.writes.lock() {
            Ok(mut writes) => writes.push(text.to_string()),
            Err(_) => return false,
        }
        self.set(ClipboardContent::Text(text.to_string()));
        if let Ok(hook) = self.on_write.lock() {
            if let Some(hook) = hook.as_ref() {
                hook(text);
            }
        }
        true
    }
}

/// Reads a fixed input and prints writes to stdout, separated by a rule.
pub struct ConsoleClipboard {
    input: ClipboardContent,
}

impl ConsoleClipboard {
    pub fn new(input: ClipboardContent) -> Arc<Self> {
        Arc::new(Self { input })
    }
}

impl ClipboardTransport for ConsoleClipboard {
    fn read(&self) -> Result<ClipboardContent, ClipboardError> {
        Ok(self.input.clone())
    }

    fn write(&self, text: &str) -> bool {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{text}\n----------------------------------------").is_ok()
    }
}

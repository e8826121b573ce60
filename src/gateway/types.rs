//! Core types for the completion gateway.

use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ATTRIBUTION
// =============================================================================

/// Attribution for telemetry and debugging.
///
/// Every call through the invoker carries attribution so telemetry can tie
/// attempts back to the solve or priming action that issued them.
#[derive(Debug, Clone)]
pub struct Attribution {
    /// Identifier shared by every call made on behalf of one request.
    pub request_id: String,
    /// Which code path made this call, e.g. "solve" or "star::classify".
    pub flow: &'static str,
}

impl Attribution {
    pub fn new(flow: &'static str) -> Self {
        Self {
            request_id: Uuid::new_v4().simple().to_string(),
            flow,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

// =============================================================================
// MESSAGE TYPES
// =============================================================================

/// Message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Encoded image payload as read from the clipboard or disk.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl std::fmt::Debug for ImageInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageInput")
            .field("bytes", &self.bytes.len())
            .field("media_type", &self.media_type)
            .finish()
    }
}

impl ImageInput {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
        }
    }

    pub fn png(bytes: Vec<u8>) -> Self {
        Self::new(bytes, "image/png")
    }

    /// Read an image file, inferring the media type from its extension.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png")
            .to_ascii_lowercase();
        Ok(Self::new(bytes, media_type_for_extension(&ext)))
    }

    /// File extension matching the media type, used when persisting.
    pub fn extension(&self) -> &'static str {
        match self.media_type.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            "image/bmp" => "bmp",
            _ => "png",
        }
    }

    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.media_type,
            BASE64.encode(&self.bytes)
        )
    }
}

fn media_type_for_extension(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "image/png",
    }
}

/// One ordered block of a multimodal message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    Image(ImageInput),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text(t) => Some(t),
            ContentPart::Image(_) => None,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ContentPart::Image(_))
    }
}

/// A message with ordered content parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn user(content: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![ContentPart::text(text)])
    }

    pub fn user_image(image: ImageInput) -> Self {
        Self::user(vec![ContentPart::Image(image)])
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// =============================================================================
// MODEL FAMILY
// =============================================================================

/// Inference-parameter family of a model identifier.
///
/// Reasoning models reject `temperature`, need a higher output-token floor
/// (reasoning tokens count against it), and are run with a reduced attempt
/// budget by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Standard,
    Reasoning,
}

impl ModelFamily {
    pub fn of(model: &str) -> Self {
        if model.trim().to_ascii_lowercase().starts_with("gpt-5") {
            ModelFamily::Reasoning
        } else {
            ModelFamily::Standard
        }
    }

    pub fn accepts_temperature(self) -> bool {
        matches!(self, ModelFamily::Standard)
    }

    pub fn min_output_tokens(self) -> u32 {
        match self {
            ModelFamily::Standard => 16,
            ModelFamily::Reasoning => 128,
        }
    }

    pub fn reasoning_effort(self) -> Option<&'static str> {
        match self {
            ModelFamily::Standard => None,
            ModelFamily::Reasoning => Some("low"),
        }
    }

    /// Whether the orchestrator should ignore the configured retry count.
    pub fn is_no_retry(self) -> bool {
        matches!(self, ModelFamily::Reasoning)
    }
}

// =============================================================================
// REQUEST / RESPONSE
// =============================================================================

/// Fully shaped request handed to a completion service.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Per-call network timeout.
    pub timeout: Duration,
    /// `None` when the model family rejects the parameter.
    pub temperature: Option<f32>,
    pub max_output_tokens: u32,
    pub reasoning_effort: Option<&'static str>,
    pub attribution: Attribution,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>, attribution: Attribution) -> Self {
        Self {
            model: model.into(),
            messages,
            timeout: Duration::from_secs(25),
            temperature: None,
            max_output_tokens: 2200,
            reasoning_effort: None,
            attribution,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = max;
        self
    }

    /// Total characters of text content, used for input size guards.
    pub fn text_chars(&self) -> usize {
        self.messages
            .iter()
            .flat_map(|m| m.content.iter())
            .filter_map(ContentPart::as_text)
            .map(str::len)
            .sum()
    }
}

/// Terminal status reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseStatus {
    Completed,
    Incomplete,
    Unknown(String),
}

impl From<Option<String>> for ResponseStatus {
    fn from(s: Option<String>) -> Self {
        match s.as_deref() {
            Some("completed") => ResponseStatus::Completed,
            Some("incomplete") => ResponseStatus::Incomplete,
            Some(other) => ResponseStatus::Unknown(other.to_string()),
            None => ResponseStatus::Unknown("none".to_string()),
        }
    }
}

/// Response from a completion call.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub latency: Duration,
    pub status: ResponseStatus,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            input_tokens: None,
            output_tokens: None,
            latency: Duration::ZERO,
            status: ResponseStatus::Completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpt5_family_rejects_temperature_and_raises_floor() {
        let family = ModelFamily::of("gpt-5.2");
        assert_eq!(family, ModelFamily::Reasoning);
        assert!(!family.accepts_temperature());
        assert_eq!(family.min_output_tokens(), 128);
        assert_eq!(family.reasoning_effort(), Some("low"));

        let family = ModelFamily::of("gpt-4o-mini");
        assert!(family.accepts_temperature());
        assert_eq!(family.min_output_tokens(), 16);
        assert!(!family.is_no_retry());
    }

    #[test]
    fn image_data_url_carries_media_type() {
        let img = ImageInput::png(vec![1, 2, 3]);
        assert_eq!(img.data_url(), "data:image/png;base64,AQID");
        assert_eq!(img.extension(), "png");
    }

    #[test]
    fn message_text_joins_text_parts_only() {
        let msg = Message::user(vec![
            ContentPart::text("a"),
            ContentPart::Image(ImageInput::png(vec![0])),
            ContentPart::text("b"),
        ]);
        assert_eq!(msg.text(), "a\nb");
    }
}

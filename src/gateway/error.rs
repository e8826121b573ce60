//! Error types for the completion gateway.

use std::time::Duration;
use thiserror::Error;

/// Additional context from service errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the service.
    pub http_status: Option<u16>,
    /// Service-specific error code (e.g. "unsupported_parameter").
    pub provider_code: Option<String>,
    /// Parameter the service complained about, when reported.
    pub param: Option<String>,
    /// Request ID from the service (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Which phase of a network call timed out, derived from error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Connect,
    Read,
    Write,
    Pool,
    Request,
}

impl TimeoutKind {
    /// Categorize an error message. Returns `None` when it is not a timeout.
    pub fn classify(text: &str) -> Option<Self> {
        let lower = text.to_ascii_lowercase();
        if !(lower.contains("timeout") || lower.contains("timed out")) {
            return None;
        }
        let kind = if lower.contains("connect") {
            TimeoutKind::Connect
        } else if lower.contains("read") {
            TimeoutKind::Read
        } else if lower.contains("write") {
            TimeoutKind::Write
        } else if lower.contains("pool") {
            TimeoutKind::Pool
        } else {
            TimeoutKind::Request
        };
        Some(kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeoutKind::Connect => "connect",
            TimeoutKind::Read => "read",
            TimeoutKind::Write => "write",
            TimeoutKind::Pool => "pool",
            TimeoutKind::Request => "request",
        }
    }
}

/// Errors that can occur when calling the completion service.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Service returned 429.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        retry_after: Duration,
        context: Option<ErrorContext>,
    },

    /// Invalid request - permanent error, don't retry.
    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
        context: Option<ErrorContext>,
    },

    /// Service error - may be retryable.
    #[error("{provider} error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
        retryable: bool,
        context: Option<ErrorContext>,
    },

    /// Request timed out - retryable.
    #[error("request timeout after {0:?}")]
    Timeout(Duration, Option<ErrorContext>),

    /// HTTP/network error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error (missing API key, etc.).
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn rate_limited(retry_after: Duration, context: ErrorContext) -> Self {
        Self::RateLimited {
            retry_after,
            context: Some(context),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            context: None,
        }
    }

    pub fn invalid_request_with_context(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn provider(provider: &'static str, message: impl Into<String>, retryable: bool) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            retryable,
            context: None,
        }
    }

    pub fn provider_with_context(
        provider: &'static str,
        message: impl Into<String>,
        retryable: bool,
        context: ErrorContext,
    ) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            retryable,
            context: Some(context),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Timeout(_, _) => true,
            Self::Provider { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::InvalidRequest { .. } => false,
            Self::Config(_) => false,
        }
    }

    /// Whether the service rejected the call because of the temperature parameter.
    pub fn is_unsupported_temperature(&self) -> bool {
        if let Some(ctx) = self.context() {
            if ctx.param.as_deref() == Some("temperature")
                && ctx.provider_code.as_deref() == Some("unsupported_parameter")
            {
                return true;
            }
        }
        let text = self.to_string().to_ascii_lowercase();
        text.contains("temperature")
            && (text.contains("unsupported") || text.contains("not supported"))
    }

    /// Categorized timeout type, if this error is a timeout.
    pub fn timeout_kind(&self) -> Option<TimeoutKind> {
        match self {
            Self::Timeout(_, _) => Some(TimeoutKind::Request),
            Self::Http(e) if e.is_timeout() => {
                let text = format!("{e:?}");
                if e.is_connect() {
                    Some(TimeoutKind::Connect)
                } else {
                    TimeoutKind::classify(&text).or(Some(TimeoutKind::Request))
                }
            }
            other => TimeoutKind::classify(&other.to_string()),
        }
    }

    /// Get a short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Provider { .. } => "provider_error",
            Self::Timeout(_, _) => "timeout",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::RateLimited { context, .. } => context.as_ref(),
            Self::InvalidRequest { context, .. } => context.as_ref(),
            Self::Provider { context, .. } => context.as_ref(),
            Self::Timeout(_, context) => context.as_ref(),
            Self::Http(_) => None,
            Self::Config(_) => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }
}

//! # Pipeline Error Handling
//!
//! A hierarchical error type for the capture -> encode -> transport pipeline
//! and its client-side counterpart, with rich context (timestamp, operation,
//! recovery suggestion, severity, retryable/recoverable flags, metadata) and
//! classification traits so callers can decide whether to retry, degrade, or
//! surface a fatal failure to the user.
//!
//! ## Usage
//!
//! ```rust
//! use rdp_host::error::{PipelineError, Retryable};
//!
//! let error = PipelineError::encoding("submit failed: encoder busy")
//!     .with_context("submitting frame 42")
//!     .with_recovery_suggestion("drop the frame and retry on the next capture tick");
//!
//! if error.is_retryable() {
//!     // implement retry logic
//! }
//! ```

use std::{error::Error as StdError, fmt, time::SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Fatal,
}

#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub timestamp: SystemTime,
    pub operation: Option<String>,
    pub context: Option<String>,
    pub recovery_suggestion: Option<String>,
    pub source_location: Option<String>,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub recoverable: bool,
    pub metadata: std::collections::HashMap<String, String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::now(),
            operation: None,
            context: None,
            recovery_suggestion: None,
            source_location: None,
            severity: ErrorSeverity::Error,
            retryable: false,
            recoverable: false,
            metadata: std::collections::HashMap::new(),
        }
    }
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_recovery_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.recovery_suggestion = Some(suggestion.into());
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The pipeline's five error kinds, plus the configuration/IO surface the
/// host binary's CLI and config loader need day to day.
#[derive(Debug)]
pub enum PipelineError {
    /// Malformed wire or control-channel data that escaped the wire crate's
    /// own silent-drop handling (e.g. a control message that decodes but
    /// violates a protocol invariant).
    Protocol {
        detail: String,
        context: ErrorContext,
    },
    /// Capture-engine failures: source unavailable, stall exceeding the
    /// restart threshold, platform capture API errors.
    Capture {
        platform: String,
        reason: String,
        context: ErrorContext,
    },
    /// Encoder session failures: submit errors, session creation failures.
    Encoding {
        reason: String,
        context: ErrorContext,
    },
    /// Network I/O failures on the datagram or control socket.
    Transport {
        operation: String,
        address: Option<String>,
        source: Option<Box<dyn StdError + Send + Sync>>,
        context: ErrorContext,
    },
    /// A bounded resource (buffer pool, in-flight slots, datagram queue)
    /// was exhausted.
    ResourceExhaustion {
        resource: String,
        reason: String,
        context: ErrorContext,
    },
    /// Configuration validation errors.
    Config {
        field: String,
        value: String,
        reason: String,
        context: ErrorContext,
    },
    /// I/O errors unrelated to the network transport (config file, log
    /// file).
    Io {
        operation: String,
        path: Option<String>,
        source: std::io::Error,
        context: ErrorContext,
    },
}

impl PipelineError {
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::Protocol {
            detail: detail.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn capture(platform: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Capture {
            platform: platform.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn encoding(reason: impl Into<String>) -> Self {
        Self::Encoding {
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn transport(operation: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            address: None,
            source: None,
            context: ErrorContext::new(),
        }
    }

    pub fn transport_with_source(
        operation: impl Into<String>,
        address: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            operation: operation.into(),
            address: Some(address.into()),
            source: Some(Box::new(source)),
            context: ErrorContext::new(),
        }
    }

    pub fn resource_exhaustion(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceExhaustion {
            resource: resource.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: None,
            source,
            context: ErrorContext::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context_mut().context = Some(context.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    pub fn with_recovery_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context_mut().recovery_suggestion = Some(suggestion.into());
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.context_mut().severity = severity;
        self
    }

    pub fn retryable(mut self) -> Self {
        self.context_mut().retryable = true;
        self
    }

    pub fn recoverable(mut self) -> Self {
        self.context_mut().recoverable = true;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_mut().metadata.insert(key.into(), value.into());
        self
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Protocol { context, .. } => context,
            Self::Capture { context, .. } => context,
            Self::Encoding { context, .. } => context,
            Self::Transport { context, .. } => context,
            Self::ResourceExhaustion { context, .. } => context,
            Self::Config { context, .. } => context,
            Self::Io { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Protocol { context, .. } => context,
            Self::Capture { context, .. } => context,
            Self::Encoding { context, .. } => context,
            Self::Transport { context, .. } => context,
            Self::ResourceExhaustion { context, .. } => context,
            Self::Config { context, .. } => context,
            Self::Io { context, .. } => context,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::Protocol { .. } => "protocol",
            Self::Capture { .. } => "capture",
            Self::Encoding { .. } => "encoding",
            Self::Transport { .. } => "transport",
            Self::ResourceExhaustion { .. } => "resource_exhaustion",
            Self::Config { .. } => "config",
            Self::Io { .. } => "io",
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol { detail, .. } => write!(f, "protocol error: {detail}"),
            Self::Capture {
                platform, reason, ..
            } => write!(f, "capture failed on {platform}: {reason}"),
            Self::Encoding { reason, .. } => write!(f, "encoding failed: {reason}"),
            Self::Transport {
                operation, address, ..
            } => match address {
                Some(addr) => write!(f, "transport error during {operation} on {addr}"),
                None => write!(f, "transport error during {operation}"),
            },
            Self::ResourceExhaustion {
                resource, reason, ..
            } => write!(f, "resource exhausted ({resource}): {reason}"),
            Self::Config {
                field,
                value,
                reason,
                ..
            } => write!(f, "config error in '{field}': {reason} (value: {value})"),
            Self::Io {
                operation,
                path,
                source,
                ..
            } => match path {
                Some(p) => write!(f, "I/O error during {operation} on '{p}': {source}"),
                None => write!(f, "I/O error during {operation}: {source}"),
            },
        }
    }
}

impl StdError for PipelineError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Transport {
                source: Some(source),
                ..
            } => Some(source.as_ref()),
            _ => None,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

pub trait Retryable {
    fn is_retryable(&self) -> bool;
    fn retry_delay_ms(&self) -> Option<u64> {
        None
    }
    fn max_retries(&self) -> Option<usize> {
        None
    }
}

impl Retryable for PipelineError {
    fn is_retryable(&self) -> bool {
        self.context().retryable
            || matches!(
                self,
                Self::Transport { .. } | Self::ResourceExhaustion { .. } | Self::Io { .. }
            )
    }

    fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            Self::Transport { .. } => Some(200),
            Self::ResourceExhaustion { .. } => Some(16),
            Self::Io { .. } => Some(100),
            _ => None,
        }
    }

    fn max_retries(&self) -> Option<usize> {
        match self {
            Self::Transport { .. } => Some(5),
            Self::ResourceExhaustion { .. } => Some(3),
            Self::Io { .. } => Some(3),
            _ => None,
        }
    }
}

pub trait Recoverable {
    fn is_recoverable(&self) -> bool;
    fn recovery_strategies(&self) -> Vec<RecoveryStrategy>;
}

#[derive(Debug, Clone)]
pub enum RecoveryStrategy {
    Retry { max_attempts: usize, delay_ms: u64 },
    Fallback { description: String },
    Reinitialize { component: String },
    Skip { reason: String },
    Degrade { description: String },
}

impl Recoverable for PipelineError {
    fn is_recoverable(&self) -> bool {
        self.context().recoverable
            || matches!(
                self,
                Self::Capture { .. }
                    | Self::Encoding { .. }
                    | Self::Transport { .. }
                    | Self::ResourceExhaustion { .. }
            )
    }

    fn recovery_strategies(&self) -> Vec<RecoveryStrategy> {
        match self {
            Self::Capture { .. } => vec![RecoveryStrategy::Reinitialize {
                component: "capture_source".to_string(),
            }],
            Self::Encoding { .. } => vec![
                RecoveryStrategy::Skip {
                    reason: "drop the current frame".to_string(),
                },
                RecoveryStrategy::Reinitialize {
                    component: "encode_session".to_string(),
                },
            ],
            Self::Transport { .. } => vec![RecoveryStrategy::Retry {
                max_attempts: 5,
                delay_ms: 200,
            }],
            Self::ResourceExhaustion { .. } => vec![RecoveryStrategy::Degrade {
                description: "drop frames until the pool has headroom".to_string(),
            }],
            _ => vec![],
        }
    }
}

pub trait HasSeverity {
    fn severity(&self) -> ErrorSeverity;
}

impl HasSeverity for PipelineError {
    fn severity(&self) -> ErrorSeverity {
        self.context().severity
    }
}

pub trait HasRecoverySuggestion {
    fn recovery_suggestion(&self) -> Option<&str>;
}

impl HasRecoverySuggestion for PipelineError {
    fn recovery_suggestion(&self) -> Option<&str> {
        self.context().recovery_suggestion.as_deref()
    }
}

pub mod classify {
    use super::*;

    pub fn is_transient(error: &PipelineError) -> bool {
        matches!(
            error,
            PipelineError::Transport { .. } | PipelineError::ResourceExhaustion { .. }
        )
    }

    pub fn is_fatal(error: &PipelineError) -> bool {
        matches!(error, PipelineError::Config { .. }) || error.severity() == ErrorSeverity::Fatal
    }

    pub fn requires_user_intervention(error: &PipelineError) -> bool {
        error.severity() >= ErrorSeverity::Critical
    }

    pub fn priority(error: &PipelineError) -> u8 {
        match error.severity() {
            ErrorSeverity::Debug => 0,
            ErrorSeverity::Info => 1,
            ErrorSeverity::Warning => 2,
            ErrorSeverity::Error => 3,
            ErrorSeverity::Critical => 4,
            ErrorSeverity::Fatal => 5,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(error: std::io::Error) -> Self {
        Self::io("unknown", error)
    }
}

impl From<rdp_wire::WireError> for PipelineError {
    fn from(error: rdp_wire::WireError) -> Self {
        Self::protocol(error.to_string())
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(error: toml::de::Error) -> Self {
        Self::config("config_file", "toml", error.to_string())
    }
}

pub struct ErrorBuilder {
    error: PipelineError,
}

impl ErrorBuilder {
    pub fn new(error: PipelineError) -> Self {
        Self { error }
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.error = self.error.with_context(context);
        self
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.error = self.error.with_operation(operation);
        self
    }

    pub fn recovery_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.error = self.error.with_recovery_suggestion(suggestion);
        self
    }

    pub fn severity(mut self, severity: ErrorSeverity) -> Self {
        self.error = self.error.with_severity(severity);
        self
    }

    pub fn retryable(mut self) -> Self {
        self.error = self.error.retryable();
        self
    }

    pub fn recoverable(mut self) -> Self {
        self.error = self.error.recoverable();
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.error = self.error.with_metadata(key, value);
        self
    }

    pub fn build(self) -> PipelineError {
        self.error
    }
}

#[macro_export]
macro_rules! pipeline_error {
    ($variant:ident, $($args:expr),* $(,)?) => {
        $crate::error::PipelineError::$variant($($args),*)
    };
    ($variant:ident { $($field:ident: $value:expr),* $(,)? }) => {
        $crate::error::PipelineError::$variant {
            $($field: $value,)*
            context: $crate::error::ErrorContext::new(),
        }
    };
}

#[macro_export]
macro_rules! pipeline_error_with {
    ($base:expr) => {
        $crate::error::ErrorBuilder::new($base)
    };
    ($base:expr, $($method:ident: $value:expr),* $(,)?) => {
        $crate::error::ErrorBuilder::new($base)
            $(.$method($value))*
            .build()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_creation_exposes_category() {
        let error = PipelineError::config("target_frame_rate", "0", "must be greater than 0");
        assert_eq!(error.category(), "config");
        assert!(!error.is_retryable());
    }

    #[test]
    fn context_builder_chain_round_trips() {
        let error = PipelineError::encoding("submit failed")
            .with_context("submitting frame 42")
            .with_recovery_suggestion("drop and retry next tick")
            .retryable();

        assert_eq!(error.category(), "encoding");
        assert!(error.is_retryable());
        assert_eq!(
            error.recovery_suggestion(),
            Some("drop and retry next tick")
        );
    }

    #[test]
    fn transport_errors_carry_default_retry_policy() {
        let error = PipelineError::transport("sending datagram");
        assert!(error.is_retryable());
        assert_eq!(error.retry_delay_ms(), Some(200));
        assert_eq!(error.max_retries(), Some(5));
    }

    #[test]
    fn classification_matches_category() {
        let config_error = PipelineError::config("field", "value", "reason");
        assert!(classify::is_fatal(&config_error) || config_error.severity() == ErrorSeverity::Error);

        let transport_error = PipelineError::transport("connect");
        assert!(classify::is_transient(&transport_error));
    }

    #[test]
    fn wire_error_maps_to_protocol_variant() {
        let wire_err = rdp_wire::WireError::ChecksumMismatch;
        let pipeline_err: PipelineError = wire_err.into();
        assert_eq!(pipeline_err.category(), "protocol");
    }
}

use std::fmt;

/// Failure modes the host's `PipelineError::Encoding` variant needs to
/// distinguish; everything else from the GStreamer binding surfaces as
/// `anyhow::Error` the way `cap-rtsp` already does.
#[derive(Debug)]
pub enum CodecError {
    SessionCreate(String),
    Submit(String),
    Configure(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionCreate(msg) => write!(f, "encoder session creation failed: {msg}"),
            Self::Submit(msg) => write!(f, "frame submission failed: {msg}"),
            Self::Configure(msg) => write!(f, "encoder reconfiguration failed: {msg}"),
        }
    }
}

impl std::error::Error for CodecError {}

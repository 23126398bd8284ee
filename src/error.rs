use serde::Serialize;
use uuid::Uuid;

/// Error taxonomy for the migration and bulk-edit engine.
///
/// Every variant maps to a stable kind code via [`EngineError::code`]. Callers
/// that render errors to users go through [`EngineError::render`], which
/// attaches a fresh correlation id and never exposes a backtrace.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A path segment or `[N]` index did not parse. The whole select/edit is
    /// aborted; no partial filtering is committed.
    #[error("malformed path: {0}")]
    MalformedPath(String),

    /// Rule text contained a construct outside the whitelisted grammar.
    #[error("malformed rule: {0}")]
    MalformedRule(String),

    /// Missing or rejected credentials for the content source.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The content source could not be reached at all.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// A publish run was requested while another is still active.
    #[error("a publish run is already active")]
    Conflict,

    /// The source API answered with a non-2xx status.
    #[error("upstream failure ({status}): {message}")]
    Upstream {
        status: u16,
        message: String,
        details: Option<String>,
    },

    /// A rule body failed while being interpreted against a node.
    #[error("rule evaluation failed at {path}: {message}")]
    RuleFailed { path: String, message: String },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Stable machine-readable kind code for each variant.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::MalformedPath(_) => "MALFORMED_PATH",
            EngineError::MalformedRule(_) => "MALFORMED_RULE",
            EngineError::Unauthorized(_) => "UNAUTHORIZED",
            EngineError::Unavailable(_) => "UNAVAILABLE",
            EngineError::Conflict => "CONFLICT",
            EngineError::Upstream { .. } => "UPSTREAM_FAILURE",
            EngineError::RuleFailed { .. } => "RULE_FAILED",
            EngineError::Archive(_) => "ARCHIVE",
            EngineError::Config(_) => "CONFIG",
            EngineError::Io(_) => "IO",
            EngineError::Json(_) => "JSON",
        }
    }

    /// User-facing rendering: correlation id, kind code and message only.
    pub fn render(&self) -> RenderedError {
        RenderedError {
            id: Uuid::new_v4(),
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// What a caller is allowed to show to an end user.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedError {
    pub id: Uuid,
    pub code: &'static str,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, EngineError>;

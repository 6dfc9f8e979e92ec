//! Error types for rendering and image loading

use crate::markup::MarkupKind;

/// Errors surfaced to the caller of a render.
///
/// Image failures never show up here: they are recovered inside the render by
/// swapping in the error visual.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to parse {kind} markup: {detail}")]
    Parse { kind: MarkupKind, detail: String },

    #[error("invalid render request: {0}")]
    InvalidRequest(String),
}

impl RenderError {
    pub fn parse(kind: MarkupKind, detail: impl Into<String>) -> Self {
        Self::Parse {
            kind,
            detail: detail.into(),
        }
    }
}

/// Per-image load failure reported by an image pipeline
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("fetch of '{location}' failed: {detail}")]
    Fetch { location: String, detail: String },

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("load cancelled")]
    Cancelled,
}

impl LoadError {
    pub fn fetch(location: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Fetch {
            location: location.into(),
            detail: detail.into(),
        }
    }
}

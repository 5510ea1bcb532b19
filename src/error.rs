//! Error types for the render pipeline.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum RenderError {
    /// Spec or engine configuration is invalid. Fatal before any work starts.
    Configuration(String),
    /// Required credential for the selected speech provider is absent.
    /// Hard failure for the scene's audio phase, propagated out of render().
    ProviderUnavailable {
        scene_id: String,
        provider: String,
        reason: String,
    },
    /// Speech synthesis failed with the credential present. Hard failure for
    /// that scene's audio phase only; the scene continues without narration.
    Speech { scene_id: String, message: String },
    /// A backing external tool is not installed or could not be found.
    /// Recoverable via the stage's fallback.
    ToolUnavailable {
        stage: &'static str,
        message: String,
    },
    /// A backing external tool timed out or exited non-zero.
    /// Recoverable via the stage's fallback.
    ToolFailed {
        stage: &'static str,
        message: String,
    },
    /// The final concatenation/synthesis step failed. Fatal to the render.
    Mux(String),
    /// Job tracker write failed. Best-effort: logged, never fatal.
    Persistence(String),
    Io(io::Error),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Configuration(msg) => write!(f, "configuration error: {}", msg),
            RenderError::ProviderUnavailable {
                scene_id,
                provider,
                reason,
            } => write!(
                f,
                "speech provider '{}' unavailable for scene '{}': {}",
                provider, scene_id, reason
            ),
            RenderError::Speech { scene_id, message } => {
                write!(f, "speech synthesis failed for scene '{}': {}", scene_id, message)
            }
            RenderError::ToolUnavailable { stage, message } => {
                write!(f, "{} tool unavailable: {}", stage, message)
            }
            RenderError::ToolFailed { stage, message } => {
                write!(f, "{} tool failed: {}", stage, message)
            }
            RenderError::Mux(msg) => write!(f, "mux error: {}", msg),
            RenderError::Persistence(msg) => write!(f, "persistence error: {}", msg),
            RenderError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RenderError {
    fn from(err: io::Error) -> Self {
        RenderError::Io(err)
    }
}

impl RenderError {
    /// Fatal errors abort the whole render. Everything else is scoped to a
    /// single scene and degrades.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RenderError::Configuration(_)
                | RenderError::ProviderUnavailable { .. }
                | RenderError::Mux(_)
        )
    }
}

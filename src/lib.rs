//! Scenecast - Declarative Video Rendering Library
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (spec, jobs, progress)
//! - ports/: Trait definitions (tracker, hooks)
//! - adapters/: Concrete implementations
//! - engines/: Stage engines over external tools (speech, character, composition)
//! - pipeline/: Per-scene stage driver
//! - application/: Render orchestration
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod engines;
pub mod error;
pub mod pipeline;
pub mod ports;

// Re-exports for convenience
pub use application::orchestrator::RenderOrchestrator;
pub use config::RenderConfig;
pub use domain::progress::{RenderPhase, RenderProgress};
pub use domain::spec::VideoSpec;
pub use error::RenderError;

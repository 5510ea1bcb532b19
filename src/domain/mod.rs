//! Domain layer - Pure business logic.

// Spec document model and validation
pub mod spec;

// Job and scene-render records
pub mod jobs;

// In-memory render progress
pub mod progress;

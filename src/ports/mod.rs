//! Ports - Trait definitions for external collaborators.

pub mod hooks;
pub mod tracker;

//! Application layer - Services driving the render workflow.

pub mod orchestrator;

mod functional_tests;

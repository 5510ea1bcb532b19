//! Persisted render job and scene-render records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a render job or a single scene render.
///
/// Legal transitions: `Pending -> Queued -> Processing -> {Completed,
/// Failed, Cancelled}`. `Queued` may be skipped. Terminal states accept no
/// further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RenderStatus {
    /// A job actively being worked on. Pending jobs are open but not active.
    pub fn is_active(&self) -> bool {
        matches!(self, RenderStatus::Queued | RenderStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RenderStatus::Completed | RenderStatus::Failed | RenderStatus::Cancelled
        )
    }

    /// Whether a transition to `next` is legal under the job state machine.
    pub fn can_transition_to(&self, next: RenderStatus) -> bool {
        match self {
            RenderStatus::Pending => matches!(
                next,
                RenderStatus::Queued
                    | RenderStatus::Processing
                    | RenderStatus::Failed
                    | RenderStatus::Cancelled
            ),
            RenderStatus::Queued => matches!(
                next,
                RenderStatus::Processing | RenderStatus::Failed | RenderStatus::Cancelled
            ),
            RenderStatus::Processing => matches!(
                next,
                RenderStatus::Completed | RenderStatus::Failed | RenderStatus::Cancelled
            ),
            RenderStatus::Completed | RenderStatus::Failed | RenderStatus::Cancelled => false,
        }
    }
}

impl std::fmt::Display for RenderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RenderStatus::Pending => "pending",
            RenderStatus::Queued => "queued",
            RenderStatus::Processing => "processing",
            RenderStatus::Completed => "completed",
            RenderStatus::Failed => "failed",
            RenderStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// One tracked render of a full video spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJob {
    pub id: i64,
    pub status: RenderStatus,
    /// Overall progress in `[0.0, 1.0]`, non-decreasing.
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_scene: Option<String>,
    pub total_scenes: u32,
    pub completed_scenes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Set exactly once, on the first transition into `Processing`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set exactly once, on the transition into a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl RenderJob {
    pub fn new(id: i64, total_scenes: u32) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: RenderStatus::Pending,
            progress: 0.0,
            current_scene: None,
            total_scenes,
            completed_scenes: 0,
            output_path: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            metadata: None,
        }
    }

    /// Wall-clock seconds from start to completion, if both are recorded.
    pub fn duration_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        Some((completed - started).num_milliseconds() as f64 / 1000.0)
    }
}

/// One tracked scene within a render job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRender {
    pub id: i64,
    pub render_job_id: i64,
    pub scene_id: String,
    pub status: RenderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_path: Option<String>,
    /// Effective scene duration in seconds once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SceneRender {
    pub fn new(id: i64, render_job_id: i64, scene_id: impl Into<String>) -> Self {
        Self {
            id,
            render_job_id,
            scene_id: scene_id.into(),
            status: RenderStatus::Pending,
            audio_path: None,
            frames_path: None,
            composition_path: None,
            final_path: None,
            duration: None,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_and_terminal_are_disjoint() {
        for status in [
            RenderStatus::Pending,
            RenderStatus::Queued,
            RenderStatus::Processing,
            RenderStatus::Completed,
            RenderStatus::Failed,
            RenderStatus::Cancelled,
        ] {
            assert!(!(status.is_active() && status.is_terminal()));
        }
        // Pending is open but neither active nor terminal.
        assert!(!RenderStatus::Pending.is_active());
        assert!(!RenderStatus::Pending.is_terminal());
    }

    #[test]
    fn terminal_states_accept_no_transitions() {
        for terminal in [
            RenderStatus::Completed,
            RenderStatus::Failed,
            RenderStatus::Cancelled,
        ] {
            for next in [
                RenderStatus::Pending,
                RenderStatus::Queued,
                RenderStatus::Processing,
                RenderStatus::Completed,
                RenderStatus::Failed,
                RenderStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn processing_can_only_finish() {
        assert!(RenderStatus::Processing.can_transition_to(RenderStatus::Completed));
        assert!(RenderStatus::Processing.can_transition_to(RenderStatus::Failed));
        assert!(RenderStatus::Processing.can_transition_to(RenderStatus::Cancelled));
        assert!(!RenderStatus::Processing.can_transition_to(RenderStatus::Pending));
        assert!(!RenderStatus::Processing.can_transition_to(RenderStatus::Queued));
    }

    #[test]
    fn queued_may_be_skipped() {
        assert!(RenderStatus::Pending.can_transition_to(RenderStatus::Processing));
    }

    #[test]
    fn job_duration_requires_both_timestamps() {
        let mut job = RenderJob::new(1, 3);
        assert!(job.duration_seconds().is_none());

        job.started_at = Some(Utc::now());
        assert!(job.duration_seconds().is_none());

        job.completed_at = Some(job.started_at.unwrap() + chrono::Duration::milliseconds(2500));
        assert_eq!(job.duration_seconds(), Some(2.5));
    }
}

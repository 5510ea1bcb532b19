use crate::domain::jobs::{RenderJob, RenderStatus, SceneRender};
use async_trait::async_trait;
use std::error::Error;

/// Partial update for a render job. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<RenderStatus>,
    pub progress: Option<f64>,
    pub current_scene: Option<String>,
    pub completed_scenes: Option<u32>,
    pub output_path: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Partial update for a scene render. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SceneRenderUpdate {
    pub status: Option<RenderStatus>,
    pub audio_path: Option<String>,
    pub frames_path: Option<String>,
    pub composition_path: Option<String>,
    pub final_path: Option<String>,
    pub duration: Option<f64>,
    pub error_message: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobTracker: Send + Sync {
    /// Create a job with the given scene count, initially pending
    async fn create_job(
        &self,
        total_scenes: u32,
    ) -> Result<RenderJob, Box<dyn Error + Send + Sync>>;

    /// Get a job by id
    async fn get_job(&self, id: i64) -> Result<Option<RenderJob>, Box<dyn Error + Send + Sync>>;

    /// List jobs, most recent first
    async fn list_jobs(
        &self,
        limit: usize,
    ) -> Result<Vec<RenderJob>, Box<dyn Error + Send + Sync>>;

    /// Apply a partial update to a job.
    /// Timestamp side effects (started_at, completed_at) are the adapter's
    /// responsibility; callers never set them directly.
    async fn update_job(
        &self,
        id: i64,
        update: JobUpdate,
    ) -> Result<RenderJob, Box<dyn Error + Send + Sync>>;

    /// The most recent non-terminal job, if any
    async fn get_active_job(&self) -> Result<Option<RenderJob>, Box<dyn Error + Send + Sync>>;

    /// Register a scene render under a job
    async fn add_scene_render(
        &self,
        render_job_id: i64,
        scene_id: &str,
    ) -> Result<SceneRender, Box<dyn Error + Send + Sync>>;

    /// All scene renders for a job, in registration order
    async fn list_scene_renders(
        &self,
        render_job_id: i64,
    ) -> Result<Vec<SceneRender>, Box<dyn Error + Send + Sync>>;

    /// Apply a partial update to a scene render
    async fn update_scene_render(
        &self,
        id: i64,
        update: SceneRenderUpdate,
    ) -> Result<SceneRender, Box<dyn Error + Send + Sync>>;
}

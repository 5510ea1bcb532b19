//! In-process job tracker.
//!
//! Enforces the status state machine and the timestamp rules: `started_at`
//! is written exactly once on the first transition into processing,
//! `completed_at` exactly once on the terminal transition, and a terminal
//! record accepts no further writes.

use std::collections::BTreeMap;
use std::error::Error;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::domain::jobs::{RenderJob, RenderStatus, SceneRender};
use crate::error::RenderError;
use crate::ports::tracker::{JobTracker, JobUpdate, SceneRenderUpdate};

#[derive(Default)]
struct TrackerState {
    next_job_id: i64,
    next_scene_id: i64,
    jobs: BTreeMap<i64, RenderJob>,
    scenes: BTreeMap<i64, SceneRender>,
}

#[derive(Default)]
pub struct MemoryTracker {
    state: Mutex<TrackerState>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

fn persistence(msg: impl Into<String>) -> Box<dyn Error + Send + Sync> {
    Box::new(RenderError::Persistence(msg.into()))
}

fn check_transition(
    current: RenderStatus,
    next: RenderStatus,
    what: &str,
    id: i64,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    if current.is_terminal() {
        return Err(persistence(format!(
            "{} {} is already {} and accepts no updates",
            what, id, current
        )));
    }
    if next != current && !current.can_transition_to(next) {
        return Err(persistence(format!(
            "{} {}: illegal transition {} -> {}",
            what, id, current, next
        )));
    }
    Ok(())
}

#[async_trait]
impl JobTracker for MemoryTracker {
    async fn create_job(
        &self,
        total_scenes: u32,
    ) -> Result<RenderJob, Box<dyn Error + Send + Sync>> {
        let mut state = self.state.lock().await;
        state.next_job_id += 1;
        let job = RenderJob::new(state.next_job_id, total_scenes);
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: i64) -> Result<Option<RenderJob>, Box<dyn Error + Send + Sync>> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&id).cloned())
    }

    async fn list_jobs(
        &self,
        limit: usize,
    ) -> Result<Vec<RenderJob>, Box<dyn Error + Send + Sync>> {
        let state = self.state.lock().await;
        Ok(state.jobs.values().rev().take(limit).cloned().collect())
    }

    async fn update_job(
        &self,
        id: i64,
        update: JobUpdate,
    ) -> Result<RenderJob, Box<dyn Error + Send + Sync>> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| persistence(format!("job {} not found", id)))?;

        if let Some(next) = update.status {
            check_transition(job.status, next, "job", id)?;
            let now = Utc::now();
            if next == RenderStatus::Processing && job.started_at.is_none() {
                job.started_at = Some(now);
            }
            if next.is_terminal() && job.completed_at.is_none() {
                job.completed_at = Some(now);
            }
            job.status = next;
        }
        if let Some(progress) = update.progress {
            // Progress never regresses.
            job.progress = job.progress.max(progress.clamp(0.0, 1.0));
        }
        if let Some(current_scene) = update.current_scene {
            job.current_scene = Some(current_scene);
        }
        if let Some(completed_scenes) = update.completed_scenes {
            job.completed_scenes = completed_scenes;
        }
        if let Some(output_path) = update.output_path {
            job.output_path = Some(output_path);
        }
        if let Some(error_message) = update.error_message {
            job.error_message = Some(error_message);
        }
        if let Some(metadata) = update.metadata {
            job.metadata = Some(metadata);
        }
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn get_active_job(&self) -> Result<Option<RenderJob>, Box<dyn Error + Send + Sync>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .rev()
            .find(|job| job.status.is_active())
            .cloned())
    }

    async fn add_scene_render(
        &self,
        render_job_id: i64,
        scene_id: &str,
    ) -> Result<SceneRender, Box<dyn Error + Send + Sync>> {
        let mut state = self.state.lock().await;
        if !state.jobs.contains_key(&render_job_id) {
            return Err(persistence(format!("job {} not found", render_job_id)));
        }
        state.next_scene_id += 1;
        let scene = SceneRender::new(state.next_scene_id, render_job_id, scene_id);
        state.scenes.insert(scene.id, scene.clone());
        Ok(scene)
    }

    async fn list_scene_renders(
        &self,
        render_job_id: i64,
    ) -> Result<Vec<SceneRender>, Box<dyn Error + Send + Sync>> {
        let state = self.state.lock().await;
        Ok(state
            .scenes
            .values()
            .filter(|scene| scene.render_job_id == render_job_id)
            .cloned()
            .collect())
    }

    async fn update_scene_render(
        &self,
        id: i64,
        update: SceneRenderUpdate,
    ) -> Result<SceneRender, Box<dyn Error + Send + Sync>> {
        let mut state = self.state.lock().await;
        let scene = state
            .scenes
            .get_mut(&id)
            .ok_or_else(|| persistence(format!("scene render {} not found", id)))?;

        if let Some(next) = update.status {
            check_transition(scene.status, next, "scene render", id)?;
            let now = Utc::now();
            if next == RenderStatus::Processing && scene.started_at.is_none() {
                scene.started_at = Some(now);
            }
            if next.is_terminal() && scene.completed_at.is_none() {
                scene.completed_at = Some(now);
            }
            scene.status = next;
        }
        if let Some(audio_path) = update.audio_path {
            scene.audio_path = Some(audio_path);
        }
        if let Some(frames_path) = update.frames_path {
            scene.frames_path = Some(frames_path);
        }
        if let Some(composition_path) = update.composition_path {
            scene.composition_path = Some(composition_path);
        }
        if let Some(final_path) = update.final_path {
            scene.final_path = Some(final_path);
        }
        if let Some(duration) = update.duration {
            scene.duration = Some(duration);
        }
        if let Some(error_message) = update.error_message {
            scene.error_message = Some(error_message);
        }
        Ok(scene.clone())
    }
}

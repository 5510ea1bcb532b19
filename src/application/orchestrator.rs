//! Render orchestrator: runs every scene of a spec through the pipeline
//! and concatenates the segments into one output video.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tracing::{error, info, warn};

use crate::config::RenderConfig;
use crate::domain::jobs::RenderStatus;
use crate::domain::progress::{RenderPhase, RenderProgress};
use crate::domain::spec::VideoSpec;
use crate::engines::character::CharacterEngine;
use crate::engines::cmd::{
    AnimatorRunner, CompositorRunner, FfmpegRunner, LipSyncRunner, RealAnimatorRunner,
    RealCompositorRunner, RealFfmpegRunner, RealLipSyncRunner, RealSpeechClient, SpeechClient,
};
use crate::engines::composition::CompositionEngine;
use crate::engines::speech::SpeechEngine;
use crate::error::RenderError;
use crate::pipeline::{ScenePipeline, SceneOutcome};
use crate::ports::hooks::{CredentialPreflight, PreflightHook, SpecPreflight};
use crate::ports::tracker::{JobTracker, JobUpdate, SceneRenderUpdate};

type ProgressObserver = Box<dyn Fn(&RenderProgress) + Send + Sync>;

/// Drives a full render: pre-flight hooks, job bookkeeping, the per-scene
/// pipeline loop, and the final concatenation.
///
/// Every render gets a fresh scratch directory, released when `render`
/// returns, successfully or not; the output file appears at its destination
/// only after a successful mux.
pub struct RenderOrchestrator {
    config: RenderConfig,
    speech_client: Arc<dyn SpeechClient>,
    animator: Arc<dyn AnimatorRunner>,
    lip_sync: Arc<dyn LipSyncRunner>,
    compositor: Arc<dyn CompositorRunner>,
    ffmpeg: Arc<dyn FfmpegRunner>,
    tracker: Option<Arc<dyn JobTracker>>,
    hooks: Vec<Box<dyn PreflightHook>>,
    observers: Vec<ProgressObserver>,
}

impl RenderOrchestrator {
    /// Orchestrator wired to the real external tools.
    pub fn new(config: RenderConfig) -> Self {
        let speech_client = Arc::new(RealSpeechClient::new(config.speech_timeout));
        let animator = Arc::new(RealAnimatorRunner::new(
            config.animator_bin.clone(),
            config.animator_timeout,
        ));
        let lip_sync = Arc::new(RealLipSyncRunner::new(
            config.rhubarb_bin.clone(),
            config.ffmpeg_timeout,
        ));
        let compositor = Arc::new(RealCompositorRunner::new(
            config.compositor_bin.clone(),
            config.compositor_timeout,
        ));
        let ffmpeg = Arc::new(RealFfmpegRunner::new(config.ffmpeg_timeout));
        Self::with_runners(config, speech_client, animator, lip_sync, compositor, ffmpeg)
    }

    /// Orchestrator over explicit runners. Tests inject mocks here.
    pub fn with_runners(
        config: RenderConfig,
        speech_client: Arc<dyn SpeechClient>,
        animator: Arc<dyn AnimatorRunner>,
        lip_sync: Arc<dyn LipSyncRunner>,
        compositor: Arc<dyn CompositorRunner>,
        ffmpeg: Arc<dyn FfmpegRunner>,
    ) -> Self {
        let hooks: Vec<Box<dyn PreflightHook>> = vec![
            Box::new(SpecPreflight),
            Box::new(CredentialPreflight::new(config.clone())),
        ];

        Self {
            config,
            speech_client,
            animator,
            lip_sync,
            compositor,
            ffmpeg,
            tracker: None,
            hooks,
            observers: Vec::new(),
        }
    }

    pub fn set_tracker(&mut self, tracker: Arc<dyn JobTracker>) {
        self.tracker = Some(tracker);
    }

    pub fn add_hook(&mut self, hook: Box<dyn PreflightHook>) {
        self.hooks.push(hook);
    }

    pub fn on_progress(&mut self, observer: impl Fn(&RenderProgress) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Render the whole spec into `output_path`.
    ///
    /// Scene-level failures degrade and are recorded; a missing provider
    /// credential and a failed final mux are fatal. On a fatal error no
    /// partial output file is left behind.
    pub async fn render(
        &self,
        spec: &VideoSpec,
        output_path: &Path,
    ) -> Result<PathBuf, RenderError> {
        let job_id = self.create_job(spec).await;

        if let Err(e) = self.run_hooks(spec) {
            self.fail_job(job_id, &e).await;
            return Err(e);
        }

        // Scratch lives for exactly one render; a later render on the same
        // orchestrator starts from an empty workspace.
        let scratch = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => {
                let e = RenderError::Io(e);
                self.fail_job(job_id, &e).await;
                return Err(e);
            }
        };
        let pipeline = match self.build_pipeline(scratch.path()) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.fail_job(job_id, &e).await;
                return Err(e);
            }
        };

        self.track_job(
            job_id,
            JobUpdate {
                status: Some(RenderStatus::Processing),
                ..JobUpdate::default()
            },
        )
        .await;

        let progress = Mutex::new(RenderProgress::new(spec.scenes.len()));
        let mut segments: Vec<(String, PathBuf, f64)> = Vec::new();
        // Narration clips by scene id, kept even when the owning scene later
        // fails so the fallback render can still mux them.
        let mut narration: HashMap<String, PathBuf> = HashMap::new();

        for scene in &spec.scenes {
            let scene_row = self.track_scene_start(job_id, &scene.id).await;
            self.update_progress(&progress, |p| {
                p.update(&scene.id, RenderPhase::Audio);
            });
            self.track_job(
                job_id,
                JobUpdate {
                    current_scene: Some(scene.id.clone()),
                    progress: Some(self.overall(&progress)),
                    ..JobUpdate::default()
                },
            )
            .await;

            let outcome = pipeline
                .process_scene(scene, &spec.output, &|scene_id, phase| {
                    self.update_progress(&progress, |p| p.update(scene_id, phase));
                })
                .await;

            match outcome {
                Ok(outcome) => {
                    if let Some(clip) = outcome.audio.as_ref().and_then(|a| a.output_path.clone())
                    {
                        narration.insert(outcome.scene_id.clone(), clip);
                    }
                    if let Some(audio_error) = &outcome.audio_error {
                        self.update_progress(&progress, |p| p.record_error(audio_error.clone()));
                    }
                    self.track_scene_done(scene_row, &outcome).await;
                    segments.push((
                        outcome.scene_id.clone(),
                        outcome.segment_path.clone(),
                        outcome.duration,
                    ));
                    self.update_progress(&progress, |p| p.mark_scene_complete(&scene.id));
                }
                Err(failure) => {
                    if let Some(clip) = failure.audio.as_ref().and_then(|a| a.output_path.clone())
                    {
                        narration.insert(scene.id.clone(), clip);
                    }
                    let e = failure.error;
                    self.track_scene_failed(scene_row, &e).await;
                    self.update_progress(&progress, |p| p.record_error(e.to_string()));
                    if e.is_fatal() {
                        error!(scene = %scene.id, error = %e, "fatal scene error, aborting render");
                        self.fail_job(job_id, &e).await;
                        return Err(e);
                    }
                    warn!(scene = %scene.id, error = %e, "scene failed, excluded from output");
                    self.update_progress(&progress, |p| p.mark_scene_failed(&scene.id));
                }
            }

            self.track_job(
                job_id,
                JobUpdate {
                    progress: Some(self.overall(&progress)),
                    completed_scenes: Some(self.completed(&progress)),
                    ..JobUpdate::default()
                },
            )
            .await;
        }

        self.update_progress(&progress, |p| {
            p.current_phase = Some(RenderPhase::Concat);
        });

        let result = self
            .compose(spec, &segments, &narration, scratch.path(), output_path)
            .await;
        match result {
            Ok(final_path) => {
                self.update_progress(&progress, |p| p.set_complete());
                self.track_job(
                    job_id,
                    JobUpdate {
                        status: Some(RenderStatus::Completed),
                        progress: Some(1.0),
                        output_path: Some(final_path.display().to_string()),
                        ..JobUpdate::default()
                    },
                )
                .await;
                info!(output = %final_path.display(), "render complete");
                Ok(final_path)
            }
            Err(e) => {
                self.fail_job(job_id, &e).await;
                Err(e)
            }
        }
    }

    /// Build the per-render pipeline over a fresh scratch directory. Each
    /// engine owns a private subdirectory; artifacts cross stage boundaries
    /// only via explicit result paths.
    fn build_pipeline(&self, scratch: &Path) -> Result<ScenePipeline, RenderError> {
        let speech_dir = scratch.join("speech");
        let character_dir = scratch.join("character");
        let composition_dir = scratch.join("composition");
        std::fs::create_dir_all(&speech_dir)?;
        std::fs::create_dir_all(&character_dir)?;
        std::fs::create_dir_all(&composition_dir)?;

        let speech = SpeechEngine::new(
            self.speech_client.clone(),
            self.ffmpeg.clone(),
            self.config.clone(),
            speech_dir,
        );
        let character = CharacterEngine::new(
            self.animator.clone(),
            self.lip_sync.clone(),
            self.ffmpeg.clone(),
            character_dir,
        );
        let composition =
            CompositionEngine::new(self.compositor.clone(), self.ffmpeg.clone(), composition_dir);
        Ok(ScenePipeline::new(speech, character, composition))
    }

    fn run_hooks(&self, spec: &VideoSpec) -> Result<(), RenderError> {
        for hook in &self.hooks {
            let decision = hook.check(spec);
            if decision.allow {
                continue;
            }
            let reason = decision
                .reason
                .unwrap_or_else(|| "no reason given".to_string());
            return Err(match (decision.scene_id, decision.provider) {
                (Some(scene_id), Some(provider)) => RenderError::ProviderUnavailable {
                    scene_id,
                    provider,
                    reason,
                },
                _ => RenderError::Configuration(format!(
                    "pre-flight '{}' denied: {}",
                    hook.name(),
                    reason
                )),
            });
        }
        Ok(())
    }

    /// Concatenate the usable segments, or synthesize flat-color segments
    /// from the spec when every scene failed. The result lands in scratch
    /// first and moves to `output_path` only on success.
    async fn compose(
        &self,
        spec: &VideoSpec,
        segments: &[(String, PathBuf, f64)],
        narration: &HashMap<String, PathBuf>,
        scratch: &Path,
        output_path: &Path,
    ) -> Result<PathBuf, RenderError> {
        let mut paths: Vec<PathBuf> = segments.iter().map(|(_, p, _)| p.clone()).collect();

        if paths.is_empty() {
            warn!("no usable segments, synthesizing flat-color fallback");
            paths = self.fallback_segments(spec, narration, scratch).await?;
        }

        let list_path = scratch.join("concat.txt");
        let mut listing = String::new();
        for path in &paths {
            listing.push_str(&format!("file '{}'\n", path.display()));
        }
        tokio::fs::write(&list_path, listing).await?;

        let scratch_output = scratch.join(format!("final.{}", spec.output.format));
        let output = self
            .ffmpeg
            .concat(&list_path, &scratch_output)
            .await
            .map_err(|e| RenderError::Mux(format!("concat failed: {}", e)))?;
        if !output.status.success() || !scratch_output.exists() {
            return Err(RenderError::Mux(format!(
                "concat exited {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        // Scratch may sit on a different filesystem; copy instead of rename.
        // The scratch copy goes away with the work dir.
        tokio::fs::copy(&scratch_output, output_path).await?;
        Ok(output_path.to_path_buf())
    }

    async fn fallback_segments(
        &self,
        spec: &VideoSpec,
        narration: &HashMap<String, PathBuf>,
        scratch: &Path,
    ) -> Result<Vec<PathBuf>, RenderError> {
        let mut paths = Vec::with_capacity(spec.scenes.len());
        for scene in &spec.scenes {
            let path = scratch.join(format!("{}_fallback.{}", scene.id, spec.output.format));
            // Narration synthesized before the scene failed, handed over by
            // the pipeline.
            let audio = narration.get(&scene.id).cloned();
            let output = self
                .ffmpeg
                .color_clip(
                    scene.background_color(),
                    scene.duration_seconds(),
                    &spec.output.resolution,
                    spec.output.fps,
                    audio,
                    &path,
                )
                .await
                .map_err(|e| RenderError::Mux(format!("fallback synthesis failed: {}", e)))?;
            if !output.status.success() || !path.exists() {
                return Err(RenderError::Mux(format!(
                    "fallback synthesis for scene '{}' exited {:?}",
                    scene.id,
                    output.status.code()
                )));
            }
            paths.push(path);
        }
        Ok(paths)
    }

    fn update_progress(&self, progress: &Mutex<RenderProgress>, apply: impl FnOnce(&mut RenderProgress)) {
        let snapshot = {
            let mut guard = progress.lock().unwrap_or_else(|e| e.into_inner());
            apply(&mut guard);
            guard.clone()
        };
        for observer in &self.observers {
            // An observer failure must never abort a render.
            let called =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observer(&snapshot)));
            if called.is_err() {
                warn!("progress observer panicked");
            }
        }
    }

    fn overall(&self, progress: &Mutex<RenderProgress>) -> f64 {
        progress.lock().unwrap_or_else(|e| e.into_inner()).overall
    }

    fn completed(&self, progress: &Mutex<RenderProgress>) -> u32 {
        progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .completed_scenes as u32
    }

    // Tracker writes are best-effort: a persistence failure is logged and
    // never fails the render.

    async fn create_job(&self, spec: &VideoSpec) -> Option<i64> {
        let tracker = self.tracker.as_ref()?;
        match tracker.create_job(spec.scenes.len() as u32).await {
            Ok(job) => Some(job.id),
            Err(e) => {
                warn!(error = %e, "could not create job record");
                None
            }
        }
    }

    async fn track_job(&self, job_id: Option<i64>, update: JobUpdate) {
        if let (Some(tracker), Some(id)) = (self.tracker.as_ref(), job_id) {
            if let Err(e) = tracker.update_job(id, update).await {
                warn!(job = id, error = %e, "job update failed");
            }
        }
    }

    async fn fail_job(&self, job_id: Option<i64>, err: &RenderError) {
        self.track_job(
            job_id,
            JobUpdate {
                status: Some(RenderStatus::Failed),
                error_message: Some(err.to_string()),
                ..JobUpdate::default()
            },
        )
        .await;
    }

    async fn track_scene_start(&self, job_id: Option<i64>, scene_id: &str) -> Option<i64> {
        let tracker = self.tracker.as_ref()?;
        let id = job_id?;
        let row = match tracker.add_scene_render(id, scene_id).await {
            Ok(row) => row,
            Err(e) => {
                warn!(job = id, scene = scene_id, error = %e, "could not create scene record");
                return None;
            }
        };
        if let Err(e) = tracker
            .update_scene_render(
                row.id,
                SceneRenderUpdate {
                    status: Some(RenderStatus::Processing),
                    ..SceneRenderUpdate::default()
                },
            )
            .await
        {
            warn!(scene = scene_id, error = %e, "scene update failed");
        }
        Some(row.id)
    }

    async fn track_scene_done(&self, row_id: Option<i64>, outcome: &SceneOutcome) {
        if let (Some(tracker), Some(id)) = (self.tracker.as_ref(), row_id) {
            let update = SceneRenderUpdate {
                status: Some(RenderStatus::Completed),
                audio_path: outcome
                    .audio
                    .as_ref()
                    .and_then(|a| a.output_path.as_ref())
                    .map(|p| p.display().to_string()),
                frames_path: outcome
                    .character
                    .as_ref()
                    .and_then(|c| c.output_path.as_ref())
                    .map(|p| p.display().to_string()),
                composition_path: Some(outcome.segment_path.display().to_string()),
                final_path: Some(outcome.segment_path.display().to_string()),
                duration: Some(outcome.duration),
                error_message: outcome.audio_error.clone(),
            };
            if let Err(e) = tracker.update_scene_render(id, update).await {
                warn!(scene = %outcome.scene_id, error = %e, "scene update failed");
            }
        }
    }

    async fn track_scene_failed(&self, row_id: Option<i64>, err: &RenderError) {
        if let (Some(tracker), Some(id)) = (self.tracker.as_ref(), row_id) {
            if let Err(e) = tracker
                .update_scene_render(
                    id,
                    SceneRenderUpdate {
                        status: Some(RenderStatus::Failed),
                        error_message: Some(err.to_string()),
                        ..SceneRenderUpdate::default()
                    },
                )
                .await
            {
                warn!(error = %e, "scene update failed");
            }
        }
    }
}

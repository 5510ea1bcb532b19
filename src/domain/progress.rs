//! In-memory progress tracking for a single render run.

use serde::Serialize;

/// Phase of work within one scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderPhase {
    Audio,
    Character,
    Composition,
    Concat,
}

impl RenderPhase {
    /// Cumulative fraction of a single scene's work completed once this
    /// phase begins. Weights add to below 1.0; the remainder is credited
    /// when the scene is marked complete.
    fn scene_fraction(&self) -> f64 {
        match self {
            RenderPhase::Audio => 0.1,
            RenderPhase::Character => 0.5,
            RenderPhase::Composition => 0.9,
            RenderPhase::Concat => 1.0,
        }
    }
}

/// Snapshot of overall render progress, pushed to observers.
///
/// `overall` is non-decreasing for the lifetime of a render: every update
/// is clamped against the previous value.
#[derive(Debug, Clone, Serialize)]
pub struct RenderProgress {
    pub total_scenes: usize,
    /// Scenes that produced a usable segment.
    pub completed_scenes: usize,
    /// Scenes excluded from the output after a failure.
    pub failed_scenes: usize,
    pub current_scene: Option<String>,
    pub current_phase: Option<RenderPhase>,
    /// Overall completion in `[0.0, 1.0]`.
    pub overall: f64,
    /// Scene-level error descriptions accumulated so far.
    pub errors: Vec<String>,
}

impl RenderProgress {
    pub fn new(total_scenes: usize) -> Self {
        Self {
            total_scenes,
            completed_scenes: 0,
            failed_scenes: 0,
            current_scene: None,
            current_phase: None,
            overall: 0.0,
            errors: Vec::new(),
        }
    }

    /// Record that `phase` is starting for `scene_id`.
    pub fn update(&mut self, scene_id: &str, phase: RenderPhase) {
        self.current_scene = Some(scene_id.to_string());
        self.current_phase = Some(phase);
        if self.total_scenes == 0 {
            return;
        }
        let within_scene = phase.scene_fraction();
        let processed = (self.completed_scenes + self.failed_scenes) as f64;
        let overall = (processed + within_scene) / self.total_scenes as f64;
        // Never regress, even across out-of-order updates.
        self.overall = self.overall.max(overall.min(1.0));
    }

    /// Record that a scene produced a usable segment.
    pub fn mark_scene_complete(&mut self, scene_id: &str) {
        self.completed_scenes += 1;
        self.finish_scene(scene_id);
    }

    /// Record that a scene failed and was excluded from the output. Its
    /// share of the overall progress is still credited.
    pub fn mark_scene_failed(&mut self, scene_id: &str) {
        self.failed_scenes += 1;
        self.finish_scene(scene_id);
    }

    fn finish_scene(&mut self, scene_id: &str) {
        self.current_scene = Some(scene_id.to_string());
        if self.total_scenes > 0 {
            let processed = (self.completed_scenes + self.failed_scenes).min(self.total_scenes);
            self.overall = self
                .overall
                .max(processed as f64 / self.total_scenes as f64);
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Mark the whole render finished. Scene counters keep their final
    /// values; failed scenes stay failed.
    pub fn set_complete(&mut self) {
        self.current_scene = None;
        self.current_phase = None;
        self.overall = 1.0;
    }

    pub fn is_complete(&self) -> bool {
        self.overall >= 1.0
    }
}

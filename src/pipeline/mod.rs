//! Scene pipeline: drives one scene through speech, character and
//! composition, wiring each stage's output into the next stage's input.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::domain::progress::RenderPhase;
use crate::domain::spec::{OutputConfig, Scene};
use crate::engines::character::{CharacterEngine, CharacterSceneConfig};
use crate::engines::composition::{CompositionConfig, CompositionEngine};
use crate::engines::speech::{SpeechConfig, SpeechEngine};
use crate::engines::EngineResult;
use crate::error::RenderError;

/// Per-scene result bundle handed back to the orchestrator.
#[derive(Debug)]
pub struct SceneOutcome {
    pub scene_id: String,
    /// Effective duration: measured audio when available, declared otherwise.
    pub duration: f64,
    pub audio: Option<EngineResult>,
    pub character: Option<EngineResult>,
    pub composition: EngineResult,
    pub segment_path: PathBuf,
    /// Scene-local speech failure, recorded but not fatal to the scene.
    pub audio_error: Option<String>,
}

/// A failed scene together with whatever artifacts the earlier stages
/// produced. The orchestrator reuses them, so a narration clip survives its
/// scene's failure.
#[derive(Debug)]
pub struct SceneFailure {
    pub error: RenderError,
    pub audio: Option<EngineResult>,
}

pub struct ScenePipeline {
    speech: SpeechEngine,
    character: CharacterEngine,
    composition: CompositionEngine,
}

impl ScenePipeline {
    pub fn new(
        speech: SpeechEngine,
        character: CharacterEngine,
        composition: CompositionEngine,
    ) -> Self {
        Self {
            speech,
            character,
            composition,
        }
    }

    /// Run one scene to a finished segment.
    ///
    /// `on_phase` fires as each phase starts. Speech runs only when the
    /// scene declares audio; character only when the scene declares a
    /// character AND speech produced a clip (no lip-sync target otherwise);
    /// composition always runs.
    pub async fn process_scene(
        &self,
        scene: &Scene,
        output: &OutputConfig,
        on_phase: &(dyn Fn(&str, RenderPhase) + Send + Sync),
    ) -> Result<SceneOutcome, SceneFailure> {
        let mut duration = scene.duration_seconds();
        let mut audio_result: Option<EngineResult> = None;
        let mut audio_error: Option<String> = None;

        if let Some(audio) = &scene.audio {
            on_phase(&scene.id, RenderPhase::Audio);
            let config = SpeechConfig {
                scene_id: scene.id.clone(),
                audio: audio.clone(),
            };
            match self.speech.process(&config).await {
                Ok(result) => {
                    if result.duration > 0.0 {
                        duration = result.duration;
                    }
                    audio_result = Some(result);
                }
                // Missing credential aborts the render; a provider-side
                // synthesis failure only silences this scene.
                Err(error @ RenderError::ProviderUnavailable { .. }) => {
                    return Err(SceneFailure { error, audio: None })
                }
                Err(e) => {
                    warn!(scene = %scene.id, error = %e, "speech failed, continuing without narration");
                    audio_error = Some(e.to_string());
                }
            }
        }

        let audio_path = audio_result
            .as_ref()
            .and_then(|r| r.output_path.clone());

        let mut character_result: Option<EngineResult> = None;
        if let Some(character) = &scene.character {
            if let Some(audio_path) = &audio_path {
                on_phase(&scene.id, RenderPhase::Character);
                let config = CharacterSceneConfig {
                    scene_id: scene.id.clone(),
                    character: character.clone(),
                    audio_path: audio_path.clone(),
                    duration,
                    resolution: output.resolution.clone(),
                    fps: output.fps,
                };
                character_result = match self.character.process(&config).await {
                    Ok(result) => Some(result),
                    Err(error) => {
                        return Err(SceneFailure {
                            error,
                            audio: audio_result,
                        })
                    }
                };
            }
        }

        on_phase(&scene.id, RenderPhase::Composition);
        let composition_config = CompositionConfig {
            scene_id: scene.id.clone(),
            duration,
            frames_dir: character_result
                .as_ref()
                .and_then(|r| r.output_path.clone()),
            audio_path,
            background: scene.background.clone(),
            position: scene.character_position(),
            camera: None,
            resolution: output.resolution.clone(),
            fps: output.fps,
            format: output.format,
        };
        let composition = match self.composition.process(&composition_config).await {
            Ok(result) => result,
            Err(error) => {
                return Err(SceneFailure {
                    error,
                    audio: audio_result,
                })
            }
        };

        let segment_path = match composition.output_path.clone() {
            Some(path) => path,
            None => {
                return Err(SceneFailure {
                    error: RenderError::ToolFailed {
                        stage: "composition",
                        message: format!("scene '{}': no segment produced", scene.id),
                    },
                    audio: audio_result,
                })
            }
        };

        info!(scene = %scene.id, duration, segment = %segment_path.display(), "scene rendered");

        Ok(SceneOutcome {
            scene_id: scene.id.clone(),
            duration,
            audio: audio_result,
            character: character_result,
            composition,
            segment_path,
            audio_error,
        })
    }
}

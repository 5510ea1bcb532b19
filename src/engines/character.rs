//! Character engine: lip-synced 2D character frames for one scene.
//!
//! The external animation tool consumes a JSON control script (expression
//! pose, viseme keyframes, frame budget) and emits a numbered PNG sequence.
//! When the tool is missing or fails the engine degrades to a deterministic
//! solid-color placeholder sequence so composition always has frames to
//! work with.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::domain::spec::{CharacterConfig, Position};
use crate::engines::cmd::{AnimatorRunner, FfmpegRunner, LipSyncRunner};
use crate::engines::EngineResult;
use crate::error::RenderError;

/// Placeholder sequences are capped regardless of scene length.
const MAX_PLACEHOLDER_FRAMES: u32 = 300;

/// Basic lip-sync cadence: one phoneme per step.
const BASIC_STEP_SECS: f64 = 0.1;
const BASIC_SEQUENCE: [&str; 5] = ["SIL", "AA", "M", "AA", "SIL"];

#[derive(Debug, Clone)]
pub struct CharacterSceneConfig {
    pub scene_id: String,
    pub character: CharacterConfig,
    pub audio_path: PathBuf,
    /// Effective scene duration in seconds (measured audio when available).
    pub duration: f64,
    pub resolution: String,
    pub fps: u32,
}

/// One timed mouth shape extracted from narration audio.
#[derive(Debug, Clone, PartialEq)]
pub struct MouthCue {
    pub time: f64,
    pub phoneme: String,
    pub duration: f64,
}

/// Eyebrow/eye/mouth pose for a named expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpressionPose {
    pub brows: f64,
    pub eyes: f64,
    pub mouth_curve: f64,
}

/// CMU phoneme to mouth-shape name. Unknown phonemes rest the mouth.
pub fn viseme_for(phoneme: &str) -> &'static str {
    match phoneme {
        "AA" | "AE" | "AH" | "HH" => "mouth_open",
        "AO" | "AW" | "ER" | "OW" | "OY" | "UH" | "UW" | "R" | "W" => "mouth_round",
        "AY" | "EH" | "EY" => "mouth_wide",
        "IH" | "IY" | "Y" => "mouth_smile",
        "B" | "M" | "P" => "mouth_closed",
        "CH" | "D" | "DH" | "G" | "JH" | "K" | "N" | "NG" | "S" | "SH" | "T" | "Z" | "ZH" => {
            "mouth_narrow"
        }
        "F" | "V" => "mouth_f",
        "L" => "mouth_l",
        "TH" => "mouth_th",
        _ => "mouth_rest",
    }
}

/// Pose for a named expression; unknown names fall back to neutral.
pub fn expression_pose(name: &str) -> ExpressionPose {
    match name {
        "happy" => ExpressionPose {
            brows: 0.2,
            eyes: 0.1,
            mouth_curve: 0.5,
        },
        "sad" => ExpressionPose {
            brows: -0.3,
            eyes: -0.1,
            mouth_curve: -0.4,
        },
        "angry" => ExpressionPose {
            brows: -0.5,
            eyes: 0.2,
            mouth_curve: -0.2,
        },
        "surprised" => ExpressionPose {
            brows: 0.6,
            eyes: 0.4,
            mouth_curve: 0.1,
        },
        "thinking" => ExpressionPose {
            brows: 0.3,
            eyes: -0.2,
            mouth_curve: 0.0,
        },
        "excited" => ExpressionPose {
            brows: 0.4,
            eyes: 0.3,
            mouth_curve: 0.6,
        },
        _ => ExpressionPose {
            brows: 0.0,
            eyes: 0.0,
            mouth_curve: 0.0,
        },
    }
}

/// Placeholder frame color keyed to the character's stage position.
pub fn placeholder_color(position: Position) -> &'static str {
    match position {
        Position::Left => "#3498DB",
        Position::Center => "#2ECC71",
        Position::Right => "#E74C3C",
    }
}

/// Fixed-cadence fallback timeline covering the full duration.
pub fn basic_timeline(duration: f64) -> Vec<MouthCue> {
    let mut cues = Vec::new();
    let mut time = 0.0;
    'outer: while time < duration {
        for phoneme in BASIC_SEQUENCE {
            if time >= duration {
                break 'outer;
            }
            cues.push(MouthCue {
                time,
                phoneme: phoneme.to_string(),
                duration: BASIC_STEP_SECS,
            });
            time += BASIC_STEP_SECS;
        }
    }
    cues
}

/// Parse rhubarb machine-readable JSON into a cue timeline.
pub fn parse_rhubarb_json(raw: &str) -> Result<Vec<MouthCue>, RenderError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| RenderError::ToolFailed {
            stage: "character",
            message: format!("unreadable lip-sync output: {}", e),
        })?;
    let cues = value
        .get("mouthCues")
        .and_then(|c| c.as_array())
        .ok_or_else(|| RenderError::ToolFailed {
            stage: "character",
            message: "lip-sync output has no mouthCues".to_string(),
        })?;

    let mut timeline = Vec::with_capacity(cues.len());
    for cue in cues {
        let start = cue.get("start").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let end = cue.get("end").and_then(|v| v.as_f64()).unwrap_or(start);
        let value = cue
            .get("value")
            .and_then(|v| v.as_str())
            .unwrap_or("SIL")
            .to_string();
        timeline.push(MouthCue {
            time: start,
            phoneme: value,
            duration: (end - start).max(0.0),
        });
    }
    Ok(timeline)
}

pub struct CharacterEngine {
    animator: Arc<dyn AnimatorRunner>,
    lip_sync: Arc<dyn LipSyncRunner>,
    ffmpeg: Arc<dyn FfmpegRunner>,
    work_dir: PathBuf,
}

impl CharacterEngine {
    pub fn new(
        animator: Arc<dyn AnimatorRunner>,
        lip_sync: Arc<dyn LipSyncRunner>,
        ffmpeg: Arc<dyn FfmpegRunner>,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            animator,
            lip_sync,
            ffmpeg,
            work_dir,
        }
    }

    pub fn validate(&self, config: &CharacterSceneConfig) -> bool {
        !config.character.asset.is_empty()
            && (0.1..=3.0).contains(&config.character.scale)
            && config.duration > 0.0
            && config.fps > 0
    }

    pub async fn process(
        &self,
        config: &CharacterSceneConfig,
    ) -> Result<EngineResult, RenderError> {
        let timeline = self.extract_lip_sync(config).await;
        let used_rhubarb = timeline.1;
        let timeline = timeline.0;

        let frames_dir = self.work_dir.join(format!("{}_frames", config.scene_id));
        tokio::fs::create_dir_all(&frames_dir).await?;

        let script_path = self
            .work_dir
            .join(format!("{}_control.json", config.scene_id));
        self.write_control_script(config, &timeline, &script_path)
            .await?;

        let mut placeholder = false;
        if self.animator.is_available() {
            let rendered = self
                .animator
                .render_frames(
                    Path::new(&config.character.asset),
                    &script_path,
                    &frames_dir,
                    config.fps,
                )
                .await;
            match rendered {
                Ok(output) if output.status.success() && frame_count(&frames_dir) > 0 => {
                    debug!(scene = %config.scene_id, "animator rendered character frames");
                }
                Ok(output) => {
                    warn!(
                        scene = %config.scene_id,
                        status = ?output.status,
                        "animator produced no frames, using placeholders"
                    );
                    placeholder = true;
                }
                Err(e) => {
                    warn!(scene = %config.scene_id, error = %e, "animator failed, using placeholders");
                    placeholder = true;
                }
            }
        } else {
            placeholder = true;
        }

        if placeholder {
            self.render_placeholders(config, &frames_dir).await;
        }

        let frames = frame_count(&frames_dir);
        let mut result = EngineResult::new(&config.scene_id);
        result.duration = config.duration;
        result.output_path = if frames > 0 { Some(frames_dir) } else { None };
        // Placeholder frames carry no mouth animation at all.
        result
            .metadata
            .insert("lip_sync_applied".into(), (!placeholder).into());
        result.metadata.insert(
            "lip_sync_source".into(),
            if used_rhubarb { "rhubarb" } else { "basic" }.into(),
        );
        result.metadata.insert("placeholder".into(), placeholder.into());
        result
            .metadata
            .insert("frame_count".into(), (frames as u64).into());
        result.metadata.insert(
            "expression".into(),
            config.character.expression.clone().into(),
        );
        Ok(result)
    }

    /// Rhubarb when installed and successful, basic cadence otherwise.
    /// Returns the timeline and whether rhubarb produced it.
    async fn extract_lip_sync(&self, config: &CharacterSceneConfig) -> (Vec<MouthCue>, bool) {
        if self.lip_sync.is_available() {
            let cues_path = self
                .work_dir
                .join(format!("{}_lipsync.json", config.scene_id));
            match self.lip_sync.extract(&config.audio_path, &cues_path).await {
                Ok(output) if output.status.success() => {
                    match tokio::fs::read_to_string(&cues_path).await {
                        Ok(raw) => match parse_rhubarb_json(&raw) {
                            Ok(timeline) if !timeline.is_empty() => return (timeline, true),
                            Ok(_) => {
                                warn!(scene = %config.scene_id, "rhubarb produced an empty timeline")
                            }
                            Err(e) => warn!(scene = %config.scene_id, error = %e, "rhubarb output unusable"),
                        },
                        Err(e) => {
                            warn!(scene = %config.scene_id, error = %e, "cannot read rhubarb output")
                        }
                    }
                }
                Ok(output) => warn!(
                    scene = %config.scene_id,
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "rhubarb exited non-zero"
                ),
                Err(e) => warn!(scene = %config.scene_id, error = %e, "rhubarb invocation failed"),
            }
        }
        (basic_timeline(config.duration), false)
    }

    async fn write_control_script(
        &self,
        config: &CharacterSceneConfig,
        timeline: &[MouthCue],
        script_path: &Path,
    ) -> Result<(), RenderError> {
        let pose = expression_pose(&config.character.expression);
        let total_frames = (config.duration * config.fps as f64) as u32;
        let keyframes: Vec<serde_json::Value> = timeline
            .iter()
            .map(|cue| {
                json!({
                    "frame": (cue.time * config.fps as f64) as u32,
                    "viseme": viseme_for(&cue.phoneme),
                })
            })
            .collect();

        let script = json!({
            "scene_id": config.scene_id,
            "asset": config.character.asset,
            "expression": {
                "name": config.character.expression,
                "brows": pose.brows,
                "eyes": pose.eyes,
                "mouth_curve": pose.mouth_curve,
            },
            "scale": config.character.scale,
            "position": config.character.position.to_string(),
            "fps": config.fps,
            "total_frames": total_frames,
            "keyframes": keyframes,
        });

        let raw = serde_json::to_string_pretty(&script).map_err(|e| {
            RenderError::ToolFailed {
                stage: "character",
                message: format!("cannot encode control script: {}", e),
            }
        })?;
        tokio::fs::write(script_path, raw).await?;
        Ok(())
    }

    async fn render_placeholders(&self, config: &CharacterSceneConfig, frames_dir: &Path) {
        let total_frames = (config.duration * config.fps as f64) as u32;
        let frame_budget = total_frames.min(MAX_PLACEHOLDER_FRAMES).max(1);
        let color = placeholder_color(config.character.position);
        let pattern = frames_dir.join("frame_%05d.png");

        match self
            .ffmpeg
            .color_frames(color, &config.resolution, config.fps, frame_budget, &pattern)
            .await
        {
            Ok(output) if output.status.success() => {}
            Ok(output) => warn!(
                scene = %config.scene_id,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "placeholder frame generation exited non-zero"
            ),
            Err(e) => warn!(scene = %config.scene_id, error = %e, "placeholder frame generation failed"),
        }
    }
}

fn frame_count(frames_dir: &Path) -> usize {
    std::fs::read_dir(frames_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.path()
                        .extension()
                        .map(|ext| ext == "png")
                        .unwrap_or(false)
                })
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::cmd::{MockAnimatorRunner, MockFfmpegRunner, MockLipSyncRunner};
    use std::os::unix::process::ExitStatusExt;
    use std::process::{ExitStatus, Output};
    use tempfile::tempdir;

    fn ok_output() -> Output {
        Output {
            status: ExitStatus::from_raw(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    fn scene_config(dir: &Path) -> CharacterSceneConfig {
        CharacterSceneConfig {
            scene_id: "intro".into(),
            character: CharacterConfig {
                asset: "assets/presenter.rig".into(),
                position: Position::Left,
                expression: "happy".into(),
                scale: 1.0,
            },
            audio_path: dir.join("intro_narration.mp3"),
            duration: 2.0,
            resolution: "1280x720".into(),
            fps: 30,
        }
    }

    #[test]
    fn viseme_table_covers_the_cmu_set() {
        assert_eq!(viseme_for("AA"), "mouth_open");
        assert_eq!(viseme_for("UW"), "mouth_round");
        assert_eq!(viseme_for("EY"), "mouth_wide");
        assert_eq!(viseme_for("IY"), "mouth_smile");
        assert_eq!(viseme_for("M"), "mouth_closed");
        assert_eq!(viseme_for("S"), "mouth_narrow");
        assert_eq!(viseme_for("F"), "mouth_f");
        assert_eq!(viseme_for("L"), "mouth_l");
        assert_eq!(viseme_for("TH"), "mouth_th");
        assert_eq!(viseme_for("SIL"), "mouth_rest");
        assert_eq!(viseme_for("XQ"), "mouth_rest");
    }

    #[test]
    fn unknown_expression_is_neutral() {
        assert_eq!(
            expression_pose("menacing"),
            ExpressionPose {
                brows: 0.0,
                eyes: 0.0,
                mouth_curve: 0.0
            }
        );
        assert_eq!(expression_pose("happy").mouth_curve, 0.5);
    }

    #[test]
    fn basic_timeline_spans_the_duration() {
        let cues = basic_timeline(1.0);
        assert_eq!(cues.len(), 10);
        assert_eq!(cues[0].phoneme, "SIL");
        let last = cues.last().unwrap();
        assert!(last.time < 1.0);
        assert!(last.time + last.duration >= 1.0 - 1e-9);
    }

    #[test]
    fn parses_rhubarb_cues() {
        let raw = r#"{
            "metadata": {"duration": 1.5},
            "mouthCues": [
                {"start": 0.0, "end": 0.4, "value": "A"},
                {"start": 0.4, "end": 1.5, "value": "B"}
            ]
        }"#;
        let timeline = parse_rhubarb_json(raw).unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[1].time, 0.4);
        assert!((timeline[1].duration - 1.1).abs() < 1e-9);
    }

    #[test]
    fn rejects_rhubarb_output_without_cues() {
        assert!(parse_rhubarb_json("{}").is_err());
        assert!(parse_rhubarb_json("not json").is_err());
    }

    #[tokio::test]
    async fn falls_back_to_placeholders_without_animator() {
        let mut animator = MockAnimatorRunner::new();
        animator.expect_is_available().return_const(false);
        animator.expect_render_frames().times(0);

        let mut lip_sync = MockLipSyncRunner::new();
        lip_sync.expect_is_available().return_const(false);

        let mut ffmpeg = MockFfmpegRunner::new();
        ffmpeg
            .expect_color_frames()
            .withf(|color, _, _, frames, _| color == "#3498DB" && *frames == 60)
            .times(1)
            .returning(|_, _, _, _, pattern| {
                // Simulate the tool dropping one frame file.
                let frame = pattern.parent().unwrap().join("frame_00000.png");
                std::fs::write(frame, b"png").unwrap();
                Box::pin(async { Ok(ok_output()) })
            });

        let dir = tempdir().unwrap();
        let engine = CharacterEngine::new(
            Arc::new(animator),
            Arc::new(lip_sync),
            Arc::new(ffmpeg),
            dir.path().to_path_buf(),
        );

        let result = engine.process(&scene_config(dir.path())).await.unwrap();
        assert!(result.output_path.is_some());
        assert_eq!(result.metadata["placeholder"], true);
        assert_eq!(result.metadata["lip_sync_applied"], false);
        assert_eq!(result.metadata["lip_sync_source"], "basic");
        assert_eq!(result.metadata["frame_count"], 1);
    }

    #[tokio::test]
    async fn uses_rhubarb_timeline_when_available() {
        let mut lip_sync = MockLipSyncRunner::new();
        lip_sync.expect_is_available().return_const(true);
        lip_sync.expect_extract().times(1).returning(|_, out| {
            let raw = r#"{"mouthCues":[{"start":0.0,"end":0.5,"value":"A"}]}"#;
            std::fs::write(out, raw).unwrap();
            Box::pin(async { Ok(ok_output()) })
        });

        let dir = tempdir().unwrap();
        let frames_dir = dir.path().join("intro_frames");
        let mut animator = MockAnimatorRunner::new();
        animator.expect_is_available().return_const(true);
        animator
            .expect_render_frames()
            .times(1)
            .returning(move |_, script, frames, _| {
                // Control script must already exist when the tool runs.
                assert!(script.exists());
                std::fs::write(frames.join("frame_00000.png"), b"png").unwrap();
                Box::pin(async { Ok(ok_output()) })
            });

        let mut ffmpeg = MockFfmpegRunner::new();
        ffmpeg.expect_color_frames().times(0);

        let engine = CharacterEngine::new(
            Arc::new(animator),
            Arc::new(lip_sync),
            Arc::new(ffmpeg),
            dir.path().to_path_buf(),
        );

        let result = engine.process(&scene_config(dir.path())).await.unwrap();
        assert_eq!(result.metadata["lip_sync_source"], "rhubarb");
        assert_eq!(result.metadata["lip_sync_applied"], true);
        assert_eq!(result.metadata["placeholder"], false);
        assert_eq!(result.output_path.unwrap(), frames_dir);

        let script = dir.path().join("intro_control.json");
        let control: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(script).unwrap()).unwrap();
        assert_eq!(control["expression"]["mouth_curve"], 0.5);
        assert_eq!(control["keyframes"][0]["viseme"], "mouth_rest");
    }
}

//! Composition engine: renders one scene into a video segment.
//!
//! The primary path generates a Python script and hands it to Blender.
//! When Blender is missing or fails, the engine synthesizes the segment
//! directly with ffmpeg: character frames overlaid on a flat background
//! with audio muxed in, or a plain color clip when there are no frames.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::domain::spec::{BackgroundConfig, OutputFormat, Position, DEFAULT_BACKGROUND_COLOR};
use crate::engines::cmd::{CompositorRunner, FfmpegRunner};
use crate::engines::EngineResult;
use crate::error::RenderError;

#[derive(Debug, Clone)]
pub struct CompositionConfig {
    pub scene_id: String,
    pub duration: f64,
    pub frames_dir: Option<PathBuf>,
    pub audio_path: Option<PathBuf>,
    pub background: Option<BackgroundConfig>,
    pub position: Position,
    /// Camera preset name; anything unknown renders static.
    pub camera: Option<String>,
    pub resolution: String,
    pub fps: u32,
    /// Output container. Segments carry the same container as the final
    /// video so the concat step can stream-copy them.
    pub format: OutputFormat,
}

#[derive(Debug, Clone)]
struct CameraKeyframe {
    /// Fraction of the clip in `[0.0, 1.0]`; 1.0 is the last frame.
    at: f64,
    location: Option<[f64; 3]>,
    rotation: Option<[f64; 3]>,
}

struct CameraPreset {
    location: [f64; 3],
    rotation: [f64; 3],
    keyframes: Vec<CameraKeyframe>,
}

fn camera_preset(name: &str) -> CameraPreset {
    let base_location = [0.0, -10.0, 2.0];
    let base_rotation = [80.0, 0.0, 0.0];
    let keyframes = match name {
        "pan_left" => vec![
            CameraKeyframe {
                at: 0.0,
                location: Some([-2.0, -10.0, 2.0]),
                rotation: None,
            },
            CameraKeyframe {
                at: 1.0,
                location: Some([2.0, -10.0, 2.0]),
                rotation: None,
            },
        ],
        "pan_right" => vec![
            CameraKeyframe {
                at: 0.0,
                location: Some([2.0, -10.0, 2.0]),
                rotation: None,
            },
            CameraKeyframe {
                at: 1.0,
                location: Some([-2.0, -10.0, 2.0]),
                rotation: None,
            },
        ],
        "zoom_in" => vec![
            CameraKeyframe {
                at: 0.0,
                location: Some([0.0, -12.0, 2.5]),
                rotation: None,
            },
            CameraKeyframe {
                at: 1.0,
                location: Some([0.0, -8.0, 1.5]),
                rotation: None,
            },
        ],
        "zoom_out" => vec![
            CameraKeyframe {
                at: 0.0,
                location: Some([0.0, -8.0, 1.5]),
                rotation: None,
            },
            CameraKeyframe {
                at: 1.0,
                location: Some([0.0, -12.0, 2.5]),
                rotation: None,
            },
        ],
        "orbit" => vec![
            CameraKeyframe {
                at: 0.0,
                location: None,
                rotation: Some([80.0, 0.0, -15.0]),
            },
            CameraKeyframe {
                at: 0.5,
                location: None,
                rotation: Some([80.0, 0.0, 15.0]),
            },
            CameraKeyframe {
                at: 1.0,
                location: None,
                rotation: Some([80.0, 0.0, -15.0]),
            },
        ],
        // "static" and anything unknown
        _ => Vec::new(),
    };
    CameraPreset {
        location: base_location,
        rotation: base_rotation,
        keyframes,
    }
}

/// Stage-space coordinates for each character position.
fn character_location(position: Position) -> [f64; 3] {
    match position {
        Position::Left => [-3.0, 0.0, 0.0],
        Position::Center => [0.0, 0.0, 0.0],
        Position::Right => [3.0, 0.0, 0.0],
    }
}

/// `#RRGGBB` to normalized RGBA; malformed input yields the default dark.
fn hex_to_rgba(color: &str) -> [f64; 4] {
    let hex = color.trim_start_matches('#');
    if hex.len() == 6 {
        let parse = |range| u8::from_str_radix(&hex[range], 16).map(|v| v as f64 / 255.0);
        if let (Ok(r), Ok(g), Ok(b)) = (parse(0..2), parse(2..4), parse(4..6)) {
            return [r, g, b, 1.0];
        }
    }
    [0.1, 0.1, 0.15, 1.0]
}

pub struct CompositionEngine {
    compositor: Arc<dyn CompositorRunner>,
    ffmpeg: Arc<dyn FfmpegRunner>,
    work_dir: PathBuf,
}

impl CompositionEngine {
    pub fn new(
        compositor: Arc<dyn CompositorRunner>,
        ffmpeg: Arc<dyn FfmpegRunner>,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            compositor,
            ffmpeg,
            work_dir,
        }
    }

    pub fn validate(&self, config: &CompositionConfig) -> bool {
        config.duration > 0.0
            && config.fps > 0
            && config
                .resolution
                .split_once('x')
                .and_then(|(w, h)| Some((w.parse::<u32>().ok()?, h.parse::<u32>().ok()?)))
                .map(|(w, h)| w > 0 && h > 0)
                .unwrap_or(false)
    }

    pub async fn process(
        &self,
        config: &CompositionConfig,
    ) -> Result<EngineResult, RenderError> {
        if !self.validate(config) {
            return Err(RenderError::Configuration(format!(
                "scene '{}': invalid composition parameters",
                config.scene_id
            )));
        }

        let segment_path = self
            .work_dir
            .join(format!("{}_segment.{}", config.scene_id, config.format));

        let mut composited = false;
        if self.compositor.is_available() {
            match self.run_compositor(config, &segment_path).await {
                Ok(()) => composited = true,
                Err(e) => {
                    warn!(scene = %config.scene_id, error = %e, "compositor failed, using direct synthesis");
                }
            }
        }

        if !composited {
            self.synthesize_direct(config, &segment_path).await?;
        }

        let mut result = EngineResult::new(&config.scene_id);
        result.duration = config.duration;
        result.output_path = Some(segment_path);
        result.metadata.insert(
            "engine".into(),
            if composited { "blender" } else { "ffmpeg" }.into(),
        );
        result.metadata.insert(
            "camera".into(),
            config.camera.as_deref().unwrap_or("static").into(),
        );
        result
            .metadata
            .insert("resolution".into(), config.resolution.clone().into());
        Ok(result)
    }

    async fn run_compositor(
        &self,
        config: &CompositionConfig,
        segment_path: &Path,
    ) -> Result<(), RenderError> {
        let script_path = self
            .work_dir
            .join(format!("{}_compose.py", config.scene_id));
        let script = self.generate_script(config, segment_path);
        tokio::fs::write(&script_path, script).await?;

        let output = self
            .compositor
            .run_script(&script_path)
            .await
            .map_err(|e| RenderError::ToolFailed {
                stage: "composition",
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(RenderError::ToolFailed {
                stage: "composition",
                message: format!(
                    "compositor exited {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }
        if !segment_path.exists() {
            return Err(RenderError::ToolFailed {
                stage: "composition",
                message: "compositor produced no segment".to_string(),
            });
        }
        debug!(scene = %config.scene_id, "compositor rendered segment");
        Ok(())
    }

    /// Direct ffmpeg synthesis: equivalent-duration segment without 3D
    /// camera motion or lighting.
    async fn synthesize_direct(
        &self,
        config: &CompositionConfig,
        segment_path: &Path,
    ) -> Result<(), RenderError> {
        let color = config
            .background
            .as_ref()
            .and_then(|b| b.color.as_deref())
            .unwrap_or(DEFAULT_BACKGROUND_COLOR);

        let rendered = match &config.frames_dir {
            Some(frames_dir) => {
                self.ffmpeg
                    .overlay_frames(
                        color,
                        &frames_dir.join("frame_%05d.png"),
                        config.duration,
                        &config.resolution,
                        config.fps,
                        config.audio_path.clone(),
                        segment_path,
                    )
                    .await
            }
            None => {
                self.ffmpeg
                    .color_clip(
                        color,
                        config.duration,
                        &config.resolution,
                        config.fps,
                        config.audio_path.clone(),
                        segment_path,
                    )
                    .await
            }
        };

        let output = rendered.map_err(|e| RenderError::ToolFailed {
            stage: "composition",
            message: format!("direct synthesis failed: {}", e),
        })?;

        if !output.status.success() || !segment_path.exists() {
            return Err(RenderError::ToolFailed {
                stage: "composition",
                message: format!(
                    "direct synthesis exited {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }
        Ok(())
    }

    /// Generate the Blender Python script for this scene. All parameters
    /// travel as one embedded JSON document.
    fn generate_script(&self, config: &CompositionConfig, segment_path: &Path) -> String {
        let preset_name = config.camera.as_deref().unwrap_or("static");
        let preset = camera_preset(preset_name);
        let total_frames = (config.duration * config.fps as f64) as u32;
        let (width, height) = config
            .resolution
            .split_once('x')
            .and_then(|(w, h)| Some((w.parse::<u32>().ok()?, h.parse::<u32>().ok()?)))
            .unwrap_or((1920, 1080));

        let container = match config.format {
            OutputFormat::Mp4 => "MPEG4",
            OutputFormat::Mov => "QUICKTIME",
            OutputFormat::Webm => "WEBM",
        };

        let background = config.background.clone().unwrap_or_default();
        let bg_color = hex_to_rgba(
            background
                .color
                .as_deref()
                .unwrap_or(DEFAULT_BACKGROUND_COLOR),
        );

        let keyframes: Vec<serde_json::Value> = preset
            .keyframes
            .iter()
            .map(|kf| {
                let frame = ((total_frames.saturating_sub(1)) as f64 * kf.at) as u32;
                json!({
                    "frame": frame,
                    "location": kf.location,
                    "rotation": kf.rotation,
                })
            })
            .collect();

        let parameters = json!({
            "scene_id": config.scene_id,
            "duration": config.duration,
            "fps": config.fps,
            "width": width,
            "height": height,
            "total_frames": total_frames,
            "container": container,
            "output_path": segment_path,
            "background_color": bg_color,
            "background_image": background.image,
            "background_video": background.video,
            "character_frames": config.frames_dir,
            "character_location": character_location(config.position),
            "audio_path": config.audio_path,
            "camera": {
                "preset": preset_name,
                "location": preset.location,
                "rotation": preset.rotation,
                "keyframes": keyframes,
            },
        });

        format!(
            r#"import bpy
import json
import math

PARAMS = json.loads(r'''{params}''')

bpy.ops.wm.read_factory_settings(use_empty=True)
scene = bpy.context.scene
scene.render.resolution_x = PARAMS["width"]
scene.render.resolution_y = PARAMS["height"]
scene.render.fps = PARAMS["fps"]
scene.frame_start = 0
scene.frame_end = PARAMS["total_frames"] - 1
scene.render.image_settings.file_format = "FFMPEG"
scene.render.ffmpeg.format = PARAMS["container"]
scene.render.filepath = PARAMS["output_path"]

world = bpy.data.worlds.new("stage")
scene.world = world
world.use_nodes = True
bg_node = world.node_tree.nodes["Background"]
bg_node.inputs[0].default_value = PARAMS["background_color"]

cam_data = bpy.data.cameras.new("camera")
camera = bpy.data.objects.new("camera", cam_data)
scene.collection.objects.link(camera)
scene.camera = camera
camera.location = PARAMS["camera"]["location"]
camera.rotation_euler = [math.radians(a) for a in PARAMS["camera"]["rotation"]]

for kf in PARAMS["camera"]["keyframes"]:
    if kf["location"]:
        camera.location = kf["location"]
        camera.keyframe_insert(data_path="location", frame=kf["frame"])
    if kf["rotation"]:
        camera.rotation_euler = [math.radians(a) for a in kf["rotation"]]
        camera.keyframe_insert(data_path="rotation_euler", frame=kf["frame"])

if PARAMS["character_frames"]:
    bpy.ops.mesh.primitive_plane_add(location=PARAMS["character_location"])
    plane = bpy.context.active_object
    plane.rotation_euler = (math.radians(90), 0, 0)
    mat = bpy.data.materials.new("character")
    mat.use_nodes = True
    tex = mat.node_tree.nodes.new("ShaderNodeTexImage")
    seq = bpy.data.images.load(PARAMS["character_frames"] + "/frame_00000.png")
    seq.source = "SEQUENCE"
    tex.image = seq
    tex.image_user.frame_duration = PARAMS["total_frames"]
    mat.node_tree.links.new(
        tex.outputs["Color"],
        mat.node_tree.nodes["Principled BSDF"].inputs["Base Color"],
    )
    plane.data.materials.append(mat)

if PARAMS["audio_path"]:
    scene.sequence_editor_create()
    scene.sequence_editor.sequences.new_sound(
        "narration", PARAMS["audio_path"], 1, 0
    )
    scene.render.ffmpeg.audio_codec = "AAC"

bpy.ops.render.render(animation=True)
"#,
            params = parameters
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::cmd::{MockCompositorRunner, MockFfmpegRunner};
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

    fn fail_output() -> Output {
        Output {
            status: ExitStatus::from_raw(1),
            stdout: Vec::new(),
            stderr: b"boom".to_vec(),
        }
    }

    fn base_config() -> CompositionConfig {
        CompositionConfig {
            scene_id: "intro".into(),
            duration: 4.0,
            frames_dir: None,
            audio_path: None,
            background: None,
            position: Position::Center,
            camera: None,
            resolution: "1280x720".into(),
            fps: 30,
            format: OutputFormat::Mp4,
        }
    }

    #[test]
    fn camera_presets_cover_the_known_set() {
        assert!(camera_preset("static").keyframes.is_empty());
        assert!(camera_preset("does_not_exist").keyframes.is_empty());
        assert_eq!(camera_preset("pan_left").keyframes.len(), 2);
        assert_eq!(camera_preset("orbit").keyframes.len(), 3);
        assert_eq!(
            camera_preset("zoom_in").keyframes[0].location,
            Some([0.0, -12.0, 2.5])
        );
    }

    #[test]
    fn character_positions_map_to_stage_space() {
        assert_eq!(character_location(Position::Left), [-3.0, 0.0, 0.0]);
        assert_eq!(character_location(Position::Center), [0.0, 0.0, 0.0]);
        assert_eq!(character_location(Position::Right), [3.0, 0.0, 0.0]);
    }

    #[test]
    fn hex_colors_normalize() {
        assert_eq!(hex_to_rgba("#FF0000"), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(hex_to_rgba("bogus"), [0.1, 0.1, 0.15, 1.0]);
    }

    #[tokio::test]
    async fn falls_back_to_color_clip_without_compositor() {
        let mut compositor = MockCompositorRunner::new();
        compositor.expect_is_available().return_const(false);
        compositor.expect_run_script().times(0);

        let mut ffmpeg = MockFfmpegRunner::new();
        ffmpeg
            .expect_color_clip()
            .withf(|color, duration, _, _, audio, _| {
                color == DEFAULT_BACKGROUND_COLOR && *duration == 4.0 && audio.is_none()
            })
            .times(1)
            .returning(|_, _, _, _, _, output| {
                std::fs::write(output, b"mp4").unwrap();
                Box::pin(async { Ok(ok_output()) })
            });

        let dir = tempdir().unwrap();
        let engine = CompositionEngine::new(
            Arc::new(compositor),
            Arc::new(ffmpeg),
            dir.path().to_path_buf(),
        );

        let result = engine.process(&base_config()).await.unwrap();
        assert_eq!(result.metadata["engine"], "ffmpeg");
        assert!(result.output_path.unwrap().exists());
    }

    #[tokio::test]
    async fn overlays_frames_when_present() {
        let dir = tempdir().unwrap();
        let frames_dir = dir.path().join("intro_frames");
        std::fs::create_dir_all(&frames_dir).unwrap();

        let mut compositor = MockCompositorRunner::new();
        compositor.expect_is_available().return_const(false);

        let mut ffmpeg = MockFfmpegRunner::new();
        ffmpeg
            .expect_overlay_frames()
            .withf(|color, pattern, _, _, _, audio, _| {
                color == "#112233"
                    && pattern.to_string_lossy().ends_with("frame_%05d.png")
                    && audio.is_some()
            })
            .times(1)
            .returning(|_, _, _, _, _, _, output| {
                std::fs::write(output, b"mp4").unwrap();
                Box::pin(async { Ok(ok_output()) })
            });

        let mut config = base_config();
        config.frames_dir = Some(frames_dir);
        config.audio_path = Some(dir.path().join("narration.mp3"));
        config.background = Some(BackgroundConfig {
            color: Some("#112233".into()),
            image: None,
            video: None,
        });

        let engine = CompositionEngine::new(
            Arc::new(compositor),
            Arc::new(ffmpeg),
            dir.path().to_path_buf(),
        );
        let result = engine.process(&config).await.unwrap();
        assert_eq!(result.metadata["engine"], "ffmpeg");
        assert_eq!(result.duration, 4.0);
    }

    #[tokio::test]
    async fn segment_extension_follows_the_output_format() {
        let mut compositor = MockCompositorRunner::new();
        compositor.expect_is_available().return_const(false);

        let mut ffmpeg = MockFfmpegRunner::new();
        ffmpeg
            .expect_color_clip()
            .times(1)
            .returning(|_, _, _, _, _, output| {
                std::fs::write(output, b"webm").unwrap();
                Box::pin(async { Ok(ok_output()) })
            });

        let dir = tempdir().unwrap();
        let engine = CompositionEngine::new(
            Arc::new(compositor),
            Arc::new(ffmpeg),
            dir.path().to_path_buf(),
        );

        let mut config = base_config();
        config.format = OutputFormat::Webm;
        let result = engine.process(&config).await.unwrap();
        assert!(result.output_path.unwrap().ends_with("intro_segment.webm"));
    }

    #[tokio::test]
    async fn compositor_failure_degrades_to_direct_synthesis() {
        let mut compositor = MockCompositorRunner::new();
        compositor.expect_is_available().return_const(true);
        compositor
            .expect_run_script()
            .times(1)
            .returning(|script| {
                assert!(script.exists());
                Box::pin(async { Ok(fail_output()) })
            });

        let mut ffmpeg = MockFfmpegRunner::new();
        ffmpeg
            .expect_color_clip()
            .times(1)
            .returning(|_, _, _, _, _, output| {
                std::fs::write(output, b"mp4").unwrap();
                Box::pin(async { Ok(ok_output()) })
            });

        let dir = tempdir().unwrap();
        let engine = CompositionEngine::new(
            Arc::new(compositor),
            Arc::new(ffmpeg),
            dir.path().to_path_buf(),
        );

        let result = engine.process(&base_config()).await.unwrap();
        assert_eq!(result.metadata["engine"], "ffmpeg");
    }

    #[tokio::test]
    async fn direct_synthesis_failure_is_a_scene_error() {
        let mut compositor = MockCompositorRunner::new();
        compositor.expect_is_available().return_const(false);

        let mut ffmpeg = MockFfmpegRunner::new();
        ffmpeg
            .expect_color_clip()
            .times(1)
            .returning(|_, _, _, _, _, _| Box::pin(async { Ok(fail_output()) }));

        let dir = tempdir().unwrap();
        let engine = CompositionEngine::new(
            Arc::new(compositor),
            Arc::new(ffmpeg),
            dir.path().to_path_buf(),
        );

        let err = engine.process(&base_config()).await.unwrap_err();
        assert!(matches!(err, RenderError::ToolFailed { stage: "composition", .. }));
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        let dir = tempdir().unwrap();
        let engine = CompositionEngine::new(
            Arc::new(MockCompositorRunner::new()),
            Arc::new(MockFfmpegRunner::new()),
            dir.path().to_path_buf(),
        );

        assert!(engine.validate(&base_config()));

        let mut config = base_config();
        config.duration = 0.0;
        assert!(!engine.validate(&config));

        let mut config = base_config();
        config.resolution = "wide".into();
        assert!(!engine.validate(&config));
    }
}

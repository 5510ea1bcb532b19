//! Declarative video spec model.
//!
//! A spec is loaded from YAML, validated once, and read-only afterwards.
//! The round-trip contract holds: a spec loaded, dumped, and reloaded is
//! value-equal to the original.

use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RenderError;

/// Default background color when a scene declares none.
pub const DEFAULT_BACKGROUND_COLOR: &str = "#1E3A5F";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    Mov,
    Webm,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Mp4
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Mp4 => write!(f, "mp4"),
            OutputFormat::Mov => write!(f, "mov"),
            OutputFormat::Webm => write!(f, "webm"),
        }
    }
}

/// Output container, resolution and frame rate for the final video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default = "default_fps")]
    pub fps: u32,
}

fn default_resolution() -> String {
    "1920x1080".to_string()
}

fn default_fps() -> u32 {
    30
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Mp4,
            resolution: default_resolution(),
            fps: default_fps(),
        }
    }
}

impl OutputConfig {
    /// Parsed `WxH` dimensions, if the resolution string is well-formed.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let (w, h) = self.resolution.split_once('x')?;
        let width: u32 = w.parse().ok()?;
        let height: u32 = h.parse().ok()?;
        if width == 0 || height == 0 {
            return None;
        }
        Some((width, height))
    }

    pub fn width(&self) -> u32 {
        self.dimensions().map(|(w, _)| w).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.dimensions().map(|(_, h)| h).unwrap_or(0)
    }
}

/// Supported text-to-speech providers. Closed set: adding a provider means
/// adding a variant and a dispatch arm, checked at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechProvider {
    OpenAi,
    ElevenLabs,
}

impl fmt::Display for SpeechProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeechProvider::OpenAi => write!(f, "openai"),
            SpeechProvider::ElevenLabs => write!(f, "elevenlabs"),
        }
    }
}

/// Narration for one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    pub text: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_provider")]
    pub provider: SpeechProvider,
    #[serde(default = "default_speed")]
    pub speed: f64,
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_provider() -> SpeechProvider {
    SpeechProvider::OpenAi
}

fn default_speed() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Center,
    Right,
}

impl Default for Position {
    fn default() -> Self {
        Position::Center
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Left => write!(f, "left"),
            Position::Center => write!(f, "center"),
            Position::Right => write!(f, "right"),
        }
    }
}

/// Animated 2D character placed in one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterConfig {
    /// Path to the character rig project file
    pub asset: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default = "default_expression")]
    pub expression: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_expression() -> String {
    "neutral".to_string()
}

fn default_scale() -> f64 {
    1.0
}

/// Scene background: any combination of a flat color, a still image and a
/// video reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackgroundConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
}

/// One timed segment of the output video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    /// Declared duration in the textual form `"<number>s"`. A hint only once
    /// the scene has audio: measured audio length overrides it.
    pub duration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<CharacterConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<BackgroundConfig>,
}

impl Scene {
    /// Declared duration parsed to seconds. Returns 0.0 only for a malformed
    /// string, which `VideoSpec::validate` rejects up front.
    pub fn duration_seconds(&self) -> f64 {
        self.duration
            .strip_suffix('s')
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0)
    }

    /// Background color for this scene, falling back to the default.
    pub fn background_color(&self) -> &str {
        self.background
            .as_ref()
            .and_then(|b| b.color.as_deref())
            .unwrap_or(DEFAULT_BACKGROUND_COLOR)
    }

    /// Character position, defaulting to center when no character is set.
    pub fn character_position(&self) -> Position {
        self.character
            .as_ref()
            .map(|c| c.position)
            .unwrap_or_default()
    }
}

/// Complete video definition: output settings plus an ordered scene list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSpec {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub output: OutputConfig,
    pub scenes: Vec<Scene>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl VideoSpec {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RenderError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RenderError::Configuration(format!("invalid spec: {}", e)))
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, RenderError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RenderError::Configuration(format!("cannot read spec '{}': {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn to_yaml_string(&self) -> Result<String, RenderError> {
        serde_yaml::to_string(self)
            .map_err(|e| RenderError::Configuration(format!("cannot serialize spec: {}", e)))
    }

    pub fn to_yaml_file(&self, path: &Path) -> Result<(), RenderError> {
        let yaml = self.to_yaml_string()?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Structural validation of every bound the schema declares. The first
    /// violation is returned; a valid spec is immutable from here on.
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.scenes.is_empty() {
            return Err(RenderError::Configuration(
                "spec has no scenes to render".to_string(),
            ));
        }

        if self.output.dimensions().is_none() {
            return Err(RenderError::Configuration(format!(
                "invalid resolution '{}': expected <width>x<height>",
                self.output.resolution
            )));
        }

        if !(1..=120).contains(&self.output.fps) {
            return Err(RenderError::Configuration(format!(
                "fps {} out of range 1..=120",
                self.output.fps
            )));
        }

        let duration_re = Regex::new(r"^\d+(\.\d+)?s$").expect("valid duration regex");
        let color_re = Regex::new(r"^#[0-9a-fA-F]{6}$").expect("valid color regex");

        let mut seen_ids = std::collections::HashSet::new();
        for scene in &self.scenes {
            if scene.id.is_empty() {
                return Err(RenderError::Configuration(
                    "scene id must be non-empty".to_string(),
                ));
            }
            if !seen_ids.insert(scene.id.as_str()) {
                return Err(RenderError::Configuration(format!(
                    "duplicate scene id '{}'",
                    scene.id
                )));
            }
            if !duration_re.is_match(&scene.duration) {
                return Err(RenderError::Configuration(format!(
                    "scene '{}': invalid duration '{}': expected e.g. \"5s\"",
                    scene.id, scene.duration
                )));
            }
            if scene.duration_seconds() <= 0.0 {
                return Err(RenderError::Configuration(format!(
                    "scene '{}': duration must be positive",
                    scene.id
                )));
            }
            if let Some(audio) = &scene.audio {
                if audio.text.is_empty() {
                    return Err(RenderError::Configuration(format!(
                        "scene '{}': audio text must be non-empty",
                        scene.id
                    )));
                }
                if !(0.5..=2.0).contains(&audio.speed) {
                    return Err(RenderError::Configuration(format!(
                        "scene '{}': audio speed {} out of range 0.5..=2.0",
                        scene.id, audio.speed
                    )));
                }
            }
            if let Some(character) = &scene.character {
                if character.asset.is_empty() {
                    return Err(RenderError::Configuration(format!(
                        "scene '{}': character asset must be non-empty",
                        scene.id
                    )));
                }
                if !(0.1..=3.0).contains(&character.scale) {
                    return Err(RenderError::Configuration(format!(
                        "scene '{}': character scale {} out of range 0.1..=3.0",
                        scene.id, character.scale
                    )));
                }
            }
            if let Some(background) = &scene.background {
                if let Some(color) = &background.color {
                    if !color_re.is_match(color) {
                        return Err(RenderError::Configuration(format!(
                            "scene '{}': invalid background color '{}': expected #RRGGBB",
                            scene.id, color
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

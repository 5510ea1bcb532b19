//! Environment-driven configuration for the render pipeline.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::spec::SpeechProvider;

/// Configuration for a render run: provider credentials, external tool
/// locations, and per-tool timeouts. Constructed once and passed down;
/// nothing below reads the environment directly.
#[derive(Clone, Debug)]
pub struct RenderConfig {
    /// OpenAI API key for the `openai` speech provider
    pub openai_api_key: Option<String>,
    /// ElevenLabs API key for the `elevenlabs` speech provider
    pub elevenlabs_api_key: Option<String>,
    /// External 2D animation tool executable
    pub animator_bin: Option<PathBuf>,
    /// Blender executable for 3D scene composition
    pub compositor_bin: Option<PathBuf>,
    /// Rhubarb executable for precise lip-sync extraction
    pub rhubarb_bin: Option<PathBuf>,
    /// Timeout for one animation tool invocation
    pub animator_timeout: Duration,
    /// Timeout for one compositor invocation
    pub compositor_timeout: Duration,
    /// Timeout for one ffmpeg/ffprobe invocation
    pub ffmpeg_timeout: Duration,
    /// Timeout for one speech synthesis HTTP call
    pub speech_timeout: Duration,
}

impl RenderConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            elevenlabs_api_key: env::var("ELEVENLABS_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            animator_bin: env::var("ANIMATOR_BIN")
                .ok()
                .map(PathBuf::from)
                .filter(|p| p.exists()),
            compositor_bin: env::var("BLENDER_PATH")
                .ok()
                .map(PathBuf::from)
                .filter(|p| p.exists())
                .or_else(|| find_in_path("blender")),
            rhubarb_bin: env::var("RHUBARB_PATH")
                .ok()
                .map(PathBuf::from)
                .filter(|p| p.exists())
                .or_else(|| find_in_path("rhubarb")),
            animator_timeout: duration_var("ANIMATOR_TIMEOUT_SECS", 600),
            compositor_timeout: duration_var("COMPOSITOR_TIMEOUT_SECS", 1800),
            ffmpeg_timeout: duration_var("FFMPEG_TIMEOUT_SECS", 300),
            speech_timeout: duration_var("SPEECH_TIMEOUT_SECS", 60),
        }
    }

    /// Credential for a speech provider, if configured.
    pub fn speech_credential(&self, provider: SpeechProvider) -> Option<&str> {
        match provider {
            SpeechProvider::OpenAi => self.openai_api_key.as_deref(),
            SpeechProvider::ElevenLabs => self.elevenlabs_api_key.as_deref(),
        }
    }
}

impl Default for RenderConfig {
    /// Empty configuration: no credentials, no external tools. Every stage
    /// resolves to its fallback path.
    fn default() -> Self {
        Self {
            openai_api_key: None,
            elevenlabs_api_key: None,
            animator_bin: None,
            compositor_bin: None,
            rhubarb_bin: None,
            animator_timeout: Duration::from_secs(600),
            compositor_timeout: Duration::from_secs(1800),
            ffmpeg_timeout: Duration::from_secs(300),
            speech_timeout: Duration::from_secs(60),
        }
    }
}

fn duration_var(name: &str, default_secs: u64) -> Duration {
    let secs = env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}

/// Search PATH for an executable by name.
fn find_in_path(bin: &str) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    for dir in env::split_paths(&path_var) {
        let candidate = dir.join(bin);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

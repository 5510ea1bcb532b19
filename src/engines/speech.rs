//! Speech engine: text-to-speech narration for one scene.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::config::RenderConfig;
use crate::domain::spec::AudioConfig;
use crate::engines::cmd::{FfmpegRunner, SpeechClient, SpeechRequest};
use crate::engines::{parse_probe_duration, EngineResult};
use crate::error::RenderError;

#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub scene_id: String,
    pub audio: AudioConfig,
}

/// Synthesizes a narration clip via the configured provider and measures
/// its real duration with ffprobe. The measured duration is authoritative
/// over the scene's declared one.
///
/// A missing provider credential is a hard failure: the caller asked for a
/// specific provider and must get that provider or an explicit error.
pub struct SpeechEngine {
    client: Arc<dyn SpeechClient>,
    ffmpeg: Arc<dyn FfmpegRunner>,
    config: RenderConfig,
    work_dir: PathBuf,
}

impl SpeechEngine {
    pub fn new(
        client: Arc<dyn SpeechClient>,
        ffmpeg: Arc<dyn FfmpegRunner>,
        config: RenderConfig,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            client,
            ffmpeg,
            config,
            work_dir,
        }
    }

    pub fn validate(&self, config: &SpeechConfig) -> bool {
        !config.audio.text.is_empty() && (0.5..=2.0).contains(&config.audio.speed)
    }

    pub async fn process(&self, config: &SpeechConfig) -> Result<EngineResult, RenderError> {
        let api_key = self
            .config
            .speech_credential(config.audio.provider)
            .ok_or_else(|| RenderError::ProviderUnavailable {
                scene_id: config.scene_id.clone(),
                provider: config.audio.provider.to_string(),
                reason: "no credential configured".to_string(),
            })?;

        let request = SpeechRequest {
            text: config.audio.text.clone(),
            voice: config.audio.voice.clone(),
            provider: config.audio.provider,
            speed: config.audio.speed,
        };

        let bytes = self
            .client
            .synthesize(&request, api_key)
            .await
            .map_err(|e| match e {
                // The client does not know the scene; attach it here.
                RenderError::Speech { message, .. } => RenderError::Speech {
                    scene_id: config.scene_id.clone(),
                    message,
                },
                other => other,
            })?;

        if bytes.is_empty() {
            return Err(RenderError::Speech {
                scene_id: config.scene_id.clone(),
                message: "provider returned an empty clip".to_string(),
            });
        }

        let clip_path = self.work_dir.join(format!("{}_narration.mp3", config.scene_id));
        tokio::fs::write(&clip_path, &bytes).await?;

        // Probe failure leaves duration at 0.0; the pipeline then keeps the
        // declared scene duration.
        let duration = match self.ffmpeg.probe_duration(&clip_path).await {
            Ok(output) => parse_probe_duration(&output).unwrap_or(0.0),
            Err(e) => {
                warn!(scene = %config.scene_id, error = %e, "ffprobe failed for narration clip");
                0.0
            }
        };

        let mut result = EngineResult::new(&config.scene_id);
        result.output_path = Some(clip_path);
        result.duration = duration;
        result
            .metadata
            .insert("provider".into(), config.audio.provider.to_string().into());
        result
            .metadata
            .insert("voice".into(), config.audio.voice.clone().into());
        result
            .metadata
            .insert("bytes".into(), (bytes.len() as u64).into());
        Ok(result)
    }
}

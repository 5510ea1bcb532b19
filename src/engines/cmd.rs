//! Subprocess and HTTP runners backing the engines.
//!
//! Every external tool is a black box behind a trait here: real
//! implementations shell out with a timeout, tests mock the trait and never
//! touch the tools.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command as TokioCommand;

use crate::domain::spec::SpeechProvider;
use crate::error::RenderError;

/// One text-to-speech request.
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    pub provider: SpeechProvider,
    pub speed: f64,
}

/// Speech provider HTTP client. Returns raw encoded audio bytes.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait SpeechClient: Send + Sync {
    async fn synthesize(
        &self,
        request: &SpeechRequest,
        api_key: &str,
    ) -> Result<Vec<u8>, RenderError>;
}

pub struct RealSpeechClient {
    http: reqwest::Client,
}

impl RealSpeechClient {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

#[async_trait]
impl SpeechClient for RealSpeechClient {
    async fn synthesize(
        &self,
        request: &SpeechRequest,
        api_key: &str,
    ) -> Result<Vec<u8>, RenderError> {
        let response = match request.provider {
            SpeechProvider::OpenAi => {
                self.http
                    .post("https://api.openai.com/v1/audio/speech")
                    .bearer_auth(api_key)
                    .json(&serde_json::json!({
                        "model": "tts-1",
                        "input": request.text,
                        "voice": request.voice,
                        "speed": request.speed,
                        "response_format": "mp3",
                    }))
                    .send()
                    .await
            }
            SpeechProvider::ElevenLabs => {
                let url = format!(
                    "https://api.elevenlabs.io/v1/text-to-speech/{}",
                    request.voice
                );
                self.http
                    .post(url)
                    .header("xi-api-key", api_key)
                    .json(&serde_json::json!({
                        "text": request.text,
                        "model_id": "eleven_monolingual_v1",
                        "voice_settings": {
                            "stability": 0.5,
                            "similarity_boost": 0.5,
                        },
                    }))
                    .send()
                    .await
            }
        }
        .map_err(|e| RenderError::Speech {
            scene_id: String::new(),
            message: format!("{} request failed: {}", request.provider, e),
        })?;

        if !response.status().is_success() {
            return Err(RenderError::Speech {
                scene_id: String::new(),
                message: format!("{} returned status {}", request.provider, response.status()),
            });
        }

        let bytes = response.bytes().await.map_err(|e| RenderError::Speech {
            scene_id: String::new(),
            message: format!("{} response read failed: {}", request.provider, e),
        })?;
        Ok(bytes.to_vec())
    }
}

/// External 2D animation tool rendering character frames from a control
/// script.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait AnimatorRunner: Send + Sync {
    fn is_available(&self) -> bool;

    async fn render_frames(
        &self,
        asset: &Path,
        control_script: &Path,
        frames_dir: &Path,
        fps: u32,
    ) -> io::Result<Output>;
}

pub struct RealAnimatorRunner {
    bin: Option<PathBuf>,
    timeout: Duration,
}

impl RealAnimatorRunner {
    pub fn new(bin: Option<PathBuf>, timeout: Duration) -> Self {
        Self { bin, timeout }
    }
}

#[async_trait]
impl AnimatorRunner for RealAnimatorRunner {
    fn is_available(&self) -> bool {
        self.bin.is_some()
    }

    async fn render_frames(
        &self,
        asset: &Path,
        control_script: &Path,
        frames_dir: &Path,
        fps: u32,
    ) -> io::Result<Output> {
        let bin = self
            .bin
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "animator not configured"))?;
        let mut command = TokioCommand::new(bin);
        command
            .arg("-project")
            .arg(asset)
            .arg("-script")
            .arg(control_script)
            .arg("-outdir")
            .arg(frames_dir)
            .arg("-fps")
            .arg(fps.to_string());
        run_with_timeout(command, self.timeout).await
    }
}

/// Blender driving a generated Python script for per-scene composition.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait CompositorRunner: Send + Sync {
    fn is_available(&self) -> bool;

    async fn run_script(&self, script: &Path) -> io::Result<Output>;
}

pub struct RealCompositorRunner {
    bin: Option<PathBuf>,
    timeout: Duration,
}

impl RealCompositorRunner {
    pub fn new(bin: Option<PathBuf>, timeout: Duration) -> Self {
        Self { bin, timeout }
    }
}

#[async_trait]
impl CompositorRunner for RealCompositorRunner {
    fn is_available(&self) -> bool {
        self.bin.is_some()
    }

    async fn run_script(&self, script: &Path) -> io::Result<Output> {
        let bin = self
            .bin
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "compositor not configured"))?;
        let mut command = TokioCommand::new(bin);
        command
            .arg("--background")
            .arg("--python")
            .arg(script);
        run_with_timeout(command, self.timeout).await
    }
}

/// Rhubarb extracting a mouth-cue timeline from a narration clip.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait LipSyncRunner: Send + Sync {
    fn is_available(&self) -> bool;

    async fn extract(&self, audio: &Path, output_json: &Path) -> io::Result<Output>;
}

pub struct RealLipSyncRunner {
    bin: Option<PathBuf>,
    timeout: Duration,
}

impl RealLipSyncRunner {
    pub fn new(bin: Option<PathBuf>, timeout: Duration) -> Self {
        Self { bin, timeout }
    }
}

#[async_trait]
impl LipSyncRunner for RealLipSyncRunner {
    fn is_available(&self) -> bool {
        self.bin.is_some()
    }

    async fn extract(&self, audio: &Path, output_json: &Path) -> io::Result<Output> {
        let bin = self
            .bin
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "rhubarb not configured"))?;
        let mut command = TokioCommand::new(bin);
        command
            .arg(audio)
            .arg("-o")
            .arg(output_json)
            .arg("-f")
            .arg("json")
            .arg("--machineReadable");
        run_with_timeout(command, self.timeout).await
    }
}

/// ffmpeg/ffprobe invocations used across the pipeline.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait FfmpegRunner: Send + Sync {
    /// ffprobe the container duration; stdout carries the seconds value
    async fn probe_duration(&self, media: &Path) -> io::Result<Output>;

    /// Render a solid-color clip, muxing in audio when given
    async fn color_clip(
        &self,
        color: &str,
        duration: f64,
        resolution: &str,
        fps: u32,
        audio: Option<PathBuf>,
        output: &Path,
    ) -> io::Result<Output>;

    /// Render a solid-color numbered PNG frame sequence
    async fn color_frames(
        &self,
        color: &str,
        resolution: &str,
        fps: u32,
        frame_count: u32,
        pattern: &Path,
    ) -> io::Result<Output>;

    /// Compose a frame sequence over a background into one segment,
    /// muxing in audio when given
    async fn overlay_frames(
        &self,
        background_color: &str,
        frames_pattern: &Path,
        duration: f64,
        resolution: &str,
        fps: u32,
        audio: Option<PathBuf>,
        output: &Path,
    ) -> io::Result<Output>;

    /// Concatenate segments listed in an ffmpeg concat file
    async fn concat(&self, list_file: &Path, output: &Path) -> io::Result<Output>;
}

pub struct RealFfmpegRunner {
    timeout: Duration,
}

impl RealFfmpegRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl FfmpegRunner for RealFfmpegRunner {
    async fn probe_duration(&self, media: &Path) -> io::Result<Output> {
        let mut command = TokioCommand::new("ffprobe");
        command
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(media);
        run_with_timeout(command, self.timeout).await
    }

    async fn color_clip(
        &self,
        color: &str,
        duration: f64,
        resolution: &str,
        fps: u32,
        audio: Option<PathBuf>,
        output: &Path,
    ) -> io::Result<Output> {
        let mut command = TokioCommand::new("ffmpeg");
        command.arg("-y").arg("-f").arg("lavfi").arg("-i").arg(format!(
            "color=c={}:s={}:d={}:r={}",
            color.trim_start_matches('#'),
            resolution,
            duration,
            fps
        ));
        if let Some(audio_path) = audio {
            command.arg("-i").arg(audio_path).arg("-shortest");
        }
        command
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-t")
            .arg(duration.to_string())
            .arg(output);
        run_with_timeout(command, self.timeout).await
    }

    async fn color_frames(
        &self,
        color: &str,
        resolution: &str,
        fps: u32,
        frame_count: u32,
        pattern: &Path,
    ) -> io::Result<Output> {
        let mut command = TokioCommand::new("ffmpeg");
        command
            .arg("-y")
            .arg("-f")
            .arg("lavfi")
            .arg("-i")
            .arg(format!(
                "color=c={}:s={}:r={}",
                color.trim_start_matches('#'),
                resolution,
                fps
            ))
            .arg("-frames:v")
            .arg(frame_count.to_string())
            .arg(pattern);
        run_with_timeout(command, self.timeout).await
    }

    async fn overlay_frames(
        &self,
        background_color: &str,
        frames_pattern: &Path,
        duration: f64,
        resolution: &str,
        fps: u32,
        audio: Option<PathBuf>,
        output: &Path,
    ) -> io::Result<Output> {
        let mut command = TokioCommand::new("ffmpeg");
        command
            .arg("-y")
            .arg("-f")
            .arg("lavfi")
            .arg("-i")
            .arg(format!(
                "color=c={}:s={}:d={}:r={}",
                background_color.trim_start_matches('#'),
                resolution,
                duration,
                fps
            ))
            .arg("-framerate")
            .arg(fps.to_string())
            .arg("-i")
            .arg(frames_pattern);
        if let Some(audio_path) = audio {
            command.arg("-i").arg(audio_path).arg("-shortest");
        }
        command
            .arg("-filter_complex")
            .arg("[0:v][1:v]overlay=(W-w)/2:(H-h)/2")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-t")
            .arg(duration.to_string())
            .arg(output);
        run_with_timeout(command, self.timeout).await
    }

    async fn concat(&self, list_file: &Path, output: &Path) -> io::Result<Output> {
        let mut command = TokioCommand::new("ffmpeg");
        command
            .arg("-y")
            .arg("-f")
            .arg("concat")
            .arg("-safe")
            .arg("0")
            .arg("-i")
            .arg(list_file)
            .arg("-c")
            .arg("copy")
            .arg(output);
        run_with_timeout(command, self.timeout).await
    }
}

async fn run_with_timeout(mut command: TokioCommand, timeout: Duration) -> io::Result<Output> {
    match tokio::time::timeout(timeout, command.output()).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("command did not finish within {:?}", timeout),
        )),
    }
}

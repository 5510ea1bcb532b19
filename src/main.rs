use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::error;

use scenecast::adapters::memory::MemoryTracker;
use scenecast::application::orchestrator::RenderOrchestrator;
use scenecast::config::RenderConfig;
use scenecast::domain::spec::VideoSpec;

#[derive(Parser, Debug)]
#[command(name = "scenecast", version, about = "Declarative animated video renderer")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a video from a YAML spec.
    Render(RenderArgs),
    /// Validate a YAML spec without rendering.
    Validate(ValidateArgs),
    /// Print a quick summary of the scenes in a spec.
    Preview(PreviewArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input spec YAML.
    spec_file: PathBuf,

    /// Output video path; defaults to the spec's stem plus the output format.
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ValidateArgs {
    /// Input spec YAML.
    spec_file: PathBuf,
}

#[derive(Parser, Debug)]
struct PreviewArgs {
    /// Input spec YAML.
    spec_file: PathBuf,

    /// Limit the preview to one scene id.
    #[arg(long, short)]
    scene: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let result = match cli.cmd {
        Command::Render(args) => render(args).await,
        Command::Validate(args) => validate(args),
        Command::Preview(args) => preview(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn render(args: RenderArgs) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let spec = VideoSpec::from_yaml_file(&args.spec_file)?;
    spec.validate()?;

    let output_path = args.output.unwrap_or_else(|| {
        let stem = args
            .spec_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        PathBuf::from(format!("{}.{}", stem, spec.output.format))
    });

    let config = RenderConfig::from_env();
    let mut orchestrator = RenderOrchestrator::new(config);
    orchestrator.set_tracker(Arc::new(MemoryTracker::new()));
    orchestrator.on_progress(|progress| {
        let scene = progress.current_scene.as_deref().unwrap_or("-");
        println!(
            "[{:>5.1}%] scene {} ({}/{} done)",
            progress.overall * 100.0,
            scene,
            progress.completed_scenes,
            progress.total_scenes
        );
    });

    let rendered = orchestrator.render(&spec, &output_path).await?;
    println!("rendered: {}", rendered.display());
    Ok(())
}

fn validate(args: ValidateArgs) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let spec = VideoSpec::from_yaml_file(&args.spec_file)?;
    spec.validate()?;

    println!("spec is valid");
    println!("  version: {}", spec.version);
    println!("  scenes: {}", spec.scenes.len());
    println!(
        "  output: {} @ {} {}fps",
        spec.output.format, spec.output.resolution, spec.output.fps
    );
    Ok(())
}

fn preview(args: PreviewArgs) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let spec = VideoSpec::from_yaml_file(&args.spec_file)?;

    let scenes: Vec<_> = match &args.scene {
        Some(scene_id) => {
            let matched: Vec<_> = spec
                .scenes
                .iter()
                .filter(|s| &s.id == scene_id)
                .collect();
            if matched.is_empty() {
                return Err(format!("scene not found: {}", scene_id).into());
            }
            matched
        }
        None => spec.scenes.iter().collect(),
    };

    for scene in scenes {
        println!("scene: {}", scene.id);
        println!("  duration: {}", scene.duration);
        if let Some(character) = &scene.character {
            println!(
                "  character: {} ({}, {})",
                character.asset, character.position, character.expression
            );
        }
        if let Some(audio) = &scene.audio {
            println!("  audio: {} ({})", audio.provider, audio.voice);
        }
        if let Some(background) = &scene.background {
            if let Some(color) = &background.color {
                println!("  background: {}", color);
            }
        }
    }
    Ok(())
}

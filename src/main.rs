use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use storyboard_images::cli::CliOptions;
use storyboard_images::client::ImageClient;
use storyboard_images::config::{Settings, load_env_file, setup_logging};
use storyboard_images::error::StoryboardError;
use storyboard_images::{prompts, runner};
use tracing::{error, info};

async fn run(cli: CliOptions) -> anyhow::Result<()> {
    let settings = Settings::resolve(&cli, |name| std::env::var(name).ok())?;

    let jobs = match &cli.prompts_file {
        Some(path) => prompts::resolve_file(path)?,
        None => prompts::from_cli_prompts(&cli.prompt)?,
    };

    let project_dir = std::path::absolute(&cli.project_dir)
        .with_context(|| format!("Failed to resolve {}", cli.project_dir.display()))?;
    let output_dir = settings.output_dir(&project_dir);
    info!(
        "Generating {} image(s) into {} with {}",
        jobs.len(),
        output_dir.display(),
        settings.model
    );

    let client = ImageClient::new(&settings.api_url, &settings.api_key)?;
    let summary = runner::run(&client, &settings, &jobs, &output_dir).await?;
    info!(
        "Done: {} image(s), storyboard at {}",
        summary.manifest.images.len(),
        summary.manifest_path.display()
    );
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = CliOptions::parse();

    let _ = setup_logging(cli.debug);

    if let Err(err) = load_env_file(&cli.env_file) {
        error!("{err}");
        return ExitCode::from(2);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            match err.downcast_ref::<StoryboardError>() {
                Some(err) if err.is_usage_error() => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

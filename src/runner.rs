//! Runs the jobs, one at a time, in order

use std::path::{Path, PathBuf};

use tracing::{error, info, instrument};

use crate::client::{GenerationOptions, ImageGenerator};
use crate::config::Settings;
use crate::error::StoryboardError;
use crate::manifest::{StoryboardEntry, StoryboardManifest};
use crate::output;
use crate::prompts::RenderJob;
use crate::ratio;

/// What a finished run produced.
#[derive(Debug)]
pub struct RunSummary {
    /// Where the manifest was written
    pub manifest_path: PathBuf,
    /// The manifest as written
    pub manifest: StoryboardManifest,
}

#[instrument(skip_all, fields(index = job.order_index + 1, title = %job.title))]
async fn run_job<G: ImageGenerator>(
    generator: &G,
    job: &RenderJob,
    options: &GenerationOptions,
    settings: &Settings,
    output_dir: &Path,
) -> Result<StoryboardEntry, StoryboardError> {
    let image = generator.generate(&job.prompt, options).await?;
    let revised_prompt = image.revised_prompt.clone();
    let processed = ratio::normalize(image, settings.ratio)?;
    let entry = output::write(job, &processed, output_dir, settings.size, revised_prompt)?;
    info!(
        "Generated {} ({}x{})",
        output_dir.join(&entry.filename).display(),
        entry.width,
        entry.height
    );
    Ok(entry)
}

/// Generates every job into `output_dir` and writes the manifest.
///
/// The first failing job stops the run. Whatever finished before it is still written
/// to the manifest, and the job's error is returned.
pub async fn run<G: ImageGenerator>(
    generator: &G,
    settings: &Settings,
    jobs: &[RenderJob],
    output_dir: &Path,
) -> Result<RunSummary, StoryboardError> {
    std::fs::create_dir_all(output_dir).map_err(|err| StoryboardError::Write {
        path: output_dir.to_path_buf(),
        source: err,
    })?;

    let options = settings.generation_options();
    let mut manifest = StoryboardManifest::new(settings, output_dir);

    for job in jobs {
        match run_job(generator, job, &options, settings, output_dir).await {
            Ok(entry) => manifest.push(entry),
            Err(err) => {
                let err = err.for_job(job.order_index + 1, &job.title);
                if let Err(flush_err) = manifest.write_to(output_dir) {
                    error!("Failed to write partial storyboard: {flush_err}");
                }
                return Err(err);
            }
        }
    }

    let manifest_path = manifest.write_to(output_dir)?;
    Ok(RunSummary {
        manifest_path,
        manifest,
    })
}

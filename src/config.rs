//! Config handling
//!
//! Settings are resolved once, before any work starts. Every value comes from the first
//! place that has a non-empty one: command-line flag, then environment variable(s), then
//! the built-in default.

use std::path::{Path, PathBuf};

use tracing::debug;
use tracing::log::LevelFilter;
use url::Url;

use crate::cli::CliOptions;
use crate::client::GenerationOptions;
use crate::error::StoryboardError;
use crate::output::sanitize_component;
use crate::ratio::{AspectRatio, ImageSize};

/// Image model used when nothing else is configured.
pub const DEFAULT_IMAGE_MODEL: &str = "gpt-image-1";

/// Folder name used when the content name sanitizes to nothing.
pub const DEFAULT_CONTENT_DIR: &str = "untitled-content";

/// Base URL, eg `https://api.openai.com/v1`
pub const ENV_API_URL: &str = "OPENAI_API_URL";
/// API key
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
/// Image model
pub const ENV_IMAGE_MODEL: &str = "OPENAI_IMAGE_MODEL";
/// Aspect ratio, wins over [`ENV_IMAGE_ASPECT_RATIO`]
pub const ENV_IMAGE_RATIO: &str = "OPENAI_IMAGE_RATIO";
/// Aspect ratio alias
pub const ENV_IMAGE_ASPECT_RATIO: &str = "OPENAI_IMAGE_ASPECT_RATIO";
/// Pixel size
pub const ENV_IMAGE_SIZE: &str = "OPENAI_IMAGE_SIZE";
/// Quality
pub const ENV_IMAGE_QUALITY: &str = "OPENAI_IMAGE_QUALITY";
/// Style
pub const ENV_IMAGE_STYLE: &str = "OPENAI_IMAGE_STYLE";

/// Sets up logging based on the debug flag
pub fn setup_logging(debug: bool) -> Result<(), Box<std::io::Error>> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut logger = simple_logger::SimpleLogger::new().with_level(level);
    if !debug {
        logger = logger
            .with_module_level("tracing", LevelFilter::Warn)
            .with_module_level("reqwest", LevelFilter::Info)
            .with_module_level("rustls", LevelFilter::Info)
            .with_module_level("hyper_util", LevelFilter::Info)
            .with_module_level("h2", LevelFilter::Info);
    }
    logger.init().map_err(|err| {
        eprintln!("Failed to initialize logger: {}", err);
        Box::new(std::io::Error::other(err))
    })
}

/// Loads a `.env` file into the process environment without overriding anything already set.
///
/// Returns false when the file doesn't exist.
pub fn load_env_file(path: &Path) -> Result<bool, StoryboardError> {
    match dotenvy::from_path(path) {
        Ok(()) => {
            debug!("Loaded environment from {}", path.display());
            Ok(true)
        }
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StoryboardError::Config(format!(
            "Failed to load {}: {err}",
            path.display()
        ))),
    }
}

/// Fully resolved settings for one run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Settings {
    /// Content name, also the output folder name once sanitized
    pub content_name: String,
    /// Base URL of the API, without trailing slash
    pub api_url: String,
    /// API key
    pub api_key: String,
    /// Image model
    pub model: String,
    /// Center-crop target
    pub ratio: Option<AspectRatio>,
    /// Pixel size sent to the provider
    pub size: Option<ImageSize>,
    /// Quality sent to the provider
    pub quality: Option<String>,
    /// Style sent to the provider
    pub style: Option<String>,
}

/// A CLI value if one was passed (empty is an error), else the first non-empty env var.
fn layered<F>(
    cli_value: Option<&str>,
    flag: &str,
    env_names: &[&str],
    env: &F,
) -> Result<Option<String>, StoryboardError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = cli_value {
        let value = value.trim();
        if value.is_empty() {
            return Err(StoryboardError::Config(format!("{flag} cannot be empty.")));
        }
        return Ok(Some(value.to_string()));
    }
    Ok(env_names.iter().copied().find_map(|name| {
        env(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }))
}

/// Like [`layered`] for provider options: an empty CLI value clears the option
/// instead of falling back to the environment.
fn optional<F>(cli_value: Option<&str>, env_names: &[&str], env: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    match cli_value {
        Some(value) => Some(value.trim().to_string()).filter(|value| !value.is_empty()),
        None => env_names.iter().copied().find_map(|name| {
            env(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        }),
    }
}

fn required(value: Option<String>, env_name: &str) -> Result<String, StoryboardError> {
    value.ok_or_else(|| {
        StoryboardError::Config(format!(
            "Missing required configuration: {env_name}. Set it in the environment or .env file."
        ))
    })
}

fn validate_api_url(value: &str) -> Result<String, StoryboardError> {
    let parsed = Url::parse(value)
        .map_err(|err| StoryboardError::Config(format!("Invalid API URL '{value}': {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(StoryboardError::Config(format!(
            "Invalid API URL '{value}': only http and https are supported"
        )));
    }
    Ok(value.trim_end_matches('/').to_string())
}

impl Settings {
    /// Resolves settings from the CLI, falling back to `env` for anything not passed.
    pub fn resolve<F>(cli: &CliOptions, env: F) -> Result<Self, StoryboardError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let content_name = cli.content_name.trim().to_string();
        if content_name.is_empty() {
            return Err(StoryboardError::Config(
                "--content-name cannot be empty.".to_string(),
            ));
        }

        let api_url = required(
            layered(cli.api_url.as_deref(), "--api-url", &[ENV_API_URL], &env)?,
            ENV_API_URL,
        )?;
        let api_url = validate_api_url(&api_url)?;
        let api_key = required(
            layered(cli.api_key.as_deref(), "--api-key", &[ENV_API_KEY], &env)?,
            ENV_API_KEY,
        )?;
        let model = layered(
            cli.image_model.as_deref(),
            "--image-model",
            &[ENV_IMAGE_MODEL],
            &env,
        )?
        .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string());

        let ratio = optional(
            cli.aspect_ratio.as_deref(),
            &[ENV_IMAGE_RATIO, ENV_IMAGE_ASPECT_RATIO],
            &env,
        )
        .map(|value| value.parse::<AspectRatio>())
        .transpose()?;
        let size = optional(cli.image_size.as_deref(), &[ENV_IMAGE_SIZE], &env)
            .map(|value| value.parse::<ImageSize>())
            .transpose()?;
        let quality = optional(cli.quality.as_deref(), &[ENV_IMAGE_QUALITY], &env);
        let style = optional(cli.style.as_deref(), &[ENV_IMAGE_STYLE], &env);

        Ok(Self {
            content_name,
            api_url,
            api_key,
            model,
            ratio,
            size,
            quality,
            style,
        })
    }

    /// `<project_dir>/pictures/<sanitized content name>`
    pub fn output_dir(&self, project_dir: &Path) -> PathBuf {
        project_dir
            .join("pictures")
            .join(sanitize_component(&self.content_name, DEFAULT_CONTENT_DIR))
    }

    /// What gets sent with every request.
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            model: self.model.clone(),
            aspect_ratio: self.ratio.map(|ratio| ratio.to_string()),
            size: self.size.map(|size| size.to_string()),
            quality: self.quality.clone(),
            style: self.style.clone(),
        }
    }
}

//! CLI parser
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "storyboard-images",
    about = "Generate storyboard images from prompts via an OpenAI-compatible image API"
)]
/// CLI Options
///
/// Values not passed here fall back to the environment, see [`crate::config::Settings`].
pub struct CliOptions {
    #[clap(long, help = "Enable debug logging", env = "STORYBOARD_DEBUG")]
    /// Enable debug logging. Env: STORYBOARD_DEBUG
    pub debug: bool,

    #[clap(long)]
    /// Output subfolder name under `pictures/`
    pub content_name: String,

    #[clap(long, default_value = ".")]
    /// Project root, defaults to the current directory
    pub project_dir: PathBuf,

    #[clap(long, default_value = ".env")]
    /// Environment file, never overrides variables that are already set
    pub env_file: PathBuf,

    #[clap(long)]
    /// API base URL, `/images/generations` is appended.
    /// Env: OPENAI_API_URL
    pub api_url: Option<String>,

    #[clap(long)]
    /// API key.
    /// Env: OPENAI_API_KEY
    pub api_key: Option<String>,

    #[clap(long, required_unless_present = "prompt", conflicts_with = "prompt")]
    /// JSON file with prompts, either a list or a characters/scenes document
    pub prompts_file: Option<PathBuf>,

    #[clap(long = "prompt")]
    /// Prompt text, pass multiple times for multiple images
    pub prompt: Vec<String>,

    #[clap(long)]
    /// Image model, defaults to `gpt-image-1`.
    /// Env: OPENAI_IMAGE_MODEL
    pub image_model: Option<String>,

    #[clap(long)]
    /// Aspect ratio like `16:9`, output is center-cropped to it.
    /// Env: OPENAI_IMAGE_RATIO or OPENAI_IMAGE_ASPECT_RATIO
    pub aspect_ratio: Option<String>,

    #[clap(long = "image-size", visible_alias = "size")]
    /// Pixel size like `1024x768` for providers that take one.
    /// Env: OPENAI_IMAGE_SIZE
    pub image_size: Option<String>,

    #[clap(long)]
    /// Image quality.
    /// Env: OPENAI_IMAGE_QUALITY
    pub quality: Option<String>,

    #[clap(long)]
    /// Image style.
    /// Env: OPENAI_IMAGE_STYLE
    pub style: Option<String>,
}

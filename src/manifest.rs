//! The `storyboard.json` record of a run

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Settings;
use crate::error::StoryboardError;
use crate::output::write_replacing;

/// Name of the manifest file inside the output directory.
pub const MANIFEST_FILENAME: &str = "storyboard.json";

/// One generated image.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoryboardEntry {
    /// 1-based position
    pub index: usize,
    /// Scene title
    pub title: String,
    /// Prompt that was sent
    pub prompt: String,
    /// File name inside the output directory
    pub filename: String,
    /// Final width
    pub width: u32,
    /// Final height
    pub height: u32,
    /// Width before cropping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_width: Option<u32>,
    /// Height before cropping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_height: Option<u32>,
    /// Pixel size requested from the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<String>,
    /// Set when the crop couldn't hit the requested ratio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio_warning: Option<String>,
    /// Prompt the provider reported using instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

/// Everything we know about a run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoryboardManifest {
    /// Content name as given on the command line
    pub content_name: String,
    /// Where the images went
    pub output_dir: PathBuf,
    /// Image model
    pub model: String,
    /// Aspect ratio, eg `16:9`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<String>,
    /// Requested pixel size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// Requested quality
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    /// Requested style
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// RFC 3339 UTC timestamp of when the run started
    pub created_at: String,
    /// Generated images, in job order
    pub images: Vec<StoryboardEntry>,
}

impl StoryboardManifest {
    /// Starts an empty manifest carrying a snapshot of the run settings.
    pub fn new(settings: &Settings, output_dir: &Path) -> Self {
        Self {
            content_name: settings.content_name.clone(),
            output_dir: output_dir.to_path_buf(),
            model: settings.model.clone(),
            ratio: settings.ratio.map(|ratio| ratio.to_string()),
            size: settings.size.map(|size| size.to_string()),
            quality: settings.quality.clone(),
            style: settings.style.clone(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            images: Vec::new(),
        }
    }

    /// Appends a finished job.
    pub fn push(&mut self, entry: StoryboardEntry) {
        self.images.push(entry);
    }

    /// Serializes the manifest to `<dir>/storyboard.json`.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, StoryboardError> {
        let path = dir.join(MANIFEST_FILENAME);
        let json = serde_json::to_vec_pretty(self).map_err(|err| StoryboardError::Write {
            path: path.clone(),
            source: std::io::Error::other(err),
        })?;
        write_replacing(&path, &json)?;
        info!("Wrote storyboard to {}", path.display());
        Ok(path)
    }
}

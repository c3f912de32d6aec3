//! Error handling

use std::path::PathBuf;

/// Everything that can stop a storyboard run.
#[derive(Debug, thiserror::Error)]
pub enum StoryboardError {
    /// Prompt input is malformed or references something that doesn't exist
    #[error("Invalid prompt input: {0}")]
    InputFormat(String),

    /// Settings could not be resolved from the CLI and environment
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The image endpoint answered with a non-success status
    #[error("Image API error {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Raw response body
        message: String,
    },

    /// The request never got a response (DNS, TLS, timeout...)
    #[error("Image API request failed: {0}")]
    Transport(String),

    /// The response didn't contain a usable image
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Writing an image or the manifest failed
    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        /// Path we were trying to write
        path: PathBuf,
        /// Underlying filesystem error
        source: std::io::Error,
    },

    /// A single job failed, wraps the cause with the job it happened on
    #[error("Job {index} ({title}) failed: {source}")]
    Job {
        /// 1-based job index
        index: usize,
        /// Job title
        title: String,
        /// What went wrong
        source: Box<StoryboardError>,
    },
}

impl StoryboardError {
    /// Wraps this error with the job it happened on.
    pub fn for_job(self, index: usize, title: &str) -> Self {
        StoryboardError::Job {
            index,
            title: title.to_string(),
            source: Box::new(self),
        }
    }

    /// True when the error happened before any job ran (bad input or settings).
    pub fn is_usage_error(&self) -> bool {
        match self {
            StoryboardError::InputFormat(_) | StoryboardError::Config(_) => true,
            StoryboardError::Job { source, .. } => source.is_usage_error(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for StoryboardError {
    fn from(err: reqwest::Error) -> Self {
        StoryboardError::Transport(err.to_string())
    }
}

impl From<image::ImageError> for StoryboardError {
    fn from(err: image::ImageError) -> Self {
        StoryboardError::Decode(err.to_string())
    }
}

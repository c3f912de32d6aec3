//! Client for OpenAI-compatible `/images/generations` endpoints

use std::io::Cursor;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose;
use image::ImageReader;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoryboardError;

/// How long a single request may take before the transport gives up.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Path appended to the configured base URL.
pub const IMAGES_GENERATIONS_PATH: &str = "/images/generations";

/// Per-request options, anything left as `None` is not sent.
#[derive(Clone, Debug, Default)]
pub struct GenerationOptions {
    /// Image model id
    pub model: String,
    /// Requested aspect ratio, eg `16:9`
    pub aspect_ratio: Option<String>,
    /// Requested pixel size, eg `1024x576`
    pub size: Option<String>,
    /// Provider-specific quality
    pub quality: Option<String>,
    /// Provider-specific style
    pub style: Option<String>,
}

/// A generated image with its measured dimensions.
#[derive(Clone, Debug)]
pub struct ImageResult {
    /// Decoded image bytes
    pub bytes: Vec<u8>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Prompt the provider says it actually used
    pub revised_prompt: Option<String>,
}

/// Something that turns a prompt into an image.
pub trait ImageGenerator {
    /// Generate one image for the prompt.
    fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> impl Future<Output = Result<ImageResult, StoryboardError>> + Send;
}

/// Request body for POST /images/generations
#[derive(Serialize, Debug)]
pub(crate) struct ImagesGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    quality: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'a str>,
}

impl<'a> ImagesGenerateRequest<'a> {
    pub(crate) fn new(prompt: &'a str, options: &'a GenerationOptions) -> Self {
        Self {
            model: &options.model,
            prompt,
            aspect_ratio: options.aspect_ratio.as_deref(),
            size: options.size.as_deref(),
            quality: options.quality.as_deref(),
            style: options.style.as_deref(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct ImagesGenerateResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize, Debug)]
struct ImageData {
    b64_json: Option<String>,
    url: Option<String>,
    revised_prompt: Option<String>,
}

/// Where the image bytes live in a response.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum ImagePayload {
    /// Already decoded from `b64_json`
    Inline(Vec<u8>),
    /// Needs a follow-up download
    Url(String),
}

/// Pulls the first image out of a generations response body.
pub(crate) fn parse_generations_response(
    body: &[u8],
) -> Result<(ImagePayload, Option<String>), StoryboardError> {
    let parsed: ImagesGenerateResponse = serde_json::from_slice(body).map_err(|err| {
        StoryboardError::Decode(format!("Failed to parse image generation JSON: {err}"))
    })?;

    let first = parsed
        .data
        .into_iter()
        .next()
        .ok_or_else(|| StoryboardError::Decode("Image generation response has no data".into()))?;

    let payload = if let Some(b64_json) = first.b64_json {
        let bytes = general_purpose::STANDARD
            .decode(b64_json.trim())
            .map_err(|err| {
                StoryboardError::Decode(format!("Failed to base64-decode image: {err}"))
            })?;
        ImagePayload::Inline(bytes)
    } else if let Some(url) = first.url {
        ImagePayload::Url(url)
    } else {
        return Err(StoryboardError::Decode(
            "Image payload missing b64_json and url fields".into(),
        ));
    };
    Ok((payload, first.revised_prompt))
}

/// Reads the pixel dimensions out of encoded image bytes.
pub fn measure_image(bytes: &[u8]) -> Result<(u32, u32), StoryboardError> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| StoryboardError::Decode(err.to_string()))?
        .into_dimensions()?;
    if width == 0 || height == 0 {
        return Err(StoryboardError::Decode(format!(
            "Image has invalid dimensions {width}x{height}"
        )));
    }
    Ok((width, height))
}

/// Talks to an OpenAI-compatible image API.
#[derive(Clone, Debug)]
pub struct ImageClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl ImageClient {
    /// Builds a client for the given base URL, eg `https://api.openai.com/v1`.
    pub fn new(api_url: &str, api_key: &str) -> Result<Self, StoryboardError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, api_url, api_key))
    }

    /// Reuses an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: &str, api_key: &str) -> Self {
        Self {
            client,
            api_url: api_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Full URL of the generations endpoint.
    pub fn generations_url(&self) -> String {
        format!("{}{}", self.api_url, IMAGES_GENERATIONS_PATH)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, StoryboardError> {
        debug!("Downloading generated image from {url}");
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(StoryboardError::Api {
                status: status.as_u16(),
                message: format!(
                    "Image download failed: {}",
                    String::from_utf8_lossy(&bytes)
                ),
            });
        }
        Ok(bytes.to_vec())
    }
}

impl ImageGenerator for ImageClient {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ImageResult, StoryboardError> {
        let req_body = ImagesGenerateRequest::new(prompt, options);

        let resp = self
            .client
            .post(self.generations_url())
            .bearer_auth(&self.api_key)
            .json(&req_body)
            .send()
            .await?;

        let status = resp.status();
        let resp_bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(StoryboardError::Api {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&resp_bytes).to_string(),
            });
        }

        let (payload, revised_prompt) = parse_generations_response(&resp_bytes)?;
        if let Some(revised_prompt) = revised_prompt.as_deref() {
            debug!("Revised prompt from provider: {revised_prompt}");
        }

        let bytes = match payload {
            ImagePayload::Inline(bytes) => bytes,
            ImagePayload::Url(url) => self.download(&url).await?,
        };

        let (width, height) = measure_image(&bytes)?;
        Ok(ImageResult {
            bytes,
            width,
            height,
            revised_prompt,
        })
    }
}

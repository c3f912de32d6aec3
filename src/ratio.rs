//! Aspect-ratio targets and center cropping of generated images

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::LazyLock;

use image::{ImageFormat, ImageReader};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::client::ImageResult;
use crate::error::StoryboardError;

/// Relative tolerance for treating two ratios as equal.
pub const RATIO_TOLERANCE: f64 = 0.005;

/// Relative tolerance before we nag about the provider ignoring the ratio.
pub const PROVIDER_MISMATCH_TOLERANCE: f64 = 0.05;

static RATIO_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^(\d{1,3}):(\d{1,3})$"));
static SIZE_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^(\d{2,5})x(\d{2,5})$"));

fn captures_pair(re: &LazyLock<Result<Regex, regex::Error>>, value: &str) -> Option<(u32, u32)> {
    let re = re.as_ref().ok()?;
    let caps = re.captures(value)?;
    let left = caps.get(1)?.as_str().parse().ok()?;
    let right = caps.get(2)?.as_str().parse().ok()?;
    Some((left, right))
}

/// A `W:H` aspect ratio, eg `16:9`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AspectRatio {
    /// Width term
    pub width: u32,
    /// Height term
    pub height: u32,
}

impl AspectRatio {
    /// Width divided by height.
    pub fn value(&self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }

    /// A `1024xN` size hint that matches this ratio, with N rounded up to even.
    pub fn suggested_size(&self) -> ImageSize {
        let base_width = 1024u32;
        let mut height = ((f64::from(base_width) * f64::from(self.height) / f64::from(self.width))
            .round() as u32)
            .max(2);
        if height % 2 != 0 {
            height += 1;
        }
        ImageSize {
            width: base_width,
            height,
        }
    }
}

impl FromStr for AspectRatio {
    type Err = StoryboardError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let candidate = value.trim();
        let (width, height) = captures_pair(&RATIO_RE, candidate).ok_or_else(|| {
            StoryboardError::Config(format!(
                "Invalid aspect ratio '{candidate}'. Use format like 16:9 or 4:3."
            ))
        })?;
        if width == 0 || height == 0 {
            return Err(StoryboardError::Config(format!(
                "Invalid aspect ratio '{candidate}'. Width and height must be positive integers."
            )));
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

/// A `WxH` pixel size as understood by OpenAI-compatible providers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ImageSize {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl FromStr for ImageSize {
    type Err = StoryboardError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let candidate = value.trim().to_ascii_lowercase();
        let (width, height) = captures_pair(&SIZE_RE, &candidate).ok_or_else(|| {
            StoryboardError::Config(format!(
                "Invalid image size '{candidate}'. Use format like 1024x768."
            ))
        })?;
        if width == 0 || height == 0 {
            return Err(StoryboardError::Config(format!(
                "Invalid image size '{candidate}'. Width and height must be positive integers."
            )));
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Region of the source image that survives a crop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CropWindow {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Cropped width
    pub width: u32,
    /// Cropped height
    pub height: u32,
}

/// An image after ratio normalization.
#[derive(Clone, Debug)]
pub struct ProcessedImage {
    /// Final encoded image
    pub bytes: Vec<u8>,
    /// Final width
    pub width: u32,
    /// Final height
    pub height: u32,
    /// Pre-crop width, only set when a crop happened
    pub source_width: Option<u32>,
    /// Pre-crop height, only set when a crop happened
    pub source_height: Option<u32>,
    /// Set when the result still doesn't match the requested ratio
    pub ratio_warning: Option<String>,
}

impl ProcessedImage {
    fn passthrough(image: ImageResult) -> Self {
        Self {
            bytes: image.bytes,
            width: image.width,
            height: image.height,
            source_width: None,
            source_height: None,
            ratio_warning: None,
        }
    }
}

/// Returns true when `width / height` is within `tolerance` (relative) of the ratio.
pub fn ratio_matches(width: u32, height: u32, ratio: AspectRatio, tolerance: f64) -> bool {
    if width == 0 || height == 0 {
        return false;
    }
    let actual = f64::from(width) / f64::from(height);
    let desired = ratio.value();
    ((actual - desired) / desired).abs() <= tolerance
}

/// Largest centered window with the requested ratio, or `None` if the image already matches.
pub fn crop_window(width: u32, height: u32, ratio: AspectRatio) -> Option<CropWindow> {
    if width == 0 || height == 0 || ratio_matches(width, height, ratio, RATIO_TOLERANCE) {
        return None;
    }
    let actual = f64::from(width) / f64::from(height);
    let desired = ratio.value();

    if actual > desired {
        let target = ((f64::from(height) * desired).round() as u32).clamp(1, width);
        Some(CropWindow {
            x: (width - target) / 2,
            y: 0,
            width: target,
            height,
        })
    } else {
        let target = ((f64::from(width) / desired).round() as u32).clamp(1, height);
        Some(CropWindow {
            x: 0,
            y: (height - target) / 2,
            width,
            height: target,
        })
    }
}

/// Logs a hint when the provider clearly ignored the requested ratio.
fn warn_on_provider_mismatch(width: u32, height: u32, ratio: AspectRatio) {
    if ratio_matches(width, height, ratio, PROVIDER_MISMATCH_TOLERANCE) {
        return;
    }
    let suggested = ratio.suggested_size();
    warn!(
        "Requested aspect ratio {ratio}, provider returned {width}x{height}. \
         Post-process crop has been applied. For better quality, try \
         --image-size {suggested} or set OPENAI_IMAGE_SIZE={suggested}."
    );
}

/// Center-crops the image to the target ratio. With no target the image passes through.
pub fn normalize(
    image: ImageResult,
    target: Option<AspectRatio>,
) -> Result<ProcessedImage, StoryboardError> {
    let Some(ratio) = target else {
        return Ok(ProcessedImage::passthrough(image));
    };

    let Some(window) = crop_window(image.width, image.height, ratio) else {
        debug!(
            "{}x{} already matches {ratio}, no crop needed",
            image.width, image.height
        );
        return Ok(ProcessedImage::passthrough(image));
    };

    warn_on_provider_mismatch(image.width, image.height, ratio);

    if window.width == image.width && window.height == image.height {
        // Too small to get any closer, keep the provider's bytes as they are.
        let message = format!(
            "Image {}x{} is too small to crop to requested ratio {ratio}",
            image.width, image.height
        );
        warn!("{message}");
        let mut processed = ProcessedImage::passthrough(image);
        processed.ratio_warning = Some(message);
        return Ok(processed);
    }

    let decoded = ImageReader::new(Cursor::new(&image.bytes))
        .with_guessed_format()
        .map_err(|err| StoryboardError::Decode(err.to_string()))?
        .decode()?;
    let cropped = decoded.crop_imm(window.x, window.y, window.width, window.height);

    let mut output = Vec::new();
    cropped.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;

    info!(
        "Applied center crop for aspect ratio {ratio}: {}x{} -> {}x{}",
        image.width, image.height, window.width, window.height
    );

    let ratio_warning = if ratio_matches(window.width, window.height, ratio, RATIO_TOLERANCE) {
        None
    } else {
        let message = format!(
            "Cropped image {}x{} could not match requested ratio {ratio} exactly",
            window.width, window.height
        );
        warn!("{message}");
        Some(message)
    };

    Ok(ProcessedImage {
        bytes: output,
        width: window.width,
        height: window.height,
        source_width: Some(image.width),
        source_height: Some(image.height),
        ratio_warning,
    })
}

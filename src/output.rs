//! Writing images to the output directory

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StoryboardError;
use crate::manifest::StoryboardEntry;
use crate::prompts::RenderJob;
use crate::ratio::{ImageSize, ProcessedImage};

/// Extension used for every generated image.
pub const IMAGE_EXTENSION: &str = "png";

static INVALID_PATH_CHARS: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|]+"#));
static WHITESPACE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\s+"));
static UNDERSCORES: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(r"_+"));

fn replace_all(re: &LazyLock<Result<Regex, regex::Error>>, value: &str, with: &str) -> String {
    match re.as_ref() {
        Ok(re) => re.replace_all(value, with).into_owned(),
        Err(_) => value.to_string(),
    }
}

/// Makes a title or folder name safe for the filesystem, returns `fallback` if nothing is left.
pub fn sanitize_component(name: &str, fallback: &str) -> String {
    let cleaned = replace_all(&INVALID_PATH_CHARS, name.trim(), "_");
    let cleaned = replace_all(&WHITESPACE, &cleaned, "_");
    let cleaned = replace_all(&UNDERSCORES, &cleaned, "_");
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c == '_');
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}

/// `NN_title.png` for the job, before collision handling.
pub fn job_filename(job: &RenderJob) -> String {
    let fallback = format!("scene-{}", job.order_index + 1);
    format!(
        "{:02}_{}.{IMAGE_EXTENSION}",
        job.order_index + 1,
        sanitize_component(&job.title, &fallback)
    )
}

/// Candidate paths for a filename: as-is, then `_2`, `_3`...
fn candidate_path(dir: &Path, filename: &str, attempt: usize) -> PathBuf {
    if attempt < 2 {
        return dir.join(filename);
    }
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(filename);
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => dir.join(format!("{stem}_{attempt}.{ext}")),
        None => dir.join(format!("{stem}_{attempt}")),
    }
}

fn write_error(path: &Path, source: std::io::Error) -> StoryboardError {
    StoryboardError::Write {
        path: path.to_path_buf(),
        source,
    }
}

fn stage(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile, StoryboardError> {
    let mut staged = NamedTempFile::new_in(dir).map_err(|err| write_error(dir, err))?;
    staged
        .write_all(bytes)
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|err| write_error(staged.path(), err))?;
    Ok(staged)
}

/// Writes `bytes` to a fresh, non-colliding path based on `filename`.
///
/// The data is staged in a temp file next to the target and only linked into
/// place once complete, and never over an existing file. If something else grabs
/// the name in between we move on to the next suffix.
pub fn write_new_file(
    dir: &Path,
    filename: &str,
    bytes: &[u8],
) -> Result<PathBuf, StoryboardError> {
    let mut staged = stage(dir, bytes)?;
    let mut attempt = 1;
    loop {
        let candidate = candidate_path(dir, filename, attempt);
        if candidate.exists() {
            attempt += 1;
            continue;
        }
        match staged.persist_noclobber(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                debug!("{} appeared while writing, trying next name", candidate.display());
                staged = err.file;
                attempt += 1;
            }
            Err(err) => return Err(write_error(&candidate, err.error)),
        }
    }
}

/// Writes `bytes` to `path`, replacing whatever was there in one step.
pub fn write_replacing(path: &Path, bytes: &[u8]) -> Result<(), StoryboardError> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let staged = stage(dir, bytes)?;
    staged
        .persist(path)
        .map_err(|err| write_error(path, err.error))?;
    Ok(())
}

/// Writes one job's image and returns its manifest entry.
pub fn write(
    job: &RenderJob,
    image: &ProcessedImage,
    output_dir: &Path,
    image_size: Option<ImageSize>,
    revised_prompt: Option<String>,
) -> Result<StoryboardEntry, StoryboardError> {
    let path = write_new_file(output_dir, &job_filename(job), &image.bytes)?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string());

    Ok(StoryboardEntry {
        index: job.order_index + 1,
        title: job.title.clone(),
        prompt: job.prompt.clone(),
        filename,
        width: image.width,
        height: image.height,
        source_width: image.source_width,
        source_height: image.source_height,
        image_size: image_size.map(|size| size.to_string()),
        ratio_warning: image.ratio_warning.clone(),
        revised_prompt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(title: &str, order_index: usize) -> RenderJob {
        RenderJob {
            title: title.to_string(),
            prompt: format!("prompt for {title}"),
            order_index,
        }
    }

    fn processed(bytes: &[u8]) -> ProcessedImage {
        ProcessedImage {
            bytes: bytes.to_vec(),
            width: 10,
            height: 20,
            source_width: None,
            source_height: None,
            ratio_warning: None,
        }
    }

    #[test]
    fn sanitizes_titles() {
        assert_eq!(sanitize_component("Opening shot", "x"), "Opening_shot");
        assert_eq!(sanitize_component("a/b\\c:d*e?f", "x"), "a_b_c_d_e_f");
        assert_eq!(sanitize_component("  <<what>>  ", "x"), "what");
        assert_eq!(sanitize_component("__.hidden.__", "x"), "hidden");
        assert_eq!(sanitize_component("tabs\tand  spaces", "x"), "tabs_and_spaces");
        assert_eq!(sanitize_component("???", "fallback"), "fallback");
        assert_eq!(sanitize_component("", "fallback"), "fallback");
        assert_eq!(sanitize_component("Café ☕", "x"), "Café_☕");
    }

    #[test]
    fn filenames_are_numbered() {
        assert_eq!(job_filename(&job("A", 0)), "01_A.png");
        assert_eq!(job_filename(&job("The End", 11)), "12_The_End.png");
        assert_eq!(job_filename(&job("///", 2)), "03_scene-3.png");
        assert_eq!(job_filename(&job("x", 120)), "121_x.png");
    }

    #[test]
    fn identical_titles_get_suffixes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let names: Vec<String> = (0..3)
            .map(|_| {
                write(&job("Same", 0), &processed(b"data"), dir.path(), None, None)
                    .expect("write")
                    .filename
            })
            .collect();
        assert_eq!(names, vec!["01_Same.png", "01_Same_2.png", "01_Same_3.png"]);
    }

    #[test]
    fn collision_skips_taken_suffixes() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("01_A.png"), b"old").expect("seed");
        std::fs::write(dir.path().join("01_A_2.png"), b"old").expect("seed");
        let path = write_new_file(dir.path(), "01_A.png", b"new").expect("write");
        assert_eq!(path, dir.path().join("01_A_3.png"));
        assert_eq!(std::fs::read(dir.path().join("01_A.png")).expect("read"), b"old");

        let next = write_new_file(dir.path(), "01_A.png", b"newer").expect("write");
        assert_eq!(next, dir.path().join("01_A_4.png"));
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_new_file(dir.path(), "01_A.png", b"payload").expect("write");
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("01_A.png")]);
    }

    #[test]
    fn write_to_missing_dir_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope");
        assert!(matches!(
            write(&job("A", 0), &processed(b"x"), &missing, None, None),
            Err(StoryboardError::Write { .. })
        ));
    }

    #[test]
    fn entry_carries_image_details() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut image = processed(b"x");
        image.source_width = Some(40);
        image.source_height = Some(20);
        image.ratio_warning = Some("off".to_string());
        let size = "1024x576".parse::<ImageSize>().ok();
        let entry = write(&job("Title", 4), &image, dir.path(), size, Some("revised".into()))
            .expect("write");
        assert_eq!(entry.index, 5);
        assert_eq!(entry.filename, "05_Title.png");
        assert_eq!(entry.prompt, "prompt for Title");
        assert_eq!((entry.width, entry.height), (10, 20));
        assert_eq!(entry.source_width, Some(40));
        assert_eq!(entry.image_size.as_deref(), Some("1024x576"));
        assert_eq!(entry.ratio_warning.as_deref(), Some("off"));
        assert_eq!(entry.revised_prompt.as_deref(), Some("revised"));
    }

    #[test]
    fn write_replacing_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("storyboard.json");
        write_replacing(&path, b"one").expect("write");
        write_replacing(&path, b"two").expect("write");
        assert_eq!(std::fs::read(&path).expect("read"), b"two");
    }
}

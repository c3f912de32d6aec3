use std::io::Cursor;
use std::path::Path;
use std::sync::Mutex;

use serde_json::{Value, json};
use storyboard_images::client::{GenerationOptions, ImageGenerator, ImageResult, measure_image};
use storyboard_images::config::{Settings, setup_logging};
use storyboard_images::error::StoryboardError;
use storyboard_images::manifest::MANIFEST_FILENAME;
use storyboard_images::{prompts, runner};

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 100, 50]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .expect("encode png");
    out
}

/// Serves canned responses in order and remembers what it was asked.
struct FakeGenerator {
    responses: Mutex<Vec<Result<(u32, u32), StoryboardError>>>,
    calls: Mutex<Vec<(String, GenerationOptions)>>,
}

impl FakeGenerator {
    fn new(mut responses: Vec<Result<(u32, u32), StoryboardError>>) -> Self {
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(String, GenerationOptions)> {
        self.calls.lock().expect("lock").clone()
    }
}

impl ImageGenerator for FakeGenerator {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ImageResult, StoryboardError> {
        self.calls
            .lock()
            .expect("lock")
            .push((prompt.to_string(), options.clone()));
        let next = self
            .responses
            .lock()
            .expect("lock")
            .pop()
            .expect("unexpected extra request");
        let (width, height) = next?;
        Ok(ImageResult {
            bytes: png(width, height),
            width,
            height,
            revised_prompt: None,
        })
    }
}

fn settings(ratio: Option<&str>) -> Settings {
    Settings {
        content_name: "demo".to_string(),
        api_url: "https://api.example.org/v1".to_string(),
        api_key: "sk-test".to_string(),
        model: "gpt-image-1".to_string(),
        ratio: ratio.map(|value| value.parse().expect("ratio")),
        size: None,
        quality: None,
        style: None,
    }
}

fn read_manifest(dir: &Path) -> Value {
    let raw = std::fs::read(dir.join(MANIFEST_FILENAME)).expect("read manifest");
    serde_json::from_slice(&raw).expect("parse manifest")
}

#[tokio::test]
async fn two_square_images_cropped_to_sixteen_by_nine() {
    let _ = setup_logging(true);
    let project = tempfile::tempdir().expect("tempdir");
    let settings = settings(Some("16:9"));
    let output_dir = settings.output_dir(project.path());

    let jobs = prompts::resolve(&json!([
        {"title": "A", "prompt": "x"},
        {"title": "B", "prompt": "y"}
    ]))
    .expect("resolve");
    let generator = FakeGenerator::new(vec![Ok((1024, 1024)), Ok((1024, 1024))]);

    let summary = runner::run(&generator, &settings, &jobs, &output_dir)
        .await
        .expect("run");
    assert_eq!(summary.manifest_path, output_dir.join(MANIFEST_FILENAME));

    for name in ["01_A.png", "02_B.png"] {
        let bytes = std::fs::read(output_dir.join(name)).expect("image written");
        assert_eq!(measure_image(&bytes).expect("measure"), (1024, 576));
    }

    let manifest = read_manifest(&output_dir);
    assert_eq!(manifest["content_name"], "demo");
    assert_eq!(manifest["model"], "gpt-image-1");
    assert_eq!(manifest["ratio"], "16:9");
    let images = manifest["images"].as_array().expect("images");
    assert_eq!(images.len(), 2);
    for (image, (index, filename)) in images.iter().zip([(1, "01_A.png"), (2, "02_B.png")]) {
        assert_eq!(image["index"], index);
        assert_eq!(image["filename"], filename);
        assert_eq!(image["width"], 1024);
        assert_eq!(image["height"], 576);
        assert_eq!(image["source_width"], 1024);
        assert_eq!(image["source_height"], 1024);
        assert!(image.get("ratio_warning").is_none());
    }

    let calls = generator.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, "x");
    assert_eq!(calls[1].0, "y");
    assert_eq!(calls[0].1.aspect_ratio.as_deref(), Some("16:9"));
    assert!(calls[0].1.size.is_none());
}

#[tokio::test]
async fn size_only_does_not_crop() {
    let project = tempfile::tempdir().expect("tempdir");
    let mut settings = settings(None);
    settings.size = "1024x768".parse().ok();
    let output_dir = settings.output_dir(project.path());
    let jobs = prompts::from_cli_prompts(&["a lighthouse".to_string()]).expect("resolve");
    let generator = FakeGenerator::new(vec![Ok((1024, 1024))]);

    runner::run(&generator, &settings, &jobs, &output_dir)
        .await
        .expect("run");

    let manifest = read_manifest(&output_dir);
    let image = &manifest["images"][0];
    assert_eq!(image["filename"], "01_scene-1.png");
    assert_eq!(image["width"], 1024);
    assert_eq!(image["height"], 1024);
    assert_eq!(image["image_size"], "1024x768");
    assert!(image.get("source_width").is_none());
    assert_eq!(manifest["size"], "1024x768");
    assert!(manifest.get("ratio").is_none());
}

#[tokio::test]
async fn failing_job_stops_run_and_keeps_partial_manifest() {
    let project = tempfile::tempdir().expect("tempdir");
    let settings = settings(None);
    let output_dir = settings.output_dir(project.path());
    let jobs = prompts::resolve(&json!([
        {"title": "First", "prompt": "one"},
        {"title": "Second", "prompt": "two"},
        {"title": "Third", "prompt": "three"}
    ]))
    .expect("resolve");
    let generator = FakeGenerator::new(vec![
        Ok((64, 64)),
        Err(StoryboardError::Api {
            status: 500,
            message: "boom".to_string(),
        }),
        Ok((64, 64)),
    ]);

    let err = runner::run(&generator, &settings, &jobs, &output_dir)
        .await
        .expect_err("second job fails");
    match &err {
        StoryboardError::Job {
            index,
            title,
            source,
        } => {
            assert_eq!(*index, 2);
            assert_eq!(title, "Second");
            assert!(matches!(**source, StoryboardError::Api { status: 500, .. }));
        }
        other => panic!("expected job error, got {other:?}"),
    }
    assert!(!err.is_usage_error());

    assert_eq!(generator.calls().len(), 2, "third job must not be attempted");
    assert!(output_dir.join("01_First.png").exists());
    assert!(!output_dir.join("02_Second.png").exists());

    let manifest = read_manifest(&output_dir);
    let images = manifest["images"].as_array().expect("images");
    assert_eq!(images.len(), 1);
    assert_eq!(images[0]["title"], "First");
}

#[tokio::test]
async fn reruns_do_not_overwrite_earlier_images() {
    let project = tempfile::tempdir().expect("tempdir");
    let settings = settings(None);
    let output_dir = settings.output_dir(project.path());
    let jobs = prompts::from_cli_prompts(&["a fox".to_string()]).expect("resolve");

    for _ in 0..2 {
        let generator = FakeGenerator::new(vec![Ok((32, 32))]);
        runner::run(&generator, &settings, &jobs, &output_dir)
            .await
            .expect("run");
    }

    assert!(output_dir.join("01_scene-1.png").exists());
    assert!(output_dir.join("01_scene-1_2.png").exists());
    let manifest = read_manifest(&output_dir);
    assert_eq!(manifest["images"][0]["filename"], "01_scene-1_2.png");
}

#[test]
fn unknown_character_fails_before_anything_runs() {
    let project = tempfile::tempdir().expect("tempdir");
    let prompts_file = project.path().join("story.json");
    std::fs::write(
        &prompts_file,
        json!({
            "characters": [{
                "id": "ana",
                "name": "Ana",
                "appearance": "tall",
                "outfit": "green coat",
                "description": "calm"
            }],
            "scenes": [
                {"description": "Ana waits", "character_ids": ["ana"]},
                {"description": "Bo arrives", "character_ids": ["bo"]}
            ]
        })
        .to_string(),
    )
    .expect("write prompts");

    let err = prompts::resolve_file(&prompts_file).expect_err("unknown character");
    assert!(matches!(err, StoryboardError::InputFormat(_)));
    assert!(err.is_usage_error());
    assert!(!project.path().join("pictures").exists());
}

#[test]
fn invalid_json_file_is_an_input_error() {
    let project = tempfile::tempdir().expect("tempdir");
    let prompts_file = project.path().join("broken.json");
    std::fs::write(&prompts_file, "[{\"title\": ").expect("write prompts");
    assert!(matches!(
        prompts::resolve_file(&prompts_file),
        Err(StoryboardError::InputFormat(_))
    ));
}

//! Turns prompt input (flat lists or character/scene documents) into render jobs
//!
//! Two shapes are accepted:
//!
//! - a flat JSON array of `{"title": ..., "prompt": ...}` objects (or bare strings)
//! - an object with `scenes` and optionally `characters`, where each scene pulls in
//!   reusable character skeletons by id so they look the same from scene to scene
//!
//! Both end up as the same ordered `Vec<RenderJob>`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::StoryboardError;

/// One image to generate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenderJob {
    /// Human-readable label, used for the filename
    pub title: String,
    /// Final prompt sent to the image API
    pub prompt: String,
    /// 0-based position in the run
    pub order_index: usize,
}

/// A reusable character definition.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct CharacterSkeleton {
    /// Unique key within the document
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    /// Display name
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// Physical appearance
    #[serde(default, deserialize_with = "null_as_default")]
    pub appearance: String,
    /// Clothing
    #[serde(default, deserialize_with = "null_as_default")]
    pub outfit: String,
    /// Default description, scenes can override it
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
}

/// One scene in a structured document.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SceneSpec {
    /// Scene title, defaults to `scene-N`
    #[serde(default)]
    pub title: Option<String>,
    /// What happens in the scene
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    /// Characters in the scene, in prompt order
    #[serde(default, deserialize_with = "null_as_default")]
    pub character_ids: Vec<String>,
    /// Per-scene description overrides, keyed by character id
    #[serde(default, deserialize_with = "null_as_default")]
    pub character_descriptions: BTreeMap<String, String>,
    /// Camera hint
    #[serde(default)]
    pub camera: Option<String>,
    /// Lighting hint
    #[serde(default)]
    pub lighting: Option<String>,
    /// Style hint
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

/// Treats an explicit `null` the same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn input_error(message: String) -> StoryboardError {
    StoryboardError::InputFormat(message)
}

fn default_title(index: usize) -> String {
    format!("scene-{}", index + 1)
}

/// Trims and drops empty strings.
fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Reads and resolves a prompts file.
pub fn resolve_file(path: &Path) -> Result<Vec<RenderJob>, StoryboardError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| input_error(format!("Failed to read {}: {err}", path.display())))?;
    let parsed: Value = serde_json::from_str(&raw)
        .map_err(|err| input_error(format!("Invalid JSON in {}: {err}", path.display())))?;
    resolve(&parsed)
}

/// Builds jobs from repeated `--prompt` values, titled `scene-N`.
pub fn from_cli_prompts(prompts: &[String]) -> Result<Vec<RenderJob>, StoryboardError> {
    if prompts.is_empty() {
        return Err(input_error(
            "At least one --prompt is required when --prompts-file is not set".to_string(),
        ));
    }
    prompts
        .iter()
        .enumerate()
        .map(|(order_index, prompt)| {
            let prompt = non_empty(Some(prompt.as_str())).ok_or_else(|| {
                input_error(format!("Empty --prompt at position {}", order_index + 1))
            })?;
            Ok(RenderJob {
                title: default_title(order_index),
                prompt,
                order_index,
            })
        })
        .collect()
}

/// Resolves either input shape into ordered jobs.
pub fn resolve(input: &Value) -> Result<Vec<RenderJob>, StoryboardError> {
    let jobs = match input {
        Value::Array(items) => resolve_flat(items)?,
        Value::Object(map) if map.contains_key("scenes") || map.contains_key("characters") => {
            resolve_structured(map)?
        }
        Value::Object(_) => {
            return Err(input_error(
                "object input requires a top-level 'scenes' array".to_string(),
            ));
        }
        _ => {
            return Err(input_error(
                "top-level JSON must be an array or an object".to_string(),
            ));
        }
    };
    if jobs.is_empty() {
        return Err(input_error("no prompts found".to_string()));
    }
    Ok(jobs)
}

fn resolve_flat(items: &[Value]) -> Result<Vec<RenderJob>, StoryboardError> {
    items
        .iter()
        .enumerate()
        .map(|(order_index, item)| {
            let (title, prompt) = match item {
                Value::String(prompt) => (
                    Some(default_title(order_index)),
                    non_empty(Some(prompt.as_str())),
                ),
                Value::Object(_) => {
                    let entry: FlatEntry = serde_json::from_value(item.clone()).map_err(|err| {
                        input_error(format!("invalid entry at index {order_index}: {err}"))
                    })?;
                    (
                        non_empty(entry.title.as_deref()),
                        non_empty(entry.prompt.as_deref()),
                    )
                }
                _ => {
                    return Err(input_error(format!(
                        "invalid entry at index {order_index}: expected string or object"
                    )));
                }
            };
            let title = title.ok_or_else(|| {
                input_error(format!("entry at index {order_index} is missing 'title'"))
            })?;
            let prompt = prompt.ok_or_else(|| {
                input_error(format!("entry at index {order_index} is missing 'prompt'"))
            })?;
            Ok(RenderJob {
                title,
                prompt,
                order_index,
            })
        })
        .collect()
}

fn parse_characters(
    raw: Option<&Value>,
) -> Result<HashMap<String, CharacterSkeleton>, StoryboardError> {
    let items = match raw {
        None | Some(Value::Null) => return Ok(HashMap::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(input_error(
                "'characters' must be an array when provided".to_string(),
            ));
        }
    };

    let mut characters = HashMap::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let raw: CharacterSkeleton = serde_json::from_value(item.clone()).map_err(|err| {
            input_error(format!("invalid character at characters[{index}]: {err}"))
        })?;
        let character = CharacterSkeleton {
            id: raw.id.trim().to_string(),
            name: raw.name.trim().to_string(),
            appearance: raw.appearance.trim().to_string(),
            outfit: raw.outfit.trim().to_string(),
            description: raw.description.trim().to_string(),
        };

        let missing: Vec<&str> = [
            ("id", &character.id),
            ("name", &character.name),
            ("appearance", &character.appearance),
            ("outfit", &character.outfit),
            ("description", &character.description),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(field, _)| field)
        .collect();
        if !missing.is_empty() {
            return Err(input_error(format!(
                "character at characters[{index}] is missing required fields: {}",
                missing.join(", ")
            )));
        }

        if characters.contains_key(&character.id) {
            return Err(input_error(format!(
                "duplicate character id '{}'",
                character.id
            )));
        }
        characters.insert(character.id.clone(), character);
    }
    Ok(characters)
}

fn resolve_structured(
    map: &serde_json::Map<String, Value>,
) -> Result<Vec<RenderJob>, StoryboardError> {
    let scenes = match map.get("scenes") {
        Some(Value::Array(scenes)) => scenes,
        _ => {
            return Err(input_error(
                "object input requires a top-level 'scenes' array".to_string(),
            ));
        }
    };
    if scenes.is_empty() {
        return Err(input_error("'scenes' cannot be empty".to_string()));
    }

    let characters = parse_characters(map.get("characters"))?;

    scenes
        .iter()
        .enumerate()
        .map(|(order_index, raw)| {
            let scene: SceneSpec = serde_json::from_value(raw.clone()).map_err(|err| {
                input_error(format!("invalid scene at scenes[{order_index}]: {err}"))
            })?;
            let title =
                non_empty(scene.title.as_deref()).unwrap_or_else(|| default_title(order_index));
            let prompt = build_scene_prompt(&scene, &characters).map_err(|message| {
                input_error(format!("scene at scenes[{order_index}]: {message}"))
            })?;
            Ok(RenderJob {
                title,
                prompt,
                order_index,
            })
        })
        .collect()
}

/// Builds the labeled prompt for one scene.
///
/// Clause order: scene description, one line per character in `character_ids` order,
/// then camera, lighting and style when set.
pub fn build_scene_prompt(
    scene: &SceneSpec,
    characters: &HashMap<String, CharacterSkeleton>,
) -> Result<String, String> {
    let description = non_empty(Some(scene.description.as_str()))
        .ok_or_else(|| "'description' is required".to_string())?;

    let mut seen = HashSet::with_capacity(scene.character_ids.len());
    let mut character_ids = Vec::with_capacity(scene.character_ids.len());
    for (index, raw_id) in scene.character_ids.iter().enumerate() {
        let id = raw_id.trim();
        if id.is_empty() {
            return Err(format!("character_ids[{index}] cannot be empty"));
        }
        if !seen.insert(id) {
            return Err(format!("duplicate character id '{id}' in character_ids"));
        }
        character_ids.push(id);
    }

    let mut overrides = HashMap::with_capacity(scene.character_descriptions.len());
    for (key, value) in &scene.character_descriptions {
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        overrides.insert(key, value.trim());
    }

    let mut unknown: Vec<&str> = overrides
        .keys()
        .copied()
        .filter(|id| !seen.contains(id))
        .collect();
    if !unknown.is_empty() {
        unknown.sort_unstable();
        return Err(format!(
            "'character_descriptions' has ids not listed in character_ids: {}",
            unknown.join(", ")
        ));
    }

    let mut clauses = vec![format!("Scene: {description}")];
    for id in character_ids {
        let character = characters.get(id).ok_or_else(|| {
            format!("character id '{id}' is not defined in top-level 'characters'")
        })?;
        let character_description = match overrides.get(id) {
            Some(value) if value.is_empty() => {
                return Err(format!("character_descriptions['{id}'] cannot be empty"));
            }
            Some(value) => *value,
            None => character.description.as_str(),
        };
        clauses.push(format!(
            "Character {}: appearance: {}; outfit: {}; description: {}",
            character.name, character.appearance, character.outfit, character_description
        ));
    }

    for (label, value) in [
        ("Camera", &scene.camera),
        ("Lighting", &scene.lighting),
        ("Style", &scene.style),
    ] {
        if let Some(value) = non_empty(value.as_deref()) {
            clauses.push(format!("{label}: {value}"));
        }
    }

    Ok(clauses.join("\n"))
}

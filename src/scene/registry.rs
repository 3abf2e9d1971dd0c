//! Scene Registry (spec §4.5): maps scene name -> scene module, populated
//! by a discovery pass over one or more scene source directories.
//!
//! Rust has no dynamic code loading story for untrusted in-tree plugins —
//! and the spec's own Non-goals rule that out anyway ("no dynamic scene
//! code loading from untrusted sources; scenes are in-tree modules
//! discovered at startup"). So discovery here walks the configured
//! directories for real, derives tags and an order hash from each path it
//! finds, and resolves the file to one of the compiled-in scene modules by
//! stem name; anything it can't resolve is rejected with a logged reason,
//! exactly as an invalid module would be.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::scene::builtin::{ChartScene, ClockScene, EmptyScene, FillScene};
use crate::scene::SceneModule;

pub struct SceneEntry {
    pub module: Arc<dyn SceneModule>,
    pub tags: Vec<String>,
    pub order: i64,
}

pub struct SceneRegistry {
    entries: HashMap<String, SceneEntry>,
}

impl SceneRegistry {
    pub fn empty() -> Self {
        SceneRegistry { entries: HashMap::new() }
    }

    /// Registers a scene module directly, bypassing filesystem discovery.
    /// Used by `discover`'s built-in resolution and by tests that need
    /// scene implementations the registry can't resolve from a file stem.
    pub fn insert(&mut self, module: Arc<dyn SceneModule>, relative_path: &str, tags: Vec<String>) {
        let name = module.name().to_string();
        let order = compute_order(&name, relative_path);
        self.entries.insert(name, SceneEntry { module, tags, order });
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SceneModule>> {
        self.entries.get(name).map(|e| e.module.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All entries, stable-sorted by their derived `order`.
    pub fn list(&self) -> Vec<&SceneEntry> {
        let mut all: Vec<&SceneEntry> = self.entries.values().collect();
        all.sort_by_key(|e| e.order);
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Constructs the compiled-in scene by its file stem, or `None` if the
/// stem names no known implementation.
fn builtin_by_stem(stem: &str) -> Option<Arc<dyn SceneModule>> {
    match stem {
        "empty" => Some(Arc::new(EmptyScene)),
        "fill" => Some(Arc::new(FillScene)),
        "clock" => Some(Arc::new(ClockScene)),
        "chart" => Some(Arc::new(ChartScene)),
        _ => None,
    }
}

/// Derives tags from a scene file's path segments relative to its scan
/// root, per spec §4.5: a `dev` segment implies dev-only, an `examples`
/// segment implies examples, and the first segment may imply device-type
/// targeting.
fn derive_tags(relative_path: &Path) -> Vec<String> {
    let mut tags = Vec::new();
    let mut components = relative_path.components().peekable();

    if let Some(first) = components.peek() {
        if let Some(s) = first.as_os_str().to_str() {
            if relative_path.components().count() > 1 {
                tags.push(s.to_string());
            }
        }
    }

    for component in relative_path.components() {
        if let Some(s) = component.as_os_str().to_str() {
            if s == "dev" && !tags.contains(&"dev".to_string()) {
                tags.push("dev".to_string());
            }
            if s == "examples" && !tags.contains(&"examples".to_string()) {
                tags.push("examples".to_string());
            }
        }
    }

    tags
}

/// FNV-1a, chosen because `std`'s `DefaultHasher` is randomly seeded per
/// process and can't give the reproducible-across-runs ordering spec §4.5
/// requires.
fn fnv1a_64(data: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn compute_order(name: &str, relative_path: &str) -> i64 {
    let key = format!("{name}|{relative_path}");
    fnv1a_64(key.as_bytes()) as i64
}

/// Scans `roots` in order (core directory first, then an optional user
/// directory) for candidate scene files and resolves each to a compiled-in
/// implementation by file stem. Directories that don't exist are skipped,
/// not an error. Falls back to the `empty`/`fill` pack if nothing was
/// discovered, so the daemon is always renderable.
pub fn discover(roots: &[&Path]) -> SceneRegistry {
    let mut registry = SceneRegistry::empty();

    for root in roots {
        if !root.is_dir() {
            continue;
        }
        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("rs") {
                continue;
            }
            let relative = path.strip_prefix(root).unwrap_or(path);
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s,
                None => continue,
            };

            match builtin_by_stem(stem) {
                Some(module) => {
                    let tags = derive_tags(relative);
                    registry.insert(module, &relative.to_string_lossy(), tags);
                }
                None => {
                    tracing::warn!(path = %path.display(), "rejecting scene module: no render implementation registered for this file");
                }
            }
        }
    }

    if registry.is_empty() {
        tracing::info!("no scenes discovered, installing empty/fill fallback pack");
        registry.insert(Arc::new(EmptyScene), "fallback/empty.rs", vec!["fallback".to_string()]);
        registry.insert(Arc::new(FillScene), "fallback/fill.rs", vec!["fallback".to_string()]);
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_hash_is_deterministic_across_calls() {
        let a = compute_order("clock", "builtin/clock.rs");
        let b = compute_order("clock", "builtin/clock.rs");
        assert_eq!(a, b);
    }

    #[test]
    fn order_hash_differs_by_path() {
        let a = compute_order("clock", "builtin/clock.rs");
        let b = compute_order("clock", "dev/clock.rs");
        assert_ne!(a, b);
    }

    #[test]
    fn missing_directories_fall_back_to_empty_and_fill() {
        let registry = discover(&[Path::new("/nonexistent/pidicon/scenes")]);
        assert!(registry.contains("empty"));
        assert!(registry.contains("fill"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn derive_tags_flags_dev_segment() {
        let tags = derive_tags(Path::new("dev/clock.rs"));
        assert!(tags.contains(&"dev".to_string()));
    }

    #[test]
    fn derive_tags_is_empty_for_top_level_file() {
        let tags = derive_tags(Path::new("clock.rs"));
        assert!(tags.is_empty());
    }
}

//! Image manifest generation.
//!
//! Client scripts read a catalog of the site's image sets from a global
//! object. The manifest is built from the `images/` layout:
//!
//! ```text
//! images/
//! ├── landing/*.jpg            → manifest.landing
//! ├── main/*.jpg               → manifest.main
//! └── projects/<slug>/         → manifest.projects[]
//!     ├── project.json         → { "title": …, "description": … } (optional)
//!     └── *.jpg
//! ```
//!
//! Paths are build-root-relative (`images/landing/hero.jpg`). After image
//! hashing the manifest is passed through the rename map, so the written
//! `window.__MANIFEST__` only ever names hashed files. The head builder also
//! reads it to pick per-page hero preloads.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SiteConfig;
use crate::naming::title_from_slug;
use crate::types::{IMAGE_EXTENSIONS, RenameMap};

/// File name of the generated manifest script inside the scripts directory.
pub const MANIFEST_SCRIPT: &str = "image-manifest.js";

const PROJECT_META: &str = "project.json";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageManifest {
    pub landing: Vec<String>,
    pub main: Vec<String>,
    pub projects: Vec<Project>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub images: Vec<String>,
}

/// Optional per-project overrides. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProjectMeta {
    title: Option<String>,
    description: Option<String>,
}

impl ImageManifest {
    /// Images of a named section: `landing`, `main`, or a project slug.
    pub fn section(&self, name: &str) -> Option<&[String]> {
        match name {
            "landing" => Some(&self.landing),
            "main" => Some(&self.main),
            slug => self
                .projects
                .iter()
                .find(|p| p.slug == slug)
                .map(|p| p.images.as_slice()),
        }
    }

    /// First image of a section, the candidate for a hero preload.
    pub fn hero_for(&self, section: &str) -> Option<&str> {
        self.section(section)?.first().map(String::as_str)
    }

    /// Every image path, in manifest order.
    pub fn all_images(&self) -> impl Iterator<Item = &str> {
        self.landing
            .iter()
            .chain(self.main.iter())
            .chain(self.projects.iter().flat_map(|p| p.images.iter()))
            .map(String::as_str)
    }

    /// A copy with every mapped path replaced by its hashed counterpart.
    pub fn rewrite(&self, map: &RenameMap) -> ImageManifest {
        let swap = |paths: &[String]| -> Vec<String> {
            paths
                .iter()
                .map(|p| map.get(p).unwrap_or(p.as_str()).to_string())
                .collect()
        };
        ImageManifest {
            landing: swap(&self.landing),
            main: swap(&self.main),
            projects: self
                .projects
                .iter()
                .map(|p| Project {
                    images: swap(&p.images),
                    ..p.clone()
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The script body exposing the manifest as `window.__MANIFEST__`.
    pub fn to_script(&self) -> Result<String, ManifestError> {
        Ok(format!("window.__MANIFEST__ = {};\n", self.to_json()?))
    }

    /// Write the manifest script into the scripts directory under `root`.
    /// Returns its build-root-relative path.
    pub fn write(&self, root: &Path, config: &SiteConfig) -> Result<String, ManifestError> {
        let rel = format!("{}/{}", config.assets.scripts_dir, MANIFEST_SCRIPT);
        let path = root.join(&rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, self.to_script()?)?;
        debug!("wrote {}", rel);
        Ok(rel)
    }
}

/// Build the manifest from the images directory under `root`.
///
/// A missing images directory or section yields empty lists. A malformed
/// `project.json` is logged and the slug-derived defaults are used.
pub fn scan_images(root: &Path, config: &SiteConfig) -> Result<ImageManifest, ManifestError> {
    let images_dir = config.assets.images_dir.as_str();
    if !root.join(images_dir).is_dir() {
        warn!("images directory not found: {}", images_dir);
        return Ok(ImageManifest::default());
    }

    let landing = image_files(root, &format!("{images_dir}/landing"))?;
    let main = image_files(root, &format!("{images_dir}/main"))?;

    let projects_rel = format!("{images_dir}/projects");
    let mut projects = Vec::new();
    for slug in subdirectories(&root.join(&projects_rel))? {
        let dir_rel = format!("{projects_rel}/{slug}");
        let meta = read_project_meta(&root.join(&dir_rel), &slug);
        projects.push(Project {
            title: meta.title.unwrap_or_else(|| title_from_slug(&slug)),
            description: meta.description.unwrap_or_default(),
            images: image_files(root, &dir_rel)?,
            slug,
        });
    }

    Ok(ImageManifest {
        landing,
        main,
        projects,
    })
}

fn read_project_meta(dir: &Path, slug: &str) -> ProjectMeta {
    let path = dir.join(PROJECT_META);
    let Ok(content) = fs::read_to_string(&path) else {
        return ProjectMeta::default();
    };
    match serde_json::from_str(&content) {
        Ok(meta) => meta,
        Err(e) => {
            warn!("invalid {} in {}: {}", PROJECT_META, slug, e);
            ProjectMeta::default()
        }
    }
}

/// Direct image children of `root/dir_rel`, sorted, as root-relative paths.
fn image_files(root: &Path, dir_rel: &str) -> Result<Vec<String>, ManifestError> {
    let dir = root.join(dir_rel);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<String> = fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| !name.starts_with('.') && is_image(name))
        .map(|name| format!("{dir_rel}/{name}"))
        .collect();
    files.sort();
    Ok(files)
}

fn subdirectories(dir: &Path) -> Result<Vec<String>, ManifestError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    Ok(names)
}

fn is_image(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

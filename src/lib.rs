//! Parser, validator and normalizer for buildozer-style Android build
//! manifests.
//!
//! ```
//! let manifest = droidspec::parse(
//!     "[app]\ntitle = Jump And Win\npackage.name = jumpandwin\n\
//!      android.minapi = 21\nandroid.api = 33\n",
//! )
//! .unwrap();
//! assert_eq!(manifest.android.min_api, 21);
//! assert_eq!(droidspec::parse(&manifest.serialize()).unwrap(), manifest);
//! ```

pub mod android;
pub mod assets;
pub mod document;
pub mod error;
pub mod interpolate;
pub mod manifest;
pub mod validate;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub use document::Document;
pub use error::{ManifestError, Origin, Result};
pub use manifest::{BuildManifest, Orientation, Requirement};
pub use validate::{Diagnostic, Severity};

use manifest::{APP_KEYS, APP_SECTION, BUILDOZER_KEYS, BUILDOZER_SECTION};

/// Knobs that change how a manifest is read.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Profile whose `[section@profile]` blocks are applied.
    pub profile: Option<String>,
    /// Variables consulted for `APP_*` / `BUILDOZER_*` overrides.
    pub env: HashMap<String, String>,
    /// Directory relative paths (such as `version.filename`) resolve against.
    pub base_dir: Option<PathBuf>,
}

impl ParseOptions {
    /// Options that honor the current process environment.
    pub fn from_env() -> Self {
        Self {
            env: std::env::vars().collect(),
            ..Self::default()
        }
    }
}

/// A manifest accepted without errors, with what was learned on the way.
#[derive(Debug, Clone)]
pub struct Parsed {
    pub manifest: BuildManifest,
    pub warnings: Vec<Diagnostic>,
    /// Profile sections that were merged, e.g. `app@demo`.
    pub profile_sections: Vec<String>,
    /// Environment variables that overrode file values.
    pub env_overrides: Vec<String>,
    pub document: Document,
}

/// Parses and validates manifest text with default options.
pub fn parse(contents: &str) -> Result<BuildManifest> {
    parse_with(contents, &ParseOptions::default()).map(|parsed| parsed.manifest)
}

/// Parses and validates manifest text.
///
/// Structural problems (syntax, missing required keys, undefined
/// placeholders, malformed values) fail immediately. Semantic errors are
/// collected and returned together as [`ManifestError::Validation`].
pub fn parse_with(contents: &str, options: &ParseOptions) -> Result<Parsed> {
    let mut document = Document::parse(contents)?;

    let profile_sections = match &options.profile {
        Some(profile) => document.apply_profile(profile),
        None => Vec::new(),
    };
    let mut env_overrides = document.apply_env_overrides(APP_SECTION, APP_KEYS, &options.env);
    env_overrides.extend(document.apply_env_overrides(
        BUILDOZER_SECTION,
        BUILDOZER_KEYS,
        &options.env,
    ));

    let (manifest, defaulted) =
        BuildManifest::from_document(&document, options.base_dir.as_deref())?;

    let mut diagnostics = validate::validate(&manifest);
    diagnostics.extend(validate::defaulted(&defaulted));
    validate::locate(&mut diagnostics, &document);

    let (errors, warnings): (Vec<_>, Vec<_>) =
        diagnostics.into_iter().partition(Diagnostic::is_error);
    if !errors.is_empty() {
        return Err(ManifestError::Validation(errors));
    }

    Ok(Parsed {
        manifest,
        warnings,
        profile_sections,
        env_overrides,
        document,
    })
}

/// Reads and parses the manifest at `path`; relative paths inside it
/// resolve against its directory.
pub fn load(path: &Path, options: &ParseOptions) -> Result<Parsed> {
    let contents = fs::read_to_string(path)?;
    let options = ParseOptions {
        base_dir: Some(manifest_dir(path)),
        ..options.clone()
    };
    parse_with(&contents, &options)
}

/// Directory containing the manifest file.
pub fn manifest_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

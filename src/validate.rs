//! Semantic checks on a parsed manifest.
//!
//! Checks never stop at the first problem: every finding becomes a
//! [`Diagnostic`] so that one `check` run reports everything.

use std::fmt;
use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::android::{KNOWN_ARCHS, MIN_SUPPORTED_API, NdkVersion, STORE_TARGET_API};
use crate::document::Document;
use crate::error::Origin;
use crate::manifest::{APP_SECTION, BuildManifest, Defaulted, normalize, resolve_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub section: String,
    pub key: String,
    pub origin: Option<Origin>,
    pub message: String,
}

impl Diagnostic {
    pub fn error(key: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, key, message)
    }

    pub fn warning(key: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, key, message)
    }

    fn new(severity: Severity, key: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            section: APP_SECTION.to_string(),
            key: key.to_string(),
            origin: None,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: [{}] {}", label, self.section, self.key)?;
        if let Some(origin) = &self.origin {
            write!(f, " ({})", origin)?;
        }
        write!(f, ": {}", self.message)
    }
}

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid")
});
static REQUIREMENT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("requirement regex is valid")
});

/// Runs every semantic check on `manifest`.
pub fn validate(manifest: &BuildManifest) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    let android = &manifest.android;

    if android.min_api > android.target_api {
        out.push(Diagnostic::error(
            "android.minapi",
            format!(
                "android.minapi ({}) must not exceed android.api ({})",
                android.min_api, android.target_api
            ),
        ));
    }
    if android.min_api < MIN_SUPPORTED_API {
        out.push(Diagnostic::warning(
            "android.minapi",
            format!(
                "API {} is below the lowest supported level {}",
                android.min_api, MIN_SUPPORTED_API
            ),
        ));
    }
    if android.target_api < STORE_TARGET_API {
        out.push(Diagnostic::warning(
            "android.api",
            format!(
                "store uploads require a target API of at least {}",
                STORE_TARGET_API
            ),
        ));
    }
    if android.sdk.is_some() {
        out.push(Diagnostic::warning(
            "android.sdk",
            "android.sdk is deprecated and ignored; use android.api",
        ));
    }
    if NdkVersion::parse(&android.ndk).is_none() {
        out.push(Diagnostic::warning(
            "android.ndk",
            format!("unrecognized NDK version {:?} (expected e.g. 25b)", android.ndk),
        ));
    }
    if android.archs.is_empty() {
        out.push(Diagnostic::error("android.archs", "no architectures listed"));
    }
    for arch in &android.archs {
        if !KNOWN_ARCHS.contains(&arch.as_str()) {
            out.push(Diagnostic::warning(
                "android.archs",
                format!("unknown architecture {:?}", arch),
            ));
        }
    }

    if !IDENTIFIER.is_match(&manifest.package.name) {
        out.push(Diagnostic::error(
            "package.name",
            format!(
                "{:?} is not a valid name (letters, digits and underscores, not starting with a digit)",
                manifest.package.name
            ),
        ));
    }
    if !manifest.package.domain.split('.').all(|segment| IDENTIFIER.is_match(segment)) {
        out.push(Diagnostic::error(
            "package.domain",
            format!(
                "{:?} is not a valid reverse domain",
                manifest.package.domain
            ),
        ));
    }

    if manifest.source.include_exts.is_empty() {
        out.push(Diagnostic::error(
            "source.include_exts",
            "no extensions listed; nothing would be bundled",
        ));
    }
    for (key, patterns) in [
        ("source.include_patterns", &manifest.source.include_patterns),
        ("source.exclude_patterns", &manifest.source.exclude_patterns),
    ] {
        for pattern in patterns {
            if let Err(err) = glob::Pattern::new(pattern) {
                out.push(Diagnostic::error(
                    key,
                    format!("invalid pattern {:?}: {}", pattern, err.msg),
                ));
            }
        }
    }

    for requirement in &manifest.requirements {
        let opaque = requirement.name.contains("://");
        if !opaque && !REQUIREMENT_NAME.is_match(&requirement.name) {
            out.push(Diagnostic::error(
                "requirements",
                format!("invalid requirement {:?}", requirement.to_string()),
            ));
        }
    }

    for permission in &manifest.permissions {
        if permission.chars().any(char::is_whitespace) {
            out.push(Diagnostic::error(
                "android.permissions",
                format!("permission {:?} contains whitespace", permission),
            ));
        }
    }

    for (key, path) in [
        ("icon.filename", &manifest.icon),
        ("presplash.filename", &manifest.presplash),
    ] {
        let Some(path) = path else { continue };
        if !is_within(path, &manifest.source.dir) {
            out.push(Diagnostic::warning(
                key,
                format!(
                    "{} is outside source.dir; write it as %(source.dir)s/...",
                    path.display()
                ),
            ));
        }
    }

    out
}

/// True when `path` stays below `root` once both are normalized.
fn is_within(path: &Path, root: &Path) -> bool {
    match normalize(path).strip_prefix(normalize(root)) {
        Ok(rest) => !matches!(rest.components().next(), Some(Component::ParentDir)),
        Err(_) => false,
    }
}

/// Warnings for keys that silently fell back to defaults, and for list
/// sections that could not be kept.
pub fn defaulted(defaulted: &Defaulted) -> Vec<Diagnostic> {
    let mut out: Vec<Diagnostic> = defaulted
        .keys
        .iter()
        .map(|key| Diagnostic::warning(key, "not set; using the default value"))
        .collect();
    for section in &defaulted.ignored {
        let mut diagnostic = Diagnostic::warning(
            section,
            "list section ignored; its key cannot be written as `key = value`",
        );
        diagnostic.section = section.clone();
        out.push(diagnostic);
    }
    out
}

/// Checks that the paths the manifest points at exist below `base_dir`.
pub fn check_paths(manifest: &BuildManifest, base_dir: &Path) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    let source = resolve_path(base_dir, &manifest.source.dir);
    if !source.is_dir() {
        out.push(Diagnostic::error(
            "source.dir",
            format!("{} is not a directory", source.display()),
        ));
    }
    for (key, path) in [
        ("icon.filename", &manifest.icon),
        ("presplash.filename", &manifest.presplash),
    ] {
        let Some(path) = path else { continue };
        let resolved = resolve_path(base_dir, path);
        if !resolved.is_file() {
            out.push(Diagnostic::warning(
                key,
                format!("{} does not exist", resolved.display()),
            ));
        }
    }
    out
}

/// Attaches the line (or environment variable) of each diagnostic's key.
pub fn locate(diagnostics: &mut [Diagnostic], doc: &Document) {
    for diagnostic in diagnostics {
        if diagnostic.origin.is_none() {
            diagnostic.origin = doc
                .lookup(&diagnostic.section, &diagnostic.key)
                .map(|entry| entry.origin.clone());
        }
    }
}

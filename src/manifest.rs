//! The typed build manifest and its canonical text form.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::document::{Document, split_list};
use crate::error::{ManifestError, Origin, Result};
use crate::interpolate::{escape, interpolate};

pub const APP_SECTION: &str = "app";
pub const BUILDOZER_SECTION: &str = "buildozer";

/// Keys of `[app]` with a dedicated field. Everything else lands in
/// [`BuildManifest::extra`].
pub const APP_KEYS: &[&str] = &[
    "title",
    "package.name",
    "package.domain",
    "source.dir",
    "source.include_exts",
    "source.include_patterns",
    "source.exclude_exts",
    "source.exclude_dirs",
    "source.exclude_patterns",
    "version",
    "version.regex",
    "version.filename",
    "requirements",
    "orientation",
    "fullscreen",
    "icon.filename",
    "presplash.filename",
    "android.permissions",
    "android.api",
    "android.minapi",
    "android.sdk",
    "android.ndk",
    "android.archs",
];

pub const BUILDOZER_KEYS: &[&str] = &["log_level", "warn_on_root", "build_dir", "bin_dir"];

pub const DEFAULT_DOMAIN: &str = "org.test";
pub const DEFAULT_VERSION: &str = "0.1";
pub const DEFAULT_INCLUDE_EXTS: &[&str] = &["py", "png", "jpg", "kv", "atlas"];
pub const DEFAULT_TARGET_API: u32 = 33;
pub const DEFAULT_MIN_API: u32 = 21;
pub const DEFAULT_NDK: &str = "25b";
pub const DEFAULT_ARCHS: &[&str] = &["arm64-v8a", "armeabi-v7a"];

/// Display orientation constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
    PortraitReverse,
    LandscapeReverse,
    All,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Portrait => "portrait",
            Orientation::Landscape => "landscape",
            Orientation::PortraitReverse => "portrait-reverse",
            Orientation::LandscapeReverse => "landscape-reverse",
            Orientation::All => "all",
        }
    }
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "portrait" => Ok(Orientation::Portrait),
            "landscape" => Ok(Orientation::Landscape),
            "portrait-reverse" | "reverseportrait" => Ok(Orientation::PortraitReverse),
            "landscape-reverse" | "reverselandscape" => Ok(Orientation::LandscapeReverse),
            "all" | "sensor" => Ok(Orientation::All),
            _ => Err(
                "expected one of: portrait, landscape, portrait-reverse, landscape-reverse, all"
                    .to_string(),
            ),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One runtime library, optionally pinned: `kivy==2.1.0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    pub constraint: Option<String>,
}

impl Requirement {
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        // URLs (git+https://...) are opaque names.
        if token.contains("://") {
            return Self {
                name: token.to_string(),
                constraint: None,
            };
        }
        match token.find(['=', '<', '>', '!', '~']) {
            Some(at) => Self {
                name: token[..at].trim().to_string(),
                constraint: Some(token[at..].trim().to_string()),
            },
            None => Self {
                name: token.to_string(),
                constraint: None,
            },
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some(constraint) => write!(f, "{}{}", self.name, constraint),
            None => f.write_str(&self.name),
        }
    }
}

/// Reverse-domain application identifier, split the way the manifest
/// spells it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageId {
    pub name: String,
    pub domain: String,
}

impl PackageId {
    /// `org.example.game` for domain `org.example` and name `game`.
    pub fn identifier(&self) -> String {
        format!("{}.{}", self.domain, self.name)
    }
}

/// Which files under `source.dir` get bundled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub dir: PathBuf,
    pub include_exts: Vec<String>,
    pub include_patterns: Vec<String>,
    pub exclude_exts: Vec<String>,
    pub exclude_dirs: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AndroidTarget {
    pub target_api: u32,
    pub min_api: u32,
    /// Deprecated; kept so that it survives a round trip.
    pub sdk: Option<u32>,
    pub ndk: String,
    pub archs: Vec<String>,
}

/// The `[buildozer]` section: settings of the packager run itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSettings {
    pub log_level: u8,
    pub warn_on_root: bool,
    pub build_dir: PathBuf,
    pub bin_dir: PathBuf,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            log_level: 2,
            warn_on_root: true,
            build_dir: PathBuf::from("./.buildozer"),
            bin_dir: PathBuf::from("./bin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub title: String,
    pub package: PackageId,
    pub version: String,
    pub source: SourceSpec,
    pub requirements: Vec<Requirement>,
    pub permissions: Vec<String>,
    pub orientation: Orientation,
    pub fullscreen: bool,
    pub icon: Option<PathBuf>,
    pub presplash: Option<PathBuf>,
    pub android: AndroidTarget,
    pub build: BuildSettings,
    pub extra: BTreeMap<String, String>,
}

/// What the typed manifest filled in or left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defaulted {
    /// Keys that fell back to a default instead of being written out.
    pub keys: Vec<&'static str>,
    /// `[app:key]` list sections whose key cannot be written as `key = ...`.
    pub ignored: Vec<String>,
}

/// True when `key = value` reads back as the same key.
fn writable_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(['=', ':']) && !key.starts_with(['#', ';', '['])
}

/// Typed, interpolated access to one section of a document.
struct Reader<'a> {
    doc: &'a Document,
    section: &'a str,
}

impl<'a> Reader<'a> {
    fn new(doc: &'a Document, section: &'a str) -> Self {
        Self { doc, section }
    }

    fn origin(&self, key: &str) -> Origin {
        self.doc
            .lookup(self.section, key)
            .map(|e| e.origin.clone())
            .unwrap_or(Origin::Line(0))
    }

    /// Interpolated value; `None` when the key is absent.
    fn string(&self, key: &str) -> Result<Option<String>> {
        let Some(entry) = self.doc.lookup(self.section, key) else {
            return Ok(None);
        };
        let Some(raw) = entry.value.as_deref() else {
            return Ok(None);
        };
        interpolate(self.doc, self.section, key, raw, &entry.origin).map(Some)
    }

    /// Interpolated, non-empty value or `MissingRequiredKey`.
    fn required(&self, key: &str) -> Result<String> {
        match self.string(key)? {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ManifestError::MissingRequiredKey {
                section: self.section.to_string(),
                key: key.to_string(),
            }),
        }
    }

    /// List value; a `[section:key]` list section takes precedence over the
    /// inline comma-separated form. `None` when neither is present.
    fn list(&self, key: &str) -> Result<Option<Vec<String>>> {
        if let Some(tokens) = self.doc.list_section(self.section, key) {
            return Ok(Some(split_list(tokens)));
        }
        Ok(self.string(key)?.map(|value| split_list([value.as_str()])))
    }

    fn parse<T: FromStr>(&self, key: &str, reason: &str) -> Result<Option<T>> {
        match self.string(key)? {
            None => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| ManifestError::InvalidValue {
                key: key.to_string(),
                value,
                reason: reason.to_string(),
                origin: self.origin(key),
            }),
        }
    }

    fn boolean(&self, key: &str) -> Result<Option<bool>> {
        match self.string(key)? {
            None => Ok(None),
            Some(value) => match value.to_lowercase().as_str() {
                "1" | "yes" | "true" | "on" => Ok(Some(true)),
                "0" | "no" | "false" | "off" => Ok(Some(false)),
                _ => Err(ManifestError::InvalidValue {
                    key: key.to_string(),
                    value,
                    reason: "expected a boolean (1/0, yes/no, true/false, on/off)".to_string(),
                    origin: self.origin(key),
                }),
            },
        }
    }

    fn path(&self, key: &str) -> Result<Option<PathBuf>> {
        Ok(self.string(key)?.filter(|v| !v.is_empty()).map(PathBuf::from))
    }
}

fn owned(defaults: &[&str]) -> Vec<String> {
    defaults.iter().map(|s| (*s).to_string()).collect()
}

impl BuildManifest {
    /// Builds a manifest from a parsed document.
    ///
    /// `base_dir` is where relative `version.filename` paths are resolved;
    /// without it a manifest relying on `version.regex` is rejected.
    pub fn from_document(doc: &Document, base_dir: Option<&Path>) -> Result<(Self, Defaulted)> {
        let app = Reader::new(doc, APP_SECTION);
        let mut defaulted = Defaulted::default();

        let title = app.required("title")?;
        let name = app.required("package.name")?;
        let domain = match app.string("package.domain")?.filter(|d| !d.is_empty()) {
            Some(domain) => domain,
            None => {
                defaulted.keys.push("package.domain");
                DEFAULT_DOMAIN.to_string()
            }
        };

        let version = match app.string("version")?.filter(|v| !v.is_empty()) {
            Some(version) => version,
            None => match extract_version(&app, base_dir)? {
                Some(version) => version,
                None => {
                    defaulted.keys.push("version");
                    DEFAULT_VERSION.to_string()
                }
            },
        };

        let source = SourceSpec {
            dir: app.path("source.dir")?.unwrap_or_else(|| PathBuf::from(".")),
            include_exts: app
                .list("source.include_exts")?
                .unwrap_or_else(|| owned(DEFAULT_INCLUDE_EXTS)),
            include_patterns: app.list("source.include_patterns")?.unwrap_or_default(),
            exclude_exts: app.list("source.exclude_exts")?.unwrap_or_default(),
            exclude_dirs: app.list("source.exclude_dirs")?.unwrap_or_default(),
            exclude_patterns: app.list("source.exclude_patterns")?.unwrap_or_default(),
        };

        // `kivy==2.1` and `kivy ==2.1` name the same requirement.
        let mut requirements: Vec<Requirement> = Vec::new();
        for token in app.list("requirements")?.unwrap_or_default() {
            let requirement = Requirement::parse(&token);
            if !requirements.contains(&requirement) {
                requirements.push(requirement);
            }
        }

        let orientation = match app.string("orientation")? {
            None => Orientation::default(),
            Some(value) => value.parse().map_err(|reason| ManifestError::InvalidValue {
                key: "orientation".to_string(),
                value,
                reason,
                origin: app.origin("orientation"),
            })?,
        };

        let android = AndroidTarget {
            target_api: app
                .parse("android.api", "expected an integer API level")?
                .unwrap_or(DEFAULT_TARGET_API),
            min_api: app
                .parse("android.minapi", "expected an integer API level")?
                .unwrap_or(DEFAULT_MIN_API),
            sdk: app.parse("android.sdk", "expected an integer API level")?,
            ndk: app
                .string("android.ndk")?
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_NDK.to_string()),
            archs: app
                .list("android.archs")?
                .unwrap_or_else(|| owned(DEFAULT_ARCHS)),
        };

        let mut extra = BTreeMap::new();
        if let Some(section) = doc.section(APP_SECTION) {
            for entry in &section.entries {
                if APP_KEYS.contains(&entry.key.as_str()) {
                    continue;
                }
                if let Some(value) = app.string(&entry.key)? {
                    extra.insert(entry.key.clone(), value);
                }
            }
        }
        // List sections of keys without a field are carried as inline lists.
        for section in doc.sections() {
            let Some(key) = section.name.strip_prefix("app:") else {
                continue;
            };
            let key = key.trim().to_lowercase();
            if key.contains('@') || APP_KEYS.contains(&key.as_str()) {
                continue;
            }
            if !writable_key(&key) {
                defaulted.ignored.push(section.name.clone());
                continue;
            }
            let tokens = split_list(section.entries.iter().map(|e| e.key.as_str()));
            extra.insert(key, tokens.join(","));
        }

        let buildozer = Reader::new(doc, BUILDOZER_SECTION);
        let defaults = BuildSettings::default();
        let log_level: u8 = buildozer
            .parse("log_level", "expected 0, 1 or 2")?
            .unwrap_or(defaults.log_level);
        if log_level > 2 {
            return Err(ManifestError::InvalidValue {
                key: "log_level".to_string(),
                value: log_level.to_string(),
                reason: "expected 0, 1 or 2".to_string(),
                origin: buildozer.origin("log_level"),
            });
        }
        let build = BuildSettings {
            log_level,
            warn_on_root: buildozer
                .boolean("warn_on_root")?
                .unwrap_or(defaults.warn_on_root),
            build_dir: buildozer.path("build_dir")?.unwrap_or(defaults.build_dir),
            bin_dir: buildozer.path("bin_dir")?.unwrap_or(defaults.bin_dir),
        };

        let manifest = BuildManifest {
            title,
            package: PackageId { name, domain },
            version,
            source,
            requirements,
            permissions: app.list("android.permissions")?.unwrap_or_default(),
            orientation,
            fullscreen: app.boolean("fullscreen")?.unwrap_or(false),
            icon: app.path("icon.filename")?,
            presplash: app.path("presplash.filename")?,
            android,
            build,
            extra,
        };
        Ok((manifest, defaulted))
    }

    /// Writes the manifest in canonical form. Parsing the result yields an
    /// equal manifest.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str("[app]\n");
        push(&mut out, "title", &self.title);
        push(&mut out, "package.name", &self.package.name);
        push(&mut out, "package.domain", &self.package.domain);
        push(&mut out, "source.dir", &self.source.dir.to_string_lossy());
        push_list(&mut out, "source.include_exts", &self.source.include_exts, true);
        push_list(&mut out, "source.include_patterns", &self.source.include_patterns, false);
        push_list(&mut out, "source.exclude_exts", &self.source.exclude_exts, false);
        push_list(&mut out, "source.exclude_dirs", &self.source.exclude_dirs, false);
        push_list(&mut out, "source.exclude_patterns", &self.source.exclude_patterns, false);
        push(&mut out, "version", &self.version);
        let requirements: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        push_list(&mut out, "requirements", &requirements, false);
        push(&mut out, "orientation", self.orientation.as_str());
        push(&mut out, "fullscreen", if self.fullscreen { "1" } else { "0" });
        if let Some(icon) = &self.icon {
            push(&mut out, "icon.filename", &icon.to_string_lossy());
        }
        if let Some(presplash) = &self.presplash {
            push(&mut out, "presplash.filename", &presplash.to_string_lossy());
        }
        push_list(&mut out, "android.permissions", &self.permissions, false);
        push(&mut out, "android.api", &self.android.target_api.to_string());
        push(&mut out, "android.minapi", &self.android.min_api.to_string());
        if let Some(sdk) = self.android.sdk {
            push(&mut out, "android.sdk", &sdk.to_string());
        }
        push(&mut out, "android.ndk", &self.android.ndk);
        push_list(&mut out, "android.archs", &self.android.archs, true);
        for (key, value) in &self.extra {
            push(&mut out, key, value);
        }

        out.push_str("\n[buildozer]\n");
        push(&mut out, "log_level", &self.build.log_level.to_string());
        push(&mut out, "warn_on_root", if self.build.warn_on_root { "1" } else { "0" });
        push(&mut out, "build_dir", &self.build.build_dir.to_string_lossy());
        push(&mut out, "bin_dir", &self.build.bin_dir.to_string_lossy());
        out
    }

    /// Reverse-domain identifier of the packaged application.
    pub fn identifier(&self) -> String {
        self.package.identifier()
    }
}

fn push(out: &mut String, key: &str, value: &str) {
    let escaped = escape(value).replace('\n', "\n    ");
    if escaped.is_empty() {
        out.push_str(&format!("{} =\n", key));
    } else {
        out.push_str(&format!("{} = {}\n", key, escaped));
    }
}

fn push_list(out: &mut String, key: &str, values: &[String], always: bool) {
    if always || !values.is_empty() {
        push(out, key, &values.join(","));
    }
}

/// Parts of `doc` that [`BuildManifest::serialize`] cannot reproduce:
/// sections other than `[app]`, `[buildozer]` and the list sections it folds
/// inline, unknown `[buildozer]` keys, `version.regex`, and placeholders,
/// which are written resolved.
pub fn lost_on_rewrite(doc: &Document) -> Vec<String> {
    let mut lost = Vec::new();
    for section in doc.sections() {
        let kept = match section.name.as_str() {
            APP_SECTION | BUILDOZER_SECTION => true,
            name => name.strip_prefix("app:").is_some_and(|key| {
                let key = key.trim().to_lowercase();
                !key.contains('@') && (APP_KEYS.contains(&key.as_str()) || writable_key(&key))
            }),
        };
        if !kept {
            lost.push(format!("[{}] section", section.name));
            continue;
        }
        if section.is_list() {
            continue;
        }
        for entry in &section.entries {
            if section.name == BUILDOZER_SECTION && !BUILDOZER_KEYS.contains(&entry.key.as_str()) {
                lost.push(format!("[buildozer] {}", entry.key));
            } else if section.name == APP_SECTION
                && matches!(entry.key.as_str(), "version.regex" | "version.filename")
            {
                lost.push(format!("[app] {} (written as a fixed version)", entry.key));
            } else if entry
                .value
                .as_deref()
                .is_some_and(|v| v.replace("%%", "").contains("%("))
            {
                lost.push(format!(
                    "[{}] {} placeholder (written resolved)",
                    section.name, entry.key
                ));
            }
        }
    }
    lost
}

/// Reads the version out of `version.filename` with `version.regex`; the
/// first capture group is the version.
fn extract_version(app: &Reader<'_>, base_dir: Option<&Path>) -> Result<Option<String>> {
    let Some(pattern) = app.string("version.regex")? else {
        return Ok(None);
    };
    let invalid = |value: String, reason: String| ManifestError::InvalidValue {
        key: "version.regex".to_string(),
        value,
        reason,
        origin: app.origin("version.regex"),
    };

    let regex = Regex::new(&pattern).map_err(|e| invalid(pattern.clone(), e.to_string()))?;
    let filename = app
        .path("version.filename")?
        .ok_or_else(|| ManifestError::MissingRequiredKey {
            section: APP_SECTION.to_string(),
            key: "version.filename".to_string(),
        })?;
    let base = base_dir.ok_or_else(|| {
        invalid(
            pattern.clone(),
            "version.filename can only be read from a manifest loaded from disk".to_string(),
        )
    })?;
    let contents = fs::read_to_string(resolve_path(base, &filename))?;
    let version = regex
        .captures(&contents)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .ok_or_else(|| {
            invalid(
                pattern.clone(),
                format!("no match with a capture group in {}", filename.display()),
            )
        })?;
    Ok(Some(version))
}

/// Resolves a manifest path against the manifest directory, expanding a
/// leading `~` to the home directory.
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    };
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

/// Lexically normalizes a path: `.` components are dropped and `..` cancels
/// the preceding directory, so `./data/../icon.png` becomes `icon.png`.
/// Leading `..` components that have nothing to cancel are kept.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(text: &str) -> Result<BuildManifest> {
        let doc = Document::parse(text)?;
        BuildManifest::from_document(&doc, None).map(|(m, _)| m)
    }

    const GAME: &str = "\
[app]
title = Jump And Win
package.name = jumpandwin
package.domain = org.jumpandwin
source.dir = .
source.include_exts = py, png ,jpg,kv,atlas,wav,ogg,ttf,json
version = 1.0
requirements = python3,pygame==2.5.2, psycopg2 ,python3
orientation = landscape
icon.filename = %(source.dir)s/assets/icon.png
android.permissions = INTERNET, ACCESS_NETWORK_STATE
android.api = 33
android.minapi = 21
android.ndk = 25b
android.archs = arm64-v8a
p4a.branch = master

[buildozer]
log_level = 1
warn_on_root = 0
";

    #[test]
    fn parses_every_recognized_key() {
        let m = build(GAME).unwrap();
        assert_eq!(m.title, "Jump And Win");
        assert_eq!(m.identifier(), "org.jumpandwin.jumpandwin");
        assert_eq!(m.source.dir, PathBuf::from("."));
        assert_eq!(
            m.source.include_exts,
            vec!["py", "png", "jpg", "kv", "atlas", "wav", "ogg", "ttf", "json"]
        );
        assert_eq!(m.version, "1.0");
        assert_eq!(
            m.requirements,
            vec![
                Requirement::parse("python3"),
                Requirement {
                    name: "pygame".to_string(),
                    constraint: Some("==2.5.2".to_string())
                },
                Requirement::parse("psycopg2"),
            ]
        );
        assert_eq!(m.orientation, Orientation::Landscape);
        assert_eq!(m.icon, Some(PathBuf::from("./assets/icon.png")));
        assert_eq!(m.permissions, vec!["INTERNET", "ACCESS_NETWORK_STATE"]);
        assert_eq!(m.android.target_api, 33);
        assert_eq!(m.android.min_api, 21);
        assert_eq!(m.android.sdk, None);
        assert_eq!(m.android.ndk, "25b");
        assert_eq!(m.android.archs, vec!["arm64-v8a"]);
        assert_eq!(m.extra.get("p4a.branch").map(String::as_str), Some("master"));
        assert_eq!(m.build.log_level, 1);
        assert!(!m.build.warn_on_root);
        assert_eq!(m.build.bin_dir, PathBuf::from("./bin"));
    }

    #[test]
    fn absent_keys_fall_back_to_defaults() {
        let doc = Document::parse("[app]\ntitle = T\npackage.name = t\n").unwrap();
        let (m, defaulted) = BuildManifest::from_document(&doc, None).unwrap();
        assert_eq!(m.package.domain, DEFAULT_DOMAIN);
        assert_eq!(m.version, DEFAULT_VERSION);
        assert_eq!(m.source.include_exts, owned(DEFAULT_INCLUDE_EXTS));
        assert_eq!(m.android.archs, owned(DEFAULT_ARCHS));
        assert_eq!(m.orientation, Orientation::Portrait);
        assert_eq!(m.build, BuildSettings::default());
        assert_eq!(defaulted.keys, vec!["package.domain", "version"]);
    }

    #[test]
    fn missing_title_or_package_name_is_an_error() {
        let err = build("[app]\npackage.name = t\n").unwrap_err();
        assert!(matches!(
            err,
            ManifestError::MissingRequiredKey { ref key, .. } if key == "title"
        ));

        let err = build("[app]\ntitle = T\npackage.name =\n").unwrap_err();
        assert!(matches!(
            err,
            ManifestError::MissingRequiredKey { ref key, .. } if key == "package.name"
        ));

        let err = build("[buildozer]\nlog_level = 2\n").unwrap_err();
        assert!(matches!(err, ManifestError::MissingRequiredKey { .. }));
    }

    #[test]
    fn invalid_typed_values_name_the_key_and_line() {
        let err = build("[app]\ntitle = T\npackage.name = t\nandroid.api = thirty\n").unwrap_err();
        match err {
            ManifestError::InvalidValue { key, origin, .. } => {
                assert_eq!(key, "android.api");
                assert_eq!(origin, Origin::Line(4));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(build("[app]\ntitle = T\npackage.name = t\norientation = sideways\n").is_err());
        assert!(build("[app]\ntitle = T\npackage.name = t\nfullscreen = maybe\n").is_err());
        assert!(build("[app]\ntitle = T\npackage.name = t\n[buildozer]\nlog_level = 7\n").is_err());
    }

    #[test]
    fn list_sections_override_inline_lists() {
        let m = build(
            "[app]\ntitle = T\npackage.name = t\nrequirements = python3\n\n[app:requirements]\npython3\nkivy>=2.0\n",
        )
        .unwrap();
        assert_eq!(
            m.requirements.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
            vec!["python3", "kivy>=2.0"]
        );
    }

    #[test]
    fn requirement_tokens_split_name_and_constraint() {
        assert_eq!(Requirement::parse("kivy").constraint, None);
        let pinned = Requirement::parse("kivy == 2.1.0");
        assert_eq!(pinned.name, "kivy");
        assert_eq!(pinned.constraint.as_deref(), Some("== 2.1.0"));
        let url = Requirement::parse("git+https://github.com/kivy/kivy.git");
        assert_eq!(url.name, "git+https://github.com/kivy/kivy.git");
        assert_eq!(url.constraint, None);
    }

    #[test]
    fn serialized_manifest_parses_back_to_itself() {
        let m = build(GAME).unwrap();
        let text = m.serialize();
        assert!(!text.contains("%(source.dir)s"));
        assert_eq!(build(&text).unwrap(), m);
    }

    #[test]
    fn round_trip_escapes_percent_and_keeps_multiline_extras() {
        let mut m = build(GAME).unwrap();
        m.title = "100% Jump".to_string();
        m.extra
            .insert("android.gradle_dependencies".to_string(), "a:b:1,\nc:d:2".to_string());
        m.android.sdk = Some(20);
        m.presplash = Some(PathBuf::from("data/presplash.png"));
        m.fullscreen = true;
        m.source.exclude_dirs = vec!["tests".to_string(), "bin".to_string()];

        let text = m.serialize();
        assert!(text.contains("title = 100%% Jump"));
        assert_eq!(build(&text).unwrap(), m);
    }

    #[test]
    fn version_can_be_extracted_from_a_source_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.py"), "__version__ = '2.4.1'\n").unwrap();
        let doc = Document::parse(
            "[app]\ntitle = T\npackage.name = t\nversion.regex = __version__ = ['\"](.*)['\"]\nversion.filename = %(source.dir)s/main.py\nsource.dir = .\n",
        )
        .unwrap();

        let (m, defaulted) = BuildManifest::from_document(&doc, Some(dir.path())).unwrap();
        assert_eq!(m.version, "2.4.1");
        assert!(defaulted.keys.is_empty());

        assert!(BuildManifest::from_document(&doc, None).is_err());
    }

    #[test]
    fn resolves_relative_and_home_paths() {
        let base = Path::new("/work/game");
        assert_eq!(
            resolve_path(base, Path::new("./assets")),
            PathBuf::from("/work/game/./assets")
        );
        assert_eq!(resolve_path(base, Path::new("/abs")), PathBuf::from("/abs"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(resolve_path(base, Path::new("~/sdk")), home.join("sdk"));
        }
        assert_eq!(
            normalize(Path::new("./assets/./icon.png")),
            PathBuf::from("assets/icon.png")
        );
        assert_eq!(normalize(Path::new("game/../icon.png")), PathBuf::from("icon.png"));
        assert_eq!(normalize(Path::new("./../art/icon.png")), PathBuf::from("../art/icon.png"));
        assert_eq!(normalize(Path::new("/..")), PathBuf::from("/"));
    }

    #[test]
    fn rewrite_losses_are_named() {
        let doc = Document::parse(
            "[DEFAULT]\nroot = .\n\n[app]\ntitle = T\npackage.name = t\nsource.dir = %(root)s\nversion.regex = v=(.*)\nversion.filename = main.py\n\n[app:requirements]\nkivy\n\n[app:p4a.hook]\nhook.py\n\n[app@demo]\ntitle = Demo\n\n[app:requirements@demo]\npygame\n\n[buildozer]\nlog_level = 1\nbin_dir = %(build_dir)s/bin\nbuild_dir = .build\nspam = 1\n",
        )
        .unwrap();
        assert_eq!(
            lost_on_rewrite(&doc),
            vec![
                "[DEFAULT] section",
                "[app] source.dir placeholder (written resolved)",
                "[app] version.regex (written as a fixed version)",
                "[app] version.filename (written as a fixed version)",
                "[app@demo] section",
                "[app:requirements@demo] section",
                "[buildozer] bin_dir placeholder (written resolved)",
                "[buildozer] spam",
            ]
        );

        let canonical = build(GAME).unwrap().serialize();
        assert!(lost_on_rewrite(&Document::parse(&canonical).unwrap()).is_empty());
    }

    #[test]
    fn requirements_are_deduplicated_by_name_and_constraint() {
        let m = build("[app]\ntitle = T\npackage.name = t\nrequirements = kivy==2.1, kivy ==2.1,python3\n").unwrap();
        assert_eq!(
            m.requirements.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
            vec!["kivy==2.1", "python3"]
        );
        assert_eq!(build(&m.serialize()).unwrap(), m);
    }

    #[test]
    fn list_sections_without_a_field_are_kept_as_extras() {
        let doc = Document::parse(
            "[app]\ntitle = T\npackage.name = t\np4a.hook = old\n\n[app:P4A.Hook]\nhooks/a.py\nhooks/b.py\n\n[app:a=b]\nx\n",
        )
        .unwrap();
        let (m, defaulted) = BuildManifest::from_document(&doc, None).unwrap();
        assert_eq!(m.extra.get("p4a.hook").map(String::as_str), Some("hooks/a.py,hooks/b.py"));
        assert_eq!(defaulted.ignored, vec!["app:a=b"]);
        assert_eq!(build(&m.serialize()).unwrap(), m);
    }
}

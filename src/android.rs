//! Android platform values referenced by the manifest, and detection of the
//! locally installed SDK and NDK.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// ABIs accepted by `android.archs`.
pub const KNOWN_ARCHS: &[&str] = &["arm64-v8a", "armeabi-v7a", "x86", "x86_64"];

/// Lowest API level the packager toolchain supports.
pub const MIN_SUPPORTED_API: u32 = 21;

/// Target API level required for store uploads.
pub const STORE_TARGET_API: u32 = 33;

/// Prefixes a bare permission name with `android.permission.`.
///
/// Names that already contain a dot (`com.google.android.c2dm.permission.RECEIVE`)
/// are returned unchanged.
pub fn qualified_permission(name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("android.permission.{}", name)
    }
}

static NDK_RELEASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^r?(\d+)([a-z]?)$").expect("NDK release regex is valid")
});
static NDK_REVISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.(\d+)(?:\.\d+)*$").expect("NDK revision regex is valid")
});

/// An NDK version as written in `android.ndk`.
///
/// Release names (`25b`) map onto revisions: the letter is the minor
/// version, so `25b` is `25.1.x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NdkVersion {
    pub major: u32,
    pub minor: u32,
}

impl NdkVersion {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(caps) = NDK_RELEASE.captures(text) {
            let major = caps[1].parse().ok()?;
            let minor = caps[2]
                .bytes()
                .next()
                .map_or(0, |letter| u32::from(letter - b'a'));
            return Some(Self { major, minor });
        }
        let caps = NDK_REVISION.captures(text)?;
        Some(Self {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
        })
    }

    /// True when an installed NDK directory name (`25.1.8937393`) is this
    /// version.
    pub fn matches_install(&self, dir_name: &str) -> bool {
        NDK_REVISION
            .captures(dir_name)
            .and_then(|caps| Some((caps[1].parse::<u32>().ok()?, caps[2].parse::<u32>().ok()?)))
            .is_some_and(|(major, minor)| major == self.major && minor == self.minor)
    }
}

impl fmt::Display for NdkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match char::from_u32(u32::from('a') + self.minor) {
            Some(letter) if self.minor > 0 && self.minor < 26 => write!(f, "r{}{}", self.major, letter),
            _ => write!(f, "r{}", self.major),
        }
    }
}

/// Detects Android SDK location from environment variables or common paths.
pub fn detect_android_sdk() -> Option<PathBuf> {
    let mut sdk_paths: Vec<PathBuf> = Vec::new();

    // Check environment variables first
    for var in ["ANDROID_SDK_ROOT", "ANDROID_HOME"] {
        if let Ok(path) = env::var(var) {
            if !path.is_empty() {
                sdk_paths.push(PathBuf::from(path));
            }
        }
    }

    // Check common default locations
    if let Some(home) = dirs::home_dir() {
        let default = match env::consts::OS {
            "windows" => home.join("AppData").join("Local").join("Android").join("Sdk"),
            "macos" => home.join("Library").join("Android").join("sdk"),
            _ => home.join("Android").join("Sdk"),
        };
        sdk_paths.push(default);
    }

    sdk_paths.into_iter().find(|p| p.exists())
}

/// Lists installed NDKs: `ANDROID_NDK_HOME` plus every `ndk/<revision>`
/// directory of the SDK.
pub fn installed_ndks(sdk: Option<&Path>) -> Vec<PathBuf> {
    let mut found = Vec::new();

    if let Ok(ndk_home) = env::var("ANDROID_NDK_HOME") {
        let path = PathBuf::from(ndk_home);
        if path.exists() {
            found.push(path);
        }
    }

    if let Some(sdk) = sdk {
        let ndk_bundle = sdk.join("ndk-bundle");
        if ndk_bundle.exists() {
            found.push(ndk_bundle);
        }
        if let Ok(entries) = fs::read_dir(sdk.join("ndk")) {
            let mut versions: Vec<PathBuf> = entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .collect();
            versions.sort();
            found.extend(versions);
        }
    }

    found
}

/// Installed platform directory for an API level, if present.
pub fn installed_platform(sdk: &Path, api: u32) -> Option<PathBuf> {
    let platform = sdk.join("platforms").join(format!("android-{}", api));
    platform.exists().then_some(platform)
}

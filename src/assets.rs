//! Discovery of the files a packager would bundle from `source.dir`.

use std::path::{Path, PathBuf};

use glob::Pattern;
use serde::Serialize;
use walkdir::{DirEntry, WalkDir};

use crate::error::{ManifestError, Result};
use crate::manifest::{BuildManifest, SourceSpec, normalize, resolve_path};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Asset {
    /// Path relative to the source root.
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetSet {
    pub root: PathBuf,
    pub assets: Vec<Asset>,
}

impl AssetSet {
    pub fn total_size(&self) -> u64 {
        self.assets.iter().map(|a| a.size).sum()
    }
}

/// Compiled include/exclude rules of a [`SourceSpec`].
#[derive(Debug, Clone)]
pub struct AssetFilter {
    include_exts: Vec<String>,
    exclude_exts: Vec<String>,
    exclude_dirs: Vec<PathBuf>,
    include_patterns: Vec<Pattern>,
    exclude_patterns: Vec<Pattern>,
}

fn normalize_ext(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}

fn compile(key: &str, patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|err| ManifestError::Pattern {
                key: key.to_string(),
                pattern: pattern.clone(),
                reason: err.msg.to_string(),
            })
        })
        .collect()
}

/// Relative path with `/` separators, as patterns are written.
fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl AssetFilter {
    pub fn new(source: &SourceSpec) -> Result<Self> {
        Ok(Self {
            include_exts: source.include_exts.iter().map(|e| normalize_ext(e)).collect(),
            exclude_exts: source.exclude_exts.iter().map(|e| normalize_ext(e)).collect(),
            exclude_dirs: source
                .exclude_dirs
                .iter()
                .map(|d| normalize(Path::new(d.trim_end_matches('/'))))
                .filter(|d| !d.as_os_str().is_empty())
                .collect(),
            include_patterns: compile("source.include_patterns", &source.include_patterns)?,
            exclude_patterns: compile("source.exclude_patterns", &source.exclude_patterns)?,
        })
    }

    /// True when the directory at `relative` should not be descended into.
    pub fn prunes_dir(&self, relative: &Path) -> bool {
        self.exclude_dirs.iter().any(|dir| relative.starts_with(dir))
    }

    /// True when the file at `relative` is bundled.
    pub fn accepts(&self, relative: &Path) -> bool {
        let slashed = slash_path(relative);
        let ext = relative
            .extension()
            .map(|e| normalize_ext(&e.to_string_lossy()));

        let included = ext.as_ref().is_some_and(|e| self.include_exts.contains(e))
            || self.include_patterns.iter().any(|p| p.matches(&slashed));
        if !included {
            return false;
        }

        let excluded = ext.as_ref().is_some_and(|e| self.exclude_exts.contains(e))
            || self.exclude_patterns.iter().any(|p| p.matches(&slashed));
        !excluded
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Walks the source root of `manifest` and returns the bundled files,
/// sorted by path.
pub fn discover(manifest: &BuildManifest, base_dir: &Path) -> Result<AssetSet> {
    let root = resolve_path(base_dir, &manifest.source.dir);
    if !root.is_dir() {
        return Err(ManifestError::SourceDirMissing(root));
    }
    let filter = AssetFilter::new(&manifest.source)?;

    let mut assets = Vec::new();
    let walker = WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if is_hidden(entry) {
                return false;
            }
            if entry.file_type().is_dir() {
                if let Ok(relative) = entry.path().strip_prefix(&root) {
                    return !filter.prunes_dir(relative);
                }
            }
            true
        });

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&root) else {
            continue;
        };
        if filter.accepts(relative) {
            assets.push(Asset {
                path: relative.to_path_buf(),
                size: entry.metadata()?.len(),
            });
        }
    }

    Ok(AssetSet { root, assets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use std::fs;

    fn manifest(source: &str) -> BuildManifest {
        let text = format!("[app]\ntitle = T\npackage.name = game\n{}", source);
        let doc = Document::parse(&text).unwrap();
        BuildManifest::from_document(&doc, None).unwrap().0
    }

    fn touch(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn paths(set: &AssetSet) -> Vec<String> {
        set.assets.iter().map(|a| slash_path(&a.path)).collect()
    }

    #[test]
    fn bundles_included_extensions_and_skips_hidden_entries() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "main.py", "print('jump')");
        touch(dir.path(), "assets/Icon.PNG", "png");
        touch(dir.path(), "assets/theme.ogg", "ogg");
        touch(dir.path(), "README.md", "docs");
        touch(dir.path(), ".buildozer/cache.py", "");
        touch(dir.path(), "assets/.hidden.png", "");

        let m = manifest("source.include_exts = py,.png\n");
        let set = discover(&m, dir.path()).unwrap();
        assert_eq!(paths(&set), vec!["assets/Icon.PNG", "main.py"]);
        assert_eq!(set.total_size(), 16);
    }

    #[test]
    fn exclusions_and_include_patterns_apply() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "src/main.py", "");
        touch(dir.path(), "src/config.py", "");
        touch(dir.path(), "src/tests/test_main.py", "");
        touch(dir.path(), "src/bin/old.py", "");
        touch(dir.path(), "src/fonts/game.ttf", "");
        touch(dir.path(), "src/LICENSE", "");
        touch(dir.path(), "src/data/scores.json", "");
        touch(dir.path(), "src/data/secret.json", "");

        let m = manifest(
            "source.dir = src\nsource.include_exts = py,json\nsource.include_patterns = fonts/*,LICENSE\nsource.exclude_dirs = tests, bin/\nsource.exclude_patterns = data/secret.*\nsource.exclude_exts = pyc\n",
        );
        let set = discover(&m, dir.path()).unwrap();
        assert_eq!(set.root, dir.path().join("src"));
        assert_eq!(
            paths(&set),
            vec![
                "LICENSE",
                "config.py",
                "data/scores.json",
                "fonts/game.ttf",
                "main.py"
            ]
        );
    }

    #[test]
    fn exclude_exts_win_over_include_exts() {
        let m = manifest("source.include_exts = py,png\nsource.exclude_exts = png\n");
        let filter = AssetFilter::new(&m.source).unwrap();
        assert!(filter.accepts(Path::new("main.py")));
        assert!(!filter.accepts(Path::new("icon.png")));
        assert!(!filter.accepts(Path::new("Makefile")));
    }

    #[test]
    fn missing_source_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let m = manifest("source.dir = nowhere\n");
        assert!(matches!(
            discover(&m, dir.path()).unwrap_err(),
            ManifestError::SourceDirMissing(_)
        ));
    }

    #[test]
    fn invalid_patterns_are_reported() {
        let m = manifest("source.include_patterns = [\n");
        assert!(matches!(
            AssetFilter::new(&m.source).unwrap_err(),
            ManifestError::Pattern { .. }
        ));
    }
}

//! Build script for droidspec
//!
//! Sets up recompilation triggers for the template directory so that
//! edits to the bundled default manifest rebuild the CLI.

use std::path::Path;
use walkdir::WalkDir;

/// Editor and OS leftovers that never belong in the bundled template
const EXCLUDE_PATTERNS: &[&str] = &[".DS_Store", "*.swp", "*~"];

fn should_exclude(path: &Path) -> bool {
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        for pattern in EXCLUDE_PATTERNS {
            if let Some(suffix) = pattern.strip_prefix('*') {
                if name.ends_with(suffix) {
                    return true;
                }
            } else if name == *pattern {
                return true;
            }
        }
    }
    false
}

fn main() {
    let template_dir = Path::new("template");

    if template_dir.exists() {
        println!("cargo:rerun-if-changed=template");

        for entry in WalkDir::new(template_dir)
            .into_iter()
            .filter_entry(|e| !should_exclude(e.path()))
            .flatten()
        {
            if entry.file_type().is_file() {
                println!("cargo:rerun-if-changed={}", entry.path().display());
            }
        }
    }
}

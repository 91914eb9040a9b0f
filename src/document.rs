//! Lexical layer of the manifest format.
//!
//! A document is a list of `[section]` blocks holding `key = value` entries.
//! Two section name forms carry extra meaning:
//!
//! * `[app:requirements]` is a *list section*: every line is one raw token of
//!   the `requirements` list of `[app]`.
//! * `[app@demo]` (or `[app@demo,full]`) is a *profile section*: its entries
//!   override `[app]` when the `demo` profile is selected.
//!
//! Nothing here interprets values; see [`crate::interpolate`] and
//! [`crate::manifest`] for that.

use std::collections::HashMap;

use crate::error::{ManifestError, Origin, Result};

/// Section consulted when a key is missing from the requested section.
pub const DEFAULT_SECTION: &str = "DEFAULT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Lowercased key, or the raw token for list sections.
    pub key: String,
    /// `None` for list section tokens.
    pub value: Option<String>,
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub line: usize,
    pub entries: Vec<Entry>,
}

impl Section {
    fn new(name: impl Into<String>, line: usize) -> Self {
        Self {
            name: name.into(),
            line,
            entries: Vec::new(),
        }
    }

    /// True for `[section:key]` list sections.
    pub fn is_list(&self) -> bool {
        base_name(&self.name).contains(':')
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// Replaces the value of `key`, or appends a new entry.
    fn upsert(&mut self, entry: Entry) {
        match self.entries.iter_mut().find(|e| e.key == entry.key) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    sections: Vec<Section>,
}

/// Strips the `@profile` suffix from a section name.
fn base_name(name: &str) -> &str {
    name.split_once('@').map_or(name, |(base, _)| base)
}

impl Document {
    /// Parses manifest text into sections and entries.
    pub fn parse(text: &str) -> Result<Self> {
        let mut doc = Document::default();
        // Index of the entry a continuation line would extend.
        let mut open_entry: Option<usize> = None;

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim_end_matches('\r');
            let trimmed = line.trim();

            if trimmed.is_empty() {
                open_entry = None;
                continue;
            }
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            let indented = line.starts_with(|c: char| c.is_whitespace());
            if indented {
                if let (Some(entry_idx), Some(section)) = (open_entry, doc.sections.last_mut()) {
                    if let Some(value) = section.entries[entry_idx].value.as_mut() {
                        if !value.is_empty() {
                            value.push('\n');
                        }
                        value.push_str(trimmed);
                        continue;
                    }
                }
            }

            if trimmed.starts_with('[') {
                open_entry = None;
                let name = trimmed
                    .strip_prefix('[')
                    .and_then(|rest| rest.strip_suffix(']'))
                    .map(str::trim)
                    .ok_or_else(|| ManifestError::Parse {
                        line: line_no,
                        message: format!("malformed section header {:?}", trimmed),
                    })?;
                if name.is_empty() {
                    return Err(ManifestError::Parse {
                        line: line_no,
                        message: "empty section name".to_string(),
                    });
                }
                if let Some(previous) = doc.section(name) {
                    return Err(ManifestError::Parse {
                        line: line_no,
                        message: format!(
                            "section [{}] already defined on line {}",
                            name, previous.line
                        ),
                    });
                }
                doc.sections.push(Section::new(name, line_no));
                continue;
            }

            let Some(section) = doc.sections.last_mut() else {
                return Err(ManifestError::Parse {
                    line: line_no,
                    message: "key outside of any section; add a section header such as [app]"
                        .to_string(),
                });
            };

            if section.is_list() {
                section.entries.push(Entry {
                    key: trimmed.to_string(),
                    value: None,
                    origin: Origin::Line(line_no),
                });
                open_entry = None;
                continue;
            }

            let split_at = trimmed.find(['=', ':']).ok_or_else(|| ManifestError::Parse {
                line: line_no,
                message: format!("expected `key = value`, found {:?}", trimmed),
            })?;
            let key = trimmed[..split_at].trim().to_lowercase();
            let value = trimmed[split_at + 1..].trim().to_string();
            if key.is_empty() {
                return Err(ManifestError::Parse {
                    line: line_no,
                    message: "missing key before separator".to_string(),
                });
            }
            if let Some(Entry {
                origin: Origin::Line(previous),
                ..
            }) = section.get(&key)
            {
                return Err(ManifestError::Parse {
                    line: line_no,
                    message: format!(
                        "duplicate key \"{}\" in [{}] (first set on line {})",
                        key, section.name, previous
                    ),
                });
            }
            section.entries.push(Entry {
                key,
                value: Some(value),
                origin: Origin::Line(line_no),
            });
            open_entry = Some(section.entries.len() - 1);
        }

        Ok(doc)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    fn section_mut_or_insert(&mut self, name: &str, line: usize) -> &mut Section {
        let idx = match self.sections.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                self.sections.push(Section::new(name, line));
                self.sections.len() - 1
            }
        };
        &mut self.sections[idx]
    }

    /// Looks up `key` in `section`, falling back to `[DEFAULT]`.
    pub fn lookup(&self, section: &str, key: &str) -> Option<&Entry> {
        self.section(section)
            .and_then(|s| s.get(key))
            .or_else(|| self.section(DEFAULT_SECTION).and_then(|s| s.get(key)))
    }

    /// Raw tokens of the `[section:key]` list section, if it exists.
    pub fn list_section(&self, section: &str, key: &str) -> Option<Vec<&str>> {
        let name = format!("{}:{}", section, key);
        self.section(&name)
            .map(|s| s.entries.iter().map(|e| e.key.as_str()).collect())
    }

    /// Merges every section tagged with `profile` into its base section.
    ///
    /// Returns the names of the sections that were applied. List sections
    /// are replaced as a whole rather than merged token by token.
    pub fn apply_profile(&mut self, profile: &str) -> Vec<String> {
        let selected: Vec<Section> = self
            .sections
            .iter()
            .filter(|s| {
                s.name.split_once('@').is_some_and(|(_, profiles)| {
                    profiles.split(',').any(|p| p.trim() == profile)
                })
            })
            .cloned()
            .collect();

        let mut applied = Vec::with_capacity(selected.len());
        for overlay in selected {
            let base = base_name(&overlay.name).to_string();
            let target = self.section_mut_or_insert(&base, overlay.line);
            if target.is_list() {
                target.entries = overlay.entries;
            } else {
                for entry in overlay.entries {
                    target.upsert(entry);
                }
            }
            applied.push(overlay.name);
        }
        applied
    }

    /// Applies `SECTION_KEY` environment overrides to `section`.
    ///
    /// An override replaces both the inline value and a `[section:key]` list
    /// section. Candidate keys are the keys already present plus `known_keys`; the
    /// variable name is the upper-cased section, an underscore, and the
    /// upper-cased key with dots replaced by underscores. Returns the names
    /// of the variables that took effect.
    pub fn apply_env_overrides(
        &mut self,
        section: &str,
        known_keys: &[&str],
        env: &HashMap<String, String>,
    ) -> Vec<String> {
        let mut candidates: Vec<String> = self
            .section(section)
            .map(|s| s.entries.iter().map(|e| e.key.clone()).collect())
            .unwrap_or_default();
        for key in known_keys {
            if !candidates.iter().any(|c| c == key) {
                candidates.push((*key).to_string());
            }
        }

        let mut applied = Vec::new();
        for key in candidates {
            let var = env_var_name(section, &key);
            if let Some(value) = env.get(&var) {
                // The inline value replaces any `[section:key]` list form.
                let list_name = format!("{}:{}", section, key);
                self.sections.retain(|s| s.name != list_name);
                let target = self.section_mut_or_insert(section, 0);
                target.upsert(Entry {
                    key,
                    value: Some(fold_lines(value)),
                    origin: Origin::Env(var.clone()),
                });
                applied.push(var);
            }
        }
        applied
    }
}

/// Environment variable that overrides `key` in `section`.
pub fn env_var_name(section: &str, key: &str) -> String {
    format!(
        "{}_{}",
        section.to_uppercase(),
        key.to_uppercase().replace('.', "_")
    )
}

/// Shapes an environment value like a value read from the file: lines are
/// trimmed, blank lines dropped, and continuation lines that would read as
/// comments are skipped.
fn fold_lines(value: &str) -> String {
    let mut lines = value.lines().map(str::trim).filter(|l| !l.is_empty());
    let mut out = lines.next().unwrap_or_default().to_string();
    for line in lines.filter(|l| !l.starts_with(['#', ';'])) {
        out.push('\n');
        out.push_str(line);
    }
    out
}

/// Splits a comma-separated value into trimmed, non-empty tokens, keeping
/// the first occurrence of each.
pub fn split_list<'a, I>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out: Vec<String> = Vec::new();
    for value in values {
        for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if !out.iter().any(|t| t == token) {
                out.push(token.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value<'a>(doc: &'a Document, section: &str, key: &str) -> Option<&'a str> {
        doc.lookup(section, key).and_then(|e| e.value.as_deref())
    }

    #[test]
    fn parses_sections_keys_and_comments() {
        let doc = Document::parse(
            "# leading comment\n[app]\nTitle = Jump And Win\n; another comment\npackage.name: jumpandwin\n\n[buildozer]\nlog_level = 2\n",
        )
        .unwrap();

        assert_eq!(doc.sections().len(), 2);
        assert_eq!(value(&doc, "app", "title"), Some("Jump And Win"));
        assert_eq!(value(&doc, "app", "package.name"), Some("jumpandwin"));
        assert_eq!(value(&doc, "buildozer", "log_level"), Some("2"));
        assert_eq!(doc.lookup("app", "title").unwrap().origin, Origin::Line(3));
    }

    #[test]
    fn first_separator_splits_key_from_value() {
        let doc = Document::parse("[app]\nrequirements = python3,kivy==2.1.0\nsource.dir: C:\\game\n").unwrap();
        assert_eq!(value(&doc, "app", "requirements"), Some("python3,kivy==2.1.0"));
        assert_eq!(value(&doc, "app", "source.dir"), Some("C:\\game"));
    }

    #[test]
    fn indented_lines_continue_the_previous_value() {
        let doc = Document::parse("[app]\nrequirements = python3,\n    kivy,\n    pygame\n\n  title = X\n").unwrap();
        assert_eq!(
            value(&doc, "app", "requirements"),
            Some("python3,\nkivy,\npygame")
        );
        // A blank line closes the continuation, so the indented key is a key.
        assert_eq!(value(&doc, "app", "title"), Some("X"));
    }

    #[test]
    fn key_outside_section_is_rejected() {
        let err = Document::parse("title = nope\n[app]\n").unwrap_err();
        assert!(matches!(err, ManifestError::Parse { line: 1, .. }));
    }

    #[test]
    fn duplicate_keys_and_sections_are_rejected() {
        let err = Document::parse("[app]\ntitle = a\nTITLE = b\n").unwrap_err();
        assert!(matches!(err, ManifestError::Parse { line: 3, .. }));

        let err = Document::parse("[app]\n[buildozer]\n[app]\n").unwrap_err();
        assert!(matches!(err, ManifestError::Parse { line: 3, .. }));
    }

    #[test]
    fn malformed_lines_are_rejected() {
        let err = Document::parse("[app\n").unwrap_err();
        assert!(matches!(err, ManifestError::Parse { line: 1, .. }));

        let err = Document::parse("[app]\njust some words\n").unwrap_err();
        assert!(matches!(err, ManifestError::Parse { line: 2, .. }));

        let err = Document::parse("[app]\n= value\n").unwrap_err();
        assert!(matches!(err, ManifestError::Parse { line: 2, .. }));
    }

    #[test]
    fn list_sections_keep_raw_lines() {
        let doc = Document::parse("[app:requirements]\npython3\nKivy==2.1.0\n# skipped\n").unwrap();
        assert_eq!(
            doc.list_section("app", "requirements"),
            Some(vec!["python3", "Kivy==2.1.0"])
        );
        assert_eq!(doc.list_section("app", "android.permissions"), None);
    }

    #[test]
    fn default_section_backs_lookups() {
        let doc = Document::parse("[DEFAULT]\nroot = /srv\n[app]\ntitle = T\n").unwrap();
        assert_eq!(value(&doc, "app", "root"), Some("/srv"));
        assert_eq!(value(&doc, "app", "missing"), None);
    }

    #[test]
    fn profile_overrides_base_section() {
        let mut doc = Document::parse(
            "[app]\ntitle = Game\nversion = 1.0\n\n[app:requirements]\npython3\n\n[app@demo,full]\ntitle = Game Demo\n\n[app:requirements@demo]\npython3\npygame\n\n[app@other]\ntitle = Other\n",
        )
        .unwrap();

        let applied = doc.apply_profile("demo");
        assert_eq!(applied, vec!["app@demo,full", "app:requirements@demo"]);
        assert_eq!(value(&doc, "app", "title"), Some("Game Demo"));
        assert_eq!(value(&doc, "app", "version"), Some("1.0"));
        assert_eq!(
            doc.list_section("app", "requirements"),
            Some(vec!["python3", "pygame"])
        );
    }

    #[test]
    fn unknown_profile_changes_nothing() {
        let mut doc = Document::parse("[app]\ntitle = Game\n[app@demo]\ntitle = Demo\n").unwrap();
        assert!(doc.apply_profile("release").is_empty());
        assert_eq!(value(&doc, "app", "title"), Some("Game"));
    }

    #[test]
    fn environment_overrides_known_and_present_keys() {
        let mut doc = Document::parse("[app]\ntitle = Game\ncustom.key = a\n").unwrap();
        let env: HashMap<String, String> = [
            ("APP_TITLE", "From Env"),
            ("APP_ANDROID_API", " 34 "),
            ("APP_CUSTOM_KEY", "b"),
            ("APP_UNRELATED", "ignored"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mut applied = doc.apply_env_overrides("app", &["title", "android.api"], &env);
        applied.sort();
        assert_eq!(applied, vec!["APP_ANDROID_API", "APP_CUSTOM_KEY", "APP_TITLE"]);
        assert_eq!(value(&doc, "app", "title"), Some("From Env"));
        assert_eq!(value(&doc, "app", "android.api"), Some("34"));
        assert_eq!(value(&doc, "app", "custom.key"), Some("b"));
        assert_eq!(
            doc.lookup("app", "title").unwrap().origin,
            Origin::Env("APP_TITLE".to_string())
        );
    }

    #[test]
    fn environment_replaces_list_sections() {
        let mut doc = Document::parse("[app]\ntitle = Game\n\n[app:requirements]\npython3\nkivy\n").unwrap();
        let env = HashMap::from([("APP_REQUIREMENTS".to_string(), "python3,pygame".to_string())]);

        let applied = doc.apply_env_overrides("app", &["requirements"], &env);
        assert_eq!(applied, vec!["APP_REQUIREMENTS"]);
        assert!(doc.list_section("app", "requirements").is_none());
        assert_eq!(value(&doc, "app", "requirements"), Some("python3,pygame"));
    }

    #[test]
    fn environment_values_are_shaped_like_file_values() {
        let mut doc = Document::parse("[app]\ntitle = Game\n").unwrap();
        let env = HashMap::from([(
            "APP_P4A_HOOK".to_string(),
            "  first \n\n   second\n# note\n third  ".to_string(),
        )]);
        doc.apply_env_overrides("app", &["p4a.hook"], &env);
        assert_eq!(value(&doc, "app", "p4a.hook"), Some("first\nsecond\nthird"));
    }

    #[test]
    fn env_var_names_replace_dots() {
        assert_eq!(env_var_name("app", "package.name"), "APP_PACKAGE_NAME");
        assert_eq!(env_var_name("buildozer", "bin_dir"), "BUILDOZER_BIN_DIR");
    }

    #[test]
    fn split_list_trims_and_deduplicates() {
        assert_eq!(
            split_list([" py , png,,jpg ,py\n, kv"]),
            vec!["py", "png", "jpg", "kv"]
        );
        assert!(split_list([" , ,"]).is_empty());
    }
}

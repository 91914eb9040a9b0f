//! Property tests: any manifest the parser accepts serializes to text that
//! parses back to the same manifest.

use droidspec::parse;
use proptest::prelude::*;

/// `kivy`, ` kivy ==2.1`, `numpy>=1.0` ... with stray whitespace around the
/// token and between name and constraint.
fn requirement_token() -> impl Strategy<Value = String> {
    (
        " {0,2}",
        prop::sample::select(vec!["kivy", "pygame", "numpy", "python3"]),
        " {0,2}",
        prop::option::of("(==|>=|<|~=)[0-9]\\.[0-9]"),
    )
        .prop_map(|(lead, name, gap, constraint)| match constraint {
            Some(constraint) => format!("{}{}{}{}", lead, name, gap, constraint),
            None => format!("{}{}{}", lead, name, gap),
        })
}

/// One line of a free-form value: internal spaces and escaped percents.
fn value_line() -> impl Strategy<Value = String> {
    "[a-z](%%|[a-z0-9 ]){0,8}[a-z0-9]"
}

/// Values of keys without a dedicated field, one to three lines long.
fn extras() -> impl Strategy<Value = Vec<(String, Vec<String>)>> {
    prop::collection::btree_map("x[a-z]{1,4}\\.[a-z]{1,4}", prop::collection::vec(value_line(), 1..4), 0..3)
        .prop_map(|map| map.into_iter().collect())
}

prop_compose! {
    fn manifest_text()(
        title in "[A-Za-z][A-Za-z0-9 ]{0,12}( 100%%)?",
        name in "[a-z_][a-z0-9_]{0,8}",
        source_dir in prop::sample::select(vec![".", "src", "game/app"]),
        exts in prop::collection::vec("[a-z]{1,4}", 1..5),
        requirements in prop::collection::vec(requirement_token(), 0..6),
        permissions in prop::collection::vec(" ?[A-Z_]{1,10} ?", 0..4),
        orientation in prop::sample::select(vec!["portrait", "landscape", "all", "portrait-reverse"]),
        fullscreen in any::<bool>(),
        icon in prop::option::of("[a-z]{1,6}"),
        apis in (21u32..=30, 0u32..=4),
        extras in extras(),
    ) -> String {
        let (min_api, delta) = apis;
        let mut text = format!(
            "[app]\ntitle = {}\npackage.name = {}\nsource.dir = {}\nsource.include_exts = {}\n",
            title, name, source_dir, exts.join(" , ")
        );
        if !requirements.is_empty() {
            text.push_str(&format!("requirements = {}\n", requirements.join(",")));
        }
        if !permissions.is_empty() {
            text.push_str(&format!("android.permissions = {}\n", permissions.join(",")));
        }
        text.push_str(&format!("orientation = {}\nfullscreen = {}\n", orientation, u8::from(fullscreen)));
        if let Some(icon) = icon {
            text.push_str(&format!("icon.filename = %(source.dir)s/data/{}.png\n", icon));
        }
        text.push_str(&format!("android.minapi = {}\nandroid.api = {}\n", min_api, min_api + delta));
        for (key, lines) in extras {
            text.push_str(&format!("{} = {}\n", key, lines.join("\n    ")));
        }
        text
    }
}

proptest! {
    #[test]
    fn serialized_manifests_parse_back_unchanged(text in manifest_text()) {
        let manifest = parse(&text).unwrap();
        let serialized = manifest.serialize();
        let reparsed = parse(&serialized).unwrap();
        prop_assert_eq!(&reparsed, &manifest);
        prop_assert_eq!(reparsed.serialize(), serialized);
    }

    #[test]
    fn accepted_manifests_keep_min_api_within_target(text in manifest_text()) {
        let manifest = parse(&text).unwrap();
        prop_assert!(manifest.android.min_api <= manifest.android.target_api);
        prop_assert!(!manifest.serialize().contains("%(source.dir)s"));
    }
}

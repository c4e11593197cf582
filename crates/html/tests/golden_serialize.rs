//! Golden parse/serialize cases loaded from `tests/fixtures/*.toml`.
//!
//! Each case parses `input`, serializes it, compares against `expected`, and
//! then checks that re-parsing `expected` yields a structurally equal tree.

use std::fs;
use std::path::PathBuf;

use html::dom_snapshot::{DomSnapshotOptions, assert_dom_eq};
use html::{ParseLimits, parse_document, parse_fragment, serialize_document};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Fixture {
    case: Vec<Case>,
}

#[derive(Debug, Deserialize)]
struct Case {
    name: String,
    input: String,
    expected: String,
    #[serde(default)]
    fragment: bool,
}

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

fn load_cases() -> Vec<(String, Case)> {
    let mut files: Vec<PathBuf> = fs::read_dir(fixture_dir())
        .expect("fixture dir")
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    files.sort();
    let mut cases = Vec::new();
    for file in files {
        let text = fs::read_to_string(&file).expect("read fixture");
        let fixture: Fixture = toml::from_str(&text)
            .unwrap_or_else(|err| panic!("invalid fixture {}: {err}", file.display()));
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        cases.extend(fixture.case.into_iter().map(|c| (stem.clone(), c)));
    }
    cases
}

#[test]
fn golden_serialization_cases() {
    let limits = ParseLimits::default();
    let cases = load_cases();
    assert!(!cases.is_empty(), "no fixtures found in {}", fixture_dir().display());

    for (file, case) in cases {
        let parse = |markup: &str| {
            if case.fragment {
                parse_fragment(markup, &limits)
            } else {
                parse_document(markup, &limits)
            }
        };
        let doc = parse(&case.input)
            .unwrap_or_else(|err| panic!("{file}::{} failed to parse: {err}", case.name));
        let actual = serialize_document(&doc);
        assert_eq!(actual, case.expected, "{file}::{}", case.name);

        let reparsed = parse(&case.expected)
            .unwrap_or_else(|err| panic!("{file}::{} expected does not parse: {err}", case.name));
        assert_dom_eq(&doc, &reparsed, DomSnapshotOptions::default());
    }
}

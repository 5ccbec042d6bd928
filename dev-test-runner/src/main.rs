//! Fixture runner: every `fixtures/<case>/schema.json` with its optional
//! `ui.json` and `data.json` is validated and mapped, then compared with
//! `expect.json`. An optional argument filters cases by regex.
use std::path::{Path as FsPath, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use schema_forms::presets::{BuiltinPresets, PresetLoader, SpecificationField};
use schema_forms::{parse_hints, validate, Data, FieldMapper, FieldNode, FieldRegistry, Path};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Expect {
    #[serde(default)]
    errors: Vec<ExpectedError>,
    #[serde(default)]
    kinds: IndexMap<String, Value>,
    #[serde(default)]
    labels: IndexMap<String, Vec<String>>,
    #[serde(default)]
    disabled: Vec<String>,
    #[serde(default)]
    readonly: Vec<String>,
}

#[derive(Debug, Deserialize, PartialEq)]
struct ExpectedError {
    path: String,
    keyword: String,
}

fn main() -> ExitCode {
    let filter = match std::env::args().nth(1).map(|f| Regex::new(&f)).transpose() {
        Ok(filter) => filter,
        Err(error) => {
            eprintln!("{} {error}", "bad filter:".red());
            return ExitCode::from(2);
        }
    };
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures");
    let pattern = format!("{}/*/schema.json", root.display());
    let cases: Vec<PathBuf> = match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(Result::ok).collect(),
        Err(error) => {
            eprintln!("{} {error}", "bad fixture pattern:".red());
            return ExitCode::from(2);
        }
    };

    let (mut passed, mut failed) = (0, 0);
    for schema_path in cases {
        let Some(dir) = schema_path.parent() else { continue };
        let name = dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        if filter.as_ref().is_some_and(|re| !re.is_match(&name)) {
            continue;
        }
        match run_case(dir) {
            Ok(()) => {
                passed += 1;
                println!("{} {name}", "✅".green());
            }
            Err(problems) => {
                failed += 1;
                println!("{} {}", "❌".red(), name.bold());
                for problem in problems {
                    println!("    {}", problem.red());
                }
            }
        }
    }
    let summary = format!("{passed} passed, {failed} failed");
    if failed == 0 {
        println!("{}", summary.green().bold());
        ExitCode::SUCCESS
    } else {
        println!("{}", summary.red().bold());
        ExitCode::from(1)
    }
}

fn read_optional(path: &FsPath) -> Result<String, Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(error) => Err(vec![format!("{}: {error}", path.display())]),
    }
}

fn run_case(dir: &FsPath) -> Result<(), Vec<String>> {
    let schema_text = read_optional(&dir.join("schema.json"))?;
    let ui_text = read_optional(&dir.join("ui.json"))?;
    let data_text = read_optional(&dir.join("data.json"))?;
    let expect_text = read_optional(&dir.join("expect.json"))?;
    let expect: Expect = schema_forms::path_de::from_str_with_path("expect", &expect_text)
        .map_err(|e| vec![e.to_string()])?;

    let mut loader = PresetLoader::new();
    loader.load(&BuiltinPresets);
    let registry = FieldRegistry::new().with(Arc::new(SpecificationField::new(loader.shared())));

    let schema = registry.resolve(&schema_text).map_err(|e| vec![e.to_string()])?;
    let hints = parse_hints(&ui_text).map_err(|e| vec![e.to_string()])?;
    let data = Data::parse(&data_text).map_err(|e| vec![e.to_string()])?;

    let mut problems = Vec::new();

    let actual: Vec<ExpectedError> = validate(&schema, &data)
        .into_iter()
        .map(|e| ExpectedError { path: e.path.to_string(), keyword: e.keyword.to_string() })
        .collect();
    if actual != expect.errors {
        problems.push(format!("errors: expected {:?}, got {:?}", expect.errors, actual));
    }

    let tree = FieldMapper::new(&schema, &hints, &registry).map(&data);
    if tree != FieldMapper::new(&schema, &hints, &registry).map(&data) {
        problems.push("mapping is not idempotent".to_string());
    }

    for (path, kind) in &expect.kinds {
        match field(&tree, path, &mut problems) {
            Some(node) => {
                let got = serde_json::to_value(&node.kind).unwrap_or(Value::Null);
                if &got != kind {
                    problems.push(format!("kind of `{path}`: expected {kind}, got {got}"));
                }
            }
            None => continue,
        }
    }
    for (path, labels) in &expect.labels {
        if let Some(node) = field(&tree, path, &mut problems) {
            let got: Vec<&str> = node.choices.iter().map(|c| c.label.as_str()).collect();
            if got != labels.iter().map(String::as_str).collect::<Vec<_>>() {
                problems.push(format!("labels of `{path}`: expected {labels:?}, got {got:?}"));
            }
        }
    }
    for path in &expect.disabled {
        if field(&tree, path, &mut problems).is_some_and(|n| !n.disabled) {
            problems.push(format!("`{path}` should be disabled"));
        }
    }
    for path in &expect.readonly {
        if field(&tree, path, &mut problems).is_some_and(|n| !n.readonly) {
            problems.push(format!("`{path}` should be read-only"));
        }
    }

    if problems.is_empty() { Ok(()) } else { Err(problems) }
}

fn field<'t>(tree: &'t FieldNode, path: &str, problems: &mut Vec<String>) -> Option<&'t FieldNode> {
    let Ok(parsed) = path.parse::<Path>();
    let found = tree.find(&parsed);
    if found.is_none() {
        problems.push(format!("no field at `{path}`"));
    }
    found
}

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use blocks::Program;
use blocks::chain::ChainId;
use blocks::value::Value;
use log::debug;
use parking_lot::Mutex;
use serde::Deserialize;

use interpreter::{ControllerError, EngineConfig, ExecutionController, Outcome};

const TEST_SUFFIX: &str = ".test.blocks";

/// Runs that set no `stop_after_ms` are stopped after this long.
const SAFETY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestConfig {
    /// Human-readable test description.
    pub description: Option<String>,

    /// Chain to run. Defaults to the program's "when run" chain.
    pub chain: Option<u32>,

    /// Expected printed output (trimmed comparison).
    pub expect_output: Option<String>,

    /// The failure's message must contain this substring.
    pub expect_error: Option<String>,

    /// Value the chain must return.
    pub expect_value: Option<toml::Value>,

    /// The run must end as stopped.
    pub expect_cancelled: bool,

    /// Request a stop after this many milliseconds.
    pub stop_after_ms: Option<u64>,

    /// The program must be rejected before running, with a violation
    /// containing this substring.
    pub expect_integrity_error: Option<String>,
}

fn toml_to_value(val: &toml::Value) -> Value {
    match val {
        toml::Value::Integer(n) => Value::Number(*n as f64),
        toml::Value::Float(f) => Value::Number(*f),
        toml::Value::Boolean(b) => Value::Boolean(*b),
        toml::Value::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

/// Split a `.test.blocks` file into its TOML config and JSON program.
fn parse_test_file(content: &str) -> Result<(TestConfig, &str), String> {
    let content = content.trim_start_matches('\u{feff}');

    let after_open = content
        .strip_prefix("---")
        .ok_or("missing opening --- frontmatter delimiter")?;
    let after_open = after_open
        .strip_prefix('\n')
        .or_else(|| after_open.strip_prefix("\r\n"))
        .unwrap_or(after_open);

    let close_pos = after_open
        .find("\n---")
        .ok_or("missing closing --- frontmatter delimiter")?;

    let toml_str = after_open[..close_pos].trim_end_matches('\r');
    let rest = &after_open[close_pos + 4..];
    let program = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .unwrap_or(rest);

    let config: TestConfig =
        toml::from_str(toml_str).map_err(|e| format!("TOML parse error: {}", e))?;

    Ok((config, program))
}

#[derive(Clone, Default)]
struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub enum TestOutcome {
    Pass,
    Fail(String),
}

pub struct TestResult {
    pub path: PathBuf,
    pub description: Option<String>,
    pub outcome: TestOutcome,
}

fn run_single_test(path: &Path, engine: &EngineConfig) -> TestResult {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            return TestResult {
                path: path.to_path_buf(),
                description: None,
                outcome: TestOutcome::Fail(format!("cannot read file: {}", e)),
            };
        }
    };

    let (config, source) = match parse_test_file(&content) {
        Ok(pair) => pair,
        Err(e) => {
            return TestResult {
                path: path.to_path_buf(),
                description: None,
                outcome: TestOutcome::Fail(format!("frontmatter error: {}", e)),
            };
        }
    };

    let outcome = match check(&config, source, engine) {
        Ok(()) => TestOutcome::Pass,
        Err(reason) => TestOutcome::Fail(reason),
    };
    TestResult {
        path: path.to_path_buf(),
        description: config.description,
        outcome,
    }
}

/// Load, run and compare. `Err` carries the reason the test failed.
fn check(config: &TestConfig, source: &str, engine: &EngineConfig) -> Result<(), String> {
    let program = Program::from_json(source).map_err(|e| format!("invalid program: {}", e))?;
    let chain = config
        .chain
        .map(ChainId)
        .or_else(|| program.entry_chain().map(|c| c.id))
        .ok_or("no chain to run: set `chain` or add a \"when run\" chain")?;

    let output = SharedOutput::default();
    let mut controller = ExecutionController::new(engine.clone());
    let started = controller.start(Arc::new(program), chain, Box::new(output.clone()));

    let handle = match (started, &config.expect_integrity_error) {
        (Err(ControllerError::Integrity(violations)), Some(expected)) => {
            return if violations.iter().any(|v| v.to_string().contains(expected.as_str())) {
                Ok(())
            } else {
                let found: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
                Err(format!(
                    "expected integrity violation containing \"{}\", got: {}",
                    expected,
                    found.join("; ")
                ))
            };
        }
        (Ok(_), Some(expected)) => {
            return Err(format!(
                "expected integrity violation containing \"{}\", but the program was accepted",
                expected
            ));
        }
        (Err(ControllerError::Integrity(violations)), None) => {
            let found: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
            return Err(format!("program rejected:\n  {}", found.join("\n  ")));
        }
        (Err(e), _) => return Err(format!("cannot start run: {}", e)),
        (Ok(handle), None) => handle,
    };

    let limit = config
        .stop_after_ms
        .map(Duration::from_millis)
        .unwrap_or(SAFETY_TIMEOUT);
    let outcome = crate::drive(&mut controller, handle, Some(limit))
        .map_err(|e| format!("controller error: {}", e))?;
    debug!("test run finished: {}", outcome.message());
    controller
        .free(handle)
        .map_err(|e| format!("controller error: {}", e))?;

    compare(config, &outcome, &output.text())
}

fn compare(config: &TestConfig, outcome: &Outcome, output: &str) -> Result<(), String> {
    match (outcome, &config.expect_error) {
        (Outcome::Failed(failure), Some(expected)) => {
            let message = failure.error.to_string();
            if !message.contains(expected.as_str()) {
                return Err(format!(
                    "expected error containing \"{}\", got: {}",
                    expected, message
                ));
            }
        }
        (_, Some(expected)) => {
            return Err(format!(
                "expected error containing \"{}\", but the run ended with: {}",
                expected,
                outcome.message()
            ));
        }
        (Outcome::Failed(failure), None) => {
            return Err(format!("unexpected failure: {}", failure));
        }
        (Outcome::Cancelled, None) if !config.expect_cancelled => {
            return Err(if config.stop_after_ms.is_some() {
                "run was stopped before it completed".to_string()
            } else {
                format!("run did not finish within {:?}", SAFETY_TIMEOUT)
            });
        }
        (Outcome::Completed(_), None) if config.expect_cancelled => {
            return Err("expected the run to be stopped, but it completed".into());
        }
        _ => {}
    }

    if let Some(expected) = &config.expect_output {
        let actual = output.trim();
        let expected = expected.trim();
        if actual != expected {
            return Err(format!(
                "output mismatch\n  expected: {}\n  actual:   {}",
                expected, actual
            ));
        }
    }

    if let Some(expected) = config.expect_value.as_ref().map(toml_to_value) {
        match outcome {
            Outcome::Completed(Some(actual)) if *actual == expected => {}
            Outcome::Completed(Some(actual)) => {
                return Err(format!(
                    "value mismatch\n  expected: {}\n  actual:   {}",
                    expected, actual
                ));
            }
            _ => {
                return Err(format!("expected value {}, but no value was returned", expected));
            }
        }
    }

    Ok(())
}

/// Discover test files grouped by category (subfolder relative to root).
/// Files directly in `root` get category "" (uncategorized).
fn discover_categorized(root: &Path) -> BTreeMap<String, Vec<PathBuf>> {
    let mut categories: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    collect_tests(root, root, &mut categories);
    for files in categories.values_mut() {
        files.sort();
    }
    categories
}

fn collect_tests(dir: &Path, root: &Path, out: &mut BTreeMap<String, Vec<PathBuf>>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_tests(&path, root, out);
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.ends_with(TEST_SUFFIX) {
                let category = path
                    .parent()
                    .and_then(|p| p.strip_prefix(root).ok())
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                out.entry(category).or_default().push(path);
            }
        }
    }
}

pub fn list_categories(path: &Path) {
    if path.is_file() {
        eprintln!("(single file, no categories)");
        return;
    }

    let categories = discover_categorized(path);
    if categories.is_empty() {
        eprintln!("no {} files found in {}", TEST_SUFFIX, path.display());
        return;
    }

    eprintln!("available categories:");
    for (cat, files) in &categories {
        let label = if cat.is_empty() { "(root)" } else { cat.as_str() };
        eprintln!("  {} ({} tests)", label, files.len());
    }
}

fn pass_label(no_color: bool) -> &'static str {
    if no_color { "PASS" } else { "\x1b[32mPASS\x1b[0m" }
}

fn fail_label(no_color: bool) -> &'static str {
    if no_color { "FAIL" } else { "\x1b[31mFAIL\x1b[0m" }
}

fn bold(s: &str, no_color: bool) -> String {
    if no_color {
        s.to_string()
    } else {
        format!("\x1b[1m{}\x1b[0m", s)
    }
}

fn label_of(result: &TestResult) -> &str {
    result.description.as_deref().unwrap_or_else(|| {
        result
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_suffix(TEST_SUFFIX))
            .unwrap_or("?")
    })
}

/// Run every test file under `path` (or a single file), optionally only
/// those in `categories`. Returns 0 when all pass, 1 otherwise.
pub fn run_tests(path: &Path, no_color: bool, categories: &[String], engine: &EngineConfig) -> i32 {
    let all_categories = if path.is_file() {
        BTreeMap::from([(String::new(), vec![path.to_path_buf()])])
    } else {
        discover_categorized(path)
    };

    if all_categories.is_empty() {
        eprintln!("no {} files found in {}", TEST_SUFFIX, path.display());
        return 1;
    }

    let run_categories: BTreeMap<&str, &Vec<PathBuf>> = if categories.is_empty() || path.is_file()
    {
        all_categories.iter().map(|(k, v)| (k.as_str(), v)).collect()
    } else {
        let mut filtered = BTreeMap::new();
        for requested in categories {
            let req = requested.trim_matches('/');
            let mut found = false;
            for (cat, files) in &all_categories {
                if cat == req || cat.starts_with(&format!("{}/", req)) {
                    filtered.insert(cat.as_str(), files);
                    found = true;
                }
            }
            if !found {
                eprintln!(
                    "warning: category '{}' not found (available: {})",
                    req,
                    all_categories
                        .keys()
                        .map(|k| if k.is_empty() { "(root)" } else { k.as_str() })
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }
        filtered
    };

    if run_categories.is_empty() {
        eprintln!("no matching categories found");
        return 1;
    }

    let mut passed = 0usize;
    let mut failures: Vec<TestResult> = Vec::new();

    for (cat, files) in &run_categories {
        let header = if cat.is_empty() { "(root)" } else { *cat };
        eprintln!();
        eprintln!("{}", bold(header, no_color));

        for file in *files {
            let result = run_single_test(file, engine);
            match &result.outcome {
                TestOutcome::Pass => {
                    passed += 1;
                    eprintln!("  {}  {}", pass_label(no_color), label_of(&result));
                }
                TestOutcome::Fail(_) => {
                    eprintln!("  {}  {}", fail_label(no_color), label_of(&result));
                    failures.push(result);
                }
            }
        }
    }

    if !failures.is_empty() {
        eprintln!();
        eprintln!("failures:");
        for f in &failures {
            eprintln!();
            eprintln!("  --- {} ---", f.path.display());
            if let TestOutcome::Fail(reason) = &f.outcome {
                for line in reason.lines() {
                    eprintln!("  {}", line);
                }
            }
        }
    }

    eprintln!();
    let failed = failures.len();
    if failed == 0 {
        let ok = if no_color { "ok" } else { "\x1b[32mok\x1b[0m" };
        eprintln!("test result: {}. {} passed, 0 failed", ok, passed);
        0
    } else {
        let status = if no_color { "FAILED" } else { "\x1b[31mFAILED\x1b[0m" };
        eprintln!(
            "test result: {}. {} passed, {} failed (of {})",
            status,
            passed,
            failed,
            passed + failed
        );
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNTDOWN: &str = r#"---
description = "prints a countdown"
expect_output = "3\n2\n1"
---
{
  "variables": { "n": 3 },
  "chains": [
    { "id": 0, "blocks": [
      { "definition": "on_start" },
      { "definition": "repeat", "arguments": [{ "literal": 3 }] },
      { "definition": "print", "arguments": [{ "block": {
          "definition": "get_var", "arguments": [{ "literal": "n" }] } }] },
      { "definition": "change_var", "arguments": [{ "literal": "n" }, { "literal": -1 }] },
      { "definition": "end" }
    ] }
  ]
}
"#;

    #[test]
    fn frontmatter_splits_from_program() {
        let (config, program) = parse_test_file(COUNTDOWN).unwrap();
        assert_eq!(config.description.as_deref(), Some("prints a countdown"));
        assert!(program.trim_start().starts_with('{'));
        assert!(!config.expect_cancelled);
    }

    #[test]
    fn missing_delimiters_are_reported() {
        assert!(parse_test_file("{}").is_err());
        assert!(parse_test_file("---\ndescription = \"x\"\n{}").is_err());
    }

    #[test]
    fn unknown_frontmatter_keys_are_rejected() {
        assert!(parse_test_file("---\nexpect_outptu = \"x\"\n---\n{}").is_err());
    }

    #[test]
    fn toml_values_convert() {
        assert_eq!(toml_to_value(&toml::Value::Integer(120)), Value::Number(120.0));
        assert_eq!(toml_to_value(&toml::Value::Boolean(true)), Value::Boolean(true));
        assert_eq!(
            toml_to_value(&toml::Value::String("hi".into())),
            Value::text("hi")
        );
    }

    #[test]
    fn countdown_file_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("countdown.test.blocks");
        std::fs::write(&path, COUNTDOWN).unwrap();

        let result = run_single_test(&path, &EngineConfig::default());
        match result.outcome {
            TestOutcome::Pass => {}
            TestOutcome::Fail(reason) => panic!("{}", reason),
        }
    }

    #[test]
    fn wrong_output_fails() {
        let config = TestConfig {
            expect_output: Some("1".into()),
            ..TestConfig::default()
        };
        let outcome = Outcome::Completed(None);
        assert!(compare(&config, &outcome, "2\n").is_err());
        assert!(compare(&config, &outcome, "1\n").is_ok());
    }

    #[test]
    fn cancellation_must_be_expected() {
        let stopped = TestConfig {
            stop_after_ms: Some(10),
            ..TestConfig::default()
        };
        assert!(compare(&stopped, &Outcome::Cancelled, "").is_err());

        let expected = TestConfig {
            expect_cancelled: true,
            ..stopped
        };
        assert!(compare(&expected, &Outcome::Cancelled, "").is_ok());
        assert!(compare(&expected, &Outcome::Completed(None), "").is_err());
    }

    #[test]
    fn categories_come_from_subfolders() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("loops")).unwrap();
        std::fs::write(dir.path().join("loops/a.test.blocks"), COUNTDOWN).unwrap();
        std::fs::write(dir.path().join("top.test.blocks"), COUNTDOWN).unwrap();
        std::fs::write(dir.path().join("notes.md"), "").unwrap();

        let found = discover_categorized(dir.path());
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["", "loops"]);
        assert_eq!(found["loops"].len(), 1);
    }
}

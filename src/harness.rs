//! Runner for `.hm` conformance scripts.
//!
//! A script declares its expected output in a header of `# ` comment lines:
//!
//! ```text
//! # 3
//! # done
//! echo 1 + 2
//! echo "done"
//! ```
//!
//! The header `@exception` expects the script to fail with an uncaught
//! error, and `@starts <text>` only checks the beginning of the output.
//! Scripts without a header are skipped.

use std::cell::RefCell;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::error::HymnError;
use crate::runtime::vm::Hymn;

const EXCEPTION: &str = "@exception";
const STARTS: &str = "@starts ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Skipped,
    Fail(String),
}

#[derive(Debug, Clone)]
pub struct CaseResult {
    pub name: String,
    pub outcome: Outcome,
}

impl CaseResult {
    pub fn passed(&self) -> bool {
        self.outcome != Outcome::Skipped && !self.failed()
    }

    pub fn failed(&self) -> bool {
        matches!(self.outcome, Outcome::Fail(_))
    }
}

#[derive(Debug, Default)]
pub struct Summary {
    pub success: usize,
    pub fail: usize,
    pub count: usize,
    pub elapsed: Duration,
    pub results: Vec<CaseResult>,
}

impl Summary {
    pub fn failures(&self) -> impl Iterator<Item = &CaseResult> {
        self.results.iter().filter(|r| r.failed())
    }

    fn record(&mut self, result: CaseResult) {
        self.count += 1;
        match result.outcome {
            Outcome::Pass => self.success += 1,
            Outcome::Fail(_) => self.fail += 1,
            Outcome::Skipped => {}
        }
        self.results.push(result);
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            match &result.outcome {
                Outcome::Pass => writeln!(f, "✓ {}", result.name)?,
                Outcome::Skipped => writeln!(f, "- {}", result.name)?,
                Outcome::Fail(reason) => writeln!(f, "⨯ {}\n{}\n", result.name, reason)?,
            }
        }
        write!(
            f,
            "Success: {}, Failed: {}, Count: {}, Time: {} ms",
            self.success,
            self.fail,
            self.count,
            self.elapsed.as_millis()
        )
    }
}

/// Expected output declared by the leading `# ` comment lines, trimmed.
///
/// A bare `#` line contributes an empty line.
pub fn expected_output(source: &str) -> String {
    let mut expected = String::new();
    for line in source.lines() {
        if let Some(text) = line.strip_prefix("# ") {
            expected.push_str(text);
            expected.push('\n');
        } else if line == "#" {
            expected.push('\n');
        } else {
            break;
        }
    }
    expected.trim().to_string()
}

/// Runs one case in a fresh VM and checks its output against the header.
pub fn run_source(name: &str, source: &str) -> CaseResult {
    let expected = expected_output(source);
    let outcome = if expected.is_empty() {
        Outcome::Skipped
    } else {
        let (out, result) = capture_run(name, source);
        check(&expected, out.trim(), result)
    };
    CaseResult {
        name: name.to_string(),
        outcome,
    }
}

pub fn run_file(path: &Path) -> Result<CaseResult, HymnError> {
    let source = fs::read_to_string(path).map_err(|e| HymnError::io(path, e))?;
    Ok(run_source(&path.to_string_lossy(), &source))
}

/// Runs every `.hm` script under `dir` in sorted order.
pub fn run_corpus(dir: &Path) -> Result<Summary, HymnError> {
    let start = Instant::now();
    let mut scripts: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| HymnError::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "hm"))
        .collect();
    scripts.sort();

    let mut summary = Summary::default();
    for script in scripts {
        let result = run_file(&script)?;
        match &result.outcome {
            Outcome::Fail(reason) => warn!("{} failed: {}", result.name, reason),
            _ => info!("{} ok", result.name),
        }
        summary.record(result);
    }
    summary.elapsed = start.elapsed();
    Ok(summary)
}

fn capture_run(name: &str, source: &str) -> (String, Result<(), HymnError>) {
    let out = Rc::new(RefCell::new(String::new()));
    let mut vm = Hymn::new();
    let sink = out.clone();
    vm.set_print(move |text| sink.borrow_mut().push_str(text));
    let errors = out.clone();
    vm.set_print_error(move |text| errors.borrow_mut().push_str(text));

    let result = vm.interpret_script(name, source);
    let text = out.borrow().clone();
    (text, result)
}

fn check(expected: &str, out: &str, result: Result<(), HymnError>) -> Outcome {
    if expected.starts_with(EXCEPTION) {
        return match result {
            Ok(()) => Outcome::Fail("Expected an error.".to_string()),
            Err(_) => Outcome::Pass,
        };
    }
    if let Err(e) = result {
        return Outcome::Fail(e.to_string().trim().to_string());
    }
    if let Some(start) = expected.strip_prefix(STARTS) {
        if !out.starts_with(start) {
            return Outcome::Fail(format!("Expected start:\n{}\n\nBut was:\n{}", start, out));
        }
        return Outcome::Pass;
    }
    if out != expected {
        return Outcome::Fail(format!("Expected:\n{}\n\nBut was:\n{}", expected, out));
    }
    Outcome::Pass
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_expected_output_header() {
        let source = "# 1\n#\n# two  \nlet x = 1\n# not part of the header\n";
        assert_eq!(expected_output(source), "1\n\ntwo");
        assert_eq!(expected_output("echo 1\n# 1"), "");
    }

    #[test]
    fn test_run_source_outcomes() {
        assert_eq!(run_source("ok", "# 3\necho 1 + 2").outcome, Outcome::Pass);
        assert_eq!(run_source("skip", "echo 1").outcome, Outcome::Skipped);
        assert_eq!(run_source("thrown", "# @exception\nthrow \"x\"").outcome, Outcome::Pass);
        assert_eq!(run_source("starts", "# @starts ab\necho \"abc\"").outcome, Outcome::Pass);
        assert_eq!(
            run_source("wrong", "# 4\necho 3").outcome,
            Outcome::Fail("Expected:\n4\n\nBut was:\n3".to_string())
        );
        assert_eq!(
            run_source("quiet", "# @exception\necho 1").outcome,
            Outcome::Fail("Expected an error.".to_string())
        );
    }

    #[test]
    fn test_unexpected_error_fails_case() {
        let result = run_source("err", "# 1\necho 1 / 0");
        assert!(result.failed());
        assert_eq!(result.outcome, Outcome::Fail("Divide: Division by zero.\n  at <script> err:2".to_string()));
    }

    #[test]
    fn test_summary_counts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.hm"), "# 1\necho 1").unwrap();
        fs::write(dir.path().join("b.hm"), "# 1\necho 2").unwrap();
        fs::write(dir.path().join("c.hm"), "echo 3").unwrap();
        fs::write(dir.path().join("notes.txt"), "# 1").unwrap();

        let summary = run_corpus(dir.path()).unwrap();
        assert_eq!((summary.success, summary.fail, summary.count), (1, 1, 3));
        assert_eq!(summary.failures().count(), 1);
        assert!(summary.results[0].passed());
        assert!(summary.to_string().contains("Success: 1, Failed: 1, Count: 3"));
    }

    #[test]
    fn test_script_corpus() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("scripts");
        let summary = run_corpus(&dir).unwrap();
        assert!(summary.count > 0);
        assert_eq!(summary.fail, 0, "{}", summary);
    }
}

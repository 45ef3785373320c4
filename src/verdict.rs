//! Verifier output normalization.
//!
//! Verifiers either print a JSON report between sentinel lines or plain text.
//! Plain text passes only when the process completed and no failure marker
//! shows up anywhere in it. Compiler-style diagnostics are extracted on a best
//! effort basis; anything unparseable falls through as raw text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

pub const RESULT_BEGIN: &str = "__COURSEBOX_RESULT_BEGIN__";
pub const RESULT_END: &str = "__COURSEBOX_RESULT_END__";

const MAX_DIAGNOSTICS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(default = "default_severity")]
    pub severity: String,
    pub message: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub suggestion: Option<String>,
}

fn default_severity() -> String {
    "error".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StructuredReport {
    success: bool,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    diagnostics: Vec<Diagnostic>,
    #[serde(default)]
    tests: Vec<TestCase>,
}

/// Classified outcome of one verifier run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub success: bool,
    pub summary: String,
    pub diagnostics: Vec<Diagnostic>,
    pub tests: Vec<TestCase>,
    /// Condensed rendering of the diagnostics, when any were found
    pub friendly: Option<String>,
    /// Full captured output, always kept
    pub raw: String,
}

impl Verdict {
    /// Friendly text when available, raw output otherwise.
    pub fn display_text(&self) -> &str {
        self.friendly.as_deref().unwrap_or(&self.raw)
    }
}

struct Patterns {
    failure: Regex,
    header: Regex,
    location: Regex,
    snippet: Regex,
    help: Regex,
    panic: Regex,
    python: Regex,
}

impl Patterns {
    fn compile() -> Option<Self> {
        Some(Self {
            failure: Regex::new(
                r"(?m)(❌|✗|✖|\bFAILED\b|panicked at|Traceback \(most recent call last\)|AssertionError|^--- FAIL|^error(\[E\d+\])?:)",
            )
            .ok()?,
            header: Regex::new(r"^(error|warning)(?:\[(E\d+)\])?: (.+)$").ok()?,
            location: Regex::new(r"^\s*--> (.+?):(\d+):(\d+)\s*$").ok()?,
            snippet: Regex::new(r"^\s*(\d+)\s+\|(.*)$").ok()?,
            help: Regex::new(r"^\s*(?:= )?help: (.+)$").ok()?,
            panic: Regex::new(r"panicked at (?:'(.+?)', )?([^\s:]+):(\d+):(\d+)").ok()?,
            python: Regex::new(r#"File "([^"]+)", line (\d+)"#).ok()?,
        })
    }
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS.get_or_init(Patterns::compile).as_ref()
}

/// Classify verifier output. `completed` is true when the process exited
/// cleanly with status zero.
pub fn normalize(completed: bool, raw: &str) -> Verdict {
    if let Some(report) = structured_report(raw) {
        let success = completed && report.success;
        let friendly = render_diagnostics(&report.diagnostics);
        return Verdict {
            success,
            summary: report
                .summary
                .unwrap_or_else(|| default_summary(success, completed)),
            diagnostics: report.diagnostics,
            tests: report.tests,
            friendly,
            raw: raw.to_string(),
        };
    }

    let Some(patterns) = patterns() else {
        // no patterns, no heuristics: exit status is all we have
        return Verdict {
            success: completed,
            summary: default_summary(completed, completed),
            diagnostics: Vec::new(),
            tests: Vec::new(),
            friendly: None,
            raw: raw.to_string(),
        };
    };

    let marked = patterns.failure.is_match(raw);
    let success = completed && !marked;
    let diagnostics = if success {
        Vec::new()
    } else {
        extract_diagnostics(patterns, raw)
    };
    Verdict {
        success,
        summary: default_summary(success, completed),
        friendly: render_diagnostics(&diagnostics),
        diagnostics,
        tests: Vec::new(),
        raw: raw.to_string(),
    }
}

fn default_summary(success: bool, completed: bool) -> String {
    match (success, completed) {
        (true, _) => "All checks passed".to_string(),
        (false, true) => "Verifier reported failures".to_string(),
        (false, false) => "Verifier exited with a failure status".to_string(),
    }
}

fn structured_report(raw: &str) -> Option<StructuredReport> {
    let mut inside = false;
    let mut body = String::new();
    for line in raw.lines() {
        match line.trim() {
            RESULT_BEGIN => {
                inside = true;
                body.clear();
            }
            RESULT_END if inside => {
                return match serde_json::from_str(&body) {
                    Ok(report) => Some(report),
                    Err(e) => {
                        debug!("Ignoring malformed structured report: {}", e);
                        None
                    }
                };
            }
            _ if inside => {
                body.push_str(line);
                body.push('\n');
            }
            _ => {}
        }
    }
    None
}

fn extract_diagnostics(patterns: &Patterns, raw: &str) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut current: Option<Diagnostic> = None;
    let mut snippet: Vec<String> = Vec::new();

    let mut flush = |current: &mut Option<Diagnostic>, snippet: &mut Vec<String>| {
        if let Some(mut diag) = current.take() {
            if !snippet.is_empty() {
                diag.snippet = Some(snippet.join("\n"));
            }
            diagnostics.push(diag);
        }
        snippet.clear();
    };

    for line in raw.lines() {
        if let Some(caps) = patterns.header.captures(line) {
            flush(&mut current, &mut snippet);
            let severity = caps.get(1).map_or("error", |m| m.as_str());
            let message = match caps.get(2) {
                Some(code) => format!("[{}] {}", code.as_str(), &caps[3]),
                None => caps[3].to_string(),
            };
            // summary lines like "aborting due to 2 previous errors" carry nothing
            if message.starts_with("aborting due to") || message.starts_with("could not compile") {
                continue;
            }
            current = Some(Diagnostic {
                severity: severity.to_string(),
                message,
                ..Diagnostic::default()
            });
            continue;
        }
        let Some(diag) = current.as_mut() else {
            continue;
        };
        if let Some(caps) = patterns.location.captures(line) {
            if diag.file.is_none() {
                diag.file = Some(caps[1].to_string());
                diag.line = caps[2].parse().ok();
                diag.column = caps[3].parse().ok();
            }
        } else if let Some(caps) = patterns.snippet.captures(line) {
            snippet.push(format!("{} |{}", &caps[1], &caps[2]));
        } else if let Some(caps) = patterns.help.captures(line)
            && diag.suggestion.is_none()
        {
            diag.suggestion = Some(caps[1].trim().to_string());
        }
    }
    flush(&mut current, &mut snippet);

    diagnostics.retain(|d| d.severity == "error");
    if diagnostics.is_empty() {
        diagnostics.extend(runtime_failure(patterns, raw));
    }
    diagnostics.truncate(MAX_DIAGNOSTICS);
    diagnostics
}

/// Panics and tracebacks, when no compiler diagnostic was found.
fn runtime_failure(patterns: &Patterns, raw: &str) -> Option<Diagnostic> {
    let lines: Vec<&str> = raw.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = patterns.panic.captures(line) {
            let message = caps
                .get(1)
                .map(|m| m.as_str().to_string())
                .or_else(|| lines.get(i + 1).map(|l| l.trim().to_string()))
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "program panicked".to_string());
            return Some(Diagnostic {
                severity: "error".to_string(),
                message,
                file: Some(caps[2].to_string()),
                line: caps[3].parse().ok(),
                column: caps[4].parse().ok(),
                ..Diagnostic::default()
            });
        }
    }

    let last_frame = lines
        .iter()
        .filter_map(|l| patterns.python.captures(l))
        .last()?;
    let message = lines
        .iter()
        .rev()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .unwrap_or("exception raised")
        .to_string();
    Some(Diagnostic {
        severity: "error".to_string(),
        message,
        file: Some(last_frame[1].to_string()),
        line: last_frame[2].parse().ok(),
        ..Diagnostic::default()
    })
}

fn render_diagnostics(diagnostics: &[Diagnostic]) -> Option<String> {
    if diagnostics.is_empty() {
        return None;
    }
    let mut out = String::new();
    for diag in diagnostics {
        out.push_str(&format!("✖ {}\n", diag.message));
        if let Some(file) = &diag.file {
            match (diag.line, diag.column) {
                (Some(line), Some(col)) => out.push_str(&format!("  at {file}:{line}:{col}\n")),
                (Some(line), None) => out.push_str(&format!("  at {file}:{line}\n")),
                _ => out.push_str(&format!("  at {file}\n")),
            }
        }
        if let Some(snippet) = &diag.snippet {
            for line in snippet.lines() {
                out.push_str(&format!("    {line}\n"));
            }
        }
        if let Some(suggestion) = &diag.suggestion {
            out.push_str(&format!("  hint: {suggestion}\n"));
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUSTC: &str = r#"   Compiling hello v0.1.0
error[E0308]: mismatched types
 --> src/main.rs:4:18
  |
4 |     let x: i32 = "five";
  |            ---   ^^^^^^ expected `i32`, found `&str`
  |
help: try using a conversion method
  |
error: aborting due to 1 previous error
"#;

    #[test]
    fn test_clean_output_passes() {
        let verdict = normalize(true, "✅ hello: ok\nall good\n");
        assert!(verdict.success);
        assert!(verdict.diagnostics.is_empty());
        assert_eq!(verdict.display_text(), verdict.raw);
    }

    #[test]
    fn test_marker_fails_despite_zero_exit() {
        let verdict = normalize(true, "running\n❌ expected 3, got 4\n");
        assert!(!verdict.success);
        assert!(verdict.raw.contains("expected 3"));
    }

    #[test]
    fn test_nonzero_exit_fails_without_markers() {
        let verdict = normalize(false, "nothing obvious here");
        assert!(!verdict.success);
        assert_eq!(verdict.summary, "Verifier exited with a failure status");
    }

    #[test]
    fn test_rustc_diagnostic_extraction() {
        let verdict = normalize(false, RUSTC);
        assert!(!verdict.success);
        assert_eq!(verdict.diagnostics.len(), 1);
        let diag = &verdict.diagnostics[0];
        assert_eq!(diag.message, "[E0308] mismatched types");
        assert_eq!(diag.file.as_deref(), Some("src/main.rs"));
        assert_eq!(diag.line, Some(4));
        assert_eq!(diag.column, Some(18));
        assert!(diag.snippet.as_deref().unwrap().contains("let x: i32"));
        assert_eq!(diag.suggestion.as_deref(), Some("try using a conversion method"));

        let friendly = verdict.friendly.unwrap();
        assert!(friendly.contains("at src/main.rs:4:18"));
        assert!(friendly.contains("hint: try using a conversion method"));
    }

    #[test]
    fn test_panic_extraction() {
        let raw = "thread 'main' panicked at src/main.rs:2:5:\nassertion failed: x == 2\n";
        let verdict = normalize(false, raw);
        let diag = &verdict.diagnostics[0];
        assert_eq!(diag.message, "assertion failed: x == 2");
        assert_eq!(diag.line, Some(2));
    }

    #[test]
    fn test_python_traceback() {
        let raw = "Traceback (most recent call last):\n  File \"main.py\", line 7, in <module>\n    assert add(1, 2) == 4\nAssertionError\n";
        let verdict = normalize(false, raw);
        let diag = &verdict.diagnostics[0];
        assert_eq!(diag.file.as_deref(), Some("main.py"));
        assert_eq!(diag.line, Some(7));
        assert_eq!(diag.message, "AssertionError");
    }

    #[test]
    fn test_structured_report() {
        let raw = format!(
            "noise\n{RESULT_BEGIN}\n{{\"success\": false, \"summary\": \"1 of 2 tests failed\", \"tests\": [{{\"name\": \"adds\", \"status\": \"fail\"}}], \"diagnostics\": [{{\"message\": \"bad sum\", \"file\": \"lib.rs\", \"line\": 3}}]}}\n{RESULT_END}\n"
        );
        let verdict = normalize(true, &raw);
        assert!(!verdict.success);
        assert_eq!(verdict.summary, "1 of 2 tests failed");
        assert_eq!(verdict.tests.len(), 1);
        assert_eq!(verdict.diagnostics[0].severity, "error");
        assert!(verdict.friendly.unwrap().contains("at lib.rs:3"));
    }

    #[test]
    fn test_malformed_input_never_panics() {
        let inputs = vec![
            String::new(),
            "error".to_string(),
            "error: \n -->".to_string(),
            " --> a.rs:x:y".to_string(),
            "panicked at".to_string(),
            "1 |".to_string(),
            format!("{RESULT_BEGIN}\n{{broken"),
            format!("{RESULT_BEGIN}\nnot json\n{RESULT_END}"),
        ];
        for raw in &inputs {
            let verdict = normalize(false, raw);
            assert_eq!(&verdict.raw, raw);
            assert!(!verdict.success);
        }
    }
}

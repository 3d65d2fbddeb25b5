//! Diagnostic model and tool-output parsers.
//!
//! Every parser turns the raw bytes a tool printed into a flat list of
//! [`LogEntry`] values. Parsing is fail-closed: any malformed input yields
//! [`ParseError::SystemFailure`], never a partial or empty success, so an
//! unreadable report cannot silently pass a gate.
//!
//! # Example
//!
//! ```ignore
//! use monarch_runner::parser::{parse_and_enrich, ToolFormat};
//!
//! let entries = parse_and_enrich(ToolFormat::Eslint, &raw)?;
//! for entry in &entries {
//!     println!("{}:{} {}", entry.file, entry.line, entry.message);
//! }
//! ```

pub mod eslint;
pub mod hints;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ParseError};

pub use eslint::EslintParser;
pub use go_test::GoTestParser;
pub use hints::{enrich, enrich_all, hint_for};

/// Severity of a normalized diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// One normalized diagnostic produced by a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub severity: Severity,
    /// File the finding refers to. Some tools only give a package or module.
    pub file: String,
    /// 1-based line, 0 when not applicable.
    pub line: u32,
    pub message: String,
    /// Name of the producing tool.
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Remediation advice attached by [`enrich`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl LogEntry {
    /// Creates an entry with no rule id and no hint.
    pub fn new(
        severity: Severity,
        file: impl Into<String>,
        line: u32,
        message: impl Into<String>,
        tool: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            file: file.into(),
            line,
            message: message.into(),
            tool: tool.into(),
            rule_id: None,
            hint: None,
        }
    }

    /// Sets the rule identifier.
    pub fn with_rule_id(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }
}

/// Capability to turn raw tool output into log entries.
pub trait ToolParser: Send + Sync {
    /// Name reported in [`LogEntry::tool`].
    fn tool_name(&self) -> &'static str;

    /// Parses raw output. Must return [`ParseError::SystemFailure`] if the
    /// output cannot be read.
    fn parse(&self, raw: &[u8]) -> Result<Vec<LogEntry>, ParseError>;
}

/// Supported tool output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFormat {
    /// ESLint `--format json` report.
    Eslint,
    /// `go test -json` event stream.
    GoTest,
}

impl ToolFormat {
    /// Returns the parser for this format.
    pub fn parser(&self) -> &'static dyn ToolParser {
        match self {
            ToolFormat::Eslint => &EslintParser,
            ToolFormat::GoTest => &GoTestParser,
        }
    }
}

impl FromStr for ToolFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eslint" => Ok(ToolFormat::Eslint),
            "go-test" | "gotest" | "go_test" | "go test" => Ok(ToolFormat::GoTest),
            other => Err(ConfigError::UnknownToolFormat(other.to_string())),
        }
    }
}

/// Parses `raw` with the parser for `format`.
pub fn parse(format: ToolFormat, raw: &[u8]) -> Result<Vec<LogEntry>, ParseError> {
    format.parser().parse(raw)
}

/// Parses `raw` and attaches remediation hints to every entry.
pub fn parse_and_enrich(format: ToolFormat, raw: &[u8]) -> Result<Vec<LogEntry>, ParseError> {
    let mut entries = parse(format, raw)?;
    enrich_all(&mut entries);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_format_from_str() {
        assert_eq!("eslint".parse::<ToolFormat>().unwrap(), ToolFormat::Eslint);
        assert_eq!("ESLint".parse::<ToolFormat>().unwrap(), ToolFormat::Eslint);
        assert_eq!("go-test".parse::<ToolFormat>().unwrap(), ToolFormat::GoTest);
        assert!(matches!(
            "pylint".parse::<ToolFormat>(),
            Err(ConfigError::UnknownToolFormat(_))
        ));
    }

    #[test]
    fn test_both_formats_fail_closed_identically() {
        let garbage = b"not json at all {";
        assert_eq!(
            parse(ToolFormat::Eslint, garbage),
            Err(ParseError::SystemFailure)
        );
        assert_eq!(
            parse(ToolFormat::GoTest, garbage),
            Err(ParseError::SystemFailure)
        );
    }

    #[test]
    fn test_entries_carry_parser_tool_name() {
        let eslint = br#"[{"filePath":"a.ts","messages":[{"ruleId":"semi","severity":2,"message":"Missing semicolon","line":1}]}]"#;
        let go_test = br#"{"Action":"fail","Package":"m/x","Test":"TestX","Output":"FAIL: TestX\n"}"#;

        for (format, raw) in [(ToolFormat::Eslint, &eslint[..]), (ToolFormat::GoTest, &go_test[..])] {
            let entries = parse(format, raw).unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].tool, format.parser().tool_name());
        }
    }

    #[test]
    fn test_parse_and_enrich_attaches_hints() {
        let raw = br#"[{"filePath":"app.ts","messages":[{"ruleId":"no-console","severity":1,"message":"Unexpected console","line":3}]}]"#;
        let entries = parse_and_enrich(ToolFormat::Eslint, raw).unwrap();

        assert_eq!(entries.len(), 1);
        assert!(entries[0].hint.is_some());
    }

    #[test]
    fn test_severity_serializes_uppercase() {
        let entry = LogEntry::new(Severity::Warning, "a.go", 1, "msg", "vet");
        let json = serde_json::to_string(&entry).unwrap();

        assert!(json.contains("\"WARNING\""));
        assert!(!json.contains("rule_id"));
        assert!(!json.contains("hint"));
    }
}

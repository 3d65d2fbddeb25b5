//! Parser for ESLint JSON reports (`eslint --format json`).

use serde::Deserialize;

use super::{LogEntry, Severity, ToolParser};
use crate::error::ParseError;

/// ESLint severity value that denotes an error. 1 is a warning.
const ESLINT_ERROR: u8 = 2;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintFile {
    file_path: String,
    #[serde(default)]
    messages: Vec<EslintMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintMessage {
    /// Null for parse errors reported by ESLint itself.
    #[serde(default)]
    rule_id: Option<String>,
    severity: u8,
    message: String,
    #[serde(default)]
    line: u32,
}

/// Structured-findings parser for ESLint.
#[derive(Debug, Clone, Copy, Default)]
pub struct EslintParser;

impl ToolParser for EslintParser {
    fn tool_name(&self) -> &'static str {
        "eslint"
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<LogEntry>, ParseError> {
        let tool = self.tool_name();
        let files: Vec<EslintFile> =
            serde_json::from_slice(raw).map_err(|_| ParseError::SystemFailure)?;

        let entries = files
            .into_iter()
            .flat_map(|file| {
                let path = file.file_path;
                file.messages.into_iter().map(move |msg| {
                    let severity = if msg.severity == ESLINT_ERROR {
                        Severity::Error
                    } else {
                        Severity::Warning
                    };
                    LogEntry {
                        severity,
                        file: path.clone(),
                        line: msg.line,
                        message: msg.message,
                        tool: tool.to_string(),
                        rule_id: msg.rule_id.filter(|r| !r.is_empty()),
                        hint: None,
                    }
                })
            })
            .collect();

        Ok(entries)
    }
}

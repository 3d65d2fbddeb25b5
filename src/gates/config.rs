//! Gate configuration files and project stack detection.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use super::{Gate, GateKind, Tier};
use crate::error::ConfigError;

/// Location of the explicit gate configuration, relative to the project root.
pub const CONFIG_FILE: &str = ".monarch/gates.yaml";

/// Stack reported when no marker file is recognized.
pub const UNKNOWN_STACK: &str = "unknown";

/// Marker files checked in order; the first hit decides the stack.
const STACK_MARKERS: &[(&str, &str)] = &[
    ("go.mod", "go"),
    ("package.json", "node"),
    ("requirements.txt", "python"),
    ("pyproject.toml", "python"),
];

/// A project's stack and its ordered gates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GateConfig {
    pub stack: String,
    pub gates: Vec<Gate>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    stack: String,
    #[serde(default)]
    gates: Vec<RawGate>,
}

#[derive(Debug, Deserialize)]
struct RawGate {
    #[serde(default)]
    name: String,
    #[serde(default)]
    tier: Option<Tier>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    instruction: Option<String>,
    #[serde(default)]
    file: Option<PathBuf>,
}

impl RawGate {
    fn validate(self, index: usize) -> Result<Gate, ConfigError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ConfigError::EmptyGateName { index });
        }

        let kind = match self.kind.as_deref().unwrap_or("standard") {
            "standard" => GateKind::Standard {
                command: required(&name, "command", self.command)?,
            },
            "llm_eval" => GateKind::LlmEval {
                instruction: required(&name, "instruction", self.instruction)?,
                file: self
                    .file
                    .filter(|f| !f.as_os_str().is_empty())
                    .ok_or(ConfigError::MissingField {
                        gate: name.clone(),
                        field: "file",
                    })?,
            },
            other => {
                return Err(ConfigError::UnknownGateType {
                    gate: name,
                    kind: other.to_string(),
                })
            }
        };

        Ok(Gate {
            name,
            tier: self.tier.unwrap_or_default(),
            kind,
        })
    }
}

fn required(gate: &str, field: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingField {
            gate: gate.to_string(),
            field,
        })
}

impl GateConfig {
    /// Parses and validates a YAML gate configuration.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(content)?;
        let gates = raw
            .gates
            .into_iter()
            .enumerate()
            .map(|(index, gate)| gate.validate(index))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            stack: raw.stack,
            gates,
        })
    }

    /// Reads and validates a gate configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_yaml_str(&content)
    }
}

/// Determines a project's stack and gates.
///
/// An explicit [`CONFIG_FILE`] wins. Otherwise the stack is inferred from
/// marker files and the gate list is empty.
pub async fn detect_stack(root: impl AsRef<Path>) -> Result<GateConfig, ConfigError> {
    let root = root.as_ref();

    let explicit = root.join(CONFIG_FILE);
    if tokio::fs::try_exists(&explicit).await? {
        debug!(path = %explicit.display(), "Loading explicit gate configuration");
        return GateConfig::load(&explicit).await;
    }

    for (marker, stack) in STACK_MARKERS {
        if tokio::fs::try_exists(root.join(marker)).await? {
            debug!(marker = %marker, stack = %stack, "Detected project stack");
            return Ok(GateConfig {
                stack: (*stack).to_string(),
                gates: Vec::new(),
            });
        }
    }

    Ok(GateConfig {
        stack: UNKNOWN_STACK.to_string(),
        gates: Vec::new(),
    })
}

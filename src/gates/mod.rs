//! Quality gates: named checks run against a project before work is accepted.
//!
//! A gate is either a `standard` shell command executed inside the project's
//! sandbox or an `llm_eval` judgment of one file against an instruction.

pub mod config;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use config::{detect_stack, GateConfig, CONFIG_FILE, UNKNOWN_STACK};

/// Gate priority tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    A,
    B,
    #[default]
    C,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::A => "A",
            Tier::B => "B",
            Tier::C => "C",
        };
        write!(f, "{}", s)
    }
}

/// What a gate does. Each variant carries only the fields it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateKind {
    /// Shell command executed in the project sandbox.
    Standard { command: String },
    /// Judgment of `file` against `instruction`.
    LlmEval { instruction: String, file: PathBuf },
}

impl GateKind {
    /// The `type` value used in gate configuration files.
    pub fn type_name(&self) -> &'static str {
        match self {
            GateKind::Standard { .. } => "standard",
            GateKind::LlmEval { .. } => "llm_eval",
        }
    }
}

/// A single named check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gate {
    pub name: String,
    pub tier: Tier,
    #[serde(flatten)]
    pub kind: GateKind,
}

impl Gate {
    pub fn standard(name: impl Into<String>, tier: Tier, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tier,
            kind: GateKind::Standard {
                command: command.into(),
            },
        }
    }

    pub fn llm_eval(
        name: impl Into<String>,
        tier: Tier,
        instruction: impl Into<String>,
        file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            tier,
            kind: GateKind::LlmEval {
                instruction: instruction.into(),
                file: file.into(),
            },
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

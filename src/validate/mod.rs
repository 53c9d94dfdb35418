//! Static validation of untrusted network code
//!
//! Source is parsed, never executed. Every failure mode is represented as
//! a leveled message in the result; `validate` itself never fails and never
//! panics on arbitrary input.

pub mod allowlist;
mod walk;

use rustpython_parser::{ast, Parse};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// Severity of one validation message.
///
/// `Blocked` and `Error` fail the overall validation; `Warn` and `Info`
/// never do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
    Blocked,
}

/// Source position of a message: 1-based line, 0-based column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub line: u32,
    pub col: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationMessage {
    pub level: Level,
    pub text: String,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub at: Option<SourceSpan>,
}

/// Facts inferred from the tree without executing anything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InferredFacts {
    /// Fluid declared as a string literal on `create_empty_network(fluid=...)`
    pub fluid: Option<String>,
    /// Occurrence counts of recognized component constructor calls per kind
    pub components: BTreeMap<String, u32>,
}

/// Result of one validation call.
///
/// `ok` is derived from the messages ("no message has level blocked or
/// error") and emitted on serialization; it is never stored independently.
#[derive(Clone, Debug, Default)]
pub struct ValidationResult {
    pub messages: Vec<ValidationMessage>,
    pub inferred: InferredFacts,
}

impl ValidationResult {
    pub fn ok(&self) -> bool {
        !self
            .messages
            .iter()
            .any(|m| matches!(m.level, Level::Error | Level::Blocked))
    }

    fn with_error(text: String, at: Option<SourceSpan>) -> Self {
        Self {
            messages: vec![ValidationMessage {
                level: Level::Error,
                text,
                at,
            }],
            inferred: InferredFacts::default(),
        }
    }
}

impl Serialize for ValidationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ValidationResult", 3)?;
        state.serialize_field("ok", &self.ok())?;
        state.serialize_field("messages", &self.messages)?;
        state.serialize_field("inferred", &self.inferred)?;
        state.end()
    }
}

/// Statically validate untrusted source.
///
/// Purely a function of its input: identical code yields identical
/// messages and facts on every call.
pub fn validate(code: &str) -> ValidationResult {
    if code.trim().is_empty() {
        return ValidationResult::with_error("code is empty".to_string(), None);
    }

    let suite = match ast::Suite::parse(code, "<user_code>") {
        Ok(suite) => suite,
        Err(err) => {
            let at = walk::span_at(code, u32::from(err.offset));
            return ValidationResult::with_error(
                format!("SyntaxError: {}", err.error),
                Some(at),
            );
        }
    };

    let scan = walk::scan(code, &suite);
    ValidationResult {
        messages: scan.messages,
        inferred: scan.inferred,
    }
}

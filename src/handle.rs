use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A handle string that does not match either port grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed port handle: {0:?}")]
pub struct HandleFormatError(pub String);

/// Identifier of an input port: `input-N` with N a positive integer of any
/// length.
///
/// Only the canonical string is stored; identity, ordering and hashing all
/// go through it, so the index never needs to fit a machine integer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InputHandleId {
    canonical: String,
}

impl InputHandleId {
    pub fn new(index: std::num::NonZeroU32) -> Self {
        InputHandleId {
            canonical: format!("input-{index}"),
        }
    }

    pub fn parse(s: &str) -> Result<Self, HandleFormatError> {
        let Some(digits) = s.strip_prefix("input-") else {
            return Err(HandleFormatError(s.to_string()));
        };
        // No leading zeros, no sign, no empty index.
        if digits.is_empty()
            || digits.starts_with('0')
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(HandleFormatError(s.to_string()));
        }
        Ok(InputHandleId {
            canonical: s.to_string(),
        })
    }

    /// The numeric slot index. Saturates at `u64::MAX` for indices too large
    /// to represent; identity still distinguishes them via the canonical
    /// string.
    pub fn index(&self) -> u64 {
        self.digits().parse().unwrap_or(u64::MAX)
    }

    fn digits(&self) -> &str {
        &self.canonical["input-".len()..]
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

impl fmt::Display for InputHandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl TryFrom<String> for InputHandleId {
    type Error = HandleFormatError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        InputHandleId::parse(&s)
    }
}

impl From<InputHandleId> for String {
    fn from(id: InputHandleId) -> String {
        id.canonical
    }
}

/// Identifier of an output port: `output-<name>` with a lowercase
/// alphanumeric/hyphen name that does not start with a hyphen.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OutputHandleId {
    canonical: String,
}

fn valid_output_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_lowercase() || b.is_ascii_digit() => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

impl OutputHandleId {
    pub fn new(name: &str) -> Result<Self, HandleFormatError> {
        if !valid_output_name(name) {
            return Err(HandleFormatError(format!("output-{name}")));
        }
        Ok(OutputHandleId {
            canonical: format!("output-{name}"),
        })
    }

    pub fn parse(s: &str) -> Result<Self, HandleFormatError> {
        let Some(name) = s.strip_prefix("output-") else {
            return Err(HandleFormatError(s.to_string()));
        };
        if !valid_output_name(name) {
            return Err(HandleFormatError(s.to_string()));
        }
        Ok(OutputHandleId {
            canonical: s.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.canonical["output-".len()..]
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

impl fmt::Display for OutputHandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl TryFrom<String> for OutputHandleId {
    type Error = HandleFormatError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        OutputHandleId::parse(&s)
    }
}

impl From<OutputHandleId> for String {
    fn from(id: OutputHandleId) -> String {
        id.canonical
    }
}

/// Either side of a port reference when the direction is not yet known.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HandleId {
    Input(InputHandleId),
    Output(OutputHandleId),
}

impl HandleId {
    pub fn parse(s: &str) -> Result<Self, HandleFormatError> {
        if let Ok(input) = InputHandleId::parse(s) {
            return Ok(HandleId::Input(input));
        }
        if let Ok(output) = OutputHandleId::parse(s) {
            return Ok(HandleId::Output(output));
        }
        Err(HandleFormatError(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            HandleId::Input(h) => h.as_str(),
            HandleId::Output(h) => h.as_str(),
        }
    }
}

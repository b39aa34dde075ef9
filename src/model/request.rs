//! Immutable request values.

use crate::progress::Range;
use serde::{Deserialize, Serialize};

/// Context resolved by the caller before the request is issued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextVariable {
    File {
        uri: String,
    },
    Selection {
        uri: String,
        range: Range,
        text: String,
    },
    Symbol {
        uri: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<Range>,
    },
}

/// Message text plus context variables. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProbeRequest {
    message: String,
    #[serde(default)]
    variables: Vec<ContextVariable>,
}

impl ProbeRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            variables: Vec::new(),
        }
    }

    pub fn with_variable(mut self, variable: ContextVariable) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn variables(&self) -> &[ContextVariable] {
        &self.variables
    }
}

impl From<&str> for ProbeRequest {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ProbeRequest {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

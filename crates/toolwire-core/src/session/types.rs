//! Negotiated capabilities, catalog descriptors and content blocks.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Implementation;
use crate::{Result, ToolwireError};

/// Optional feature sets a peer can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Tools,
    Resources,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Tools => "tools",
            Capability::Resources => "resources",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability set returned by the peer from `initialize`.
///
/// A capability is advertised when its key is present and is neither `null`
/// nor `false`. An empty object counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
    /// Anything else the peer advertised, kept verbatim.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Capabilities {
    pub fn supports(&self, capability: Capability) -> bool {
        let flag = match capability {
            Capability::Tools => &self.tools,
            Capability::Resources => &self.resources,
        };
        matches!(flag, Some(value) if !value.is_null() && *value != Value::Bool(false))
    }

    pub fn supports_tools(&self) -> bool {
        self.supports(Capability::Tools)
    }

    pub fn supports_resources(&self) -> bool {
        self.supports(Capability::Resources)
    }
}

/// Result of the `initialize` call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    pub capabilities: Capabilities,
    pub server_info: Implementation,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Shape of a single tool parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamShape {
    /// JSON Schema `type`; usually a string, occasionally an array.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamShape {
    pub fn is_string(&self) -> bool {
        matches!(&self.kind, Some(Value::String(kind)) if kind == "string")
    }
}

/// Named parameters a tool accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputShape {
    #[serde(default)]
    pub properties: BTreeMap<String, ParamShape>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl InputShape {
    /// Names of string-typed parameters, the only kind solicited interactively.
    pub fn string_parameters(&self) -> Vec<&str> {
        self.properties
            .iter()
            .filter(|(_, shape)| shape.is_string())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }
}

/// A callable operation exposed by the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: InputShape,
}

/// A readable resource exposed by the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One block of tool output or resource contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlock {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How a content block should be shown to the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayContent {
    /// The text parsed as JSON.
    Structured(Value),
    /// The text, verbatim.
    Text(String),
    /// No text at all (images, blobs); the block as JSON.
    Raw(Value),
}

impl ContentBlock {
    /// Interpret the text as JSON when possible, else keep it raw.
    pub fn display(&self) -> DisplayContent {
        match &self.text {
            Some(text) => serde_json::from_str(text)
                .map(DisplayContent::Structured)
                .unwrap_or_else(|_| DisplayContent::Text(text.clone())),
            None => DisplayContent::Raw(serde_json::to_value(self).unwrap_or(Value::Null)),
        }
    }
}

impl fmt::Display for DisplayContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayContent::Structured(value) | DisplayContent::Raw(value) => {
                match serde_json::to_string_pretty(value) {
                    Ok(pretty) => f.write_str(&pretty),
                    Err(_) => write!(f, "{}", value),
                }
            }
            DisplayContent::Text(text) => f.write_str(text),
        }
    }
}

/// Output of a `tools/call`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: Vec<ContentBlock>,
    /// The tool ran but reported failure in its own output.
    pub is_error: bool,
}

/// Pull a content block array out of a call result.
pub(crate) fn content_blocks(result: &mut Value, field: &str) -> Result<Vec<ContentBlock>> {
    let blocks = result
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| ToolwireError::malformed(format!("result has no {} field", field)))?;
    serde_json::from_value(blocks)
        .map_err(|e| ToolwireError::malformed(format!("invalid {} field: {}", field, e)))
}

//! Typed invocation surface over a ready session.
//!
//! Failures from the correlator pass through unchanged.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::debug;

use super::types::{content_blocks, ContentBlock, ResourceDescriptor, ToolDescriptor, ToolOutput};
use super::Session;
use crate::rpc::methods;
use crate::Result;

impl Session {
    /// Invoke a tool with named string arguments.
    pub async fn call_tool(
        &self,
        tool: &ToolDescriptor,
        arguments: BTreeMap<String, String>,
    ) -> Result<ToolOutput> {
        debug!("Calling tool {} with {} argument(s)", tool.name, arguments.len());
        let mut result = self
            .correlator
            .call(
                methods::TOOLS_CALL,
                json!({
                    "name": tool.name,
                    "arguments": arguments,
                }),
            )
            .await?;

        let content = content_blocks(&mut result, "content")?;
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(ToolOutput { content, is_error })
    }

    /// Read a resource's contents.
    pub async fn read_resource(&self, resource: &ResourceDescriptor) -> Result<Vec<ContentBlock>> {
        debug!("Reading resource {}", resource.uri);
        let mut result = self
            .correlator
            .call(methods::RESOURCES_READ, json!({ "uri": resource.uri }))
            .await?;

        content_blocks(&mut result, "contents")
    }
}

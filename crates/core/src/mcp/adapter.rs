use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content as RmcpContent, ErrorData as McpError,
    ListToolsResult, PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool as RmcpTool,
};
use rmcp::service::RequestContext;
use rmcp::{RoleServer, ServerHandler};

use crate::dispatcher::{CallOptions, Content, Dispatcher};

/// Server-side binding between our [`Dispatcher`] and `rmcp`'s
/// `ServerHandler` trait. The teacher only ever drives `rmcp` as a client
/// (connecting *out* to MCP servers via `mcp/config.rs`); here the same
/// dependency is used in its server role to expose our own active set.
pub struct LarkMcpServer {
    dispatcher: Arc<Dispatcher>,
}

impl LarkMcpServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

fn to_rmcp_content(content: Content) -> RmcpContent {
    match content {
        Content::Text { text } => RmcpContent::text(text),
        Content::Json { json } => {
            RmcpContent::text(serde_json::to_string(&json).unwrap_or_default())
        }
        Content::Binary { bytes, mime_type } => {
            use base64::Engine;
            RmcpContent::text(format!(
                "data:{mime_type};base64,{}",
                base64::engine::general_purpose::STANDARD.encode(bytes)
            ))
        }
    }
}

#[async_trait::async_trait]
impl ServerHandler for LarkMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = self
            .dispatcher
            .list()
            .into_iter()
            .filter_map(|entry| {
                let name = entry.get("name")?.as_str()?.to_string();
                let description = entry.get("description").and_then(|d| d.as_str()).map(str::to_string);
                let schema = entry.get("inputSchema").cloned().unwrap_or_default();
                let schema_map = schema.as_object().cloned().unwrap_or_default();
                Some(RmcpTool {
                    name: name.into(),
                    description: description.map(Into::into),
                    input_schema: Arc::new(schema_map),
                    annotations: None,
                })
            })
            .collect();

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Null);

        match self
            .dispatcher
            .call(&request.name, args, CallOptions::default())
            .await
        {
            Ok(result) => Ok(CallToolResult {
                content: result.content.into_iter().map(to_rmcp_content).collect(),
                is_error: Some(false),
            }),
            Err(err) => {
                let envelope = err.into_envelope();
                Ok(CallToolResult {
                    content: vec![RmcpContent::text(
                        serde_json::to_string(&envelope).unwrap_or_default(),
                    )],
                    is_error: Some(true),
                })
            }
        }
    }
}

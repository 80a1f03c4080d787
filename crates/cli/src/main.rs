//! Process entry point: wires `lark-mcp-core`'s `Core` to stdio and serves
//! it over MCP. Reading a config file and parsing CLI flags are explicitly
//! out of scope for the core crate, so configuration here comes from
//! environment variables only; a real embedder is expected to replace this
//! binary with its own wiring.

mod tracing;

use std::sync::Arc;

use anyhow::{Context, Result};
use lark_mcp_core::config::ConfigOptions;
use lark_mcp_core::dispatcher::invoker::{InvocationResult, UpstreamInvoker};
use lark_mcp_core::error::CoreError;
use lark_mcp_core::mcp::LarkMcpServer;
use lark_mcp_core::tool::{AuthMode, Classification, ToolDescriptor, UpstreamBinding};
use lark_mcp_core::Core;

/// Placeholder invoker used until an embedder supplies the real upstream
/// client; the upstream API surface is explicitly out of scope (§1).
struct UnimplementedInvoker;

#[async_trait::async_trait]
impl UpstreamInvoker for UnimplementedInvoker {
    async fn invoke(
        &self,
        binding: &UpstreamBinding,
        _auth_mode: AuthMode,
        _args: &serde_json::Value,
        _timeout: std::time::Duration,
    ) -> Result<InvocationResult, CoreError> {
        Err(CoreError::Internal(format!(
            "no upstream invoker configured for `{}`",
            binding.opaque_id
        )))
    }
}

fn load_config() -> Result<ConfigOptions> {
    Ok(ConfigOptions {
        app_id: std::env::var("LARK_APP_ID").context("LARK_APP_ID must be set")?,
        app_secret: std::env::var("LARK_APP_SECRET").context("LARK_APP_SECRET must be set")?,
        user_access_token: std::env::var("LARK_USER_ACCESS_TOKEN").ok(),
        domain: std::env::var("LARK_DOMAIN").unwrap_or_else(|_| "https://open.feishu.cn".into()),
        tools: None,
        rate_limiting: Default::default(),
        cache: Default::default(),
        circuit_breaker: Default::default(),
        token_mode: Default::default(),
    })
}

fn placeholder_descriptors() -> Vec<ToolDescriptor> {
    vec![ToolDescriptor {
        name: "user.get".to_string(),
        description: "Fetch a user's profile by id.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": { "user_id": { "type": "string" } },
            "required": ["user_id"],
        }),
        classification: Classification::Read,
        auth_modes: vec![AuthMode::Tenant, AuthMode::User],
        binding: UpstreamBinding::opaque("user.get"),
    }]
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing::setup_logging();

    let config = load_config()?;
    let core = Core::new(&config, placeholder_descriptors(), Arc::new(UnimplementedInvoker))
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("failed to initialize core")?;

    ::tracing::info!(tools = core.registry.len(), "active tool set ready");

    let server = LarkMcpServer::new(core.dispatcher.clone());
    let service = rmcp::serve_server(server, rmcp::transport::stdio())
        .await
        .context("failed to start MCP stdio server")?;
    service.waiting().await.context("MCP server loop exited")?;
    Ok(())
}

//! MCP Adapter (§4.1 component list, §6.1): binds the active tool set to
//! the MCP protocol's `tools/list` and `tools/call` verbs. The wire
//! transports (stdio framing, SSE/HTTP) are opaque to the core and are
//! whatever `rmcp`'s transport layer provides to an embedder.

mod adapter;

pub use adapter::LarkMcpServer;

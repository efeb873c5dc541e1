//! The native MCP server handler: implements `rmcp`'s `ServerHandler` trait
//! directly against this process's own dynamic tool surface, rather than
//! proxying an upstream server.

use crate::resources;
use crate::state::BridgeState;
use crate::surface;
use rmcp::ErrorData;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Implementation, InitializeRequestParam, InitializeResult,
    ListResourcesResult, ListToolsResult, PaginatedRequestParam, ReadResourceRequestParam,
    ReadResourceResult, ServerCapabilities,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::ServerHandler;

#[derive(Clone)]
pub struct BridgeMcpServer {
    state: BridgeState,
}

impl BridgeMcpServer {
    #[must_use]
    pub fn new(state: BridgeState) -> Self {
        Self { state }
    }
}

impl ServerHandler for BridgeMcpServer {
    async fn initialize(
        &self,
        request: InitializeRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, ErrorData> {
        Ok(InitializeResult {
            protocol_version: request.protocol_version,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_tool_list_changed()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "bridge".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Device-to-Tool Bridge".to_string()),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Exposes projected device tools, virtual tools, and routing/device built-ins."
                    .to_string(),
            ),
        })
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: surface::list_tools(&self.state),
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let args = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or_else(|| serde_json::json!({}));
        let outcome = surface::call_tool(&self.state, &request.name, args).await;
        Ok(surface::outcome_to_call_result(outcome))
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        Ok(ListResourcesResult {
            resources: resources::list_resources(),
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        resources::read_resource(&self.state, &request.uri)
            .map_err(|e| ErrorData::resource_not_found(e, None))
    }
}

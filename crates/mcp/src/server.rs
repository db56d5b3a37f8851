//! MCP server exposing the gateway's single `execute_query` tool.

use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    schemars::{self, JsonSchema},
    service::RequestContext,
    tool, tool_handler, tool_router, ErrorData as McpError, RoleServer, ServerHandler,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use sqlgate_core::{EventEmitter, QueryOutcome, QueryRequest, TracingSink};
use sqlgate_db::Session;

use crate::notify::PeerNotificationSink;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteQueryInput {
    /// SQL statement. Named placeholders may be written as `:name` or `%(name)s`.
    pub query: String,
    /// Values for the statement's named placeholders.
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
}

impl From<ExecuteQueryInput> for QueryRequest {
    fn from(input: ExecuteQueryInput) -> Self {
        QueryRequest { statement: input.query, parameters: input.params }
    }
}

#[derive(Clone)]
pub struct SqlGatewayServer {
    session: Arc<Session>,
    events: EventEmitter,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl SqlGatewayServer {
    /// Query events go to the log; each call also forwards them to its caller.
    pub fn new(session: Arc<Session>) -> Self {
        Self::with_events(session, EventEmitter::new().with_sink(Arc::new(TracingSink)))
    }

    pub fn with_events(session: Arc<Session>, events: EventEmitter) -> Self {
        Self { session, events, tool_router: Self::tool_router() }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[tool(
        description = "Execute a SQL statement against the connected database. Returns a JSON array of row objects for queries, {\"status\": \"success\", \"rows_affected\": N} for other statements, or {\"error\": \"...\"} on failure."
    )]
    async fn execute_query(
        &self,
        Parameters(input): Parameters<ExecuteQueryInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let mut events = self.events.clone();
        events.subscribe(Arc::new(PeerNotificationSink::new(context.peer.clone())));

        let outcome = self.session.execute(input.into(), &events).await;
        Ok(tool_result(&outcome))
    }
}

#[tool_handler]
impl ServerHandler for SqlGatewayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_logging().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "SQL gateway over a single database connection. Call execute_query with a \
                 statement and optional named parameters; each call runs in its own transaction."
                    .to_string(),
            ),
        }
    }
}

/// The JSON text is the response either way; failures also raise `is_error`.
pub fn tool_result(outcome: &QueryOutcome) -> CallToolResult {
    let content = vec![Content::text(outcome.to_json())];
    if outcome.is_failure() {
        CallToolResult::error(content)
    } else {
        CallToolResult::success(content)
    }
}

use crate::config::ServerConfig;
use crate::error::{CadError, to_mcp_error};
use crate::model::{
    AddFilletResponse, AddSketchElementResponse, BooleanOperationResponse, ClearSessionResponse,
    CreateSketchPlaneResponse, CreateSketchResponse, DeleteSessionResponse, ExtrudeFeatureResponse,
    ListEntitiesResponse, RemoveEntityResponse, SessionInfoResponse, TessellateResponse,
};
use crate::state::AppState;
use crate::tools;
use anyhow::Result;
use rmcp::{
    ErrorData as McpError, Json, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
};
use std::sync::Arc;
use std::time::Instant;

const INSTRUCTIONS: &str = "\
CAD MCP: parametric 3D modeling through a sketch-based workflow.

WORKFLOW:
1) create_sketch_plane (XY/XZ/YZ) → returns plane_id
2) create_sketch on the plane → returns sketch_id
3) add_sketch_element (line/circle/rectangle) on the sketch; add_fillet to \
round a corner between two adjacent lines
4) extrude_feature to turn the sketch profile (or one element) into a solid \
feature_id; a closed profile yields a solid, an open chain a sheet body
5) boolean_operation (union/cut/intersect) combines two features; the tool \
shape is consumed and stays visible only as history
6) tessellate_model re-meshes a feature at a chosen quality (read-only)

RULES:
- Pass the same session_id on every call of one conversation; sessions are \
isolated workspaces and state never crosses them.
- Entity IDs are stable and never reused, even after clear_session.
- A rectangle is ONE element; fillet and extrude address it by its single ID.
- distance and radius must be positive; quality lies in [0.001, 1.0].
- Inspect state with list_entities / session_info; remove_entity needs \
cascade=true to take a subtree.

Every modeling call returns the visualization payload (mesh or profile) for \
immediate rendering; subscribed viewers receive the same payload as a push.";

#[derive(Clone)]
pub struct CadServer {
    state: Arc<AppState>,
    tool_router: ToolRouter<CadServer>,
}

impl CadServer {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let state = Arc::new(AppState::new(config));
        Self::from_state(state)
    }

    pub fn from_state(state: Arc<AppState>) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    pub async fn run_stdio(self) -> Result<()> {
        let service = self
            .serve(stdio())
            .await
            .inspect_err(|error| tracing::error!("serving error: {:?}", error))?;
        service.waiting().await?;
        Ok(())
    }

    fn ensure_tool_enabled(&self, tool: &str) -> Result<(), CadError> {
        tracing::debug!(tool, "tool invocation requested");
        if self.state.config().is_tool_enabled(tool) {
            Ok(())
        } else {
            Err(CadError::ToolDisabled(tool.to_string()))
        }
    }
}

/// Run a tool handler with the enablement gate and request metrics applied.
macro_rules! handle {
    ($self:ident, $name:literal, $params:ident, $handler:path) => {{
        $self.ensure_tool_enabled($name).map_err(to_mcp_error)?;
        let started = Instant::now();
        let result = $handler($self.state.clone(), $params).await;
        crate::metrics::METRICS.observe_request(
            $name,
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );
        result.map(Json).map_err(to_mcp_error)
    }};
}

#[tool_router]
impl CadServer {
    #[tool(
        name = "create_sketch_plane",
        description = "Create a sketch plane (XY, XZ, or YZ) at an optional origin"
    )]
    pub async fn create_sketch_plane(
        &self,
        Parameters(params): Parameters<tools::CreateSketchPlaneParams>,
    ) -> Result<Json<CreateSketchPlaneResponse>, McpError> {
        handle!(self, "create_sketch_plane", params, tools::create_sketch_plane)
    }

    #[tool(
        name = "create_sketch",
        description = "Create an empty sketch on an existing plane"
    )]
    pub async fn create_sketch(
        &self,
        Parameters(params): Parameters<tools::CreateSketchParams>,
    ) -> Result<Json<CreateSketchResponse>, McpError> {
        handle!(self, "create_sketch", params, tools::create_sketch)
    }

    #[tool(
        name = "add_sketch_element",
        description = "Add a line, circle, or rectangle to a sketch"
    )]
    pub async fn add_sketch_element(
        &self,
        Parameters(params): Parameters<tools::AddSketchElementParams>,
    ) -> Result<Json<AddSketchElementResponse>, McpError> {
        handle!(self, "add_sketch_element", params, tools::add_sketch_element)
    }

    #[tool(
        name = "add_fillet",
        description = "Round the corner between two adjacent sketch lines with a tangent arc"
    )]
    pub async fn add_fillet(
        &self,
        Parameters(params): Parameters<tools::AddFilletParams>,
    ) -> Result<Json<AddFilletResponse>, McpError> {
        handle!(self, "add_fillet", params, tools::add_fillet)
    }

    #[tool(
        name = "extrude_feature",
        description = "Extrude a sketch profile (or a single element) into a 3D feature"
    )]
    pub async fn extrude_feature(
        &self,
        Parameters(params): Parameters<tools::ExtrudeFeatureParams>,
    ) -> Result<Json<ExtrudeFeatureResponse>, McpError> {
        handle!(self, "extrude_feature", params, tools::extrude_feature)
    }

    #[tool(
        name = "boolean_operation",
        description = "Combine two features with union, cut, or intersect"
    )]
    pub async fn boolean_operation(
        &self,
        Parameters(params): Parameters<tools::BooleanOperationParams>,
    ) -> Result<Json<BooleanOperationResponse>, McpError> {
        handle!(self, "boolean_operation", params, tools::boolean_operation)
    }

    #[tool(
        name = "tessellate_model",
        description = "Tessellate a feature into a triangle mesh at a chosen quality (read-only)"
    )]
    pub async fn tessellate_model(
        &self,
        Parameters(params): Parameters<tools::TessellateParams>,
    ) -> Result<Json<TessellateResponse>, McpError> {
        handle!(self, "tessellate_model", params, tools::tessellate_model)
    }

    #[tool(
        name = "remove_entity",
        description = "Remove an entity; cascade=true removes its whole subtree"
    )]
    pub async fn remove_entity(
        &self,
        Parameters(params): Parameters<tools::RemoveEntityParams>,
    ) -> Result<Json<RemoveEntityResponse>, McpError> {
        handle!(self, "remove_entity", params, tools::remove_entity)
    }

    #[tool(
        name = "clear_session",
        description = "Remove every entity in the session; entity IDs are not reused afterwards"
    )]
    pub async fn clear_session(
        &self,
        Parameters(params): Parameters<tools::ClearSessionParams>,
    ) -> Result<Json<ClearSessionResponse>, McpError> {
        handle!(self, "clear_session", params, tools::clear_session)
    }

    #[tool(
        name = "list_entities",
        description = "List every entity in the session with kind, parent, and state"
    )]
    pub async fn list_entities(
        &self,
        Parameters(params): Parameters<tools::ListEntitiesParams>,
    ) -> Result<Json<ListEntitiesResponse>, McpError> {
        handle!(self, "list_entities", params, tools::list_entities)
    }

    #[tool(
        name = "session_info",
        description = "Summarize a session: entity counts, IDs, kernel backend"
    )]
    pub async fn session_info(
        &self,
        Parameters(params): Parameters<tools::SessionInfoParams>,
    ) -> Result<Json<SessionInfoResponse>, McpError> {
        handle!(self, "session_info", params, tools::session_info)
    }

    #[tool(
        name = "delete_session",
        description = "Destroy a session and release its kernel state"
    )]
    pub async fn delete_session(
        &self,
        Parameters(params): Parameters<tools::DeleteSessionParams>,
    ) -> Result<Json<DeleteSessionResponse>, McpError> {
        handle!(self, "delete_session", params, tools::delete_session)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for CadServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(INSTRUCTIONS.to_string()),
            ..ServerInfo::default()
        }
    }
}

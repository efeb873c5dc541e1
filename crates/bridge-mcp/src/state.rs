//! Shared handle to every store the external surface reads from or
//! mutates, passed explicitly through constructors rather than relying on
//! module-level globals.

use bridge_core::ports::PortStore;
use bridge_core::{
    AssetCache, CommandRouter, DeviceRegistry, PortRouter, ProjectionStore, RoutingMatrix,
    ToolRegistry, VirtualToolExecutor, VirtualToolStore,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct BridgeState {
    pub registry: Arc<DeviceRegistry>,
    pub ports: Arc<PortStore>,
    pub matrix: Arc<RoutingMatrix>,
    pub port_router: Arc<PortRouter>,
    pub projection: Arc<ProjectionStore>,
    pub tool_registry: Arc<ToolRegistry>,
    pub virtual_tools: Arc<VirtualToolStore>,
    pub virtual_executor: Arc<VirtualToolExecutor>,
    pub command_router: Arc<CommandRouter>,
    pub assets: Arc<AssetCache>,
    pub command_timeout: Duration,
}

impl BridgeState {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<DeviceRegistry>,
        ports: Arc<PortStore>,
        matrix: Arc<RoutingMatrix>,
        port_router: Arc<PortRouter>,
        projection: Arc<ProjectionStore>,
        tool_registry: Arc<ToolRegistry>,
        virtual_tools: Arc<VirtualToolStore>,
        virtual_executor: Arc<VirtualToolExecutor>,
        command_router: Arc<CommandRouter>,
        assets: Arc<AssetCache>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            ports,
            matrix,
            port_router,
            projection,
            tool_registry,
            virtual_tools,
            virtual_executor,
            command_router,
            assets,
            command_timeout,
        }
    }
}

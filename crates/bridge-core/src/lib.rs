//! Core in-memory stores and engines: device registry, command router,
//! port routing, tool projection, and virtual tools.

pub mod assets;
pub mod command;
pub mod error;
pub mod persist;
pub mod ports;
pub mod projection;
pub mod registry;
pub mod virtual_tool;

pub use assets::AssetCache;
pub use command::{CommandRouter, CommandWaiter};
pub use error::BridgeError;
pub use ports::{PortRouter, RoutingMatrix};
pub use projection::{ProjectionStore, ToolRegistry};
pub use registry::{DeviceRecord, DeviceRegistry, Protocol};
pub use virtual_tool::{VirtualToolExecutor, VirtualToolStore};

//! The external tool surface: a model-context-protocol server exposing
//! projected device tools, virtual tools, and a handful of built-ins, plus
//! the read-only MCP resources and the axum admin REST surface.
//!
//! Tool enumeration is a pure function of current store state — no
//! pre-registration step exists, so a projection reload or a fresh device
//! announce is visible on the very next `tools/list` call (see `DESIGN.md`
//! for why hot reload works this way).

pub mod admin;
pub mod builtins;
pub mod resources;
pub mod server;
pub mod state;
pub mod surface;

pub use server::BridgeMcpServer;
pub use state::BridgeState;

//! Wire-level contracts shared by every transport and the MCP surface:
//! topic grammar, payload shapes, canonical JSON, and command signing.

pub mod canonical;
pub mod error;
pub mod payloads;
pub mod signing;
pub mod topics;

pub use canonical::canonical_json;
pub use error::ErrorCode;
pub use payloads::{
    AnnouncePayload, Asset, ClaimPayload, CommandEnvelope, EventsPayload, EventsResult,
    PortDataPayload, PortSetPayload, PortsAnnouncePayload, SignedCommand, StatusPayload,
    ToolDescriptor,
};
pub use topics::{Leaf, Topic};

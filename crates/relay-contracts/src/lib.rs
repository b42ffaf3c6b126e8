// Public contracts for the chat orchestrator API.
// This crate defines the wire DTOs shared by relay-core and relay-api:
// tool descriptors/calls and SSE event payloads.

pub mod events;
pub mod tools;

pub use events::*;
pub use tools::*;

//! Typed connection and texture-update engine for a node-based texture
//! editor.
//!
//! The crate is organized around one data flow: a raw connection gesture
//! enters through [`middleware::ConnectionGate`], is checked by the pure
//! validator in [`graph`], becomes a persisted [`graph::Edge`] in a
//! [`graph::GraphSnapshot`], and the [`engine::UpdateEngine`] keeps compiled
//! GPU state in step with that snapshot one frame at a time. The
//! [`registry::TextureTypeRegistry`] is the immutable source of truth both
//! sides consult.

pub mod engine;
pub mod expr;
pub mod graph;
pub mod handle;
pub mod middleware;
pub mod registry;
pub mod wgsl;

pub use engine::{GpuValue, ShaderBackend, ShaderCache, ShaderHandle, UpdateEngine};
pub use expr::{ExpressionCache, FrameContext, LiteralValue, ParameterValue};
pub use graph::{
    Connection, ConnectionError, Edge, GraphSnapshot, NodeInstance, StrictConnection, validate,
};
pub use handle::{HandleId, InputHandleId, OutputHandleId};
pub use middleware::{ConnectionGate, ValidationOutcome};
pub use registry::{NodeCategory, NodeKind, TextureTypeRegistry};

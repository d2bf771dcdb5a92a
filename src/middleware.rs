//! The boundary between an untrusted editor surface and the graph core.
//!
//! Every connection gesture funnels through [`ConnectionGate`]: the outcome
//! is either a validated connection ready to become an edge, or a typed
//! rejection for the surface to present.

use crate::graph::{Connection, ConnectionError, Edge, GraphSnapshot, StrictConnection, validate};
use crate::registry::TextureTypeRegistry;

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Accepted(StrictConnection),
    Rejected(ConnectionError),
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted(_))
    }
}

/// The change set for one accepted connection: the edge to insert plus the
/// id of the edge it supersedes on the same input, if any. Hand both to
/// [`GraphSnapshot::apply_edge_change`] as one step.
#[derive(Debug, Clone)]
pub struct EdgeChange {
    pub add: Edge,
    pub remove: Option<String>,
}

pub struct ConnectionGate<'r> {
    registry: &'r TextureTypeRegistry,
}

impl<'r> ConnectionGate<'r> {
    pub fn new(registry: &'r TextureTypeRegistry) -> Self {
        ConnectionGate { registry }
    }

    /// The single entry point for connection gestures.
    pub fn on_connection_attempt(
        &self,
        raw: &Connection,
        graph: &GraphSnapshot,
    ) -> ValidationOutcome {
        match validate(raw, graph, self.registry) {
            Ok(conn) => ValidationOutcome::Accepted(conn),
            Err(err) => {
                log::debug!("rejected connection {} -> {}: {err}", raw.source, raw.target);
                ValidationOutcome::Rejected(err)
            }
        }
    }

    /// Mint the edge for an accepted connection and name the edge it
    /// replaces. Reconnecting an occupied input supersedes the old edge
    /// rather than stacking a second one.
    pub fn plan_edge_change(&self, graph: &GraphSnapshot, accepted: &StrictConnection) -> EdgeChange {
        let superseded = graph
            .incoming_edge(accepted.target(), accepted.target_handle())
            .map(|e| e.id.clone());
        EdgeChange {
            add: Edge::from_validated(accepted),
            remove: superseded,
        }
    }
}

//! Graph model: raw and validated connections, persisted edges, node
//! instances, the mutable snapshot the editor owns, and the pure connection
//! validator.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handle::{InputHandleId, OutputHandleId};
use crate::registry::{NodeKind, TextureTypeRegistry};

pub type NodeId = String;

/// A connection attempt as it arrives from the editor surface. Untrusted:
/// handles are plain strings, node ids may be stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub source: NodeId,
    pub source_handle: String,
    pub target: NodeId,
    pub target_handle: String,
}

/// A connection that has passed every validation step. Only the validator
/// constructs one, so holding a `StrictConnection` is proof the edge is
/// well-formed against the current graph and registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrictConnection {
    source: NodeId,
    source_handle: OutputHandleId,
    target: NodeId,
    target_handle: InputHandleId,
}

impl StrictConnection {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn source_handle(&self) -> &OutputHandleId {
        &self.source_handle
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn target_handle(&self) -> &InputHandleId {
        &self.target_handle
    }
}

/// A persisted edge. Handle fields are non-optional; legacy records go
/// through [`normalize_edge_records`] before they can become edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: NodeId,
    pub source_handle: OutputHandleId,
    pub target: NodeId,
    pub target_handle: InputHandleId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    /// Mint a new edge from a validated connection, stamped now.
    pub fn from_validated(conn: &StrictConnection) -> Self {
        let now = Utc::now();
        Edge {
            id: uuid::Uuid::new_v4().to_string(),
            source: conn.source.clone(),
            source_handle: conn.source_handle.clone(),
            target: conn.target.clone(),
            target_handle: conn.target_handle.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Raw persisted edge as older project files wrote it: handles may be null,
/// empty, or malformed. Exists only as input to [`normalize_edge_records`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRecord {
    pub id: String,
    pub source: NodeId,
    #[serde(default)]
    pub source_handle: Option<String>,
    pub target: NodeId,
    #[serde(default)]
    pub target_handle: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Load-time migration: keep records whose handles parse, drop the rest
/// with a warning. The runtime validator never sees optional handles.
pub fn normalize_edge_records(records: Vec<EdgeRecord>) -> Vec<Edge> {
    let mut edges = Vec::with_capacity(records.len());
    for record in records {
        let source_handle = record
            .source_handle
            .as_deref()
            .and_then(|s| OutputHandleId::parse(s).ok());
        let target_handle = record
            .target_handle
            .as_deref()
            .and_then(|s| InputHandleId::parse(s).ok());
        let (Some(source_handle), Some(target_handle)) = (source_handle, target_handle) else {
            log::warn!(
                "dropping edge {} ({} -> {}): missing or malformed handles",
                record.id,
                record.source,
                record.target
            );
            continue;
        };
        let now = Utc::now();
        edges.push(Edge {
            id: record.id,
            source: record.source,
            source_handle,
            target: record.target,
            target_handle,
            created_at: record.created_at.unwrap_or(now),
            updated_at: record.updated_at.unwrap_or(now),
        });
    }
    edges
}

/// One node on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInstance {
    pub id: NodeId,
    pub kind: NodeKind,
    pub parameters: BTreeMap<String, crate::expr::ParameterValue>,
}

impl NodeInstance {
    pub fn with_defaults(id: impl Into<NodeId>, kind: NodeKind, registry: &TextureTypeRegistry) -> Self {
        NodeInstance {
            id: id.into(),
            kind,
            parameters: registry.default_parameters(kind),
        }
    }
}

/// Why a connection attempt was rejected. Every variant carries enough to
/// render a user-facing message without reaching back into the graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("malformed {side} handle {handle:?}")]
    MalformedHandle { side: HandleSide, handle: String },
    #[error("unknown node {node_id:?}")]
    UnknownNode { node_id: NodeId },
    #[error("{kind} does not declare handle {handle:?}")]
    HandleNotDeclared { kind: NodeKind, handle: String },
    #[error("{source_kind} output cannot feed {handle} on {target_kind}")]
    IncompatibleKinds {
        source_kind: NodeKind,
        target_kind: NodeKind,
        handle: InputHandleId,
    },
    #[error("node {node_id:?} cannot connect to itself")]
    SelfConnection { node_id: NodeId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleSide {
    Source,
    Target,
}

impl std::fmt::Display for HandleSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HandleSide::Source => "source",
            HandleSide::Target => "target",
        })
    }
}

/// The editor's view of the document: nodes plus validated edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    pub nodes: BTreeMap<NodeId, NodeInstance>,
    pub edges: Vec<Edge>,
}

impl GraphSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: NodeInstance) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn node(&self, id: &str) -> Option<&NodeInstance> {
        self.nodes.get(id)
    }

    pub fn set_parameter(
        &mut self,
        id: &str,
        name: &str,
        value: crate::expr::ParameterValue,
    ) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        node.parameters.insert(name.to_string(), value);
        true
    }

    /// Remove a node and every edge touching it, in one step. Edges never
    /// outlive either endpoint in the snapshot itself; the engine still
    /// tolerates dangling edges that arrive through persisted files.
    pub fn remove_node(&mut self, id: &str) -> Option<NodeInstance> {
        let node = self.nodes.remove(id)?;
        self.edges.retain(|e| e.source != id && e.target != id);
        Some(node)
    }

    pub fn incoming_edge(&self, node_id: &str, handle: &InputHandleId) -> Option<&Edge> {
        self.edges
            .iter()
            .find(|e| e.target == node_id && &e.target_handle == handle)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Apply one edge change atomically: the removal and the insertion are
    /// either both visible or neither is. Inserting onto an occupied
    /// `(target, targetHandle)` slot replaces the prior edge, which is what
    /// keeps "at most one incoming edge per input" a structural invariant.
    pub fn apply_edge_change(&mut self, add: Option<Edge>, remove: Option<&str>) {
        if let Some(remove_id) = remove {
            self.edges.retain(|e| e.id != remove_id);
        }
        if let Some(edge) = add {
            self.edges
                .retain(|e| !(e.target == edge.target && e.target_handle == edge.target_handle));
            self.edges.push(edge);
        }
    }

    /// Deterministic topological order over the current nodes.
    ///
    /// Kahn's algorithm with a sorted ready queue, so equal graphs yield
    /// equal orders. Edges referencing missing nodes are skipped. Cycles
    /// cannot be built through the validator; if a hand-edited file smuggles
    /// one in, the remainder is appended in id order rather than wedging
    /// the caller's frame loop.
    pub fn topo_order(&self) -> Vec<NodeId> {
        let mut indeg: BTreeMap<&str, usize> =
            self.nodes.keys().map(|id| (id.as_str(), 0usize)).collect();
        let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();

        for e in &self.edges {
            if !indeg.contains_key(e.source.as_str()) || !indeg.contains_key(e.target.as_str()) {
                continue;
            }
            if let Some(d) = indeg.get_mut(e.target.as_str()) {
                *d += 1;
            }
            outgoing
                .entry(e.source.as_str())
                .or_default()
                .push(e.target.as_str());
        }

        // BTreeMap iteration keeps the ready queue sorted by node id.
        let mut queue: VecDeque<&str> = indeg
            .iter()
            .filter_map(|(id, d)| if *d == 0 { Some(*id) } else { None })
            .collect();
        let mut order: Vec<NodeId> = Vec::with_capacity(self.nodes.len());

        while let Some(n) = queue.pop_front() {
            order.push(n.to_string());
            if let Some(nexts) = outgoing.get(n) {
                for &m in nexts {
                    if let Some(d) = indeg.get_mut(m) {
                        *d -= 1;
                        if *d == 0 {
                            let pos = queue.iter().position(|q| *q > m).unwrap_or(queue.len());
                            queue.insert(pos, m);
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            for id in self.nodes.keys() {
                if !order.iter().any(|o| o == id) {
                    order.push(id.clone());
                }
            }
        }
        order
    }
}

/// Validate a raw connection attempt against the graph and registry.
///
/// Pure and synchronous: same inputs, same verdict, nothing mutated. Checks
/// short-circuit in a fixed order so the editor always reports the most
/// fundamental problem first.
pub fn validate(
    raw: &Connection,
    graph: &GraphSnapshot,
    registry: &TextureTypeRegistry,
) -> Result<StrictConnection, ConnectionError> {
    let source_handle = OutputHandleId::parse(&raw.source_handle).map_err(|_| {
        ConnectionError::MalformedHandle {
            side: HandleSide::Source,
            handle: raw.source_handle.clone(),
        }
    })?;
    let target_handle = InputHandleId::parse(&raw.target_handle).map_err(|_| {
        ConnectionError::MalformedHandle {
            side: HandleSide::Target,
            handle: raw.target_handle.clone(),
        }
    })?;

    let source_node = graph.node(&raw.source).ok_or_else(|| ConnectionError::UnknownNode {
        node_id: raw.source.clone(),
    })?;
    let target_node = graph.node(&raw.target).ok_or_else(|| ConnectionError::UnknownNode {
        node_id: raw.target.clone(),
    })?;

    let source_config = registry.config(source_node.kind);
    let target_config = registry.config(target_node.kind);

    if !source_config.declares_output(&source_handle) {
        return Err(ConnectionError::HandleNotDeclared {
            kind: source_node.kind,
            handle: source_handle.as_str().to_string(),
        });
    }
    if target_config.input(&target_handle).is_none() {
        return Err(ConnectionError::HandleNotDeclared {
            kind: target_node.kind,
            handle: target_handle.as_str().to_string(),
        });
    }

    if !registry.compatible(target_node.kind, &target_handle, source_node.kind) {
        return Err(ConnectionError::IncompatibleKinds {
            source_kind: source_node.kind,
            target_kind: target_node.kind,
            handle: target_handle,
        });
    }

    if raw.source == raw.target {
        return Err(ConnectionError::SelfConnection {
            node_id: raw.source.clone(),
        });
    }

    Ok(StrictConnection {
        source: raw.source.clone(),
        source_handle,
        target: raw.target.clone(),
        target_handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TextureTypeRegistry {
        TextureTypeRegistry::builtin().unwrap()
    }

    fn base_graph(registry: &TextureTypeRegistry) -> GraphSnapshot {
        let mut graph = GraphSnapshot::new();
        graph.add_node(NodeInstance::with_defaults("noise-1", NodeKind::Noise, registry));
        graph.add_node(NodeInstance::with_defaults("noise-2", NodeKind::Noise, registry));
        graph.add_node(NodeInstance::with_defaults("add-1", NodeKind::Add, registry));
        graph
    }

    fn raw(source: &str, source_handle: &str, target: &str, target_handle: &str) -> Connection {
        Connection {
            source: source.to_string(),
            source_handle: source_handle.to_string(),
            target: target.to_string(),
            target_handle: target_handle.to_string(),
        }
    }

    #[test]
    fn accepts_a_well_formed_connection() {
        let registry = registry();
        let graph = base_graph(&registry);
        let conn = validate(&raw("noise-1", "output-main", "add-1", "input-1"), &graph, &registry)
            .expect("valid connection");
        assert_eq!(conn.source(), "noise-1");
        assert_eq!(conn.target_handle().as_str(), "input-1");
    }

    #[test]
    fn malformed_handles_win_over_unknown_nodes() {
        let registry = registry();
        let graph = base_graph(&registry);
        let err = validate(&raw("ghost", "output-", "also-ghost", "input-1"), &graph, &registry)
            .unwrap_err();
        assert_eq!(
            err,
            ConnectionError::MalformedHandle {
                side: HandleSide::Source,
                handle: "output-".to_string()
            }
        );
    }

    #[test]
    fn unknown_nodes_are_reported_by_id() {
        let registry = registry();
        let graph = base_graph(&registry);
        let err = validate(&raw("ghost", "output-main", "add-1", "input-1"), &graph, &registry)
            .unwrap_err();
        assert_eq!(err, ConnectionError::UnknownNode { node_id: "ghost".to_string() });
    }

    #[test]
    fn undeclared_handles_are_rejected_on_both_ends() {
        let registry = registry();
        let graph = base_graph(&registry);

        let err = validate(&raw("noise-1", "output-alpha", "add-1", "input-1"), &graph, &registry)
            .unwrap_err();
        assert_eq!(
            err,
            ConnectionError::HandleNotDeclared {
                kind: NodeKind::Noise,
                handle: "output-alpha".to_string()
            }
        );

        let err = validate(&raw("noise-1", "output-main", "add-1", "input-3"), &graph, &registry)
            .unwrap_err();
        assert_eq!(
            err,
            ConnectionError::HandleNotDeclared {
                kind: NodeKind::Add,
                handle: "input-3".to_string()
            }
        );
    }

    #[test]
    fn incompatible_kinds_are_rejected() {
        let registry = registry();
        let mut graph = base_graph(&registry);
        graph.add_node(NodeInstance::with_defaults("displace-1", NodeKind::Displace, &registry));

        // Displace's map input accepts generators only.
        let err = validate(
            &raw("add-1", "output-main", "displace-1", "input-2"),
            &graph,
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, ConnectionError::IncompatibleKinds { .. }));
    }

    #[test]
    fn self_connections_are_rejected() {
        let registry = registry();
        let mut graph = GraphSnapshot::new();
        graph.add_node(NodeInstance::with_defaults("d", NodeKind::Displace, &registry));
        // Displace declares both ends, so only the self-loop rule fires.
        let err = validate(&raw("d", "output-main", "d", "input-1"), &graph, &registry).unwrap_err();
        assert_eq!(err, ConnectionError::SelfConnection { node_id: "d".to_string() });
    }

    #[test]
    fn validation_is_pure_and_repeatable() {
        let registry = registry();
        let graph = base_graph(&registry);
        let conn = raw("noise-1", "output-main", "add-1", "input-1");
        let first = validate(&conn, &graph, &registry);
        let second = validate(&conn, &graph, &registry);
        assert_eq!(first, second);
        assert_eq!(graph.edges.len(), 0);
    }

    #[test]
    fn apply_edge_change_replaces_the_occupant() {
        let registry = registry();
        let mut graph = base_graph(&registry);

        let first = validate(&raw("noise-1", "output-main", "add-1", "input-1"), &graph, &registry)
            .unwrap();
        graph.apply_edge_change(Some(Edge::from_validated(&first)), None);
        assert_eq!(graph.edges.len(), 1);

        let second = validate(&raw("noise-2", "output-main", "add-1", "input-1"), &graph, &registry)
            .unwrap();
        graph.apply_edge_change(Some(Edge::from_validated(&second)), None);
        assert_eq!(graph.edges.len(), 1);
        let handle = InputHandleId::parse("input-1").unwrap();
        assert_eq!(graph.incoming_edge("add-1", &handle).unwrap().source, "noise-2");
    }

    #[test]
    fn remove_node_cascades_to_edges() {
        let registry = registry();
        let mut graph = base_graph(&registry);
        let conn = validate(&raw("noise-1", "output-main", "add-1", "input-1"), &graph, &registry)
            .unwrap();
        graph.apply_edge_change(Some(Edge::from_validated(&conn)), None);

        graph.remove_node("noise-1");
        assert!(graph.edges.is_empty());
        assert!(graph.node("noise-1").is_none());
    }

    #[test]
    fn topo_order_is_deterministic_and_respects_edges() {
        let registry = registry();
        let mut graph = base_graph(&registry);
        let conn = validate(&raw("noise-2", "output-main", "add-1", "input-2"), &graph, &registry)
            .unwrap();
        graph.apply_edge_change(Some(Edge::from_validated(&conn)), None);

        let order = graph.topo_order();
        assert_eq!(order, graph.topo_order());
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
        assert!(pos("noise-2") < pos("add-1"));
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn topo_order_skips_dangling_edges() {
        let registry = registry();
        let mut graph = base_graph(&registry);
        let conn = validate(&raw("noise-1", "output-main", "add-1", "input-1"), &graph, &registry)
            .unwrap();
        let edge = Edge::from_validated(&conn);
        graph.apply_edge_change(Some(edge), None);
        graph.nodes.remove("noise-1");

        let order = graph.topo_order();
        assert_eq!(order.len(), 2);
        assert!(order.iter().any(|n| n == "add-1"));
    }

    #[test]
    fn legacy_edge_records_without_handles_are_dropped() {
        let records: Vec<EdgeRecord> = serde_json::from_value(serde_json::json!([
            {
                "id": "e1",
                "source": "noise-1",
                "sourceHandle": "output-main",
                "target": "add-1",
                "targetHandle": "input-1"
            },
            { "id": "e2", "source": "noise-2", "target": "add-1" },
            {
                "id": "e3",
                "source": "noise-2",
                "sourceHandle": "",
                "target": "add-1",
                "targetHandle": "input-2"
            }
        ]))
        .unwrap();

        let edges = normalize_edge_records(records);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].id, "e1");
        assert_eq!(edges[0].target_handle.as_str(), "input-1");
    }
}

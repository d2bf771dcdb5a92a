//! Per-frame update engine: keeps compiled GPU state in step with the graph
//! snapshot while allocating as little as possible.
//!
//! The backend is an injected trait with three calls. Everything here is
//! synchronous and driven by the host's frame loop; one `tick` per frame.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;

use crate::expr::{
    ExpressionCache, FrameContext, LiteralValue, ParameterValue, resolve_parameter,
};
use crate::graph::{GraphSnapshot, NodeId, NodeInstance};
use crate::handle::OutputHandleId;
use crate::registry::{NodeKind, TextureTypeRegistry, UniformConfig};

/// Opaque shader identity issued by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub u64);

/// A resolved texture input: which compiled shader feeds it, through which
/// output port.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureBinding {
    pub shader: ShaderHandle,
    pub output: OutputHandleId,
}

/// A uniform slot value as handed to the backend. `Texture(None)` is the
/// defined unbound state; shaders sample it as transparent black.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuValue {
    Scalar(f32),
    Bool(bool),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Texture(Option<TextureBinding>),
}

/// The three-call GPU surface the engine runs against.
pub trait ShaderBackend {
    fn allocate_shader(&mut self, source: &str) -> Result<ShaderHandle>;
    fn set_uniform(&mut self, shader: ShaderHandle, name: &str, value: &GpuValue) -> Result<()>;
    fn release_shader(&mut self, shader: ShaderHandle) -> Result<()>;
}

/// Compiled per-node state: the live shader plus the last value written to
/// each uniform slot, for change detection.
#[derive(Debug, Clone)]
pub struct CompiledRenderNode {
    pub node_id: NodeId,
    pub kind: NodeKind,
    pub shader: ShaderHandle,
    pub bindings: BTreeMap<String, GpuValue>,
}

/// All compiled nodes, keyed by node id. Owned by the host, mutated only by
/// [`UpdateEngine::tick`] and [`ShaderCache::release_all`].
#[derive(Debug, Default)]
pub struct ShaderCache {
    nodes: HashMap<NodeId, CompiledRenderNode>,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: &str) -> Option<&CompiledRenderNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Teardown: release every compiled shader.
    pub fn release_all(&mut self, backend: &mut dyn ShaderBackend) -> Result<()> {
        for (_, compiled) in self.nodes.drain() {
            backend.release_shader(compiled.shader)?;
        }
        Ok(())
    }
}

pub struct UpdateEngine<'r> {
    registry: &'r TextureTypeRegistry,
    exprs: ExpressionCache,
}

impl<'r> UpdateEngine<'r> {
    pub fn new(registry: &'r TextureTypeRegistry) -> Self {
        UpdateEngine {
            registry,
            exprs: ExpressionCache::new(),
        }
    }

    /// Advance compiled state by one frame.
    ///
    /// Deterministic: the same snapshot and frame context produce the same
    /// backend call sequence, and an unchanged frame produces no
    /// `set_uniform` calls at all. Shaders are reallocated only when a
    /// node's kind changed; everything else mutates in place.
    pub fn tick(
        &mut self,
        graph: &GraphSnapshot,
        cache: &mut ShaderCache,
        backend: &mut dyn ShaderBackend,
        ctx: &FrameContext,
    ) -> Result<()> {
        self.exprs.begin_frame();
        self.release_removed(graph, cache, backend)?;

        for node_id in graph.topo_order() {
            let Some(node) = graph.node(&node_id) else {
                continue;
            };
            self.rebuild_if_kind_changed(node, cache, backend)?;
            self.update_uniforms(node, graph, cache, backend, ctx)?;
        }
        Ok(())
    }

    fn release_removed(
        &mut self,
        graph: &GraphSnapshot,
        cache: &mut ShaderCache,
        backend: &mut dyn ShaderBackend,
    ) -> Result<()> {
        let mut removed: Vec<NodeId> = cache
            .nodes
            .keys()
            .filter(|id| !graph.nodes.contains_key(*id))
            .cloned()
            .collect();
        removed.sort();
        for id in removed {
            if let Some(compiled) = cache.nodes.remove(&id) {
                log::debug!("releasing shader for removed node {id}");
                backend.release_shader(compiled.shader)?;
            }
        }
        Ok(())
    }

    fn rebuild_if_kind_changed(
        &mut self,
        node: &NodeInstance,
        cache: &mut ShaderCache,
        backend: &mut dyn ShaderBackend,
    ) -> Result<()> {
        if let Some(compiled) = cache.nodes.get(&node.id) {
            if compiled.kind == node.kind {
                return Ok(());
            }
            log::debug!(
                "node {} changed kind {} -> {}, rebuilding shader",
                node.id,
                compiled.kind,
                node.kind
            );
            backend.release_shader(compiled.shader)?;
            cache.nodes.remove(&node.id);
        }

        let config = self.registry.config(node.kind);
        let shader = backend.allocate_shader(config.shader_source)?;
        cache.nodes.insert(
            node.id.clone(),
            CompiledRenderNode {
                node_id: node.id.clone(),
                kind: node.kind,
                shader,
                bindings: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn update_uniforms(
        &mut self,
        node: &NodeInstance,
        graph: &GraphSnapshot,
        cache: &mut ShaderCache,
        backend: &mut dyn ShaderBackend,
        ctx: &FrameContext,
    ) -> Result<()> {
        let config = self.registry.config(node.kind);

        // Uniform iteration follows the config's BTreeMap order, so the
        // backend call sequence is a function of the graph alone.
        let mut next: Vec<(&'static str, GpuValue)> = Vec::with_capacity(config.uniforms.len());
        for (&name, uniform) in &config.uniforms {
            let value = match uniform {
                UniformConfig::Texture => {
                    GpuValue::Texture(self.resolve_texture(node, name, graph, cache))
                }
                other => self.resolve_value(node, name, other, ctx),
            };
            next.push((name, value));
        }

        let Some(compiled) = cache.nodes.get_mut(&node.id) else {
            return Ok(());
        };
        for (name, value) in next {
            if compiled.bindings.get(name) == Some(&value) {
                continue;
            }
            if matches!(value, GpuValue::Texture(None))
                && config.input_for_uniform(name).is_some_and(|h| h.required)
            {
                log::warn!("node {}: required input {name} is unbound", node.id);
            }
            backend.set_uniform(compiled.shader, name, &value)?;
            compiled.bindings.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// Find the producer for a texture uniform. A missing edge, a dangling
    /// edge, or an uncompiled producer all resolve to unbound.
    fn resolve_texture(
        &self,
        node: &NodeInstance,
        uniform: &str,
        graph: &GraphSnapshot,
        cache: &ShaderCache,
    ) -> Option<TextureBinding> {
        let handle = self
            .registry
            .input_handles(node.kind)
            .iter()
            .find(|h| h.uniform == uniform)?;
        let edge = graph.incoming_edge(&node.id, &handle.id)?;
        if graph.node(&edge.source).is_none() {
            return None;
        }
        let producer = cache.node(&edge.source)?;
        Some(TextureBinding {
            shader: producer.shader,
            output: edge.source_handle.clone(),
        })
    }

    fn resolve_value(
        &mut self,
        node: &NodeInstance,
        name: &str,
        uniform: &UniformConfig,
        ctx: &FrameContext,
    ) -> GpuValue {
        let Some(param) = node.parameters.get(name) else {
            return default_gpu_value(uniform);
        };
        if matches!(param, ParameterValue::Expression(_)) && !uniform.accepts_expression() {
            log::warn!(
                "node {}: uniform {name} does not accept formulas, using default",
                node.id
            );
            return default_gpu_value(uniform);
        }
        match resolve_parameter(param, ctx, &mut self.exprs) {
            Ok(lit) => match coerce(uniform, &lit) {
                Some(value) => value,
                None => {
                    log::warn!(
                        "node {}: parameter {name} has the wrong shape, using default",
                        node.id
                    );
                    default_gpu_value(uniform)
                }
            },
            Err(err) => {
                log::warn!("node {}: expression for {name} failed ({err}), using default", node.id);
                default_gpu_value(uniform)
            }
        }
    }
}

/// Map a literal onto a uniform slot. A scalar broadcasts across vector
/// components; any other shape mismatch is rejected.
fn coerce(uniform: &UniformConfig, lit: &LiteralValue) -> Option<GpuValue> {
    match (uniform, lit) {
        (UniformConfig::Scalar { .. }, LiteralValue::Number(n)) => Some(GpuValue::Scalar(*n as f32)),
        (UniformConfig::Boolean { .. }, LiteralValue::Bool(b)) => Some(GpuValue::Bool(*b)),
        (UniformConfig::Boolean { .. }, LiteralValue::Number(n)) => Some(GpuValue::Bool(*n != 0.0)),
        (UniformConfig::Vec2 { .. }, LiteralValue::Vec2(v)) => {
            Some(GpuValue::Vec2([v[0] as f32, v[1] as f32]))
        }
        (UniformConfig::Vec2 { .. }, LiteralValue::Number(n)) => {
            Some(GpuValue::Vec2([*n as f32; 2]))
        }
        (UniformConfig::Vec3 { .. }, LiteralValue::Vec3(v)) => {
            Some(GpuValue::Vec3([v[0] as f32, v[1] as f32, v[2] as f32]))
        }
        (UniformConfig::Vec3 { .. }, LiteralValue::Number(n)) => {
            Some(GpuValue::Vec3([*n as f32; 3]))
        }
        (UniformConfig::Vec4 { .. }, LiteralValue::Vec4(v)) => Some(GpuValue::Vec4([
            v[0] as f32,
            v[1] as f32,
            v[2] as f32,
            v[3] as f32,
        ])),
        (UniformConfig::Vec4 { .. }, LiteralValue::Number(n)) => {
            Some(GpuValue::Vec4([*n as f32; 4]))
        }
        _ => None,
    }
}

fn default_gpu_value(uniform: &UniformConfig) -> GpuValue {
    match uniform {
        UniformConfig::Texture => GpuValue::Texture(None),
        UniformConfig::Scalar { default, .. } => GpuValue::Scalar(*default as f32),
        UniformConfig::Boolean { default } => GpuValue::Bool(*default),
        UniformConfig::Vec2 { default, .. } => {
            GpuValue::Vec2([default[0] as f32, default[1] as f32])
        }
        UniformConfig::Vec3 { default, .. } => {
            GpuValue::Vec3([default[0] as f32, default[1] as f32, default[2] as f32])
        }
        UniformConfig::Vec4 { default, .. } => GpuValue::Vec4([
            default[0] as f32,
            default[1] as f32,
            default[2] as f32,
            default[3] as f32,
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{ExpressionSource, ParameterValue};

    #[derive(Debug, Default)]
    struct CountingBackend {
        next: u64,
        allocations: usize,
        releases: usize,
        sets: usize,
    }

    impl ShaderBackend for CountingBackend {
        fn allocate_shader(&mut self, _source: &str) -> Result<ShaderHandle> {
            self.next += 1;
            self.allocations += 1;
            Ok(ShaderHandle(self.next))
        }

        fn set_uniform(&mut self, _s: ShaderHandle, _n: &str, _v: &GpuValue) -> Result<()> {
            self.sets += 1;
            Ok(())
        }

        fn release_shader(&mut self, _s: ShaderHandle) -> Result<()> {
            self.releases += 1;
            Ok(())
        }
    }

    fn setup() -> (TextureTypeRegistry, GraphSnapshot) {
        let registry = TextureTypeRegistry::builtin().unwrap();
        let mut graph = GraphSnapshot::new();
        graph.add_node(NodeInstance::with_defaults("n1", NodeKind::Noise, &registry));
        (registry, graph)
    }

    #[test]
    fn first_tick_allocates_and_binds_then_steady_state_is_silent() {
        let (registry, graph) = setup();
        let mut engine = UpdateEngine::new(&registry);
        let mut cache = ShaderCache::new();
        let mut backend = CountingBackend::default();
        let ctx = FrameContext::default();

        engine.tick(&graph, &mut cache, &mut backend, &ctx).unwrap();
        assert_eq!(backend.allocations, 1);
        assert_eq!(backend.sets, 4);

        engine.tick(&graph, &mut cache, &mut backend, &ctx).unwrap();
        assert_eq!(backend.allocations, 1);
        assert_eq!(backend.sets, 4);
        assert_eq!(backend.releases, 0);
    }

    #[test]
    fn expression_failure_degrades_to_the_default() {
        let (registry, mut graph) = setup();
        graph.set_parameter(
            "n1",
            "u_scale",
            ParameterValue::Expression(ExpressionSource::new("nope + 1")),
        );

        let mut engine = UpdateEngine::new(&registry);
        let mut cache = ShaderCache::new();
        let mut backend = CountingBackend::default();
        engine
            .tick(&graph, &mut cache, &mut backend, &FrameContext::default())
            .unwrap();

        let compiled = cache.node("n1").unwrap();
        assert_eq!(compiled.bindings.get("u_scale"), Some(&GpuValue::Scalar(4.0)));
    }

    #[test]
    fn formulas_on_non_formula_uniforms_degrade_to_the_default() {
        let (registry, mut graph) = setup();
        graph.set_parameter(
            "n1",
            "u_octaves",
            ParameterValue::Expression(ExpressionSource::new("t")),
        );

        let mut engine = UpdateEngine::new(&registry);
        let mut cache = ShaderCache::new();
        let mut backend = CountingBackend::default();
        engine
            .tick(&graph, &mut cache, &mut backend, &FrameContext { time: 7.0, frame: 1 })
            .unwrap();

        let compiled = cache.node("n1").unwrap();
        assert_eq!(compiled.bindings.get("u_octaves"), Some(&GpuValue::Scalar(3.0)));
    }

    #[test]
    fn kind_change_releases_and_reallocates() {
        let (registry, mut graph) = setup();
        let mut engine = UpdateEngine::new(&registry);
        let mut cache = ShaderCache::new();
        let mut backend = CountingBackend::default();
        let ctx = FrameContext::default();

        engine.tick(&graph, &mut cache, &mut backend, &ctx).unwrap();
        let first = cache.node("n1").unwrap().shader;

        graph.nodes.get_mut("n1").unwrap().kind = NodeKind::Limit;
        graph.nodes.get_mut("n1").unwrap().parameters = registry.default_parameters(NodeKind::Limit);
        engine.tick(&graph, &mut cache, &mut backend, &ctx).unwrap();

        assert_eq!(backend.releases, 1);
        assert_eq!(backend.allocations, 2);
        assert_ne!(cache.node("n1").unwrap().shader, first);
        assert_eq!(cache.node("n1").unwrap().kind, NodeKind::Limit);
    }

    #[test]
    fn removed_nodes_release_their_shaders() {
        let (registry, mut graph) = setup();
        let mut engine = UpdateEngine::new(&registry);
        let mut cache = ShaderCache::new();
        let mut backend = CountingBackend::default();
        let ctx = FrameContext::default();

        engine.tick(&graph, &mut cache, &mut backend, &ctx).unwrap();
        graph.remove_node("n1");
        engine.tick(&graph, &mut cache, &mut backend, &ctx).unwrap();

        assert_eq!(backend.releases, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn scalar_broadcasts_across_vector_components() {
        let uniform = UniformConfig::Vec2 {
            default: [0.0, 0.0],
            components: &["x", "y"],
            expression: true,
        };
        assert_eq!(
            coerce(&uniform, &LiteralValue::Number(2.0)),
            Some(GpuValue::Vec2([2.0, 2.0]))
        );
        assert_eq!(coerce(&uniform, &LiteralValue::Vec3([0.0; 3])), None);
    }
}

//! The texture type registry: the single source of truth for what each node
//! kind looks like on the canvas and on the GPU.
//!
//! Built once at startup, self-checked (including a naga parse of every
//! embedded shader source), and shared by reference into the validator and
//! the update engine. Lookup by kind is infallible because the kind set is a
//! closed enum.

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroU32;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::expr::{LiteralValue, ParameterValue};
use crate::handle::{InputHandleId, OutputHandleId};
use crate::wgsl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Noise,
    Add,
    Displace,
    Limit,
}

impl NodeKind {
    pub const ALL: [NodeKind; 4] = [
        NodeKind::Noise,
        NodeKind::Add,
        NodeKind::Displace,
        NodeKind::Limit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Noise => "Noise",
            NodeKind::Add => "Add",
            NodeKind::Displace => "Displace",
            NodeKind::Limit => "Limit",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCategory {
    Generator,
    Filter,
}

/// Schema for one uniform slot of a node kind.
///
/// Texture slots are fed by connections; every other variant carries its
/// default and whether the editor may bind a formula to it.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformConfig {
    Texture,
    Scalar {
        default: f64,
        expression: bool,
    },
    Boolean {
        default: bool,
    },
    Vec2 {
        default: [f64; 2],
        components: &'static [&'static str],
        expression: bool,
    },
    Vec3 {
        default: [f64; 3],
        components: &'static [&'static str],
        expression: bool,
    },
    Vec4 {
        default: [f64; 4],
        components: &'static [&'static str],
        expression: bool,
    },
}

impl UniformConfig {
    /// Whether a formula may be bound to this slot. The engine degrades a
    /// formula on a non-capable slot to the default, with a diagnostic.
    pub fn accepts_expression(&self) -> bool {
        match self {
            UniformConfig::Texture | UniformConfig::Boolean { .. } => false,
            UniformConfig::Scalar { expression, .. }
            | UniformConfig::Vec2 { expression, .. }
            | UniformConfig::Vec3 { expression, .. }
            | UniformConfig::Vec4 { expression, .. } => *expression,
        }
    }

    pub fn default_value(&self) -> Option<LiteralValue> {
        match self {
            UniformConfig::Texture => None,
            UniformConfig::Scalar { default, .. } => Some(LiteralValue::Number(*default)),
            UniformConfig::Boolean { default } => Some(LiteralValue::Bool(*default)),
            UniformConfig::Vec2 { default, .. } => Some(LiteralValue::Vec2(*default)),
            UniformConfig::Vec3 { default, .. } => Some(LiteralValue::Vec3(*default)),
            UniformConfig::Vec4 { default, .. } => Some(LiteralValue::Vec4(*default)),
        }
    }
}

/// One declared input port and the texture uniform it feeds.
#[derive(Debug, Clone)]
pub struct HandleConfig {
    pub id: InputHandleId,
    pub uniform: &'static str,
    pub description: &'static str,
    /// A required port still renders when unbound (the shader samples the
    /// unbound default); the engine flags it with a warning instead.
    pub required: bool,
    /// Source categories this port accepts. Empty means any.
    pub accepts: &'static [NodeCategory],
}

impl HandleConfig {
    pub fn accepts_category(&self, category: NodeCategory) -> bool {
        self.accepts.is_empty() || self.accepts.contains(&category)
    }
}

/// The complete contract for one node kind.
#[derive(Debug, Clone)]
pub struct TextureTypeConfig {
    pub kind: NodeKind,
    pub category: NodeCategory,
    pub inputs: Vec<HandleConfig>,
    pub outputs: Vec<OutputHandleId>,
    pub uniforms: BTreeMap<&'static str, UniformConfig>,
    pub shader_source: &'static str,
}

impl TextureTypeConfig {
    pub fn input(&self, id: &InputHandleId) -> Option<&HandleConfig> {
        self.inputs.iter().find(|h| &h.id == id)
    }

    pub fn input_for_uniform(&self, uniform: &str) -> Option<&HandleConfig> {
        self.inputs.iter().find(|h| h.uniform == uniform)
    }

    pub fn declares_output(&self, id: &OutputHandleId) -> bool {
        self.outputs.contains(id)
    }
}

#[derive(Debug)]
pub struct TextureTypeRegistry {
    // Indexed by NodeKind discriminant, dense and total.
    configs: [TextureTypeConfig; NodeKind::ALL.len()],
}

fn slot(n: u32) -> Result<InputHandleId> {
    let n = NonZeroU32::new(n).context("input slot index must be positive")?;
    Ok(InputHandleId::new(n))
}

impl TextureTypeRegistry {
    /// Build the built-in kind table and run the load-time self-check.
    ///
    /// Checked once here, never per frame: handle/uniform cross references,
    /// output uniqueness, and a naga parse of every shader source.
    pub fn builtin() -> Result<Self> {
        let main = OutputHandleId::new("main")?;

        let noise = TextureTypeConfig {
            kind: NodeKind::Noise,
            category: NodeCategory::Generator,
            inputs: Vec::new(),
            outputs: vec![main.clone()],
            uniforms: BTreeMap::from([
                ("u_scale", UniformConfig::Scalar { default: 4.0, expression: true }),
                (
                    "u_offset",
                    UniformConfig::Vec2 {
                        default: [0.0, 0.0],
                        components: &["x", "y"],
                        expression: true,
                    },
                ),
                ("u_octaves", UniformConfig::Scalar { default: 3.0, expression: false }),
                ("u_seamless", UniformConfig::Boolean { default: false }),
            ]),
            shader_source: wgsl::NOISE_FS,
        };

        let add = TextureTypeConfig {
            kind: NodeKind::Add,
            category: NodeCategory::Filter,
            inputs: vec![
                HandleConfig {
                    id: slot(1)?,
                    uniform: "u_texture_a",
                    description: "first operand",
                    required: true,
                    accepts: &[],
                },
                HandleConfig {
                    id: slot(2)?,
                    uniform: "u_texture_b",
                    description: "second operand",
                    required: true,
                    accepts: &[],
                },
            ],
            outputs: vec![main.clone()],
            uniforms: BTreeMap::from([
                ("u_texture_a", UniformConfig::Texture),
                ("u_texture_b", UniformConfig::Texture),
                ("u_mix", UniformConfig::Scalar { default: 0.5, expression: true }),
            ]),
            shader_source: wgsl::ADD_FS,
        };

        let displace = TextureTypeConfig {
            kind: NodeKind::Displace,
            category: NodeCategory::Filter,
            inputs: vec![
                HandleConfig {
                    id: slot(1)?,
                    uniform: "u_source",
                    description: "texture to displace",
                    required: true,
                    accepts: &[],
                },
                HandleConfig {
                    id: slot(2)?,
                    uniform: "u_map",
                    description: "height map driving the displacement",
                    required: true,
                    accepts: &[NodeCategory::Generator],
                },
            ],
            outputs: vec![main.clone()],
            uniforms: BTreeMap::from([
                ("u_source", UniformConfig::Texture),
                ("u_map", UniformConfig::Texture),
                ("u_strength", UniformConfig::Scalar { default: 0.1, expression: true }),
                (
                    "u_direction",
                    UniformConfig::Vec2 {
                        default: [1.0, 0.0],
                        components: &["x", "y"],
                        expression: true,
                    },
                ),
            ]),
            shader_source: wgsl::DISPLACE_FS,
        };

        let limit = TextureTypeConfig {
            kind: NodeKind::Limit,
            category: NodeCategory::Filter,
            inputs: vec![HandleConfig {
                id: slot(1)?,
                uniform: "u_source",
                description: "texture to clamp",
                required: true,
                accepts: &[],
            }],
            outputs: vec![main],
            uniforms: BTreeMap::from([
                ("u_source", UniformConfig::Texture),
                ("u_min", UniformConfig::Scalar { default: 0.0, expression: true }),
                ("u_max", UniformConfig::Scalar { default: 1.0, expression: true }),
                ("u_smooth", UniformConfig::Boolean { default: false }),
            ]),
            shader_source: wgsl::LIMIT_FS,
        };

        let registry = TextureTypeRegistry {
            configs: [noise, add, displace, limit],
        };
        registry.self_check()?;
        Ok(registry)
    }

    fn self_check(&self) -> Result<()> {
        for config in &self.configs {
            let kind = config.kind;
            for handle in &config.inputs {
                match config.uniforms.get(handle.uniform) {
                    Some(UniformConfig::Texture) => {}
                    Some(other) => {
                        return Err(anyhow!(
                            "{kind}: input {} maps to uniform {} which is {other:?}, not a texture",
                            handle.id,
                            handle.uniform
                        ));
                    }
                    None => {
                        return Err(anyhow!(
                            "{kind}: input {} maps to undeclared uniform {}",
                            handle.id,
                            handle.uniform
                        ));
                    }
                }
            }

            let mut seen_inputs = BTreeSet::new();
            for handle in &config.inputs {
                if !seen_inputs.insert(&handle.id) {
                    return Err(anyhow!("{kind}: duplicate input handle {}", handle.id));
                }
            }
            let mut seen_outputs = BTreeSet::new();
            for output in &config.outputs {
                if !seen_outputs.insert(output) {
                    return Err(anyhow!("{kind}: duplicate output handle {output}"));
                }
            }
            if config.outputs.is_empty() {
                return Err(anyhow!("{kind}: a texture node must declare an output"));
            }

            naga::front::wgsl::parse_str(config.shader_source)
                .map_err(|e| anyhow!("{kind}: shader source failed to parse: {e}"))?;
        }
        Ok(())
    }

    pub fn config(&self, kind: NodeKind) -> &TextureTypeConfig {
        &self.configs[kind as usize]
    }

    pub fn input_handles(&self, kind: NodeKind) -> &[HandleConfig] {
        &self.config(kind).inputs
    }

    /// Fresh default parameters for a newly created node. Values are copies;
    /// mutating one node's parameters can never bleed into another's.
    pub fn default_parameters(&self, kind: NodeKind) -> BTreeMap<String, ParameterValue> {
        self.config(kind)
            .uniforms
            .iter()
            .filter_map(|(name, uniform)| {
                uniform
                    .default_value()
                    .map(|v| (name.to_string(), ParameterValue::Literal(v)))
            })
            .collect()
    }

    /// Whether `source_kind` may feed `input` on a node of `target_kind`.
    ///
    /// Returns false for an undeclared input; callers that need to
    /// distinguish that case check declaration first.
    pub fn compatible(
        &self,
        target_kind: NodeKind,
        input: &InputHandleId,
        source_kind: NodeKind,
    ) -> bool {
        let Some(handle) = self.config(target_kind).input(input) else {
            return false;
        };
        handle.accepts_category(self.config(source_kind).category)
    }
}

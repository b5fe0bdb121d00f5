// SPDX-License-Identifier: MIT OR Apache-2.0
//! Values carried by node fields and copied along links.

use crate::anchor::AnchorType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Square grid of samples produced by noise and mask nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sampler2D {
    /// Number of samples per side
    pub size: usize,
    /// World distance between two samples
    pub step: f32,
    /// Row-major samples, `size * size` long
    pub data: Vec<f32>,
}

impl Sampler2D {
    /// Create a sampler filled with zeros
    pub fn new(size: usize, step: f32) -> Self {
        Self {
            size,
            step,
            data: vec![0.0; size * size],
        }
    }

    /// Sample at grid coordinates, `None` outside the grid
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if x >= self.size || y >= self.size {
            return None;
        }
        self.data.get(y * self.size + x).copied()
    }

    /// Whether the sample buffer holds exactly `size * size` samples
    pub fn is_well_formed(&self) -> bool {
        self.size.checked_mul(self.size) == Some(self.data.len())
    }

    /// Overwrite every sample of the grid with the result of `f(x, y, current)`.
    /// Samples past `size * size` are left alone.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(usize, usize, f32) -> f32) {
        let size = self.size;
        if size == 0 {
            return;
        }
        let cells = size.saturating_mul(size);
        for (i, sample) in self.data.iter_mut().take(cells).enumerate() {
            *sample = f(i % size, i / size, *sample);
        }
    }

    /// Smallest and largest sample, `None` when empty
    pub fn range(&self) -> Option<(f32, f32)> {
        let mut iter = self.data.iter().copied();
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }
}

/// A biome: identity, the terrain it modifies and its surface graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Biome {
    /// Biome identifier, expected unique within a biome graph
    pub id: i32,
    /// Display name
    pub name: String,
    /// Name of the graph used to paint the biome surface
    pub surface_graph: String,
    /// Terrain modified by the biome, if it was computed
    pub terrain: Option<Sampler2D>,
}

/// Terrain produced by merging biomes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedTerrain {
    /// Blended height samples
    pub terrain: Sampler2D,
    /// Surface graph for each biome id
    pub surfaces: IndexMap<i32, String>,
    /// Name of the materializer used to build the final mesh
    pub materializer: String,
}

/// Value that can be stored in a node field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i32),
    /// Float
    Float(f32),
    /// 2D vector
    Vector2([f32; 2]),
    /// 3D vector
    Vector3([f32; 3]),
    /// 4D vector
    Vector4([f32; 4]),
    /// Color
    Color([f32; 4]),
    /// String
    String(String),
    /// 2D sample grid
    Sampler2D(Sampler2D),
    /// Biome description
    Biome(Biome),
    /// Merged terrain
    Terrain(MergedTerrain),
}

impl FieldValue {
    /// Get the anchor type for this value
    pub fn anchor_type(&self) -> AnchorType {
        match self {
            Self::Bool(_) => AnchorType::Bool,
            Self::Int(_) => AnchorType::Int,
            Self::Float(_) => AnchorType::Float,
            Self::Vector2(_) => AnchorType::Vector2,
            Self::Vector3(_) => AnchorType::Vector3,
            Self::Vector4(_) => AnchorType::Vector4,
            Self::Color(_) => AnchorType::Color,
            Self::String(_) => AnchorType::String,
            Self::Sampler2D(_) => AnchorType::Sampler2D,
            Self::Biome(_) => AnchorType::Biome,
            Self::Terrain(_) => AnchorType::Terrain,
        }
    }

    /// Numeric view, integers are widened
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    /// Integer view
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// String view
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Sampler view
    pub fn as_sampler(&self) -> Option<&Sampler2D> {
        match self {
            Self::Sampler2D(s) => Some(s),
            _ => None,
        }
    }

    /// Biome view
    pub fn as_biome(&self) -> Option<&Biome> {
        match self {
            Self::Biome(b) => Some(b),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:.4}"),
            Self::Vector2(v) => write!(f, "{v:?}"),
            Self::Vector3(v) => write!(f, "{v:?}"),
            Self::Vector4(v) | Self::Color(v) => write!(f, "{v:?}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Sampler2D(s) => match s.range() {
                Some((lo, hi)) => write!(f, "sampler {0}x{0} [{lo:.3}, {hi:.3}]", s.size),
                None => write!(f, "sampler (empty)"),
            },
            Self::Biome(b) => write!(f, "biome #{} {:?}", b.id, b.name),
            Self::Terrain(t) => write!(
                f,
                "terrain {0}x{0}, {1} surfaces, {2:?}",
                t.terrain.size,
                t.surfaces.len(),
                t.materializer
            ),
        }
    }
}

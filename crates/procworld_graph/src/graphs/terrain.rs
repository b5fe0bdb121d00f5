// SPDX-License-Identifier: MIT OR Apache-2.0
//! Terrain generation nodes.
//!
//! Simple values, operations, noises, noise masks, biomes and debug
//! nodes, enough to build a heightmap from noise and merge biome terrains.

use crate::anchor::{AnchorType, FieldDecl};
use crate::node::{
    NodeBehavior, NodeCategory, NodeIo, NodeRegistry, NodeTypeDescriptor, ProcessContext,
    ProcessError,
};
use crate::value::{Biome, FieldValue, MergedTerrain, Sampler2D};
use indexmap::IndexMap;

/// Create the terrain node registry with all available node types
pub fn create_terrain_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    // ========================================================================
    // Simple values
    // ========================================================================

    registry.register(
        NodeTypeDescriptor::new("slider", "Slider", NodeCategory::SimpleValues, || {
            Box::new(Slider)
        })
        .with_description("Float value clamped to a range")
        .with_field(FieldDecl::output("value", AnchorType::Float).with_default(FieldValue::Float(0.5)))
        .with_field(FieldDecl::setting("min", AnchorType::Float).with_default(FieldValue::Float(0.0)))
        .with_field(FieldDecl::setting("max", AnchorType::Float).with_default(FieldValue::Float(1.0))),
    );

    // ========================================================================
    // Operations
    // ========================================================================

    registry.register(
        NodeTypeDescriptor::new("add", "Add", NodeCategory::Operations, || Box::new(Add))
            .with_description("Sum of every connected value")
            .with_field(
                FieldDecl::input("values", AnchorType::Float)
                    .allow(AnchorType::Int)
                    .multiple(1, 16),
            )
            .with_field(FieldDecl::output("sum", AnchorType::Float)),
    );

    // ========================================================================
    // Noises
    // ========================================================================

    registry.register(
        NodeTypeDescriptor::new("value_noise", "Value Noise", NodeCategory::Noises, || {
            Box::new(ValueNoise)
        })
        .with_description("Fractal value noise over one chunk")
        .with_field(FieldDecl::input("scale", AnchorType::Float).with_default(FieldValue::Float(0.05)))
        .with_field(FieldDecl::setting("octaves", AnchorType::Int).with_default(FieldValue::Int(3)))
        .with_field(FieldDecl::output("noise", AnchorType::Sampler2D)),
    );

    // ========================================================================
    // Noise masks
    // ========================================================================

    registry.register(
        NodeTypeDescriptor::new(
            "circle_noise_mask",
            "Circle Noise Mask",
            NodeCategory::NoiseMasks,
            || Box::new(CircleNoiseMask),
        )
        .with_description("Fades a noise out towards the chunk border")
        .with_field(FieldDecl::input("noise", AnchorType::Sampler2D))
        .with_field(FieldDecl::setting("radius", AnchorType::Float).with_default(FieldValue::Float(0.5)))
        .with_field(FieldDecl::setting("blur", AnchorType::Float).with_default(FieldValue::Float(0.2)))
        .with_field(FieldDecl::output("masked", AnchorType::Sampler2D)),
    );

    // ========================================================================
    // Biomes
    // ========================================================================

    registry.register(
        NodeTypeDescriptor::new("biome", "Biome", NodeCategory::Biomes, || Box::new(BiomeNode))
            .with_description("Wraps a terrain into a biome")
            .with_field(FieldDecl::input("terrain", AnchorType::Sampler2D))
            .with_field(FieldDecl::setting("id", AnchorType::Int).with_default(FieldValue::Int(0)))
            .with_field(
                FieldDecl::setting("biome_name", AnchorType::String)
                    .with_default(FieldValue::String("Biome".into())),
            )
            .with_field(
                FieldDecl::setting("surface_graph", AnchorType::String)
                    .with_default(FieldValue::String(String::new())),
            )
            .with_field(FieldDecl::output("biome", AnchorType::Biome)),
    );

    registry.register(
        NodeTypeDescriptor::new("biome_merger", "Biome Merger", NodeCategory::Biomes, || {
            Box::new(BiomeMerger)
        })
        .with_description("Blends biome terrains into the final terrain")
        .with_field(FieldDecl::input("biomes", AnchorType::Biome).multiple(1, 16))
        .with_field(
            FieldDecl::setting("materializer", AnchorType::String)
                .with_default(FieldValue::String("heightmap".into())),
        )
        .with_field(FieldDecl::output("terrain", AnchorType::Terrain)),
    );

    // ========================================================================
    // Debug
    // ========================================================================

    registry.register(
        NodeTypeDescriptor::new("debug_log", "Debug Log", NodeCategory::Debug, || {
            Box::new(DebugLog)
        })
        .with_description("Logs its input every pass")
        .with_field(FieldDecl::input("value", AnchorType::Any)),
    );

    registry
}

#[derive(Debug)]
struct Slider;

impl NodeBehavior for Slider {
    fn on_process(&mut self, io: &mut NodeIo<'_>, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        let min = io.float("min").unwrap_or(0.0);
        let max = io.float("max").unwrap_or(1.0).max(min);
        let value = io.float("value").unwrap_or(min).clamp(min, max);
        io.set("value", FieldValue::Float(value))?;
        Ok(())
    }
}

#[derive(Debug)]
struct Add;

impl NodeBehavior for Add {
    fn on_process(&mut self, io: &mut NodeIo<'_>, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        let sum = io.values("values").filter_map(FieldValue::as_float).sum::<f32>();
        io.set("sum", FieldValue::Float(sum))?;
        Ok(())
    }
}

fn lattice(seed: i32, x: i32, y: i32) -> f32 {
    let mut h = (x as u32).wrapping_mul(0x27d4_eb2d)
        ^ (y as u32).wrapping_mul(0x1656_67b1)
        ^ (seed as u32).wrapping_mul(0x9e37_79b9);
    h ^= h >> 15;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    (h & 0x00ff_ffff) as f32 / 0x00ff_ffff as f32
}

fn smooth(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

fn value_noise(seed: i32, x: f32, y: f32) -> f32 {
    let (x0, y0) = (x.floor(), y.floor());
    let (tx, ty) = (smooth(x - x0), smooth(y - y0));
    let (ix, iy) = (x0 as i32, y0 as i32);
    let top = lattice(seed, ix, iy) * (1.0 - tx) + lattice(seed, ix + 1, iy) * tx;
    let bottom = lattice(seed, ix, iy + 1) * (1.0 - tx) + lattice(seed, ix + 1, iy + 1) * tx;
    top * (1.0 - ty) + bottom * ty
}

#[derive(Debug)]
struct ValueNoise;

impl NodeBehavior for ValueNoise {
    fn on_process(&mut self, io: &mut NodeIo<'_>, ctx: &ProcessContext) -> Result<(), ProcessError> {
        let scale = io.float("scale").unwrap_or(0.05);
        let octaves = io.int("octaves").unwrap_or(3).clamp(1, 8);

        let mut sampler = Sampler2D::new(ctx.chunk_size, 1.0);
        sampler.for_each_mut(|x, y, _| {
            let (mut total, mut amplitude, mut frequency, mut norm) = (0.0, 1.0, 1.0, 0.0);
            for octave in 0..octaves {
                let seed = ctx.seed.wrapping_add(octave);
                total += value_noise(seed, x as f32 * scale * frequency, y as f32 * scale * frequency)
                    * amplitude;
                norm += amplitude;
                amplitude *= 0.5;
                frequency *= 2.0;
            }
            total / norm
        });
        io.set("noise", FieldValue::Sampler2D(sampler))?;
        Ok(())
    }
}

#[derive(Debug)]
struct CircleNoiseMask;

impl NodeBehavior for CircleNoiseMask {
    fn on_process(&mut self, io: &mut NodeIo<'_>, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        let mut masked = io
            .sampler("noise")
            .cloned()
            .ok_or_else(|| ProcessError::MissingInput("noise".into()))?;
        if !masked.is_well_formed() {
            return Err(ProcessError::Structural(format!(
                "Noise sampler of size {} holds {} samples",
                masked.size,
                masked.data.len()
            )));
        }
        let radius = io.float("radius").unwrap_or(0.5);
        let blur = io.float("blur").unwrap_or(0.2).max(f32::EPSILON);

        let center = (masked.size as f32 - 1.0) / 2.0;
        let extent = (masked.size as f32).max(1.0);
        masked.for_each_mut(|x, y, value| {
            let dx = (x as f32 - center) / extent;
            let dy = (y as f32 - center) / extent;
            let distance = (dx * dx + dy * dy).sqrt();
            let fade = ((radius - distance) / blur).clamp(0.0, 1.0);
            value * smooth(fade)
        });
        io.set("masked", FieldValue::Sampler2D(masked))?;
        Ok(())
    }
}

#[derive(Debug)]
struct BiomeNode;

impl NodeBehavior for BiomeNode {
    fn on_process(&mut self, io: &mut NodeIo<'_>, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        let biome = Biome {
            id: io.int("id").unwrap_or(0),
            name: io.string("biome_name").unwrap_or("Biome").to_string(),
            surface_graph: io.string("surface_graph").unwrap_or_default().to_string(),
            terrain: io.sampler("terrain").cloned(),
        };
        io.set("biome", FieldValue::Biome(biome))?;
        Ok(())
    }
}

#[derive(Debug)]
struct BiomeMerger;

impl BiomeMerger {
    fn merge(biomes: &[&Biome], materializer: String) -> Result<MergedTerrain, ProcessError> {
        if biomes.is_empty() {
            return Err(ProcessError::Structural(
                "No biome data, is a biome node linked to the merger?".into(),
            ));
        }

        let mut surfaces = IndexMap::new();
        let mut terrain: Option<Sampler2D> = None;
        for biome in biomes {
            let modified = biome.terrain.as_ref().ok_or_else(|| {
                ProcessError::Structural(format!(
                    "Can't access the terrain of biome {} ({})",
                    biome.id, biome.name
                ))
            })?;
            if !modified.is_well_formed() {
                return Err(ProcessError::Structural(format!(
                    "Biome {} terrain of size {} holds {} samples",
                    biome.id,
                    modified.size,
                    modified.data.len()
                )));
            }
            if terrain.is_none() {
                terrain = Some(modified.clone());
            } else if let Some(total) = terrain.as_mut() {
                if total.size != modified.size {
                    return Err(ProcessError::Structural(format!(
                        "Biome {} terrain is {}x{}, expected {}x{}",
                        biome.id, modified.size, modified.size, total.size, total.size
                    )));
                }
                for (sum, sample) in total.data.iter_mut().zip(&modified.data) {
                    *sum += sample;
                }
            }

            if surfaces.insert(biome.id, biome.surface_graph.clone()).is_some() {
                tracing::error!("Duplicate biome in the biome graph: {}, id: {}", biome.name, biome.id);
            }
        }

        let mut terrain = terrain.unwrap_or_else(|| Sampler2D::new(0, 1.0));
        let count = biomes.len() as f32;
        terrain.for_each_mut(|_, _, sum| sum / count);
        Ok(MergedTerrain {
            terrain,
            surfaces,
            materializer,
        })
    }
}

impl NodeBehavior for BiomeMerger {
    fn on_process(&mut self, io: &mut NodeIo<'_>, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        let materializer = io.string("materializer").unwrap_or("heightmap").to_string();
        let biomes: Vec<&Biome> = io.values("biomes").filter_map(FieldValue::as_biome).collect();
        let merged = Self::merge(&biomes, materializer)?;
        io.set("terrain", FieldValue::Terrain(merged))?;
        Ok(())
    }
}

#[derive(Debug)]
struct DebugLog;

impl NodeBehavior for DebugLog {
    fn on_process(&mut self, io: &mut NodeIo<'_>, ctx: &ProcessContext) -> Result<(), ProcessError> {
        match io.get("value") {
            Some(value) => tracing::info!(node = %io.node_id(), pass = ctx.pass, "{value}"),
            None => tracing::info!(node = %io.node_id(), pass = ctx.pass, "<empty>"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, GraphSettings, NodeIdAllocator};
    use crate::link::AnchorRef;
    use crate::node::NodeId;

    const CTX: ProcessContext = ProcessContext {
        chunk_size: 16,
        seed: 42,
        pass: 0,
    };

    fn biome(id: i32, fill: f32) -> Biome {
        let mut terrain = Sampler2D::new(2, 1.0);
        terrain.for_each_mut(|_, _, _| fill);
        Biome {
            id,
            name: format!("biome {id}"),
            surface_graph: format!("surface {id}"),
            terrain: Some(terrain),
        }
    }

    #[test]
    fn test_registry_categories() {
        let registry = create_terrain_registry();
        assert_eq!(registry.types().count(), 7);
        assert_eq!(registry.types_in_category(NodeCategory::Biomes).count(), 2);
        assert!(registry.accessor("add", "values").is_some_and(|a| a.multiple));
        assert!(registry.get("circle_noise_mask").is_some());
    }

    #[test]
    fn test_slider_clamps() {
        let registry = create_terrain_registry();
        let mut node = registry.create_node("slider", NodeId(1)).unwrap();
        node.set_field("value", Some(FieldValue::Float(3.0))).unwrap();
        node.process(&CTX).unwrap();
        assert_eq!(node.field("value"), Some(&FieldValue::Float(1.0)));
    }

    #[test]
    fn test_value_noise_is_deterministic() {
        let registry = create_terrain_registry();
        let mut a = registry.create_node("value_noise", NodeId(1)).unwrap();
        let mut b = registry.create_node("value_noise", NodeId(2)).unwrap();
        a.process(&CTX).unwrap();
        b.process(&CTX).unwrap();
        let noise = a.field("noise").and_then(FieldValue::as_sampler).unwrap();
        assert_eq!(noise.size, 16);
        assert_eq!(a.field("noise"), b.field("noise"));
        let (lo, hi) = noise.range().unwrap();
        assert!(lo >= -1e-4 && hi <= 1.0 + 1e-4 && lo < hi);
    }

    #[test]
    fn test_circle_mask_clears_corners() {
        let registry = create_terrain_registry();
        let mut mask = registry.create_node("circle_noise_mask", NodeId(1)).unwrap();
        assert!(matches!(mask.process(&CTX), Err(ProcessError::MissingInput(_))));

        let mut flat = Sampler2D::new(9, 1.0);
        flat.for_each_mut(|_, _, _| 1.0);
        mask.set_field("noise", Some(FieldValue::Sampler2D(flat))).unwrap();
        mask.process(&CTX).unwrap();
        let masked = mask.field("masked").and_then(FieldValue::as_sampler).unwrap();
        assert_eq!(masked.get(0, 0), Some(0.0));
        assert_eq!(masked.get(4, 4), Some(1.0));
    }

    #[test]
    fn test_malformed_noise_stops_mask() {
        let registry = create_terrain_registry();
        let mut mask = registry.create_node("circle_noise_mask", NodeId(1)).unwrap();
        let broken = Sampler2D {
            size: 0,
            step: 1.0,
            data: vec![0.5; 4],
        };
        mask.set_field("noise", Some(FieldValue::Sampler2D(broken))).unwrap();
        assert!(matches!(mask.process(&CTX), Err(ProcessError::Structural(_))));
        assert!(mask.field("masked").is_none());
    }

    #[test]
    fn test_merger_duplicate_ids_last_wins() {
        let mut second = biome(1, 3.0);
        second.surface_graph = "replacement".into();
        let first = biome(1, 1.0);
        let merged = BiomeMerger::merge(&[&first, &second], "heightmap".into()).unwrap();
        assert_eq!(merged.surfaces.len(), 1);
        assert_eq!(merged.surfaces.get(&1).map(String::as_str), Some("replacement"));
        assert_eq!(merged.terrain.get(1, 1), Some(2.0));
    }

    #[test]
    fn test_merger_structural_errors() {
        assert!(matches!(
            BiomeMerger::merge(&[], "heightmap".into()),
            Err(ProcessError::Structural(_))
        ));
        let mut barren = biome(2, 0.0);
        barren.terrain = None;
        assert!(matches!(
            BiomeMerger::merge(&[&barren], "heightmap".into()),
            Err(ProcessError::Structural(_))
        ));
    }

    #[test]
    fn test_noise_to_terrain_pipeline() {
        let registry = create_terrain_registry();
        let mut ids = NodeIdAllocator::new();
        let settings = GraphSettings {
            chunk_size: 8,
            seed: 7,
        };
        let mut graph = Graph::new("Terrain", settings, &mut ids);
        let mut add = |type_id: &str| {
            let node = registry.create_node(type_id, ids.allocate()).unwrap();
            graph.add_node(node)
        };
        let noise = add("value_noise");
        let mask = add("circle_noise_mask");
        let biome = add("biome");
        let merger = add("biome_merger");
        let log = add("debug_log");

        graph.attach(&AnchorRef::field(noise, "noise"), &AnchorRef::field(mask, "noise")).unwrap();
        graph.attach(&AnchorRef::field(mask, "masked"), &AnchorRef::field(biome, "terrain")).unwrap();
        graph.attach(&AnchorRef::field(biome, "biome"), &AnchorRef::slot(merger, "biomes", 0)).unwrap();
        graph.attach(&AnchorRef::field(mask, "masked"), &AnchorRef::field(log, "value")).unwrap();

        let stats = crate::evaluation::run_pass(&mut graph, 0, 64);
        assert!(stats.is_clean(), "{stats:?}");
        let terrain = match graph.node(merger).unwrap().field("terrain") {
            Some(FieldValue::Terrain(t)) => t,
            other => panic!("unexpected terrain {other:?}"),
        };
        assert_eq!(terrain.terrain.size, 8);
        assert_eq!(terrain.materializer, "heightmap");
    }
}

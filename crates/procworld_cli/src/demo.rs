// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in demo world: a noise machine feeding a single biome.

use procworld_graph::{AnchorRef, AnchorType, FieldValue, GraphSession, NodeId, SessionError};

/// Link two anchors of the current graph the way a user drags a link
fn drag_link(session: &mut GraphSession, from: AnchorRef, to: AnchorRef) -> Result<(), SessionError> {
    session.begin_link_drag(from)?;
    session.complete_link_drag(to)?;
    Ok(())
}

/// Populate an empty session with the demo graph.
///
/// The root graph exposes a `terrain` output. An `Elevation` subgraph turns
/// a scale value into a masked noise heightmap.
pub fn build(session: &mut GraphSession) -> Result<(), SessionError> {
    let root_output = {
        let root = session.root_mut();
        root.add_output_field("terrain", AnchorType::Terrain);
        root.output_node().id()
    };

    let slider = session.create_node_at("slider", [0.0, 0.0])?;
    session.set_field(slider, "value", FieldValue::Float(0.08))?;

    let machine = session.create_subgraph("Elevation");
    session.enter_subgraph(machine)?;
    let (input, output): (NodeId, NodeId) = {
        let graph = session.current_graph_mut();
        graph.add_input_field("scale", AnchorType::Float);
        graph.add_output_field("heightmap", AnchorType::Sampler2D);
        (graph.input_node().id(), graph.output_node().id())
    };
    let noise = session.create_node_at("value_noise", [200.0, 0.0])?;
    let mask = session.create_node_at("circle_noise_mask", [400.0, 0.0])?;
    session.set_field(mask, "radius", FieldValue::Float(0.45))?;
    drag_link(session, AnchorRef::field(input, "scale"), AnchorRef::field(noise, "scale"))?;
    drag_link(session, AnchorRef::field(noise, "noise"), AnchorRef::field(mask, "noise"))?;
    drag_link(session, AnchorRef::field(mask, "masked"), AnchorRef::field(output, "heightmap"))?;
    session.exit_subgraph()?;

    let biome = session.create_node_at("biome", [600.0, 0.0])?;
    session.set_field(biome, "id", FieldValue::Int(1))?;
    session.set_field(biome, "biome_name", FieldValue::String("Plains".into()))?;
    let merger = session.create_node_at("biome_merger", [800.0, 0.0])?;
    let log = session.create_node_at("debug_log", [200.0, 200.0])?;

    drag_link(session, AnchorRef::field(slider, "value"), AnchorRef::field(input, "scale"))?;
    drag_link(session, AnchorRef::field(slider, "value"), AnchorRef::field(log, "value"))?;
    drag_link(session, AnchorRef::field(output, "heightmap"), AnchorRef::field(biome, "terrain"))?;
    drag_link(session, AnchorRef::field(biome, "biome"), AnchorRef::slot(merger, "biomes", 0))?;
    drag_link(session, AnchorRef::field(merger, "terrain"), AnchorRef::field(root_output, "terrain"))?;

    tracing::info!(
        nodes = session.root().node_count(),
        subgraphs = session.root().subgraphs().len(),
        "Built demo graph"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use procworld_graph::graphs::terrain::create_terrain_registry;
    use procworld_graph::{EngineConfig, GraphFile};

    fn demo_session() -> GraphSession {
        let mut session = GraphSession::new(create_terrain_registry(), EngineConfig::default());
        build(&mut session).unwrap();
        session.enable().unwrap();
        session
    }

    #[test]
    fn test_demo_produces_terrain() {
        let mut session = demo_session();
        let stats = session.tick();
        assert!(stats.is_clean(), "{stats:?}");
        match session.root().output_node().field("terrain") {
            Some(FieldValue::Terrain(terrain)) => {
                assert_eq!(terrain.terrain.size, 64);
                assert_eq!(terrain.surfaces.len(), 1);
            }
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn test_demo_survives_save_and_load() {
        let mut session = demo_session();
        session.tick();
        let file = session.snapshot();
        let parsed = GraphFile::from_ron(&file.to_ron().unwrap()).unwrap();
        let mut restored =
            GraphSession::from_file(&parsed, create_terrain_registry(), EngineConfig::default()).unwrap();
        restored.enable().unwrap();
        assert!(restored.tick().is_clean());
        assert_eq!(
            restored.root().output_node().field("terrain"),
            session.root().output_node().field("terrain")
        );
    }
}

use serde::Serialize;

use crate::base_graph::grid::{GridEdgeKind, GridGraph};
use crate::error::Result;

/// Geo-graph JSON dump of a base graph, for debugging an embedding run.
/// Nodes carry id and point, edges their cost and settle flags.
#[derive(Debug, Serialize)]
struct GridNodeOut {
    id: usize,
    x: f64,
    y: f64,
    centre: bool,
    closed: bool,
}

#[derive(Debug, Serialize)]
struct GridEdgeOut {
    from: usize,
    to: usize,
    kind: &'static str,
    cost: f64,
    closed: bool,
    blocked: bool,
    res: u8,
    rndr_order: u32,
}

#[derive(Debug, Serialize)]
struct GridGraphOut {
    cell_size: f64,
    cols: usize,
    rows: usize,
    nodes: Vec<GridNodeOut>,
    edges: Vec<GridEdgeOut>,
}

/// Serialise the grid. With `settled_only`, only edges carrying a
/// routed combinatorial edge are written (the usual debug view).
pub fn write_grid_json<W: std::io::Write>(
    gg: &GridGraph,
    settled_only: bool,
    w: W,
) -> Result<()> {
    let nodes = gg
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| GridNodeOut {
            id: i,
            x: n.pos.x,
            y: n.pos.y,
            centre: n.dir.is_none(),
            closed: n.closed,
        })
        .collect();

    let edges = gg
        .edges
        .iter()
        .filter(|e| !settled_only || e.res_count > 0)
        .map(|e| GridEdgeOut {
            from: e.from.0,
            to: e.to.0,
            kind: match e.kind {
                GridEdgeKind::Sink => "sink",
                GridEdgeKind::Bend => "bend",
                GridEdgeKind::Cross => "cross",
                GridEdgeKind::Link { .. } => "link",
            },
            cost: e.cost,
            closed: e.closed,
            blocked: e.blocked,
            res: e.res_count,
            rndr_order: e.rndr_order,
        })
        .collect();

    let out = GridGraphOut {
        cell_size: gg.cell_size,
        cols: gg.cols,
        rows: gg.rows,
        nodes,
        edges,
    };
    serde_json::to_writer_pretty(w, &out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_graph::Penalties;
    use geo::{Coord, Rect};

    #[test]
    fn test_grid_json_has_nodes_and_links() {
        let bbox = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 100.0, y: 100.0 });
        let gg = GridGraph::new(bbox, 50.0, 10.0, Penalties::default());
        let mut buf = Vec::new();
        write_grid_json(&gg, false, &mut buf).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(v["cols"], 3);
        assert!(v["nodes"].as_array().unwrap().len() == 3 * 3 * 9);
        assert!(v["edges"].as_array().unwrap().iter().any(|e| e["kind"] == "link"));
    }

    #[test]
    fn test_settled_only_filter() {
        let bbox = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 100.0, y: 100.0 });
        let gg = GridGraph::new(bbox, 50.0, 10.0, Penalties::default());
        let mut buf = Vec::new();
        write_grid_json(&gg, true, &mut buf).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert!(v["edges"].as_array().unwrap().is_empty(), "nothing settled yet");
    }
}

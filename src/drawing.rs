use ahash::AHashMap;
use geo::Coord;
use serde::Serialize;

use crate::base_graph::grid::{GridEdgeIdx, GridEdgeKind, GridGraph, GridNodeIdx};
use crate::comb_graph::{CombEdgeIdx, CombGraph, CombNodeIdx};
use crate::geometry;
use crate::line_graph::{LineGraph, LineOcc};

/// Cost decomposition of a drawing: straight cell passes and link
/// lengths (`hop`), turn penalties (`bend`), station displacement
/// (`mv`), and density surcharges on shared links (`dense`).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FullScore {
    pub hop: f64,
    pub bend: f64,
    pub mv: f64,
    pub dense: f64,
}

impl FullScore {
    pub fn total(&self) -> f64 {
        self.hop + self.bend + self.mv + self.dense
    }
}

impl std::ops::AddAssign for FullScore {
    fn add_assign(&mut self, rhs: FullScore) {
        self.hop += rhs.hop;
        self.bend += rhs.bend;
        self.mv += rhs.mv;
        self.dense += rhs.dense;
    }
}

/// One routed combinatorial edge: its grid path in routing orientation
/// plus the cost decomposition recorded at draw time.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    /// Node sequence of the route, source centre to target centre.
    pub nodes: Vec<GridNodeIdx>,
    /// Edge sequence; terminal entries are the endpoint sinks.
    pub edges: Vec<GridEdgeIdx>,
    /// Routing ran target-to-source relative to the combinatorial edge.
    pub rev: bool,
    pub score: FullScore,
}

/// Reversible ledger of the embedding: which grid centre every routed
/// combinatorial node occupies and which grid edges every combinatorial
/// edge uses. The ledger and a base graph together form the mutable
/// state of the heuristic; applying and erasing the ledger against a
/// grid are exact inverses.
#[derive(Debug, Clone, Default)]
pub struct Drawing {
    routes: AHashMap<CombEdgeIdx, RouteEntry>,
    nd_pos: AHashMap<CombNodeIdx, GridNodeIdx>,
    /// Displacement penalty per settled node. Charged once per node, so
    /// it must not live inside an edge entry: erasing one incident edge
    /// would silently drop the other endpoint's penalty.
    nd_costs: AHashMap<CombNodeIdx, f64>,
    score_sum: f64,
}

impl Drawing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total cost; +inf while nothing is routed, so an empty drawing
    /// never wins a comparison.
    pub fn score(&self) -> f64 {
        if self.routes.is_empty() {
            f64::INFINITY
        } else {
            self.score_sum
        }
    }

    pub fn full_score(&self) -> FullScore {
        let mut s = FullScore::default();
        for r in self.routes.values() {
            s += r.score;
        }
        for &c in self.nd_costs.values() {
            s.mv += c;
        }
        s
    }

    pub fn num_routes(&self) -> usize {
        self.routes.len()
    }

    pub fn has_route(&self, e: CombEdgeIdx) -> bool {
        self.routes.contains_key(&e)
    }

    pub fn route(&self, e: CombEdgeIdx) -> Option<&RouteEntry> {
        self.routes.get(&e)
    }

    pub fn get_gr_nd(&self, cn: CombNodeIdx) -> Option<GridNodeIdx> {
        self.nd_pos.get(&cn).copied()
    }

    pub fn draw(&mut self, e: CombEdgeIdx, entry: RouteEntry) {
        self.score_sum += entry.score.total();
        if let Some(old) = self.routes.insert(e, entry) {
            self.score_sum -= old.score.total();
        }
    }

    pub fn set_nd(&mut self, cn: CombNodeIdx, centre: GridNodeIdx) {
        self.nd_pos.insert(cn, centre);
    }

    /// Record the once-only displacement penalty of a freshly settled
    /// node.
    pub fn set_nd_cost(&mut self, cn: CombNodeIdx, cost: f64) {
        let old = self.nd_costs.insert(cn, cost).unwrap_or(0.0);
        self.score_sum += cost - old;
    }

    pub fn erase(&mut self, e: CombEdgeIdx) {
        if let Some(old) = self.routes.remove(&e) {
            self.score_sum -= old.score.total();
        }
    }

    pub fn erase_nd(&mut self, cn: CombNodeIdx) {
        self.nd_pos.remove(&cn);
        if let Some(c) = self.nd_costs.remove(&cn) {
            self.score_sum -= c;
        }
    }

    /// Discard every record.
    pub fn crumble(&mut self) {
        self.routes.clear();
        self.nd_pos.clear();
        self.nd_costs.clear();
        self.score_sum = 0.0;
    }

    /// Re-apply the settle state of one routed edge onto a grid.
    pub fn apply_edge_to_grid(&self, e: CombEdgeIdx, gg: &mut GridGraph) {
        let Some(entry) = self.routes.get(&e) else {
            return;
        };
        for (i, &ge) in entry.edges.iter().enumerate() {
            match gg.edges[ge.0].kind {
                GridEdgeKind::Link { .. } => {
                    let from_port = entry.nodes[i];
                    let a = gg.centre_idx(gg.nodes[from_port.0].cell);
                    let b = gg.link_far_centre(ge, from_port);
                    gg.settle_edg(a, b, e);
                }
                GridEdgeKind::Bend | GridEdgeKind::Cross => {
                    let centre = gg.centre_idx(gg.nodes[entry.nodes[i].0].cell);
                    gg.inc_traversed(centre);
                }
                GridEdgeKind::Sink => {}
            }
        }
    }

    /// Reverse of `apply_edge_to_grid`; the ledger entry itself stays.
    pub fn erase_edge_from_grid(&self, e: CombEdgeIdx, gg: &mut GridGraph) {
        let Some(entry) = self.routes.get(&e) else {
            return;
        };
        for (i, &ge) in entry.edges.iter().enumerate() {
            match gg.edges[ge.0].kind {
                GridEdgeKind::Link { .. } => {
                    let from_port = entry.nodes[i];
                    let a = gg.centre_idx(gg.nodes[from_port.0].cell);
                    let b = gg.link_far_centre(ge, from_port);
                    gg.unsettle_edg(a, b);
                }
                GridEdgeKind::Bend | GridEdgeKind::Cross => {
                    let centre = gg.centre_idx(gg.nodes[entry.nodes[i].0].cell);
                    gg.dec_traversed(centre);
                }
                GridEdgeKind::Sink => {}
            }
        }
    }

    /// Re-apply every recorded settle onto a (possibly fresh) grid.
    pub fn apply_to_grid(&self, gg: &mut GridGraph) {
        for (&cn, &centre) in &self.nd_pos {
            gg.settle_nd(centre, cn);
        }
        for &e in self.routes.keys() {
            self.apply_edge_to_grid(e, gg);
        }
    }

    /// Reverse every recorded settle on a grid.
    pub fn erase_from_grid(&self, gg: &mut GridGraph) {
        for &e in self.routes.keys() {
            self.erase_edge_from_grid(e, gg);
        }
        for &cn in self.nd_pos.keys() {
            gg.unsettle_nd(cn);
        }
    }

    /// The port direction a routed edge uses at the centre settled for
    /// `cn`, if that end is routed.
    pub fn port_at(&self, e: CombEdgeIdx, cn_centre: GridNodeIdx, gg: &GridGraph) -> Option<u8> {
        let entry = self.routes.get(&e)?;
        if *entry.nodes.first()? == cn_centre {
            gg.nodes[entry.nodes.get(1)?.0].dir
        } else if *entry.nodes.last()? == cn_centre {
            gg.nodes[entry.nodes[entry.nodes.len() - 2].0].dir
        } else {
            None
        }
    }

    /// Convert the routed grid paths back into a line graph with
    /// octilinear polyline geometry. Contracted interior nodes are
    /// re-inserted along the grid course at their proportional
    /// geographic arc-length positions.
    pub fn get_line_graph(&self, gg: &GridGraph, cg: &CombGraph, input: &LineGraph) -> LineGraph {
        let mut out = LineGraph::new();
        for l in input.lines() {
            out.add_line(&l.id, &l.label, &l.color);
        }

        let mut nd_map: AHashMap<crate::line_graph::LineNodeIdx, crate::line_graph::LineNodeIdx> =
            AHashMap::new();

        for (ci, cn) in cg.nodes.iter().enumerate() {
            let pos = match self.nd_pos.get(&CombNodeIdx(ci)) {
                Some(&centre) => gg.nodes[centre.0].pos,
                None => cn.pos,
            };
            let o = out.add_nd(pos);
            out.nodes[o.0].stops = input.nodes[cn.parent.0].stops.clone();
            out.nodes[o.0].not_served = input.nodes[cn.parent.0].not_served.clone();
            nd_map.insert(cn.parent, o);
        }

        for (ei, ce) in cg.edges.iter().enumerate() {
            let Some(entry) = self.routes.get(&CombEdgeIdx(ei)) else {
                continue;
            };
            let mut course = self.grid_course(entry, gg);
            if entry.rev {
                course.reverse();
            }

            // arc-length fraction of every chain node along the
            // geographic reference course
            let total = geometry::polyline_length(&ce.geom).max(1e-12);
            let mut fracs = Vec::with_capacity(ce.nodes.len());
            fracs.push(0.0);
            let mut cum = 0.0;
            for link in &ce.chain {
                cum += geometry::polyline_length(&input.edges[link.edge.0].geom);
                fracs.push((cum / total).min(1.0));
            }

            // interior nodes re-enter at their fraction along the course
            for (k, &orig) in ce.nodes.iter().enumerate() {
                if nd_map.contains_key(&orig) {
                    continue;
                }
                let pos = geometry::interpolate_along_polyline(&course, fracs[k]);
                let o = out.add_nd(pos);
                out.nodes[o.0].stops = input.nodes[orig.0].stops.clone();
                out.nodes[o.0].not_served = input.nodes[orig.0].not_served.clone();
                nd_map.insert(orig, o);
            }

            for (k, link) in ce.chain.iter().enumerate() {
                let a = nd_map[&ce.nodes[k]];
                let b = nd_map[&ce.nodes[k + 1]];
                let mut geom = geometry::extract_sub_polyline(&course, fracs[k], fracs[k + 1]);
                geom[0] = out.nodes[a.0].pos;
                let l = geom.len();
                geom[l - 1] = out.nodes[b.0].pos;
                let oe = out.add_edg(a, b, geom);
                out.edges[oe.0].lines = input.edges[link.edge.0]
                    .lines
                    .iter()
                    .map(|occ| LineOcc {
                        line: occ.line,
                        direction: occ.direction.map(|d| nd_map[&d]),
                    })
                    .collect();
            }
        }

        out
    }

    /// Octilinear course of a route: the centre of every cell it enters,
    /// in routing orientation.
    fn grid_course(&self, entry: &RouteEntry, gg: &GridGraph) -> Vec<Coord<f64>> {
        let mut course = vec![gg.nodes[entry.nodes[0].0].pos];
        for (i, &ge) in entry.edges.iter().enumerate() {
            if matches!(gg.edges[ge.0].kind, GridEdgeKind::Link { .. }) {
                let far = gg.link_far_centre(ge, entry.nodes[i]);
                course.push(gg.nodes[far.0].pos);
            }
        }
        course
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_graph::Penalties;
    use crate::search::{CostModel, shortest_path};
    use geo::Rect;

    fn grid() -> GridGraph {
        let bbox = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 200.0, y: 200.0 });
        GridGraph::new(bbox, 50.0, 10.0, Penalties::default())
    }

    fn route(gg: &mut GridGraph, s: GridNodeIdx, t: GridNodeIdx) -> RouteEntry {
        gg.open_sink_fr(s, 0.0);
        gg.open_sink_to(t, 0.0);
        let p = shortest_path(gg, &[s], &[t], &CostModel::Plain, f64::INFINITY).expect("route");
        gg.close_sink_fr(s);
        gg.close_sink_to(t);
        RouteEntry {
            nodes: p.nodes,
            edges: p.edges,
            rev: false,
            score: FullScore {
                hop: p.cost,
                bend: 0.0,
                mv: 0.0,
                dense: 0.0,
            },
        }
    }

    #[test]
    fn test_score_is_infinite_while_empty() {
        let d = Drawing::new();
        assert!(d.score().is_infinite());
    }

    #[test]
    fn test_draw_erase_score_bookkeeping() {
        let mut gg = grid();
        let s = gg.centre_idx((0, 0));
        let t = gg.centre_idx((2, 0));
        let entry = route(&mut gg, s, t);
        let cost = entry.score.total();

        let mut d = Drawing::new();
        d.draw(CombEdgeIdx(0), entry);
        assert!((d.score() - cost).abs() < 1e-9);
        assert!((d.full_score().total() - cost).abs() < 1e-9);
        d.erase(CombEdgeIdx(0));
        assert!(d.score().is_infinite());
    }

    #[test]
    fn test_apply_erase_restores_grid_state() {
        let mut gg = grid();
        let s = gg.centre_idx((0, 0));
        let t = gg.centre_idx((3, 0));
        let entry = route(&mut gg, s, t);

        let mut d = Drawing::new();
        d.set_nd(CombNodeIdx(0), s);
        d.set_nd(CombNodeIdx(1), t);
        d.draw(CombEdgeIdx(0), entry);

        let before = gg.state_signature();
        d.apply_to_grid(&mut gg);
        assert_ne!(gg.state_signature(), before, "apply changes the grid");
        let mid = gg.centre_idx((1, 0));
        assert!(gg.nodes[mid.0].traversed > 0, "pass-through cell marked");
        d.erase_from_grid(&mut gg);
        assert_eq!(gg.state_signature(), before, "erase restores exactly");
    }

    #[test]
    fn test_applied_route_blocks_reuse() {
        let mut gg = grid();
        let s = gg.centre_idx((0, 0));
        let t = gg.centre_idx((3, 0));
        let entry = route(&mut gg, s, t);
        let link = entry
            .edges
            .iter()
            .copied()
            .find(|&e| matches!(gg.edges[e.0].kind, GridEdgeKind::Link { .. }))
            .unwrap();

        let mut d = Drawing::new();
        d.draw(CombEdgeIdx(0), entry);
        d.apply_to_grid(&mut gg);
        assert_eq!(gg.edges[link.0].res_count, 1);
        assert!(gg.edges[link.0].rndr_order > 0);
    }

    #[test]
    fn test_port_at_reports_departure_direction() {
        let mut gg = grid();
        let s = gg.centre_idx((0, 0));
        let t = gg.centre_idx((3, 0));
        let entry = route(&mut gg, s, t);
        let mut d = Drawing::new();
        d.draw(CombEdgeIdx(0), entry);
        // due east route leaves through port 2 and arrives through port 6
        assert_eq!(d.port_at(CombEdgeIdx(0), s, &gg), Some(2));
        assert_eq!(d.port_at(CombEdgeIdx(0), t, &gg), Some(6));
    }
}

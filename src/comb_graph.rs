use ahash::{AHashMap, AHashSet};
use geo::Coord;
use itertools::Itertools;

use crate::geometry;
use crate::line_graph::{LineEdgeIdx, LineGraph, LineNodeIdx, LineOcc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CombNodeIdx(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CombEdgeIdx(pub usize);

/// One original line-graph edge inside a combinatorial edge, with its
/// traversal direction along the chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainLink {
    pub edge: LineEdgeIdx,
    /// true if the original edge is traversed from -> to.
    pub forward: bool,
}

#[derive(Debug, Clone)]
pub struct CombNode {
    pub parent: LineNodeIdx,
    pub pos: Coord<f64>,
    pub adj: Vec<CombEdgeIdx>,
    /// Incident combinatorial edges sorted clockwise by the outgoing
    /// bearing of their first underlying edge.
    pub ordering: Vec<CombEdgeIdx>,
}

#[derive(Debug, Clone)]
pub struct CombEdge {
    pub from: CombNodeIdx,
    pub to: CombNodeIdx,
    /// The contracted chain, ordered from -> to.
    pub chain: Vec<ChainLink>,
    /// Underlying node sequence, length chain.len() + 1.
    pub nodes: Vec<LineNodeIdx>,
    /// Concatenated geographic course, oriented from -> to.
    pub geom: Vec<Coord<f64>>,
    /// Line set of the chain; directions point at the parent of either
    /// endpoint, or None for bidirectional lines.
    pub lines: Vec<LineOcc>,
}

impl CombEdge {
    pub fn get_from(&self) -> CombNodeIdx {
        self.from
    }

    pub fn get_to(&self) -> CombNodeIdx {
        self.to
    }

    pub fn get_other_nd(&self, n: CombNodeIdx) -> CombNodeIdx {
        if self.from == n { self.to } else { self.from }
    }
}

/// Contraction of a line graph: maximal chains of degree-2 nodes whose
/// edges carry the same (directed) line set collapse into single
/// combinatorial edges.
#[derive(Debug, Clone)]
pub struct CombGraph {
    pub nodes: Vec<CombNode>,
    pub edges: Vec<CombEdge>,
    node_map: AHashMap<LineNodeIdx, CombNodeIdx>,
}

impl CombGraph {
    pub fn new(g: &LineGraph, deg2_heur: bool) -> Self {
        let mut cg = CombGraph {
            nodes: Vec::new(),
            edges: Vec::new(),
            node_map: AHashMap::new(),
        };

        for n in g.node_indices() {
            if !deg2_heur || !Self::contractable(g, n) {
                let idx = CombNodeIdx(cg.nodes.len());
                cg.nodes.push(CombNode {
                    parent: n,
                    pos: g.nodes[n.0].pos,
                    adj: Vec::new(),
                    ordering: Vec::new(),
                });
                cg.node_map.insert(n, idx);
            }
        }

        // a pure degree-2 cycle has no anchor yet; promote its lowest node
        let mut seen: AHashSet<LineNodeIdx> = cg.node_map.keys().copied().collect();
        for n in g.node_indices() {
            if seen.contains(&n) || g.get_deg(n) == 0 {
                continue;
            }
            let mut cycle = vec![n];
            let mut prev = n;
            let mut cur = g.edges[g.nodes[n.0].adj[0].0].get_other_nd(n);
            while cur != n && !seen.contains(&cur) {
                cycle.push(cur);
                let next_e = g.nodes[cur.0]
                    .adj
                    .iter()
                    .copied()
                    .find(|&e| !g.edges[e.0].deleted && g.edges[e.0].get_other_nd(cur) != prev);
                match next_e {
                    Some(e) => {
                        prev = cur;
                        cur = g.edges[e.0].get_other_nd(cur);
                    }
                    None => break,
                }
            }
            seen.extend(cycle.iter().copied());
            if cur == n {
                let anchor = *cycle.iter().min().unwrap();
                let idx = CombNodeIdx(cg.nodes.len());
                cg.nodes.push(CombNode {
                    parent: anchor,
                    pos: g.nodes[anchor.0].pos,
                    adj: Vec::new(),
                    ordering: Vec::new(),
                });
                cg.node_map.insert(anchor, idx);
            }
        }

        cg.build_chains(g);
        cg.build_orderings(g);
        cg
    }

    /// A node contracts away iff it has degree 2, and its two edges carry
    /// the same line set with continuous directions, with no connection
    /// exception in between.
    fn contractable(g: &LineGraph, n: LineNodeIdx) -> bool {
        if g.get_deg(n) != 2 {
            return false;
        }
        let adj: Vec<LineEdgeIdx> = g.nodes[n.0]
            .adj
            .iter()
            .copied()
            .filter(|e| !g.edges[e.0].deleted)
            .collect();
        let (ea, eb) = (adj[0], adj[1]);
        if g.edges[ea.0].lines.len() != g.edges[eb.0].lines.len() {
            return false;
        }
        g.edges[ea.0]
            .lines
            .iter()
            .all(|occ| Self::continuation(g, n, ea, *occ, eb).is_some())
    }

    /// The occurrence of `occ.line` on `eb` continuing `ea` across `n`,
    /// if directions are compatible and no exception forbids it.
    fn continuation(
        g: &LineGraph,
        n: LineNodeIdx,
        ea: LineEdgeIdx,
        occ: LineOcc,
        eb: LineEdgeIdx,
    ) -> Option<LineOcc> {
        if !g.conn_occurs(n, occ.line, ea, eb) {
            return None;
        }
        let other_b = g.edges[eb.0].get_other_nd(n);
        g.edges[eb.0]
            .lines
            .iter()
            .copied()
            .find(|o| o.line == occ.line)
            .filter(|o| match (occ.direction, o.direction) {
                (None, None) => true,
                // towards n on a continues away from n on b, and vice versa
                (Some(d1), Some(d2)) => {
                    (d1 == n && d2 == other_b) || (d1 != n && d2 == n)
                }
                _ => false,
            })
    }

    fn build_chains(&mut self, g: &LineGraph) {
        let mut done: AHashSet<LineEdgeIdx> = AHashSet::new();
        for ci in 0..self.nodes.len() {
            let start_nd = self.nodes[ci].parent;
            let adj: Vec<LineEdgeIdx> = g.nodes[start_nd.0]
                .adj
                .iter()
                .copied()
                .filter(|e| !g.edges[e.0].deleted)
                .collect();
            for first in adj {
                if done.contains(&first) {
                    continue;
                }
                let mut chain = Vec::new();
                let mut nodes = vec![start_nd];
                let mut cur_nd = start_nd;
                let mut cur_e = first;
                loop {
                    done.insert(cur_e);
                    let forward = g.edges[cur_e.0].from == cur_nd;
                    chain.push(ChainLink {
                        edge: cur_e,
                        forward,
                    });
                    let next_nd = g.edges[cur_e.0].get_other_nd(cur_nd);
                    nodes.push(next_nd);
                    if self.node_map.contains_key(&next_nd) {
                        break;
                    }
                    let next_e = g.nodes[next_nd.0]
                        .adj
                        .iter()
                        .copied()
                        .find(|&e| !g.edges[e.0].deleted && e != cur_e)
                        .expect("interior chain node has a second edge");
                    cur_nd = next_nd;
                    cur_e = next_e;
                }

                let from = self.node_map[&start_nd];
                let to = self.node_map[nodes.last().unwrap()];

                let mut geom: Vec<Coord<f64>> = Vec::new();
                for link in &chain {
                    let eg = &g.edges[link.edge.0].geom;
                    let piece: Vec<Coord<f64>> = if link.forward {
                        eg.clone()
                    } else {
                        eg.iter().rev().copied().collect()
                    };
                    let skip = usize::from(!geom.is_empty());
                    geom.extend(piece.into_iter().skip(skip));
                }

                // canonicalise line directions against the chain ends
                let first_link = chain[0];
                let to_parent = *nodes.last().unwrap();
                let lines = g.edges[first_link.edge.0]
                    .lines
                    .iter()
                    .map(|occ| {
                        let direction = occ.direction.map(|d| {
                            let towards_end = if first_link.forward {
                                d == g.edges[first_link.edge.0].to
                            } else {
                                d == g.edges[first_link.edge.0].from
                            };
                            if towards_end { to_parent } else { start_nd }
                        });
                        LineOcc {
                            line: occ.line,
                            direction,
                        }
                    })
                    .collect();

                let ei = CombEdgeIdx(self.edges.len());
                self.edges.push(CombEdge {
                    from,
                    to,
                    chain,
                    nodes,
                    geom,
                    lines,
                });
                self.nodes[from.0].adj.push(ei);
                if to != from {
                    self.nodes[to.0].adj.push(ei);
                }
            }
        }
    }

    fn build_orderings(&mut self, g: &LineGraph) {
        for ci in 0..self.nodes.len() {
            let n = CombNodeIdx(ci);
            let parent = self.nodes[ci].parent;
            let ordering = self.nodes[ci]
                .adj
                .iter()
                .map(|&e| (e, self.edge_angle_at(g, n, e, parent)))
                .sorted_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
                .map(|(e, _)| e)
                .collect();
            self.nodes[ci].ordering = ordering;
        }
    }

    fn edge_angle_at(
        &self,
        g: &LineGraph,
        n: CombNodeIdx,
        e: CombEdgeIdx,
        parent: LineNodeIdx,
    ) -> f64 {
        let edge = &self.edges[e.0];
        let link = if edge.from == n {
            edge.chain[0]
        } else {
            *edge.chain.last().unwrap()
        };
        g.edge_angle(parent, link.edge)
    }

    pub fn get_deg(&self, n: CombNodeIdx) -> usize {
        self.nodes[n.0].adj.len()
    }

    pub fn get_line_deg(&self, n: CombNodeIdx) -> usize {
        self.nodes[n.0]
            .adj
            .iter()
            .map(|e| self.edges[e.0].lines.len())
            .sum()
    }

    pub fn comb_nd(&self, parent: LineNodeIdx) -> Option<CombNodeIdx> {
        self.node_map.get(&parent).copied()
    }

    /// Geographic bearing at which `e` leaves `n`.
    pub fn edge_bearing_at(&self, n: CombNodeIdx, e: CombEdgeIdx) -> f64 {
        let g = &self.edges[e.0].geom;
        if self.edges[e.0].from == n {
            geometry::bearing(g[0], g[1])
        } else {
            geometry::bearing(g[g.len() - 1], g[g.len() - 2])
        }
    }

    /// Clockwise distance from `a` to `b` in the edge ordering of `n`.
    pub fn clockwise_dist(&self, n: CombNodeIdx, a: CombEdgeIdx, b: CombEdgeIdx) -> usize {
        let ord = &self.nodes[n.0].ordering;
        let pa = ord.iter().position(|&e| e == a).expect("edge in ordering");
        let pb = ord.iter().position(|&e| e == b).expect("edge in ordering");
        (pb + ord.len() - pa) % ord.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_graph::LineGraph;

    fn chain_graph() -> LineGraph {
        // a - b - c - d with the same line, b and c degree 2
        let mut g = LineGraph::new();
        let l = g.add_line("m1", "M1", "#0000ff");
        let a = g.add_nd(Coord { x: 0.0, y: 0.0 });
        let b = g.add_nd(Coord { x: 100.0, y: 0.0 });
        let c = g.add_nd(Coord { x: 200.0, y: 0.0 });
        let d = g.add_nd(Coord { x: 300.0, y: 0.0 });
        for (f, t) in [(a, b), (b, c), (c, d)] {
            let e = g.add_edg(f, t, vec![]);
            g.edges[e.0].lines.push(LineOcc { line: l, direction: None });
        }
        g
    }

    #[test]
    fn test_contracts_degree_two_chain() {
        let g = chain_graph();
        let cg = CombGraph::new(&g, true);
        assert_eq!(cg.nodes.len(), 2, "only the chain endpoints remain");
        assert_eq!(cg.edges.len(), 1);
        let e = &cg.edges[0];
        assert_eq!(e.chain.len(), 3);
        assert_eq!(e.nodes.len(), 4);
        assert_eq!(e.geom.first().unwrap().x, 0.0);
        assert_eq!(e.geom.last().unwrap().x, 300.0);
    }

    #[test]
    fn test_no_heur_keeps_all_nodes() {
        let g = chain_graph();
        let cg = CombGraph::new(&g, false);
        assert_eq!(cg.nodes.len(), 4);
        assert_eq!(cg.edges.len(), 3);
    }

    #[test]
    fn test_line_set_change_stops_contraction() {
        let mut g = chain_graph();
        let l2 = g.add_line("m2", "M2", "#00ffff");
        // second line only on the middle edge: b and c stay
        g.edges[1].lines.push(LineOcc { line: l2, direction: None });
        let cg = CombGraph::new(&g, true);
        assert_eq!(cg.nodes.len(), 4);
        assert_eq!(cg.edges.len(), 3);
    }

    #[test]
    fn test_directed_line_continuation() {
        let mut g = LineGraph::new();
        let l = g.add_line("s1", "S1", "#333333");
        let a = g.add_nd(Coord { x: 0.0, y: 0.0 });
        let b = g.add_nd(Coord { x: 100.0, y: 0.0 });
        let c = g.add_nd(Coord { x: 200.0, y: 0.0 });
        let e1 = g.add_edg(a, b, vec![]);
        let e2 = g.add_edg(b, c, vec![]);
        // directed a -> b -> c: on e1 towards b, on e2 towards c
        g.edges[e1.0].lines.push(LineOcc { line: l, direction: Some(b) });
        g.edges[e2.0].lines.push(LineOcc { line: l, direction: Some(c) });
        let cg = CombGraph::new(&g, true);
        assert_eq!(cg.edges.len(), 1, "continuous direction contracts");
        let occ = cg.edges[0].lines[0];
        assert!(occ.direction.is_some());

        // flip e2: now directed back towards b, not continuous
        g.edges[e2.0].lines[0] = LineOcc { line: l, direction: Some(b) };
        let cg = CombGraph::new(&g, true);
        assert_eq!(cg.edges.len(), 2, "direction break stops contraction");
    }

    #[test]
    fn test_conn_exception_stops_contraction() {
        let mut g = chain_graph();
        let l = g.line_by_id("m1").unwrap();
        let b = LineNodeIdx(1);
        g.add_conn_exc(b, l, LineEdgeIdx(0), LineEdgeIdx(1));
        let cg = CombGraph::new(&g, true);
        assert_eq!(cg.edges.len(), 2, "exception at b splits the chain");
    }

    #[test]
    fn test_clockwise_ordering_and_dist() {
        let mut g = LineGraph::new();
        let c = g.add_nd(Coord { x: 0.0, y: 0.0 });
        let n = g.add_nd(Coord { x: 0.0, y: 100.0 });
        let e = g.add_nd(Coord { x: 100.0, y: 0.0 });
        let s = g.add_nd(Coord { x: 0.0, y: -100.0 });
        let w = g.add_nd(Coord { x: -100.0, y: 0.0 });
        for t in [n, e, s, w] {
            g.add_edg(c, t, vec![]);
        }
        let cg = CombGraph::new(&g, true);
        let cn = cg.comb_nd(c).unwrap();
        assert_eq!(cg.get_deg(cn), 4);
        let ord = &cg.nodes[cn.0].ordering;
        assert_eq!(ord.len(), 4);
        let first = ord[0];
        let second = ord[1];
        assert_eq!(cg.clockwise_dist(cn, first, second), 1);
        assert_eq!(cg.clockwise_dist(cn, second, first), 3);
        assert_eq!(cg.clockwise_dist(cn, first, first), 0);
    }

    #[test]
    fn test_ordering_is_deterministic() {
        let g = chain_graph();
        let a = CombGraph::new(&g, true);
        let b = CombGraph::new(&g, true);
        assert_eq!(a.nodes.len(), b.nodes.len());
        for (x, y) in a.nodes.iter().zip(b.nodes.iter()) {
            assert_eq!(x.ordering, y.ordering);
        }
    }
}

use ahash::{AHashMap, AHashSet};
use geo::{Coord, Rect};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{LayoutError, Result};
use crate::geometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineNodeIdx(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineEdgeIdx(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineIdx(pub usize);

/// A named transit line (route).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Line {
    pub id: String,
    pub label: String,
    pub color: String,
}

/// A station attached to a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub id: String,
    pub name: String,
}

/// Occurrence of a line on an edge.
/// direction: None = bidirectional, Some(node) = directed towards that node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineOcc {
    pub line: LineIdx,
    pub direction: Option<LineNodeIdx>,
}

/// How an incident edge leaves a node: the edge plus its outgoing bearing
/// in degrees, clockwise from north.
#[derive(Debug, Clone, Copy)]
pub struct NodeFront {
    pub edge: LineEdgeIdx,
    pub angle: f64,
}

#[derive(Debug, Clone)]
pub struct LineNode {
    pub pos: Coord<f64>,
    pub stops: Vec<Stop>,
    pub adj: Vec<LineEdgeIdx>,
    /// Lines passing this station without serving it.
    pub not_served: AHashSet<LineIdx>,
    /// Connection exceptions: for a line, edge pairs between which the
    /// line cannot continue at this node.
    pub conn_exc: AHashMap<LineIdx, AHashMap<LineEdgeIdx, AHashSet<LineEdgeIdx>>>,
    /// How many input points were merged into this node (weighted centroid).
    pub merge_count: usize,
    pub deleted: bool,
}

#[derive(Debug, Clone)]
pub struct LineEdge {
    pub from: LineNodeIdx,
    pub to: LineNodeIdx,
    /// Geographic course, oriented from -> to.
    pub geom: Vec<Coord<f64>>,
    pub lines: Vec<LineOcc>,
    pub deleted: bool,
}

impl LineEdge {
    pub fn get_other_nd(&self, n: LineNodeIdx) -> LineNodeIdx {
        if self.from == n { self.to } else { self.from }
    }
}

/// Undirected transit line network with geographic geometry.
///
/// Arena representation: nodes and edges live in flat vectors addressed by
/// stable indices; removal tombstones instead of shifting. Settle state and
/// every derived structure then reduce to plain index maps, and the graph
/// is Send for the parallel local search.
#[derive(Debug, Clone, Default)]
pub struct LineGraph {
    pub nodes: Vec<LineNode>,
    pub edges: Vec<LineEdge>,
    lines: Vec<Line>,
    line_ids: AHashMap<String, LineIdx>,
}

impl LineGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_line(&mut self, id: &str, label: &str, color: &str) -> LineIdx {
        if let Some(&idx) = self.line_ids.get(id) {
            return idx;
        }
        let idx = LineIdx(self.lines.len());
        self.lines.push(Line {
            id: id.to_string(),
            label: label.to_string(),
            color: color.to_string(),
        });
        self.line_ids.insert(id.to_string(), idx);
        idx
    }

    pub fn get_line(&self, idx: LineIdx) -> &Line {
        &self.lines[idx.0]
    }

    pub fn line_by_id(&self, id: &str) -> Option<LineIdx> {
        self.line_ids.get(id).copied()
    }

    pub fn num_lines(&self) -> usize {
        self.lines.len()
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn add_nd(&mut self, pos: Coord<f64>) -> LineNodeIdx {
        let idx = LineNodeIdx(self.nodes.len());
        self.nodes.push(LineNode {
            pos,
            stops: Vec::new(),
            adj: Vec::new(),
            not_served: AHashSet::new(),
            conn_exc: AHashMap::new(),
            merge_count: 1,
            deleted: false,
        });
        idx
    }

    pub fn add_edg(
        &mut self,
        from: LineNodeIdx,
        to: LineNodeIdx,
        geom: Vec<Coord<f64>>,
    ) -> LineEdgeIdx {
        let idx = LineEdgeIdx(self.edges.len());
        let geom = if geom.len() >= 2 {
            geom
        } else {
            vec![self.nodes[from.0].pos, self.nodes[to.0].pos]
        };
        self.edges.push(LineEdge {
            from,
            to,
            geom,
            lines: Vec::new(),
            deleted: false,
        });
        self.nodes[from.0].adj.push(idx);
        self.nodes[to.0].adj.push(idx);
        idx
    }

    pub fn get_edg(&self, a: LineNodeIdx, b: LineNodeIdx) -> Option<LineEdgeIdx> {
        self.nodes[a.0]
            .adj
            .iter()
            .copied()
            .find(|&e| !self.edges[e.0].deleted && self.edges[e.0].get_other_nd(a) == b)
    }

    pub fn get_deg(&self, n: LineNodeIdx) -> usize {
        self.nodes[n.0]
            .adj
            .iter()
            .filter(|e| !self.edges[e.0].deleted)
            .count()
    }

    /// Sum of line counts over the incident edges.
    pub fn get_line_deg(&self, n: LineNodeIdx) -> usize {
        self.nodes[n.0]
            .adj
            .iter()
            .filter(|e| !self.edges[e.0].deleted)
            .map(|e| self.edges[e.0].lines.len())
            .sum()
    }

    pub fn node_indices(&self) -> impl Iterator<Item = LineNodeIdx> + '_ {
        (0..self.nodes.len())
            .filter(|&i| !self.nodes[i].deleted)
            .map(LineNodeIdx)
    }

    pub fn edge_indices(&self) -> impl Iterator<Item = LineEdgeIdx> + '_ {
        (0..self.edges.len())
            .filter(|&i| !self.edges[i].deleted)
            .map(LineEdgeIdx)
    }

    pub fn num_nds(&self) -> usize {
        self.node_indices().count()
    }

    pub fn num_edgs(&self) -> usize {
        self.edge_indices().count()
    }

    pub fn max_deg(&self) -> usize {
        self.node_indices().map(|n| self.get_deg(n)).max().unwrap_or(0)
    }

    /// Lines served at this node: every line on an incident edge minus the
    /// explicit not-served marks.
    pub fn served_lines(&self, n: LineNodeIdx) -> AHashSet<LineIdx> {
        let mut ret = AHashSet::new();
        for &e in &self.nodes[n.0].adj {
            if self.edges[e.0].deleted {
                continue;
            }
            for occ in &self.edges[e.0].lines {
                if !self.nodes[n.0].not_served.contains(&occ.line) {
                    ret.insert(occ.line);
                }
            }
        }
        ret
    }

    pub fn add_conn_exc(
        &mut self,
        n: LineNodeIdx,
        line: LineIdx,
        ea: LineEdgeIdx,
        eb: LineEdgeIdx,
    ) {
        // both directions, for O(1) lookup either way round
        let exc = self.nodes[n.0].conn_exc.entry(line).or_default();
        exc.entry(ea).or_default().insert(eb);
        exc.entry(eb).or_default().insert(ea);
    }

    /// May `line` continue from edge `ea` to edge `eb` at node `n`?
    pub fn conn_occurs(&self, n: LineNodeIdx, line: LineIdx, ea: LineEdgeIdx, eb: LineEdgeIdx) -> bool {
        match self.nodes[n.0].conn_exc.get(&line) {
            Some(exc) => match exc.get(&ea) {
                Some(forbidden) => !forbidden.contains(&eb),
                None => true,
            },
            None => true,
        }
    }

    /// Outgoing bearing of `e` at its endpoint `n`, from the first
    /// geometry segment leaving the node.
    pub fn edge_angle(&self, n: LineNodeIdx, e: LineEdgeIdx) -> f64 {
        let edge = &self.edges[e.0];
        let g = &edge.geom;
        if edge.from == n {
            geometry::bearing(g[0], g[1])
        } else {
            geometry::bearing(g[g.len() - 1], g[g.len() - 2])
        }
    }

    /// Node fronts of `n`, one per (live) incident edge, sorted clockwise.
    pub fn node_fronts(&self, n: LineNodeIdx) -> Vec<NodeFront> {
        self.nodes[n.0]
            .adj
            .iter()
            .filter(|e| !self.edges[e.0].deleted)
            .map(|&e| NodeFront {
                edge: e,
                angle: self.edge_angle(n, e),
            })
            .sorted_by(|a, b| a.angle.total_cmp(&b.angle).then(a.edge.cmp(&b.edge)))
            .collect()
    }

    pub fn bbox(&self) -> Rect<f64> {
        let (mut min_x, mut min_y, mut max_x, mut max_y) =
            (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for n in self.node_indices() {
            let p = self.nodes[n.0].pos;
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        for e in self.edge_indices() {
            for p in &self.edges[e.0].geom {
                min_x = min_x.min(p.x);
                min_y = min_y.min(p.y);
                max_x = max_x.max(p.x);
                max_y = max_y.max(p.y);
            }
        }
        Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y })
    }

    /// Merge node `b` into node `a`. Edges of `b` are re-pointed to `a`;
    /// an edge between the two disappears, a resulting parallel edge is
    /// folded into the existing one (line sets unioned). Returns `a`.
    pub fn merge_nds(&mut self, a: LineNodeIdx, b: LineNodeIdx) -> LineNodeIdx {
        if a == b {
            return a;
        }
        let b_adj: Vec<LineEdgeIdx> = self.nodes[b.0].adj.clone();
        for e in b_adj {
            if self.edges[e.0].deleted {
                continue;
            }
            let other = self.edges[e.0].get_other_nd(b);
            if other == a {
                self.delete_edg(e);
                continue;
            }
            // direction endpoints pointing at b now point at a
            for occ in &mut self.edges[e.0].lines {
                if occ.direction == Some(b) {
                    occ.direction = Some(a);
                }
            }
            if let Some(existing) = self.get_edg(a, other) {
                let moved = self.edges[e.0].lines.clone();
                for occ in moved {
                    if !self.edges[existing.0].lines.iter().any(|o| o.line == occ.line) {
                        self.edges[existing.0].lines.push(occ);
                    }
                }
                self.delete_edg(e);
                continue;
            }
            if self.edges[e.0].from == b {
                self.edges[e.0].from = a;
                self.edges[e.0].geom[0] = self.nodes[a.0].pos;
            } else {
                self.edges[e.0].to = a;
                let l = self.edges[e.0].geom.len();
                self.edges[e.0].geom[l - 1] = self.nodes[a.0].pos;
            }
            self.nodes[a.0].adj.push(e);
        }

        let b_stops = std::mem::take(&mut self.nodes[b.0].stops);
        self.nodes[a.0].stops.extend(b_stops);
        let b_not_served = std::mem::take(&mut self.nodes[b.0].not_served);
        for l in b_not_served {
            self.nodes[a.0].not_served.insert(l);
        }
        self.nodes[a.0].merge_count += self.nodes[b.0].merge_count;
        self.nodes[b.0].deleted = true;
        self.nodes[b.0].adj.clear();
        a
    }

    pub fn set_nd_pos(&mut self, n: LineNodeIdx, pos: Coord<f64>) {
        self.nodes[n.0].pos = pos;
        let adj = self.nodes[n.0].adj.clone();
        for e in adj {
            if self.edges[e.0].deleted {
                continue;
            }
            if self.edges[e.0].from == n {
                self.edges[e.0].geom[0] = pos;
            }
            if self.edges[e.0].to == n {
                let l = self.edges[e.0].geom.len();
                self.edges[e.0].geom[l - 1] = pos;
            }
        }
    }

    fn delete_edg(&mut self, e: LineEdgeIdx) {
        self.edges[e.0].deleted = true;
        let (f, t) = (self.edges[e.0].from, self.edges[e.0].to);
        self.nodes[f.0].adj.retain(|&x| x != e);
        self.nodes[t.0].adj.retain(|&x| x != e);
    }

    /// Collapse edges shorter than `d` by merging their endpoints,
    /// repeating until no such edge remains. The endpoint carrying a
    /// station survives; the survivor's position is the midpoint and it
    /// inherits not-served marks for lines the disappearing side added.
    pub fn remove_short_edges(&mut self, d: f64) {
        'restart: loop {
            for e in self.edge_indices().collect::<Vec<_>>() {
                let edge = &self.edges[e.0];
                if edge.deleted || geometry::polyline_length(&edge.geom) >= d {
                    continue;
                }
                let (n1, n2) = (edge.from, edge.to);
                if self.get_deg(n1) <= 1 || self.get_deg(n2) <= 1 {
                    continue;
                }
                if !self.nodes[n1.0].stops.is_empty() && !self.nodes[n2.0].stops.is_empty() {
                    continue;
                }
                let mid = Coord {
                    x: (self.nodes[n1.0].pos.x + self.nodes[n2.0].pos.x) / 2.0,
                    y: (self.nodes[n1.0].pos.y + self.nodes[n2.0].pos.y) / 2.0,
                };
                // survivor is the station side, if there is one
                let (survivor, gone) = if !self.nodes[n2.0].stops.is_empty() {
                    (n2, n1)
                } else {
                    (n1, n2)
                };
                let served_before = self.served_lines(survivor);
                let had_stops = !self.nodes[survivor.0].stops.is_empty();
                self.merge_nds(survivor, gone);
                if had_stops {
                    for l in self.served_lines(survivor) {
                        if !served_before.contains(&l) {
                            self.nodes[survivor.0].not_served.insert(l);
                        }
                    }
                }
                self.set_nd_pos(survivor, mid);
                continue 'restart;
            }
            break;
        }
    }

    /// Structural validation of the input graph. Fatal on violation, with
    /// the offending index.
    pub fn validate(&self) -> Result<()> {
        for e in self.edge_indices() {
            let edge = &self.edges[e.0];
            if edge.geom.len() < 2 {
                return Err(LayoutError::InvalidInput {
                    what: "edge polyline has fewer than two points".into(),
                    entity: "edge",
                    idx: e.0,
                });
            }
            for occ in &edge.lines {
                if let Some(dir) = occ.direction {
                    if dir != edge.from && dir != edge.to {
                        return Err(LayoutError::InvalidInput {
                            what: format!(
                                "line {} has direction node {} which is not an endpoint",
                                self.get_line(occ.line).id,
                                dir.0
                            ),
                            entity: "edge",
                            idx: e.0,
                        });
                    }
                }
            }
        }
        // A line reaching an interior station-free degree-2 node must
        // continue on the other side, unless an exception terminates it.
        for n in self.node_indices() {
            if self.get_deg(n) != 2 || !self.nodes[n.0].stops.is_empty() {
                continue;
            }
            let adj: Vec<LineEdgeIdx> = self.nodes[n.0]
                .adj
                .iter()
                .copied()
                .filter(|e| !self.edges[e.0].deleted)
                .collect();
            let (ea, eb) = (adj[0], adj[1]);
            for occ in &self.edges[ea.0].lines {
                if !self.conn_occurs(n, occ.line, ea, eb) {
                    continue;
                }
                if !self.edges[eb.0].lines.iter().any(|o| o.line == occ.line) {
                    return Err(LayoutError::InvalidInput {
                        what: format!(
                            "line {} ends at interior node without continuation",
                            self.get_line(occ.line).id
                        ),
                        entity: "node",
                        idx: n.0,
                    });
                }
            }
        }
        Ok(())
    }
}

// ===========================================================================
// Serde interchange (the crate's own geo-graph JSON format)
// ===========================================================================

#[derive(Debug, Serialize, Deserialize)]
struct SerializableLineOcc {
    line: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    dir: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializableNode {
    id: usize,
    x: f64,
    y: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    stops: Vec<Stop>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    not_served: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializableEdge {
    from: usize,
    to: usize,
    geom: Vec<[f64; 2]>,
    lines: Vec<SerializableLineOcc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializableLineGraph {
    lines: Vec<Line>,
    nodes: Vec<SerializableNode>,
    edges: Vec<SerializableEdge>,
}

impl LineGraph {
    pub fn to_json<W: std::io::Write>(&self, w: W) -> Result<()> {
        let mut id_map = AHashMap::new();
        let mut nodes = Vec::new();
        for (out_id, n) in self.node_indices().enumerate() {
            id_map.insert(n, out_id);
            let nd = &self.nodes[n.0];
            nodes.push(SerializableNode {
                id: out_id,
                x: nd.pos.x,
                y: nd.pos.y,
                stops: nd.stops.clone(),
                not_served: nd
                    .not_served
                    .iter()
                    .map(|&l| self.get_line(l).id.clone())
                    .collect(),
            });
        }
        let edges = self
            .edge_indices()
            .map(|e| {
                let edge = &self.edges[e.0];
                SerializableEdge {
                    from: id_map[&edge.from],
                    to: id_map[&edge.to],
                    geom: edge.geom.iter().map(|c| [c.x, c.y]).collect(),
                    lines: edge
                        .lines
                        .iter()
                        .map(|occ| SerializableLineOcc {
                            line: self.get_line(occ.line).id.clone(),
                            dir: occ.direction.map(|d| id_map[&d]),
                        })
                        .collect(),
                }
            })
            .collect();
        let ser = SerializableLineGraph {
            lines: self.lines.clone(),
            nodes,
            edges,
        };
        serde_json::to_writer_pretty(w, &ser)?;
        Ok(())
    }

    pub fn from_json<R: std::io::Read>(r: R) -> Result<Self> {
        let ser: SerializableLineGraph = serde_json::from_reader(r)?;
        let mut g = LineGraph::new();
        for l in &ser.lines {
            g.add_line(&l.id, &l.label, &l.color);
        }
        let mut id_map = AHashMap::new();
        for n in &ser.nodes {
            let idx = g.add_nd(Coord { x: n.x, y: n.y });
            g.nodes[idx.0].stops = n.stops.clone();
            id_map.insert(n.id, idx);
        }
        for n in &ser.nodes {
            for lid in &n.not_served {
                if let Some(l) = g.line_by_id(lid) {
                    g.nodes[id_map[&n.id].0].not_served.insert(l);
                }
            }
        }
        for (i, e) in ser.edges.iter().enumerate() {
            let from = *id_map.get(&e.from).ok_or_else(|| LayoutError::InvalidInput {
                what: format!("edge references unknown node {}", e.from),
                entity: "edge",
                idx: i,
            })?;
            let to = *id_map.get(&e.to).ok_or_else(|| LayoutError::InvalidInput {
                what: format!("edge references unknown node {}", e.to),
                entity: "edge",
                idx: i,
            })?;
            let geom = e.geom.iter().map(|p| Coord { x: p[0], y: p[1] }).collect();
            let idx = g.add_edg(from, to, geom);
            for occ in &e.lines {
                let line = g.line_by_id(&occ.line).ok_or_else(|| LayoutError::InvalidInput {
                    what: format!("edge references unknown line {}", occ.line),
                    entity: "edge",
                    idx: i,
                })?;
                g.edges[idx.0].lines.push(LineOcc {
                    line,
                    direction: occ.dir.map(|d| id_map[&d]),
                });
            }
        }
        g.validate()?;
        Ok(g)
    }
}

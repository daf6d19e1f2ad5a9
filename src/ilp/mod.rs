pub mod solver;

pub use solver::{ColType, IlpSolver, LpModel, RowType, SolveType};

use std::io::Write;

use ahash::{AHashMap, AHashSet};
use log::info;

use crate::base_graph::grid::{GridEdgeIdx, GridEdgeKind, GridGraph, GridNodeIdx};
use crate::base_graph::{BaseGraph, new_base_graph};
use crate::comb_graph::{CombEdgeIdx, CombGraph, CombNodeIdx};
use crate::drawing::{Drawing, FullScore, RouteEntry};
use crate::error::{LayoutError, Result};
use crate::geometry;
use crate::line_graph::LineGraph;
use crate::octilinearizer::{GeoPensMap, LayoutConfig, LayoutResult, Octilinearizer};

/// Options of the exact solver run.
#[derive(Debug, Clone, Default)]
pub struct IlpConfig {
    /// Build (and optionally write) the program without solving.
    pub no_solve: bool,
    /// Time limit handed to the backend, in seconds.
    pub time_lim: Option<u64>,
    /// Write the program as CPLEX LP text to this path.
    pub path: Option<std::path::PathBuf>,
}

/// Variable/constraint bookkeeping of one built program.
pub struct IlpProgram {
    /// x_{e,g}: comb edge e traverses grid edge g.
    pub x: AHashMap<(CombEdgeIdx, GridEdgeIdx), usize>,
    /// st_{u,n}: comb node u is assigned centre n.
    pub st: AHashMap<(CombNodeIdx, GridNodeIdx), usize>,
    /// w_{e,v}: grid node v is an interior node of e's route.
    pub w: AHashMap<(CombEdgeIdx, GridNodeIdx), usize>,
    /// Candidate centres per comb node.
    pub cands: Vec<Vec<GridNodeIdx>>,
}

/// Formulates edge embedding as a binary program over the base graph:
/// route-use variables with flow conservation, centre-assignment
/// variables with uniqueness, link exclusivity, crossing-diagonal
/// mutual exclusion, and port-sharing consistency at shared centres.
pub struct IlpGridOptimizer;

impl IlpGridOptimizer {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        IlpGridOptimizer
    }

    /// Exact-solver entry point: presolve with the heuristic for a warm
    /// start (falling back to a fresh grid when no embedding is found),
    /// build the program, hand it to the backend, and read the incumbent
    /// back into the drawing.
    pub fn draw_ilp<S: IlpSolver>(
        &self,
        lg: &mut LineGraph,
        pens: &crate::base_graph::Penalties,
        cfg: &LayoutConfig,
        ilp_cfg: &IlpConfig,
        solver: &mut S,
    ) -> Result<LayoutResult> {
        if lg.num_nds() == 0 {
            return Err(LayoutError::InvalidInput {
                what: "line graph has no nodes".into(),
                entity: "graph",
                idx: 0,
            });
        }
        lg.remove_short_edges(cfg.cell_size / 2.0);
        lg.validate()?;
        let cg = CombGraph::new(lg, cfg.deg2_heur);

        // the local search must stay inside the candidate radius here,
        // or the warm start would use centres the program does not know
        let mut pre_cfg = cfg.clone();
        pre_cfg.restr_loc_search = true;

        info!("Presolving...");
        let oc = Octilinearizer::new();
        let mut result = match oc.draw_comb(lg, &cg, pens, &pre_cfg) {
            Ok(res) => {
                info!("Presolving finished.");
                res
            }
            Err(LayoutError::NoEmbeddingFound) => {
                info!("Presolve was not successful.");
                let bbox = geometry::pad_box(lg.bbox(), cfg.cell_size + 1.0);
                LayoutResult {
                    line_graph: LineGraph::new(),
                    score: FullScore::default(),
                    grid: new_base_graph(
                        cfg.kind,
                        bbox,
                        cfg.cell_size,
                        cfg.border_rad,
                        *pens,
                        &cfg.obstacles,
                    ),
                    drawing: Drawing::new(),
                    comb_graph: cg.clone(),
                }
            }
            Err(e) => return Err(e),
        };

        // the program is stated over the unsettled grid
        result.drawing.erase_from_grid(result.grid.core_mut());

        let mut geo_pens: GeoPensMap = AHashMap::new();
        if cfg.enf_geo_pen > 0.0 {
            for (ei, ce) in cg.edges.iter().enumerate() {
                geo_pens.insert(
                    CombEdgeIdx(ei),
                    result
                        .grid
                        .core()
                        .write_geo_course_pens(&ce.geom, cfg.enf_geo_pen),
                );
            }
        }

        let program = self.build_program(result.grid.core(), &cg, cfg, &geo_pens, solver);
        info!(
            "Program has {} variables, {} constraints",
            solver.num_vars(),
            solver.num_constrs()
        );

        if let Some(path) = &ilp_cfg.path {
            let mut file = std::fs::File::create(path)?;
            self.write_program(solver, &mut file)?;
        }

        // warm-start the backend from the heuristic incumbent
        if result.drawing.num_routes() > 0 {
            let start = self.encode_drawing(&result.drawing, &program, solver);
            solver.set_start(&start);
        }

        if !ilp_cfg.no_solve {
            solver.set_time_limit(ilp_cfg.time_lim);
            match solver.solve() {
                SolveType::Inf => return Err(LayoutError::IlpInfeasible),
                SolveType::Optim | SolveType::NonOptim => {
                    if let Some(drawing) =
                        self.extract_drawing(solver, &program, result.grid.core(), &cg)
                    {
                        result.drawing = drawing;
                    }
                }
            }
        }

        result.drawing.apply_to_grid(result.grid.core_mut());
        result.line_graph = result.drawing.get_line_graph(result.grid.core(), &cg, lg);
        result.score = result.drawing.full_score();
        Ok(result)
    }

    /// Serialise the built program; only meaningful for the in-memory
    /// LP backend, a linked solver writes through its own API.
    fn write_program<S: IlpSolver>(&self, solver: &S, w: &mut dyn Write) -> Result<()> {
        solver.write_lp(w)?;
        Ok(())
    }

    /// Build variables and constraints over the (unsettled) grid.
    pub fn build_program<S: IlpSolver>(
        &self,
        gg: &GridGraph,
        cg: &CombGraph,
        cfg: &LayoutConfig,
        geo_pens: &GeoPensMap,
        solver: &mut S,
    ) -> IlpProgram {
        let mut prog = IlpProgram {
            x: AHashMap::new(),
            st: AHashMap::new(),
            w: AHashMap::new(),
            cands: Vec::with_capacity(cg.nodes.len()),
        };

        // centre assignment variables
        for (ui, u) in cg.nodes.iter().enumerate() {
            let cands = gg.get_gr_nd_cands(u.pos, gg.cell_size * cfg.max_gr_dist);
            for &n in &cands {
                let col = solver.add_col(
                    &format!("st_n{}_c{}", ui, n.0),
                    ColType::Bin,
                    gg.nd_move_pen(u.pos, n),
                );
                prog.st.insert((CombNodeIdx(ui), n), col);
            }
            prog.cands.push(cands);
        }

        // route-use variables: all pass edges, sinks of candidate centres
        for (ei, ce) in cg.edges.iter().enumerate() {
            let e = CombEdgeIdx(ei);
            let mut end_centres: AHashSet<GridNodeIdx> = AHashSet::new();
            end_centres.extend(prog.cands[ce.from.0].iter().copied());
            end_centres.extend(prog.cands[ce.to.0].iter().copied());

            for (gi, ge) in gg.edges.iter().enumerate() {
                let g = GridEdgeIdx(gi);
                if ge.closed {
                    continue;
                }
                let obj = match ge.kind {
                    GridEdgeKind::Sink => {
                        let centre = ge.to;
                        if !end_centres.contains(&centre) {
                            continue;
                        }
                        0.0
                    }
                    GridEdgeKind::Link { .. } => {
                        ge.cost + geo_pens.get(&e).map_or(0.0, |p| p[gi])
                    }
                    GridEdgeKind::Bend | GridEdgeKind::Cross => ge.cost,
                };
                let col = solver.add_col(&format!("x_e{}_g{}", ei, gi), ColType::Bin, obj);
                prog.x.insert((e, g), col);
            }
        }

        // flow conservation: per comb edge, the degree at a grid node is
        // 2 for interior nodes and 1 at the chosen endpoint centres
        for (ei, ce) in cg.edges.iter().enumerate() {
            let e = CombEdgeIdx(ei);
            let mut incident: AHashMap<GridNodeIdx, Vec<usize>> = AHashMap::new();
            for (&(xe, g), &col) in &prog.x {
                if xe != e {
                    continue;
                }
                incident.entry(gg.edges[g.0].from).or_default().push(col);
                incident.entry(gg.edges[g.0].to).or_default().push(col);
            }
            for (&v, cols) in &incident {
                let row = solver.add_row(&format!("flow_e{}_v{}", ei, v.0), 0.0, RowType::Fix);
                for &c in cols {
                    solver.add_col_to_row(row, c, 1.0);
                }
                let w_col =
                    solver.add_col(&format!("w_e{}_v{}", ei, v.0), ColType::Bin, 0.0);
                prog.w.insert((e, v), w_col);
                solver.add_col_to_row(row, w_col, -2.0);
                for &(u, sign) in &[(ce.from, -1.0), (ce.to, -1.0)] {
                    if let Some(&st_col) = prog.st.get(&(u, v)) {
                        solver.add_col_to_row(row, st_col, sign);
                    }
                }
            }

            // a route has exactly two terminal sinks
            let row = solver.add_row(&format!("ends_e{}", ei), 2.0, RowType::Fix);
            for (&(xe, g), &col) in &prog.x {
                if xe == e && gg.edges[g.0].kind == GridEdgeKind::Sink {
                    solver.add_col_to_row(row, col, 1.0);
                }
            }
        }

        // each comb node gets exactly one centre; each centre one node
        for ui in 0..cg.nodes.len() {
            let row = solver.add_row(&format!("asgn_n{}", ui), 1.0, RowType::Fix);
            for &n in &prog.cands[ui] {
                solver.add_col_to_row(row, prog.st[&(CombNodeIdx(ui), n)], 1.0);
            }
        }
        let mut by_centre: AHashMap<GridNodeIdx, Vec<usize>> = AHashMap::new();
        for (&(_, n), &col) in &prog.st {
            by_centre.entry(n).or_default().push(col);
        }
        for (n, cols) in by_centre {
            if cols.len() < 2 {
                continue;
            }
            let row = solver.add_row(&format!("occ_c{}", n.0), 1.0, RowType::Up);
            for c in cols {
                solver.add_col_to_row(row, c, 1.0);
            }
        }

        // link exclusivity and crossing-diagonal mutual exclusion
        for (gi, ge) in gg.edges.iter().enumerate() {
            if !matches!(ge.kind, GridEdgeKind::Link { .. }) || ge.closed {
                continue;
            }
            let g = GridEdgeIdx(gi);
            let row = solver.add_row(
                &format!("excl_g{}", gi),
                gg.pens.dense_cap as f64,
                RowType::Up,
            );
            for ei in 0..cg.edges.len() {
                if let Some(&col) = prog.x.get(&(CombEdgeIdx(ei), g)) {
                    solver.add_col_to_row(row, col, 1.0);
                }
            }
            if let Some(partner) = ge.crossing_partner {
                // one row per pair
                if partner.0 > gi {
                    let row = solver.add_row(
                        &format!("cross_g{}", gi),
                        gg.pens.dense_cap as f64,
                        RowType::Up,
                    );
                    for ei in 0..cg.edges.len() {
                        for &gid in &[g, partner] {
                            if let Some(&col) = prog.x.get(&(CombEdgeIdx(ei), gid)) {
                                solver.add_col_to_row(row, col, 1.0);
                            }
                        }
                    }
                }
            }
        }

        // port consistency: at a shared centre, two comb edges never
        // leave through the same port
        for ui in 0..cg.nodes.len() {
            let adj = &cg.nodes[ui].adj;
            if adj.len() < 2 {
                continue;
            }
            for &n in &prog.cands[ui] {
                for &sink in &self.sinks_of(gg, n) {
                    let cols: Vec<usize> = adj
                        .iter()
                        .filter_map(|&e| prog.x.get(&(e, sink)).copied())
                        .collect();
                    if cols.len() < 2 {
                        continue;
                    }
                    let row = solver.add_row(
                        &format!("port_n{}_c{}_s{}", ui, n.0, sink.0),
                        1.0,
                        RowType::Up,
                    );
                    for c in cols {
                        solver.add_col_to_row(row, c, 1.0);
                    }
                }
            }
        }

        // sinks couple to the assignment of the endpoint they serve
        for (ei, ce) in cg.edges.iter().enumerate() {
            let e = CombEdgeIdx(ei);
            for (&(xe, g), &col) in &prog.x {
                if xe != e || gg.edges[g.0].kind != GridEdgeKind::Sink {
                    continue;
                }
                let centre = gg.edges[g.0].to;
                let row =
                    solver.add_row(&format!("snk_e{}_g{}", ei, g.0), 0.0, RowType::Up);
                solver.add_col_to_row(row, col, 1.0);
                for u in [ce.from, ce.to] {
                    if let Some(&st_col) = prog.st.get(&(u, centre)) {
                        solver.add_col_to_row(row, st_col, -1.0);
                    }
                }
            }
        }

        prog
    }

    fn sinks_of(&self, gg: &GridGraph, centre: GridNodeIdx) -> Vec<GridEdgeIdx> {
        gg.adj[centre.0]
            .iter()
            .copied()
            .filter(|&e| gg.edges[e.0].kind == GridEdgeKind::Sink)
            .collect()
    }

    /// Encode a drawing as a variable assignment (a feasible warm start).
    pub fn encode_drawing<S: IlpSolver>(
        &self,
        drawing: &Drawing,
        prog: &IlpProgram,
        solver: &S,
    ) -> Vec<f64> {
        let mut vals = vec![0.0; solver.num_vars()];
        for (&(u, n), &col) in &prog.st {
            if drawing.get_gr_nd(u) == Some(n) {
                vals[col] = 1.0;
            }
        }
        for (&(e, g), &col) in &prog.x {
            if let Some(route) = drawing.route(e) {
                if route.edges.contains(&g) {
                    vals[col] = 1.0;
                }
            }
        }
        for (&(e, v), &col) in &prog.w {
            if let Some(route) = drawing.route(e) {
                // interior nodes of the route have degree two
                if route.nodes.len() > 2 && route.nodes[1..route.nodes.len() - 1].contains(&v) {
                    vals[col] = 1.0;
                }
            }
        }
        vals
    }

    /// Read a variable assignment back into a drawing; None when the
    /// assignment does not describe a complete embedding.
    pub fn extract_drawing<S: IlpSolver>(
        &self,
        solver: &S,
        prog: &IlpProgram,
        gg: &GridGraph,
        cg: &CombGraph,
    ) -> Option<Drawing> {
        let mut drawing = Drawing::new();

        let mut nd_centre: AHashMap<CombNodeIdx, GridNodeIdx> = AHashMap::new();
        for (&(u, n), &col) in &prog.st {
            if solver.get_var_val(col) > 0.5 {
                nd_centre.insert(u, n);
            }
        }
        if nd_centre.len() != cg.nodes.len() {
            return None;
        }

        for (ei, ce) in cg.edges.iter().enumerate() {
            let e = CombEdgeIdx(ei);
            let mut used: AHashSet<GridEdgeIdx> = prog
                .x
                .iter()
                .filter(|&(&(xe, _), &col)| xe == e && solver.get_var_val(col) > 0.5)
                .map(|(&(_, g), _)| g)
                .collect();

            let start = *nd_centre.get(&ce.from)?;
            let goal = *nd_centre.get(&ce.to)?;

            let mut nodes = vec![start];
            let mut edges = Vec::new();
            let mut cur = start;
            while cur != goal {
                let next_e = gg.adj[cur.0]
                    .iter()
                    .copied()
                    .find(|ge| used.contains(ge))?;
                used.remove(&next_e);
                edges.push(next_e);
                cur = gg.edges[next_e.0].get_other_nd(cur);
                nodes.push(cur);
                if edges.len() > gg.edges.len() {
                    return None;
                }
            }

            let mut score = FullScore::default();
            for &ge in &edges {
                let edge = &gg.edges[ge.0];
                match edge.kind {
                    GridEdgeKind::Sink => {}
                    GridEdgeKind::Bend => score.bend += edge.cost,
                    GridEdgeKind::Cross | GridEdgeKind::Link { .. } => score.hop += edge.cost,
                }
            }

            drawing.draw(
                e,
                RouteEntry {
                    nodes,
                    edges,
                    rev: false,
                    score,
                },
            );
        }

        for (u, n) in nd_centre {
            drawing.set_nd(u, n);
            drawing.set_nd_cost(u, gg.nd_move_pen(cg.nodes[u.0].pos, n));
        }
        Some(drawing)
    }
}

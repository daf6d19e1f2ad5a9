use ahash::AHashSet;
use geo::{Coord, polygon};

use crate::base_graph::grid::{GridEdgeKind, GridGraph, GridNodeIdx};
use crate::base_graph::{BaseGraph, Penalties, new_base_graph};
use crate::comb_graph::CombNodeIdx;
use crate::geometry;
use crate::line_graph::{LineGraph, LineNodeIdx, LineOcc};
use crate::octilinearizer::{LayoutConfig, LayoutResult, Octilinearizer, SettledPos};

fn line_between(
    g: &mut LineGraph,
    line: &str,
    from: LineNodeIdx,
    to: LineNodeIdx,
    geom: Vec<Coord<f64>>,
) {
    let l = g.add_line(line, line, "#000000");
    let e = g.add_edg(from, to, geom);
    g.edges[e.0].lines.push(LineOcc {
        line: l,
        direction: None,
    });
}

fn small_cfg() -> LayoutConfig {
    LayoutConfig {
        cell_size: 50.0,
        border_rad: 10.0,
        jobs: 2,
        ..Default::default()
    }
}

fn assert_octilinear(g: &LineGraph) {
    for e in g.edge_indices() {
        for w in g.edges[e.0].geom.windows(2) {
            assert!(
                geometry::is_octilinear(w[0], w[1], 1e-6),
                "segment {:?} -> {:?} is not octilinear",
                w[0],
                w[1]
            );
        }
    }
}

fn assert_invariants(res: &LayoutResult) {
    assert_octilinear(&res.line_graph);

    // one centre per comb node, never shared
    let mut centres = AHashSet::new();
    for ci in 0..res.comb_graph.nodes.len() {
        let c = res
            .drawing
            .get_gr_nd(CombNodeIdx(ci))
            .expect("every comb node has a centre");
        assert!(centres.insert(c), "two comb nodes share centre {:?}", c);
    }

    let gg = res.grid.core();
    for e in &gg.edges {
        if let GridEdgeKind::Link { .. } = e.kind {
            assert!(
                e.res_count <= gg.pens.dense_cap,
                "density cap violated on a link edge"
            );
            if e.res_count > 0 {
                if let Some(p) = e.crossing_partner {
                    assert_eq!(
                        gg.edges[p.0].res_count, 0,
                        "both crossing diagonals are settled"
                    );
                }
            }
        }
    }

    // the reported decomposition adds up to the drawing score
    let full = res.drawing.full_score();
    assert!(
        (full.total() - res.drawing.score()).abs() < 1e-6,
        "hop+bend+mv+dense != total"
    );
}

fn nearest_centre(gg: &GridGraph, pos: Coord<f64>) -> GridNodeIdx {
    gg.get_gr_nd_cands(pos, gg.cell_size * 2.0)
        .into_iter()
        .min_by(|&a, &b| {
            geometry::dist(gg.nodes[a.0].pos, pos)
                .total_cmp(&geometry::dist(gg.nodes[b.0].pos, pos))
        })
        .expect("centre near position")
}

#[test]
fn test_triangle_embeds_without_bends() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut g = LineGraph::new();
    let a = g.add_nd(Coord { x: 0.0, y: 0.0 });
    let b = g.add_nd(Coord { x: 100.0, y: 0.0 });
    let c = g.add_nd(Coord { x: 50.0, y: 86.0 });
    line_between(&mut g, "l1", a, b, vec![]);
    line_between(&mut g, "l2", b, c, vec![]);
    line_between(&mut g, "l3", c, a, vec![]);

    let res = Octilinearizer::new()
        .draw(&mut g, &Penalties::default(), &small_cfg())
        .expect("triangle embeds");

    assert_invariants(&res);
    assert_eq!(res.line_graph.num_nds(), 3);
    assert_eq!(res.line_graph.num_edgs(), 3);
    assert!(
        res.score.bend.abs() < 1e-9,
        "triangle needs no bends, got {}",
        res.score.bend
    );
    // each output edge is a single octilinear segment
    for e in res.line_graph.edge_indices() {
        let geom = &res.line_graph.edges[e.0].geom;
        let first = geom[0];
        let last = geom[geom.len() - 1];
        assert!(
            geometry::is_octilinear(first, last, 1e-6),
            "edge endpoints are not on one octilinear segment"
        );
    }
}

#[test]
fn test_four_way_cross_is_straight() {
    let mut g = LineGraph::new();
    let c = g.add_nd(Coord { x: 0.0, y: 0.0 });
    let n = g.add_nd(Coord { x: 0.0, y: 100.0 });
    let e = g.add_nd(Coord { x: 100.0, y: 0.0 });
    let s = g.add_nd(Coord { x: 0.0, y: -100.0 });
    let w = g.add_nd(Coord { x: -100.0, y: 0.0 });
    for (arm, id) in [(n, "n"), (e, "e"), (s, "s"), (w, "w")] {
        line_between(&mut g, id, c, arm, vec![]);
    }

    let res = Octilinearizer::new()
        .draw(&mut g, &Penalties::default(), &small_cfg())
        .expect("cross embeds");

    assert_invariants(&res);
    assert!(
        res.score.bend.abs() < 1e-9,
        "all four arms run straight, got bend {}",
        res.score.bend
    );

    // arms leave the centre in four distinct compass directions
    let centre_out = res
        .line_graph
        .node_indices()
        .find(|&ni| res.line_graph.get_deg(ni) == 4)
        .expect("centre survives");
    let fronts = res.line_graph.node_fronts(centre_out);
    let angles: AHashSet<i64> = fronts.iter().map(|f| f.angle.round() as i64).collect();
    assert_eq!(angles.len(), 4, "four distinct departure bearings");
    for a in angles {
        assert_eq!(a % 90, 0, "arm leaves at a cardinal bearing");
    }
}

#[test]
fn test_shared_trunk_keeps_lines_bundled() {
    let mut g = LineGraph::new();
    let l1 = g.add_line("r1", "R1", "#ff0000");
    let l2 = g.add_line("r2", "R2", "#0000ff");
    let a = g.add_nd(Coord { x: 0.0, y: 0.0 });
    let b = g.add_nd(Coord { x: 100.0, y: 0.0 });
    let c = g.add_nd(Coord { x: 200.0, y: 0.0 });
    let d = g.add_nd(Coord { x: 300.0, y: 100.0 });
    let e = g.add_nd(Coord { x: 300.0, y: -100.0 });
    for (f, t) in [(a, b), (b, c)] {
        let edge = g.add_edg(f, t, vec![]);
        g.edges[edge.0].lines.push(LineOcc { line: l1, direction: None });
        g.edges[edge.0].lines.push(LineOcc { line: l2, direction: None });
    }
    let cd = g.add_edg(c, d, vec![]);
    g.edges[cd.0].lines.push(LineOcc { line: l1, direction: None });
    let ce = g.add_edg(c, e, vec![]);
    g.edges[ce.0].lines.push(LineOcc { line: l2, direction: None });

    let res = Octilinearizer::new()
        .draw(&mut g, &Penalties::default(), &small_cfg())
        .expect("trunk embeds");

    assert_invariants(&res);

    // b contracts into the trunk and is re-inserted on output
    assert_eq!(res.comb_graph.nodes.len(), 4);
    assert_eq!(res.line_graph.num_nds(), 5);
    assert_eq!(res.line_graph.num_edgs(), 4);

    // both trunk edges still carry both lines
    let trunk_edges: Vec<_> = res
        .line_graph
        .edge_indices()
        .filter(|&ei| res.line_graph.edges[ei.0].lines.len() == 2)
        .collect();
    assert_eq!(trunk_edges.len(), 2, "a-b and b-c keep density 2");

    // the divergence leaves c through two distinct ports
    let comb_c = res.comb_graph.comb_nd(c).expect("c is a comb node");
    let centre_c = res.drawing.get_gr_nd(comb_c).unwrap();
    let gg = res.grid.core();
    let mut ports = AHashSet::new();
    for (ei, _) in res.comb_graph.edges.iter().enumerate() {
        let eidx = crate::comb_graph::CombEdgeIdx(ei);
        if let Some(p) = res.drawing.port_at(eidx, centre_c, gg) {
            assert!(ports.insert(p), "two edges share port {} at c", p);
        }
    }
    assert_eq!(ports.len(), 3, "three edges depart c on distinct ports");
}

#[test]
fn test_obstacle_forces_costlier_detour() {
    let build = || {
        let mut g = LineGraph::new();
        let a = g.add_nd(Coord { x: 0.0, y: 0.0 });
        let b = g.add_nd(Coord { x: 100.0, y: 0.0 });
        line_between(&mut g, "l1", a, b, vec![]);
        g
    };

    let mut free_g = build();
    let free = Octilinearizer::new()
        .draw(&mut free_g, &Penalties::default(), &small_cfg())
        .expect("unobstructed embeds");

    let mut cfg = small_cfg();
    cfg.obstacles = vec![polygon![
        (x: 30.0, y: -30.0),
        (x: 70.0, y: -30.0),
        (x: 70.0, y: 30.0),
        (x: 30.0, y: 30.0),
    ]];
    let mut blocked_g = build();
    let blocked = Octilinearizer::new()
        .draw(&mut blocked_g, &Penalties::default(), &cfg)
        .expect("detour embeds");

    assert_invariants(&free);
    assert_invariants(&blocked);
    assert!(
        blocked.score.total() > free.score.total(),
        "detour must cost more: {} <= {}",
        blocked.score.total(),
        free.score.total()
    );

    // no settled link crosses the obstacle
    let gg = blocked.grid.core();
    for e in &gg.edges {
        if e.res_count > 0 {
            assert!(!e.closed, "route uses an obstacle-closed link");
        }
    }
}

#[test]
fn test_geo_pen_follows_reference_course() {
    // an s-shaped reference course the lattice can express exactly
    let course = vec![
        Coord { x: 0.0, y: 0.0 },
        Coord { x: 50.0, y: 50.0 },
        Coord { x: 150.0, y: -50.0 },
        Coord { x: 200.0, y: 0.0 },
    ];
    let build = || {
        let mut g = LineGraph::new();
        let a = g.add_nd(Coord { x: 0.0, y: 0.0 });
        let b = g.add_nd(Coord { x: 200.0, y: 0.0 });
        line_between(&mut g, "s1", a, b, course.clone());
        g
    };
    // anchor the stations so only the course of the route is in play
    let pens = Penalties {
        move_pen: 10.0,
        ..Default::default()
    };

    let mean_course_dist = |res: &LayoutResult| -> f64 {
        let mut total = 0.0;
        let mut n = 0usize;
        for e in res.line_graph.edge_indices() {
            for &p in &res.line_graph.edges[e.0].geom {
                let (_, d, _) =
                    geometry::project_point_to_polyline(p, &course).expect("projectable");
                total += d;
                n += 1;
            }
        }
        total / n as f64
    };

    let mut plain_g = build();
    let plain = Octilinearizer::new()
        .draw(&mut plain_g, &pens, &small_cfg())
        .expect("plain embeds");

    let mut cfg = small_cfg();
    cfg.enf_geo_pen = 10.0;
    let mut geo_g = build();
    let geo = Octilinearizer::new()
        .draw(&mut geo_g, &pens, &cfg)
        .expect("geo-enforced embeds");

    assert_invariants(&plain);
    assert_invariants(&geo);
    assert!(
        mean_course_dist(&geo) < mean_course_dist(&plain),
        "geo enforcement must pull the route towards the reference course"
    );
    assert!(
        geo.score.total() >= plain.score.total() - 1e-9,
        "fidelity is bought with raw cost"
    );
}

#[test]
fn test_local_search_recovers_displaced_node() {
    // b sits one cell north of its geographic optimum; one improvement
    // pass must bring it back and lower the score
    let mut g = LineGraph::new();
    let a = g.add_nd(Coord { x: 0.0, y: 0.0 });
    let b = g.add_nd(Coord { x: 100.0, y: 0.0 });
    let c = g.add_nd(Coord { x: 200.0, y: 0.0 });
    line_between(&mut g, "l1", a, b, vec![]);
    line_between(&mut g, "l2", b, c, vec![]);

    let cfg = small_cfg();
    let pens = Penalties::default();
    let cg = crate::comb_graph::CombGraph::new(&g, true);
    assert_eq!(cg.edges.len(), 2, "different lines keep b a comb node");

    let bbox = geometry::pad_box(g.bbox(), cfg.cell_size + 1.0);
    let mut gg = new_base_graph(cfg.kind, bbox, cfg.cell_size, cfg.border_rad, pens, &[]);

    let comb_a = cg.comb_nd(a).unwrap();
    let comb_b = cg.comb_nd(b).unwrap();
    let comb_c = cg.comb_nd(c).unwrap();
    let optimum = nearest_centre(gg.core(), g.nodes[b.0].pos);
    let displaced = gg.core().neighbor(optimum, 0).unwrap();

    let oc = Octilinearizer::new();
    let mut drawing = crate::drawing::Drawing::new();
    let mut pre = SettledPos::new();
    // pin the outer nodes at their geographic optima so only b is off
    pre.insert(comb_a, nearest_centre(gg.core(), g.nodes[a.0].pos));
    pre.insert(comb_c, nearest_centre(gg.core(), g.nodes[c.0].pos));
    pre.insert(comb_b, displaced);
    let order: Vec<_> = (0..cg.edges.len())
        .map(crate::comb_graph::CombEdgeIdx)
        .collect();
    let routed = oc.route_all(
        &order,
        &pre,
        gg.core_mut(),
        &cg,
        &mut drawing,
        f64::INFINITY,
        &cfg,
        &Default::default(),
    );
    assert!(routed, "displaced layout routes");
    assert_eq!(drawing.get_gr_nd(comb_b), Some(displaced));
    let displaced_score = drawing.score();

    let best = oc.improve_batch(
        gg.core_mut(),
        &[comb_b],
        &cg,
        &drawing,
        &cfg,
        &Default::default(),
    );
    assert!(
        best.score() < displaced_score,
        "local search must improve: {} >= {}",
        best.score(),
        displaced_score
    );
    assert_eq!(
        best.get_gr_nd(comb_b),
        Some(optimum),
        "b returns to its geographic optimum"
    );
}

#[test]
fn test_two_node_edge_snaps_to_bearing() {
    let mut g = LineGraph::new();
    let a = g.add_nd(Coord { x: 0.0, y: 0.0 });
    let b = g.add_nd(Coord { x: 110.0, y: 20.0 });
    line_between(&mut g, "l1", a, b, vec![]);

    let res = Octilinearizer::new()
        .draw(&mut g, &Penalties::default(), &small_cfg())
        .expect("two-node graph embeds");

    assert_invariants(&res);
    let ca = res.drawing.get_gr_nd(CombNodeIdx(0)).unwrap();
    let cb = res.drawing.get_gr_nd(CombNodeIdx(1)).unwrap();
    let gg = res.grid.core();
    let (ax, ay) = gg.nodes[ca.0].cell;
    let (bx, by) = gg.nodes[cb.0].cell;
    assert_eq!(ay, by, "east-ish edge embeds on one row");
    assert_eq!(bx, ax + 1, "adjacent centres in the bearing's direction");
    assert!(res.score.bend.abs() < 1e-9);
}

#[test]
fn test_sink_offset_cancels_out_of_the_score() {
    // the mv component must be exactly the displacement penalties of
    // the two settled centres: the sink correction is stripped again
    let mut g = LineGraph::new();
    let a = g.add_nd(Coord { x: 0.0, y: 0.0 });
    let b = g.add_nd(Coord { x: 100.0, y: 0.0 });
    line_between(&mut g, "l1", a, b, vec![]);

    let res = Octilinearizer::new()
        .draw(&mut g, &Penalties::default(), &small_cfg())
        .expect("embeds");

    let gg = res.grid.core();
    let ca = res.drawing.get_gr_nd(CombNodeIdx(0)).unwrap();
    let cb = res.drawing.get_gr_nd(CombNodeIdx(1)).unwrap();
    let expected_mv = gg.nd_move_pen(g.nodes[a.0].pos, ca) + gg.nd_move_pen(g.nodes[b.0].pos, cb);
    assert!(
        (res.score.mv - expected_mv).abs() < 1e-9,
        "mv {} != displacement {}",
        res.score.mv,
        expected_mv
    );
    assert!(res.score.bend.abs() < 1e-9, "no bend cost leaks from the sinks");
}

#[test]
fn test_fixed_seed_is_reproducible() {
    let build = || {
        let mut g = LineGraph::new();
        let c = g.add_nd(Coord { x: 0.0, y: 0.0 });
        let arms = [
            Coord { x: 100.0, y: 30.0 },
            Coord { x: -40.0, y: 110.0 },
            Coord { x: -90.0, y: -60.0 },
            Coord { x: 60.0, y: -100.0 },
        ];
        for (i, pos) in arms.into_iter().enumerate() {
            let n = g.add_nd(pos);
            line_between(&mut g, &format!("l{}", i), c, n, vec![]);
        }
        g
    };

    let mut cfg = small_cfg();
    cfg.seed = 7;
    let mut g1 = build();
    let r1 = Octilinearizer::new()
        .draw(&mut g1, &Penalties::default(), &cfg)
        .expect("embeds");
    let mut g2 = build();
    let r2 = Octilinearizer::new()
        .draw(&mut g2, &Penalties::default(), &cfg)
        .expect("embeds");

    assert!((r1.score.total() - r2.score.total()).abs() < 1e-9);
    for ci in 0..r1.comb_graph.nodes.len() {
        assert_eq!(
            r1.drawing.get_gr_nd(CombNodeIdx(ci)),
            r2.drawing.get_gr_nd(CombNodeIdx(ci)),
            "same seed, same centres"
        );
    }
}

#[test]
fn test_erasing_result_restores_fresh_grid() {
    let mut g = LineGraph::new();
    let a = g.add_nd(Coord { x: 0.0, y: 0.0 });
    let b = g.add_nd(Coord { x: 100.0, y: 0.0 });
    let c = g.add_nd(Coord { x: 50.0, y: 86.0 });
    line_between(&mut g, "l1", a, b, vec![]);
    line_between(&mut g, "l2", b, c, vec![]);

    let cfg = small_cfg();
    let res = Octilinearizer::new()
        .draw(&mut g, &Penalties::default(), &cfg)
        .expect("embeds");

    let mut grid = res.grid;
    res.drawing.erase_from_grid(grid.core_mut());

    let bbox = geometry::pad_box(g.bbox(), cfg.cell_size + 1.0);
    let fresh = new_base_graph(
        cfg.kind,
        bbox,
        cfg.cell_size,
        cfg.border_rad,
        Penalties::default(),
        &[],
    );
    assert_eq!(
        grid.core().state_signature(),
        fresh.core().state_signature(),
        "erasing the final drawing leaves a pristine grid"
    );
}

#[test]
fn test_comb_round_trip_preserves_line_occurrences() {
    let mut g = LineGraph::new();
    let l = g.add_line("m1", "M1", "#123456");
    let a = g.add_nd(Coord { x: 0.0, y: 0.0 });
    let b = g.add_nd(Coord { x: 100.0, y: 0.0 });
    let c = g.add_nd(Coord { x: 200.0, y: 0.0 });
    let d = g.add_nd(Coord { x: 300.0, y: 100.0 });
    for (f, t) in [(a, b), (b, c), (c, d)] {
        let e = g.add_edg(f, t, vec![]);
        g.edges[e.0].lines.push(LineOcc {
            line: l,
            direction: Some(t),
        });
    }

    let res = Octilinearizer::new()
        .draw(&mut g, &Penalties::default(), &small_cfg())
        .expect("embeds");

    assert_eq!(res.line_graph.num_edgs(), 3, "contracted chain re-expands");
    for e in res.line_graph.edge_indices() {
        let occs = &res.line_graph.edges[e.0].lines;
        assert_eq!(occs.len(), 1);
        assert!(
            occs[0].direction.is_some(),
            "directions survive the round trip"
        );
    }
    // direction chain stays continuous: each edge points away from a
    let out = &res.line_graph;
    for e in out.edge_indices() {
        let occ = out.edges[e.0].lines[0];
        let dir = occ.direction.unwrap();
        assert!(
            dir == out.edges[e.0].from || dir == out.edges[e.0].to,
            "direction is an endpoint"
        );
    }
}

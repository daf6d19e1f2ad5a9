use geo::{
    Coord, EuclideanDistance, EuclideanLength, Intersects, Line, LineInterpolatePoint,
    LineLocatePoint, LineString, Point, Polygon, Rect,
};

// --- Metric Geometry Functions (planar XY space) ---
//
// All layout-internal coordinates are planar metric (projected). Nothing
// in this crate touches lat/lon.

/// Euclidean length of a polyline.
pub fn polyline_length(coords: &[Coord<f64>]) -> f64 {
    if coords.len() < 2 {
        return 0.0;
    }
    let mut len = 0.0;
    for w in coords.windows(2) {
        len += dist(w[0], w[1]);
    }
    len
}

pub fn dist(a: Coord<f64>, b: Coord<f64>) -> f64 {
    ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt()
}

/// Project a point onto a polyline.
/// Returns (distance_along_polyline, distance_from_polyline, projected_point).
pub fn project_point_to_polyline(
    point: Coord<f64>,
    coords: &[Coord<f64>],
) -> Option<(f64, f64, Coord<f64>)> {
    if coords.len() < 2 {
        if coords.len() == 1 {
            return Some((0.0, dist(point, coords[0]), coords[0]));
        }
        return None;
    }

    let ls: LineString = coords.iter().copied().collect();
    let p = Point::new(point.x, point.y);

    let fraction = ls.line_locate_point(&p)?;
    let projected = ls.line_interpolate_point(fraction)?;

    let total_len = ls.euclidean_length();
    let distance_along = fraction * total_len;
    let distance_to_line = p.euclidean_distance(&projected);

    Some((distance_along, distance_to_line, projected.into()))
}

/// Interpolate along a polyline at a length fraction in [0, 1].
pub fn interpolate_along_polyline(coords: &[Coord<f64>], fraction: f64) -> Coord<f64> {
    if coords.is_empty() {
        return Coord { x: 0.0, y: 0.0 };
    }
    let ls: LineString = coords.iter().copied().collect();
    match ls.line_interpolate_point(fraction.clamp(0.0, 1.0)) {
        Some(p) => p.into(),
        None => coords[0],
    }
}

/// Extract the sub-polyline between two length fractions, keeping interior
/// vertices that fall strictly inside the range.
pub fn extract_sub_polyline(coords: &[Coord<f64>], start_frac: f64, end_frac: f64) -> Vec<Coord<f64>> {
    let start = start_frac.clamp(0.0, 1.0);
    let end = end_frac.clamp(0.0, 1.0);
    if start >= end {
        return vec![interpolate_along_polyline(coords, start)];
    }

    let total_len = polyline_length(coords);
    let start_dist = total_len * start;
    let end_dist = total_len * end;

    let mut result = vec![interpolate_along_polyline(coords, start)];

    let mut current_dist = 0.0;
    for w in coords.windows(2) {
        let next_dist = current_dist + dist(w[0], w[1]);
        // Epsilon keeps exact-vertex hits from duplicating the endpoints.
        if next_dist > start_dist + 1e-4 && next_dist < end_dist - 1e-4 {
            result.push(w[1]);
        }
        current_dist = next_dist;
    }

    result.push(interpolate_along_polyline(coords, end));
    result
}

/// Bearing of the segment a -> b in degrees, clockwise from north.
pub fn bearing(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let deg = (b.x - a.x).atan2(b.y - a.y).to_degrees();
    (deg + 360.0) % 360.0
}

/// Absolute angular difference of two bearings, in [0, 180].
pub fn bearing_difference(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs() % 360.0;
    if diff > 180.0 { 360.0 - diff } else { diff }
}

/// Pad a bounding box by `padding` on all sides.
pub fn pad_box(b: Rect<f64>, padding: f64) -> Rect<f64> {
    Rect::new(
        Coord {
            x: b.min().x - padding,
            y: b.min().y - padding,
        },
        Coord {
            x: b.max().x + padding,
            y: b.max().y + padding,
        },
    )
}

/// Does the segment a -> b intersect the polygon (boundary or interior)?
pub fn segment_intersects_polygon(a: Coord<f64>, b: Coord<f64>, poly: &Polygon<f64>) -> bool {
    poly.intersects(&Line::new(a, b))
}

/// The eight compass directions, clockwise from north. A step in
/// direction `d` moves by `DIR_VECS[d]` cells.
pub const DIR_VECS: [(i64, i64); 8] = [
    (0, 1),   // N
    (1, 1),   // NE
    (1, 0),   // E
    (1, -1),  // SE
    (0, -1),  // S
    (-1, -1), // SW
    (-1, 0),  // W
    (-1, 1),  // NW
];

/// Bearing of compass direction `d` in degrees.
pub fn dir_bearing(d: u8) -> f64 {
    d as f64 * 45.0
}

/// Circular distance between two of the eight port indices, in [0, 4].
pub fn port_dist(a: u8, b: u8) -> u8 {
    let d = (a as i8 - b as i8).unsigned_abs() % 8;
    d.min(8 - d)
}

/// Is the segment a -> b axis-aligned or at a 45 degree diagonal?
pub fn is_octilinear(a: Coord<f64>, b: Coord<f64>, eps: f64) -> bool {
    let dx = (b.x - a.x).abs();
    let dy = (b.y - a.y).abs();
    dx < eps || dy < eps || (dx - dy).abs() < eps
}

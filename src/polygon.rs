//! Reconstructs segment geometry from assigned cell sets.
//!
//! Boundary edges of the cell set are stitched into rings (counterclockwise
//! exteriors, clockwise holes), simplified at half a cell, then clipped to
//! the search polygon. Disconnected cell groups become multipolygon parts.

use std::collections::{BTreeMap, HashSet};

use geo::{
    Area, BooleanOps, Centroid, Coord, Intersects, LineString, MultiPolygon, Polygon, Simplify,
};

use crate::error::PlanError;
use crate::raster::MetricFrame;

/// Builds the clipped geometry for one segment's cell set. Returns `None`
/// when everything falls below the noise threshold after clipping.
pub fn build_segment_geometry(
    cells: &[u32],
    frame: &MetricFrame,
    search_polygon: &Polygon<f64>,
) -> Result<Option<MultiPolygon<f64>>, PlanError> {
    if cells.is_empty() {
        return Ok(None);
    }
    debug_assert!(cells.windows(2).all(|w| w[0] < w[1]));

    let rings = trace_rings(cells, frame)?;
    let polygons = assemble_polygons(rings, frame);

    let tolerance = frame.cell_size / 2.0;
    let simplified: Vec<Polygon<f64>> = polygons
        .into_iter()
        .map(|p| p.simplify(&tolerance))
        .collect();

    let clipped = MultiPolygon::new(simplified)
        .intersection(&MultiPolygon::new(vec![search_polygon.clone()]));

    let min_area = 0.25 * frame.cell_size * frame.cell_size;
    let parts: Vec<Polygon<f64>> = clipped
        .into_iter()
        .filter(|p| p.unsigned_area() >= min_area)
        .collect();
    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(MultiPolygon::new(parts)))
}

/// Rechecks the built segments: pairwise-disjoint interiors and containment
/// in the search polygon. A violation is an algorithm bug, not bad input.
pub fn validate_segments(
    geometries: &[MultiPolygon<f64>],
    search_polygon: &Polygon<f64>,
    cell_size: f64,
) -> Result<(), PlanError> {
    let cell_area = cell_size * cell_size;
    let search = MultiPolygon::new(vec![search_polygon.clone()]);
    for (i, a) in geometries.iter().enumerate() {
        let outside = a.difference(&search).unsigned_area();
        if outside > cell_area {
            return Err(PlanError::Internal(format!(
                "segment {} leaks {:.1} m2 outside the search polygon",
                i + 1,
                outside
            )));
        }
        for (j, b) in geometries.iter().enumerate().skip(i + 1) {
            let overlap = a.intersection(b).unsigned_area();
            // Simplification at half a cell may shave shared boundaries, so
            // only substantial overlap is treated as a violation.
            let allowed = cell_area + 0.005 * a.unsigned_area().min(b.unsigned_area());
            if overlap > allowed {
                return Err(PlanError::Internal(format!(
                    "segments {} and {} overlap by {:.1} m2",
                    i + 1,
                    j + 1,
                    overlap
                )));
            }
        }
    }
    Ok(())
}

/// Grid vertex (row, col) on cell corners; row 0/col 0 is the frame's
/// northwest corner.
type Vertex = (usize, usize);

struct Edge {
    from: Vertex,
    to: Vertex,
    used: bool,
}

/// Traces all boundary rings of the cell set with interior-on-the-left
/// orientation, so exteriors come out counterclockwise and holes clockwise.
fn trace_rings(cells: &[u32], frame: &MetricFrame) -> Result<Vec<Vec<Vertex>>, PlanError> {
    let members: HashSet<u32> = cells.iter().copied().collect();
    let has = |row: isize, col: isize| -> bool {
        row >= 0
            && col >= 0
            && (row as usize) < frame.rows
            && (col as usize) < frame.cols
            && members.contains(&frame.index(row as usize, col as usize))
    };

    let mut edges: Vec<Edge> = Vec::new();
    let mut outgoing: BTreeMap<Vertex, Vec<usize>> = BTreeMap::new();
    let mut push = |edges: &mut Vec<Edge>, outgoing: &mut BTreeMap<Vertex, Vec<usize>>, from: Vertex, to: Vertex| {
        outgoing.entry(from).or_default().push(edges.len());
        edges.push(Edge {
            from,
            to,
            used: false,
        });
    };

    for &cell in cells {
        let (r, c) = frame.row_col(cell);
        let (ri, ci) = (r as isize, c as isize);
        if !has(ri - 1, ci) {
            push(&mut edges, &mut outgoing, (r, c + 1), (r, c));
        }
        if !has(ri + 1, ci) {
            push(&mut edges, &mut outgoing, (r + 1, c), (r + 1, c + 1));
        }
        if !has(ri, ci + 1) {
            push(&mut edges, &mut outgoing, (r + 1, c + 1), (r, c + 1));
        }
        if !has(ri, ci - 1) {
            push(&mut edges, &mut outgoing, (r, c), (r + 1, c));
        }
    }

    let mut rings = Vec::new();
    for start in 0..edges.len() {
        if edges[start].used {
            continue;
        }
        let origin = edges[start].from;
        let mut ring = vec![origin];
        let mut current = start;
        loop {
            edges[current].used = true;
            let head = edges[current].to;
            ring.push(head);
            if head == origin {
                break;
            }
            let incoming = direction(edges[current].from, head);
            let Some(next) = outgoing
                .get(&head)
                .and_then(|ids| pick_next(&edges, ids, incoming))
            else {
                return Err(PlanError::Internal(format!(
                    "boundary ring broke at vertex {head:?}"
                )));
            };
            current = next;
        }
        rings.push(ring);
    }
    Ok(rings)
}

/// At a branch vertex, prefer the sharpest left turn; this keeps rings that
/// touch at a corner separate instead of pinching them together.
fn pick_next(edges: &[Edge], ids: &[usize], incoming: (isize, isize)) -> Option<usize> {
    let left = (-incoming.1, incoming.0);
    let right = (incoming.1, -incoming.0);
    for want in [left, incoming, right] {
        for &id in ids {
            if !edges[id].used && direction(edges[id].from, edges[id].to) == want {
                return Some(id);
            }
        }
    }
    ids.iter().copied().find(|&id| !edges[id].used)
}

fn direction(from: Vertex, to: Vertex) -> (isize, isize) {
    (
        to.0 as isize - from.0 as isize,
        to.1 as isize - from.1 as isize,
    )
}

/// Turns traced rings into polygons: each counterclockwise ring is an
/// exterior, each clockwise ring becomes a hole of the exterior containing
/// it.
fn assemble_polygons(rings: Vec<Vec<Vertex>>, frame: &MetricFrame) -> Vec<Polygon<f64>> {
    let mut exteriors: Vec<(f64, LineString<f64>)> = Vec::new();
    let mut holes: Vec<LineString<f64>> = Vec::new();

    for ring in rings {
        let line = ring_to_line(&ring, frame);
        let area = signed_area(&line);
        if area > 0.0 {
            exteriors.push((area, line));
        } else {
            holes.push(line);
        }
    }
    // Largest exterior first so hole assignment finds the tightest container
    // last; grid holes are strictly inside exactly one exterior.
    exteriors.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut polygons: Vec<(Polygon<f64>, Vec<LineString<f64>>)> = exteriors
        .into_iter()
        .map(|(_, line)| (Polygon::new(line, vec![]), Vec::new()))
        .collect();

    'holes: for hole in holes {
        let probe = hole.centroid();
        if let Some(point) = probe {
            // Smallest containing exterior wins.
            for entry in polygons.iter_mut().rev() {
                if entry.0.intersects(&point) {
                    entry.1.push(hole);
                    continue 'holes;
                }
            }
        }
        if let Some(entry) = polygons.first_mut() {
            entry.1.push(hole);
        }
    }

    polygons
        .into_iter()
        .map(|(polygon, holes)| Polygon::new(polygon.exterior().clone(), holes))
        .collect()
}

fn ring_to_line(ring: &[Vertex], frame: &MetricFrame) -> LineString<f64> {
    LineString::new(
        ring.iter()
            .map(|&(r, c)| Coord {
                x: frame.west + c as f64 * frame.cell_size,
                y: frame.north - r as f64 * frame.cell_size,
            })
            .collect(),
    )
}

fn signed_area(line: &LineString<f64>) -> f64 {
    let coords = &line.0;
    let mut sum = 0.0;
    for w in coords.windows(2) {
        sum += w[0].x * w[1].y - w[1].x * w[0].y;
    }
    sum / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn frame() -> MetricFrame {
        MetricFrame {
            epsg: 32633,
            west: 0.0,
            north: 100.0,
            cell_size: 10.0,
            rows: 10,
            cols: 10,
        }
    }

    fn big_search() -> Polygon<f64> {
        polygon![
            (x: -50.0, y: -50.0),
            (x: 150.0, y: -50.0),
            (x: 150.0, y: 150.0),
            (x: -50.0, y: 150.0),
            (x: -50.0, y: -50.0),
        ]
    }

    fn indices(frame: &MetricFrame, cells: &[(usize, usize)]) -> Vec<u32> {
        let mut out: Vec<u32> = cells.iter().map(|&(r, c)| frame.index(r, c)).collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn single_cell_is_a_square() {
        let frame = frame();
        let cells = indices(&frame, &[(2, 3)]);
        let geom = build_segment_geometry(&cells, &frame, &big_search()).unwrap().unwrap();
        assert_eq!(geom.0.len(), 1);
        assert!((geom.unsigned_area() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn block_of_cells_merges_into_one_polygon() {
        let frame = frame();
        let cells = indices(&frame, &[(2, 2), (2, 3), (3, 2), (3, 3)]);
        let geom = build_segment_geometry(&cells, &frame, &big_search()).unwrap().unwrap();
        assert_eq!(geom.0.len(), 1);
        assert!((geom.unsigned_area() - 400.0).abs() < 1e-6);
    }

    #[test]
    fn l_shape_keeps_its_corners() {
        let frame = frame();
        let cells = indices(&frame, &[(2, 2), (3, 2), (3, 3)]);
        let geom = build_segment_geometry(&cells, &frame, &big_search()).unwrap().unwrap();
        assert_eq!(geom.0.len(), 1);
        assert!((geom.unsigned_area() - 300.0).abs() < 1e-6);
    }

    #[test]
    fn interior_holes_are_preserved() {
        let frame = frame();
        // 3x3 ring of cells with the middle missing.
        let cells = indices(
            &frame,
            &[
                (2, 2),
                (2, 3),
                (2, 4),
                (3, 2),
                (3, 4),
                (4, 2),
                (4, 3),
                (4, 4),
            ],
        );
        let geom = build_segment_geometry(&cells, &frame, &big_search()).unwrap().unwrap();
        assert_eq!(geom.0.len(), 1);
        assert_eq!(geom.0[0].interiors().len(), 1);
        assert!((geom.unsigned_area() - 800.0).abs() < 1e-6);
    }

    #[test]
    fn disconnected_groups_become_multipolygon_parts() {
        let frame = frame();
        let cells = indices(&frame, &[(1, 1), (7, 7)]);
        let geom = build_segment_geometry(&cells, &frame, &big_search()).unwrap().unwrap();
        assert_eq!(geom.0.len(), 2);
        assert!((geom.unsigned_area() - 200.0).abs() < 1e-6);
    }

    #[test]
    fn geometry_is_clipped_to_the_search_polygon() {
        let frame = frame();
        let cells = indices(&frame, &[(2, 2), (2, 3)]);
        // Search polygon covers only the left half of the two cells.
        let search = polygon![
            (x: 0.0, y: 0.0),
            (x: 35.0, y: 0.0),
            (x: 35.0, y: 100.0),
            (x: 0.0, y: 100.0),
            (x: 0.0, y: 0.0),
        ];
        let geom = build_segment_geometry(&cells, &frame, &search).unwrap().unwrap();
        assert!((geom.unsigned_area() - 150.0).abs() < 1e-6);
    }

    #[test]
    fn slivers_below_noise_are_dropped() {
        let frame = frame();
        let cells = indices(&frame, &[(2, 2)]);
        // Intersection leaves a 10 m x 2 m strip: 20 m2 < 25 m2 threshold.
        let search = polygon![
            (x: 20.0, y: 70.0),
            (x: 22.0, y: 70.0),
            (x: 22.0, y: 80.0),
            (x: 20.0, y: 80.0),
            (x: 20.0, y: 70.0),
        ];
        assert!(build_segment_geometry(&cells, &frame, &search).unwrap().is_none());
    }

    #[test]
    fn validation_accepts_disjoint_segments() {
        let frame = frame();
        let a = build_segment_geometry(&indices(&frame, &[(1, 1)]), &frame, &big_search())
            .unwrap()
            .unwrap();
        let b = build_segment_geometry(&indices(&frame, &[(5, 5)]), &frame, &big_search())
            .unwrap()
            .unwrap();
        assert!(validate_segments(&[a, b], &big_search(), 10.0).is_ok());
    }

    #[test]
    fn validation_rejects_overlap_and_leaks() {
        let frame = frame();
        let cells = indices(&frame, &[(2, 2), (2, 3), (3, 2), (3, 3)]);
        let a = build_segment_geometry(&cells, &frame, &big_search()).unwrap().unwrap();
        let b = a.clone();
        assert!(matches!(
            validate_segments(&[a.clone(), b], &big_search(), 10.0),
            Err(PlanError::Internal(_))
        ));

        // A segment escaping the search polygon is also fatal.
        let tiny_search = polygon![
            (x: 0.0, y: 0.0),
            (x: 5.0, y: 0.0),
            (x: 5.0, y: 5.0),
            (x: 0.0, y: 5.0),
            (x: 0.0, y: 0.0),
        ];
        assert!(matches!(
            validate_segments(&[a], &tiny_search, 10.0),
            Err(PlanError::Internal(_))
        ));
    }
}

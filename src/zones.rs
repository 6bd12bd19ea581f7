//! Grid cells to zone polygons.
//!
//! Two steps:
//! 1. Label 4-connected components of cells sharing a risk level. Diagonal
//!    neighbours are never joined.
//! 2. Trace each component's boundary along the cell lattice into closed
//!    rings. Every boundary edge is directed with the component on its left,
//!    so outer rings come out counter-clockwise and holes clockwise.
//!
//! Lattice vertices are `(x, y)` = `(col, row)` corner indices in `0..=size`.
//!
//! Where two diagonal cells of the same component meet at a single vertex
//! the tracer takes the clockwise-most exit. That keeps the outer ring and
//! the hole touching at that vertex as two separate simple rings instead of
//! one ring that visits the vertex twice.

use std::collections::{HashMap, VecDeque};

use crate::heatmap::RiskLevel;

/// Lattice vertex `(x, y)`.
pub type Vertex = (i64, i64);

/// A connected group of same-level cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub level: RiskLevel,
    /// `(row, col)` cells in discovery order
    pub cells: Vec<(usize, usize)>,
}

/// Label 4-connected components of a row-major `size × size` grid.
///
/// Components are numbered in row-major order of their first cell, which
/// makes the labelling deterministic for a fixed grid.
pub fn label_components(levels: &[Option<RiskLevel>], size: usize) -> Vec<Component> {
    debug_assert_eq!(levels.len(), size * size);

    let mut visited = vec![false; levels.len()];
    let mut components = Vec::new();

    for start in 0..levels.len() {
        let Some(level) = levels[start] else { continue };
        if visited[start] {
            continue;
        }

        let mut cells = Vec::new();
        let mut queue = VecDeque::from([start]);
        visited[start] = true;

        while let Some(idx) = queue.pop_front() {
            let (row, col) = (idx / size, idx % size);
            cells.push((row, col));

            let mut neighbours = Vec::with_capacity(4);
            if row > 0 {
                neighbours.push(idx - size);
            }
            if row + 1 < size {
                neighbours.push(idx + size);
            }
            if col > 0 {
                neighbours.push(idx - 1);
            }
            if col + 1 < size {
                neighbours.push(idx + 1);
            }

            for n in neighbours {
                if !visited[n] && levels[n] == Some(level) {
                    visited[n] = true;
                    queue.push_back(n);
                }
            }
        }

        components.push(Component { level, cells });
    }

    components
}

/// Boundary rings of one component.
#[derive(Debug, Clone, PartialEq)]
pub struct Rings {
    /// Counter-clockwise, closed (first vertex repeated last)
    pub exterior: Vec<Vertex>,
    /// Clockwise, closed
    pub holes: Vec<Vec<Vertex>>,
}

/// Trace the boundary of a set of cells.
///
/// `cells` must be non-empty and 4-connected.
pub fn trace_rings(cells: &[(usize, usize)], size: usize) -> Rings {
    let mut member = vec![false; size * size];
    for &(row, col) in cells {
        member[row * size + col] = true;
    }
    let inside = |row: i64, col: i64| -> bool {
        row >= 0
            && col >= 0
            && (row as usize) < size
            && (col as usize) < size
            && member[row as usize * size + col as usize]
    };

    // Directed boundary edges, component on the left
    let mut edges: Vec<(Vertex, Vertex)> = Vec::new();
    for &(row, col) in cells {
        let (r, c) = (row as i64, col as i64);
        if !inside(r - 1, c) {
            edges.push(((c, r), (c + 1, r)));
        }
        if !inside(r, c + 1) {
            edges.push(((c + 1, r), (c + 1, r + 1)));
        }
        if !inside(r + 1, c) {
            edges.push(((c + 1, r + 1), (c, r + 1)));
        }
        if !inside(r, c - 1) {
            edges.push(((c, r + 1), (c, r)));
        }
    }

    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::new();
    for (i, (from, _)) in edges.iter().enumerate() {
        outgoing.entry(*from).or_default().push(i);
    }

    let mut used = vec![false; edges.len()];
    let mut rings: Vec<Vec<Vertex>> = Vec::new();

    for first in 0..edges.len() {
        if used[first] {
            continue;
        }
        used[first] = true;

        let (start, mut current) = edges[first];
        let mut heading = direction(start, current);
        let mut ring = vec![start];

        while current != start {
            ring.push(current);
            let Some(next) = pick_exit(&edges, &outgoing, &used, current, heading) else {
                break;
            };
            used[next] = true;
            let (_, to) = edges[next];
            heading = direction(current, to);
            current = to;
        }

        rings.push(simplify_ring(ring));
    }

    // A 4-connected component has exactly one counter-clockwise ring
    let (mut outer, holes): (Vec<_>, Vec<_>) = rings.into_iter().partition(|r| signed_area2(r) > 0);
    outer.sort_by_key(|r| std::cmp::Reverse(signed_area2(r)));

    Rings {
        exterior: outer.into_iter().next().unwrap_or_default(),
        holes,
    }
}

fn direction(from: Vertex, to: Vertex) -> Vertex {
    ((to.0 - from.0).signum(), (to.1 - from.1).signum())
}

/// Unused exit from `at`, preferring right turn, then straight, then left.
fn pick_exit(
    edges: &[(Vertex, Vertex)],
    outgoing: &HashMap<Vertex, Vec<usize>>,
    used: &[bool],
    at: Vertex,
    heading: Vertex,
) -> Option<usize> {
    let (dx, dy) = heading;
    let preference = [(dy, -dx), (dx, dy), (-dy, dx)];
    let exits = outgoing.get(&at)?;

    preference.iter().find_map(|want| {
        exits
            .iter()
            .copied()
            .find(|&e| !used[e] && direction(at, edges[e].1) == *want)
    })
}

/// Drop collinear vertices and close the ring, starting from its lowest vertex.
fn simplify_ring(open: Vec<Vertex>) -> Vec<Vertex> {
    let n = open.len();
    let mut kept: Vec<Vertex> = (0..n)
        .filter(|&i| {
            let prev = open[(i + n - 1) % n];
            let cur = open[i];
            let next = open[(i + 1) % n];
            let cross = (cur.0 - prev.0) * (next.1 - cur.1) - (cur.1 - prev.1) * (next.0 - cur.0);
            cross != 0
        })
        .map(|i| open[i])
        .collect();

    if let Some(lowest) = kept
        .iter()
        .enumerate()
        .min_by_key(|(_, v)| (v.1, v.0))
        .map(|(i, _)| i)
    {
        kept.rotate_left(lowest);
    }
    if let Some(first) = kept.first().copied() {
        kept.push(first);
    }
    kept
}

/// Twice the signed shoelace area of a ring (closed or open); positive is CCW.
pub fn signed_area2(ring: &[Vertex]) -> i64 {
    if ring.len() < 3 {
        return 0;
    }
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (x1, y1) = ring[i];
            let (x2, y2) = ring[(i + 1) % n];
            x1 * y2 - x2 * y1
        })
        .sum()
}

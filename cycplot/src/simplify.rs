// Polyline reduction by repeatedly dropping the least significant vertex.
//
// Significance is the area of the triangle a vertex forms with its live
// neighbours. Vertices are linked by index into the untouched input slice, so
// splicing one out only rewrites the neighbours' links and scores.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use tracing::debug;

use crate::{Point, Point2Y};

/// Single-channel vertex.
pub trait Vertex {
    fn xy(&self) -> (f64, f64);
}

/// Vertex with two y channels over a shared x.
pub trait DualVertex {
    fn xyy(&self) -> (f64, f64, f64);
}

impl Vertex for Point {
    fn xy(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

impl Vertex for (f64, f64) {
    fn xy(&self) -> (f64, f64) {
        *self
    }
}

impl Vertex for [f64; 2] {
    fn xy(&self) -> (f64, f64) {
        (self[0], self[1])
    }
}

impl DualVertex for Point2Y {
    fn xyy(&self) -> (f64, f64, f64) {
        (self.x, self.y1, self.y2)
    }
}

impl DualVertex for (f64, f64, f64) {
    fn xyy(&self) -> (f64, f64, f64) {
        *self
    }
}

/// Reduce `points` to at most `max_len` vertices, keeping both endpoints.
///
/// Endpoints sit outside the priority queue, so `max_len - 2` interior
/// vertices survive. `max_len` below 2 is treated as 2. Inputs that already
/// fit are returned unchanged.
pub fn simplify<P: Vertex + Clone>(points: &[P], max_len: usize) -> Vec<P> {
    let max_len = max_len.max(2);
    if points.len() <= 2 || points.len() <= max_len {
        return points.to_vec();
    }

    let keep = reduce(points.len(), false, max_len - 2, |a, b, c| {
        triangle_area(points[a].xy(), points[b].xy(), points[c].xy())
    });
    debug!("Simplified series: {} -> {} points", points.len(), keep.len());
    keep.into_iter().map(|i| points[i].clone()).collect()
}

/// Dual-channel variant. Endpoints share the queue with an unreachable score
/// and the queue is drained down to `max_len`; scores add both channels'
/// signed doubled areas before taking the magnitude.
pub fn simplify_dual<P: DualVertex + Clone>(points: &[P], max_len: usize) -> Vec<P> {
    let max_len = max_len.max(2);
    if points.len() <= 2 || points.len() <= max_len {
        return points.to_vec();
    }

    let keep = reduce(points.len(), true, max_len, |a, b, c| {
        dual_area(points[a].xyy(), points[b].xyy(), points[c].xyy())
    });
    debug!(
        "Simplified dual series: {} -> {} points",
        points.len(),
        keep.len()
    );
    keep.into_iter().map(|i| points[i].clone()).collect()
}

pub(crate) fn triangle_area(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    (a.0 * (b.1 - c.1) + b.0 * (c.1 - a.1) + c.0 * (a.1 - b.1)).abs() / 2.0
}

pub(crate) fn dual_area(a: (f64, f64, f64), b: (f64, f64, f64), c: (f64, f64, f64)) -> f64 {
    let signed = |ya: f64, yb: f64, yc: f64| a.0 * (yb - yc) + b.0 * (yc - ya) + c.0 * (ya - yb);
    (signed(a.1, b.1, c.1) + signed(a.2, b.2, c.2)).abs()
}

#[derive(Clone, Copy, Debug)]
struct Link {
    prev: Option<usize>,
    next: Option<usize>,
    version: u32,
    alive: bool,
}

/// `(is_endpoint, score, index, version)`: endpoints order after every interior
/// vertex, even one whose score overflowed to infinity.
type Entry = Reverse<(bool, OrderedFloat<f64>, usize, u32)>;

/// Returns the surviving indices in ascending order. `score(prev, i, next)`
/// rates interior vertex `i`; endpoints are never scored or removed.
fn reduce<S>(len: usize, queue_endpoints: bool, budget: usize, score: S) -> Vec<usize>
where
    S: Fn(usize, usize, usize) -> f64,
{
    let last = len - 1;
    let mut links: Vec<Link> = (0..len)
        .map(|i| Link {
            prev: i.checked_sub(1),
            next: (i < last).then_some(i + 1),
            version: 0,
            alive: true,
        })
        .collect();

    let mut heap: BinaryHeap<Entry> = BinaryHeap::with_capacity(len);
    for i in 1..last {
        heap.push(Reverse((false, OrderedFloat(score(i - 1, i, i + 1)), i, 0)));
    }
    let mut queued = len - 2;
    if queue_endpoints {
        heap.push(Reverse((true, OrderedFloat(f64::INFINITY), 0, 0)));
        heap.push(Reverse((true, OrderedFloat(f64::INFINITY), last, 0)));
        queued += 2;
    }

    while queued > budget {
        let Some(Reverse((_, _, i, version))) = heap.pop() else {
            break;
        };
        let link = links[i];
        if !link.alive || link.version != version {
            continue;
        }
        if i == 0 || i == last {
            // Only reachable once every interior vertex is gone.
            break;
        }

        links[i].alive = false;
        queued -= 1;

        let (Some(prev), Some(next)) = (link.prev, link.next) else {
            unreachable!("interior vertex {i} lost a neighbour");
        };
        links[prev].next = Some(next);
        links[next].prev = Some(prev);

        for neighbour in [prev, next] {
            if neighbour == 0 || neighbour == last {
                continue;
            }
            let n = &mut links[neighbour];
            n.version += 1;
            let (Some(p), Some(q)) = (n.prev, n.next) else {
                continue;
            };
            heap.push(Reverse((
                false,
                OrderedFloat(score(p, neighbour, q)),
                neighbour,
                n.version,
            )));
        }
    }

    let mut out = Vec::with_capacity((budget + 2).min(len));
    let mut cursor = Some(0);
    while let Some(i) = cursor {
        out.push(i);
        cursor = links[i].next;
    }
    out
}

//! SAH-based BVH builder.
//!
//! Produces a flat node array plus the triangle order its leaves assume.
//! Split candidates are evaluated over binned centroids.

use super::bvh::{Aabb, Bvh, BvhNode, Triangle};
use crate::util::Vec3;

/// Number of SAH bins for split evaluation.
const NUM_BINS: usize = 12;

const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// Maximum triangles per leaf before forcing a split.
const MAX_LEAF_SIZE: usize = 4;

#[derive(Clone, Copy)]
struct Bin {
    bounds: Aabb,
    count: usize,
}

impl Bin {
    const EMPTY: Self = Self {
        bounds: Aabb::EMPTY,
        count: 0,
    };
}

struct Task {
    node: usize,
    start: usize,
    end: usize,
}

/// Build a BVH over `triangles`.
///
/// Returns the tree and the permutation leaves expect: leaf ranges index into
/// `order.iter().map(|&i| triangles[i])`.
#[tracing::instrument(skip_all, fields(tri_count = triangles.len()))]
pub fn build_bvh(triangles: &[Triangle]) -> (Bvh, Vec<usize>) {
    let n = triangles.len();
    if n == 0 {
        return (
            Bvh {
                nodes: vec![BvhNode::PLACEHOLDER],
            },
            Vec::new(),
        );
    }

    let centroids: Vec<Vec3> = triangles.iter().map(Triangle::centroid).collect();
    let aabbs: Vec<Aabb> = triangles.iter().map(Triangle::aabb).collect();
    let mut order: Vec<usize> = (0..n).collect();

    // A full binary tree has at most 2n - 1 nodes
    let mut nodes = Vec::with_capacity(2 * n);
    nodes.push(BvhNode::PLACEHOLDER);

    let mut stack = vec![Task {
        node: 0,
        start: 0,
        end: n,
    }];

    while let Some(Task { node, start, end }) = stack.pop() {
        let count = end - start;

        let mut bounds = Aabb::EMPTY;
        let mut centroid_bounds = Aabb::EMPTY;
        for &idx in &order[start..end] {
            bounds.grow(&aabbs[idx]);
            centroid_bounds.grow_point(centroids[idx]);
        }

        let leaf = BvhNode {
            bounds,
            left_or_first: start as u32,
            count: count as u32,
        };
        if count <= MAX_LEAF_SIZE {
            nodes[node] = leaf;
            continue;
        }

        // No split beats the leaf cost, or all centroids coincide
        let leaf_cost = count as f32 * INTERSECT_COST * bounds.area();
        let Some((axis, pos)) =
            find_best_split(&order[start..end], &aabbs, &centroids, &centroid_bounds)
                .filter(|&(_, _, cost)| cost < leaf_cost)
                .map(|(axis, pos, _)| (axis, pos))
        else {
            nodes[node] = leaf;
            continue;
        };

        let mid = partition(&mut order[start..end], |&idx| centroids[idx][axis] < pos) + start;
        let mid = if mid == start || mid == end {
            (start + end) / 2
        } else {
            mid
        };
        push_children(&mut nodes, &mut stack, node, bounds, start, mid, end);
    }

    (Bvh { nodes }, order)
}

fn push_children(
    nodes: &mut Vec<BvhNode>,
    stack: &mut Vec<Task>,
    node: usize,
    bounds: Aabb,
    start: usize,
    mid: usize,
    end: usize,
) {
    let left = nodes.len();
    nodes.push(BvhNode::PLACEHOLDER);
    nodes.push(BvhNode::PLACEHOLDER);
    nodes[node] = BvhNode {
        bounds,
        left_or_first: left as u32,
        count: 0,
    };
    // Right first so the left subtree is laid out first
    stack.push(Task {
        node: left + 1,
        start: mid,
        end,
    });
    stack.push(Task {
        node: left,
        start,
        end: mid,
    });
}

/// Binned SAH over all three axes: `(axis, split position, cost)`.
fn find_best_split(
    indices: &[usize],
    aabbs: &[Aabb],
    centroids: &[Vec3],
    centroid_bounds: &Aabb,
) -> Option<(usize, f32, f32)> {
    let mut best: Option<(usize, f32, f32)> = None;

    for axis in 0..3 {
        let lo = centroid_bounds.min[axis];
        let extent = centroid_bounds.max[axis] - lo;
        if extent < 1e-8 {
            continue;
        }

        let mut bins = [Bin::EMPTY; NUM_BINS];
        let scale = NUM_BINS as f32 / extent;
        for &idx in indices {
            let b = (((centroids[idx][axis] - lo) * scale) as usize).min(NUM_BINS - 1);
            bins[b].bounds.grow(&aabbs[idx]);
            bins[b].count += 1;
        }

        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = Aabb::EMPTY;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.grow(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = sweep.area();
            left_count[i] = sweep_count;
        }

        sweep = Aabb::EMPTY;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.grow(&bins[i].bounds);
            sweep_count += bins[i].count;
            if left_count[i - 1] == 0 || sweep_count == 0 {
                continue;
            }
            let cost = TRAVERSAL_COST
                + INTERSECT_COST
                    * (left_count[i - 1] as f32 * left_area[i - 1]
                        + sweep_count as f32 * sweep.area());
            if best.map_or(true, |(_, _, c)| cost < c) {
                best = Some((axis, lo + (i as f32 / NUM_BINS as f32) * extent, cost));
            }
        }
    }

    best
}

/// In-place partition; returns the number of elements matching `pred`.
fn partition<T>(slice: &mut [T], pred: impl Fn(&T) -> bool) -> usize {
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}

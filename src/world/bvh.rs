//! BVH node, triangle and ray types plus CPU traversal.
//!
//! Flat node layout:
//! - internal node: `left_or_first` = left child index (right = left + 1), `count` = 0
//! - leaf node: `left_or_first` = first triangle, `count` > 0

use smallvec::SmallVec;

use crate::util::Vec3;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::INFINITY,
        max: Vec3::NEG_INFINITY,
    };

    #[inline]
    pub fn grow_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn grow(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Surface area (SAH cost).
    #[inline]
    pub fn area(&self) -> f32 {
        let d = (self.max - self.min).max(Vec3::ZERO);
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    #[inline]
    pub fn centroid(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Entry distance of `ray` into the box, if it enters before `t_max`.
    #[inline]
    pub fn intersect(&self, origin: Vec3, inv_dir: Vec3, t_max: f32) -> Option<f32> {
        let t0 = (self.min - origin) * inv_dir;
        let t1 = (self.max - origin) * inv_dir;
        let near = t0.min(t1).max_element().max(0.0);
        let far = t0.max(t1).min_element().min(t_max);
        (near <= far).then_some(near)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BvhNode {
    pub bounds: Aabb,
    pub left_or_first: u32,
    pub count: u32,
}

impl BvhNode {
    pub(crate) const PLACEHOLDER: Self = Self {
        bounds: Aabb::EMPTY,
        left_or_first: 0,
        count: 0,
    };

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

/// World-space triangle. Counter-clockwise winding faces front.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub v0: Vec3,
    pub v1: Vec3,
    pub v2: Vec3,
    pub material: u32,
}

impl Triangle {
    pub fn aabb(&self) -> Aabb {
        let mut b = Aabb::EMPTY;
        b.grow_point(self.v0);
        b.grow_point(self.v1);
        b.grow_point(self.v2);
        b
    }

    pub fn centroid(&self) -> Vec3 {
        (self.v0 + self.v1 + self.v2) / 3.0
    }

    /// Unit geometric normal; zero for degenerate triangles.
    pub fn normal(&self) -> Vec3 {
        (self.v1 - self.v0).cross(self.v2 - self.v0).normalize_or_zero()
    }

    /// Möller-Trumbore. Returns `(t, u, v)` for hits in `(0, t_max)`.
    #[inline]
    pub fn intersect(&self, ray: &Ray, t_max: f32) -> Option<(f32, f32, f32)> {
        const EPS: f32 = 1e-9;
        let e1 = self.v1 - self.v0;
        let e2 = self.v2 - self.v0;
        let p = ray.dir.cross(e2);
        let det = e1.dot(p);
        if det.abs() < EPS {
            return None;
        }
        let inv_det = 1.0 / det;
        let s = ray.origin - self.v0;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(e1);
        let v = ray.dir.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = e2.dot(q) * inv_det;
        (t > 0.0 && t < t_max).then_some((t, u, v))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Vec3,
    /// Unit direction
    pub dir: Vec3,
}

impl Ray {
    #[inline]
    pub fn new(origin: Vec3, dir: Vec3) -> Self {
        Self { origin, dir }
    }

    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.dir * t
    }
}

/// Closest intersection along a ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub t: f32,
    /// Index into the scene's (BVH-ordered) triangle list
    pub triangle: u32,
    pub u: f32,
    pub v: f32,
    /// Ray arrived on the side the normal points to
    pub front_face: bool,
}

/// Flat BVH over a triangle list ordered to match its leaves.
#[derive(Debug, Clone)]
pub struct Bvh {
    /// Index 0 = root
    pub nodes: Vec<BvhNode>,
}

type TraversalStack = SmallVec<[u32; 64]>;

impl Bvh {
    /// Nearest hit in `(0, t_max)`.
    pub fn closest_hit(&self, triangles: &[Triangle], ray: &Ray, t_max: f32) -> Option<Hit> {
        if triangles.is_empty() {
            return None;
        }
        let inv_dir = ray.dir.recip();
        let mut best: Option<Hit> = None;
        let mut limit = t_max;
        let mut stack = TraversalStack::new();
        stack.push(0);

        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx as usize];
            if node.bounds.intersect(ray.origin, inv_dir, limit).is_none() {
                continue;
            }
            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for (i, tri) in triangles[first..first + node.count as usize].iter().enumerate() {
                    if let Some((t, u, v)) = tri.intersect(ray, limit) {
                        limit = t;
                        best = Some(Hit {
                            t,
                            triangle: (first + i) as u32,
                            u,
                            v,
                            front_face: ray.dir.dot(tri.normal()) < 0.0,
                        });
                    }
                }
                continue;
            }

            // Visit the nearer child first
            let left = node.left_or_first;
            let right = left + 1;
            let dl = self.nodes[left as usize].bounds.intersect(ray.origin, inv_dir, limit);
            let dr = self.nodes[right as usize].bounds.intersect(ray.origin, inv_dir, limit);
            match (dl, dr) {
                (Some(a), Some(b)) if a <= b => {
                    stack.push(right);
                    stack.push(left);
                }
                (Some(_), Some(_)) => {
                    stack.push(left);
                    stack.push(right);
                }
                (Some(_), None) => stack.push(left),
                (None, Some(_)) => stack.push(right),
                (None, None) => {}
            }
        }
        best
    }

    /// Whether anything blocks the ray before `t_max`.
    pub fn occluded(&self, triangles: &[Triangle], ray: &Ray, t_max: f32) -> bool {
        if triangles.is_empty() {
            return false;
        }
        let inv_dir = ray.dir.recip();
        let mut stack = TraversalStack::new();
        stack.push(0);

        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx as usize];
            if node.bounds.intersect(ray.origin, inv_dir, t_max).is_none() {
                continue;
            }
            if node.is_leaf() {
                let first = node.left_or_first as usize;
                if triangles[first..first + node.count as usize]
                    .iter()
                    .any(|tri| tri.intersect(ray, t_max).is_some())
                {
                    return true;
                }
            } else {
                stack.push(node.left_or_first);
                stack.push(node.left_or_first + 1);
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_tri() -> Triangle {
        // Faces +Z
        Triangle {
            v0: Vec3::new(-1.0, -1.0, 0.0),
            v1: Vec3::new(1.0, -1.0, 0.0),
            v2: Vec3::new(0.0, 1.0, 0.0),
            material: 0,
        }
    }

    #[test]
    fn test_triangle_hit_and_miss() {
        let tri = quad_tri();
        let hit = tri.intersect(&Ray::new(Vec3::new(0.0, 0.0, 5.0), -Vec3::Z), f32::INFINITY);
        let (t, _, _) = hit.unwrap();
        assert!((t - 5.0).abs() < 1e-5);

        assert!(tri
            .intersect(&Ray::new(Vec3::new(3.0, 0.0, 5.0), -Vec3::Z), f32::INFINITY)
            .is_none());
        // Behind the origin
        assert!(tri
            .intersect(&Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::Z), f32::INFINITY)
            .is_none());
        // Beyond t_max
        assert!(tri
            .intersect(&Ray::new(Vec3::new(0.0, 0.0, 5.0), -Vec3::Z), 4.0)
            .is_none());
    }

    #[test]
    fn test_aabb_slab() {
        let b = Aabb {
            min: Vec3::splat(-1.0),
            max: Vec3::splat(1.0),
        };
        let origin = Vec3::new(-5.0, 0.0, 0.0);
        let inv = Vec3::X.recip();
        assert_eq!(b.intersect(origin, inv, 100.0), Some(4.0));
        assert_eq!(b.intersect(origin, inv, 3.0), None);
        assert_eq!(b.intersect(origin, (-Vec3::X).recip(), 100.0), None);
    }

    #[test]
    fn test_face_orientation() {
        let tri = quad_tri();
        let bvh = crate::world::build_bvh(std::slice::from_ref(&tri)).0;
        let tris = [tri];

        let front = bvh
            .closest_hit(&tris, &Ray::new(Vec3::new(0.0, 0.0, 1.0), -Vec3::Z), f32::INFINITY)
            .unwrap();
        assert!(front.front_face);
        let back = bvh
            .closest_hit(&tris, &Ray::new(Vec3::new(0.0, 0.0, -1.0), Vec3::Z), f32::INFINITY)
            .unwrap();
        assert!(!back.front_face);
    }
}

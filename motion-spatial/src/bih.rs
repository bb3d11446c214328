//! Bounding interval hierarchy.

use nalgebra::Point3;
use tracing::debug;

use crate::{Aabb, Axis, Ray};

const MAX_DEPTH_CAP: usize = 100;

/// A node of the hierarchy.
///
/// A split node divides its range in two, where `planes[0]` is the maximum
/// of the left child's interval and `planes[1]` the minimum of the right
/// child's; the intervals may overlap. A clip node has a single child whose
/// interval is narrowed to `[planes[0], planes[1]]` — it appears when a
/// split leaves one side empty. The two children of a split are stored
/// contiguously at `child` and `child + 1`.
#[derive(Debug, Clone, Copy)]
enum Node {
    Split {
        axis: Axis,
        child: u32,
        planes: [f64; 2],
    },
    Clip {
        axis: Axis,
        child: u32,
        planes: [f64; 2],
    },
    Leaf {
        begin: u32,
        count: u32,
    },
}

/// Closest hit reported by [`Bih::trace`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BihHit {
    /// Hit parameter along the ray; traversal never reports farther hits.
    pub t: f64,
    /// Element id of the hit.
    pub id: u32,
}

impl Default for BihHit {
    fn default() -> Self {
        Self {
            t: f64::INFINITY,
            id: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct BuildFrame {
    node: u32,
    begin: usize,
    end: usize,
    depth: usize,
    split_box: Aabb,
}

/// A bounding interval hierarchy over a set of bounding boxes.
///
/// Built once with [`Bih::build`]; immutable afterwards except for
/// [`Bih::clear`]. Element ids are carried through construction so queries
/// report the caller's identifiers, not positions in the input slice.
#[derive(Debug, Clone, Default)]
pub struct Bih {
    max_depth: usize,
    nodes: Vec<Node>,
    ids: Vec<u32>,
}

impl Bih {
    /// Build a hierarchy over `boxes` with matching `centers`.
    ///
    /// `ids` supplies the element identifiers reported by queries; `None`
    /// means positional ids `0..n`. Subdivision stops when a range holds at
    /// most `leaf_size` elements or `max_depth` is reached (`0` picks
    /// `2·log2(n) + 1`).
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `boxes` and `centers` differ in length.
    #[must_use]
    pub fn build(
        boxes: &[Aabb],
        centers: &[Point3<f64>],
        ids: Option<Vec<u32>>,
        leaf_size: usize,
        max_depth: usize,
    ) -> Self {
        debug_assert_eq!(boxes.len(), centers.len());

        let n = centers.len();
        let mut bih = Self::default();
        if n == 0 {
            return bih;
        }

        bih.max_depth = if max_depth == 0 {
            ((n as f64).log2() as usize) * 2 + 1
        } else {
            max_depth
        }
        .min(MAX_DEPTH_CAP);

        bih.ids = match ids {
            Some(ids) => {
                debug_assert_eq!(ids.len(), n);
                ids
            }
            None => (0..n as u32).collect(),
        };
        let mut remap: Vec<u32> = (0..n as u32).collect();

        let root_box = boxes.iter().fold(Aabb::empty(), |acc, b| acc.merge(b));
        let mut split_box = root_box;

        bih.nodes.push(Node::Leaf { begin: 0, count: 0 });
        let mut stack: Vec<BuildFrame> = Vec::with_capacity(bih.max_depth);

        let mut node = 0u32;
        let mut begin = 0usize;
        let mut end = n;
        let mut depth = 1usize;
        let mut max_leaf = 0usize;

        loop {
            if end - begin <= leaf_size || depth >= bih.max_depth {
                bih.nodes[node as usize] = Node::Leaf {
                    begin: begin as u32,
                    count: (end - begin) as u32,
                };
                max_leaf = max_leaf.max(end - begin);

                match stack.pop() {
                    Some(frame) => {
                        node = frame.node;
                        begin = frame.begin;
                        end = frame.end;
                        depth = frame.depth;
                        split_box = frame.split_box;
                    }
                    None => break,
                }
                continue;
            }

            let axis = split_box.longest_axis();
            let split_plane = split_box.center_on(axis);
            let ai = axis.index();

            // Partition the range; elements may straddle the plane, so the
            // child boxes are allowed to overlap.
            let mut left_box = Aabb::empty();
            let mut right_box = Aabb::empty();
            let mut pivot = begin;
            for i in begin..end {
                let e = remap[i] as usize;
                if centers[e][ai] < split_plane {
                    left_box = left_box.merge(&boxes[e]);
                    remap.swap(i, pivot);
                    bih.ids.swap(i, pivot);
                    pivot += 1;
                } else {
                    right_box = right_box.merge(&boxes[e]);
                }
            }

            depth += 1;
            if pivot == begin {
                // Everything went right: narrow the interval with a clip node.
                let child = bih.nodes.len() as u32;
                bih.nodes[node as usize] = Node::Clip {
                    axis,
                    child,
                    planes: [right_box.min[ai], right_box.max[ai]],
                };
                bih.nodes.push(Node::Leaf { begin: 0, count: 0 });
                node = child;
                split_box.min[ai] = split_plane.max(right_box.min[ai]);
            } else if pivot == end {
                let child = bih.nodes.len() as u32;
                bih.nodes[node as usize] = Node::Clip {
                    axis,
                    child,
                    planes: [left_box.min[ai], left_box.max[ai]],
                };
                bih.nodes.push(Node::Leaf { begin: 0, count: 0 });
                node = child;
                split_box.max[ai] = split_plane.min(left_box.max[ai]);
            } else {
                let left = bih.nodes.len() as u32;
                bih.nodes[node as usize] = Node::Split {
                    axis,
                    child: left,
                    planes: [left_box.max[ai], right_box.min[ai]],
                };
                bih.nodes.push(Node::Leaf { begin: 0, count: 0 });
                bih.nodes.push(Node::Leaf { begin: 0, count: 0 });

                let mut right_split = split_box;
                right_split.min[ai] = split_plane;
                stack.push(BuildFrame {
                    node: left + 1,
                    begin: pivot,
                    end,
                    depth,
                    split_box: right_split,
                });

                node = left;
                end = pivot;
                split_box.max[ai] = split_plane;
            }
        }

        debug!(
            elements = n,
            nodes = bih.nodes.len(),
            max_depth = bih.max_depth,
            max_leaf, "built BIH"
        );
        bih
    }

    /// Whether the hierarchy holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of elements indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Drop all nodes and ids.
    pub fn clear(&mut self) {
        self.nodes = Vec::new();
        self.ids = Vec::new();
    }

    /// Trace `ray` through the hierarchy, keeping the closest hit.
    ///
    /// `intersect` receives the ray, an element id, and the current closest
    /// hit parameter; it returns `true` (after lowering the parameter) when
    /// the element is hit closer than the current best. Subtrees beyond the
    /// best hit are pruned. Returns `true` if any element was hit.
    pub fn trace<F>(&self, ray: &Ray, hit: &mut BihHit, mut intersect: F) -> bool
    where
        F: FnMut(&Ray, u32, &mut f64) -> bool,
    {
        if self.nodes.is_empty() {
            return false;
        }

        let inv_dir = ray.inv_direction();
        // Near-plane index per axis, by ray direction sign.
        let order = [
            usize::from(inv_dir.x < 0.0),
            usize::from(inv_dir.y < 0.0),
            usize::from(inv_dir.z < 0.0),
        ];

        let mut tmin = 0.0f64;
        let mut tmax = hit.t;
        let mut impact = false;

        let mut stack: Vec<(u32, f64, f64)> = Vec::with_capacity(self.max_depth);
        let mut node = 0u32;

        loop {
            match self.nodes[node as usize] {
                Node::Clip {
                    axis,
                    child,
                    planes,
                } => {
                    let ai = axis.index();
                    let t0 = (planes[order[ai]] - ray.origin[ai]) * inv_dir[ai];
                    let t1 = (planes[1 - order[ai]] - ray.origin[ai]) * inv_dir[ai];
                    node = child;
                    tmin = tmin.max(t0);
                    tmax = tmax.min(t1);
                }
                Node::Split {
                    axis,
                    child,
                    planes,
                } => {
                    let ai = axis.index();
                    let tplane0 = (planes[order[ai]] - ray.origin[ai]) * inv_dir[ai];
                    let tplane1 = (planes[1 - order[ai]] - ray.origin[ai]) * inv_dir[ai];

                    let near = child + order[ai] as u32;
                    let far = child + 1 - order[ai] as u32;

                    let traverse_near = tmin < tplane0;
                    let traverse_far = tmax > tplane1;

                    if traverse_near {
                        if traverse_far {
                            stack.push((far, tmin.max(tplane1), tmax));
                        }
                        node = near;
                        tmax = tmax.min(tplane0);
                    } else if traverse_far {
                        node = far;
                        tmin = tmin.max(tplane1);
                    } else {
                        loop {
                            let Some((n, t0, t1)) = stack.pop() else {
                                return impact;
                            };
                            node = n;
                            tmin = t0;
                            tmax = t1.min(hit.t);
                            if tmin <= tmax {
                                break;
                            }
                        }
                    }
                }
                Node::Leaf { begin, count } => {
                    for i in begin..begin + count {
                        let id = self.ids[i as usize];
                        if intersect(ray, id, &mut hit.t) {
                            impact = true;
                            hit.id = id;
                        }
                    }
                    loop {
                        let Some((n, t0, t1)) = stack.pop() else {
                            return impact;
                        };
                        node = n;
                        tmin = t0;
                        tmax = t1.min(hit.t);
                        if tmin <= tmax {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Collect the ids of all elements whose interval overlaps `query`.
    ///
    /// Returns `true` if anything was appended to `dst`.
    pub fn elements_in_box(&self, query: &Aabb, dst: &mut Vec<u32>) -> bool {
        self.elements_in_box_filtered(query, dst, |_, _| true)
    }

    /// Same as [`Bih::elements_in_box`], with a per-element predicate
    /// applied at the leaves.
    pub fn elements_in_box_filtered<F>(
        &self,
        query: &Aabb,
        dst: &mut Vec<u32>,
        mut inside: F,
    ) -> bool
    where
        F: FnMut(&Aabb, u32) -> bool,
    {
        if self.nodes.is_empty() {
            return false;
        }

        let before = dst.len();
        let mut stack: Vec<u32> = vec![0];

        while let Some(index) = stack.pop() {
            match self.nodes[index as usize] {
                Node::Split {
                    axis,
                    child,
                    planes,
                } => {
                    let (lo, hi) = query.slab(axis);
                    if lo <= planes[0] {
                        stack.push(child);
                    }
                    if planes[1] <= hi {
                        stack.push(child + 1);
                    }
                }
                Node::Clip {
                    axis,
                    child,
                    planes,
                } => {
                    let (lo, hi) = query.slab(axis);
                    if planes[0] <= hi && lo <= planes[1] {
                        stack.push(child);
                    }
                }
                Node::Leaf { begin, count } => {
                    for i in begin..begin + count {
                        let id = self.ids[i as usize];
                        if inside(query, id) {
                            dst.push(id);
                        }
                    }
                }
            }
        }

        dst.len() > before
    }
}

//! Binary AABB tree with quantized child bounds.

use tracing::debug;

use crate::{Aabb, Axis};

const LEFT_IS_NODE: u8 = 64;
const RIGHT_IS_NODE: u8 = 128;
const NO_CHILD: u32 = u32::MAX;

/// A tree node. Child bounds are stored as 8-bit interpolation factors
/// within the parent box: `bounds[0..3]` hold the minimum boundary per
/// axis, `bounds[3..6]` the maximum. Flag bits 0..3 record which child
/// inherits the parent's minimum on each axis, bits 3..6 the same for the
/// maximum; bits 6 and 7 mark the left and right child as interior nodes
/// rather than leaves.
#[derive(Debug, Clone, Copy)]
struct TreeNode {
    flags: u8,
    bounds: [u8; 6],
    left: u32,
    right: u32,
}

impl TreeNode {
    fn cleared() -> Self {
        Self {
            flags: 0,
            bounds: [0; 6],
            left: NO_CHILD,
            right: NO_CHILD,
        }
    }

    fn left_child(&self) -> Option<Child> {
        if self.left == NO_CHILD {
            None
        } else if self.flags & LEFT_IS_NODE != 0 {
            Some(Child::Node(self.left))
        } else {
            Some(Child::Leaf(self.left))
        }
    }

    fn right_child(&self) -> Option<Child> {
        if self.right == NO_CHILD {
            None
        } else if self.flags & RIGHT_IS_NODE != 0 {
            Some(Child::Node(self.right))
        } else {
            Some(Child::Leaf(self.right))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Child {
    /// Index of an interior node in the pool.
    Node(u32),
    /// Element id supplied at build time.
    Leaf(u32),
}

/// Arena allocator for tree nodes, shared between the trees of a world.
///
/// Trees do not own their interior nodes; they allocate from and release to
/// a pool passed explicitly to [`AabbTree::build`] and [`AabbTree::clear`].
#[derive(Debug, Clone, Default)]
pub struct NodePool {
    nodes: Vec<TreeNode>,
    free: Vec<u32>,
}

impl NodePool {
    /// Empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes currently allocated out of the pool.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Release everything, keeping the backing storage.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
    }

    fn alloc(&mut self) -> u32 {
        match self.free.pop() {
            Some(index) => {
                self.nodes[index as usize] = TreeNode::cleared();
                index
            }
            None => {
                let index = self.nodes.len() as u32;
                self.nodes.push(TreeNode::cleared());
                index
            }
        }
    }

    fn release(&mut self, index: u32) {
        self.free.push(index);
    }

    fn get(&self, index: u32) -> &TreeNode {
        &self.nodes[index as usize]
    }

    fn get_mut(&mut self, index: u32) -> &mut TreeNode {
        &mut self.nodes[index as usize]
    }
}

/// Quantize the two child boxes of `node` relative to `parent`.
///
/// On each axis one child inherits the parent boundary exactly and the
/// other is rounded outward to an 8-bit step, so the stored boxes always
/// contain the originals. `lbox` and `rbox` are replaced by their decoded
/// forms, which subsequent levels must quantize against.
fn encode_bounds(parent: &Aabb, node: &mut TreeNode, lbox: &mut Aabb, rbox: &mut Aabb) {
    let mut flags = 0u8;
    for i in 0..3 {
        let size = parent.max[i] - parent.min[i];
        let quantize = |value: f64, round_up: bool| -> u8 {
            if size > 0.0 {
                let q = 255.0 * ((value - parent.min[i]) / size);
                let q = if round_up { q.ceil() } else { q.floor() };
                q.clamp(0.0, 255.0) as u8
            } else {
                0
            }
        };
        let lerp = |q: u8| -> f64 {
            let t = f64::from(q) / 255.0;
            parent.min[i] * (1.0 - t) + parent.max[i] * t
        };

        // Minimum boundaries: the lesser min snaps to the parent, the
        // greater is floored (moved down) to stay conservative.
        if lbox.min[i] < rbox.min[i] {
            flags |= 1 << i;
            lbox.min[i] = parent.min[i];
            node.bounds[i] = quantize(rbox.min[i], false);
            rbox.min[i] = lerp(node.bounds[i]);
        } else {
            rbox.min[i] = parent.min[i];
            node.bounds[i] = quantize(lbox.min[i], false);
            lbox.min[i] = lerp(node.bounds[i]);
        }

        // Maximum boundaries: the greater max snaps, the lesser is ceiled.
        if lbox.max[i] > rbox.max[i] {
            flags |= 1 << (i + 3);
            lbox.max[i] = parent.max[i];
            node.bounds[i + 3] = quantize(rbox.max[i], true);
            rbox.max[i] = lerp(node.bounds[i + 3]);
        } else {
            rbox.max[i] = parent.max[i];
            node.bounds[i + 3] = quantize(lbox.max[i], true);
            lbox.max[i] = lerp(node.bounds[i + 3]);
        }
    }
    node.flags = flags | (node.flags & (LEFT_IS_NODE | RIGHT_IS_NODE));
}

/// Reconstruct the child boxes of `node` within `parent`.
fn decode_bounds(parent: &Aabb, node: &TreeNode) -> (Aabb, Aabb) {
    let mut lbox = Aabb::empty();
    let mut rbox = Aabb::empty();
    for i in 0..3 {
        let lerp = |q: u8| -> f64 {
            let t = f64::from(q) / 255.0;
            parent.min[i] * (1.0 - t) + parent.max[i] * t
        };
        let b0 = lerp(node.bounds[i]);
        let b1 = lerp(node.bounds[i + 3]);

        if node.flags & (1 << i) != 0 {
            lbox.min[i] = parent.min[i];
            rbox.min[i] = b0;
        } else {
            lbox.min[i] = b0;
            rbox.min[i] = parent.min[i];
        }
        if node.flags & (1 << (i + 3)) != 0 {
            lbox.max[i] = parent.max[i];
            rbox.max[i] = b1;
        } else {
            lbox.max[i] = b1;
            rbox.max[i] = parent.max[i];
        }
    }
    (lbox, rbox)
}

/// A binary AABB tree over element ids, with compressed interior bounds.
///
/// Build mutates the `boxes`/`elements` scratch slices in place while
/// partitioning. The root node lives inline; everything below it comes
/// from the [`NodePool`].
#[derive(Debug, Clone)]
pub struct AabbTree {
    bounds: Aabb,
    root: TreeNode,
    len: usize,
}

impl Default for AabbTree {
    fn default() -> Self {
        Self::new()
    }
}

impl AabbTree {
    /// Empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bounds: Aabb::empty(),
            root: TreeNode::cleared(),
            len: 0,
        }
    }

    /// Bounding box of the whole tree.
    #[must_use]
    pub fn region(&self) -> &Aabb {
        &self.bounds
    }

    /// Whether the tree holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of elements indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Release all interior nodes back to `pool` and reset the tree.
    pub fn clear(&mut self, pool: &mut NodePool) {
        if let Some(Child::Node(index)) = self.root.left_child() {
            release_subtree(pool, index);
        }
        if let Some(Child::Node(index)) = self.root.right_child() {
            release_subtree(pool, index);
        }
        self.root = TreeNode::cleared();
        self.bounds = Aabb::empty();
        self.len = 0;
    }

    /// Build the tree over `boxes`, reporting `elements[i]` for `boxes[i]`.
    ///
    /// Both slices are scratch space and are reordered during partitioning.
    /// The tree must be empty (freshly created or cleared).
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the slices differ in length.
    pub fn build(&mut self, pool: &mut NodePool, boxes: &mut [Aabb], elements: &mut [u32]) {
        debug_assert_eq!(boxes.len(), elements.len());
        debug_assert!(self.is_empty());

        self.len = boxes.len();
        if boxes.is_empty() {
            return;
        }

        self.bounds = boxes.iter().fold(Aabb::empty(), |acc, b| acc.merge(b));
        let bounds = self.bounds;
        let mut root = self.root;
        build_node(pool, &bounds, &mut root, boxes, elements);
        self.root = root;

        debug!(
            elements = self.len,
            nodes = pool.allocated(),
            "built AABB tree"
        );
    }

    /// Invoke `visit` with the id of every element whose stored box
    /// overlaps `query`.
    pub fn for_each_overlap<F>(&self, pool: &NodePool, query: &Aabb, mut visit: F)
    where
        F: FnMut(u32),
    {
        if self.is_empty() || !query.overlaps(&self.bounds) {
            return;
        }
        overlap_node(pool, query, &self.bounds, &self.root, &mut visit);
    }

    /// Invoke `visit(a, b)` for every overlapping pair with `a` from
    /// `self` and `b` from `other`.
    pub fn for_each_collision<F>(&self, pool: &NodePool, other: &Self, mut visit: F)
    where
        F: FnMut(u32, u32),
    {
        if self.is_empty() || other.is_empty() || !self.bounds.overlaps(&other.bounds) {
            return;
        }
        collide_nodes(
            pool,
            &self.bounds,
            &self.root,
            &other.bounds,
            &other.root,
            &mut visit,
        );
    }
}

fn release_subtree(pool: &mut NodePool, index: u32) {
    let node = *pool.get(index);
    if let Some(Child::Node(child)) = node.left_child() {
        release_subtree(pool, child);
    }
    if let Some(Child::Node(child)) = node.right_child() {
        release_subtree(pool, child);
    }
    pool.release(index);
}

fn build_node(
    pool: &mut NodePool,
    bounds: &Aabb,
    node: &mut TreeNode,
    boxes: &mut [Aabb],
    elements: &mut [u32],
) {
    let num = boxes.len();
    let mut lbox;
    let mut rbox;
    let mut pivot;

    if num <= 2 {
        pivot = 1;
        lbox = boxes[0];
        rbox = if num == 2 { boxes[1] } else { *bounds };
    } else {
        let mut axis = bounds.longest_axis();
        pivot = 0;
        lbox = Aabb::empty();
        rbox = Aabb::empty();
        for _ in 0..3 {
            let ai = axis.index();
            let mean = boxes.iter().map(|b| b.min[ai] + b.max[ai]).sum::<f64>()
                / (num as f64 * 2.0);

            lbox = Aabb::empty();
            rbox = Aabb::empty();
            pivot = 0;
            for e in 0..num {
                if boxes[e].center_on(axis) < mean {
                    lbox = lbox.merge(&boxes[e]);
                    elements.swap(e, pivot);
                    boxes.swap(e, pivot);
                    pivot += 1;
                } else {
                    rbox = rbox.merge(&boxes[e]);
                }
            }
            if pivot > 0 && pivot < num {
                break;
            }
            axis = axis.next();
        }
        // All centers coincide on every axis: split arbitrarily.
        if pivot == 0 || pivot == num {
            pivot = num / 2;
            lbox = boxes[..pivot].iter().fold(Aabb::empty(), |a, b| a.merge(b));
            rbox = boxes[pivot..].iter().fold(Aabb::empty(), |a, b| a.merge(b));
        }
    }

    encode_bounds(bounds, node, &mut lbox, &mut rbox);

    let (left_slice, right_slice) = boxes.split_at_mut(pivot);
    let (left_elems, right_elems) = elements.split_at_mut(pivot);

    if pivot == 1 {
        node.left = left_elems[0];
    } else {
        node.flags |= LEFT_IS_NODE;
        let child = pool.alloc();
        node.left = child;
        let mut child_node = *pool.get(child);
        build_node(pool, &lbox, &mut child_node, left_slice, left_elems);
        *pool.get_mut(child) = child_node;
    }

    match num - pivot {
        0 => {}
        1 => node.right = right_elems[0],
        _ => {
            node.flags |= RIGHT_IS_NODE;
            let child = pool.alloc();
            node.right = child;
            let mut child_node = *pool.get(child);
            build_node(pool, &rbox, &mut child_node, right_slice, right_elems);
            *pool.get_mut(child) = child_node;
        }
    }
}

fn overlap_node<F>(pool: &NodePool, query: &Aabb, bounds: &Aabb, node: &TreeNode, visit: &mut F)
where
    F: FnMut(u32),
{
    let (lbox, rbox) = decode_bounds(bounds, node);

    if query.overlaps(&lbox) {
        match node.left_child() {
            Some(Child::Node(index)) => {
                overlap_node(pool, query, &lbox, pool.get(index), visit);
            }
            Some(Child::Leaf(id)) => visit(id),
            None => {}
        }
    }
    if query.overlaps(&rbox) {
        match node.right_child() {
            Some(Child::Node(index)) => {
                overlap_node(pool, query, &rbox, pool.get(index), visit);
            }
            Some(Child::Leaf(id)) => visit(id),
            None => {}
        }
    }
}

/// Leaf `a` against the subtree under `node`.
fn collide_leaf<F>(
    pool: &NodePool,
    a: u32,
    bounds_a: &Aabb,
    bounds_b: &Aabb,
    node: &TreeNode,
    visit: &mut F,
) where
    F: FnMut(u32, u32),
{
    let (lbox, rbox) = decode_bounds(bounds_b, node);

    if bounds_a.overlaps(&lbox) {
        match node.left_child() {
            Some(Child::Node(index)) => {
                collide_leaf(pool, a, bounds_a, &lbox, pool.get(index), visit);
            }
            Some(Child::Leaf(b)) => visit(a, b),
            None => {}
        }
    }
    if bounds_a.overlaps(&rbox) {
        match node.right_child() {
            Some(Child::Node(index)) => {
                collide_leaf(pool, a, bounds_a, &rbox, pool.get(index), visit);
            }
            Some(Child::Leaf(b)) => visit(a, b),
            None => {}
        }
    }
}

fn collide_nodes<F>(
    pool: &NodePool,
    bounds_a: &Aabb,
    node_a: &TreeNode,
    bounds_b: &Aabb,
    node_b: &TreeNode,
    visit: &mut F,
) where
    F: FnMut(u32, u32),
{
    // Descend into the larger subtree first.
    if bounds_a.volume() > bounds_b.volume() {
        let (lbox, rbox) = decode_bounds(bounds_a, node_a);

        if lbox.overlaps(bounds_b) {
            match node_a.left_child() {
                Some(Child::Node(index)) => {
                    collide_nodes(pool, &lbox, pool.get(index), bounds_b, node_b, visit);
                }
                Some(Child::Leaf(a)) => {
                    collide_leaf(pool, a, &lbox, bounds_b, node_b, visit);
                }
                None => {}
            }
        }
        if rbox.overlaps(bounds_b) {
            match node_a.right_child() {
                Some(Child::Node(index)) => {
                    collide_nodes(pool, &rbox, pool.get(index), bounds_b, node_b, visit);
                }
                Some(Child::Leaf(a)) => {
                    collide_leaf(pool, a, &rbox, bounds_b, node_b, visit);
                }
                None => {}
            }
        }
    } else {
        let (lbox, rbox) = decode_bounds(bounds_b, node_b);

        if lbox.overlaps(bounds_a) {
            match node_b.left_child() {
                Some(Child::Node(index)) => {
                    collide_nodes(pool, bounds_a, node_a, &lbox, pool.get(index), visit);
                }
                Some(Child::Leaf(b)) => {
                    let mut swapped = |a: u32, b2: u32| visit(b2, a);
                    collide_leaf(pool, b, &lbox, bounds_a, node_a, &mut swapped);
                }
                None => {}
            }
        }
        if rbox.overlaps(bounds_a) {
            match node_b.right_child() {
                Some(Child::Node(index)) => {
                    collide_nodes(pool, bounds_a, node_a, &rbox, pool.get(index), visit);
                }
                Some(Child::Leaf(b)) => {
                    let mut swapped = |a: u32, b2: u32| visit(b2, a);
                    collide_leaf(pool, b, &rbox, bounds_a, node_a, &mut swapped);
                }
                None => {}
            }
        }
    }
}

//! Scene graph for payload-driven visualization.
//!
//! Nodes live in an arena keyed by [`NodeId`]. A node is part of the rendered
//! scene only when it is attached under the root (directly or through a
//! parent chain); nodes created by a script but never added stay detached.

use std::collections::HashMap;

use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::color::Rgb;
use crate::resources::{GeometryHandle, MaterialHandle};

/// Unique identifier for scene nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Transform component for scene nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    /// Euler angles in radians, applied in XYZ order.
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn matrix(&self) -> Mat4 {
        let rotation = Quat::from_euler(
            EulerRot::XYZ,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
        );
        Mat4::from_scale_rotation_translation(self.scale, rotation, self.position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Ambient,
    Directional,
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Rgb,
    pub intensity: f32,
}

/// Geometry plus one or more materials.
#[derive(Debug, Clone, PartialEq)]
pub struct Renderable {
    pub geometry: GeometryHandle,
    pub materials: Vec<MaterialHandle>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Group,
    Mesh(Renderable),
    Points(Renderable),
    /// Connected line strip.
    Line(Renderable),
    Light(Light),
}

impl NodeKind {
    pub fn renderable(&self) -> Option<&Renderable> {
        match self {
            NodeKind::Mesh(r) | NodeKind::Points(r) | NodeKind::Line(r) => Some(r),
            NodeKind::Group | NodeKind::Light(_) => None,
        }
    }

    pub fn light(&self) -> Option<&Light> {
        match self {
            NodeKind::Light(l) => Some(l),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Group => "Group",
            NodeKind::Mesh(_) => "Mesh",
            NodeKind::Points(_) => "Points",
            NodeKind::Line(_) => "Line",
            NodeKind::Light(_) => "Light",
        }
    }
}

/// Who put a node into the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeOrigin {
    /// Installed by the scene context itself (default lights).
    Context,
    /// Built by a payload or the idle generator.
    #[default]
    Content,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub transform: Transform,
    pub visible: bool,
    pub origin: NodeOrigin,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attached_to_root: bool,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            name: String::new(),
            kind,
            transform: Transform::default(),
            visible: true,
            origin: NodeOrigin::Content,
            parent: None,
            children: Vec::new(),
            attached_to_root: false,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_light(&self) -> bool {
        matches!(self.kind, NodeKind::Light(_))
    }
}

/// Exponential-squared fog.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fog {
    pub color: Rgb,
    pub density: f32,
}

/// Scene background color.
pub const DEFAULT_BACKGROUND: u32 = 0x050510;
pub const DEFAULT_FOG_DENSITY: f32 = 0.02;

#[derive(Debug)]
pub struct SceneGraph {
    nodes: HashMap<NodeId, Node>,
    /// Direct children of the scene root, in insertion order.
    root_children: Vec<NodeId>,
    next_id: u64,
    pub background: Rgb,
    pub fog: Option<Fog>,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        let background = Rgb::from_hex(DEFAULT_BACKGROUND);
        Self {
            nodes: HashMap::new(),
            root_children: Vec::new(),
            next_id: 1,
            background,
            fog: Some(Fog {
                color: background,
                density: DEFAULT_FOG_DENSITY,
            }),
        }
    }

    /// Restore background and fog to the context defaults.
    pub fn reset_environment(&mut self) {
        let defaults = SceneGraph::new();
        self.background = defaults.background;
        self.fog = defaults.fog;
    }

    /// Create a detached node.
    pub fn create(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(kind));
        id
    }

    pub fn create_named(&mut self, name: &str, kind: NodeKind) -> NodeId {
        let id = self.create(kind);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.name = name.to_string();
        }
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn exists(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn root_children(&self) -> &[NodeId] {
        &self.root_children
    }

    /// Attach a node directly under the scene root. Re-parents if needed.
    pub fn add(&mut self, id: NodeId) -> bool {
        if !self.nodes.contains_key(&id) {
            return false;
        }
        self.detach(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.attached_to_root = true;
        }
        self.root_children.push(id);
        true
    }

    /// Attach `child` under `parent`. Refuses cycles and unknown nodes.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if parent == child || !self.exists(parent) || !self.exists(child) {
            return false;
        }
        if self.is_ancestor(child, parent) {
            return false;
        }
        self.detach(child);
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(child);
        }
        true
    }

    fn is_ancestor(&self, ancestor: NodeId, mut id: NodeId) -> bool {
        while let Some(parent) = self.nodes.get(&id).and_then(|n| n.parent) {
            if parent == ancestor {
                return true;
            }
            id = parent;
        }
        false
    }

    /// Detach a node from its parent or the root. The node keeps existing.
    pub fn detach(&mut self, id: NodeId) -> bool {
        let (parent, at_root) = match self.nodes.get(&id) {
            Some(node) => (node.parent, node.attached_to_root),
            None => return false,
        };
        if at_root {
            self.root_children.retain(|c| *c != id);
        }
        if let Some(parent) = parent {
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.children.retain(|c| *c != id);
            }
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = None;
            node.attached_to_root = false;
        }
        at_root || parent.is_some()
    }

    /// Remove a node and its whole subtree from the arena.
    /// Returns the removed nodes, subtree root first.
    pub fn destroy(&mut self, id: NodeId) -> Vec<Node> {
        if !self.exists(id) {
            return Vec::new();
        }
        self.detach(id);
        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children.iter().rev().copied());
                removed.push(node);
            }
        }
        removed
    }

    /// Whether the node is reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            match self.nodes.get(&current) {
                Some(node) if node.attached_to_root => return true,
                Some(node) => match node.parent {
                    Some(parent) => current = parent,
                    None => return false,
                },
                None => return false,
            }
        }
    }

    /// Subtree of `id` in depth-first pre-order, `id` included.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                out.push(current);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Every attached node in depth-first pre-order.
    pub fn attached(&self) -> Vec<NodeId> {
        self.root_children
            .iter()
            .flat_map(|root| self.subtree(*root))
            .collect()
    }

    /// Nodes not reachable from the root.
    pub fn detached(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .keys()
            .copied()
            .filter(|id| !self.is_attached(*id))
            .collect();
        ids.sort();
        ids
    }

    /// First attached node with the given name, depth-first.
    pub fn get_by_name(&self, name: &str) -> Option<NodeId> {
        let mut stack: Vec<NodeId> = self.root_children.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            if node.name == name {
                return Some(current);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }

    /// World matrix, walking up the parent chain.
    pub fn world_matrix(&self, id: NodeId) -> Mat4 {
        let mut matrix = Mat4::IDENTITY;
        let mut current = Some(id);
        while let Some(node_id) = current {
            match self.nodes.get(&node_id) {
                Some(node) => {
                    matrix = node.transform.matrix() * matrix;
                    current = node.parent;
                }
                None => break,
            }
        }
        matrix
    }

    /// Visible only if the node and all its ancestors are visible.
    pub fn is_visible(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            match self.nodes.get(&node_id) {
                Some(node) if node.visible => current = node.parent,
                _ => return false,
            }
        }
        true
    }

    /// Attached nodes that did not come from the context.
    pub fn content_count(&self) -> usize {
        self.attached()
            .iter()
            .filter(|id| {
                self.nodes
                    .get(id)
                    .is_some_and(|n| n.origin == NodeOrigin::Content)
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderable() -> Renderable {
        Renderable {
            geometry: GeometryHandle(1),
            materials: vec![MaterialHandle(2)],
        }
    }

    #[test]
    fn test_create_and_add() {
        let mut scene = SceneGraph::new();
        let id = scene.create(NodeKind::Mesh(renderable()));

        assert!(scene.exists(id));
        assert!(!scene.is_attached(id));

        assert!(scene.add(id));
        assert!(scene.is_attached(id));
        assert_eq!(scene.root_children(), &[id]);

        // Adding again re-attaches without duplicating
        assert!(scene.add(id));
        assert_eq!(scene.root_children().len(), 1);
    }

    #[test]
    fn test_children_follow_parent() {
        let mut scene = SceneGraph::new();
        let group = scene.create(NodeKind::Group);
        let child = scene.create_named("arm", NodeKind::Mesh(renderable()));
        assert!(scene.add_child(group, child));
        assert!(!scene.is_attached(child));

        scene.add(group);
        assert!(scene.is_attached(child));
        assert_eq!(scene.get_by_name("arm"), Some(child));
        assert_eq!(scene.attached(), vec![group, child]);
    }

    #[test]
    fn test_add_child_rejects_cycle() {
        let mut scene = SceneGraph::new();
        let a = scene.create(NodeKind::Group);
        let b = scene.create(NodeKind::Group);
        assert!(scene.add_child(a, b));
        assert!(!scene.add_child(b, a));
        assert!(!scene.add_child(a, a));
    }

    #[test]
    fn test_get_by_name_ignores_detached() {
        let mut scene = SceneGraph::new();
        let id = scene.create_named("idle_viz", NodeKind::Group);
        assert_eq!(scene.get_by_name("idle_viz"), None);
        scene.add(id);
        assert_eq!(scene.get_by_name("idle_viz"), Some(id));
        scene.detach(id);
        assert_eq!(scene.get_by_name("idle_viz"), None);
    }

    #[test]
    fn test_get_by_name_prefers_first_in_depth_first_order() {
        let mut scene = SceneGraph::new();
        let group = scene.create_named("system", NodeKind::Group);
        let nested = scene.create_named("planet", NodeKind::Mesh(renderable()));
        let later = scene.create_named("planet", NodeKind::Mesh(renderable()));
        scene.add_child(group, nested);
        scene.add(group);
        scene.add(later);
        assert_eq!(scene.get_by_name("planet"), Some(nested));

        scene.detach(nested);
        assert_eq!(scene.get_by_name("planet"), Some(later));
        assert_eq!(scene.get_by_name("moon"), None);
    }

    #[test]
    fn test_destroy_removes_subtree() {
        let mut scene = SceneGraph::new();
        let group = scene.create(NodeKind::Group);
        let child = scene.create(NodeKind::Mesh(renderable()));
        scene.add_child(group, child);
        scene.add(group);

        let removed = scene.destroy(group);
        assert_eq!(removed.len(), 2);
        assert!(!scene.exists(group));
        assert!(!scene.exists(child));
        assert!(scene.root_children().is_empty());
    }

    #[test]
    fn test_world_matrix_composes_parents() {
        let mut scene = SceneGraph::new();
        let parent = scene.create(NodeKind::Group);
        let child = scene.create(NodeKind::Group);
        scene.add_child(parent, child);
        scene.get_mut(parent).unwrap().transform.position = Vec3::new(1.0, 0.0, 0.0);
        scene.get_mut(child).unwrap().transform.position = Vec3::new(0.0, 2.0, 0.0);

        let world = scene.world_matrix(child);
        let origin = world.transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_visibility_inherits() {
        let mut scene = SceneGraph::new();
        let parent = scene.create(NodeKind::Group);
        let child = scene.create(NodeKind::Group);
        scene.add_child(parent, child);
        assert!(scene.is_visible(child));
        scene.get_mut(parent).unwrap().visible = false;
        assert!(!scene.is_visible(child));
    }

    #[test]
    fn test_reset_environment() {
        let mut scene = SceneGraph::new();
        scene.background = Rgb::WHITE;
        scene.fog = None;
        scene.reset_environment();
        assert_eq!(scene.background.to_hex(), DEFAULT_BACKGROUND);
        assert_eq!(scene.fog.map(|f| f.density), Some(DEFAULT_FOG_DENSITY));
    }
}

//! Frees the previous scene's content before new content is installed.
//!
//! Walks every node attached under the root, disposes the geometry, the
//! materials and any textures reachable from those materials, then detaches
//! the node. Lights are kept or dropped according to [`LightRetention`].
//! Nodes that were created but never attached, and resources that no
//! surviving node references, are swept as well.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::resources::{ResourceId, ResourceRegistry};
use crate::scene_graph::{NodeId, NodeOrigin, SceneGraph};

/// Which light nodes survive a reclaim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightRetention {
    /// Keep the context's default lights, drop payload lights.
    #[default]
    Defaults,
    /// Keep every light attached directly under the root.
    All,
    /// Drop every light.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReclaimPolicy {
    #[serde(default)]
    pub lights: LightRetention,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub nodes_removed: usize,
    pub lights_kept: usize,
    pub geometries: usize,
    pub materials: usize,
    pub textures: usize,
    /// Resources freed because nothing referenced them anymore.
    pub swept: usize,
}

impl ReclaimReport {
    pub fn disposed(&self) -> usize {
        self.geometries + self.materials + self.textures + self.swept
    }
}

fn keeps(policy: &ReclaimPolicy, scene: &SceneGraph, id: NodeId) -> bool {
    let Some(node) = scene.get(id) else {
        return false;
    };
    if !node.is_light() {
        return false;
    }
    match policy.lights {
        LightRetention::Defaults => node.origin == NodeOrigin::Context,
        LightRetention::All => true,
        LightRetention::None => false,
    }
}

/// Detach kept context nodes nested under `root` so destroying it spares them.
fn rescue_context_nodes(policy: &ReclaimPolicy, scene: &mut SceneGraph, root: NodeId) -> usize {
    let nested: Vec<NodeId> = scene
        .subtree(root)
        .into_iter()
        .skip(1)
        .filter(|id| scene.get(*id).is_some_and(|n| n.origin == NodeOrigin::Context))
        .filter(|id| keeps(policy, scene, *id))
        .collect();
    for id in &nested {
        scene.detach(*id);
    }
    nested.len()
}

/// Resources referenced by a node, including textures behind its materials.
fn node_resources(scene: &SceneGraph, resources: &ResourceRegistry, id: NodeId) -> Vec<ResourceId> {
    let mut out = Vec::new();
    let Some(renderable) = scene.get(id).and_then(|n| n.kind.renderable()) else {
        return out;
    };
    out.push(ResourceId::Geometry(renderable.geometry));
    for material in &renderable.materials {
        out.push(ResourceId::Material(*material));
        if let Some(m) = resources.material(*material) {
            out.extend(m.textures().map(ResourceId::Texture));
        }
    }
    out
}

fn dispose_into(resources: &mut ResourceRegistry, id: ResourceId, report: &mut ReclaimReport) {
    if !resources.dispose(id) {
        return;
    }
    match id {
        ResourceId::Geometry(_) => report.geometries += 1,
        ResourceId::Material(_) => report.materials += 1,
        ResourceId::Texture(_) => report.textures += 1,
    }
}

/// Clear the scene for the next install.
pub fn reclaim(
    scene: &mut SceneGraph,
    resources: &mut ResourceRegistry,
    policy: &ReclaimPolicy,
) -> ReclaimReport {
    let mut report = ReclaimReport::default();

    let roots: Vec<NodeId> = scene.root_children().to_vec();
    let mut doomed: Vec<NodeId> = Vec::new();
    for root in roots {
        if keeps(policy, scene, root) {
            report.lights_kept += 1;
        } else {
            doomed.push(root);
        }
    }
    // Content that was built but never attached goes too, except kept lights.
    for id in scene.detached() {
        let parent_is_detached_root = scene.get(id).is_some_and(|n| n.parent().is_none());
        if parent_is_detached_root && !keeps(policy, scene, id) {
            doomed.push(id);
        }
    }

    for root in doomed {
        report.lights_kept += rescue_context_nodes(policy, scene, root);
        // Textures are collected before materials are disposed.
        let ids: Vec<ResourceId> = scene
            .subtree(root)
            .into_iter()
            .flat_map(|id| node_resources(scene, resources, id))
            .collect();
        for id in ids {
            dispose_into(resources, id, &mut report);
        }
        report.nodes_removed += scene.destroy(root).len();
    }

    // Anything still live that no surviving node points at is unreachable.
    let referenced: BTreeSet<ResourceId> = scene
        .attached()
        .into_iter()
        .chain(scene.detached())
        .flat_map(|id| node_resources(scene, resources, id))
        .collect();
    for id in resources.live_ids() {
        if !referenced.contains(&id) && resources.dispose(id) {
            report.swept += 1;
        }
    }

    report
}

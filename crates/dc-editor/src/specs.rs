//! Built-in trackable specifications: diagram root, layer, node, edge and
//! stylesheet.
//!
//! Structural edits keep ordering lists and storage in step: adding a child
//! stores it and inserts its id into the parent's list, removing a child
//! purges it (descendants first) and drops its id. Both mark the parent and
//! every touched element dirty on the unit of work before mutating, so the
//! before-snapshots describe the pre-edit state.

use crate::trackable::{Entity, Snapshot, SpecRegistry, TrackableRef, TrackableSpecification};
use crate::uow::UnitOfWork;
use dc_core::{
    Diagram, DiagramEdge, DiagramNode, DiagramRoot, ElementId, ElementKind, Endpoint, Error, Layer,
    Result, Stylesheet,
};

pub(crate) fn register_defaults(registry: &mut SpecRegistry) {
    registry
        .register(DiagramSpec)
        .register(LayerSpec)
        .register(NodeSpec)
        .register(EdgeSpec)
        .register(StylesheetSpec);
}

fn mismatch(expected: ElementKind, got: &Snapshot) -> ! {
    panic!(
        "{} specification handed a {} snapshot",
        expected.as_str(),
        got.kind().as_str()
    )
}

/// Clamp an insertion index; `None` appends.
fn position(len: usize, index: Option<usize>) -> usize {
    index.map_or(len, |i| i.min(len))
}

/// Remove `target` and everything beneath it.
///
/// Nodes detach their connected edges first, leaving the edge end free at the
/// node's center.
pub(crate) fn purge(uow: &mut UnitOfWork<'_>, target: TrackableRef) {
    let registry = uow.registry();
    let spec = registry.get(target.kind);
    uow.update_element(target);
    for child in spec.children(uow.diagram(), target.id) {
        purge(uow, child);
    }
    if target.kind == ElementKind::Node {
        detach_edges(uow, target.id);
    }
    log::trace!("purge {target}");
    spec.discard(uow.diagram_mut(), target.id);
}

fn detach_edges(uow: &mut UnitOfWork<'_>, node_id: ElementId) {
    let Some((cx, cy)) = uow.diagram().node(node_id).map(|n| n.bounds.center()) else {
        return;
    };
    for edge_id in uow.diagram().edges_connected_to(node_id) {
        uow.update_element(TrackableRef::edge(edge_id));
        if let Some(edge) = uow.diagram_mut().edge_mut(edge_id) {
            for end in [&mut edge.start, &mut edge.end] {
                if end.node() == Some(node_id) {
                    *end = Endpoint::Free { x: cx, y: cy };
                }
            }
        }
    }
}

/// Clear every node and edge style reference to `sheet`.
fn clear_style_refs(uow: &mut UnitOfWork<'_>, sheet: ElementId) {
    let mut users: Vec<TrackableRef> = uow
        .diagram()
        .nodes()
        .filter(|n| n.style == Some(sheet))
        .map(|n| TrackableRef::node(n.id))
        .chain(
            uow.diagram()
                .edges()
                .filter(|e| e.style == Some(sheet))
                .map(|e| TrackableRef::edge(e.id)),
        )
        .collect();
    users.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));

    for user in users {
        uow.update_element(user);
        let diagram = uow.diagram_mut();
        match user.kind {
            ElementKind::Node => {
                if let Some(n) = diagram.node_mut(user.id) {
                    n.style = None;
                }
            }
            _ => {
                if let Some(e) = diagram.edge_mut(user.id) {
                    e.style = None;
                }
            }
        }
    }
}

fn check_style(diagram: &Diagram, owner: ElementId, style: Option<ElementId>) -> Result<()> {
    match style {
        Some(s) if diagram.stylesheet(s).is_none() => Err(Error::DanglingReference { from: owner, to: s }),
        _ => Ok(()),
    }
}

/// New nodes arrive without children; nesting goes through `add_child`.
fn validate_node(diagram: &Diagram, node: &DiagramNode) -> Result<()> {
    if let Some(first) = node.children.first() {
        return Err(Error::InvalidChild {
            parent: node.id,
            child: *first,
        });
    }
    check_style(diagram, node.id, node.style)
}

fn validate_edge(diagram: &Diagram, edge: &DiagramEdge) -> Result<()> {
    for end in [&edge.start, &edge.end] {
        if let Some(node) = end.node()
            && diagram.node(node).is_none()
        {
            return Err(Error::DanglingReference {
                from: edge.id,
                to: node,
            });
        }
    }
    check_style(diagram, edge.id, edge.style)
}

fn ensure_new(diagram: &Diagram, id: ElementId) -> Result<()> {
    if diagram.contains(id) {
        return Err(Error::DuplicateId(id));
    }
    Ok(())
}

// ─── Diagram root ────────────────────────────────────────────────────────

/// The diagram root: orders layers and stylesheets.
pub struct DiagramSpec;

impl TrackableSpecification for DiagramSpec {
    fn kind(&self) -> ElementKind {
        ElementKind::Diagram
    }

    fn snapshot(&self, diagram: &Diagram, id: ElementId) -> Option<Snapshot> {
        (id == diagram.id()).then(|| Snapshot::Diagram(diagram.root().clone()))
    }

    fn restore(&self, snapshot: &Snapshot, diagram: &mut Diagram, id: ElementId) -> Result<()> {
        let Snapshot::Diagram(root) = snapshot else {
            mismatch(self.kind(), snapshot)
        };
        if id != diagram.id() {
            return Err(Error::UnknownElement(id));
        }
        *diagram.root_mut() = DiagramRoot { id, ..root.clone() };
        Ok(())
    }

    fn create(&self, snapshot: &Snapshot, _diagram: &mut Diagram, id: ElementId) -> Result<()> {
        if !matches!(snapshot, Snapshot::Diagram(_)) {
            mismatch(self.kind(), snapshot)
        }
        // A diagram never holds a second root.
        Err(Error::UnknownElement(id))
    }

    fn discard(&self, _diagram: &mut Diagram, id: ElementId) {
        log::warn!("diagram root {id} cannot be discarded");
    }

    fn children(&self, diagram: &Diagram, id: ElementId) -> Vec<TrackableRef> {
        if id != diagram.id() {
            return Vec::new();
        }
        let root = diagram.root();
        root.layers
            .iter()
            .map(|l| TrackableRef::layer(*l))
            .chain(root.stylesheets.iter().map(|s| TrackableRef::stylesheet(*s)))
            .collect()
    }

    fn add_child(
        &self,
        uow: &mut UnitOfWork<'_>,
        parent: ElementId,
        child: Entity,
        index: Option<usize>,
    ) -> Result<()> {
        if parent != uow.diagram().id() {
            return Err(Error::UnknownParent(parent));
        }
        let child_id = child.id();
        ensure_new(uow.diagram(), child_id)?;

        match child {
            Entity::Layer(layer) => {
                if let Some(first) = layer.elements.first() {
                    return Err(Error::InvalidChild {
                        parent: child_id,
                        child: *first,
                    });
                }
                uow.update_element(TrackableRef::diagram(parent));
                uow.update_element(TrackableRef::layer(child_id));
                uow.diagram_mut().insert_layer(layer)?;
                let root = uow.diagram_mut().root_mut();
                let at = position(root.layers.len(), index);
                root.layers.insert(at, child_id);
                if root.active_layer.is_none() {
                    root.active_layer = Some(child_id);
                }
            }
            Entity::Stylesheet(sheet) => {
                uow.update_element(TrackableRef::diagram(parent));
                uow.update_element(TrackableRef::stylesheet(child_id));
                uow.diagram_mut().insert_stylesheet(sheet)?;
                let root = uow.diagram_mut().root_mut();
                let at = position(root.stylesheets.len(), index);
                root.stylesheets.insert(at, child_id);
            }
            other => {
                return Err(Error::InvalidChild {
                    parent,
                    child: other.id(),
                });
            }
        }
        Ok(())
    }

    fn remove_child(&self, uow: &mut UnitOfWork<'_>, parent: ElementId, child: TrackableRef) -> Result<()> {
        if parent != uow.diagram().id() {
            return Err(Error::UnknownParent(parent));
        }
        let root = uow.diagram().root();
        let listed = match child.kind {
            ElementKind::Layer => root.layers.contains(&child.id),
            ElementKind::Stylesheet => root.stylesheets.contains(&child.id),
            _ => false,
        };
        if !listed {
            return Err(Error::InvalidChild {
                parent,
                child: child.id,
            });
        }

        uow.update_element(TrackableRef::diagram(parent));
        if child.kind == ElementKind::Stylesheet {
            clear_style_refs(uow, child.id);
        }
        purge(uow, child);

        let root = uow.diagram_mut().root_mut();
        root.layers.retain(|l| *l != child.id);
        root.stylesheets.retain(|s| *s != child.id);
        if root.active_layer == Some(child.id) {
            root.active_layer = root.layers.last().copied();
        }
        Ok(())
    }

    fn on_before_commit(&self, diagram: &mut Diagram, id: ElementId) {
        if id != diagram.id() {
            return;
        }
        let live_layers: Vec<ElementId> = diagram
            .root()
            .layers
            .iter()
            .copied()
            .filter(|l| diagram.layer(*l).is_some())
            .collect();
        let live_sheets: Vec<ElementId> = diagram
            .root()
            .stylesheets
            .iter()
            .copied()
            .filter(|s| diagram.stylesheet(*s).is_some())
            .collect();
        let root = diagram.root_mut();
        root.layers = live_layers;
        root.stylesheets = live_sheets;
        if root.active_layer.is_some_and(|a| !root.layers.contains(&a)) {
            root.active_layer = root.layers.last().copied();
        }
    }
}

// ─── Layer ───────────────────────────────────────────────────────────────

/// A layer: orders its top-level nodes and edges.
pub struct LayerSpec;

impl TrackableSpecification for LayerSpec {
    fn kind(&self) -> ElementKind {
        ElementKind::Layer
    }

    fn snapshot(&self, diagram: &Diagram, id: ElementId) -> Option<Snapshot> {
        diagram.layer(id).cloned().map(Snapshot::Layer)
    }

    fn restore(&self, snapshot: &Snapshot, diagram: &mut Diagram, id: ElementId) -> Result<()> {
        let Snapshot::Layer(layer) = snapshot else {
            mismatch(self.kind(), snapshot)
        };
        let target = diagram.layer_mut(id).ok_or(Error::UnknownElement(id))?;
        *target = Layer { id, ..layer.clone() };
        Ok(())
    }

    fn create(&self, snapshot: &Snapshot, diagram: &mut Diagram, id: ElementId) -> Result<()> {
        let Snapshot::Layer(layer) = snapshot else {
            mismatch(self.kind(), snapshot)
        };
        diagram.insert_layer(Layer { id, ..layer.clone() })
    }

    fn discard(&self, diagram: &mut Diagram, id: ElementId) {
        diagram.remove_layer(id);
    }

    fn children(&self, diagram: &Diagram, id: ElementId) -> Vec<TrackableRef> {
        let Some(layer) = diagram.layer(id) else {
            return Vec::new();
        };
        layer
            .elements
            .iter()
            .filter_map(|e| match diagram.kind_of(*e) {
                Some(ElementKind::Node) => Some(TrackableRef::node(*e)),
                Some(ElementKind::Edge) => Some(TrackableRef::edge(*e)),
                _ => None,
            })
            .collect()
    }

    fn add_child(
        &self,
        uow: &mut UnitOfWork<'_>,
        parent: ElementId,
        child: Entity,
        index: Option<usize>,
    ) -> Result<()> {
        if uow.diagram().layer(parent).is_none() {
            return Err(Error::UnknownParent(parent));
        }
        let child_id = child.id();
        ensure_new(uow.diagram(), child_id)?;

        match child {
            Entity::Node(mut node) => {
                validate_node(uow.diagram(), &node)?;
                node.layer = parent;
                node.parent = None;
                uow.update_element(TrackableRef::layer(parent));
                uow.update_element(TrackableRef::node(child_id));
                uow.diagram_mut().insert_node(node)?;
            }
            Entity::Edge(mut edge) => {
                validate_edge(uow.diagram(), &edge)?;
                edge.layer = parent;
                uow.update_element(TrackableRef::layer(parent));
                uow.update_element(TrackableRef::edge(child_id));
                uow.diagram_mut().insert_edge(edge)?;
            }
            other => {
                return Err(Error::InvalidChild {
                    parent,
                    child: other.id(),
                });
            }
        }

        let layer = uow
            .diagram_mut()
            .layer_mut(parent)
            .ok_or(Error::UnknownParent(parent))?;
        let at = position(layer.elements.len(), index);
        layer.elements.insert(at, child_id);
        Ok(())
    }

    fn remove_child(&self, uow: &mut UnitOfWork<'_>, parent: ElementId, child: TrackableRef) -> Result<()> {
        let Some(layer) = uow.diagram().layer(parent) else {
            return Err(Error::UnknownParent(parent));
        };
        if !layer.elements.contains(&child.id) {
            return Err(Error::InvalidChild {
                parent,
                child: child.id,
            });
        }

        uow.update_element(TrackableRef::layer(parent));
        purge(uow, child);
        if let Some(layer) = uow.diagram_mut().layer_mut(parent) {
            layer.elements.retain(|e| *e != child.id);
        }
        Ok(())
    }

    fn on_before_commit(&self, diagram: &mut Diagram, id: ElementId) {
        let Some(layer) = diagram.layer(id) else {
            return;
        };
        let live: Vec<ElementId> = layer
            .elements
            .iter()
            .copied()
            .filter(|e| diagram.node(*e).is_some() || diagram.edge(*e).is_some())
            .collect();
        if let Some(layer) = diagram.layer_mut(id)
            && layer.elements.len() != live.len()
        {
            log::debug!("layer {id}: pruned {} dangling element(s)", layer.elements.len() - live.len());
            layer.elements = live;
        }
    }
}

// ─── Node ────────────────────────────────────────────────────────────────

/// A node: orders its nested child nodes.
pub struct NodeSpec;

impl TrackableSpecification for NodeSpec {
    fn kind(&self) -> ElementKind {
        ElementKind::Node
    }

    fn snapshot(&self, diagram: &Diagram, id: ElementId) -> Option<Snapshot> {
        diagram.node(id).cloned().map(Snapshot::Node)
    }

    fn restore(&self, snapshot: &Snapshot, diagram: &mut Diagram, id: ElementId) -> Result<()> {
        let Snapshot::Node(node) = snapshot else {
            mismatch(self.kind(), snapshot)
        };
        let target = diagram.node_mut(id).ok_or(Error::UnknownElement(id))?;
        *target = DiagramNode { id, ..node.clone() };
        Ok(())
    }

    fn create(&self, snapshot: &Snapshot, diagram: &mut Diagram, id: ElementId) -> Result<()> {
        let Snapshot::Node(node) = snapshot else {
            mismatch(self.kind(), snapshot)
        };
        diagram.insert_node(DiagramNode { id, ..node.clone() })
    }

    fn discard(&self, diagram: &mut Diagram, id: ElementId) {
        diagram.remove_node(id);
    }

    fn children(&self, diagram: &Diagram, id: ElementId) -> Vec<TrackableRef> {
        diagram
            .node(id)
            .map(|n| n.children.iter().map(|c| TrackableRef::node(*c)).collect())
            .unwrap_or_default()
    }

    fn add_child(
        &self,
        uow: &mut UnitOfWork<'_>,
        parent: ElementId,
        child: Entity,
        index: Option<usize>,
    ) -> Result<()> {
        let Some(layer) = uow.diagram().node(parent).map(|p| p.layer) else {
            return Err(Error::UnknownParent(parent));
        };
        let child_id = child.id();
        let Entity::Node(mut node) = child else {
            return Err(Error::InvalidChild {
                parent,
                child: child_id,
            });
        };
        ensure_new(uow.diagram(), child_id)?;
        validate_node(uow.diagram(), &node)?;

        node.layer = layer;
        node.parent = Some(parent);
        uow.update_element(TrackableRef::node(parent));
        uow.update_element(TrackableRef::node(child_id));
        uow.diagram_mut().insert_node(node)?;

        let parent_node = uow
            .diagram_mut()
            .node_mut(parent)
            .ok_or(Error::UnknownParent(parent))?;
        let at = position(parent_node.children.len(), index);
        parent_node.children.insert(at, child_id);
        Ok(())
    }

    fn remove_child(&self, uow: &mut UnitOfWork<'_>, parent: ElementId, child: TrackableRef) -> Result<()> {
        let Some(parent_node) = uow.diagram().node(parent) else {
            return Err(Error::UnknownParent(parent));
        };
        if child.kind != ElementKind::Node || !parent_node.children.contains(&child.id) {
            return Err(Error::InvalidChild {
                parent,
                child: child.id,
            });
        }

        uow.update_element(TrackableRef::node(parent));
        purge(uow, child);
        if let Some(parent_node) = uow.diagram_mut().node_mut(parent) {
            parent_node.children.retain(|c| *c != child.id);
        }
        Ok(())
    }

    fn on_before_commit(&self, diagram: &mut Diagram, id: ElementId) {
        let Some(node) = diagram.node(id) else {
            return;
        };
        let live: smallvec::SmallVec<[ElementId; 4]> = node
            .children
            .iter()
            .copied()
            .filter(|c| diagram.node(*c).is_some())
            .collect();
        let style_gone = node.style.is_some_and(|s| diagram.stylesheet(s).is_none());
        if let Some(node) = diagram.node_mut(id) {
            node.children = live;
            if style_gone {
                node.style = None;
            }
        }
    }
}

// ─── Edge ────────────────────────────────────────────────────────────────

/// An edge: a leaf whose endpoints may reference nodes.
pub struct EdgeSpec;

impl TrackableSpecification for EdgeSpec {
    fn kind(&self) -> ElementKind {
        ElementKind::Edge
    }

    fn snapshot(&self, diagram: &Diagram, id: ElementId) -> Option<Snapshot> {
        diagram.edge(id).cloned().map(Snapshot::Edge)
    }

    fn restore(&self, snapshot: &Snapshot, diagram: &mut Diagram, id: ElementId) -> Result<()> {
        let Snapshot::Edge(edge) = snapshot else {
            mismatch(self.kind(), snapshot)
        };
        let target = diagram.edge_mut(id).ok_or(Error::UnknownElement(id))?;
        *target = DiagramEdge { id, ..edge.clone() };
        Ok(())
    }

    fn create(&self, snapshot: &Snapshot, diagram: &mut Diagram, id: ElementId) -> Result<()> {
        let Snapshot::Edge(edge) = snapshot else {
            mismatch(self.kind(), snapshot)
        };
        diagram.insert_edge(DiagramEdge { id, ..edge.clone() })
    }

    fn discard(&self, diagram: &mut Diagram, id: ElementId) {
        diagram.remove_edge(id);
    }

    /// Ends attached to vanished nodes become free at the nearest waypoint,
    /// or the origin when there is none.
    fn on_before_commit(&self, diagram: &mut Diagram, id: ElementId) {
        let Some(edge) = diagram.edge(id) else {
            return;
        };
        let start_gone = edge.start.node().is_some_and(|n| diagram.node(n).is_none());
        let end_gone = edge.end.node().is_some_and(|n| diagram.node(n).is_none());
        let style_gone = edge.style.is_some_and(|s| diagram.stylesheet(s).is_none());
        if !(start_gone || end_gone || style_gone) {
            return;
        }

        if let Some(edge) = diagram.edge_mut(id) {
            let first = edge.waypoints.first().copied().unwrap_or_default();
            let last = edge.waypoints.last().copied().unwrap_or_default();
            if start_gone {
                edge.start = Endpoint::Free { x: first.x, y: first.y };
            }
            if end_gone {
                edge.end = Endpoint::Free { x: last.x, y: last.y };
            }
            if style_gone {
                edge.style = None;
            }
        }
    }
}

// ─── Stylesheet ──────────────────────────────────────────────────────────

/// A stylesheet: a leaf.
pub struct StylesheetSpec;

impl TrackableSpecification for StylesheetSpec {
    fn kind(&self) -> ElementKind {
        ElementKind::Stylesheet
    }

    fn snapshot(&self, diagram: &Diagram, id: ElementId) -> Option<Snapshot> {
        diagram.stylesheet(id).cloned().map(Snapshot::Stylesheet)
    }

    fn restore(&self, snapshot: &Snapshot, diagram: &mut Diagram, id: ElementId) -> Result<()> {
        let Snapshot::Stylesheet(sheet) = snapshot else {
            mismatch(self.kind(), snapshot)
        };
        let target = diagram.stylesheet_mut(id).ok_or(Error::UnknownElement(id))?;
        *target = Stylesheet { id, ..sheet.clone() };
        Ok(())
    }

    fn create(&self, snapshot: &Snapshot, diagram: &mut Diagram, id: ElementId) -> Result<()> {
        let Snapshot::Stylesheet(sheet) = snapshot else {
            mismatch(self.kind(), snapshot)
        };
        diagram.insert_stylesheet(Stylesheet { id, ..sheet.clone() })
    }

    fn discard(&self, diagram: &mut Diagram, id: ElementId) {
        diagram.remove_stylesheet(id);
    }
}

//! Trackable elements and their specifications.
//!
//! Every element kind that takes part in a [`UnitOfWork`] has a
//! [`TrackableSpecification`]: a stateless strategy that knows how to capture
//! a [`Snapshot`] of the element, restore it, rehydrate it by id, list its
//! children and perform structural edits on it. Specifications live in a
//! [`SpecRegistry`] that is built once at startup and shared by `Arc` with
//! every document.
//!
//! The set of kinds is closed ([`ElementKind`]), so registry slots are
//! selected by exhaustive match rather than string lookup.

use crate::uow::UnitOfWork;
use dc_core::{
    Diagram, DiagramEdge, DiagramNode, DiagramRoot, ElementId, ElementKind, Error, Layer, Result,
    Stylesheet,
};
use serde::{Deserialize, Serialize};
use std::fmt;

// ─── References ──────────────────────────────────────────────────────────

/// A typed reference to an element: which specification handles it, and
/// which instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackableRef {
    pub kind: ElementKind,
    pub id: ElementId,
}

impl TrackableRef {
    pub const fn new(kind: ElementKind, id: ElementId) -> Self {
        Self { kind, id }
    }

    pub const fn diagram(id: ElementId) -> Self {
        Self::new(ElementKind::Diagram, id)
    }

    pub const fn layer(id: ElementId) -> Self {
        Self::new(ElementKind::Layer, id)
    }

    pub const fn node(id: ElementId) -> Self {
        Self::new(ElementKind::Node, id)
    }

    pub const fn edge(id: ElementId) -> Self {
        Self::new(ElementKind::Edge, id)
    }

    pub const fn stylesheet(id: ElementId) -> Self {
        Self::new(ElementKind::Stylesheet, id)
    }
}

impl fmt::Display for TrackableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

// ─── Snapshots ───────────────────────────────────────────────────────────

/// Immutable, structurally complete copy of an element's persisted state.
/// `PartialEq` is deep equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Snapshot {
    Diagram(DiagramRoot),
    Layer(Layer),
    Node(DiagramNode),
    Edge(DiagramEdge),
    Stylesheet(Stylesheet),
}

impl Snapshot {
    pub fn kind(&self) -> ElementKind {
        match self {
            Snapshot::Diagram(_) => ElementKind::Diagram,
            Snapshot::Layer(_) => ElementKind::Layer,
            Snapshot::Node(_) => ElementKind::Node,
            Snapshot::Edge(_) => ElementKind::Edge,
            Snapshot::Stylesheet(_) => ElementKind::Stylesheet,
        }
    }

    pub fn id(&self) -> ElementId {
        match self {
            Snapshot::Diagram(d) => d.id,
            Snapshot::Layer(l) => l.id,
            Snapshot::Node(n) => n.id,
            Snapshot::Edge(e) => e.id,
            Snapshot::Stylesheet(s) => s.id,
        }
    }

    pub fn element(&self) -> TrackableRef {
        TrackableRef::new(self.kind(), self.id())
    }
}

/// A new element handed to a structural `add_element` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Layer(Layer),
    Node(DiagramNode),
    Edge(DiagramEdge),
    Stylesheet(Stylesheet),
}

impl Entity {
    pub fn id(&self) -> ElementId {
        match self {
            Entity::Layer(l) => l.id,
            Entity::Node(n) => n.id,
            Entity::Edge(e) => e.id,
            Entity::Stylesheet(s) => s.id,
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Entity::Layer(_) => ElementKind::Layer,
            Entity::Node(_) => ElementKind::Node,
            Entity::Edge(_) => ElementKind::Edge,
            Entity::Stylesheet(_) => ElementKind::Stylesheet,
        }
    }

    pub fn element(&self) -> TrackableRef {
        TrackableRef::new(self.kind(), self.id())
    }
}

// ─── Specification ───────────────────────────────────────────────────────

/// Per-kind strategy for snapshot, restore and structural edits.
///
/// Round-trip law: for any element `e`, restoring `snapshot(e)` onto another
/// element of the same kind and id yields a snapshot equal to `snapshot(e)`.
///
/// Handing a snapshot of the wrong kind to `restore`/`create` is a
/// programming error and panics.
pub trait TrackableSpecification: Send + Sync {
    fn kind(&self) -> ElementKind;

    /// Capture the element's persisted state, `None` if it does not exist.
    fn snapshot(&self, diagram: &Diagram, id: ElementId) -> Option<Snapshot>;

    /// Overwrite an existing element with `snapshot`.
    fn restore(&self, snapshot: &Snapshot, diagram: &mut Diagram, id: ElementId) -> Result<()>;

    /// Store a missing element from `snapshot`.
    fn create(&self, snapshot: &Snapshot, diagram: &mut Diagram, id: ElementId) -> Result<()>;

    /// Drop the element from storage. Does not touch parent ordering.
    fn discard(&self, diagram: &mut Diagram, id: ElementId);

    /// Rehydrate by id: restore if present, create if missing, discard when
    /// `snapshot` is `None`.
    fn update_element(&self, diagram: &mut Diagram, id: ElementId, snapshot: Option<&Snapshot>) -> Result<()> {
        match snapshot {
            None => {
                self.discard(diagram, id);
                Ok(())
            }
            Some(s) if diagram.kind_of(id) == Some(self.kind()) => self.restore(s, diagram, id),
            Some(s) => self.create(s, diagram, id),
        }
    }

    /// Direct children, in order.
    fn children(&self, _diagram: &Diagram, _id: ElementId) -> Vec<TrackableRef> {
        Vec::new()
    }

    /// Attach a new `child` under `parent` at `index` (append when `None`).
    fn add_child(
        &self,
        _uow: &mut UnitOfWork<'_>,
        parent: ElementId,
        child: Entity,
        _index: Option<usize>,
    ) -> Result<()> {
        Err(Error::InvalidChild {
            parent,
            child: child.id(),
        })
    }

    /// Detach `child` from `parent` and remove it with its descendants.
    fn remove_child(&self, _uow: &mut UnitOfWork<'_>, parent: ElementId, child: TrackableRef) -> Result<()> {
        Err(Error::InvalidChild {
            parent,
            child: child.id,
        })
    }

    /// Runs for each dirty element before its after-snapshot is taken.
    fn on_before_commit(&self, _diagram: &mut Diagram, _id: ElementId) {}

    /// Runs for each dirty element after its after-snapshot is stored.
    fn on_after_commit(&self, _diagram: &Diagram, _id: ElementId) {}
}

// ─── Registry ────────────────────────────────────────────────────────────

pub(crate) fn kind_slot(kind: ElementKind) -> usize {
    match kind {
        ElementKind::Diagram => 0,
        ElementKind::Layer => 1,
        ElementKind::Node => 2,
        ElementKind::Edge => 3,
        ElementKind::Stylesheet => 4,
    }
}

/// Maps each element kind to its specification.
#[derive(Default)]
pub struct SpecRegistry {
    specs: [Option<Box<dyn TrackableSpecification>>; 5],
}

impl SpecRegistry {
    /// An empty registry. Every kind must be registered before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in specification for every kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::specs::register_defaults(&mut registry);
        registry
    }

    /// Register `spec` under its own kind, replacing any previous one.
    pub fn register<S: TrackableSpecification + 'static>(&mut self, spec: S) -> &mut Self {
        let kind = spec.kind();
        let slot = &mut self.specs[kind_slot(kind)];
        if slot.is_some() {
            log::warn!("replacing trackable specification for {}", kind.as_str());
        } else {
            log::debug!("registered trackable specification for {}", kind.as_str());
        }
        *slot = Some(Box::new(spec));
        self
    }

    pub fn is_registered(&self, kind: ElementKind) -> bool {
        self.specs[kind_slot(kind)].is_some()
    }

    /// The specification for `kind`.
    ///
    /// # Panics
    /// If nothing was registered for `kind`; that is a startup bug.
    pub fn get(&self, kind: ElementKind) -> &dyn TrackableSpecification {
        match &self.specs[kind_slot(kind)] {
            Some(spec) => spec.as_ref(),
            None => panic!("no trackable specification registered for {}", kind.as_str()),
        }
    }
}

impl fmt::Debug for SpecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<&str> = ElementKind::ALL
            .iter()
            .filter(|k| self.is_registered(**k))
            .map(|k| k.as_str())
            .collect();
        f.debug_struct("SpecRegistry")
            .field("registered", &registered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSpec;

    impl TrackableSpecification for NullSpec {
        fn kind(&self) -> ElementKind {
            ElementKind::Stylesheet
        }
        fn snapshot(&self, _: &Diagram, _: ElementId) -> Option<Snapshot> {
            None
        }
        fn restore(&self, _: &Snapshot, _: &mut Diagram, _: ElementId) -> Result<()> {
            Ok(())
        }
        fn create(&self, _: &Snapshot, _: &mut Diagram, _: ElementId) -> Result<()> {
            Ok(())
        }
        fn discard(&self, _: &mut Diagram, _: ElementId) {}
    }

    #[test]
    fn defaults_cover_every_kind() {
        let registry = SpecRegistry::with_defaults();
        for kind in ElementKind::ALL {
            assert!(registry.is_registered(kind), "{kind:?} missing");
            assert_eq!(registry.get(kind).kind(), kind);
        }
    }

    #[test]
    #[should_panic(expected = "no trackable specification registered for node")]
    fn unregistered_kind_panics() {
        let registry = SpecRegistry::new();
        registry.get(ElementKind::Node);
    }

    #[test]
    fn registering_replaces_previous() {
        let mut registry = SpecRegistry::with_defaults();
        registry.register(NullSpec);
        let diagram = Diagram::new(ElementId::intern("reg_d"), "d");
        // The null spec never sees anything.
        assert!(
            registry
                .get(ElementKind::Stylesheet)
                .snapshot(&diagram, ElementId::intern("reg_d"))
                .is_none()
        );
    }

    #[test]
    fn registries_are_isolated() {
        let mut a = SpecRegistry::new();
        let b = SpecRegistry::new();
        a.register(NullSpec);
        assert!(a.is_registered(ElementKind::Stylesheet));
        assert!(!b.is_registered(ElementKind::Stylesheet));
    }

    #[test]
    fn refs_display_kind_and_id() {
        let r = TrackableRef::node(ElementId::intern("box"));
        assert_eq!(r.to_string(), "node:box");
        assert_eq!(format!("{:?}", SpecRegistry::new()), "SpecRegistry { registered: [] }");
    }
}

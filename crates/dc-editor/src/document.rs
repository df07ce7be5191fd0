//! A diagram bound to its CRDT store and change listeners.
//!
//! The document keeps the in-memory [`Diagram`] authoritative for reads and
//! mirrors each committed element into one CRDT map per kind, keyed by
//! element id. Changes that peers make to those maps are queued and applied
//! on [`Document::apply_remote_changes`].

use crate::trackable::{Snapshot, SpecRegistry, TrackableRef, kind_slot};
use crate::uow::UnitOfWork;
use dc_core::crdt::{ChangeOrigin, MapChange, Observer};
use dc_core::{CrdtRoot, Diagram, EditorConfig, ElementId, ElementKind, Error, MemoryRoot, Result, TypedMap};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

// ─── Events ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Updated,
    Removed,
}

/// Emitted once per committed element.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentEvent {
    pub element: TrackableRef,
    pub change: ChangeType,
    pub origin: ChangeOrigin,
}

/// Handle returned by [`Document::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&DocumentEvent)>;

#[derive(Default)]
pub(crate) struct Listeners {
    next: u64,
    entries: Vec<(SubscriptionId, Listener)>,
}

pub(crate) fn emit(listeners: &mut Listeners, event: &DocumentEvent) {
    log::trace!("event: {:?} {} ({:?})", event.change, event.element, event.origin);
    for (_, listener) in listeners.entries.iter_mut() {
        listener(event);
    }
}

// ─── Store ───────────────────────────────────────────────────────────────

/// CRDT map name for each element kind.
pub fn map_name(kind: ElementKind) -> &'static str {
    match kind {
        ElementKind::Diagram => "diagram",
        ElementKind::Layer => "layers",
        ElementKind::Node => "nodes",
        ElementKind::Edge => "edges",
        ElementKind::Stylesheet => "stylesheets",
    }
}

fn kind_for_map(name: &str) -> Option<ElementKind> {
    ElementKind::ALL.into_iter().find(|k| map_name(*k) == name)
}

/// One typed CRDT map per element kind.
pub(crate) struct Store {
    maps: [TypedMap<Snapshot>; 5],
}

impl Store {
    fn open(root: &dyn CrdtRoot) -> Self {
        Self {
            maps: ElementKind::ALL.map(|kind| TypedMap::new(root.map(map_name(kind)))),
        }
    }

    fn map(&self, kind: ElementKind) -> &TypedMap<Snapshot> {
        &self.maps[kind_slot(kind)]
    }

    pub(crate) fn read(&self, element: TrackableRef) -> Result<Option<Snapshot>> {
        self.map(element.kind).get(element.id.as_str())
    }

    /// Store `snapshot` under the element, or delete it when `None`.
    pub(crate) fn write(&mut self, element: TrackableRef, snapshot: Option<&Snapshot>) -> Result<()> {
        let map = &mut self.maps[kind_slot(element.kind)];
        match snapshot {
            Some(s) => map.set(element.id.as_str(), s),
            None => {
                map.delete(element.id.as_str());
                Ok(())
            }
        }
    }
}

// ─── Document ────────────────────────────────────────────────────────────

/// A diagram, its specifications, and its collaboration store.
pub struct Document {
    pub(crate) diagram: Diagram,
    pub(crate) registry: Arc<SpecRegistry>,
    pub(crate) config: EditorConfig,
    pub(crate) root: Box<dyn CrdtRoot>,
    pub(crate) store: Store,
    pub(crate) listeners: Listeners,
    inbox: Rc<RefCell<Vec<MapChange>>>,
}

impl Document {
    /// Bind `diagram` to `root`, writing its full state to the store.
    ///
    /// # Errors
    /// Returns [`Error::Codec`] if an element cannot be encoded.
    pub fn new(
        diagram: Diagram,
        registry: Arc<SpecRegistry>,
        root: Box<dyn CrdtRoot>,
        config: EditorConfig,
    ) -> Result<Self> {
        let mut doc = Self::bind(diagram, registry, root, config);
        doc.persist_all()?;
        log::debug!(
            "document {} created: {} node(s), {} edge(s)",
            doc.diagram.id(),
            doc.diagram.node_count(),
            doc.diagram.edge_count()
        );
        Ok(doc)
    }

    /// An offline document with the default specifications and config.
    pub fn offline(diagram: Diagram) -> Result<Self> {
        Self::new(
            diagram,
            Arc::new(SpecRegistry::with_defaults()),
            Box::new(MemoryRoot::new()),
            EditorConfig::default(),
        )
    }

    /// Rebuild a document from the state already in `root`'s store.
    ///
    /// # Errors
    /// [`Error::EmptyStore`] if the store holds no diagram, [`Error::Codec`]
    /// if a stored element cannot be decoded.
    pub fn load(root: Box<dyn CrdtRoot>, registry: Arc<SpecRegistry>, config: EditorConfig) -> Result<Self> {
        let store = Store::open(root.as_ref());
        let roots = store.map(ElementKind::Diagram);
        let Some(key) = roots.keys().into_iter().next() else {
            return Err(Error::EmptyStore);
        };
        let Some(Snapshot::Diagram(diagram_root)) = roots.get(&key)? else {
            return Err(Error::Codec(format!("diagram entry {key} is not a diagram")));
        };

        let mut diagram = Diagram::new(diagram_root.id, diagram_root.name.clone());
        *diagram.root_mut() = diagram_root;
        for kind in [ElementKind::Layer, ElementKind::Stylesheet, ElementKind::Node, ElementKind::Edge] {
            let spec = registry.get(kind);
            let map = store.map(kind);
            for key in map.keys() {
                if let Some(snapshot) = map.get(&key)? {
                    spec.create(&snapshot, &mut diagram, ElementId::intern(&key))?;
                }
            }
        }

        let doc = Self::bind(diagram, registry, root, config);
        log::debug!(
            "document {} loaded from client {}: {} node(s), {} edge(s)",
            doc.diagram.id(),
            doc.root.client_id(),
            doc.diagram.node_count(),
            doc.diagram.edge_count()
        );
        Ok(doc)
    }

    fn bind(diagram: Diagram, registry: Arc<SpecRegistry>, root: Box<dyn CrdtRoot>, config: EditorConfig) -> Self {
        let mut store = Store::open(root.as_ref());
        let inbox: Rc<RefCell<Vec<MapChange>>> = Rc::default();
        for map in store.maps.iter_mut() {
            let sink = Rc::clone(&inbox);
            let observer: Observer = Box::new(move |change: &MapChange| {
                if change.origin == ChangeOrigin::Remote {
                    sink.borrow_mut().push(change.clone());
                }
            });
            map.observe(observer);
        }
        Self {
            diagram,
            registry,
            config,
            root,
            store,
            listeners: Listeners::default(),
            inbox,
        }
    }

    fn persist_all(&mut self) -> Result<()> {
        let mut elements = vec![TrackableRef::diagram(self.diagram.id())];
        elements.extend(self.diagram.layers().map(|l| TrackableRef::layer(l.id)));
        elements.extend(self.diagram.stylesheets().map(|s| TrackableRef::stylesheet(s.id)));
        elements.extend(self.diagram.nodes().map(|n| TrackableRef::node(n.id)));
        elements.extend(self.diagram.edges().map(|e| TrackableRef::edge(e.id)));

        let Self {
            diagram,
            registry,
            root,
            store,
            ..
        } = self;
        let mut result = Ok(());
        root.transact(&mut || {
            for element in &elements {
                let snapshot = registry.get(element.kind).snapshot(diagram, element.id);
                if let Err(e) = store.write(*element, snapshot.as_ref()) {
                    result = Err(e);
                    return;
                }
            }
        });
        result
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    pub fn diagram(&self) -> &Diagram {
        &self.diagram
    }

    pub fn registry(&self) -> &Arc<SpecRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut EditorConfig {
        &mut self.config
    }

    pub fn client_id(&self) -> u64 {
        self.root.client_id()
    }

    /// The value the store currently holds for `element`.
    pub fn stored(&self, element: TrackableRef) -> Result<Option<Snapshot>> {
        self.store.read(element)
    }

    /// Number of peer changes waiting for [`Self::apply_remote_changes`].
    pub fn pending_remote(&self) -> usize {
        self.inbox.borrow().len()
    }

    // ─── Listeners ───────────────────────────────────────────────────────

    pub fn subscribe(&mut self, listener: impl FnMut(&DocumentEvent) + 'static) -> SubscriptionId {
        self.listeners.next += 1;
        let id = SubscriptionId(self.listeners.next);
        self.listeners.entries.push((id, Box::new(listener)));
        id
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.entries.len();
        self.listeners.entries.retain(|(sub, _)| *sub != id);
        self.listeners.entries.len() != before
    }

    // ─── Remote sync ─────────────────────────────────────────────────────

    /// Apply queued peer changes to the diagram in one unit of work. Remote
    /// changes are emitted with [`ChangeOrigin::Remote`] and never written
    /// back or recorded for undo. Returns the number of elements applied.
    ///
    /// Entries that fail to decode are logged and skipped.
    pub fn apply_remote_changes(&mut self) -> Result<usize> {
        let changes = std::mem::take(&mut *self.inbox.borrow_mut());
        if changes.is_empty() {
            return Ok(0);
        }

        let mut resolved: Vec<(TrackableRef, Option<Snapshot>)> = Vec::with_capacity(changes.len());
        for change in &changes {
            let Some(kind) = kind_for_map(&change.map) else {
                log::warn!("remote: change in unknown map {}", change.map);
                continue;
            };
            let element = TrackableRef::new(kind, ElementId::intern(&change.key));
            if resolved.iter().any(|(r, _)| *r == element) {
                continue;
            }
            if kind == ElementKind::Diagram && element.id != self.diagram.id() {
                log::warn!("remote: ignoring foreign diagram {}", element.id);
                continue;
            }
            // A later change may supersede this one; the store holds the
            // converged value.
            let value = match self.store.read(element) {
                Ok(value) => value,
                Err(e) => {
                    log::warn!("remote: skipping {element}: {e}");
                    continue;
                }
            };
            if kind == ElementKind::Diagram && value.is_none() {
                log::warn!("remote: ignoring deletion of diagram root");
                continue;
            }
            resolved.push((element, value));
        }

        let mut uow = UnitOfWork::new_remote(self);
        for (element, value) in &resolved {
            if let Err(e) = uow.apply_snapshot(*element, value.as_ref()) {
                log::warn!("remote: cannot apply {element}: {e}");
            }
        }
        let set = uow.commit()?;
        log::debug!("remote: applied {} element(s) from {} change(s)", set.len(), changes.len());
        Ok(set.len())
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("diagram", &self.diagram.id())
            .field("client_id", &self.root.client_id())
            .field("config", &self.config)
            .field("listeners", &self.listeners.entries.len())
            .finish()
    }
}

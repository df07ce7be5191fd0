//! Unit of work: a scoped batch of mutations against one document.
//!
//! Every element touched inside a unit of work is marked dirty with
//! [`UnitOfWork::update_element`] *before* it is mutated. The first call per
//! element captures its before-snapshot; later calls are no-ops, so the
//! before-state is always the state at first touch.
//!
//! [`UnitOfWork::commit`] walks the dirty elements in first-dirtied order and,
//! per element: runs the specification's `on_before_commit` hook, takes the
//! after-snapshot, writes it to the CRDT store, runs `on_after_commit`, and
//! emits a change event (unless silent). The result is a [`SnapshotSet`] of
//! before/after pairs.
//!
//! Only one unit of work may be open on a document at a time; the `&mut`
//! borrow enforces it. Commit is single-phase: a failing store write stops
//! further writes but does not undo the in-memory changes.

use crate::document::{ChangeType, Document, DocumentEvent, emit};
use crate::editor::Editor;
use crate::trackable::{Entity, Snapshot, SpecRegistry, TrackableRef};
use crate::undo::{CompoundUndoableAction, SnapshotUndoableAction, UndoableAction};
use dc_core::crdt::ChangeOrigin;
use dc_core::{
    Diagram, DiagramEdge, DiagramNode, DiagramRoot, ElementId, Error, Layer, Result, Stylesheet,
};
use std::collections::HashMap;
use std::sync::Arc;

// ─── Commit result ───────────────────────────────────────────────────────

/// Before/after state of one element across a unit of work. `None` means
/// the element did not exist.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SnapshotPair {
    pub before: Option<Snapshot>,
    pub after: Option<Snapshot>,
}

impl SnapshotPair {
    pub fn is_changed(&self) -> bool {
        self.before != self.after
    }

    /// How the element changed, `None` if it never existed.
    pub fn change(&self) -> Option<ChangeType> {
        match (&self.before, &self.after) {
            (None, Some(_)) => Some(ChangeType::Added),
            (Some(_), None) => Some(ChangeType::Removed),
            (Some(_), Some(_)) => Some(ChangeType::Updated),
            (None, None) => None,
        }
    }
}

/// Ordered before/after pairs produced by a commit, keyed by element.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SnapshotSet {
    entries: Vec<(TrackableRef, SnapshotPair)>,
}

impl SnapshotSet {
    pub fn new(entries: Vec<(TrackableRef, SnapshotPair)>) -> Self {
        Self { entries }
    }

    /// The pairs whose before and after differ.
    pub fn only_updated(&self) -> SnapshotSet {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(_, pair)| pair.is_changed())
                .cloned()
                .collect(),
        }
    }

    pub fn get(&self, element: TrackableRef) -> Option<&SnapshotPair> {
        self.entries
            .iter()
            .find(|(r, _)| *r == element)
            .map(|(_, pair)| pair)
    }

    pub fn contains(&self, element: TrackableRef) -> bool {
        self.get(element).is_some()
    }

    /// Elements in first-dirtied order.
    pub fn refs(&self) -> impl DoubleEndedIterator<Item = TrackableRef> + '_ {
        self.entries.iter().map(|(r, _)| *r)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (TrackableRef, &SnapshotPair)> {
        self.entries.iter().map(|(r, pair)| (*r, pair))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Unit of work ────────────────────────────────────────────────────────

/// A scoped batch of pending mutations against one [`Document`].
pub struct UnitOfWork<'a> {
    doc: &'a mut Document,
    silent: bool,
    /// Remote applications rehydrate from the store and must not write back.
    persist: bool,
    origin: ChangeOrigin,
    order: Vec<TrackableRef>,
    before: HashMap<TrackableRef, Option<Snapshot>>,
    undo_actions: Vec<Box<dyn UndoableAction<Document>>>,
    finished: bool,
}

impl<'a> UnitOfWork<'a> {
    /// Open a unit of work that emits change events on commit.
    pub fn new(doc: &'a mut Document) -> Self {
        Self::open(doc, false, true, ChangeOrigin::Local)
    }

    /// Open a unit of work whose commit emits no change events.
    pub fn new_silent(doc: &'a mut Document) -> Self {
        Self::open(doc, true, true, ChangeOrigin::Local)
    }

    /// Open a unit of work that applies changes already present in the store.
    pub(crate) fn new_remote(doc: &'a mut Document) -> Self {
        Self::open(doc, false, false, ChangeOrigin::Remote)
    }

    fn open(doc: &'a mut Document, silent: bool, persist: bool, origin: ChangeOrigin) -> Self {
        Self {
            doc,
            silent,
            persist,
            origin,
            order: Vec::new(),
            before: HashMap::new(),
            undo_actions: Vec::new(),
            finished: false,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn diagram(&self) -> &Diagram {
        &self.doc.diagram
    }

    /// Raw access to the diagram. Call [`Self::update_element`] for an
    /// element before changing it, or the change is not tracked.
    pub fn diagram_mut(&mut self) -> &mut Diagram {
        &mut self.doc.diagram
    }

    pub fn registry(&self) -> Arc<SpecRegistry> {
        Arc::clone(&self.doc.registry)
    }

    // ─── Tracking ────────────────────────────────────────────────────────

    /// Mark `element` dirty. The first call captures its before-snapshot;
    /// repeated calls are no-ops.
    pub fn update_element(&mut self, element: TrackableRef) {
        if self.before.contains_key(&element) {
            return;
        }
        let snapshot = self
            .doc
            .registry
            .get(element.kind)
            .snapshot(&self.doc.diagram, element.id);
        log::trace!("uow: track {element} (exists: {})", snapshot.is_some());
        self.before.insert(element, snapshot);
        self.order.push(element);
    }

    pub fn is_dirty(&self, element: TrackableRef) -> bool {
        self.before.contains_key(&element)
    }

    /// Dirty elements in first-dirtied order.
    pub fn dirty(&self) -> &[TrackableRef] {
        &self.order
    }

    /// The captured before-snapshot, `None` if not dirty or if the element
    /// did not exist when first touched.
    pub fn before_snapshot(&self, element: TrackableRef) -> Option<&Snapshot> {
        self.before.get(&element).and_then(Option::as_ref)
    }

    /// Mark `element` dirty, then rehydrate it from `snapshot` (`None`
    /// removes it) through its specification.
    pub fn apply_snapshot(&mut self, element: TrackableRef, snapshot: Option<&Snapshot>) -> Result<()> {
        self.update_element(element);
        let registry = self.registry();
        registry
            .get(element.kind)
            .update_element(&mut self.doc.diagram, element.id, snapshot)
    }

    // ─── Mutation helpers ────────────────────────────────────────────────

    /// Track the node, then apply `f` to it.
    pub fn mutate_node<R>(&mut self, id: ElementId, f: impl FnOnce(&mut DiagramNode) -> R) -> Result<R> {
        if self.doc.diagram.node(id).is_none() {
            return Err(Error::UnknownElement(id));
        }
        self.update_element(TrackableRef::node(id));
        let node = self.doc.diagram.node_mut(id).ok_or(Error::UnknownElement(id))?;
        Ok(f(node))
    }

    /// Track the edge, then apply `f` to it.
    pub fn mutate_edge<R>(&mut self, id: ElementId, f: impl FnOnce(&mut DiagramEdge) -> R) -> Result<R> {
        if self.doc.diagram.edge(id).is_none() {
            return Err(Error::UnknownElement(id));
        }
        self.update_element(TrackableRef::edge(id));
        let edge = self.doc.diagram.edge_mut(id).ok_or(Error::UnknownElement(id))?;
        Ok(f(edge))
    }

    /// Track the layer, then apply `f` to it.
    pub fn mutate_layer<R>(&mut self, id: ElementId, f: impl FnOnce(&mut Layer) -> R) -> Result<R> {
        if self.doc.diagram.layer(id).is_none() {
            return Err(Error::UnknownElement(id));
        }
        self.update_element(TrackableRef::layer(id));
        let layer = self.doc.diagram.layer_mut(id).ok_or(Error::UnknownElement(id))?;
        Ok(f(layer))
    }

    /// Track the stylesheet, then apply `f` to it.
    pub fn mutate_stylesheet<R>(&mut self, id: ElementId, f: impl FnOnce(&mut Stylesheet) -> R) -> Result<R> {
        if self.doc.diagram.stylesheet(id).is_none() {
            return Err(Error::UnknownElement(id));
        }
        self.update_element(TrackableRef::stylesheet(id));
        let sheet = self
            .doc
            .diagram
            .stylesheet_mut(id)
            .ok_or(Error::UnknownElement(id))?;
        Ok(f(sheet))
    }

    /// Track the diagram root, then apply `f` to it.
    pub fn mutate_diagram<R>(&mut self, f: impl FnOnce(&mut DiagramRoot) -> R) -> R {
        let id = self.doc.diagram.id();
        self.update_element(TrackableRef::diagram(id));
        f(self.doc.diagram.root_mut())
    }

    // ─── Structural edits ────────────────────────────────────────────────

    /// Attach a new `child` under `parent` at `index` (append when `None`),
    /// delegating to the parent's specification.
    pub fn add_element(&mut self, parent: TrackableRef, child: Entity, index: Option<usize>) -> Result<()> {
        let registry = self.registry();
        log::trace!("uow: add {} under {parent}", child.element());
        registry.get(parent.kind).add_child(self, parent.id, child, index)
    }

    /// Remove `child` (and its descendants) from `parent`.
    pub fn remove_element(&mut self, parent: TrackableRef, child: TrackableRef) -> Result<()> {
        let registry = self.registry();
        log::trace!("uow: remove {child} from {parent}");
        registry.get(parent.kind).remove_child(self, parent.id, child)
    }

    /// Attach an extra undo step for an effect applied during this unit of
    /// work outside element state. Only [`UnitOfWork::execute_with_undo`]
    /// records it; any other completion drops it with a warning.
    pub fn add_undo_action(&mut self, action: Box<dyn UndoableAction<Document>>) {
        self.undo_actions.push(action);
    }

    /// Number of attached undo steps not yet handed to an undo history.
    pub fn undo_action_count(&self) -> usize {
        self.undo_actions.len()
    }

    // ─── Completion ──────────────────────────────────────────────────────

    /// Commit every dirty element and return the before/after pairs.
    ///
    /// # Errors
    /// Returns the first CRDT store write failure; the diagram keeps its
    /// in-memory changes and later writes are skipped.
    pub fn commit(mut self) -> Result<SnapshotSet> {
        self.finished = true;
        let order = std::mem::take(&mut self.order);
        let mut before = std::mem::take(&mut self.before);
        let registry = self.registry();
        let emit_events = !self.silent && self.doc.config.emit_events;
        let persist = self.persist;
        let origin = self.origin;

        let doc = &mut *self.doc;
        let mut pairs = Vec::with_capacity(order.len());
        let mut failure: Option<Error> = None;

        let mut step = || {
            for element in &order {
                let spec = registry.get(element.kind);
                spec.on_before_commit(&mut doc.diagram, element.id);
                let after = spec.snapshot(&doc.diagram, element.id);
                let before = before.remove(element).flatten();

                if persist
                    && failure.is_none()
                    && let Err(e) = doc.store.write(*element, after.as_ref())
                {
                    log::warn!("uow: store write for {element} failed: {e}");
                    failure = Some(e);
                }
                spec.on_after_commit(&doc.diagram, element.id);

                let pair = SnapshotPair { before, after };
                if emit_events && let Some(change) = pair.change() {
                    emit(
                        &mut doc.listeners,
                        &DocumentEvent {
                            element: *element,
                            change,
                            origin,
                        },
                    );
                }
                log::trace!("uow: committed {element} (changed: {})", pair.is_changed());
                pairs.push((*element, pair));
            }
        };
        if persist {
            doc.root.transact(&mut step);
        } else {
            step();
        }

        if let Some(e) = failure {
            return Err(e);
        }
        log::debug!(
            "uow: committed {} element(s){}",
            pairs.len(),
            if self.silent { " silently" } else { "" }
        );
        Ok(SnapshotSet::new(pairs))
    }

    /// Restore every captured before-state, newest first. Nothing is written
    /// to the store and no events fire.
    pub fn abort(mut self) {
        self.finished = true;
        let order = std::mem::take(&mut self.order);
        let mut before = std::mem::take(&mut self.before);
        let registry = self.registry();
        for element in order.iter().rev() {
            let snapshot = before.remove(element).flatten();
            if let Err(e) = registry
                .get(element.kind)
                .update_element(&mut self.doc.diagram, element.id, snapshot.as_ref())
            {
                log::warn!("uow: rollback of {element} failed: {e}");
            }
        }
        log::debug!("uow: rolled back {} element(s)", order.len());
    }

    /// Drop the unit of work without committing or rolling back.
    pub fn discard(mut self) {
        self.finished = true;
        log::debug!("uow: discarded with {} dirty element(s)", self.order.len());
    }

    fn take_undo_actions(&mut self) -> Vec<Box<dyn UndoableAction<Document>>> {
        std::mem::take(&mut self.undo_actions)
    }

    /// Abort or discard after a failed callback, per the document config.
    fn fail(self) {
        if self.doc.config.rollback_on_error {
            self.abort();
        } else {
            self.discard();
        }
    }

    // ─── Conveniences ────────────────────────────────────────────────────

    /// Open a unit of work, run `f`, and commit.
    ///
    /// # Errors
    /// Propagates `f`'s error after rolling back (see
    /// [`dc_core::EditorConfig::rollback_on_error`]), or a commit failure.
    pub fn execute<T>(doc: &mut Document, f: impl FnOnce(&mut UnitOfWork<'_>) -> Result<T>) -> Result<T> {
        let mut uow = UnitOfWork::new(doc);
        match f(&mut uow) {
            Ok(value) => {
                uow.commit()?;
                Ok(value)
            }
            Err(e) => {
                uow.fail();
                Err(e)
            }
        }
    }

    /// As [`Self::execute`], without change events.
    pub fn execute_silently<T>(doc: &mut Document, f: impl FnOnce(&mut UnitOfWork<'_>) -> Result<T>) -> Result<T> {
        let mut uow = UnitOfWork::new_silent(doc);
        match f(&mut uow) {
            Ok(value) => {
                uow.commit()?;
                Ok(value)
            }
            Err(e) => {
                uow.fail();
                Err(e)
            }
        }
    }

    /// Run `f` in a unit of work on the editor's document, commit, and push
    /// an undo entry if anything actually changed.
    ///
    /// The entry is a [`SnapshotUndoableAction`], or a
    /// [`CompoundUndoableAction`] of it followed by any actions attached with
    /// [`Self::add_undo_action`]. The changes are already applied, so the
    /// entry is added without executing it.
    pub fn execute_with_undo<T>(
        editor: &mut Editor,
        description: &str,
        f: impl FnOnce(&mut UnitOfWork<'_>) -> Result<T>,
    ) -> Result<T> {
        let Editor { document, undo } = editor;
        let mut uow = UnitOfWork::new(document);
        let value = match f(&mut uow) {
            Ok(value) => value,
            Err(e) => {
                uow.fail();
                return Err(e);
            }
        };
        let extras = uow.take_undo_actions();
        let changed = uow.commit()?.only_updated();

        if changed.is_empty() && extras.is_empty() {
            log::debug!("uow: '{description}' changed nothing, no undo entry");
            return Ok(value);
        }
        let snapshot_action = SnapshotUndoableAction::new(description, changed);
        if extras.is_empty() {
            undo.add(Box::new(snapshot_action));
        } else {
            let mut compound = CompoundUndoableAction::new(description);
            compound.push(Box::new(snapshot_action));
            for extra in extras {
                compound.push(extra);
            }
            undo.add(Box::new(compound));
        }
        Ok(value)
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.undo_actions.is_empty() {
            log::warn!(
                "uow: {} attached undo action(s) dropped unrecorded, only execute_with_undo records them",
                self.undo_actions.len()
            );
        }
        if !self.finished && !self.order.is_empty() {
            log::warn!(
                "uow: dropped with {} uncommitted dirty element(s)",
                self.order.len()
            );
        }
    }
}

//! Undo/redo over reversible actions.
//!
//! [`UndoManager`] keeps two bounded stacks. Adding a new action clears the
//! redo stack; once a stack exceeds `max_depth` its oldest entry is dropped.
//! The manager is generic over the context its actions run against, so it
//! can drive document edits ([`SnapshotUndoableAction`]) as well as plain
//! closures ([`UndoableFn`]).

use crate::document::Document;
use crate::uow::{SnapshotSet, UnitOfWork};
use dc_core::EditorConfig;
use std::collections::VecDeque;
use std::fmt;

/// A reversible action against a context `C`.
pub trait UndoableAction<C> {
    fn description(&self) -> &str;

    /// Apply (or re-apply) the action.
    fn execute(&mut self, ctx: &mut C);

    /// Revert the action.
    fn undo(&mut self, ctx: &mut C);
}

// ─── Closure action ──────────────────────────────────────────────────────

type Step<C> = Box<dyn FnMut(&mut C)>;

/// An action built from an execute closure and an undo closure.
pub struct UndoableFn<C> {
    description: String,
    execute: Step<C>,
    undo: Step<C>,
}

impl<C> UndoableFn<C> {
    pub fn new(
        description: impl Into<String>,
        execute: impl FnMut(&mut C) + 'static,
        undo: impl FnMut(&mut C) + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            execute: Box::new(execute),
            undo: Box::new(undo),
        }
    }
}

impl<C> UndoableAction<C> for UndoableFn<C> {
    fn description(&self) -> &str {
        &self.description
    }

    fn execute(&mut self, ctx: &mut C) {
        (self.execute)(ctx);
    }

    fn undo(&mut self, ctx: &mut C) {
        (self.undo)(ctx);
    }
}

// ─── Compound action ─────────────────────────────────────────────────────

/// Several actions treated as one: executed in order, undone in reverse.
pub struct CompoundUndoableAction<C> {
    description: String,
    actions: Vec<Box<dyn UndoableAction<C>>>,
}

impl<C> CompoundUndoableAction<C> {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            actions: Vec::new(),
        }
    }

    pub fn with_actions(description: impl Into<String>, actions: Vec<Box<dyn UndoableAction<C>>>) -> Self {
        Self {
            description: description.into(),
            actions,
        }
    }

    pub fn push(&mut self, action: Box<dyn UndoableAction<C>>) {
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[Box<dyn UndoableAction<C>>] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl<C> UndoableAction<C> for CompoundUndoableAction<C> {
    fn description(&self) -> &str {
        &self.description
    }

    fn execute(&mut self, ctx: &mut C) {
        for action in self.actions.iter_mut() {
            action.execute(ctx);
        }
    }

    fn undo(&mut self, ctx: &mut C) {
        for action in self.actions.iter_mut().rev() {
            action.undo(ctx);
        }
    }
}

// ─── Snapshot action ─────────────────────────────────────────────────────

/// Replays a committed [`SnapshotSet`]: undo restores every before-state
/// (newest first), redo restores every after-state (oldest first). Each
/// direction runs as its own unit of work, so the store and listeners see
/// it like any other edit.
///
/// Snapshots are whole elements. Replaying one replaces the element's
/// current state, including changes made after this step by peers.
pub struct SnapshotUndoableAction {
    description: String,
    set: SnapshotSet,
}

impl SnapshotUndoableAction {
    pub fn new(description: impl Into<String>, set: SnapshotSet) -> Self {
        Self {
            description: description.into(),
            set,
        }
    }

    pub fn snapshots(&self) -> &SnapshotSet {
        &self.set
    }

    /// Best effort: an element that cannot be restored, or a failed commit,
    /// is logged and skipped. The step may then be applied only in part,
    /// while [`UndoManager`] still moves it to the opposite stack.
    fn replay(&self, doc: &mut Document, forward: bool) {
        let mut uow = UnitOfWork::new(doc);
        let entries: Vec<_> = if forward {
            self.set.iter().map(|(r, pair)| (r, pair.after.as_ref())).collect()
        } else {
            self.set.iter().rev().map(|(r, pair)| (r, pair.before.as_ref())).collect()
        };
        for (element, snapshot) in entries {
            if let Err(e) = uow.apply_snapshot(element, snapshot) {
                log::warn!("undo '{}': cannot restore {element}: {e}", self.description);
            }
        }
        if let Err(e) = uow.commit() {
            log::warn!("undo '{}': commit failed: {e}", self.description);
        }
    }
}

impl UndoableAction<Document> for SnapshotUndoableAction {
    fn description(&self) -> &str {
        &self.description
    }

    fn execute(&mut self, doc: &mut Document) {
        self.replay(doc, true);
    }

    fn undo(&mut self, doc: &mut Document) {
        self.replay(doc, false);
    }
}

// ─── Manager ─────────────────────────────────────────────────────────────

/// Stack state reported to the change callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoStatus {
    pub can_undo: bool,
    pub can_redo: bool,
}

/// Bounded undo/redo stacks of actions against `C`.
pub struct UndoManager<C> {
    undo_stack: VecDeque<Box<dyn UndoableAction<C>>>,
    redo_stack: VecDeque<Box<dyn UndoableAction<C>>>,
    /// Maximum entries per stack.
    max_depth: usize,
    on_change: Option<Box<dyn FnMut(UndoStatus)>>,
}

impl<C> UndoManager<C> {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::with_capacity(max_depth.min(128)),
            redo_stack: VecDeque::new(),
            max_depth,
            on_change: None,
        }
    }

    pub fn with_config(config: &EditorConfig) -> Self {
        Self::new(config.undo_depth)
    }

    /// Record an action that has already been applied. Clears redo.
    pub fn add(&mut self, action: Box<dyn UndoableAction<C>>) {
        log::debug!("undo: add '{}'", action.description());
        self.redo_stack.clear();
        Self::push_bounded(&mut self.undo_stack, action, self.max_depth);
        self.notify();
    }

    /// Execute `action`, then record it.
    pub fn add_and_execute(&mut self, mut action: Box<dyn UndoableAction<C>>, ctx: &mut C) {
        action.execute(ctx);
        self.add(action);
    }

    /// Undo the last action. Returns its description.
    pub fn undo(&mut self, ctx: &mut C) -> Option<String> {
        let mut action = self.undo_stack.pop_back()?;
        action.undo(ctx);
        let description = action.description().to_string();
        log::debug!("undo: undid '{description}'");
        Self::push_bounded(&mut self.redo_stack, action, self.max_depth);
        self.notify();
        Some(description)
    }

    /// Redo the last undone action. Returns its description.
    pub fn redo(&mut self, ctx: &mut C) -> Option<String> {
        let mut action = self.redo_stack.pop_back()?;
        action.execute(ctx);
        let description = action.description().to_string();
        log::debug!("undo: redid '{description}'");
        Self::push_bounded(&mut self.undo_stack, action, self.max_depth);
        self.notify();
        Some(description)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Description of the action `undo` would revert.
    pub fn peek_undo(&self) -> Option<&str> {
        self.undo_stack.back().map(|a| a.description())
    }

    /// Description of the action `redo` would re-apply.
    pub fn peek_redo(&self) -> Option<&str> {
        self.redo_stack.back().map(|a| a.description())
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.notify();
    }

    /// Called after every stack change.
    pub fn set_on_change(&mut self, callback: impl FnMut(UndoStatus) + 'static) {
        self.on_change = Some(Box::new(callback));
    }

    fn push_bounded(
        stack: &mut VecDeque<Box<dyn UndoableAction<C>>>,
        action: Box<dyn UndoableAction<C>>,
        max_depth: usize,
    ) {
        stack.push_back(action);
        while stack.len() > max_depth {
            if let Some(evicted) = stack.pop_front() {
                log::trace!("undo: evicted '{}'", evicted.description());
            }
        }
    }

    fn notify(&mut self) {
        let status = UndoStatus {
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
        };
        if let Some(callback) = self.on_change.as_mut() {
            callback(status);
        }
    }
}

impl<C> Default for UndoManager<C> {
    fn default() -> Self {
        Self::with_config(&EditorConfig::default())
    }
}

impl<C> fmt::Debug for UndoManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoManager")
            .field("undo", &self.undo_stack.len())
            .field("redo", &self.redo_stack.len())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

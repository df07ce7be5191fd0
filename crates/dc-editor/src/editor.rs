//! Editor facade: a document plus its undo history.

use crate::document::Document;
use crate::undo::UndoManager;
use crate::uow::UnitOfWork;
use dc_core::{Diagram, Result};

/// A document with undo/redo.
///
/// Local edits go through [`Editor::execute_with_undo`]; peer edits arrive
/// through [`Editor::apply_remote_changes`] and are never recorded, so the
/// history holds only this client's steps. Undoing a step restores the
/// whole before-state of each element it touched, which overwrites any
/// later peer edit to those elements.
pub struct Editor {
    pub(crate) document: Document,
    pub(crate) undo: UndoManager<Document>,
}

impl Editor {
    pub fn new(document: Document) -> Self {
        let undo = UndoManager::with_config(document.config());
        Self { document, undo }
    }

    /// An editor over an offline document.
    pub fn offline(diagram: Diagram) -> Result<Self> {
        Ok(Self::new(Document::offline(diagram)?))
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn diagram(&self) -> &Diagram {
        self.document.diagram()
    }

    pub fn undo_manager(&self) -> &UndoManager<Document> {
        &self.undo
    }

    pub fn undo_manager_mut(&mut self) -> &mut UndoManager<Document> {
        &mut self.undo
    }

    /// Run `f` in a unit of work and record it as one undo step.
    pub fn execute_with_undo<T>(
        &mut self,
        description: &str,
        f: impl FnOnce(&mut UnitOfWork<'_>) -> Result<T>,
    ) -> Result<T> {
        UnitOfWork::execute_with_undo(self, description, f)
    }

    /// Undo the last local edit. Returns its description.
    pub fn undo(&mut self) -> Option<String> {
        self.undo.undo(&mut self.document)
    }

    /// Redo the last undone edit. Returns its description.
    pub fn redo(&mut self) -> Option<String> {
        self.undo.redo(&mut self.document)
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    /// Apply queued peer changes without touching the undo history.
    pub fn apply_remote_changes(&mut self) -> Result<usize> {
        self.document.apply_remote_changes()
    }
}

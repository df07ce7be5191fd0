pub mod document;
pub mod editor;
pub mod specs;
pub mod trackable;
pub mod undo;
pub mod uow;

pub use document::{ChangeType, Document, DocumentEvent, SubscriptionId};
pub use editor::Editor;
pub use specs::{DiagramSpec, EdgeSpec, LayerSpec, NodeSpec, StylesheetSpec};
pub use trackable::{Entity, Snapshot, SpecRegistry, TrackableRef, TrackableSpecification};
pub use undo::{CompoundUndoableAction, SnapshotUndoableAction, UndoManager, UndoStatus, UndoableAction, UndoableFn};
pub use uow::{SnapshotPair, SnapshotSet, UnitOfWork};

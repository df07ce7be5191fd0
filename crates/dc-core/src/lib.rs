pub mod config;
pub mod crdt;
pub mod error;
pub mod id;
pub mod model;

pub use config::EditorConfig;
pub use crdt::{CrdtMap, CrdtRoot, LoopbackHub, LoopbackRoot, MemoryRoot, TypedMap};
pub use error::{Error, Result};
pub use id::ElementId;
pub use model::*;

pub mod accessor;
pub mod document;
pub mod history;
pub mod ops;
pub mod related;
pub mod types;

pub use accessor::{get_topo_shape, ResolvedShape, ShapeOptions};
pub use document::{DocObject, Document, Workspace};
pub use history::{element_history, element_source, HistoryItem};
pub use ops::{element_from_source, recompute};
pub use related::related_elements;
pub use types::*;

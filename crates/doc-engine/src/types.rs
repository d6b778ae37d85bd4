use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kernel_shim::KernelError;

/// Identity of a document inside the workspace.
pub type DocumentId = Uuid;

/// (document, object id) pair addressing one feature object. Object ids
/// double as the tag domain of element provenance; 0 is reserved for
/// "untagged".
pub type ObjRef = (DocumentId, i64);

/// Errors from the document engine. Missing elements and unresolvable
/// names are not errors; they come back as empty results.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("object not found: {id}")]
    ObjectNotFound { id: i64 },

    #[error("invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    #[error("reference cannot be resolved: {subname}")]
    Unresolved { subname: String },

    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("execution of {label} failed: {reason}")]
    ExecuteFailed { label: String, reason: String },
}

/// What a document object is and does. Capabilities are explicit record
/// fields instead of a type hierarchy, so callers dispatch on what an
/// object carries rather than what it derives from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ObjectKind {
    /// Plain shape container with no parameters.
    Body,
    Primitive { params: PrimitiveParams },
    Boolean { params: BooleanParams },
    Chamfer { params: DressUpParams },
    Fillet { params: DressUpParams },
    /// Points at another object, possibly in another document.
    Link { params: LinkParams },
    /// Groups child objects; its shape is their compound.
    Group { params: GroupParams },
}

/// Parameters for a box primitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimitiveParams {
    pub width: f64,
    pub height: f64,
    pub depth: f64,
}

/// Parameters for a boolean combine operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BooleanParams {
    pub op: BooleanOp,
    /// Object id of the base shape, within the same document.
    pub base: i64,
    /// Object id of the tool shape.
    pub tool: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BooleanOp {
    Fuse,
    Cut,
    Common,
}

/// Parameters for chamfer/fillet dress-up features. Edges are kept as
/// element-name links on the base object and re-synced when element
/// references update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DressUpParams {
    /// Object id of the base feature, within the same document.
    pub base: i64,
    /// Edge references, "Edge3"-style or mapped names.
    pub edges: Vec<String>,
    /// Chamfer size or fillet radius.
    pub size: f64,
}

impl DressUpParams {
    /// Edge ordinals parsed out of indexed-style edge links.
    pub fn edge_indices(&self) -> Vec<u32> {
        self.edges
            .iter()
            .filter_map(|e| e.strip_prefix("Edge").and_then(|n| n.parse().ok()))
            .collect()
    }
}

/// Parameters for a link object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkParams {
    pub target: ObjRef,
    /// Sub-names hidden through this link's per-element visibility
    /// override; shapes resolved through them are excluded from
    /// compounds, and such resolutions are never cached.
    pub hidden_subnames: HashSet<String>,
    /// Per-child visibility overrides, by child label.
    pub element_visibility: HashMap<String, bool>,
}

impl LinkParams {
    pub fn to_target(target: ObjRef) -> Self {
        Self {
            target,
            hidden_subnames: HashSet::new(),
            element_visibility: HashMap::new(),
        }
    }

    pub fn has_overrides(&self) -> bool {
        !self.hidden_subnames.is_empty()
            || self.element_visibility.values().any(|v| !v)
    }
}

/// Parameters for a group object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupParams {
    /// Child object ids, in composition order.
    pub children: Vec<i64>,
}

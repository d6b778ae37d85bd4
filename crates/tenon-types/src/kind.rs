use serde::{Deserialize, Serialize};

/// The kind of topological entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ShapeKind {
    Vertex,
    Edge,
    Wire,
    Face,
    Shell,
    Solid,
    CompSolid,
    Compound,
}

impl ShapeKind {
    /// All kinds, in containment order (lowest first).
    pub const ALL: [ShapeKind; 8] = [
        ShapeKind::Vertex,
        ShapeKind::Edge,
        ShapeKind::Wire,
        ShapeKind::Face,
        ShapeKind::Shell,
        ShapeKind::Solid,
        ShapeKind::CompSolid,
        ShapeKind::Compound,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeKind::Vertex => "Vertex",
            ShapeKind::Edge => "Edge",
            ShapeKind::Wire => "Wire",
            ShapeKind::Face => "Face",
            ShapeKind::Shell => "Shell",
            ShapeKind::Solid => "Solid",
            ShapeKind::CompSolid => "CompSolid",
            ShapeKind::Compound => "Compound",
        }
    }

    /// Table slot for per-kind element storage.
    pub fn slot(&self) -> usize {
        match self {
            ShapeKind::Vertex => 0,
            ShapeKind::Edge => 1,
            ShapeKind::Wire => 2,
            ShapeKind::Face => 3,
            ShapeKind::Shell => 4,
            ShapeKind::Solid => 5,
            ShapeKind::CompSolid => 6,
            ShapeKind::Compound => 7,
        }
    }

    /// The immediate lower kind used when naming a higher element from its
    /// children: wires are named from edges, shells and up from faces.
    /// Vertices, edges and faces have no lower naming kind.
    pub fn lower(&self) -> Option<ShapeKind> {
        match self {
            ShapeKind::Wire => Some(ShapeKind::Edge),
            ShapeKind::Shell
            | ShapeKind::Solid
            | ShapeKind::CompSolid
            | ShapeKind::Compound => Some(ShapeKind::Face),
            _ => None,
        }
    }
}

impl std::fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

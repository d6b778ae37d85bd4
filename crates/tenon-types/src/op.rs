use serde::{Deserialize, Serialize};

/// Provenance code of the operation that produced an element name.
/// The short code is embedded into derived name strings, so it must stay
/// stable across releases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OpCode {
    /// Leaf name assigned when a primitive is constructed.
    #[default]
    Primitive,
    Extrude,
    Fuse,
    Cut,
    Common,
    Chamfer,
    Fillet,
    Transform,
    /// Child shape folded into a compound.
    Compound,
    /// High-level name synthesized from lower-element names.
    Combo,
    /// Kernel-level shape repair rewrote the element.
    Fix,
}

impl OpCode {
    pub fn code(&self) -> &'static str {
        match self {
            OpCode::Primitive => "PRI",
            OpCode::Extrude => "XTR",
            OpCode::Fuse => "FUS",
            OpCode::Cut => "CUT",
            OpCode::Common => "CMN",
            OpCode::Chamfer => "CHF",
            OpCode::Fillet => "FLT",
            OpCode::Transform => "TRF",
            OpCode::Compound => "CPD",
            OpCode::Combo => "CMB",
            OpCode::Fix => "FIX",
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

use nalgebra::Matrix4;

use crate::topology::Topology;
use crate::types::KernelError;
use tenon_types::IndexedName;

/// Whether a result element was carried through the operation or newly
/// created by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceStatus {
    /// The element existed in an input and survived (possibly trimmed).
    Carried,
    /// The element is new; its sources are the input elements that
    /// generated it (e.g. the edge a chamfer face replaced).
    Generated,
}

/// Correspondence record for one element of an operation result.
#[derive(Debug, Clone)]
pub struct ElementTrace {
    pub result: IndexedName,
    /// Source elements as (input ordinal, indexed name in that input).
    pub sources: Vec<(usize, IndexedName)>,
    pub status: TraceStatus,
}

/// A modified topology together with the element correspondences the
/// naming layer turns into persistent names.
#[derive(Debug)]
pub struct OpOutcome {
    pub topology: Topology,
    pub traces: Vec<ElementTrace>,
}

/// The opaque geometry engine. Shape mathematics lives behind this seam;
/// the naming core only consumes the snapshots and correspondence traces
/// it reports. Construction failures surface as `KernelError` and are
/// translated at the feature-execution boundary.
pub trait Kernel {
    /// Axis-aligned box primitive at the origin.
    fn make_box(&mut self, w: f64, h: f64, d: f64) -> Result<Topology, KernelError>;

    /// Boolean union of two shapes.
    fn boolean_fuse(&mut self, a: &Topology, b: &Topology) -> Result<OpOutcome, KernelError>;

    /// Boolean subtraction: a minus b.
    fn boolean_cut(&mut self, a: &Topology, b: &Topology) -> Result<OpOutcome, KernelError>;

    /// Boolean intersection of two shapes.
    fn boolean_common(&mut self, a: &Topology, b: &Topology) -> Result<OpOutcome, KernelError>;

    /// Chamfer (bevel) the given edges with the given size.
    fn chamfer_edges(
        &mut self,
        base: &Topology,
        edges: &[IndexedName],
        size: f64,
    ) -> Result<OpOutcome, KernelError>;

    /// Fillet (round) the given edges with the given radius.
    fn fillet_edges(
        &mut self,
        base: &Topology,
        edges: &[IndexedName],
        radius: f64,
    ) -> Result<OpOutcome, KernelError>;

    /// Shape with the placement baked into its geometry. Element order is
    /// preserved, so no correspondence report is needed.
    fn transformed(&mut self, base: &Topology, mat: &Matrix4<f64>)
        -> Result<Topology, KernelError>;

    fn is_valid(&self, shape: &Topology) -> bool;

    /// Kernel-level shape repair. May rewrite elements; the traces tell
    /// the naming layer which ones.
    fn fix(&mut self, shape: &Topology) -> Result<OpOutcome, KernelError>;
}

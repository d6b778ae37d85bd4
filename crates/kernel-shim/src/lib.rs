pub mod mock_kernel;
pub mod topology;
pub mod traits;
pub mod types;

pub use mock_kernel::MockKernel;
pub use topology::{Element, Topology, TopologyBuilder};
pub use traits::*;
pub use types::*;

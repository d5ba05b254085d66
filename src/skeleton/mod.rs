pub mod topology;
pub mod tree;

pub use tree::{JointDef, Region, Skeleton};

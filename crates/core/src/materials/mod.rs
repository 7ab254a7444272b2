//! Material conductivity description and per-voxel resolution

mod conductivity_map;

pub use conductivity_map::{ConductivityField, ConductivityMap, ConductivitySpec};

//! Point cloud file I/O
//!
//! ASCII PLY with `x y z` float positions and `red green blue` byte colors,
//! readable by MeshLab and most point cloud viewers.

pub mod ply;

pub use ply::{read_ply, read_ply_file, write_ply, write_ply_file, PLY_HEADER_TEMPLATE};

pub use cv_core::{Error, Result};

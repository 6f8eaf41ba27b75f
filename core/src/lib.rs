//! Core types shared by the stereo pipeline crates.
//!
//! Camera geometry, the colored point cloud container, the crate-wide
//! error enum and the global thread pool configuration live here so the
//! algorithm crates agree on one vocabulary.

pub mod error;
pub mod geometry;
pub mod point_cloud;
pub mod runtime;

pub use error::{Error, Result};
pub use geometry::*;
pub use point_cloud::PointCloud;
pub use runtime::{current_cpu_threads, init_global_thread_pool};

//! Calibrated stereo vision
//!
//! Calibrate a two-camera rig from chessboard corners, rectify its images,
//! compute disparity with a tunable block matcher and export colored point
//! clouds. The member crates are re-exported under short names.

pub use cv_calib3d as calib3d;
pub use cv_core as core;
pub use cv_imgproc as imgproc;
pub use cv_io as io;
pub use cv_stereo as stereo;

pub mod pipeline;

pub use pipeline::{CalibratedPair, PipelineOptions};

pub use cv_core::{Error, Result};

/// Initialize a single global Rayon thread pool for all CPU-parallel routines.
///
/// Call this once at application startup before running heavy workloads.
/// Repeated calls are idempotent and return the first initialization result.
///
/// Priority order:
/// 1. explicit `num_threads`
/// 2. `RUSTCV_CPU_THREADS` env var
/// 3. Rayon default
pub fn init_thread_pool(num_threads: Option<usize>) -> Result<usize> {
    cv_core::init_global_thread_pool(num_threads)
}

pub mod filters;
pub mod geometry;

pub use filters::*;
pub use geometry::*;

pub use cv_core::{Error, Result};

pub fn validate_image_size(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::DimensionMismatch(
            "Image dimensions must be non-zero".into(),
        ));
    }
    Ok(())
}

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A matcher parameter name that does not belong to the active schema.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unknown setting '{name}' in {path}")]
    UnknownSettingName { name: String, path: PathBuf },

    #[error("Missing calibration data: {0}")]
    MissingCalibrationData(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Calibration is degenerate: RMS reprojection error {rms:.4} px exceeds {bound:.4} px")]
    DegenerateCalibration { rms: f64, bound: f64 },

    #[error("Calibration error: {0}")]
    CalibrationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error in {path} at line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

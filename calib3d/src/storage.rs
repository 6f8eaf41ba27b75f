//! On-disk layout of a calibration folder: one JSON array file per field.
//!
//! ```json
//! {"version":1,"name":"rotation","rows":3,"cols":3,"data":[...]}
//! ```
//!
//! `data` holds `rows * cols` values in row-major order.

use crate::Result;
use cv_core::Error;
use nalgebra::SMatrix;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;
pub const FILE_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayFile {
    pub version: u32,
    pub name: String,
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

pub fn array_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{FILE_EXTENSION}"))
}

pub fn write_array(dir: &Path, name: &str, rows: usize, cols: usize, data: &[f64]) -> Result<()> {
    if data.len() != rows * cols {
        return Err(Error::DimensionMismatch(format!(
            "{name}: {} values do not fill a {rows}x{cols} array",
            data.len()
        )));
    }
    if data.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidInput(format!(
            "{name}: calibration values must be finite"
        )));
    }
    let file = ArrayFile {
        version: FORMAT_VERSION,
        name: name.to_string(),
        rows,
        cols,
        data: data.to_vec(),
    };
    let mut writer = BufWriter::new(File::create(array_path(dir, name))?);
    serde_json::to_writer(&mut writer, &file)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn write_matrix<const R: usize, const C: usize>(
    dir: &Path,
    name: &str,
    m: &SMatrix<f64, R, C>,
) -> Result<()> {
    let row_major: Vec<f64> = m.transpose().iter().copied().collect();
    write_array(dir, name, R, C, &row_major)
}

pub fn read_array(dir: &Path, name: &str) -> Result<ArrayFile> {
    let path = array_path(dir, name);
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::MissingCalibrationData(format!(
                "{} not found",
                path.display()
            )))
        }
        Err(e) => return Err(e.into()),
    };
    let array: ArrayFile = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        Error::MissingCalibrationData(format!("{} is corrupt: {e}", path.display()))
    })?;
    if array.version != FORMAT_VERSION {
        return Err(Error::MissingCalibrationData(format!(
            "{} has unsupported version {}",
            path.display(),
            array.version
        )));
    }
    let Some(expected) = array.rows.checked_mul(array.cols) else {
        return Err(Error::MissingCalibrationData(format!(
            "{} declares an oversized {}x{} array",
            path.display(),
            array.rows,
            array.cols
        )));
    };
    if array.data.len() != expected {
        return Err(Error::MissingCalibrationData(format!(
            "{} declares {}x{} but holds {} values",
            path.display(),
            array.rows,
            array.cols,
            array.data.len()
        )));
    }
    Ok(array)
}

pub fn read_matrix<const R: usize, const C: usize>(
    dir: &Path,
    name: &str,
) -> Result<SMatrix<f64, R, C>> {
    let array = read_array(dir, name)?;
    if array.rows != R || array.cols != C {
        return Err(Error::MissingCalibrationData(format!(
            "{name}: expected {R}x{C}, found {}x{}",
            array.rows, array.cols
        )));
    }
    Ok(SMatrix::from_row_slice(&array.data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3x4;

    #[test]
    fn matrices_are_stored_row_major() {
        let dir = tempfile::tempdir().unwrap();
        let m = Matrix3x4::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 0.1 + 0.2);
        write_matrix(dir.path(), "p", &m).unwrap();

        let raw = read_array(dir.path(), "p").unwrap();
        assert_eq!(raw.data[..4], [1.0, 2.0, 3.0, 4.0]);
        let back: Matrix3x4<f64> = read_matrix(dir.path(), "p").unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn wrong_shape_is_missing_data() {
        let dir = tempfile::tempdir().unwrap();
        write_array(dir.path(), "r", 2, 2, &[1.0, 0.0, 0.0, 1.0]).unwrap();
        let err = read_matrix::<3, 3>(dir.path(), "r").unwrap_err();
        assert!(matches!(err, Error::MissingCalibrationData(_)));
    }

    #[test]
    fn corrupt_and_future_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(array_path(dir.path(), "bad"), "{not json").unwrap();
        assert!(matches!(read_array(dir.path(), "bad"), Err(Error::MissingCalibrationData(_))));

        std::fs::write(
            array_path(dir.path(), "v2"),
            r#"{"version":2,"name":"v2","rows":1,"cols":1,"data":[1.0]}"#,
        )
        .unwrap();
        assert!(matches!(read_array(dir.path(), "v2"), Err(Error::MissingCalibrationData(_))));
        assert!(matches!(read_array(dir.path(), "absent"), Err(Error::MissingCalibrationData(_))));

        std::fs::write(
            array_path(dir.path(), "huge"),
            r#"{"version":1,"name":"huge","rows":4294967296,"cols":4294967296,"data":[]}"#,
        )
        .unwrap();
        assert!(matches!(read_array(dir.path(), "huge"), Err(Error::MissingCalibrationData(_))));
    }
}

//! Matcher parameter schemas and the flat `name value` settings format.
//!
//! Every parameter has a declared `[min, max]` range and a step. Writes are
//! clamped into the range and snapped onto the step grid anchored at `min`;
//! an out-of-range value is never rejected. Unknown names are errors.

use crate::{Error, Result};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Which matching algorithm a parameter set configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatcherKind {
    /// Local block matching with a prefilter and a texture threshold.
    Basic,
    /// Semi-global matching with smoothness penalties.
    SemiGlobal,
}

impl MatcherKind {
    /// Parameters in declaration order.
    pub fn schema(self) -> &'static [ParameterSpec] {
        match self {
            MatcherKind::Basic => BASIC_SCHEMA,
            MatcherKind::SemiGlobal => SEMI_GLOBAL_SCHEMA,
        }
    }

    /// Declared range of `name`, if the kind has such a parameter.
    pub fn spec(self, name: &str) -> Option<&'static ParameterSpec> {
        self.schema().iter().find(|s| s.name == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            MatcherKind::Basic => "basic",
            MatcherKind::SemiGlobal => "semi-global",
        }
    }
}

impl fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared range of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub min: i32,
    pub max: i32,
    pub step: i32,
    pub default: i32,
}

impl ParameterSpec {
    pub const fn new(name: &'static str, min: i32, max: i32, step: i32, default: i32) -> Self {
        Self {
            name,
            min,
            max,
            step,
            default,
        }
    }

    /// Nearest admissible value: clamped to `[min, max]`, then rounded to the
    /// step grid (ties round up).
    pub fn clamp(&self, value: i32) -> i32 {
        let bounded = value.clamp(self.min, self.max);
        if self.step <= 1 {
            return bounded;
        }
        let offset = bounded - self.min;
        let snapped = self.min + (offset + self.step / 2) / self.step * self.step;
        if snapped > self.max {
            snapped - self.step
        } else {
            snapped
        }
    }

    /// Number of admissible values.
    pub fn levels(&self) -> usize {
        ((self.max - self.min) / self.step.max(1) + 1) as usize
    }

    /// Grid index of the admissible value nearest to `value`.
    pub fn level_of(&self, value: i32) -> usize {
        ((self.clamp(value) - self.min) / self.step.max(1)) as usize
    }

    pub fn value_at(&self, level: usize) -> i32 {
        self.clamp(self.min + level as i32 * self.step.max(1))
    }
}

pub const BASIC_SCHEMA: &[ParameterSpec] = &[
    ParameterSpec::new("pre_filter_type", 0, 1, 1, 0),
    ParameterSpec::new("pre_filter_cap", 1, 63, 1, 31),
    ParameterSpec::new("search_range", 16, 256, 16, 80),
    ParameterSpec::new("window_size", 5, 255, 2, 21),
    ParameterSpec::new("texture_threshold", 0, 1000, 1, 10),
    ParameterSpec::new("uniqueness_ratio", 0, 100, 1, 15),
    ParameterSpec::new("speckle_window_size", 0, 200, 1, 0),
    ParameterSpec::new("speckle_range", 0, 64, 1, 0),
];

pub const SEMI_GLOBAL_SCHEMA: &[ParameterSpec] = &[
    ParameterSpec::new("min_disparity", 0, 128, 1, 16),
    ParameterSpec::new("num_disparities", 16, 256, 16, 96),
    ParameterSpec::new("block_size", 1, 11, 2, 3),
    ParameterSpec::new("p1", 0, 4000, 1, 216),
    ParameterSpec::new("p2", 0, 16000, 1, 864),
    ParameterSpec::new("disp12_max_diff", -1, 128, 1, 1),
    ParameterSpec::new("uniqueness_ratio", 0, 100, 1, 10),
    ParameterSpec::new("speckle_window_size", 0, 200, 1, 100),
    ParameterSpec::new("speckle_range", 0, 64, 1, 32),
    ParameterSpec::new("full_dp", 0, 1, 1, 0),
];

/// Outcome of a parameter write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub name: &'static str,
    pub requested: i32,
    pub applied: i32,
}

impl Assignment {
    pub fn was_clamped(&self) -> bool {
        self.requested != self.applied
    }
}

/// Values for every parameter of one matcher kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSet {
    kind: MatcherKind,
    values: Vec<i32>,
}

impl ParameterSet {
    /// Declared defaults.
    pub fn new(kind: MatcherKind) -> Self {
        Self {
            kind,
            values: kind.schema().iter().map(|s| s.default).collect(),
        }
    }

    /// Every parameter at its declared minimum.
    pub fn minima(kind: MatcherKind) -> Self {
        Self {
            kind,
            values: kind.schema().iter().map(|s| s.min).collect(),
        }
    }

    pub fn kind(&self) -> MatcherKind {
        self.kind
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.kind
            .schema()
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "'{}' is not a {} matcher parameter",
                    name, self.kind
                ))
            })
    }

    pub fn spec(&self, name: &str) -> Result<&'static ParameterSpec> {
        let i = self.position(name)?;
        Ok(&self.kind.schema()[i])
    }

    pub fn get(&self, name: &str) -> Result<i32> {
        Ok(self.values[self.position(name)?])
    }

    /// Clamp `value` into the parameter's range and store it.
    pub fn set(&mut self, name: &str, value: i32) -> Result<Assignment> {
        let i = self.position(name)?;
        let spec = &self.kind.schema()[i];
        let applied = spec.clamp(value);
        self.values[i] = applied;
        Ok(Assignment {
            name: spec.name,
            requested: value,
            applied,
        })
    }

    /// `(name, value)` in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, i32)> + '_ {
        self.kind
            .schema()
            .iter()
            .zip(self.values.iter())
            .map(|(s, &v)| (s.name, v))
    }

    /// Declared upper bound per parameter, in declaration order.
    pub fn parameter_maxima(&self) -> Vec<(&'static str, i32)> {
        self.kind.schema().iter().map(|s| (s.name, s.max)).collect()
    }

    pub fn write_settings<W: Write>(&self, writer: &mut W) -> Result<()> {
        for (name, value) in self.iter() {
            writeln!(writer, "{} {}", name, value)?;
        }
        Ok(())
    }

    pub fn to_settings_string(&self) -> String {
        self.iter()
            .map(|(name, value)| format!("{} {}\n", name, value))
            .collect()
    }

    /// Write the settings file, one `name value` line per parameter.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.write_settings(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Read a settings file on top of the declared defaults.
    pub fn load<P: AsRef<Path>>(kind: MatcherKind, path: P) -> Result<Self> {
        let mut set = Self::new(kind);
        set.update_from_file(path)?;
        Ok(set)
    }

    /// Apply a settings file to this set. Parameters the file does not name
    /// keep their current value. Nothing is applied if any line is invalid.
    pub fn update_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<Vec<Assignment>> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        self.update_from_reader(reader, path)
    }

    /// As [`ParameterSet::update_from_file`]; `path` is only used in errors.
    pub fn update_from_reader<R: BufRead>(
        &mut self,
        reader: R,
        path: &Path,
    ) -> Result<Vec<Assignment>> {
        let mut staged = self.clone();
        let mut assignments = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = index + 1;
            let content = line.trim();
            if content.is_empty() || content.starts_with('#') {
                continue;
            }

            let mut fields = content.split_whitespace();
            let (name, value) = match (fields.next(), fields.next(), fields.next()) {
                (Some(name), Some(value), None) => (name, value),
                _ => {
                    return Err(Error::Parse {
                        path: path.to_path_buf(),
                        line: line_no,
                        message: format!("expected `name value`, found '{}'", content),
                    })
                }
            };

            if staged.position(name).is_err() {
                return Err(Error::UnknownSettingName {
                    name: name.to_string(),
                    path: path.to_path_buf(),
                });
            }

            let value = parse_value(value).ok_or_else(|| Error::Parse {
                path: path.to_path_buf(),
                line: line_no,
                message: format!("'{}' is not an integer value for {}", value, name),
            })?;

            assignments.push(staged.set(name, value)?);
        }

        *self = staged;
        Ok(assignments)
    }
}

/// Integers, plus `true`/`false` and integral floats written by other tools.
fn parse_value(text: &str) -> Option<i32> {
    if let Ok(v) = text.parse::<i64>() {
        return Some(v.clamp(i32::MIN as i64, i32::MAX as i64) as i32);
    }
    match text {
        "true" | "True" => return Some(1),
        "false" | "False" => return Some(0),
        _ => {}
    }
    let v = text.parse::<f64>().ok()?;
    (v.is_finite() && v.fract() == 0.0).then(|| v.clamp(i32::MIN as f64, i32::MAX as f64) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn clamp_snaps_to_step_grid() {
        let window = ParameterSpec::new("window_size", 5, 255, 2, 21);
        assert_eq!(window.clamp(1), 5);
        assert_eq!(window.clamp(6), 7);
        assert_eq!(window.clamp(300), 255);

        let range = ParameterSpec::new("search_range", 16, 256, 16, 80);
        assert_eq!(range.clamp(100), 96);
        assert_eq!(range.clamp(0), 16);
        assert_eq!(range.levels(), 16);
        assert_eq!(range.level_of(256), 15);
        assert_eq!(range.value_at(4), 80);
    }

    #[test]
    fn schemas_have_defaults_on_grid() {
        for kind in [MatcherKind::Basic, MatcherKind::SemiGlobal] {
            for spec in kind.schema() {
                assert_eq!(spec.clamp(spec.default), spec.default, "{}", spec.name);
                assert_eq!((spec.max - spec.min) % spec.step, 0, "{}", spec.name);
            }
        }
    }

    #[test]
    fn set_reports_clamped_value() {
        let mut params = ParameterSet::new(MatcherKind::SemiGlobal);
        let a = params.set("block_size", 40).unwrap();
        assert!(a.was_clamped());
        assert_eq!(a.applied, 11);
        assert_eq!(params.get("block_size").unwrap(), 11);

        let a = params.set("disp12_max_diff", -20).unwrap();
        assert_eq!(a.applied, -1);
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let mut params = ParameterSet::new(MatcherKind::Basic);
        assert!(matches!(
            params.set("p1", 10),
            Err(Error::InvalidParameter(_))
        ));
        assert!(params.get("full_dp").is_err());
    }

    #[test]
    fn settings_text_in_declaration_order() {
        let params = ParameterSet::new(MatcherKind::Basic);
        let text = params.to_settings_string();
        let first: Vec<&str> = text
            .lines()
            .map(|l| l.split(' ').next().unwrap())
            .collect();
        let declared: Vec<&str> = BASIC_SCHEMA.iter().map(|s| s.name).collect();
        assert_eq!(first, declared);
        assert!(text.starts_with("pre_filter_type 0\npre_filter_cap 31\n"));
    }

    #[test]
    fn reader_skips_comments_and_keeps_missing() {
        let mut params = ParameterSet::new(MatcherKind::SemiGlobal);
        let text = "# tuned\n\nnum_disparities 70\np1 8000\n";
        let applied = params
            .update_from_reader(Cursor::new(text), Path::new("mem"))
            .unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(params.get("num_disparities").unwrap(), 64);
        assert_eq!(params.get("p1").unwrap(), 4000);
        assert_eq!(params.get("p2").unwrap(), 864);
    }

    #[test]
    fn reader_is_all_or_nothing() {
        let mut params = ParameterSet::new(MatcherKind::Basic);
        let text = "window_size 9\nsearch_range lots\n";
        let err = params
            .update_from_reader(Cursor::new(text), Path::new("bm.txt"))
            .unwrap_err();
        assert!(matches!(err, Error::Parse { line: 2, .. }));
        assert_eq!(params.get("window_size").unwrap(), 21);

        let err = params
            .update_from_reader(Cursor::new("speed 3\n"), Path::new("bm.txt"))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSettingName { ref name, .. } if name == "speed"));

        let err = params
            .update_from_reader(Cursor::new("window_size 9 11\n"), Path::new("bm.txt"))
            .unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));
    }

    #[test]
    fn values_from_other_writers() {
        assert_eq!(parse_value("true"), Some(1));
        assert_eq!(parse_value("32.0"), Some(32));
        assert_eq!(parse_value("3.5"), None);
        assert_eq!(parse_value("99999999999"), Some(i32::MAX));
    }
}

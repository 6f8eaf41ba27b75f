//! Aggregation of operator-confirmed matcher settings over a tuning run.
//!
//! Each confirmed [`ParameterSet`] adds one observation per parameter. The
//! recommended value of a parameter is the most frequent one; ties go to the
//! value that was recorded first.

use crate::params::{MatcherKind, ParameterSet, ParameterSpec};
use crate::{Error, Result};
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct Histogram {
    spec: &'static ParameterSpec,
    counts: Vec<usize>,
    first_seen: Vec<Option<u64>>,
}

impl Histogram {
    fn new(spec: &'static ParameterSpec) -> Self {
        let levels = spec.levels();
        Self {
            spec,
            counts: vec![0; levels],
            first_seen: vec![None; levels],
        }
    }

    fn record(&mut self, value: i32, order: u64) -> i32 {
        let level = self.spec.level_of(value);
        self.counts[level] += 1;
        self.first_seen[level].get_or_insert(order);
        self.spec.value_at(level)
    }

    /// `(value, count)` by descending count, then by first appearance.
    fn ranked(&self) -> Vec<(i32, usize, u64)> {
        let mut entries: Vec<(i32, usize, u64)> = self
            .counts
            .iter()
            .zip(&self.first_seen)
            .enumerate()
            .filter_map(|(level, (&count, &seen))| {
                seen.map(|order| (self.spec.value_at(level), count, order))
            })
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        entries
    }
}

/// Frequency table for one parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingReport {
    pub name: &'static str,
    /// `(value, count)` by descending count; ties keep recording order.
    pub entries: Vec<(i32, usize)>,
}

impl SettingReport {
    pub fn mode(&self) -> Option<i32> {
        self.entries.first().map(|&(value, _)| value)
    }
}

impl fmt::Display for SettingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "{:>5} | Selection frequency", "value")?;
        writeln!(f, "{:->6}+{:-<20}", "", "")?;
        for (value, count) in &self.entries {
            writeln!(f, "{:>5} | {}", value, count)?;
        }
        Ok(())
    }
}

/// Multiset of recorded values per parameter for a single tuning run.
#[derive(Debug, Clone)]
pub struct TuningAggregator {
    kind: MatcherKind,
    histograms: Vec<Histogram>,
    records: u64,
}

impl TuningAggregator {
    /// Recording structures are sized from each parameter's declared range.
    pub fn new(kind: MatcherKind) -> Self {
        Self {
            kind,
            histograms: kind.schema().iter().map(Histogram::new).collect(),
            records: 0,
        }
    }

    pub fn kind(&self) -> MatcherKind {
        self.kind
    }

    fn histogram_index(&self, name: &str) -> Result<usize> {
        self.histograms
            .iter()
            .position(|h| h.spec.name == name)
            .ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "'{}' is not a {} matcher parameter",
                    name, self.kind
                ))
            })
    }

    fn check_kind(&self, params: &ParameterSet) -> Result<()> {
        if params.kind() != self.kind {
            return Err(Error::InvalidParameter(format!(
                "aggregator records {} parameters, got {}",
                self.kind,
                params.kind()
            )));
        }
        Ok(())
    }

    /// Record every value of a confirmed parameter set.
    pub fn record(&mut self, params: &ParameterSet) -> Result<()> {
        self.check_kind(params)?;
        let order = self.records;
        self.records += 1;
        for (histogram, (_, value)) in self.histograms.iter_mut().zip(params.iter()) {
            histogram.record(value, order);
        }
        debug!(records = self.records, "recorded tuning state");
        Ok(())
    }

    /// Record one value, clamped like [`ParameterSet::set`]. Returns the
    /// value actually recorded.
    pub fn record_value(&mut self, name: &str, value: i32) -> Result<i32> {
        let index = self.histogram_index(name)?;
        let order = self.records;
        self.records += 1;
        Ok(self.histograms[index].record(value, order))
    }

    /// Number of observations recorded for `name`.
    pub fn count(&self, name: &str) -> Result<usize> {
        let index = self.histogram_index(name)?;
        Ok(self.histograms[index].counts.iter().sum())
    }

    pub fn report(&self, name: &str) -> Result<SettingReport> {
        let histogram = &self.histograms[self.histogram_index(name)?];
        Ok(SettingReport {
            name: histogram.spec.name,
            entries: histogram
                .ranked()
                .into_iter()
                .map(|(value, count, _)| (value, count))
                .collect(),
        })
    }

    /// Most frequently recorded value, or `None` if nothing was recorded.
    pub fn report_settings(&self, name: &str) -> Result<Option<i32>> {
        Ok(self.report(name)?.mode())
    }

    /// `base` with every recorded parameter replaced by its mode.
    pub fn recommended(&self, base: &ParameterSet) -> Result<ParameterSet> {
        self.check_kind(base)?;
        let mut params = base.clone();
        for histogram in &self.histograms {
            if let Some(&(value, count, _)) = histogram.ranked().first() {
                params.set(histogram.spec.name, value)?;
                info!(
                    parameter = histogram.spec.name,
                    value, count, "recommended setting"
                );
            }
        }
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_of_recorded_values() {
        let mut agg = TuningAggregator::new(MatcherKind::SemiGlobal);
        for v in [3, 3, 5, 3, 5] {
            agg.record_value("block_size", v).unwrap();
        }
        assert_eq!(agg.report_settings("block_size").unwrap(), Some(3));
        assert_eq!(agg.count("block_size").unwrap(), 5);
    }

    #[test]
    fn ties_go_to_first_seen() {
        let mut agg = TuningAggregator::new(MatcherKind::SemiGlobal);
        for v in [5, 3, 3, 5] {
            agg.record_value("block_size", v).unwrap();
        }
        assert_eq!(agg.report_settings("block_size").unwrap(), Some(5));

        let mut agg = TuningAggregator::new(MatcherKind::SemiGlobal);
        for v in [3, 3, 5, 5] {
            agg.record_value("block_size", v).unwrap();
        }
        assert_eq!(agg.report_settings("block_size").unwrap(), Some(3));
    }

    #[test]
    fn nothing_recorded() {
        let agg = TuningAggregator::new(MatcherKind::Basic);
        assert_eq!(agg.report_settings("window_size").unwrap(), None);
        assert!(agg.report_settings("p1").is_err());
    }

    #[test]
    fn records_are_clamped() {
        let mut agg = TuningAggregator::new(MatcherKind::Basic);
        assert_eq!(agg.record_value("search_range", 1000).unwrap(), 256);
        assert_eq!(agg.report_settings("search_range").unwrap(), Some(256));
    }

    #[test]
    fn report_table() {
        let mut agg = TuningAggregator::new(MatcherKind::Basic);
        for v in [9, 11, 11] {
            agg.record_value("window_size", v).unwrap();
        }
        let report = agg.report("window_size").unwrap();
        assert_eq!(report.entries, vec![(11, 2), (9, 1)]);
        let text = report.to_string();
        assert!(text.starts_with("window_size\nvalue | Selection frequency\n"));
        assert!(text.contains("   11 | 2\n"));
    }

    #[test]
    fn recommended_falls_back_to_base() {
        let mut agg = TuningAggregator::new(MatcherKind::Basic);
        agg.record_value("window_size", 31).unwrap();
        let base = ParameterSet::new(MatcherKind::Basic);
        let rec = agg.recommended(&base).unwrap();
        assert_eq!(rec.get("window_size").unwrap(), 31);
        assert_eq!(rec.get("search_range").unwrap(), 80);

        let other = ParameterSet::new(MatcherKind::SemiGlobal);
        assert!(agg.recommended(&other).is_err());
    }
}

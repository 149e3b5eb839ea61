use std::collections::BTreeMap;

use crate::telemetry::{
    sample::GpsSample,
    speed::{SpeedUnit, recalculate_speed},
};

/// Samples grouped by source segment, sources ordered by name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Track {
    sources: BTreeMap<String, Vec<GpsSample>>,
}

impl Track {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group loose samples by source and sort each group by timestamp (stable).
    pub fn from_samples(samples: impl IntoIterator<Item = GpsSample>) -> Self {
        let mut track = Self::new();
        track.extend(samples);
        track.sort_by_time();
        track
    }

    /// Append samples in the given order, without re-sorting.
    pub fn extend(&mut self, samples: impl IntoIterator<Item = GpsSample>) {
        for s in samples {
            self.push(s);
        }
    }

    pub fn push(&mut self, sample: GpsSample) {
        self.sources
            .entry(sample.source.clone())
            .or_default()
            .push(sample);
    }

    pub fn sort_by_time(&mut self) {
        for samples in self.sources.values_mut() {
            samples.sort_by_key(|s| s.timestamp);
        }
    }

    /// Opt-in pass replacing device speeds with position-derived ones, per source.
    pub fn recalculate_speed(&mut self, unit: SpeedUnit) {
        for samples in self.sources.values_mut() {
            recalculate_speed(samples, unit);
        }
    }

    pub fn source(&self, name: &str) -> &[GpsSample] {
        self.sources.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn sources(&self) -> impl Iterator<Item = (&str, &[GpsSample])> {
        self.sources
            .iter()
            .map(|(name, samples)| (name.as_str(), samples.as_slice()))
    }

    pub fn samples(&self) -> impl Iterator<Item = &GpsSample> {
        self.sources.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.sources.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::sample::sample_at;

    #[test]
    fn groups_and_orders_sources() {
        let track = Track::from_samples([
            sample_at("b", 0, 45.0, 9.0),
            sample_at("a", 2, 45.0, 9.0),
            sample_at("a", 1, 45.0, 9.0),
        ]);
        let names: Vec<&str> = track.sources().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
        let a = track.source("a");
        assert!(a[0].timestamp < a[1].timestamp);
        assert_eq!(track.len(), 3);
    }

    #[test]
    fn unknown_source_is_empty() {
        let track = Track::from_samples([sample_at("a", 0, 45.0, 9.0)]);
        assert!(track.source("zzz").is_empty());
    }

    #[test]
    fn speed_pass_does_not_cross_sources() {
        let mut track = Track::from_samples([
            sample_at("a", 0, 45.0, 9.0),
            sample_at("b", 10, 45.001, 9.0),
        ]);
        track.recalculate_speed(SpeedUnit::Kmh);
        assert_eq!(track.source("a")[0].speed, 12.5);
        assert_eq!(track.source("b")[0].speed, 12.5);
    }
}

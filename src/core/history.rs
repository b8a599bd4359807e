//! Bounded history of received snapshots.
//!
//! Plots, CSV export and the dashboard readout all work from the last
//! `capacity` samples. When full, the oldest sample is evicted first.

use std::collections::VecDeque;

use trickwatch_varserver::{Component, Snapshot, Value};

use super::view::AxisPair;

/// One snapshot tagged with the simulation time it was taken at.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Value of the catalog's time term, if present in the snapshot.
    pub sim_time: Option<f64>,
    pub snapshot: Snapshot,
}

impl Sample {
    /// Reads `time_term` out of `snapshot`.
    pub fn new(snapshot: Snapshot, time_term: &str) -> Self {
        let sim_time = snapshot.component(time_term, Component::N);
        Sample { sim_time, snapshot }
    }
}

#[derive(Debug, Clone)]
pub struct History {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl History {
    /// A zero capacity is raised to one; config validation rejects it earlier.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        History {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// One value per sample that carries `label`, oldest first.
    pub fn series(&self, label: &str, component: Component) -> Vec<f64> {
        self.samples
            .iter()
            .filter_map(|s| s.snapshot.component(label, component))
            .collect()
    }

    /// Two components of a vector term, for a flat plot.
    pub fn points(&self, label: &str, axes: AxisPair) -> Vec<(f64, f64)> {
        let (h, v) = axes.components();
        self.samples
            .iter()
            .filter_map(|s| {
                Some((
                    s.snapshot.component(label, h)?,
                    s.snapshot.component(label, v)?,
                ))
            })
            .collect()
    }

    /// All three components of a vector term.
    pub fn points3(&self, label: &str) -> Vec<[f64; 3]> {
        self.samples
            .iter()
            .filter_map(|s| match s.snapshot.get(label) {
                Some(Value::Vector(v)) => Some(*v),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(t: f64, r: [f64; 3]) -> Sample {
        Sample::new(
            Snapshot::new(vec![
                ("Position (m)".into(), Value::Vector(r)),
                ("UTC Seconds (s)".into(), Value::Scalar(t)),
            ]),
            "UTC Seconds (s)",
        )
    }

    #[test]
    fn test_sample_reads_time_term() {
        assert_eq!(sample(12.0, [0.0; 3]).sim_time, Some(12.0));
        let s = Sample::new(Snapshot::default(), "UTC Seconds (s)");
        assert_eq!(s.sim_time, None);
    }

    #[test]
    fn test_oldest_evicted_first() {
        let mut history = History::new(3);
        for t in 0..5 {
            history.push(sample(t as f64, [0.0; 3]));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(
            history.series("UTC Seconds (s)", Component::N),
            vec![2.0, 3.0, 4.0]
        );
        assert_eq!(history.latest().unwrap().sim_time, Some(4.0));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut history = History::new(0);
        history.push(sample(1.0, [0.0; 3]));
        history.push(sample(2.0, [0.0; 3]));
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_projections() {
        let mut history = History::new(10);
        history.push(sample(0.0, [1.0, 2.0, 3.0]));
        history.push(sample(1.0, [4.0, 5.0, 6.0]));

        assert_eq!(
            history.points("Position (m)", AxisPair::Yz),
            vec![(2.0, 3.0), (5.0, 6.0)]
        );
        assert_eq!(
            history.points("Position (m)", AxisPair::Xz),
            vec![(1.0, 3.0), (4.0, 6.0)]
        );
        assert_eq!(
            history.points3("Position (m)"),
            vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]
        );
        assert!(history.points3("UTC Seconds (s)").is_empty());
    }

    #[test]
    fn test_clear() {
        let mut history = History::new(2);
        history.push(sample(0.0, [0.0; 3]));
        history.clear();
        assert!(history.is_empty());
        assert!(history.latest().is_none());
    }
}

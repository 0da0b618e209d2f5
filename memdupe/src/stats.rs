use std::collections::*;
use itertools::*;

use crate::timer::{ LatencySample, PassResult };

/// A list of observed write latencies (in nanoseconds).
#[derive(Clone, Debug)]
pub struct LatencyResults(pub Vec<u64>);
impl LatencyResults {
    pub fn from_samples(samples: &[LatencySample]) -> Self {
        Self(samples.iter().map(|s| s.elapsed_ns).collect())
    }

    /// Return the arithmetic mean of the list.
    pub fn mean(&self) -> Option<f64> {
        if self.0.is_empty() {
            return None;
        }
        Some(self.0.iter().map(|x| *x as f64).sum::<f64>() / self.0.len() as f64)
    }

    /// Return the median of the list.
    pub fn median(&self) -> Option<u64> {
        let sorted: Vec<u64> = self.0.iter().copied().sorted().collect();
        sorted.get(sorted.len() / 2).copied()
    }
}
impl From<&PassResult> for LatencyResults {
    fn from(res: &PassResult) -> Self { Self::from_samples(&res.samples) }
}

/// Implemented on types which contain a list of observed values.
pub trait ResultList<D: Copy + Ord> {
    /// Return a reference to the list of values.
    fn data(&self) -> &Vec<D>;

    /// Return the number of observed values.
    fn len(&self) -> usize { self.data().len() }

    /// Return the minimum value in the list.
    fn get_min(&self) -> Option<D> { self.data().iter().min().copied() }

    /// Return the maximum value in the list.
    fn get_max(&self) -> Option<D> { self.data().iter().max().copied() }

    /// Return the minimum and maximum values in the list.
    fn get_minmax(&self) -> Option<(D, D)> {
        match self.data().iter().minmax() {
            MinMaxResult::NoElements => None,
            MinMaxResult::OneElement(x) => Some((*x, *x)),
            MinMaxResult::MinMax(lo, hi) => Some((*lo, *hi)),
        }
    }

    /// Return the most-frequent value in the list.
    fn get_mode(&self) -> Option<D> {
        self.histogram().into_iter().max_by(|x, y| x.1.cmp(&y.1))
            .map(|(val, _)| val)
    }

    /// Return a histogram counting the distribution of all values in the list.
    fn histogram(&self) -> BTreeMap<D, usize> {
        let mut dist = BTreeMap::new();
        for r in self.data().iter() {
            *dist.entry(*r).or_insert(0) += 1;
        }
        dist
    }

    /// Returns the number of times that a particular value occurs in the list.
    fn count(&self, val: D) -> usize {
        self.data().iter().filter(|x| **x == val).count()
    }

    /// Return the indexes of all values in the list for which the given
    /// function `f` returns `true`.
    fn filter(&self, mut f: impl FnMut(D) -> bool) -> Vec<usize> {
        self.data().iter().positions(|x| f(*x)).collect()
    }
}

impl ResultList<u64> for LatencyResults {
    fn data(&self) -> &Vec<u64> { &self.0 }
}

/// Short human-readable summary of a pass.
pub fn summarize(res: &PassResult) -> String {
    let lat = LatencyResults::from(res);
    let long = res.samples.iter().filter(|s| s.long).count();
    match (lat.get_minmax(), lat.mean()) {
        (Some((min, max)), Some(mean)) => format!(
            "{} pages, {} ns total, min={} mean={:.1} max={} long={}",
            res.pages_written, res.total_ns, min, mean, max, long
        ),
        _ => format!("{} pages, {} ns total", res.pages_written, res.total_ns),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn basic_stats() {
        let r = LatencyResults(vec![5, 1, 3, 3, 9]);
        assert_eq!(r.len(), 5);
        assert_eq!(r.get_min(), Some(1));
        assert_eq!(r.get_max(), Some(9));
        assert_eq!(r.get_minmax(), Some((1, 9)));
        assert_eq!(r.get_mode(), Some(3));
        assert_eq!(r.count(3), 2);
        assert_eq!(r.filter(|x| x > 4), vec![0, 4]);
        assert_eq!(r.median(), Some(3));
        assert_eq!(r.mean(), Some(4.2));
    }

    #[test]
    fn empty_stats() {
        let r = LatencyResults(vec![]);
        assert_eq!(r.get_min(), None);
        assert_eq!(r.get_minmax(), None);
        assert_eq!(r.get_mode(), None);
        assert_eq!(r.mean(), None);
        assert_eq!(r.median(), None);
        assert_eq!(summarize(&PassResult::default()), "0 pages, 0 ns total");
    }
}

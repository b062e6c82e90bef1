use itertools::Itertools;
use scope_common::Real;
use serde::Serialize;

/// Fixed-width histogram over a closed range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    min: Real,
    max: Real,
    counts: Vec<u64>,
}

impl Histogram {
    /// Bins `values` into `bins` equal bins spanning `range`.
    ///
    /// Without a range the histogram spans the finite values, widened by half
    /// a unit either side when they are all equal, and (0,1) when there are none.
    /// Values outside the range, or NaN, are not counted. The upper edge
    /// belongs to the last bin.
    pub fn new<'a, I>(values: I, bins: usize, range: Option<(Real, Real)>) -> Self
    where
        I: IntoIterator<Item = &'a Real>,
        I::IntoIter: Clone,
    {
        let values = values.into_iter().copied().filter(|v| !v.is_nan());
        let (min, max) = range.unwrap_or_else(|| data_range(values.clone()));
        let bins = bins.max(1);
        let width = (max - min) / bins as Real;

        let mut counts = vec![0; bins];
        for value in values.filter(|v| (min..=max).contains(v)) {
            let bin = (((value - min) / width) as usize).min(bins - 1);
            if let Some(count) = counts.get_mut(bin) {
                *count += 1;
            }
        }
        Self { min, max, counts }
    }

    pub fn range(&self) -> (Real, Real) {
        (self.min, self.max)
    }

    pub fn bin_width(&self) -> Real {
        (self.max - self.min) / self.counts.len() as Real
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn max_count(&self) -> u64 {
        self.counts.iter().copied().max().unwrap_or_default()
    }

    /// The lower edge of every bin followed by the upper edge of the last.
    pub fn edges(&self) -> Vec<Real> {
        let width = self.bin_width();
        (0..=self.counts.len())
            .map(|i| self.min + i as Real * width)
            .collect()
    }

    pub fn centres(&self) -> Vec<Real> {
        self.edges()
            .into_iter()
            .tuple_windows()
            .map(|(lower, upper)| 0.5 * (lower + upper))
            .collect()
    }
}

fn data_range(values: impl Iterator<Item = Real>) -> (Real, Real) {
    match values.filter(|v| v.is_finite()).minmax() {
        itertools::MinMaxResult::NoElements => (0.0, 1.0),
        itertools::MinMaxResult::OneElement(v) => (v - 0.5, v + 0.5),
        itertools::MinMaxResult::MinMax(min, max) if min == max => (min - 0.5, max + 0.5),
        itertools::MinMaxResult::MinMax(min, max) => (min, max),
    }
}

/// Count, mean and sample standard deviation of a set of values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub mean: Option<Real>,
    /// Requires at least two values.
    pub sigma: Option<Real>,
}

impl Summary {
    pub fn new<'a>(values: impl IntoIterator<Item = &'a Real>) -> Self {
        let values = values.into_iter().copied().collect_vec();
        let count = values.len();
        if count == 0 {
            return Self {
                count,
                mean: None,
                sigma: None,
            };
        }
        let mean = values.iter().sum::<Real>() / count as Real;
        let sigma = (count > 1).then(|| {
            let squares: Real = values.iter().map(|v| (v - mean).powi(2)).sum();
            (squares / (count - 1) as Real).sqrt()
        });
        Self {
            count,
            mean: Some(mean),
            sigma,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn bins_with_inclusive_upper_edge() {
        let values = [0.0, 0.1, 0.5, 0.99, 1.0, 1.5, -0.1];
        let histogram = Histogram::new(&values, 4, Some((0.0, 1.0)));
        assert_eq!(histogram.counts(), &[2, 0, 1, 2]);
        assert_eq!(histogram.total(), 5);
        assert_eq!(histogram.max_count(), 2);
    }

    #[test]
    fn range_defaults_to_data() {
        let values = [2.0, 4.0, 3.0, Real::NAN];
        let histogram = Histogram::new(&values, 2, None);
        assert_eq!(histogram.range(), (2.0, 4.0));
        assert_eq!(histogram.counts(), &[1, 2]);
    }

    #[test]
    fn equal_values_get_a_unit_range() {
        let histogram = Histogram::new(&[3.0, 3.0], 10, None);
        assert_eq!(histogram.range(), (2.5, 3.5));
        assert_eq!(histogram.total(), 2);
    }

    #[test]
    fn empty_data() {
        let histogram = Histogram::new(&[0.0; 0], 5, None);
        assert_eq!(histogram.range(), (0.0, 1.0));
        assert_eq!(histogram.total(), 0);
    }

    #[test]
    fn edges_and_centres() {
        let histogram = Histogram::new(&[0.0; 0], 4, Some((0.0, 2.0)));
        assert_eq!(histogram.edges(), vec![0.0, 0.5, 1.0, 1.5, 2.0]);
        assert_eq!(histogram.centres(), vec![0.25, 0.75, 1.25, 1.75]);
    }

    #[test]
    fn summary_uses_sample_deviation() {
        let summary = Summary::new(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(summary.count, 4);
        assert_approx_eq!(summary.mean.unwrap(), 2.5);
        assert_approx_eq!(summary.sigma.unwrap(), (5.0_f64 / 3.0).sqrt());
    }

    #[test]
    fn summary_of_few_values() {
        assert_eq!(
            Summary::new(&[0.0; 0]),
            Summary {
                count: 0,
                mean: None,
                sigma: None
            }
        );
        let single = Summary::new(&[7.0]);
        assert_eq!(single.mean, Some(7.0));
        assert_eq!(single.sigma, None);
    }
}

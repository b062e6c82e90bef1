//! Event gating across channels.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use scope_common::{Real, is_valid_crossing_time};

/// Marks the events whose amplitude exceeds the threshold on every given channel.
///
/// The mask is as long as the longest amplitude array. An event missing from
/// any channel's array fails the mask, and with no channels the mask is empty.
pub fn coincidence_mask(channels: &[(ArrayView1<Real>, Real)]) -> Array1<bool> {
    let events = channels
        .iter()
        .map(|(amplitudes, _)| amplitudes.len())
        .max()
        .unwrap_or_default();
    Array1::from_shape_fn(events, |event| {
        channels.iter().all(|(amplitudes, threshold)| {
            amplitudes
                .get(event)
                .is_some_and(|&amplitude| amplitude > *threshold)
        })
    })
}

/// Indices of the events which pass the mask.
pub fn selected_events(mask: ArrayView1<bool>) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(event, &pass)| pass.then_some(event))
        .collect()
}

/// The rows of `waveforms` chosen by `events`, in order.
pub fn select_events(waveforms: ArrayView2<Real>, events: &[usize]) -> Array2<Real> {
    waveforms.select(Axis(0), events)
}

/// `measurement - trigger` for each event where both crossing times were found.
pub fn time_differences(measurement: ArrayView1<Real>, trigger: ArrayView1<Real>) -> Array1<Real> {
    measurement
        .iter()
        .zip(trigger.iter())
        .filter(|&(&m, &t)| is_valid_crossing_time(m) && is_valid_crossing_time(t))
        .map(|(m, t)| m - t)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use scope_common::NO_CROSSING_TIME;

    #[test]
    fn every_channel_must_pass() {
        let a = array![0.02, 0.02, 0.001, 0.3];
        let b = array![0.02, 0.01, 0.02, 0.3];
        let mask = coincidence_mask(&[(a.view(), 0.015), (b.view(), 0.015)]);
        assert_eq!(mask, array![true, false, false, true]);
    }

    #[test]
    fn threshold_is_exclusive() {
        let a = array![0.015, 0.0150001];
        let mask = coincidence_mask(&[(a.view(), 0.015)]);
        assert_eq!(mask, array![false, true]);
    }

    #[test]
    fn single_low_channel_rejects_event() {
        let a = array![0.02];
        let b = array![0.02];
        let c = array![0.001];
        let mask = coincidence_mask(&[(a.view(), 0.015), (b.view(), 0.015), (c.view(), 0.015)]);
        assert_eq!(mask, array![false]);
    }

    #[test]
    fn shorter_channel_fails_missing_events() {
        let a = array![0.5, 0.5, 0.5];
        let b = Array1::<Real>::zeros(0);
        let mask = coincidence_mask(&[(a.view(), 0.1), (b.view(), 0.1)]);
        assert_eq!(mask, array![false, false, false]);
    }

    #[test]
    fn no_channels_gives_empty_mask() {
        assert!(coincidence_mask(&[]).is_empty());
    }

    #[test]
    fn select_masked_rows() {
        let waveforms = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let events = selected_events(array![true, false, true].view());
        assert_eq!(events, vec![0, 2]);
        assert_eq!(
            select_events(waveforms.view(), &events),
            array![[1.0, 1.0], [3.0, 3.0]]
        );
    }

    #[test]
    fn differences_skip_missing_crossings() {
        let measurement = array![12.0, NO_CROSSING_TIME, 15.0, 9.0];
        let trigger = array![10.0, 10.0, NO_CROSSING_TIME, 10.0];
        assert_eq!(
            time_differences(measurement.view(), trigger.view()),
            array![2.0, -1.0]
        );
    }
}

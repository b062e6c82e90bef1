use crate::config::ConfigError;
use ndarray::{Array2, ArrayView2, Axis, s};
use scope_common::Real;

/// Removes the per-event pedestal and the channel's post-gain.
///
/// The pedestal of each event is the mean of its first `pedestal_window`
/// samples. It is subtracted from every sample of the event, and the result
/// is divided by `post_gain`.
///
/// # Error Modes
/// Fails unless `0 < pedestal_window < samples` and `post_gain` is a
/// non-zero finite number.
pub fn normalize(
    waveforms: ArrayView2<Real>,
    pedestal_window: usize,
    post_gain: Real,
) -> Result<Array2<Real>, ConfigError> {
    if pedestal_window == 0 {
        return Err(ConfigError::ZeroPedestalWindow);
    }
    if pedestal_window >= waveforms.ncols() {
        return Err(ConfigError::PedestalWindow {
            window: pedestal_window,
            samples: waveforms.ncols(),
        });
    }
    if post_gain == 0.0 || !post_gain.is_finite() {
        return Err(ConfigError::InvalidGain(post_gain));
    }
    let pedestal = match waveforms.slice(s![.., ..pedestal_window]).mean_axis(Axis(1)) {
        Some(pedestal) => pedestal.insert_axis(Axis(1)),
        None => return Ok(waveforms.to_owned()),
    };
    Ok((&waveforms - &pedestal) / post_gain)
}

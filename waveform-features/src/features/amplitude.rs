use super::FeatureError;
use ndarray::{Array1, ArrayView2, Axis};
use scope_common::Real;

/// The largest normalized voltage of each event.
pub fn amplitude(waveforms: ArrayView2<Real>) -> Result<Array1<Real>, FeatureError> {
    if waveforms.ncols() == 0 {
        return Err(FeatureError::EmptyWaveform);
    }
    Ok(waveforms.map_axis(Axis(1), |event| {
        event.iter().copied().fold(Real::NEG_INFINITY, Real::max)
    }))
}

//! Reads oscilloscope captures from HDF5 files.
use hdf5::{
    Attribute, Dataset, File,
    types::{VarLenAscii, VarLenUnicode},
};
use scope_common::{CHANNELS_PER_SCOPE, Real};
use std::{collections::BTreeMap, path::Path};
use thiserror::Error;
use tracing::debug;
use waveform_features::{AttributeValue, Calibration, Capture, CaptureError, CaptureMetadata};

const WAVEFORM_DATASET: &str = "waveform";
const SAMPLES_ATTRIBUTE: &str = "nPt";
const CHANNEL_MASK_ATTRIBUTE: &str = "chmask";
const SAMPLE_INTERVAL_ATTRIBUTE: &str = "dt";

const NO_HDF5_PATH_SET: &str = "[No HDF5 Path Set]";

pub(crate) type LoadResult<T> = Result<T, LoadError>;

#[derive(Debug, Error)]
pub(crate) enum LoadError {
    #[error("HDF5 Error: {error} at {0}", hdf5_path.as_deref().unwrap_or(NO_HDF5_PATH_SET))]
    Hdf5 {
        error: hdf5::Error,
        hdf5_path: Option<String>,
    },
    #[error("Expected at least {expected} values, found {found} at {0}", hdf5_path.as_deref().unwrap_or(NO_HDF5_PATH_SET))]
    TooFewValues {
        expected: usize,
        found: usize,
        hdf5_path: Option<String>,
    },
    #[error("Value {value} is not a valid sample count at {0}", hdf5_path.as_deref().unwrap_or(NO_HDF5_PATH_SET))]
    InvalidSampleCount {
        value: Real,
        hdf5_path: Option<String>,
    },
    #[error("Malformed capture: {0}")]
    Capture(#[from] CaptureError),
}

impl LoadError {
    fn with_hdf5_path(self, path: String) -> Self {
        match self {
            Self::Hdf5 {
                error,
                hdf5_path: None,
            } => Self::Hdf5 {
                error,
                hdf5_path: Some(path),
            },
            Self::TooFewValues {
                expected,
                found,
                hdf5_path: None,
            } => Self::TooFewValues {
                expected,
                found,
                hdf5_path: Some(path),
            },
            Self::InvalidSampleCount {
                value,
                hdf5_path: None,
            } => Self::InvalidSampleCount {
                value,
                hdf5_path: Some(path),
            },
            other => other,
        }
    }

    fn too_few_values(expected: usize, found: usize) -> Self {
        Self::TooFewValues {
            expected,
            found,
            hdf5_path: None,
        }
    }
}

impl From<hdf5::Error> for LoadError {
    fn from(error: hdf5::Error) -> Self {
        LoadError::Hdf5 {
            error,
            hdf5_path: None,
        }
    }
}

/// Appends the HDF5 path of the object being read to any error.
trait ConvertResult<T> {
    fn err_file(self, file: &File) -> LoadResult<T>;
    fn err_dataset(self, dataset: &Dataset) -> LoadResult<T>;
    fn err_attribute(self, attribute: &Attribute) -> LoadResult<T>;
}

impl<T, E> ConvertResult<T> for Result<T, E>
where
    E: Into<LoadError>,
{
    fn err_file(self, file: &File) -> LoadResult<T> {
        self.map_err(|e| e.into().with_hdf5_path(file.filename()))
    }

    fn err_dataset(self, dataset: &Dataset) -> LoadResult<T> {
        self.map_err(|e| e.into().with_hdf5_path(dataset.name()))
    }

    fn err_attribute(self, attribute: &Attribute) -> LoadResult<T> {
        self.map_err(|e| e.into().with_hdf5_path(attribute.name()))
    }
}

/// Loads the capture stored in the `waveform` dataset of an HDF5 file.
///
/// The dataset holds one row per active channel. Its attributes give the
/// per-channel calibration (`vertical1`..`vertical4` as `[scale, offset]`),
/// the samples per event (`nPt`), the active-channel mask (`chmask`) and the
/// sample interval in seconds (`dt`). Every other attribute is kept as
/// metadata for the report.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub(crate) fn load_capture(path: &Path) -> LoadResult<Capture> {
    let file = File::open(path)?;
    let dataset = file.dataset(WAVEFORM_DATASET).err_file(&file)?;
    let recorded = dataset.read_2d::<Real>().err_dataset(&dataset)?;
    let metadata = read_metadata(&dataset)?;
    debug!(
        shape = ?recorded.shape(),
        samples_per_event = metadata.samples_per_event,
        "Read waveform"
    );
    Ok(Capture::from_recorded(recorded.view(), metadata)?)
}

fn calibration_attribute(channel: usize) -> String {
    format!("vertical{}", channel + 1)
}

fn read_metadata(dataset: &Dataset) -> LoadResult<CaptureMetadata> {
    let mut calibration = [Calibration::default(); CHANNELS_PER_SCOPE];
    for (channel, calibration) in calibration.iter_mut().enumerate() {
        let attribute = dataset
            .attr(&calibration_attribute(channel))
            .err_dataset(dataset)?;
        let values = attribute.read_raw::<Real>().err_attribute(&attribute)?;
        let &[scale, offset, ..] = values.as_slice() else {
            return Err(LoadError::too_few_values(2, values.len())).err_attribute(&attribute);
        };
        *calibration = Calibration { scale, offset };
    }

    let attribute = dataset.attr(SAMPLES_ATTRIBUTE).err_dataset(dataset)?;
    let samples_per_event = read_first::<Real>(&attribute).and_then(|value| {
        if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
            Ok(value as usize)
        } else {
            Err(LoadError::InvalidSampleCount {
                value,
                hdf5_path: None,
            })
            .err_attribute(&attribute)
        }
    })?;

    let attribute = dataset.attr(CHANNEL_MASK_ATTRIBUTE).err_dataset(dataset)?;
    let mask = read_mask(&attribute)?;
    let mut active_channels = [false; CHANNELS_PER_SCOPE];
    if mask.len() < CHANNELS_PER_SCOPE {
        return Err(LoadError::too_few_values(CHANNELS_PER_SCOPE, mask.len()))
            .err_attribute(&attribute);
    }
    active_channels.copy_from_slice(&mask[..CHANNELS_PER_SCOPE]);

    let attribute = dataset.attr(SAMPLE_INTERVAL_ATTRIBUTE).err_dataset(dataset)?;
    let sample_interval = read_first::<Real>(&attribute)?;

    let attributes = read_other_attributes(dataset)?;

    Ok(CaptureMetadata {
        calibration,
        samples_per_event,
        active_channels,
        sample_interval,
        attributes,
    })
}

fn read_first<T: hdf5::H5Type + Copy>(attribute: &Attribute) -> LoadResult<T> {
    let values = attribute.read_raw::<T>().err_attribute(attribute)?;
    values
        .first()
        .copied()
        .ok_or(LoadError::too_few_values(1, 0))
        .err_attribute(attribute)
}

/// Masks may be stored as booleans or as integers.
fn read_mask(attribute: &Attribute) -> LoadResult<Vec<bool>> {
    match attribute.read_raw::<bool>() {
        Ok(mask) => Ok(mask),
        Err(_) => attribute
            .read_raw::<i64>()
            .map(|mask| mask.into_iter().map(|bit| bit != 0).collect())
            .err_attribute(attribute),
    }
}

fn read_other_attributes(dataset: &Dataset) -> LoadResult<BTreeMap<String, AttributeValue>> {
    let known = (0..CHANNELS_PER_SCOPE)
        .map(calibration_attribute)
        .chain(
            [SAMPLES_ATTRIBUTE, CHANNEL_MASK_ATTRIBUTE, SAMPLE_INTERVAL_ATTRIBUTE]
                .map(String::from),
        )
        .collect::<Vec<_>>();

    let mut attributes = BTreeMap::new();
    for name in dataset.attr_names().err_dataset(dataset)? {
        if known.contains(&name) {
            continue;
        }
        let attribute = dataset.attr(&name).err_dataset(dataset)?;
        match read_attribute_value(&attribute) {
            Some(value) => {
                attributes.insert(name, value);
            }
            None => debug!(name, "Skipping attribute of unsupported type"),
        }
    }
    Ok(attributes)
}

fn read_attribute_value(attribute: &Attribute) -> Option<AttributeValue> {
    if let Ok(text) = attribute.read_scalar::<VarLenUnicode>() {
        return Some(AttributeValue::Text(text.as_str().to_owned()));
    }
    if let Ok(text) = attribute.read_scalar::<VarLenAscii>() {
        return Some(AttributeValue::Text(text.as_str().to_owned()));
    }
    let values = attribute.read_raw::<Real>().ok()?;
    match values.as_slice() {
        [value] if attribute.is_scalar() => Some(AttributeValue::Number(*value)),
        _ => Some(AttributeValue::Numbers(values)),
    }
}

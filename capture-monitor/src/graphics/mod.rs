mod svg;

use std::path::{Path, PathBuf};
use strum::{Display, EnumString};
use waveform_features::{
    Real,
    statistics::{GaussianFit, Histogram, Summary},
};

pub(crate) use svg::SvgSaver;

/// Width and height of every figure, in pixels.
pub(crate) const FIGURE_SIZE: (u32, u32) = (800, 600);

#[derive(Clone, Copy, Debug, EnumString, Display)]
pub(crate) enum FileFormat {
    #[strum(to_string = "svg")]
    Svg,
}

impl FileFormat {
    pub(crate) fn build_path(self, directory: &Path, name: &str) -> PathBuf {
        let mut path_buf = directory.join(name);
        path_buf.set_extension(self.to_string());
        path_buf
    }
}

/// A histogram with the statistics shown in its legend.
pub(crate) struct HistogramPlot<'a> {
    pub(crate) title: String,
    pub(crate) x_label: &'static str,
    pub(crate) histogram: &'a Histogram,
    pub(crate) summary: &'a Summary,
    pub(crate) fit: Option<&'a GaussianFit>,
}

impl HistogramPlot<'_> {
    /// Lines of text drawn beside the histogram.
    pub(crate) fn legend(&self) -> Vec<String> {
        let format = |value: Option<Real>| value.map_or("-".to_owned(), |v| format!("{v:.4e}"));
        let mut lines = vec![
            format!("mean: {}", format(self.summary.mean)),
            format!("sigma: {}", format(self.summary.sigma)),
            format!("#event: {}", self.summary.count),
            format!("#bin: {}", self.histogram.counts().len()),
        ];
        if let Some(fit) = self.fit {
            lines.push(format!("fit mean: {:.4e}", fit.mean));
            lines.push(format!("fit sigma: {:.4e}", fit.sigma));
        }
        lines
    }
}

pub(crate) trait GraphSaver {
    fn format() -> FileFormat;

    fn save_histogram(plot: &HistogramPlot, path: &Path, size: (u32, u32)) -> miette::Result<()>;
}

use super::{FileFormat, GraphSaver, HistogramPlot};
use miette::IntoDiagnostic;
use plotters::{
    chart::{ChartBuilder, ChartContext},
    coord::{Shift, types::RangedCoordf64},
    element::{PathElement, Rectangle, Text},
    prelude::{Cartesian2d, DrawingArea, IntoDrawingArea, SVGBackend},
    series::LineSeries,
    style::{BLACK, BLUE, Color, IntoFont, RED, WHITE},
};
use std::path::Path;
use tracing::instrument;
use waveform_features::{Real, statistics::GaussianFit};

type MyDrawingArea<'a> = DrawingArea<SVGBackend<'a>, Shift>;
type MyChartContext<'a> =
    ChartContext<'a, SVGBackend<'a>, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

/// Points on which a fitted curve is drawn.
const FIT_POINTS: usize = 200;

trait MyBuilder<'a>: Sized {
    fn build_histogram_graph(root: &MyDrawingArea<'a>, plot: &HistogramPlot) -> miette::Result<Self>;
    fn draw_bars_to_chart(&mut self, plot: &HistogramPlot) -> miette::Result<()>;
    fn draw_fit_to_chart(&mut self, fit: &GaussianFit, x: (Real, Real)) -> miette::Result<()>;
}

#[derive(Default)]
pub(crate) struct SvgSaver {}

impl<'a> MyBuilder<'a> for MyChartContext<'a> {
    #[instrument(skip_all, level = "debug")]
    fn build_histogram_graph(
        root: &MyDrawingArea<'a>,
        plot: &HistogramPlot,
    ) -> miette::Result<MyChartContext<'a>> {
        let (min, max) = plot.histogram.range();
        let top = (plot.histogram.max_count() as Real * 1.1).max(1.0);

        let mut chart = ChartBuilder::on(root)
            .x_label_area_size(35)
            .y_label_area_size(40)
            .margin(5)
            .caption(&plot.title, ("sans-serif", 30.0).into_font())
            .build_cartesian_2d(min..max, 0.0..top)
            .into_diagnostic()?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .disable_y_mesh()
            .x_desc(plot.x_label)
            .y_desc("Occurrence")
            .x_label_formatter(&|x| format!("{:.2e}", x))
            .draw()
            .into_diagnostic()?;

        Ok(chart)
    }

    #[instrument(skip_all, level = "debug")]
    fn draw_bars_to_chart(&mut self, plot: &HistogramPlot) -> miette::Result<()> {
        let edges = plot.histogram.edges();
        let bars = edges
            .windows(2)
            .zip(plot.histogram.counts())
            .filter(|(_, count)| **count > 0)
            .map(|(edge, &count)| {
                Rectangle::new(
                    [(edge[0], 0.0), (edge[1], count as Real)],
                    BLUE.mix(0.5).filled(),
                )
            });

        self.draw_series(bars)
            .into_diagnostic()?
            .label(plot.title.as_str())
            .legend(|(x, y)| Rectangle::new([(x - 5, y - 5), (x + 5, y + 5)], BLUE.mix(0.5).filled()));
        Ok(())
    }

    #[instrument(skip_all, level = "debug")]
    fn draw_fit_to_chart(&mut self, fit: &GaussianFit, (min, max): (Real, Real)) -> miette::Result<()> {
        let step = (max - min) / FIT_POINTS as Real;
        let data = (0..=FIT_POINTS).map(|i| {
            let x = min + i as Real * step;
            (x, fit.evaluate(x))
        });

        self.draw_series(LineSeries::new(data, &RED))
            .into_diagnostic()?
            .label("Gaussian fit")
            .legend(|(x, y)| PathElement::new(vec![(x - 10, y), (x + 10, y)], RED));
        Ok(())
    }
}

impl GraphSaver for SvgSaver {
    fn format() -> FileFormat {
        FileFormat::Svg
    }

    fn save_histogram(plot: &HistogramPlot, path: &Path, (width, height): (u32, u32)) -> miette::Result<()> {
        let root = SVGBackend::new(path, (width, height)).into_drawing_area();

        root.fill(&WHITE).into_diagnostic()?;

        let mut chart = MyChartContext::build_histogram_graph(&root, plot)?;
        chart.draw_bars_to_chart(plot)?;
        if let Some(fit) = plot.fit {
            chart.draw_fit_to_chart(fit, plot.histogram.range())?;
        }

        chart
            .configure_series_labels()
            .background_style(WHITE)
            .border_style(BLACK)
            .draw()
            .into_diagnostic()?;

        let font = ("sans-serif", 14.0).into_font();
        let x = width as i32 - 190;
        for (line, text) in plot.legend().into_iter().enumerate() {
            let y = 60 + 18 * line as i32;
            root.draw(&Text::new(text, (x, y), font.clone()))
                .into_diagnostic()?;
        }

        root.present().into_diagnostic()?;
        Ok(())
    }
}

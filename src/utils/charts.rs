//! SVG chart rendering
//!
//! Small hand-written SVG charts for the EDA report, training curves and
//! the ROC curve. No plotting dependency is pulled in for this.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 80.0;

pub const COLOR_PRIMARY: &str = "#3498db";
pub const COLOR_SECONDARY: &str = "#2ecc71";
pub const COLOR_TERTIARY: &str = "#e74c3c";
pub const COLOR_MUTED: &str = "#95a5a6";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

const FONT: &str = "Arial, sans-serif";

#[derive(Debug, Clone)]
pub struct DataPoint {
    pub x: f64,
    pub y: f64,
}

impl DataPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub points: Vec<DataPoint>,
    pub color: String,
    /// Draw a marker on every point
    pub markers: bool,
    pub dashed: bool,
}

impl DataSeries {
    pub fn new(name: &str, points: Vec<DataPoint>, color: &str) -> Self {
        Self {
            name: name.to_string(),
            points,
            color: color.to_string(),
            markers: true,
            dashed: false,
        }
    }

    pub fn without_markers(mut self) -> Self {
        self.markers = false;
        self
    }

    pub fn dashed(mut self) -> Self {
        self.dashed = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct BarData {
    pub label: String,
    pub value: f64,
    pub color: String,
}

/// How a chart chooses its value range and tick labels
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AxisRange {
    /// Fit the data, starting at zero when all values are positive
    Auto,
    /// Fixed range
    Fixed(f64, f64),
}

/// Line chart description
#[derive(Debug, Clone)]
pub struct LineChart<'a> {
    pub title: &'a str,
    pub x_label: &'a str,
    pub y_label: &'a str,
    pub x_range: AxisRange,
    pub y_range: AxisRange,
    /// Decimal places on tick labels
    pub tick_precision: usize,
}

impl<'a> LineChart<'a> {
    pub fn new(title: &'a str, x_label: &'a str, y_label: &'a str) -> Self {
        Self {
            title,
            x_label,
            y_label,
            x_range: AxisRange::Auto,
            y_range: AxisRange::Auto,
            tick_precision: 2,
        }
    }

    pub fn with_x_range(mut self, range: AxisRange) -> Self {
        self.x_range = range;
        self
    }

    pub fn with_y_range(mut self, range: AxisRange) -> Self {
        self.y_range = range;
        self
    }

    pub fn with_tick_precision(mut self, precision: usize) -> Self {
        self.tick_precision = precision;
        self
    }

    /// Render the chart as an SVG document
    pub fn render(&self, series: &[DataSeries]) -> String {
        let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
        let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

        let (data_x_min, data_x_max, data_y_min, data_y_max) = find_ranges(series);
        let (x_min, x_max) = resolve_range(self.x_range, data_x_min, data_x_max);
        let (y_min, y_max) = resolve_range(self.y_range, data_y_min, data_y_max);

        let to_x = |x: f64| MARGIN_LEFT + (x - x_min) / (x_max - x_min) * plot_width;
        let to_y = |y: f64| MARGIN_TOP + plot_height - (y - y_min) / (y_max - y_min) * plot_height;

        let mut svg = open_svg(self.title);

        for i in 0..=5 {
            let fraction = i as f64 / 5.0;
            let y = MARGIN_TOP + plot_height - fraction * plot_height;
            let x = MARGIN_LEFT + fraction * plot_width;
            let y_value = y_min + fraction * (y_max - y_min);
            let x_value = x_min + fraction * (x_max - x_min);

            let _ = write!(
                svg,
                r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
                MARGIN_LEFT,
                y,
                MARGIN_LEFT + plot_width,
                y,
                COLOR_GRID
            );
            let _ = write!(
                svg,
                r#"<text x="{}" y="{}" text-anchor="end" font-family="{}" font-size="12" fill="{}">{:.*}</text>"#,
                MARGIN_LEFT - 10.0,
                y + 4.0,
                FONT,
                COLOR_TEXT,
                self.tick_precision,
                y_value
            );
            let _ = write!(
                svg,
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="11" fill="{}">{:.*}</text>"#,
                x,
                MARGIN_TOP + plot_height + 20.0,
                FONT,
                COLOR_TEXT,
                self.tick_precision,
                x_value
            );
        }

        push_axes(&mut svg, plot_width, plot_height, true);
        push_axis_labels(&mut svg, self.x_label, self.y_label, plot_width);

        for s in series.iter().filter(|s| !s.points.is_empty()) {
            let mut path = String::new();
            for (i, p) in s.points.iter().enumerate() {
                let cmd = if i == 0 { "M" } else { " L" };
                let _ = write!(path, "{} {:.2} {:.2}", cmd, to_x(p.x), to_y(p.y));
            }
            let dash = if s.dashed {
                r#" stroke-dasharray="6,4""#
            } else {
                ""
            };
            let _ = write!(
                svg,
                r#"<path d="{}" fill="none" stroke="{}" stroke-width="3"{}/>"#,
                path, s.color, dash
            );

            if s.markers {
                for p in &s.points {
                    let _ = write!(
                        svg,
                        r#"<circle cx="{:.2}" cy="{:.2}" r="4" fill="{}" stroke="white" stroke-width="2"/>"#,
                        to_x(p.x),
                        to_y(p.y),
                        s.color
                    );
                }
            }
        }

        let mut legend_y = MARGIN_TOP + 10.0;
        for s in series {
            push_legend_entry(&mut svg, CHART_WIDTH - MARGIN_RIGHT - 160.0, legend_y, &s.color, &s.name);
            legend_y += 25.0;
        }

        svg.push_str("</svg>");
        svg
    }

    pub fn write(&self, series: &[DataSeries], output_path: &Path) -> std::io::Result<()> {
        fs::write(output_path, self.render(series))
    }
}

/// Render a bar chart. `percent` formats value labels as percentages.
pub fn render_bar_chart(title: &str, y_label: &str, bars: &[BarData], percent: bool) -> String {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let data_max = bars.iter().map(|b| b.value).fold(0.0f64, f64::max);
    let y_max = if percent {
        data_max.max(100.0)
    } else if data_max > 0.0 {
        data_max * 1.1
    } else {
        1.0
    };

    let slot = plot_width / bars.len().max(1) as f64;
    let bar_width = slot * 0.7;
    let bar_gap = slot * 0.3;
    let suffix = if percent { "%" } else { "" };

    let mut svg = open_svg(title);

    for i in 0..=5 {
        let fraction = i as f64 / 5.0;
        let y = MARGIN_TOP + plot_height - fraction * plot_height;
        let _ = write!(
            svg,
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            MARGIN_LEFT,
            y,
            MARGIN_LEFT + plot_width,
            y,
            COLOR_GRID
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" font-family="{}" font-size="12" fill="{}">{:.0}{}</text>"#,
            MARGIN_LEFT - 10.0,
            y + 4.0,
            FONT,
            COLOR_TEXT,
            fraction * y_max,
            suffix
        );
    }

    push_axes(&mut svg, plot_width, plot_height, false);
    push_axis_labels(&mut svg, "", y_label, plot_width);

    for (i, bar) in bars.iter().enumerate() {
        let x = MARGIN_LEFT + i as f64 * slot + bar_gap / 2.0;
        let bar_height = (bar.value / y_max) * plot_height;
        let y = MARGIN_TOP + plot_height - bar_height;

        let _ = write!(
            svg,
            r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{}" rx="4"/>"#,
            x, y, bar_width, bar_height, bar.color
        );

        let value_label = if percent {
            format!("{:.1}%", bar.value)
        } else {
            format!("{}", bar.value)
        };
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="12" font-weight="bold" fill="{}">{}</text>"#,
            x + bar_width / 2.0,
            y - 8.0,
            FONT,
            COLOR_TEXT,
            value_label
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="11" fill="{}">{}</text>"#,
            x + bar_width / 2.0,
            MARGIN_TOP + plot_height + 25.0,
            FONT,
            COLOR_TEXT,
            escape_xml(&bar.label)
        );
    }

    svg.push_str("</svg>");
    svg
}

pub fn generate_bar_chart(
    title: &str,
    y_label: &str,
    bars: &[BarData],
    percent: bool,
    output_path: &Path,
) -> std::io::Result<()> {
    fs::write(output_path, render_bar_chart(title, y_label, bars, percent))
}

fn open_svg(title: &str) -> String {
    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}">"#,
        CHART_WIDTH, CHART_HEIGHT, CHART_WIDTH, CHART_HEIGHT
    );
    let _ = write!(
        svg,
        r#"<rect width="{}" height="{}" fill="white"/>"#,
        CHART_WIDTH, CHART_HEIGHT
    );
    let _ = write!(
        svg,
        r#"<text x="{}" y="35" text-anchor="middle" font-family="{}" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        CHART_WIDTH / 2.0,
        FONT,
        COLOR_TEXT,
        escape_xml(title)
    );
    svg
}

fn push_axes(svg: &mut String, plot_width: f64, plot_height: f64, with_y_axis: bool) {
    let _ = write!(
        svg,
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT,
        MARGIN_TOP + plot_height,
        MARGIN_LEFT + plot_width,
        MARGIN_TOP + plot_height,
        COLOR_AXIS
    );
    if with_y_axis {
        let _ = write!(
            svg,
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
            MARGIN_LEFT,
            MARGIN_TOP,
            MARGIN_LEFT,
            MARGIN_TOP + plot_height,
            COLOR_AXIS
        );
    }
}

fn push_axis_labels(svg: &mut String, x_label: &str, y_label: &str, plot_width: f64) {
    if !x_label.is_empty() {
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="14" fill="{}">{}</text>"#,
            MARGIN_LEFT + plot_width / 2.0,
            CHART_HEIGHT - 20.0,
            FONT,
            COLOR_TEXT,
            escape_xml(x_label)
        );
    }
    let _ = write!(
        svg,
        r#"<text x="20" y="{}" text-anchor="middle" font-family="{}" font-size="14" fill="{}" transform="rotate(-90 20 {})">{}</text>"#,
        CHART_HEIGHT / 2.0,
        FONT,
        COLOR_TEXT,
        CHART_HEIGHT / 2.0,
        escape_xml(y_label)
    );
}

fn push_legend_entry(svg: &mut String, x: f64, y: f64, color: &str, name: &str) {
    let _ = write!(
        svg,
        r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
        x, y, color
    );
    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" font-family="{}" font-size="12" fill="{}">{}</text>"#,
        x + 20.0,
        y + 12.0,
        FONT,
        COLOR_TEXT,
        escape_xml(name)
    );
}

fn find_ranges(series: &[DataSeries]) -> (f64, f64, f64, f64) {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;

    for p in series.iter().flat_map(|s| &s.points) {
        if !(p.x.is_finite() && p.y.is_finite()) {
            continue;
        }
        x_min = x_min.min(p.x);
        x_max = x_max.max(p.x);
        y_min = y_min.min(p.y);
        y_max = y_max.max(p.y);
    }

    (x_min, x_max, y_min, y_max)
}

fn resolve_range(range: AxisRange, data_min: f64, data_max: f64) -> (f64, f64) {
    let (min, max) = match range {
        AxisRange::Fixed(min, max) => (min, max),
        AxisRange::Auto if !data_min.is_finite() || !data_max.is_finite() => (0.0, 1.0),
        AxisRange::Auto => {
            let min = if data_min >= 0.0 { 0.0 } else { data_min };
            (min, data_max)
        }
    };

    if max - min <= f64::EPSILON {
        (min, min + 1.0)
    } else {
        (min, max)
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loss_series() -> Vec<DataSeries> {
        vec![
            DataSeries::new(
                "train",
                vec![DataPoint::new(1.0, 0.69), DataPoint::new(2.0, 0.51), DataPoint::new(3.0, 0.42)],
                COLOR_PRIMARY,
            ),
            DataSeries::new(
                "validation",
                vec![DataPoint::new(1.0, 0.66), DataPoint::new(2.0, 0.55), DataPoint::new(3.0, 0.50)],
                COLOR_TERTIARY,
            ),
        ]
    }

    #[test]
    fn test_line_chart_contains_series() {
        let svg = LineChart::new("Loss", "Epoch", "Loss").render(&loss_series());

        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert_eq!(svg.matches("<path").count(), 2);
        assert!(svg.contains("validation"));
    }

    #[test]
    fn test_line_chart_without_markers_and_dashed() {
        let diagonal = DataSeries::new(
            "chance",
            vec![DataPoint::new(0.0, 0.0), DataPoint::new(1.0, 1.0)],
            COLOR_MUTED,
        )
        .without_markers()
        .dashed();

        let svg = LineChart::new("ROC", "FPR", "TPR")
            .with_x_range(AxisRange::Fixed(0.0, 1.0))
            .with_y_range(AxisRange::Fixed(0.0, 1.0))
            .render(&[diagonal]);

        assert!(!svg.contains("<circle"));
        assert!(svg.contains("stroke-dasharray"));
    }

    #[test]
    fn test_escape_in_title() {
        let svg = LineChart::new("Benign <vs> Malignant", "x", "y").render(&[]);
        assert!(svg.contains("Benign &lt;vs&gt; Malignant"));
    }

    #[test]
    fn test_bar_chart_counts() {
        let bars = vec![
            BarData { label: "benign".into(), value: 130908.0, color: COLOR_SECONDARY.into() },
            BarData { label: "malignant".into(), value: 89117.0, color: COLOR_TERTIARY.into() },
        ];
        let svg = render_bar_chart("Class balance", "Patches", &bars, false);

        assert_eq!(svg.matches("rx=\"4\"").count(), 2);
        assert!(svg.contains("130908"));
        assert!(!svg.contains("130908.0%"));
    }

    #[test]
    fn test_resolve_range_degenerate() {
        assert_eq!(resolve_range(AxisRange::Auto, 0.5, 0.5), (0.0, 0.5));
        assert_eq!(resolve_range(AxisRange::Auto, -0.0, 0.0), (0.0, 1.0));
        assert_eq!(resolve_range(AxisRange::Auto, f64::INFINITY, f64::NEG_INFINITY), (0.0, 1.0));
    }

    #[test]
    fn test_write_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loss.svg");
        LineChart::new("Loss", "Epoch", "Loss").write(&loss_series(), &path).unwrap();
        assert!(path.exists());
    }
}

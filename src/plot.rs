use std::fmt::Write as FmtWrite;

use camino::Utf8Path;
use chrono::NaiveDate;
use png::{BitDepth, ColorType, Encoder};
use resvg::tiny_skia::{Pixmap, Transform};
use resvg::usvg::{Options, Tree};
use tracing::info;

use crate::domain::HistoryRow;
use crate::error::LrseqError;
use crate::fs_util;
use crate::history;

pub const NO_DATA_TEXT: &str = "No data available";
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

const WIDTH: f64 = 1000.0;
const HEIGHT: f64 = 600.0;
const LEFT: f64 = 80.0;
const RIGHT: f64 = 30.0;
const TOP: f64 = 50.0;
const BOTTOM: f64 = 120.0;
const MAX_DATE_LABELS: usize = 24;
const WGS_COLOR: &str = "#1f77b4";
const MGX_COLOR: &str = "#ff7f0e";

/// SVG markup of the sample-count history, or the placeholder when `rows`
/// is empty.
pub fn render_svg(rows: &[HistoryRow]) -> Result<String, LrseqError> {
    let mut out = String::with_capacity(16 * 1024);
    let result = if rows.is_empty() {
        draw_placeholder(&mut out)
    } else {
        let mut sorted = rows.to_vec();
        sorted.sort_by_key(|row| (row.date, row.run_id));
        draw_chart(&mut out, &sorted)
    };
    result.map_err(|err| LrseqError::Plot(err.to_string()))?;
    Ok(out)
}

/// The chart rasterized to PNG bytes.
pub fn render_png(rows: &[HistoryRow]) -> Result<Vec<u8>, LrseqError> {
    let svg = render_svg(rows)?;
    svg_to_png(&svg, WIDTH as u32, HEIGHT as u32)
}

pub fn plot_to_file(rows: &[HistoryRow], output: &Utf8Path) -> Result<(), LrseqError> {
    let png = render_png(rows)?;
    fs_util::write_replace(output, &png)?;
    info!(path = %output, rows = rows.len(), "plot written");
    Ok(())
}

/// Plots straight from a history CSV; a missing or empty file gives the
/// placeholder.
pub fn plot_csv(csv: &Utf8Path, output: &Utf8Path) -> Result<usize, LrseqError> {
    let rows = history::load_history(csv);
    plot_to_file(&rows, output)?;
    Ok(rows.len())
}

fn svg_to_png(svg: &str, width: u32, height: u32) -> Result<Vec<u8>, LrseqError> {
    let mut options = Options::default();
    options.fontdb_mut().load_system_fonts();

    let tree = Tree::from_data(svg.as_bytes(), &options)
        .map_err(|err| LrseqError::Plot(format!("SVG parse failed: {err}")))?;

    let mut pixmap = Pixmap::new(width, height)
        .ok_or_else(|| LrseqError::Plot("pixmap allocation failed".to_string()))?;
    resvg::render(&tree, Transform::default(), &mut pixmap.as_mut());

    let mut out = Vec::new();
    let mut encoder = Encoder::new(&mut out, width, height);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    encoder
        .write_header()
        .map_err(|err| LrseqError::Plot(err.to_string()))?
        .write_image_data(pixmap.data())
        .map_err(|err| LrseqError::Plot(err.to_string()))?;
    Ok(out)
}

fn svg_open(out: &mut String) -> std::fmt::Result {
    writeln!(
        out,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{WIDTH}\" height=\"{HEIGHT}\" viewBox=\"0 0 {WIDTH} {HEIGHT}\" font-family=\"Arial,Helvetica,sans-serif\">"
    )?;
    writeln!(
        out,
        "<rect x=\"0\" y=\"0\" width=\"{WIDTH}\" height=\"{HEIGHT}\" fill=\"#fff\"/>"
    )
}

fn draw_placeholder(out: &mut String) -> std::fmt::Result {
    svg_open(out)?;
    writeln!(
        out,
        "<text x=\"{}\" y=\"{}\" text-anchor=\"middle\" dominant-baseline=\"middle\" font-size=\"20\">{NO_DATA_TEXT}</text>",
        WIDTH / 2.0,
        HEIGHT / 2.0
    )?;
    writeln!(out, "</svg>")
}

fn draw_chart(out: &mut String, rows: &[HistoryRow]) -> std::fmt::Result {
    let plot_w = WIDTH - LEFT - RIGHT;
    let plot_h = HEIGHT - TOP - BOTTOM;

    let first = rows[0].date;
    let last = rows[rows.len() - 1].date;
    let span_days = (last - first).num_days().max(0) as f64;
    let x_of = |date: NaiveDate| {
        if span_days == 0.0 {
            LEFT + plot_w / 2.0
        } else {
            LEFT + ((date - first).num_days() as f64 / span_days) * plot_w
        }
    };

    let max_value = rows
        .iter()
        .map(|row| row.wgs_samples.max(row.mgx_samples))
        .max()
        .unwrap_or(0);
    let y_max = nice_ceiling(max_value);
    let y_of = |value: u64| TOP + plot_h - (value as f64 / y_max as f64) * plot_h;

    svg_open(out)?;
    writeln!(
        out,
        "<text x=\"{}\" y=\"30\" text-anchor=\"middle\" font-size=\"18\">Number of Samples Over Time</text>",
        WIDTH / 2.0
    )?;
    writeln!(
        out,
        "<rect x=\"{LEFT}\" y=\"{TOP}\" width=\"{plot_w}\" height=\"{plot_h}\" fill=\"none\" stroke=\"#333\"/>"
    )?;

    for i in 0..=5u64 {
        let value = y_max * i / 5;
        let y = y_of(value);
        writeln!(
            out,
            "<line x1=\"{LEFT}\" y1=\"{y:.1}\" x2=\"{:.1}\" y2=\"{y:.1}\" stroke=\"#ddd\"/>",
            LEFT + plot_w
        )?;
        writeln!(
            out,
            "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"end\" font-size=\"11\">{value}</text>",
            LEFT - 6.0,
            y + 4.0
        )?;
    }

    let stride = rows.len().div_ceil(MAX_DATE_LABELS).max(1);
    for row in rows.iter().step_by(stride) {
        let x = x_of(row.date);
        let label_y = TOP + plot_h + 8.0;
        writeln!(
            out,
            "<line x1=\"{x:.1}\" y1=\"{TOP}\" x2=\"{x:.1}\" y2=\"{:.1}\" stroke=\"#ddd\"/>",
            TOP + plot_h
        )?;
        writeln!(
            out,
            "<text x=\"{x:.1}\" y=\"{label_y:.1}\" text-anchor=\"end\" font-size=\"11\" transform=\"rotate(-90 {x:.1} {label_y:.1})\">{}</text>",
            row.date.format("%Y-%m-%d")
        )?;
    }

    writeln!(
        out,
        "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\" font-size=\"13\">Date</text>",
        LEFT + plot_w / 2.0,
        HEIGHT - 10.0
    )?;
    writeln!(
        out,
        "<text x=\"20\" y=\"{:.1}\" text-anchor=\"middle\" font-size=\"13\" transform=\"rotate(-90 20 {:.1})\">Number of Samples</text>",
        TOP + plot_h / 2.0,
        TOP + plot_h / 2.0
    )?;

    let wgs = rows
        .iter()
        .map(|row| (x_of(row.date), y_of(row.wgs_samples)))
        .collect::<Vec<_>>();
    let mgx = rows
        .iter()
        .map(|row| (x_of(row.date), y_of(row.mgx_samples)))
        .collect::<Vec<_>>();
    svg_series(out, &wgs, WGS_COLOR)?;
    svg_series(out, &mgx, MGX_COLOR)?;

    let legend_x = LEFT + 12.0;
    let legend_y = TOP + 12.0;
    writeln!(
        out,
        "<rect x=\"{legend_x}\" y=\"{legend_y}\" width=\"130\" height=\"44\" fill=\"#fff\" stroke=\"#ccc\"/>"
    )?;
    for (i, (label, color)) in [("WGS Samples", WGS_COLOR), ("MGx Samples", MGX_COLOR)]
        .iter()
        .enumerate()
    {
        let y = legend_y + 14.0 + i as f64 * 18.0;
        writeln!(
            out,
            "<line x1=\"{:.1}\" y1=\"{y:.1}\" x2=\"{:.1}\" y2=\"{y:.1}\" stroke=\"{color}\" stroke-width=\"2\"/>",
            legend_x + 8.0,
            legend_x + 28.0
        )?;
        writeln!(
            out,
            "<circle cx=\"{:.1}\" cy=\"{y:.1}\" r=\"3\" fill=\"{color}\"/>",
            legend_x + 18.0
        )?;
        writeln!(
            out,
            "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"12\">{label}</text>",
            legend_x + 36.0,
            y + 4.0
        )?;
    }

    writeln!(out, "</svg>")
}

fn svg_series(out: &mut String, points: &[(f64, f64)], color: &str) -> std::fmt::Result {
    let path = points
        .iter()
        .map(|(x, y)| format!("{x:.1},{y:.1}"))
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(
        out,
        "<polyline points=\"{path}\" fill=\"none\" stroke=\"{color}\" stroke-width=\"2\"/>"
    )?;
    for (x, y) in points {
        writeln!(
            out,
            "<circle cx=\"{x:.1}\" cy=\"{y:.1}\" r=\"4\" fill=\"{color}\"/>"
        )?;
    }
    Ok(())
}

/// Rounds up to 1, 2 or 5 times a power of ten so axis ticks stay readable.
fn nice_ceiling(value: u64) -> u64 {
    if value == 0 {
        return 5;
    }
    let mut magnitude = 1u64;
    while magnitude.saturating_mul(10) <= value {
        magnitude = magnitude.saturating_mul(10);
    }
    for step in [1u64, 2, 5, 10] {
        let candidate = magnitude.saturating_mul(step);
        if candidate >= value {
            return candidate.max(5);
        }
    }
    magnitude.saturating_mul(10)
}

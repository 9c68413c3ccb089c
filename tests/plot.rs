use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use lrseq_db::domain::HistoryRow;
use lrseq_db::plot::{self, NO_DATA_TEXT, PNG_SIGNATURE};

fn row(run_id: u64, date: &str, wgs: u64, mgx: u64) -> HistoryRow {
    HistoryRow {
        run_id,
        date: date.parse().unwrap(),
        wgs_samples: wgs,
        mgx_samples: mgx,
    }
}

fn assert_png(path: &Utf8Path) {
    let bytes = fs::read(path.as_std_path()).unwrap();
    assert!(bytes.len() > PNG_SIGNATURE.len());
    assert_eq!(&bytes[..8], &PNG_SIGNATURE);
}

#[test]
fn missing_or_empty_csv_gives_placeholder_png() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let csv = root.join("sample_counts.csv");
    let output = root.join("assets").join("sample_plot.png");

    assert_eq!(plot::plot_csv(&csv, &output).unwrap(), 0);
    assert_png(&output);

    fs::write(csv.as_std_path(), "").unwrap();
    assert_eq!(plot::plot_csv(&csv, &output).unwrap(), 0);
    assert_png(&output);
}

#[test]
fn placeholder_markup_has_no_axes() {
    let svg = plot::render_svg(&[]).unwrap();
    assert!(svg.contains(NO_DATA_TEXT));
    assert!(!svg.contains("<polyline"));
    assert!(svg.trim_end().ends_with("</svg>"));
}

#[test]
fn chart_has_title_legend_and_dates() {
    let svg = plot::render_svg(&[
        row(2, "2024-06-02", 15, 3),
        row(1, "2024-06-01", 10, 2),
    ])
    .unwrap();

    assert!(svg.starts_with("<svg"));
    assert!(svg.contains("Number of Samples Over Time"));
    assert!(svg.contains("WGS Samples"));
    assert!(svg.contains("MGx Samples"));
    assert!(svg.contains("2024-06-01"));
    assert!(svg.contains("2024-06-02"));
    assert_eq!(svg.matches("<polyline").count(), 2);
    assert!(!svg.contains(NO_DATA_TEXT));
}

#[test]
fn single_day_history_still_plots() {
    let svg = plot::render_svg(&[row(1, "2024-06-01", 0, 4)]).unwrap();
    assert!(svg.contains("2024-06-01"));
    let png = plot::render_png(&[row(1, "2024-06-01", 0, 4)]).unwrap();
    assert_eq!(&png[..8], &PNG_SIGNATURE);
}

#[test]
fn plot_from_saved_history_overwrites_output() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let csv = root.join("sample_counts.csv");
    let output = root.join("sample_plot.png");
    fs::write(output.as_std_path(), "stale").unwrap();
    lrseq_db::history::save_history(&csv, &[row(7, "2024-07-01", 3, 1)]).unwrap();

    assert_eq!(plot::plot_csv(&csv, &output).unwrap(), 1);
    assert_png(&output);
}

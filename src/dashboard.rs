use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;
use std::str::FromStr;

use clap::ValueEnum;
use serde::Serialize;

use crate::domain::{Platform, SampleRecord};
use crate::error::LrseqError;

pub const NO_DATA_MESSAGE: &str = "No data to display.";
pub const ALL_PLATFORMS: &str = "All";
const TOP_ORGANISMS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    SampleId,
    ScientificName,
    InstrumentPlatform,
    StudyAccession,
    ReadCount,
    BaseCount,
    LibraryStrategy,
    Source,
}

impl Column {
    pub const ALL: [Column; 8] = [
        Column::SampleId,
        Column::ScientificName,
        Column::InstrumentPlatform,
        Column::ReadCount,
        Column::BaseCount,
        Column::StudyAccession,
        Column::LibraryStrategy,
        Column::Source,
    ];

    pub fn field(self) -> &'static str {
        match self {
            Column::SampleId => "sample_id",
            Column::ScientificName => "scientific_name",
            Column::InstrumentPlatform => "instrument_platform",
            Column::StudyAccession => "study_accession",
            Column::ReadCount => "read_count",
            Column::BaseCount => "base_count",
            Column::LibraryStrategy => "library_strategy",
            Column::Source => "source",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Column::SampleId => "Sample ID",
            Column::ScientificName => "Organism",
            Column::InstrumentPlatform => "Technology",
            Column::StudyAccession => "Study",
            Column::ReadCount => "Reads",
            Column::BaseCount => "Bases",
            Column::LibraryStrategy => "Strategy",
            Column::Source => "Source DB",
        }
    }

    pub fn value(self, record: &SampleRecord) -> String {
        match self {
            Column::SampleId => record.sample_id.clone(),
            Column::ScientificName => record.scientific_name.clone(),
            Column::InstrumentPlatform => record.instrument_platform.as_ena().to_string(),
            Column::StudyAccession => record.study_accession.clone(),
            Column::ReadCount => record.read_count.to_string(),
            Column::BaseCount => record.base_count.to_string(),
            Column::LibraryStrategy => record.library_strategy.clone(),
            Column::Source => record.source.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlatformFilter {
    #[default]
    All,
    Only(Platform),
}

impl PlatformFilter {
    pub fn matches(self, platform: Platform) -> bool {
        match self {
            PlatformFilter::All => true,
            PlatformFilter::Only(selected) => selected == platform,
        }
    }
}

impl fmt::Display for PlatformFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformFilter::All => write!(f, "{ALL_PLATFORMS}"),
            PlatformFilter::Only(platform) => write!(f, "{}", platform.label()),
        }
    }
}

impl FromStr for PlatformFilter {
    type Err = LrseqError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().eq_ignore_ascii_case(ALL_PLATFORMS) {
            return Ok(PlatformFilter::All);
        }
        Ok(PlatformFilter::Only(value.parse()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filters {
    /// Exact scientific names; empty means every organism.
    pub organisms: BTreeSet<String>,
    pub platform: PlatformFilter,
    /// Case-insensitive substring of the scientific name.
    pub search: Option<String>,
    pub columns: Vec<Column>,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            organisms: BTreeSet::new(),
            platform: PlatformFilter::All,
            search: None,
            columns: Column::ALL.to_vec(),
        }
    }
}

impl Filters {
    pub fn matches(&self, record: &SampleRecord) -> bool {
        if !self.organisms.is_empty() && !self.organisms.contains(&record.scientific_name) {
            return false;
        }
        if !self.platform.matches(record.instrument_platform) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => record
                .scientific_name
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BarSeries {
    pub title: String,
    pub bars: Vec<(String, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Charts {
    pub read_count: BarSeries,
    pub base_count: BarSeries,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub per_platform: Vec<(String, usize)>,
    pub top_organisms: Vec<(String, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableView {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewModel {
    #[serde(skip)]
    pub records: Vec<SampleRecord>,
    pub table: TableView,
    pub charts: Option<Charts>,
    pub summary: Summary,
    pub message: Option<String>,
}

impl ViewModel {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Derived view of `dataset` under `filters`. Row order follows the dataset.
pub fn compute_view(filters: &Filters, dataset: &[SampleRecord]) -> ViewModel {
    let records = dataset
        .iter()
        .filter(|record| filters.matches(record))
        .cloned()
        .collect::<Vec<_>>();

    let columns = if filters.columns.is_empty() {
        Column::ALL.to_vec()
    } else {
        filters.columns.clone()
    };
    let rows = records
        .iter()
        .map(|record| columns.iter().map(|column| column.value(record)).collect())
        .collect();

    let (charts, message) = if records.is_empty() {
        (None, Some(NO_DATA_MESSAGE.to_string()))
    } else {
        (Some(build_charts(&records)), None)
    };

    ViewModel {
        summary: summarize(&records),
        table: TableView { columns, rows },
        charts,
        message,
        records,
    }
}

fn build_charts(records: &[SampleRecord]) -> Charts {
    let mut reads = BTreeMap::<&'static str, u64>::new();
    let mut bases = BTreeMap::<&'static str, u64>::new();
    for record in records {
        let label = record.instrument_platform.label();
        *reads.entry(label).or_default() += record.read_count;
        *bases.entry(label).or_default() += record.base_count;
    }
    Charts {
        read_count: BarSeries {
            title: "Total Read Count by Platform".to_string(),
            bars: reads
                .into_iter()
                .map(|(label, value)| (label.to_string(), value))
                .collect(),
        },
        base_count: BarSeries {
            title: "Total Base Count by Platform".to_string(),
            bars: bases
                .into_iter()
                .map(|(label, value)| (label.to_string(), value))
                .collect(),
        },
    }
}

pub fn summarize(records: &[SampleRecord]) -> Summary {
    let mut per_platform = BTreeMap::<&'static str, usize>::new();
    per_platform.insert(Platform::OxfordNanopore.label(), 0);
    per_platform.insert(Platform::PacbioSmrt.label(), 0);
    let mut organisms = BTreeMap::<&str, usize>::new();
    for record in records {
        *per_platform
            .entry(record.instrument_platform.label())
            .or_default() += 1;
        *organisms.entry(record.scientific_name.as_str()).or_default() += 1;
    }

    let mut top = organisms.into_iter().collect::<Vec<_>>();
    top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    top.truncate(TOP_ORGANISMS);

    Summary {
        total: records.len(),
        per_platform: per_platform
            .into_iter()
            .map(|(label, count)| (label.to_string(), count))
            .collect(),
        top_organisms: top
            .into_iter()
            .map(|(name, count)| (name.to_string(), count))
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub organisms: Vec<String>,
    pub platforms: Vec<String>,
}

impl FilterOptions {
    pub fn from_dataset(dataset: &[SampleRecord]) -> Self {
        let organisms = dataset
            .iter()
            .map(|record| record.scientific_name.clone())
            .collect::<BTreeSet<_>>();
        let platforms = dataset
            .iter()
            .map(|record| record.instrument_platform.label().to_string())
            .collect::<BTreeSet<_>>();
        Self {
            organisms: organisms.into_iter().collect(),
            platforms: std::iter::once(ALL_PLATFORMS.to_string())
                .chain(platforms)
                .collect(),
        }
    }
}

pub fn export_tsv<W: Write>(view: &ViewModel, mut writer: W) -> Result<(), LrseqError> {
    let header = view
        .table
        .columns
        .iter()
        .map(|column| column.field())
        .collect::<Vec<_>>()
        .join("\t");
    writeln!(writer, "{header}").map_err(|err| LrseqError::Filesystem(err.to_string()))?;
    for row in &view.table.rows {
        let line = row
            .iter()
            .map(|value| value.replace(['\t', '\n'], " "))
            .collect::<Vec<_>>()
            .join("\t");
        writeln!(writer, "{line}").map_err(|err| LrseqError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

type Subscriber = Box<dyn FnMut(&ViewModel) + Send>;

/// Filter state over a fixed dataset. Every change recomputes the view and
/// notifies subscribers.
pub struct DashboardState {
    dataset: Vec<SampleRecord>,
    filters: Filters,
    view: ViewModel,
    options: FilterOptions,
    subscribers: Vec<Subscriber>,
}

impl DashboardState {
    pub fn new(dataset: Vec<SampleRecord>) -> Self {
        Self::with_filters(dataset, Filters::default())
    }

    pub fn with_filters(dataset: Vec<SampleRecord>, filters: Filters) -> Self {
        let view = compute_view(&filters, &dataset);
        let options = FilterOptions::from_dataset(&dataset);
        Self {
            dataset,
            filters,
            view,
            options,
            subscribers: Vec::new(),
        }
    }

    pub fn dataset(&self) -> &[SampleRecord] {
        &self.dataset
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn view(&self) -> &ViewModel {
        &self.view
    }

    pub fn options(&self) -> &FilterOptions {
        &self.options
    }

    pub fn subscribe<F>(&mut self, subscriber: F)
    where
        F: FnMut(&ViewModel) + Send + 'static,
    {
        self.subscribers.push(Box::new(subscriber));
    }

    pub fn set_organisms<I>(&mut self, organisms: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.filters.organisms = organisms.into_iter().collect();
        self.refresh();
    }

    pub fn toggle_organism(&mut self, organism: &str) {
        if !self.filters.organisms.remove(organism) {
            self.filters.organisms.insert(organism.to_string());
        }
        self.refresh();
    }

    pub fn set_platform(&mut self, platform: PlatformFilter) {
        self.filters.platform = platform;
        self.refresh();
    }

    /// Moves to the next platform offered by the dataset, wrapping to "All".
    pub fn cycle_platform(&mut self) {
        let current = self.filters.platform.to_string();
        let labels = &self.options.platforms;
        let position = labels.iter().position(|label| *label == current).unwrap_or(0);
        let next = &labels[(position + 1) % labels.len()];
        let platform = self
            .dataset
            .iter()
            .map(|record| record.instrument_platform)
            .find(|platform| platform.label() == next.as_str())
            .map(PlatformFilter::Only)
            .unwrap_or(PlatformFilter::All);
        self.set_platform(platform);
    }

    pub fn set_search(&mut self, search: Option<String>) {
        self.filters.search = search.filter(|value| !value.trim().is_empty());
        self.refresh();
    }

    pub fn set_columns(&mut self, columns: Vec<Column>) {
        self.filters.columns = columns;
        self.refresh();
    }

    fn refresh(&mut self) {
        self.view = compute_view(&self.filters, &self.dataset);
        for subscriber in &mut self.subscribers {
            subscriber(&self.view);
        }
    }
}

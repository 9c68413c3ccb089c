use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Bar, BarChart, BarGroup, Block, Borders, Cell, List, ListItem, ListState, Paragraph, Row,
    Table, Wrap,
};

use crate::dashboard::{self, BarSeries, DashboardState, Filters, PlatformFilter, ViewModel};
use crate::error::LrseqError;
use crate::fs_util;

const EVENTS_MAX: usize = 4;
const HINTS: &str =
    "Space toggle  Tab/p platform  / search  c clear  e export  PgUp/PgDn scroll  q quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Browse,
    Search,
}

pub struct Tui {
    state: DashboardState,
    data_path: Utf8PathBuf,
    export_path: Utf8PathBuf,
    input_mode: InputMode,
    input: String,
    organism_cursor: usize,
    table_scroll: usize,
    status: String,
    events: Arc<Mutex<VecDeque<String>>>,
}

impl Tui {
    pub fn new(mut state: DashboardState, data_path: &Utf8Path, export_path: &Utf8Path) -> Self {
        let events = Arc::new(Mutex::new(VecDeque::new()));
        let sink = events.clone();
        state.subscribe(move |view: &ViewModel| {
            if let Ok(mut events) = sink.lock() {
                push_event(
                    &mut events,
                    format!("view updated: {} rows", view.records.len()),
                );
            }
        });
        let input = state.filters().search.clone().unwrap_or_default();
        Self {
            state,
            data_path: data_path.to_path_buf(),
            export_path: export_path.to_path_buf(),
            input_mode: InputMode::Browse,
            input,
            organism_cursor: 0,
            table_scroll: 0,
            status: "ready".to_string(),
            events,
        }
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    pub fn run(&mut self) -> miette::Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        result
    }

    fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> miette::Result<()> {
        loop {
            terminal
                .draw(|frame| draw_ui(frame, self))
                .into_diagnostic()?;

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if self.handle_key(key) {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Applies one key press. Returns `true` when the dashboard should close.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        match self.input_mode {
            InputMode::Search => self.handle_search_key(key.code),
            InputMode::Browse => return self.handle_browse_key(key.code),
        }
        false
    }

    fn handle_search_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Enter | KeyCode::Esc => {
                self.input_mode = InputMode::Browse;
                self.status = match self.state.filters().search.as_deref() {
                    Some(search) => format!("search: {search}"),
                    None => "search cleared".to_string(),
                };
            }
            KeyCode::Backspace => {
                self.input.pop();
                self.apply_search();
            }
            KeyCode::Char(ch) => {
                self.input.push(ch);
                self.apply_search();
            }
            _ => {}
        }
    }

    fn handle_browse_key(&mut self, code: KeyCode) -> bool {
        let organisms = self.state.options().organisms.len();
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Up | KeyCode::Char('k') => {
                self.organism_cursor = self.organism_cursor.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.organism_cursor + 1 < organisms {
                    self.organism_cursor += 1;
                }
            }
            KeyCode::Char(' ') | KeyCode::Enter => {
                if let Some(name) = self.state.options().organisms.get(self.organism_cursor) {
                    let name = name.clone();
                    self.state.toggle_organism(&name);
                    self.table_scroll = 0;
                    self.status = format!("toggled {name}");
                }
            }
            KeyCode::Tab | KeyCode::Char('p') => {
                self.state.cycle_platform();
                self.table_scroll = 0;
                self.status = format!("platform: {}", self.state.filters().platform);
            }
            KeyCode::Char('/') => {
                self.input_mode = InputMode::Search;
            }
            KeyCode::Char('c') => {
                self.input.clear();
                self.state.set_organisms(Vec::new());
                self.state.set_platform(PlatformFilter::All);
                self.state.set_search(None);
                self.table_scroll = 0;
                self.status = "filters cleared".to_string();
            }
            KeyCode::Char('e') => {
                self.status = match self.export() {
                    Ok(rows) => format!("exported {rows} rows to {}", self.export_path),
                    Err(err) => format!("export failed: {err}"),
                };
            }
            KeyCode::PageUp => self.table_scroll = self.table_scroll.saturating_sub(10),
            KeyCode::PageDown => {
                let rows = self.state.view().table.rows.len();
                self.table_scroll = (self.table_scroll + 10).min(rows.saturating_sub(1));
            }
            _ => {}
        }
        false
    }

    fn apply_search(&mut self) {
        let search = self.input.trim();
        self.state
            .set_search((!search.is_empty()).then(|| search.to_string()));
        self.table_scroll = 0;
    }

    fn export(&self) -> Result<usize, LrseqError> {
        let view = self.state.view();
        let mut buffer = Vec::new();
        dashboard::export_tsv(view, &mut buffer)?;
        fs_util::write_replace(&self.export_path, &buffer)?;
        Ok(view.table.rows.len())
    }
}

fn draw_ui(frame: &mut ratatui::Frame, tui: &Tui) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(10),
            Constraint::Length(3),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(tui), chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(28), Constraint::Percentage(72)])
        .split(chunks[1]);

    draw_organisms(frame, tui, body[0]);

    let view = tui.state.view();
    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(10),
            Constraint::Length(5),
            Constraint::Min(4),
        ])
        .split(body[1]);

    draw_charts(frame, view, right[0]);
    frame.render_widget(draw_summary(view), right[1]);
    draw_table(frame, view, tui.table_scroll, right[2]);

    draw_command_line(frame, tui, chunks[2]);
}

fn draw_header(tui: &Tui) -> Paragraph<'static> {
    let filters: &Filters = tui.state.filters();
    let title = Line::from(vec![
        Span::styled(
            "LRSEQ-DB :: DASHBOARD",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Data: "),
        Span::styled(tui.data_path.to_string(), Style::default().fg(Color::Cyan)),
    ]);
    let filter_line = Line::from(vec![
        Span::styled("Platform: ", Style::default().fg(Color::Gray)),
        Span::raw(filters.platform.to_string()),
        Span::styled("   Organisms: ", Style::default().fg(Color::Gray)),
        Span::raw(if filters.organisms.is_empty() {
            "all".to_string()
        } else {
            filters.organisms.len().to_string()
        }),
        Span::styled("   Search: ", Style::default().fg(Color::Gray)),
        Span::raw(filters.search.clone().unwrap_or_else(|| "--".to_string())),
    ]);
    Paragraph::new(vec![title, filter_line])
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_organisms(frame: &mut ratatui::Frame, tui: &Tui, area: Rect) {
    let selected = &tui.state.filters().organisms;
    let items = tui
        .state
        .options()
        .organisms
        .iter()
        .map(|name| {
            let mark = if selected.contains(name) { "[x]" } else { "[ ]" };
            ListItem::new(format!("{mark} {name}"))
        })
        .collect::<Vec<_>>();
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("Organisms"))
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        );
    let mut list_state = ListState::default();
    if !tui.state.options().organisms.is_empty() {
        list_state.select(Some(tui.organism_cursor));
    }
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn draw_charts(frame: &mut ratatui::Frame, view: &ViewModel, area: Rect) {
    let Some(charts) = &view.charts else {
        let message = view
            .message
            .clone()
            .unwrap_or_else(|| dashboard::NO_DATA_MESSAGE.to_string());
        let empty = Paragraph::new(message)
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::Yellow))
            .block(Block::default().borders(Borders::ALL).title("Charts"));
        frame.render_widget(empty, area);
        return;
    };

    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);
    frame.render_widget(bar_chart(&charts.read_count, Color::Cyan), halves[0]);
    frame.render_widget(bar_chart(&charts.base_count, Color::Magenta), halves[1]);
}

fn bar_chart(series: &BarSeries, color: Color) -> BarChart<'static> {
    let bars = series
        .bars
        .iter()
        .map(|(label, value)| {
            Bar::default()
                .value(*value)
                .label(Line::from(label.clone()))
                .text_value(compact_number(*value))
        })
        .collect::<Vec<_>>();
    BarChart::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(series.title.clone()),
        )
        .data(BarGroup::default().bars(&bars))
        .bar_width(14)
        .bar_gap(2)
        .bar_style(Style::default().fg(color))
        .value_style(Style::default().fg(Color::Black).bg(color))
}

fn draw_summary(view: &ViewModel) -> Paragraph<'static> {
    let summary = &view.summary;
    let platforms = summary
        .per_platform
        .iter()
        .map(|(label, count)| format!("{label}: {count}"))
        .collect::<Vec<_>>()
        .join("   ");
    let top = summary
        .top_organisms
        .iter()
        .map(|(name, count)| format!("{name} ({count})"))
        .collect::<Vec<_>>()
        .join(", ");
    let lines = vec![
        Line::from(vec![
            Span::styled("Total samples: ", Style::default().fg(Color::Gray)),
            Span::styled(
                summary.total.to_string(),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::styled("By platform: ", Style::default().fg(Color::Gray)),
            Span::raw(platforms),
        ]),
        Line::from(vec![
            Span::styled("Top organisms: ", Style::default().fg(Color::Gray)),
            Span::raw(if top.is_empty() { "--".to_string() } else { top }),
        ]),
    ];
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Summary"))
        .wrap(Wrap { trim: true })
}

fn draw_table(frame: &mut ratatui::Frame, view: &ViewModel, scroll: usize, area: Rect) {
    let columns = &view.table.columns;
    let header = Row::new(
        columns
            .iter()
            .map(|column| Cell::from(column.title()).style(Style::default().fg(Color::Yellow))),
    )
    .style(Style::default().add_modifier(Modifier::BOLD));
    let visible = area.height.saturating_sub(3) as usize;
    let rows = view
        .table
        .rows
        .iter()
        .skip(scroll)
        .take(visible)
        .map(|row| Row::new(row.clone()));
    let widths = columns
        .iter()
        .map(|_| Constraint::Percentage((100 / columns.len().max(1)) as u16))
        .collect::<Vec<_>>();
    let title = format!(
        "Samples ({} of {})",
        (scroll + visible).min(view.table.rows.len()),
        view.table.rows.len()
    );
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title));
    frame.render_widget(table, area);
}

fn draw_command_line(frame: &mut ratatui::Frame, tui: &Tui, area: Rect) {
    let first = match tui.input_mode {
        InputMode::Search => Line::from(vec![
            Span::styled(
                "/ ",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(tui.input.clone(), Style::default().fg(Color::White)),
        ]),
        InputMode::Browse => Line::from(Span::styled(HINTS, Style::default().fg(Color::DarkGray))),
    };
    let last_event = tui
        .events
        .lock()
        .ok()
        .and_then(|events| events.back().cloned())
        .unwrap_or_default();
    let second = Line::from(vec![
        Span::styled("= ", Style::default().fg(Color::DarkGray)),
        Span::styled(tui.status.clone(), Style::default().fg(Color::Gray)),
        Span::raw("   "),
        Span::styled(last_event, Style::default().fg(Color::DarkGray)),
    ]);
    let para = Paragraph::new(vec![first, second]).block(Block::default().borders(Borders::TOP));
    frame.render_widget(para, area);

    if tui.input_mode == InputMode::Search {
        let cursor_x = area
            .x
            .saturating_add(2 + tui.input.chars().count() as u16)
            .min(area.x.saturating_add(area.width.saturating_sub(1)));
        frame.set_cursor_position((cursor_x, area.y.saturating_add(1)));
    }
}

fn push_event(buffer: &mut VecDeque<String>, item: String) {
    buffer.push_back(item);
    while buffer.len() > EVENTS_MAX {
        buffer.pop_front();
    }
}

fn compact_number(value: u64) -> String {
    const K: f64 = 1_000.0;
    const M: f64 = K * 1_000.0;
    const G: f64 = M * 1_000.0;
    const T: f64 = G * 1_000.0;
    let v = value as f64;
    if v >= T {
        format!("{:.1}T", v / T)
    } else if v >= G {
        format!("{:.1}G", v / G)
    } else if v >= M {
        format!("{:.1}M", v / M)
    } else if v >= K {
        format!("{:.1}K", v / K)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Platform, SampleRecord};
    use crossterm::event::KeyModifiers;

    fn record(id: &str, name: &str, platform: Platform) -> SampleRecord {
        SampleRecord {
            sample_id: id.to_string(),
            scientific_name: name.to_string(),
            instrument_platform: platform,
            study_accession: "PRJ1".to_string(),
            read_count: 10,
            base_count: 1000,
            library_strategy: "WGS".to_string(),
            source: "ENA".to_string(),
        }
    }

    fn press(tui: &mut Tui, code: KeyCode) -> bool {
        tui.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn tui() -> Tui {
        let state = DashboardState::new(vec![
            record("S1", "Bacillus subtilis", Platform::PacbioSmrt),
            record("S2", "Escherichia coli", Platform::OxfordNanopore),
            record("S3", "Escherichia coli", Platform::PacbioSmrt),
        ]);
        Tui::new(
            state,
            Utf8Path::new("data.json"),
            Utf8Path::new("export.tsv"),
        )
    }

    #[test]
    fn space_toggles_highlighted_organism() {
        let mut tui = tui();
        press(&mut tui, KeyCode::Down);
        press(&mut tui, KeyCode::Char(' '));
        assert_eq!(tui.state().view().records.len(), 2);
        press(&mut tui, KeyCode::Char(' '));
        assert_eq!(tui.state().view().records.len(), 3);
    }

    #[test]
    fn search_mode_filters_while_typing() {
        let mut tui = tui();
        press(&mut tui, KeyCode::Char('/'));
        for ch in "BACI".chars() {
            press(&mut tui, KeyCode::Char(ch));
        }
        // 'q' typed in search mode is text, not quit
        assert!(!press(&mut tui, KeyCode::Char('q')));
        press(&mut tui, KeyCode::Backspace);
        press(&mut tui, KeyCode::Enter);
        assert_eq!(tui.state().view().records.len(), 1);
        assert!(press(&mut tui, KeyCode::Char('q')));
    }

    #[test]
    fn tab_cycles_platforms() {
        let mut tui = tui();
        press(&mut tui, KeyCode::Tab);
        assert_eq!(
            tui.state().filters().platform,
            PlatformFilter::Only(Platform::OxfordNanopore)
        );
        press(&mut tui, KeyCode::Tab);
        press(&mut tui, KeyCode::Tab);
        assert_eq!(tui.state().filters().platform, PlatformFilter::All);
    }
}

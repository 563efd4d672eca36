use crate::{input::InputState, theme::Theme};
use oracle_monitor::{
    ConnectionState, DashboardFrame, WeightCategory,
    chart::ChartWindow,
    reducer::{ModeLabel, PriceCell, Tier},
    sync::SyncStatus,
};
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        Axis, Block, BorderType, Borders, Cell, Chart, Dataset, GraphType, Paragraph, Row, Table,
    },
};

const UNAVAILABLE: &str = "n/a";

pub fn draw(f: &mut Frame, frame: &DashboardFrame, input: &InputState) {
    let theme = Theme::for_mode(frame.dark_mode);
    f.render_widget(Block::default().style(theme.base()), f.area());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.area());

    render_status_bar(f, chunks[0], frame, &theme);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(chunks[1]);

    let table_height = frame.view.sources.len() as u16 + 4;
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(table_height),
            Constraint::Length(5),
            Constraint::Length(7),
            Constraint::Min(0),
        ])
        .split(body[0]);

    render_sources(f, left[0], frame, input, &theme);
    render_comparison(f, left[1], frame, &theme);
    render_rate(f, left[2], frame, &theme);
    render_overrides(f, left[3], frame, input, &theme);
    render_chart(f, body[1], &frame.chart, &theme);
    render_help(f, chunks[2], input, &theme);
}

fn panel<'a>(title: &'a str, theme: &Theme) -> Block<'a> {
    Block::default()
        .title(Span::styled(title, theme.title_style()))
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(theme.border))
}

fn render_status_bar(f: &mut Frame, area: Rect, frame: &DashboardFrame, theme: &Theme) {
    let (symbol, color) = match frame.connection {
        ConnectionState::Connected => ("●", theme.positive),
        ConnectionState::PollingFallback => ("◐", theme.pinned),
        ConnectionState::Connecting | ConnectionState::Reconnecting { .. } => ("○", theme.negative),
    };
    let connection = Span::styled(
        format!(" {symbol} {} ", frame.connection.to_string().to_uppercase()),
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    );

    let price = Span::styled(
        format!(
            " {} KRW ",
            frame
                .view
                .aggregate_price
                .map(|price| format_number(price, 0))
                .unwrap_or_else(|| UNAVAILABLE.to_string())
        ),
        theme.title_style(),
    );

    let mode = Span::styled(
        format!(
            " {} · {} ",
            mode_label(frame.view.calculation_mode),
            frame.view.aggregation_method
        ),
        Style::default().fg(theme.neutral),
    );

    let time = Span::styled(
        frame
            .view
            .timestamp
            .map(|ts| format!(" ⏱  {} ", ts.format("%H:%M:%S")))
            .unwrap_or_default(),
        Style::default().fg(theme.muted),
    );

    let (sync_text, sync_color) = sync_label(frame.sync, theme);
    let sync = Span::styled(format!(" {sync_text} "), Style::default().fg(sync_color));

    let line = Line::from(vec![connection, price, mode, time, sync]);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Double)
        .border_style(Style::default().fg(theme.border))
        .title(Span::styled(" ◆ ORACLE MONITOR ◆ ", theme.title_style()));

    f.render_widget(
        Paragraph::new(line).block(block).alignment(Alignment::Center),
        area,
    );
}

fn render_sources(f: &mut Frame, area: Rect, frame: &DashboardFrame, input: &InputState, theme: &Theme) {
    let category = input.category;
    let header = Row::new(vec![
        Cell::from("Source"),
        Cell::from("Price"),
        Cell::from("Spread"),
        Cell::from("Volume"),
        Cell::from("Depth"),
        Cell::from(format!("W:{category}")),
        Cell::from("Share"),
        Cell::from("Eff."),
    ])
    .style(Style::default().fg(theme.muted).add_modifier(Modifier::BOLD));

    let rows = frame
        .view
        .sources
        .values()
        .enumerate()
        .map(|(index, view)| {
            let price = match view.price {
                PriceCell::Live(price) => Cell::from(format_number(price, 0)),
                PriceCell::Pinned(price) => Cell::from(format!("{} *", format_number(price, 0)))
                    .style(Style::default().fg(theme.pinned)),
                PriceCell::Unavailable => {
                    Cell::from(UNAVAILABLE).style(Style::default().fg(theme.muted))
                }
            };

            let row = Row::new(vec![
                Cell::from(view.source.to_string()),
                price,
                Cell::from(format_optional(view.spread, 4)),
                Cell::from(format_optional(view.volume, 2)),
                Cell::from(format_optional(view.depth, 2)),
                Cell::from(format_optional(view.weights.get(&category).copied(), 2)),
                Cell::from(format_percent(view.shares.get(&category).copied())),
                Cell::from(format_percent(view.effective_share)),
            ]);

            if index == input.selected {
                row.style(Style::default().bg(theme.highlight).add_modifier(Modifier::BOLD))
            } else {
                row
            }
        });

    let widths = [
        Constraint::Length(10),
        Constraint::Length(14),
        Constraint::Length(8),
        Constraint::Length(10),
        Constraint::Length(8),
        Constraint::Length(10),
        Constraint::Length(7),
        Constraint::Length(7),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .block(panel(" SOURCES ", theme));
    f.render_widget(table, area);
}

fn render_comparison(f: &mut Frame, area: Rect, frame: &DashboardFrame, theme: &Theme) {
    let label = Span::styled(
        format!("  [{}]", mode_label(frame.view.reference_label)),
        Style::default().fg(match frame.view.reference_label {
            ModeLabel::ManuallyOverridden => theme.pinned,
            _ => theme.neutral,
        }),
    );

    let lines = match &frame.view.comparison {
        Some(comparison) => {
            let color = match comparison.tier {
                Tier::Positive => theme.positive,
                Tier::Negative => theme.negative,
                Tier::Neutral => theme.neutral,
            };
            let sign = if comparison.diff > 0.0 { "+" } else { "" };
            let pinned = if comparison.reference_pinned { " *" } else { "" };
            vec![
                Line::from(vec![
                    Span::styled("Reference: ", Style::default().fg(theme.muted)),
                    Span::raw(format!("{}{pinned}", format_number(comparison.reference_price, 0))),
                    label,
                ]),
                Line::from(vec![
                    Span::styled("Oracle - reference: ", Style::default().fg(theme.muted)),
                    Span::styled(
                        format!(
                            "{sign}{} ({sign}{:.2}%)",
                            format_number(comparison.diff, 0),
                            comparison.percent
                        ),
                        Style::default().fg(color).add_modifier(Modifier::BOLD),
                    ),
                ]),
            ]
        }
        None => vec![
            Line::from(vec![
                Span::styled("Reference: ", Style::default().fg(theme.muted)),
                Span::styled(UNAVAILABLE, Style::default().fg(theme.muted)),
                label,
            ]),
        ],
    };

    f.render_widget(
        Paragraph::new(lines).block(panel(" COMPARISON ", theme)),
        area,
    );
}

fn render_rate(f: &mut Frame, area: Rect, frame: &DashboardFrame, theme: &Theme) {
    let rate = &frame.view.rate;
    let label = |text: &'static str| Span::styled(text, Style::default().fg(theme.muted));

    let mut flags = Vec::new();
    if rate.inverse_mode {
        flags.push(Span::styled("INVERSE ", Style::default().fg(theme.neutral)));
    }
    if rate.volatile {
        flags.push(Span::styled("VOLATILE ", Style::default().fg(theme.negative)));
    }
    if rate.overridden {
        flags.push(Span::styled("MANUAL ", Style::default().fg(theme.pinned)));
    }

    let lines = vec![
        Line::from(vec![label("Used:     "), Span::raw(format_optional(rate.used, 2))]),
        Line::from(vec![label("Original: "), Span::raw(format_optional(rate.original, 2))]),
        Line::from(vec![label("Inverse:  "), Span::raw(format_optional(rate.inverse, 2))]),
        Line::from(vec![label("TWAP:     "), Span::raw(format_optional(rate.twap, 2))]),
        Line::from(flags),
    ];

    f.render_widget(Paragraph::new(lines).block(panel(" USDT/KRW ", theme)), area);
}

fn render_overrides(
    f: &mut Frame,
    area: Rect,
    frame: &DashboardFrame,
    input: &InputState,
    theme: &Theme,
) {
    let lines = frame
        .view
        .overrides
        .iter()
        .map(|slot| {
            let editing = input
                .editing
                .as_ref()
                .filter(|(source, _)| source == &slot.source);

            let value = match (editing, slot.committed) {
                (Some((_, text)), _) => Span::styled(
                    format!("{text}▏"),
                    Style::default().fg(theme.title).add_modifier(Modifier::BOLD),
                ),
                (None, Some(price)) => Span::styled(
                    format_number(price, 2),
                    Style::default().fg(theme.pinned),
                ),
                (None, None) => Span::styled("auto", Style::default().fg(theme.muted)),
            };

            Line::from(vec![
                Span::styled(format!("{:<10}", slot.source), Style::default().fg(theme.muted)),
                value,
            ])
        })
        .collect::<Vec<_>>();

    f.render_widget(
        Paragraph::new(lines).block(panel(" MANUAL OVERRIDES ", theme)),
        area,
    );
}

/// Split a series at its gaps so each run of samples is drawn as its own line.
pub fn segment_series(values: &[Option<f64>]) -> Vec<Vec<(f64, f64)>> {
    let mut segments = Vec::new();
    let mut current = Vec::new();

    for (index, value) in values.iter().enumerate() {
        match value {
            Some(value) => current.push((index as f64, *value)),
            None if !current.is_empty() => segments.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

fn render_chart(f: &mut Frame, area: Rect, chart: &ChartWindow, theme: &Theme) {
    let block = panel(" PRICE HISTORY ", theme);
    let Some(range) = chart.range() else {
        f.render_widget(
            Paragraph::new(Span::styled("waiting for history…", Style::default().fg(theme.muted)))
                .block(block),
            area,
        );
        return;
    };

    let segments = chart
        .series()
        .iter()
        .map(|(name, values)| (name.as_str(), segment_series(values)))
        .collect::<Vec<_>>();

    let datasets = segments
        .iter()
        .enumerate()
        .flat_map(|(index, (name, runs))| {
            let style = Style::default().fg(theme.series_color(index));
            runs.iter().enumerate().map(move |(run, points)| {
                let dataset = Dataset::default()
                    .marker(symbols::Marker::Braille)
                    .graph_type(GraphType::Line)
                    .style(style)
                    .data(points);
                // One legend entry per series
                if run == 0 { dataset.name(*name) } else { dataset }
            })
        })
        .collect::<Vec<_>>();

    let x_max = chart.len().saturating_sub(1).max(1) as f64;
    let time_label = |index: usize| {
        chart
            .timestamps()
            .get(index)
            .copied()
            .flatten()
            .map(|ts| ts.format("%H:%M:%S").to_string())
            .unwrap_or_default()
    };

    let x_axis = Axis::default()
        .style(Style::default().fg(theme.muted))
        .bounds([0.0, x_max])
        .labels([time_label(0), time_label(chart.len().saturating_sub(1))]);
    let y_axis = Axis::default()
        .style(Style::default().fg(theme.muted))
        .bounds([range.min, range.max])
        .labels([format_number(range.min, 0), format_number(range.max, 0)]);

    f.render_widget(
        Chart::new(datasets).block(block).x_axis(x_axis).y_axis(y_axis),
        area,
    );
}

fn render_help(f: &mut Frame, area: Rect, input: &InputState, theme: &Theme) {
    let text = if input.editing.is_some() {
        " [0-9 . ,] type  [Enter] commit  [Esc] cancel  [Backspace] delete ".to_string()
    } else {
        let categories = WeightCategory::ALL
            .iter()
            .enumerate()
            .map(|(index, category)| format!("{}={category}", index + 1))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            " [Q] quit  [R] refresh  [M] method  [T] theme  [Tab] source  [←/→] weight  \
             [{categories}]  [O/U] override  [X/⇧X] clear "
        )
    };

    f.render_widget(
        Paragraph::new(Span::styled(text, Style::default().fg(theme.muted)))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(theme.border)),
            )
            .alignment(Alignment::Center),
        area,
    );
}

fn mode_label(label: ModeLabel) -> &'static str {
    match label {
        ModeLabel::Normal => "normal",
        ModeLabel::Inverse => "inverse",
        ModeLabel::NoData => "no data",
        ModeLabel::Unknown => "unknown",
        ModeLabel::ManuallyOverridden => "manually overridden",
    }
}

fn sync_label(status: SyncStatus, theme: &Theme) -> (String, Color) {
    match status {
        SyncStatus::Idle => ("params: local".to_string(), theme.muted),
        SyncStatus::Pending => ("params: syncing…".to_string(), theme.neutral),
        SyncStatus::Synced => ("params: synced".to_string(), theme.positive),
        SyncStatus::Failed { attempt } => (format!("params: retry #{attempt}"), theme.negative),
    }
}

/// Thousands-separated number with `decimals` fraction digits.
pub fn format_number(value: f64, decimals: usize) -> String {
    if !value.is_finite() {
        return UNAVAILABLE.to_string();
    }

    let formatted = format!("{:.*}", decimals, value.abs());
    let (integer, fraction) = match formatted.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3 + 2);
    if value < 0.0 && formatted.bytes().any(|b| b != b'0' && b != b'.') {
        grouped.push('-');
    }
    for (index, digit) in integer.chars().enumerate() {
        if index > 0 && (integer.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if let Some(fraction) = fraction {
        grouped.push('.');
        grouped.push_str(fraction);
    }
    grouped
}

fn format_optional(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|value| format_number(value, decimals))
        .unwrap_or_else(|| UNAVAILABLE.to_string())
}

fn format_percent(share: Option<f64>) -> String {
    share
        .filter(|share| share.is_finite())
        .map(|share| format!("{:.1}%", share * 100.0))
        .unwrap_or_else(|| UNAVAILABLE.to_string())
}

mod app;

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
    Frame, Terminal,
};
use app::{format_ms, format_opt, rate_value, truncate, AppState, ConnectionStatus, Report, StatsSummary};

const DEFAULT_THEME: &str = "萨卡兹的无终奇语";

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let theme = std::env::var("THEME").unwrap_or_else(|_| DEFAULT_THEME.to_string());

    // A full analysis pass can outlast a poll, so allow more than the API's own fetch timeout.
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(io::Error::other)?;

    let mut app = AppState::new(base_url, theme);

    // Initial fetch before rendering
    app.refresh(&client).await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut app, &client).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &reqwest::Client,
) -> io::Result<()> {
    let poll_interval = Duration::from_secs(5);
    let mut last_tick = std::time::Instant::now();

    loop {
        terminal.draw(|f| render(f, app))?;

        let timeout = poll_interval
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            app.refreshing = true;
                            terminal.draw(|f| render(f, app))?;
                            app.request_analysis(client).await;
                            last_tick = std::time::Instant::now();
                        }
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= poll_interval {
            app.refresh(client).await;
            last_tick = std::time::Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState) {
    let area = f.area();

    // Outer vertical split: header | stats | runs | footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // header
            Constraint::Length(9), // stats
            Constraint::Min(0),    // runs
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    match &app.report {
        Some(report) => {
            render_stats(f, report, chunks[1]);
            render_runs_table(f, report, chunks[2]);
        }
        None => render_placeholder(f, app, chunks[1].union(chunks[2])),
    }
    render_footer(f, app, chunks[3]);
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_text, status_color) = match &app.status {
        ConnectionStatus::Connected if app.refreshing => ("◌ analyzing".to_string(), Color::Yellow),
        ConnectionStatus::Connected => ("● connected".to_string(), Color::Green),
        ConnectionStatus::Connecting => ("◌ connecting".to_string(), Color::Yellow),
        ConnectionStatus::Error(e) => (format!("✗ {}", truncate(e, 40)), Color::Red),
    };

    let white = Style::default().fg(Color::White);
    let mut title_spans = vec![
        Span::styled(
            " Rogue Analyzer  ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw("  │  "),
        Span::styled(app.theme.clone(), white),
    ];

    let mut detail_spans = Vec::new();
    if let Some(report) = &app.report {
        let player = &report.player_info;
        title_spans.push(Span::raw("  │  "));
        title_spans.push(Span::styled(
            format!(
                "{} Lv.{}",
                player.name.as_deref().unwrap_or("—"),
                format_opt(player.level)
            ),
            white,
        ));

        let career = &report.career_summary;
        detail_spans.push(Span::styled(
            format!(
                " invest {}  │  nodes {}  │  steps {}",
                format_opt(career.invest),
                format_opt(career.node),
                format_opt(career.step)
            ),
            Style::default().fg(Color::DarkGray),
        ));
    }

    let paragraph = Paragraph::new(vec![Line::from(title_spans), Line::from(detail_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );

    f.render_widget(paragraph, area);
}

fn render_stats(f: &mut Frame, report: &Report, area: Rect) {
    // Horizontal split: all time | last 7 days | squads
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(35),
            Constraint::Percentage(35),
            Constraint::Percentage(30),
        ])
        .split(area);

    let stats = &report.stats;
    render_stats_block(
        f,
        &format!(" ALL TIME ({} runs) ", stats.total_runs),
        &stats.total_stats,
        columns[0],
    );
    render_stats_block(
        f,
        &format!(" LAST 7 DAYS ({} runs) ", stats.seven_day_runs),
        &stats.seven_day_stats,
        columns[1],
    );

    let squads: Vec<Line> = stats
        .squad_frequency
        .iter()
        .take(usize::from(columns[2].height.saturating_sub(2)))
        .map(|s| {
            Line::from(vec![
                Span::styled(format!("{:>4} ", s.count), Style::default().fg(Color::Cyan)),
                Span::raw(truncate(&s.squad, 24)),
            ])
        })
        .collect();
    f.render_widget(Paragraph::new(squads).block(titled(" SQUADS ")), columns[2]);
}

fn render_stats_block(f: &mut Frame, title: &str, s: &StatsSummary, area: Rect) {
    let label = Style::default().fg(Color::DarkGray);
    let lines = vec![
        Line::from(vec![
            Span::styled(" win rate       ", label),
            Span::styled(s.win_rate.clone(), Style::default().fg(rate_color(&s.win_rate))),
        ]),
        Line::from(vec![
            Span::styled(" streak         ", label),
            Span::raw(format!("{} (best {})", s.current_streak, s.max_streak)),
        ]),
        Line::from(vec![
            Span::styled(" notable rate   ", label),
            Span::styled(
                s.notable_rate.clone(),
                Style::default().fg(rate_color(&s.notable_rate)),
            ),
        ]),
        Line::from(vec![
            Span::styled(" notable streak ", label),
            Span::raw(format!(
                "{} (best {})",
                s.current_notable_streak, s.max_notable_streak
            )),
        ]),
    ];
    f.render_widget(Paragraph::new(lines).block(titled(title)), area);
}

fn render_runs_table(f: &mut Frame, report: &Report, area: Rect) {
    let header_cells = ["Date", "Grade", "Squad", "Score", "Ending", "Time", "Totems"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    let rows: Vec<Row> = report
        .theme_summary
        .detailed_recent_runs
        .iter()
        .map(|r| {
            let ending_color = match (r.is_success, r.is_rolling) {
                (true, true) => Color::LightMagenta,
                (true, false) => Color::Green,
                (false, true) => Color::Magenta,
                (false, false) => Color::Red,
            };

            Row::new(vec![
                Cell::from(r.start_date.clone()).style(Style::default().fg(Color::DarkGray)),
                Cell::from(r.difficulty.clone()),
                Cell::from(truncate(&r.squad, 12)),
                Cell::from(r.score.to_string()).style(Style::default().fg(Color::Cyan)),
                Cell::from(truncate(&r.ending, 28)).style(Style::default().fg(ending_color)),
                Cell::from(r.duration_hours.clone()),
                Cell::from(r.totem_count.to_string()),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(6),
            Constraint::Length(5),
            Constraint::Length(12),
            Constraint::Length(6),
            Constraint::Min(10),
            Constraint::Length(6),
            Constraint::Length(6),
        ],
    )
    .header(header)
    .block(titled(" RECENT RUNS "));

    f.render_widget(table, area);
}

fn render_placeholder(f: &mut Frame, app: &AppState, area: Rect) {
    let text = match (&app.report_error, &app.status) {
        (Some(msg), _) => msg.clone(),
        (None, ConnectionStatus::Error(_)) => "analyzer unreachable".to_string(),
        (None, _) => "waiting for the first report…".to_string(),
    };
    let paragraph = Paragraph::new(Line::from(Span::styled(
        format!(" {text}"),
        Style::default().fg(Color::DarkGray),
    )))
    .block(titled(" REPORT "));
    f.render_widget(paragraph, area);
}

fn render_footer(f: &mut Frame, app: &AppState, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("re-analyze  "),
        Span::styled(
            format!(
                "{} passes  p50 {}  p95 {}  p99 {}  │  poll: 5s",
                app.latency.samples,
                format_ms(app.latency.p50_ms),
                format_ms(app.latency.p95_ms),
                format_ms(app.latency.p99_ms)
            ),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    let paragraph = Paragraph::new(line).style(Style::default().fg(Color::White));
    f.render_widget(paragraph, area);
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn titled(title: &str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(Span::styled(
            title.to_string(),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
}

fn rate_color(rate: &str) -> Color {
    match rate_value(rate) {
        Some(v) if v >= 50.0 => Color::Green,
        Some(v) if v >= 25.0 => Color::Yellow,
        Some(_) => Color::Red,
        None => Color::DarkGray,
    }
}

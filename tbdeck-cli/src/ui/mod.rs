mod theme;

pub use theme::{Tone, styles};

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};

use tbdeck_core::model::format_reload_time;
use tbdeck_core::panel::title;

use crate::tui::App;

/// Shorten `s` to fit a bordered block of `width` columns
pub fn fit_title(s: &str, width: u16) -> String {
    let max = width.saturating_sub(4) as usize;
    if max == 0 {
        return "".into();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max {
        return s.to_string();
    }
    if max <= 1 {
        return "…".into();
    }
    let mut out: String = chars.into_iter().take(max - 1).collect();
    out.push('…');
    out
}

fn hint<'a>(key: &'a str, label: &'a str) -> Vec<Span<'a>> {
    vec![
        Span::styled(key, styles::key_hint()),
        Span::styled(format!(" {}  ", label), styles::text_dim()),
    ]
}

pub fn draw(f: &mut Frame, app: &App) {
    let area = f.area();
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(area);

    // ---------------- Top bar ----------------
    let ready = if app.manager.is_ready() {
        Span::styled("● connected", styles::tone(Tone::Success))
    } else {
        Span::styled("◌ waiting for first poll", styles::tone(Tone::Warn))
    };
    let mut top = vec![
        Span::styled(" tbdeck ", styles::title()),
        Span::styled(app.server.as_str(), styles::text()),
        Span::raw("  "),
        Span::styled(format!("{} running", app.panel.rows().len()), styles::text_dim()),
        Span::raw("  "),
        ready,
    ];
    if !app.focused {
        top.push(Span::styled("  (paused)", styles::text_muted()));
    }
    if app.in_flight > 0 {
        top.push(Span::styled(
            format!("  ⟲ {} pending", app.in_flight),
            styles::tone(Tone::Info),
        ));
    }
    f.render_widget(Paragraph::new(Line::from(top)), outer[0]);

    // ---------------- Body: list + detail ----------------
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(outer[1]);

    let items: Vec<ListItem> = if app.panel.is_empty() {
        vec![ListItem::new(Line::from(Span::styled(
            "No running instances. Press s to start one.",
            styles::text_muted(),
        )))]
    } else {
        app.panel
            .rows()
            .iter()
            .map(|m| {
                ListItem::new(Line::from(vec![
                    Span::styled(
                        format!("{} ", styles::reload_icon(m.reload_time)),
                        styles::reload(m.reload_time),
                    ),
                    Span::styled(m.label(), styles::text()),
                    Span::styled(format!("  {}", m.logdir), styles::text_dim()),
                ]))
            })
            .collect()
    };
    let list_title = fit_title("Running", body[0].width);
    let list = List::new(items)
        .block(
            Block::default()
                .title(list_title)
                .borders(Borders::ALL)
                .border_style(styles::border(app.focused)),
        )
        .highlight_style(styles::selection())
        .highlight_symbol("▶ ");
    let mut list_state = ListState::default();
    list_state.select(app.panel.selected_index());
    f.render_stateful_widget(list, body[0], &mut list_state);

    let mut detail: Vec<Line> = Vec::new();
    if let Some(model) = app.panel.selected_model() {
        detail.push(Line::from(Span::styled(model.label(), styles::title())));
        for line in title(model).lines() {
            detail.push(Line::from(Span::styled(line.to_string(), styles::text())));
        }
        if let Some(url) = app.manager.instance_url(&model.name) {
            detail.push(Line::from(vec![
                Span::styled("URL: ", styles::text_dim()),
                Span::styled(url, styles::tone(Tone::Info)),
            ]));
        }
    }
    if let Some((model, url)) = &app.opened {
        detail.push(Line::from(""));
        detail.push(Line::from(Span::styled("Opened", styles::title())));
        detail.push(Line::from(format!(
            "{} (reloaded {})",
            model.label(),
            format_reload_time(model.reload_time)
        )));
        detail.push(Line::from(Span::styled(
            url.clone().unwrap_or_else(|| "no URL for this backend".into()),
            styles::tone(Tone::Info),
        )));
    }
    let detail_title = fit_title("Details", body[1].width);
    f.render_widget(
        Paragraph::new(Text::from(detail))
            .wrap(Wrap { trim: false })
            .block(
                Block::default()
                    .title(detail_title)
                    .borders(Borders::ALL)
                    .border_style(styles::border(false)),
            ),
        body[1],
    );

    // ---------------- Footer: prompt, confirmation, status or hints ----------------
    let footer = if let Some(input) = &app.input {
        Line::from(vec![
            Span::styled("logdir: ", styles::key_hint()),
            Span::styled(format!("{}▏", input), styles::text()),
            Span::styled("  enter start  esc cancel", styles::text_muted()),
        ])
    } else if app.panel.awaiting_confirmation() {
        Line::from(Span::styled(
            format!(
                "Shut down all {} instance(s)? y to confirm, any other key to cancel",
                app.panel.rows().len()
            ),
            styles::tone(Tone::Warn),
        ))
    } else {
        let mut spans: Vec<Span> = Vec::new();
        if let Some((tone, message)) = &app.status {
            spans.push(Span::styled(format!("{}  ", message), styles::tone(*tone)));
        }
        spans.extend(hint("↑↓", "select"));
        spans.extend(hint("enter", "open"));
        spans.extend(hint("s", "start"));
        spans.extend(hint("d", "stop"));
        spans.extend(hint("D", "stop all"));
        spans.extend(hint("r", "refresh"));
        spans.extend(hint("q", "quit"));
        Line::from(spans)
    };
    f.render_widget(Paragraph::new(footer), outer[2]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_title() {
        assert_eq!(fit_title("Running", 20), "Running");
        assert_eq!(fit_title("Running", 8), "Run…");
        assert_eq!(fit_title("Running", 4), "");
        assert_eq!(fit_title("Running", 5), "…");
    }
}

use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use dualchat_core::config::MESSAGE_MAX_LENGTH;
use dualchat_core::{ChatState, Message, ModelId, ViewMode};
use crate::app::{App, InputMode};

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, panes, input, footer
    let [header_area, body_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    let state = app.controller.snapshot();

    render_header(app, frame, header_area);
    render_panes(app, &state, frame, body_area);
    render_input(app, &state, frame, input_area);
    render_footer(app, &state, frame, footer_area);

    // Popups
    if app.show_system_prompt {
        render_system_prompt(app, frame, area);
    } else if app.show_history {
        render_history(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let (indicator, indicator_style) = match app.online {
        Some(true) => ("● online", Style::default().fg(Color::Green)),
        Some(false) => ("● offline", Style::default().fg(Color::Red)),
        None => ("○ checking", Style::default().fg(Color::Gray)),
    };

    let mut spans = vec![
        Span::styled(" DualChat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("[{}] ", app.controller.view_mode().display_name()),
            Style::default().fg(Color::White),
        ),
        Span::styled(indicator, indicator_style),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ];
    if let Some(status) = &app.status {
        spans.push(Span::styled(format!("  {}", status), Style::default().fg(Color::Yellow)));
    }

    let header = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_panes(app: &mut App, state: &ChatState, frame: &mut Frame, area: Rect) {
    let models = app.visible_models();
    let constraints = vec![Constraint::Ratio(1, models.len() as u32); models.len()];
    let areas = Layout::horizontal(constraints).split(area);

    app.pane_areas = models.iter().copied().zip(areas.iter().copied()).collect();
    for (model, pane_area) in models.into_iter().zip(areas.iter().copied()) {
        render_pane(app, state, model, frame, pane_area);
    }
}

/// Most recent latency reported by `model`.
fn latest_latency(messages: &[Message], model: ModelId) -> Option<f64> {
    messages
        .iter()
        .rev()
        .filter(|m| m.model == Some(model))
        .find_map(|m| m.latency)
}

fn total_tokens(message: &Message) -> Option<u64> {
    message
        .usage
        .as_ref()
        .and_then(|usage| usage.get("total_tokens"))
        .and_then(|tokens| tokens.as_u64())
}

fn pane_lines(app: &App, state: &ChatState, model: ModelId) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = Vec::new();
    let streaming = state.loading.contains(&model);

    for msg in &state.messages {
        if msg.is_user() {
            lines.push(Line::from(vec![
                Span::styled("You:", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
                Span::styled(format!(" {}", msg.timestamp), Style::default().fg(Color::DarkGray)),
            ]));
            for line in msg.content.lines() {
                lines.push(Line::from(line.to_string()));
            }
            lines.push(Line::default());
            continue;
        }
        if msg.model != Some(model) {
            continue;
        }

        let mut heading = vec![Span::styled(
            format!("{}:", model.display_name()),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )];
        if msg.error {
            heading.push(Span::styled(" error (r to retry)", Style::default().fg(Color::Red)));
        }
        lines.push(Line::from(heading));

        let body_style = if msg.error {
            Style::default().fg(Color::Red)
        } else {
            Style::default()
        };

        if msg.content.is_empty() {
            if streaming {
                // Animated ellipsis: cycles through ".", "..", "..."
                let dots = ".".repeat((app.animation_frame as usize) + 1);
                lines.push(Line::from(Span::styled(
                    format!("Thinking{}", dots),
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                )));
            } else if !msg.error {
                lines.push(Line::from(Span::styled(
                    "(stopped)",
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                )));
            }
        }
        for line in msg.content.lines() {
            lines.push(Line::from(Span::styled(line.to_string(), body_style)));
        }

        let mut meta = Vec::new();
        if let Some(latency) = msg.latency {
            meta.push(format!("{:.2}s", latency));
        }
        if let Some(tokens) = total_tokens(msg) {
            meta.push(format!("{} tokens", tokens));
        }
        if !meta.is_empty() {
            lines.push(Line::from(Span::styled(
                meta.join(" · "),
                Style::default().fg(Color::DarkGray),
            )));
        }
        lines.push(Line::default());
    }

    lines
}

/// Rows `lines` occupy once wrapped to `width` columns.
fn wrapped_height(lines: &[Line], width: u16) -> u16 {
    let width = usize::from(width.max(1));
    let rows: usize = lines.iter().map(|line| line.width().max(1).div_ceil(width)).sum();
    rows.min(usize::from(u16::MAX)) as u16
}

fn render_pane(app: &mut App, state: &ChatState, model: ModelId, frame: &mut Frame, area: Rect) {
    let focused = app.focus == model;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };

    let badge = match latest_latency(&state.messages, model) {
        Some(latency) => Span::styled(format!(" {:.2}s ", latency), Style::default().fg(Color::Green)),
        None => Span::raw(""),
    };
    let loading = if state.loading.contains(&model) { " ◌" } else { "" };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(" {} ({}){} ", model.display_name(), model.provider_name(), loading))
        .title_top(Line::from(badge).right_aligned());

    let text = if state.messages.is_empty() {
        Text::from(Span::styled(
            "Type a prompt to compare both models...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Text::from(pane_lines(app, state, model))
    };

    // Follow the bottom unless the user scrolled back
    let inner_height = area.height.saturating_sub(2);
    let total = wrapped_height(&text.lines, area.width.saturating_sub(2));
    let max_back = total.saturating_sub(inner_height);
    let back = app.scroll_back.entry(model).or_insert(0);
    *back = (*back).min(max_back);
    let scroll = max_back - *back;

    let pane = Paragraph::new(text)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));

    frame.render_widget(pane, area);
}

/// Single-line input with horizontal scrolling that keeps the cursor visible.
fn render_text_input(
    frame: &mut Frame,
    area: Rect,
    block: Block,
    text: &str,
    cursor: usize,
    show_cursor: bool,
) {
    let inner_width = area.width.saturating_sub(2) as usize;

    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor >= inner_width {
        cursor - inner_width + 1
    } else {
        0
    };

    let visible_text: String = text.chars().skip(scroll_offset).take(inner_width).collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(block);
    frame.render_widget(input, area);

    if show_cursor {
        let cursor_x = (cursor - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_input(app: &App, state: &ChatState, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };

    let title = match (editing, state.is_idle()) {
        (true, true) => " Prompt (Enter to send) ",
        (true, false) => " Prompt (waiting for replies) ",
        (false, true) => " Prompt (i to type) ",
        (false, false) => " Prompt (x to stop) ",
    };

    let count = app.input.chars().count();
    let counter_style = if count * 10 >= MESSAGE_MAX_LENGTH * 9 {
        Style::default().fg(Color::Red)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let mut block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);
    if editing {
        block = block.title_top(
            Line::from(Span::styled(format!(" {}/{} ", count, MESSAGE_MAX_LENGTH), counter_style))
                .right_aligned(),
        );
    }

    let show_cursor = editing && !app.show_history && !app.show_system_prompt;
    render_text_input(frame, area, block, &app.input, app.input_cursor, show_cursor);
}

fn render_footer(app: &App, state: &ChatState, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };

    let mode_text = match app.input_mode {
        InputMode::Normal => " NORMAL ",
        InputMode::Editing => " INSERT ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hint = |key: &'static str, label: &'static str| {
        [
            Span::styled(format!(" {} ", key), key_style),
            Span::styled(format!(" {} ", label), label_style),
        ]
    };

    let hints: Vec<Span> = if app.show_system_prompt {
        [hint("Enter", "save"), hint("Esc", "cancel")].concat()
    } else if app.show_history {
        [hint("j/k", "nav"), hint("Enter", "load"), hint("d", "delete"), hint("Esc", "close")].concat()
    } else if app.input_mode == InputMode::Editing {
        [hint("Enter", "send"), hint("Esc", "stop typing")].concat()
    } else {
        let mut hints = vec![hint("i", "type")];
        if !state.is_idle() {
            hints.push(hint("x", "stop"));
        }
        if app.latest_error(app.focus).is_some() {
            hints.push(hint("r", "retry"));
        }
        if matches!(app.controller.view_mode(), ViewMode::Both) {
            hints.push(hint("Tab", "focus"));
        }
        hints.extend([
            hint("v", "view"),
            hint("n", "new"),
            hint("h", "history"),
            hint("p", "system"),
            hint("q", "quit"),
        ]);
        hints.concat()
    };

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

/// Centered popup area, clamped to the screen.
fn popup_area(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(4));
    let x = (area.width.saturating_sub(width)) / 2;
    let y = (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

/// One row per entry (at least one) plus the borders, saturating at `u16::MAX`.
fn list_popup_height(entries: usize) -> u16 {
    u16::try_from(entries.max(1))
        .unwrap_or(u16::MAX)
        .saturating_add(2)
}

fn render_history(app: &mut App, frame: &mut Frame, area: Rect) {
    let sessions = app.history.sessions();
    let popup = popup_area(area, 70, list_popup_height(sessions.len()));

    frame.render_widget(Clear, popup);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" History (Enter to load, d to delete, Esc to close) ");

    if sessions.is_empty() {
        let empty = Paragraph::new(" No saved chats yet")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(empty, popup);
        return;
    }

    let active = app.history.active_session();
    let items: Vec<ListItem> = sessions
        .iter()
        .map(|session| {
            let is_active = active == Some(session.id.as_str());
            let prefix = if is_active { "* " } else { "  " };
            // RFC 3339 down to the minute
            let created = session
                .created_at
                .as_deref()
                .map(|ts| ts.chars().take(16).collect::<String>().replace('T', " "))
                .unwrap_or_default();

            let style = if is_active {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };

            ListItem::new(Line::from(vec![
                Span::styled(format!("{}{} ", prefix, session.title), style),
                Span::styled(created, Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup, &mut app.history_state);
}

fn render_system_prompt(app: &App, frame: &mut Frame, area: Rect) {
    let popup = popup_area(area, 70, 7);

    frame.render_widget(Clear, popup);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" System Prompt ");

    let inner = block.inner(popup);
    frame.render_widget(block, popup);

    let instructions = Paragraph::new("Sent with every request. Enter to save, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    let input_area = Rect::new(inner.x, inner.y + 1, inner.width, 3.min(inner.height.saturating_sub(1)));
    render_text_input(frame, input_area, input_block, &app.prompt_input, app.prompt_cursor, true);

    let status = Paragraph::new(format!("{} characters", app.prompt_input.chars().count()))
        .style(Style::default().fg(Color::DarkGray));
    if inner.height > 4 {
        frame.render_widget(status, Rect::new(inner.x, inner.y + 4, inner.width, 1));
    }
}

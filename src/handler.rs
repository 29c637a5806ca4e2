use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use dualchat_core::config::{MESSAGE_MAX_LENGTH, SYSTEM_PROMPT_MAX_LENGTH};
use ratatui::layout::Rect;
use crate::app::{App, InputMode};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub fn handle_event(app: &mut App, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) | AppEvent::Redraw => {}
        AppEvent::Tick => app.tick_animation(),
        AppEvent::Health(online) => app.online = Some(online),
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }
    app.status = None;

    if app.show_system_prompt {
        handle_system_prompt(app, key);
    } else if app.show_history {
        handle_history(app, key);
    } else {
        match app.input_mode {
            InputMode::Normal => handle_normal_mode(app, key),
            InputMode::Editing => handle_editing_mode(app, key),
        }
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        KeyCode::Char('i') | KeyCode::Enter => app.input_mode = InputMode::Editing,
        KeyCode::Char('x') => app.cancel(),
        KeyCode::Char('r') => app.retry_focused(),

        KeyCode::Tab | KeyCode::BackTab => app.toggle_focus(),
        KeyCode::Char('v') => app.cycle_view_mode(),
        KeyCode::Char('n') => app.new_chat(),
        KeyCode::Char('h') => app.open_history(),
        KeyCode::Char('p') => app.open_system_prompt(),

        // Scroll the focused pane
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(app.focus, 1),
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(app.focus, 1),
        KeyCode::PageUp => app.scroll_up(app.focus, 10),
        KeyCode::PageDown => app.scroll_down(app.focus, 10),
        KeyCode::Char('G') | KeyCode::End => {
            app.scroll_back.remove(&app.focus);
        }

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.input_mode = InputMode::Normal,
        KeyCode::Enter => app.send_input(),
        _ => {
            edit_text(&mut app.input, &mut app.input_cursor, key, MESSAGE_MAX_LENGTH);
        }
    }
}

fn handle_history(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc | KeyCode::Char('h') | KeyCode::Char('q') => app.show_history = false,
        KeyCode::Char('j') | KeyCode::Down => app.history_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.history_nav_up(),
        KeyCode::Enter => app.load_selected_session(),
        KeyCode::Char('d') => app.delete_selected_session(),
        _ => {}
    }
}

fn handle_system_prompt(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.show_system_prompt = false,
        KeyCode::Enter => app.save_system_prompt(),
        _ => {
            edit_text(&mut app.prompt_input, &mut app.prompt_cursor, key, SYSTEM_PROMPT_MAX_LENGTH);
        }
    }
}

/// Line editing shared by the prompt box and the system prompt popup.
/// `cursor` is a char index. Returns false for keys it does not handle.
fn edit_text(text: &mut String, cursor: &mut usize, key: KeyEvent, max_chars: usize) -> bool {
    let char_count = text.chars().count();
    match key.code {
        KeyCode::Backspace => {
            if *cursor > 0 {
                *cursor -= 1;
                let byte_pos = char_to_byte_index(text, *cursor);
                text.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            if *cursor < char_count {
                let byte_pos = char_to_byte_index(text, *cursor);
                text.remove(byte_pos);
            }
        }
        KeyCode::Left => *cursor = cursor.saturating_sub(1),
        KeyCode::Right => *cursor = (*cursor + 1).min(char_count),
        KeyCode::Home => *cursor = 0,
        KeyCode::End => *cursor = char_count,
        KeyCode::Char(c) => {
            if char_count < max_chars {
                let byte_pos = char_to_byte_index(text, *cursor);
                text.insert(byte_pos, c);
                *cursor += 1;
            }
        }
        _ => return false,
    }
    true
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let pane = app
        .pane_areas
        .iter()
        .find(|(_, area)| point_in_rect(mouse.column, mouse.row, *area))
        .map(|(model, _)| *model);

    let Some(model) = pane else {
        return;
    };

    match mouse.kind {
        MouseEventKind::ScrollUp => app.scroll_up(model, 3),
        MouseEventKind::ScrollDown => app.scroll_down(model, 3),
        MouseEventKind::Down(_) => app.focus = model,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventKind;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: crossterm::event::KeyEventState::NONE,
        }
    }

    #[test]
    fn editing_respects_multibyte_cursor_positions() {
        let mut text = String::new();
        let mut cursor = 0;
        for c in "héllo".chars() {
            edit_text(&mut text, &mut cursor, key(KeyCode::Char(c)), 100);
        }
        edit_text(&mut text, &mut cursor, key(KeyCode::Left), 100);
        edit_text(&mut text, &mut cursor, key(KeyCode::Left), 100);
        edit_text(&mut text, &mut cursor, key(KeyCode::Left), 100);
        edit_text(&mut text, &mut cursor, key(KeyCode::Backspace), 100);

        assert_eq!(text, "hllo");
        assert_eq!(cursor, 1);

        edit_text(&mut text, &mut cursor, key(KeyCode::Delete), 100);
        assert_eq!(text, "hlo");
    }

    #[test]
    fn editing_stops_at_the_length_limit() {
        let mut text = "abc".to_string();
        let mut cursor = 3;
        edit_text(&mut text, &mut cursor, key(KeyCode::Char('d')), 3);
        assert_eq!(text, "abc");
        assert_eq!(cursor, 3);
    }

    #[test]
    fn unhandled_keys_are_reported() {
        let mut text = String::new();
        let mut cursor = 0;
        assert!(!edit_text(&mut text, &mut cursor, key(KeyCode::Tab), 10));
    }
}

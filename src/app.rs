use dualchat_core::{
    ChatApiClient, ChatController, Config, FileStore, HistoryStore, KeyValueStore, MemoryStore,
    Message, ModelId, ViewMode,
};
use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub focus: ModelId,

    // Prompt input
    pub input: String,
    pub input_cursor: usize, // cursor position in chars

    // Per-pane scroll, counted in lines up from the bottom
    pub scroll_back: HashMap<ModelId, u16>,
    // Pane areas for mouse hit-testing (updated during render)
    pub pane_areas: Vec<(ModelId, Rect)>,

    // Backend status; None until the first probe returns
    pub online: Option<bool>,
    pub status: Option<String>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // History popup
    pub show_history: bool,
    pub history_state: ListState,

    // System prompt popup
    pub show_system_prompt: bool,
    pub prompt_input: String,
    pub prompt_cursor: usize,

    // Data
    pub controller: ChatController,
    pub history: HistoryStore,
    pub config: Config,
}

impl App {
    pub fn new() -> Self {
        let config = Config::load().unwrap_or_else(|e| {
            warn!(error = %e, "unreadable config, using defaults");
            Config::new()
        });

        let client = ChatApiClient::new(&config.api_url());
        info!(api_url = client.base_url(), "chat backend configured");

        let store: Box<dyn KeyValueStore> = match FileStore::open_default() {
            Ok(store) => Box::new(store),
            Err(e) => {
                warn!(error = %e, "history will not be saved");
                Box::new(MemoryStore::new())
            }
        };

        Self::with_parts(
            ChatController::new(Arc::new(client)),
            HistoryStore::open(store),
            config,
        )
    }

    pub fn with_parts(controller: ChatController, history: HistoryStore, config: Config) -> Self {
        let view_mode = config.view_mode();
        controller.set_view_mode(view_mode);
        controller.set_system_prompt(&config.system_prompt());

        Self {
            should_quit: false,
            input_mode: InputMode::Normal,
            focus: view_mode.targets()[0],

            input: String::new(),
            input_cursor: 0,

            scroll_back: HashMap::new(),
            pane_areas: Vec::new(),

            online: None,
            status: None,

            animation_frame: 0,

            show_history: false,
            history_state: ListState::default(),

            show_system_prompt: false,
            prompt_input: String::new(),
            prompt_cursor: 0,

            controller,
            history,
            config,
        }
    }

    /// Models that currently have a pane on screen.
    pub fn visible_models(&self) -> Vec<ModelId> {
        self.controller.view_mode().targets()
    }

    pub fn toggle_focus(&mut self) {
        let visible = self.visible_models();
        let current = visible.iter().position(|m| *m == self.focus).unwrap_or(0);
        self.focus = visible[(current + 1) % visible.len()];
    }

    pub fn cycle_view_mode(&mut self) {
        let next = self.controller.view_mode().next();
        self.controller.set_view_mode(next);
        if let ViewMode::Single(model) = next {
            self.focus = model;
        }

        self.config.view_mode = Some(next.as_str().to_string());
        self.save_config();
    }

    pub fn send_input(&mut self) {
        if self.controller.send_message(&self.input).is_some() {
            self.input.clear();
            self.input_cursor = 0;
            self.input_mode = InputMode::Normal;
            self.scroll_back.clear();
        }
    }

    pub fn cancel(&mut self) {
        self.controller.cancel_request();
    }

    /// Latest errored reply from `model`, if any.
    pub fn latest_error(&self, model: ModelId) -> Option<Message> {
        self.controller
            .messages()
            .into_iter()
            .rev()
            .find(|m| m.model == Some(model) && m.error)
    }

    pub fn retry_focused(&mut self) {
        if let Some(message) = self.latest_error(self.focus) {
            self.controller.retry_message(message.id);
        }
    }

    pub fn new_chat(&mut self) {
        self.controller.cancel_request();
        self.history.start_new_chat(&self.controller.messages());
        self.controller.set_messages(Vec::new());
        self.scroll_back.clear();
    }

    pub fn tick_animation(&mut self) {
        if self.controller.is_loading() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_up(&mut self, model: ModelId, lines: u16) {
        let back = self.scroll_back.entry(model).or_insert(0);
        *back = back.saturating_add(lines);
    }

    pub fn scroll_down(&mut self, model: ModelId, lines: u16) {
        let back = self.scroll_back.entry(model).or_insert(0);
        *back = back.saturating_sub(lines);
    }

    // History popup
    pub fn open_history(&mut self) {
        let selected = if self.history.sessions().is_empty() { None } else { Some(0) };
        self.history_state.select(selected);
        self.show_history = true;
    }

    pub fn history_nav_down(&mut self) {
        let len = self.history.sessions().len();
        if len > 0 {
            let i = self.history_state.selected().unwrap_or(0);
            self.history_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn history_nav_up(&mut self) {
        let i = self.history_state.selected().unwrap_or(0);
        self.history_state.select(Some(i.saturating_sub(1)));
    }

    fn selected_session_id(&self) -> Option<String> {
        self.history_state
            .selected()
            .and_then(|i| self.history.sessions().get(i))
            .map(|s| s.id.clone())
    }

    pub fn load_selected_session(&mut self) {
        let Some(id) = self.selected_session_id() else {
            return;
        };

        self.controller.cancel_request();
        let current = self.controller.messages();
        if let Some(messages) = self.history.load(&id, &current) {
            self.controller.set_messages(messages);
            self.scroll_back.clear();
            self.show_history = false;
        }
    }

    pub fn delete_selected_session(&mut self) {
        let Some(id) = self.selected_session_id() else {
            return;
        };

        if self.history.delete(&id) {
            let len = self.history.sessions().len();
            if len == 0 {
                self.history_state.select(None);
            } else if let Some(i) = self.history_state.selected() {
                self.history_state.select(Some(i.min(len - 1)));
            }
        }
    }

    // System prompt popup
    pub fn open_system_prompt(&mut self) {
        self.prompt_input = self.controller.system_prompt();
        self.prompt_cursor = self.prompt_input.chars().count();
        self.show_system_prompt = true;
    }

    pub fn save_system_prompt(&mut self) {
        self.controller.set_system_prompt(&self.prompt_input);
        self.config.system_prompt = Some(self.controller.system_prompt());
        self.save_config();
        self.show_system_prompt = false;
    }

    fn save_config(&mut self) {
        if let Err(e) = self.config.save() {
            warn!(error = %e, "failed to save config");
            self.status = Some(format!("Config not saved: {}", e));
        }
    }
}

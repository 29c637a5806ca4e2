use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two backends a prompt can be sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelId {
    #[serde(rename = "gpt-4")]
    Gpt4,
    #[serde(rename = "deepseek")]
    DeepSeek,
}

impl ModelId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Gpt4 => "gpt-4",
            ModelId::DeepSeek => "deepseek",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gpt-4" | "gpt4" => Some(ModelId::Gpt4),
            "deepseek" => Some(ModelId::DeepSeek),
            _ => None,
        }
    }

    pub fn all() -> Vec<ModelId> {
        vec![ModelId::Gpt4, ModelId::DeepSeek]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelId::Gpt4 => "GPT-4o",
            ModelId::DeepSeek => "DeepSeek-R1",
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            ModelId::Gpt4 => "Azure OpenAI",
            ModelId::DeepSeek => "Azure AI Foundry",
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which model(s) a send targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Both,
    Single(ModelId),
}

impl ViewMode {
    /// Models a send fans out to, in pane order.
    pub fn targets(&self) -> Vec<ModelId> {
        match self {
            ViewMode::Both => ModelId::all(),
            ViewMode::Single(model) => vec![*model],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Both => "both",
            ViewMode::Single(model) => model.as_str(),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("both") {
            return Some(ViewMode::Both);
        }
        ModelId::from_str(s).map(ViewMode::Single)
    }

    /// Both -> GPT-4o -> DeepSeek -> Both
    pub fn next(self) -> Self {
        match self {
            ViewMode::Both => ViewMode::Single(ModelId::Gpt4),
            ViewMode::Single(ModelId::Gpt4) => ViewMode::Single(ModelId::DeepSeek),
            ViewMode::Single(ModelId::DeepSeek) => ViewMode::Both,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ViewMode::Both => "Dual View",
            ViewMode::Single(model) => model.display_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_targets_every_model_in_pane_order() {
        assert_eq!(ViewMode::Both.targets(), vec![ModelId::Gpt4, ModelId::DeepSeek]);
        assert_eq!(
            ViewMode::Single(ModelId::DeepSeek).targets(),
            vec![ModelId::DeepSeek]
        );
    }

    #[test]
    fn model_ids_use_backend_wire_names() {
        assert_eq!(serde_json::to_string(&ModelId::Gpt4).unwrap(), "\"gpt-4\"");
        assert_eq!(
            serde_json::from_str::<ModelId>("\"deepseek\"").unwrap(),
            ModelId::DeepSeek
        );
    }

    #[test]
    fn view_mode_cycles_back_to_both() {
        let mut mode = ViewMode::Both;
        for _ in 0..3 {
            mode = mode.next();
        }
        assert_eq!(mode, ViewMode::Both);
        assert_eq!(ViewMode::from_str("GPT-4"), Some(ViewMode::Single(ModelId::Gpt4)));
        assert_eq!(ViewMode::from_str("nope"), None);
    }
}

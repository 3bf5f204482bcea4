//! Writing modes: the fixed set of document slots that are kept in sync.

use serde::{Deserialize, Serialize};

/// A logical document slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritingMode {
    Editor,
    Todo,
}

impl WritingMode {
    /// Every mode, in sync order.
    pub const ALL: [WritingMode; 2] = [WritingMode::Editor, WritingMode::Todo];

    /// Returns the path segment used for this mode in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            WritingMode::Editor => "editor",
            WritingMode::Todo => "todo",
        }
    }

    /// Parse from string name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "editor" => Some(WritingMode::Editor),
            "todo" => Some(WritingMode::Todo),
            _ => None,
        }
    }
}

impl std::fmt::Display for WritingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WritingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown writing mode: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names() {
        assert_eq!(WritingMode::Editor.as_str(), "editor");
        assert_eq!(WritingMode::Todo.as_str(), "todo");
        assert_eq!(WritingMode::Todo.to_string(), "todo");
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(WritingMode::parse("editor"), Some(WritingMode::Editor));
        assert_eq!(WritingMode::parse("TODO"), Some(WritingMode::Todo));
        assert_eq!(WritingMode::parse("notes"), None);
        assert!("Editor".parse::<WritingMode>().is_ok());
        assert!("".parse::<WritingMode>().is_err());
    }

    #[test]
    fn test_serde_uses_lowercase() {
        let json = serde_json::to_string(&WritingMode::Editor).unwrap();
        assert_eq!(json, "\"editor\"");
        let mode: WritingMode = serde_json::from_str("\"todo\"").unwrap();
        assert_eq!(mode, WritingMode::Todo);
    }
}

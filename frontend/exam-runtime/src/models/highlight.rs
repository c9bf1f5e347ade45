use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Colour index stored for marks that only carry a text format.
pub const FORMAT_ONLY: i32 = -1;

/// One persisted annotation, scoped by `(attempt_id, section_name)` in the
/// store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub text: String,
    pub color: i32,
    #[serde(default)]
    pub formats: Vec<u8>,
    #[serde(default)]
    pub timestamp: i64,
}

impl Highlight {
    pub fn new(text: impl Into<String>, color: i32, formats: Vec<u8>) -> Self {
        Self {
            text: text.into(),
            color,
            formats,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn is_format_only(&self) -> bool {
        self.color == FORMAT_ONLY
    }
}

/// Picker palette. The index is what gets persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightColor {
    Yellow,
    Green,
    Blue,
    Pink,
}

impl HighlightColor {
    pub const PALETTE: [HighlightColor; 4] = [
        HighlightColor::Yellow,
        HighlightColor::Green,
        HighlightColor::Blue,
        HighlightColor::Pink,
    ];

    pub fn from_index(index: i32) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::PALETTE.get(i).copied())
    }

    pub fn index(&self) -> i32 {
        match self {
            HighlightColor::Yellow => 0,
            HighlightColor::Green => 1,
            HighlightColor::Blue => 2,
            HighlightColor::Pink => 3,
        }
    }

    pub fn hex(&self) -> &'static str {
        match self {
            HighlightColor::Yellow => "#fff176",
            HighlightColor::Green => "#a5d6a7",
            HighlightColor::Blue => "#90caf9",
            HighlightColor::Pink => "#f48fb1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextFormat {
    Bold,
    Underline,
    Italic,
}

impl TextFormat {
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(TextFormat::Bold),
            1 => Some(TextFormat::Underline),
            2 => Some(TextFormat::Italic),
            _ => None,
        }
    }

    pub fn index(&self) -> u8 {
        match self {
            TextFormat::Bold => 0,
            TextFormat::Underline => 1,
            TextFormat::Italic => 2,
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            TextFormat::Bold => "hl-bold",
            TextFormat::Underline => "hl-underline",
            TextFormat::Italic => "hl-italic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_indices_round_trip() {
        for color in HighlightColor::PALETTE {
            assert_eq!(HighlightColor::from_index(color.index()), Some(color));
        }
        assert_eq!(HighlightColor::from_index(FORMAT_ONLY), None);
        assert_eq!(HighlightColor::from_index(9), None);
    }

    #[test]
    fn missing_formats_default_to_empty() {
        let h: Highlight = serde_json::from_str(r#"{"text":"whale","color":0}"#).unwrap();
        assert!(h.formats.is_empty());
        assert!(!h.is_format_only());
    }
}

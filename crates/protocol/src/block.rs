//! Segment → JSON block encoding.

use bar_core::{Content, MinWidth, Segment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockMinWidth {
    Pixels(u32),
    Text(String),
}

/// One entry of a status line, as the host panel sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub full_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_width: Option<BlockMinWidth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub align: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator_block_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markup: Option<String>,
}

impl Block {
    /// Encode `segment`, routed back to us as `(name, instance)`.
    pub fn from_segment(segment: &Segment, name: impl Into<String>, instance: impl Into<String>) -> Self {
        let attrs = segment.attrs();
        let markup = match segment.content() {
            Content::Markup(_) => Some("pango".to_string()),
            Content::Text(_) => None,
        };
        Self {
            full_text: segment.content().as_str().to_string(),
            short_text: segment.get_short_text().map(str::to_string),
            color: attrs.color.map(|c| c.to_hex()),
            background: attrs.background.map(|c| c.to_hex()),
            border: attrs.border.map(|c| c.to_hex()),
            min_width: attrs.min_width.as_ref().map(|w| match w {
                MinWidth::Pixels(px) => BlockMinWidth::Pixels(*px),
                MinWidth::Placeholder(text) => BlockMinWidth::Text(text.clone()),
            }),
            align: attrs.align.map(|a| a.as_str().to_string()),
            name: Some(name.into()),
            instance: Some(instance.into()),
            urgent: segment.is_urgent().then_some(true),
            separator: attrs.separator,
            separator_block_width: attrs.padding,
            markup,
        }
    }
}

/// One status line: the JSON array of `blocks` followed by `,\n`.
pub fn encode_line(blocks: &[Block]) -> String {
    // Blocks hold only strings, integers and bools.
    let mut line = serde_json::to_string(blocks).unwrap_or_else(|_| "[]".to_string());
    line.push_str(",\n");
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use bar_core::{Align, Color};

    #[test]
    fn plain_text_is_minimal() {
        let b = Block::from_segment(&Segment::text("A"), "0", "x1");
        assert_eq!(
            encode_line(&[b]),
            "[{\"full_text\":\"A\",\"name\":\"0\",\"instance\":\"x1\"}],\n"
        );
    }

    #[test]
    fn every_attribute() {
        let seg = Segment::markup("<b>7</b>")
            .short_text("7")
            .color(Color::from_hex("#ff0000").unwrap())
            .min_width(MinWidth::Placeholder("00:00".into()))
            .align(Align::Center)
            .padding(9)
            .separator(false)
            .urgent(true);
        let json: serde_json::Value = serde_json::to_value(Block::from_segment(&seg, "2", "i")).unwrap();
        assert_eq!(json["markup"], "pango");
        assert_eq!(json["short_text"], "7");
        assert_eq!(json["color"], "#ff0000");
        assert_eq!(json["min_width"], "00:00");
        assert_eq!(json["align"], "center");
        assert_eq!(json["separator_block_width"], 9);
        assert_eq!(json["separator"], false);
        assert_eq!(json["urgent"], true);
        assert!(json.get("background").is_none());
    }

    #[test]
    fn error_segments_are_urgent() {
        let b = Block::from_segment(&Segment::error(anyhow::anyhow!("nope")), "0", "e");
        assert_eq!(b.full_text, "Error");
        assert_eq!(b.short_text.as_deref(), Some("!"));
        assert_eq!(b.urgent, Some(true));
        assert_eq!(
            Block::from_segment(&Segment::text("x").min_width(MinWidth::Pixels(40)), "0", "i").min_width,
            Some(BlockMinWidth::Pixels(40))
        );
    }
}

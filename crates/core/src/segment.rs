use crate::{color::Color, event::Event};
use std::fmt;
use std::sync::Arc;

/// Callback invoked when a segment is clicked.
pub type ClickHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Text shown in a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    /// Pango markup; sent with `"markup": "pango"`.
    Markup(String),
}

impl Content {
    pub fn as_str(&self) -> &str {
        match self {
            Content::Text(s) | Content::Markup(s) => s,
        }
    }

    pub fn is_markup(&self) -> bool {
        matches!(self, Content::Markup(_))
    }
}

impl Default for Content {
    fn default() -> Self {
        Content::Text(String::new())
    }
}

/// Minimum width: a pixel count, or a placeholder string whose rendered
/// width is used instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MinWidth {
    Pixels(u32),
    Placeholder(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

impl Align {
    pub fn as_str(self) -> &'static str {
        match self {
            Align::Left => "left",
            Align::Center => "center",
            Align::Right => "right",
        }
    }
}

/// Visual attributes shared by segments and groups. `None` means "unset":
/// a group fills its children's unset attributes from its own.
#[derive(Clone, Default)]
pub struct Attrs {
    pub color: Option<Color>,
    pub background: Option<Color>,
    pub border: Option<Color>,
    pub min_width: Option<MinWidth>,
    pub padding: Option<u32>,
    pub separator: Option<bool>,
    pub align: Option<Align>,
    pub urgent: Option<bool>,
    pub on_click: Option<ClickHandler>,
}

impl Attrs {
    /// Fill every unset attribute from `defaults`.
    pub fn inherit(&mut self, defaults: &Attrs) {
        fn fill<T: Clone>(slot: &mut Option<T>, from: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(from);
            }
        }
        fill(&mut self.color, &defaults.color);
        fill(&mut self.background, &defaults.background);
        fill(&mut self.border, &defaults.border);
        fill(&mut self.min_width, &defaults.min_width);
        fill(&mut self.padding, &defaults.padding);
        fill(&mut self.separator, &defaults.separator);
        fill(&mut self.align, &defaults.align);
        fill(&mut self.urgent, &defaults.urgent);
        fill(&mut self.on_click, &defaults.on_click);
    }
}

impl fmt::Debug for Attrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attrs")
            .field("color", &self.color)
            .field("background", &self.background)
            .field("border", &self.border)
            .field("min_width", &self.min_width)
            .field("padding", &self.padding)
            .field("separator", &self.separator)
            .field("align", &self.align)
            .field("urgent", &self.urgent)
            .field("on_click", &self.on_click.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// One clickable rectangle on the bar.
#[derive(Debug, Clone, Default)]
pub struct Segment {
    content: Content,
    short_text: Option<String>,
    identifier: Option<String>,
    error: Option<Arc<anyhow::Error>>,
    pub(crate) attrs: Attrs,
}

macro_rules! attr_setters {
    ($($(#[$doc:meta])* $name:ident: $ty:ty),* $(,)?) => {
        $(
            $(#[$doc])*
            #[must_use]
            pub fn $name(mut self, value: $ty) -> Self {
                self.attrs.$name = Some(value);
                self
            }
        )*
    };
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Content::Text(text.into()),
            ..Self::default()
        }
    }

    pub fn markup(markup: impl Into<String>) -> Self {
        Self {
            content: Content::Markup(markup.into()),
            ..Self::default()
        }
    }

    /// The canonical error segment: "Error", short form "!", urgent.
    pub fn error(err: impl Into<anyhow::Error>) -> Self {
        Self {
            content: Content::Text("Error".to_string()),
            error: Some(Arc::new(err.into())),
            ..Self::default()
        }
    }

    attr_setters! {
        color: Color,
        background: Color,
        border: Color,
        min_width: MinWidth,
        /// Gap after the segment, in pixels (`separator_block_width`).
        padding: u32,
        separator: bool,
        align: Align,
        urgent: bool,
    }

    #[must_use]
    pub fn short_text(mut self, short: impl Into<String>) -> Self {
        self.short_text = Some(short.into());
        self
    }

    /// Stable identifier used to route click events back to this segment.
    #[must_use]
    pub fn identifier(mut self, id: impl Into<String>) -> Self {
        self.identifier = Some(id.into());
        self
    }

    #[must_use]
    pub fn on_click(mut self, handler: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.attrs.on_click = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn with_error(mut self, err: Arc<anyhow::Error>) -> Self {
        self.error = Some(err);
        self
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    /// Short form; defaults to `"!"` on error segments.
    pub fn get_short_text(&self) -> Option<&str> {
        match (&self.short_text, &self.error) {
            (Some(s), _) => Some(s),
            (None, Some(_)) => Some("!"),
            (None, None) => None,
        }
    }

    pub fn get_identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn get_error(&self) -> Option<&Arc<anyhow::Error>> {
        self.error.as_ref()
    }

    /// Urgency; defaults to `true` on error segments.
    pub fn is_urgent(&self) -> bool {
        self.attrs.urgent.unwrap_or(self.error.is_some())
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut Attrs {
        &mut self.attrs
    }

    pub fn click_handler(&self) -> Option<&ClickHandler> {
        self.attrs.on_click.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_segment_defaults() {
        let s = Segment::error(anyhow::anyhow!("boom"));
        assert_eq!(s.content().as_str(), "Error");
        assert_eq!(s.get_short_text(), Some("!"));
        assert!(s.is_urgent());
        assert_eq!(s.get_error().unwrap().to_string(), "boom");
    }

    #[test]
    fn error_defaults_can_be_overridden() {
        let s = Segment::error(anyhow::anyhow!("boom"))
            .short_text("E")
            .urgent(false);
        assert_eq!(s.get_short_text(), Some("E"));
        assert!(!s.is_urgent());
    }

    #[test]
    fn inherit_only_fills_unset() {
        let mut a = Segment::text("x").color(Color::RED).attrs;
        let defaults = Attrs {
            color: Some(Color::WHITE),
            padding: Some(4),
            ..Attrs::default()
        };
        a.inherit(&defaults);
        assert_eq!(a.color, Some(Color::RED));
        assert_eq!(a.padding, Some(4));
        assert_eq!(a.background, None);
    }

    #[test]
    fn markup_content() {
        let s = Segment::markup("<b>x</b>");
        assert!(s.content().is_markup());
        assert!(!Segment::text("x").content().is_markup());
    }
}

use crate::{
    color::Color,
    event::Event,
    output::Output,
    segment::{Align, Attrs, MinWidth, Segment},
};
use std::sync::Arc;
use std::time::SystemTime;

/// Concatenation of several outputs that share group-level defaults.
///
/// Any attribute a child leaves unset is taken from the group. The group's
/// minimum width is split across the children so their widths sum to it.
/// Separators and padding between children are suppressed unless enabled
/// with [`SegmentGroup::inner_separators`] / [`SegmentGroup::inner_padding`];
/// the group's own separator and padding apply after its last segment.
#[derive(Debug, Clone, Default)]
pub struct SegmentGroup {
    children: Vec<Output>,
    attrs: Attrs,
    min_width: Option<u32>,
    inner_separators: Option<bool>,
    inner_padding: Option<u32>,
}

impl SegmentGroup {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, child: impl Into<Output>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn push(&mut self, child: impl Into<Output>) {
        self.children.push(child.into());
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    #[must_use]
    pub fn color(mut self, c: Color) -> Self {
        self.attrs.color = Some(c);
        self
    }

    #[must_use]
    pub fn background(mut self, c: Color) -> Self {
        self.attrs.background = Some(c);
        self
    }

    #[must_use]
    pub fn border(mut self, c: Color) -> Self {
        self.attrs.border = Some(c);
        self
    }

    #[must_use]
    pub fn align(mut self, a: Align) -> Self {
        self.attrs.align = Some(a);
        self
    }

    #[must_use]
    pub fn urgent(mut self, urgent: bool) -> Self {
        self.attrs.urgent = Some(urgent);
        self
    }

    #[must_use]
    pub fn separator(mut self, separator: bool) -> Self {
        self.attrs.separator = Some(separator);
        self
    }

    #[must_use]
    pub fn padding(mut self, padding: u32) -> Self {
        self.attrs.padding = Some(padding);
        self
    }

    /// Total minimum width in pixels, distributed over the children.
    #[must_use]
    pub fn min_width(mut self, pixels: u32) -> Self {
        self.min_width = Some(pixels);
        self
    }

    #[must_use]
    pub fn inner_separators(mut self, show: bool) -> Self {
        self.inner_separators = Some(show);
        self
    }

    #[must_use]
    pub fn inner_padding(mut self, padding: u32) -> Self {
        self.inner_padding = Some(padding);
        self
    }

    #[must_use]
    pub fn on_click(mut self, handler: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.attrs.on_click = Some(Arc::new(handler));
        self
    }

    pub(crate) fn materialize(&self, now: SystemTime) -> Vec<Segment> {
        let mut segments: Vec<Segment> = self
            .children
            .iter()
            .flat_map(|c| c.materialize(now))
            .collect();
        let count = segments.len();
        if count == 0 {
            return segments;
        }

        let inner = Attrs {
            separator: Some(self.inner_separators.unwrap_or(false)),
            padding: Some(self.inner_padding.unwrap_or(0)),
            ..Attrs::default()
        };
        let widths = self.min_width.map(|w| split_width(w, count));

        for (i, seg) in segments.iter_mut().enumerate() {
            let attrs = seg.attrs_mut();
            if i + 1 < count {
                attrs.inherit(&inner);
            }
            attrs.inherit(&self.attrs);
            if let Some(widths) = &widths {
                attrs.min_width = Some(MinWidth::Pixels(widths[i]));
            }
        }
        segments
    }

    pub(crate) fn next_refresh(&self, now: SystemTime) -> Option<SystemTime> {
        self.children.iter().filter_map(|c| c.next_refresh(now)).min()
    }
}

/// Split `total` into `n` near-equal parts that sum to `total`.
fn split_width(total: u32, n: usize) -> Vec<u32> {
    let n32 = n as u32;
    let (base, extra) = (total / n32, total % n32);
    (0..n32).map(|i| base + u32::from(i < extra)).collect()
}

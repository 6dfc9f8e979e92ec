//! Styled text: a text buffer annotated with ranged spans
//!
//! Image regions are a single object replacement character carrying an
//! [`ImageSpan`]. The span's [`PlaceholderSlot`] is shared between every clone
//! of the text, so a load that finishes later can overwrite the visual in place
//! and every holder of the live text (the display sink included) sees it.

use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::images::pipeline::DecodedImage;
use crate::overlay::Clickable;

/// Character that stands in for an inline image in the text buffer
pub const OBJECT_REPLACEMENT: char = '\u{FFFC}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const LIGHT_GRAY: Color = Color::rgb(0xCC, 0xCC, 0xCC);
    pub const GRAY: Color = Color::rgb(0x88, 0x88, 0x88);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xFF }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parse `#RRGGBB` or `#RRGGBBAA`
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.trim().strip_prefix('#')?;
        if !digits.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok();
        match digits.len() {
            6 => Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?)),
            8 => Some(Self::rgba(channel(0)?, channel(2)?, channel(4)?, channel(6)?)),
            _ => None,
        }
    }
}

/// Host-side drawable identifier (the sink knows how to draw it)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub u32);

/// A decoded image together with the bounds it is drawn at
#[derive(Debug, Clone)]
pub struct ImageVisual {
    pub image: DecodedImage,
    pub width: u32,
    pub height: u32,
}

/// What an image region currently shows
#[derive(Debug, Clone, Default)]
pub enum Visual {
    #[default]
    Transparent,
    Color(Color),
    Resource(ResourceId),
    Image(ImageVisual),
}

impl Visual {
    pub fn is_image(&self) -> bool {
        matches!(self, Visual::Image(_))
    }

    /// Drawn size, if the visual has one of its own
    pub fn bounds(&self) -> Option<(u32, u32)> {
        match self {
            Visual::Image(image) => Some((image.width, image.height)),
            _ => None,
        }
    }
}

/// Mutable, shared cell reserved for an image
#[derive(Clone, Default)]
pub struct PlaceholderSlot(Arc<Mutex<Visual>>);

impl PlaceholderSlot {
    pub fn new(visual: Visual) -> Self {
        Self(Arc::new(Mutex::new(visual)))
    }

    /// Inert slot used for suppressed or invisible images
    pub fn transparent() -> Self {
        Self::new(Visual::Transparent)
    }

    pub fn visual(&self) -> Visual {
        self.lock().clone()
    }

    pub fn set(&self, visual: Visual) {
        *self.lock() = visual;
    }

    /// True if both handles point at the same slot
    pub fn same_slot(&self, other: &PlaceholderSlot) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn lock(&self) -> MutexGuard<'_, Visual> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PlaceholderSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PlaceholderSlot").field(&*self.lock()).finish()
    }
}

#[derive(Debug, Clone)]
pub struct ImageSpan {
    pub source: String,
    pub slot: PlaceholderSlot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStyle {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Monospace,
    Heading(u8),
    Quote,
}

#[derive(Debug, Clone)]
pub enum SpanKind {
    Style(TextStyle),
    Link(String),
    Image(ImageSpan),
    Clickable(Clickable),
}

#[derive(Debug, Clone)]
pub struct Span {
    pub range: Range<usize>,
    pub kind: SpanKind,
}

impl Span {
    pub fn overlaps(&self, range: &Range<usize>) -> bool {
        self.range.start < range.end && range.start < self.range.end
    }
}

#[derive(Debug, Clone, Default)]
pub struct StyledText {
    text: String,
    spans: Vec<Span>,
}

impl StyledText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            spans: Vec::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn push_str(&mut self, s: &str) {
        self.text.push_str(s);
    }

    pub fn push_char(&mut self, c: char) {
        self.text.push(c);
    }

    pub fn ends_with(&self, pat: &str) -> bool {
        self.text.ends_with(pat)
    }

    /// Append an image region and return its range
    pub fn push_image(&mut self, source: impl Into<String>, slot: PlaceholderSlot) -> Range<usize> {
        let start = self.text.len();
        self.text.push(OBJECT_REPLACEMENT);
        let range = start..self.text.len();
        self.spans.push(Span {
            range: range.clone(),
            kind: SpanKind::Image(ImageSpan {
                source: source.into(),
                slot,
            }),
        });
        range
    }

    pub fn add_span(&mut self, range: Range<usize>, kind: SpanKind) {
        if range.start >= range.end || range.end > self.text.len() {
            return;
        }
        self.spans.push(Span { range, kind });
    }

    pub fn retain_spans(&mut self, mut keep: impl FnMut(&Span) -> bool) {
        self.spans.retain(|span| keep(span));
    }

    /// Image spans in text order
    pub fn images(&self) -> Vec<(Range<usize>, &ImageSpan)> {
        let mut images: Vec<_> = self
            .spans
            .iter()
            .filter_map(|span| match &span.kind {
                SpanKind::Image(image) => Some((span.range.clone(), image)),
                _ => None,
            })
            .collect();
        images.sort_by_key(|(range, _)| range.start);
        images
    }

    /// Link spans in text order
    pub fn links(&self) -> Vec<(Range<usize>, &str)> {
        let mut links: Vec<_> = self
            .spans
            .iter()
            .filter_map(|span| match &span.kind {
                SpanKind::Link(url) => Some((span.range.clone(), url.as_str())),
                _ => None,
            })
            .collect();
        links.sort_by_key(|(range, _)| range.start);
        links
    }

    /// Spans covering `offset`, innermost (last added) first
    pub fn spans_at(&self, offset: usize) -> impl Iterator<Item = &Span> {
        self.spans
            .iter()
            .rev()
            .filter(move |span| span.range.contains(&offset))
    }

    /// Cut the buffer down to `len` bytes, clamping spans that reach past it
    pub fn truncate(&mut self, len: usize) {
        if len >= self.text.len() || !self.text.is_char_boundary(len) {
            return;
        }
        self.text.truncate(len);
        self.spans.retain_mut(|span| {
            span.range.end = span.range.end.min(len);
            span.range.start < span.range.end
        });
    }

    pub fn trim_end(&mut self) {
        let len = self.text.trim_end().len();
        self.truncate(len);
    }

    /// Immutable snapshot: image slots are copied so later writes to the live
    /// text do not leak into it.
    pub fn freeze(&self) -> StyledText {
        let spans = self
            .spans
            .iter()
            .map(|span| {
                let kind = match &span.kind {
                    SpanKind::Image(image) => SpanKind::Image(ImageSpan {
                        source: image.source.clone(),
                        slot: PlaceholderSlot::new(image.slot.visual()),
                    }),
                    other => other.clone(),
                };
                Span {
                    range: span.range.clone(),
                    kind,
                }
            })
            .collect();
        StyledText {
            text: self.text.clone(),
            spans,
        }
    }

    /// Plain rendering with image regions spelled out as markers
    pub fn to_plain_string(&self) -> String {
        let mut out = String::with_capacity(self.text.len());
        let images = self.images();
        let mut last = 0;
        for (range, image) in images {
            out.push_str(&self.text[last..range.start]);
            match image.slot.visual() {
                Visual::Image(visual) => {
                    out.push_str(&format!("[image {}x{}]", visual.width, visual.height))
                }
                Visual::Transparent => {}
                _ => out.push_str("[image]"),
            }
            last = range.end;
        }
        out.push_str(&self.text[last..]);
        out
    }
}

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;

use log::debug;
use regex::Regex;

use super::inline::data_uri_subtype;
use crate::markup::MarkupKind;

static IMAGE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<img(.*?)>").expect("valid image tag regex"));
static IMAGE_SRC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"src="(.*?)""#).expect("valid src regex"));
static IMAGE_WIDTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"width="(.*?)""#).expect("valid width regex"));
static IMAGE_HEIGHT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"height="(.*?)""#).expect("valid height regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleType {
    #[default]
    None,
    CenterCrop,
    FitCenter,
}

/// An image discovered in the source text, plus the sizing policy for it.
///
/// The fix callback receives a `&mut ImageReference` and may change the size,
/// scale type or visibility before the load is issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    source: String,
    position: usize,
    width: Option<u32>,
    height: Option<u32>,
    animated: bool,
    visible: bool,
    scale: ScaleType,
}

impl ImageReference {
    pub fn new(source: impl Into<String>, position: usize) -> Self {
        let source = source.into();
        let animated = is_gif(&source)
            || data_uri_subtype(&source).is_some_and(|subtype| subtype.eq_ignore_ascii_case("gif"));
        Self {
            source,
            position,
            width: None,
            height: None,
            animated,
            visible: true,
            scale: ScaleType::None,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Discovery order within the render
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    /// Declared size, if both dimensions are positive
    pub fn declared_size(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }

    pub fn is_animated(&self) -> bool {
        self.animated
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn scale(&self) -> ScaleType {
        self.scale
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = Some(width);
        self.height = Some(height);
    }

    pub fn set_width(&mut self, width: Option<u32>) {
        self.width = width;
    }

    pub fn set_height(&mut self, height: Option<u32>) {
        self.height = height;
    }

    pub fn set_animated(&mut self, animated: bool) {
        self.animated = animated;
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn set_scale(&mut self, scale: ScaleType) {
        self.scale = scale;
    }
}

/// Case-insensitive `.gif` extension check
pub fn is_gif(path: &str) -> bool {
    match path.rfind('.') {
        Some(index) if index > 0 => path[index + 1..].eq_ignore_ascii_case("gif"),
        _ => false,
    }
}

/// Declared dimension; anything that is not a non-negative integer is unset
fn parse_dimension(value: &str) -> Option<u32> {
    let parsed = value.parse::<i32>().ok()?;
    u32::try_from(parsed).ok()
}

/// Image references of one render.
///
/// HTML identity is the source string (repeated sources share one reference);
/// Markdown identity is positional (every occurrence is its own reference).
#[derive(Debug)]
pub struct ImageRegistry {
    kind: MarkupKind,
    entries: Vec<ImageReference>,
    by_source: HashMap<String, usize>,
}

impl ImageRegistry {
    pub fn new(kind: MarkupKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            by_source: HashMap::new(),
        }
    }

    /// Registry for a render of `text`: HTML sources are pre-scanned for their
    /// declared attributes, Markdown starts empty.
    pub fn for_source(kind: MarkupKind, text: &str) -> Self {
        match kind {
            MarkupKind::Html => Self::prescan_html(text),
            MarkupKind::Markdown => Self::new(kind),
        }
    }

    /// Scan raw HTML for `<img>` tags and record each source's declared
    /// width, height and animation type.
    ///
    /// This runs before the HTML parser so the declared attributes survive even
    /// when the parser itself drops them. Within a tag the first match of each
    /// attribute wins; a later tag with the same source overwrites the earlier
    /// tag's attributes.
    pub fn prescan_html(text: &str) -> Self {
        let mut registry = Self::new(MarkupKind::Html);
        let mut position = 0;
        for tag in IMAGE_TAG_RE.find_iter(text) {
            let tag = tag.as_str().trim();
            let Some(src) = capture(&IMAGE_SRC_RE, tag)
                .filter(|src| !src.is_empty())
                .map(decode_entities)
            else {
                continue;
            };

            let mut reference = ImageReference::new(&*src, position);
            if let Some(width) = capture(&IMAGE_WIDTH_RE, tag) {
                reference.width = parse_dimension(width);
            }
            if let Some(height) = capture(&IMAGE_HEIGHT_RE, tag) {
                reference.height = parse_dimension(height);
            }

            let existing = registry.by_source.get(&*src).copied();
            match existing {
                Some(index) => registry.entries[index] = reference,
                None => {
                    registry.by_source.insert(src.to_string(), registry.entries.len());
                    registry.entries.push(reference);
                }
            }
            position += 1;
        }
        debug!("Pre-scan found {} image sources", registry.entries.len());
        registry
    }

    pub fn kind(&self) -> MarkupKind {
        self.kind
    }

    /// Look up or create the reference for `source`, returning its index
    pub fn register(&mut self, source: &str) -> usize {
        if self.kind == MarkupKind::Html {
            if let Some(&index) = self.by_source.get(source) {
                return index;
            }
        }
        let index = self.entries.len();
        self.entries.push(ImageReference::new(source, index));
        if self.kind == MarkupKind::Html {
            self.by_source.insert(source.to_string(), index);
        }
        index
    }

    pub fn get(&self, index: usize) -> Option<&ImageReference> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ImageReference> {
        self.entries.get_mut(index)
    }

    pub fn find(&self, source: &str) -> Option<&ImageReference> {
        self.by_source
            .get(source)
            .and_then(|&index| self.entries.get(index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageReference> {
        self.entries.iter()
    }
}

/// Decode the character references the parser resolves in attribute values,
/// so pre-scanned sources match the sources seen while parsing.
fn decode_entities(value: &str) -> Cow<'_, str> {
    if !value.contains('&') {
        return Cow::Borrowed(value);
    }
    Cow::Owned(
        value
            .replace("&quot;", "\"")
            .replace("&#34;", "\"")
            .replace("&apos;", "'")
            .replace("&#39;", "'")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&"),
    )
}

fn capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

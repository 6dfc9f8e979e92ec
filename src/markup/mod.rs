//! Markup-to-styled-text adapters
//!
//! A [`MarkupParser`] turns source text into [`StyledText`]. Every embedded
//! image token is handed to the caller's resolver *during* parsing; the
//! resolver returns the slot the image region will display, so parsing never
//! waits on image I/O.

pub mod html;
pub mod markdown;

use std::fmt;
use std::sync::Arc;

use crate::error::RenderError;
use crate::styled_text::{PlaceholderSlot, StyledText};

pub use html::HtmlParser;
pub use markdown::MarkdownParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MarkupKind {
    #[default]
    Html,
    Markdown,
}

impl fmt::Display for MarkupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkupKind::Html => f.write_str("HTML"),
            MarkupKind::Markdown => f.write_str("Markdown"),
        }
    }
}

/// Callback invoked for every image source found while parsing
pub type ImageResolver<'a> = dyn FnMut(&str) -> PlaceholderSlot + 'a;

pub trait MarkupParser: Send + Sync {
    fn parse(
        &self,
        source: &str,
        resolve_image: &mut ImageResolver<'_>,
    ) -> Result<StyledText, RenderError>;
}

/// Built-in parser for a markup kind
pub fn default_parser(kind: MarkupKind) -> Arc<dyn MarkupParser> {
    match kind {
        MarkupKind::Html => Arc::new(HtmlParser::new()),
        MarkupKind::Markdown => Arc::new(MarkdownParser::new()),
    }
}

/// Ensure the output ends with a blank line, unless it is empty
pub(crate) fn paragraph_break(out: &mut StyledText) {
    trim_trailing_spaces(out);
    if out.is_empty() || out.ends_with("\n\n") {
        return;
    }
    if out.ends_with("\n") {
        out.push_char('\n');
    } else {
        out.push_str("\n\n");
    }
}

pub(crate) fn line_break(out: &mut StyledText) {
    trim_trailing_spaces(out);
    out.push_char('\n');
}

fn trim_trailing_spaces(out: &mut StyledText) {
    let len = out.as_str().trim_end_matches([' ', '\t']).len();
    out.truncate(len);
}

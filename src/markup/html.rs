use std::cell::RefCell;
use std::rc::Rc;

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Node, NodeData, RcDom};

use super::{ImageResolver, MarkupKind, MarkupParser, line_break, paragraph_break};
use crate::error::RenderError;
use crate::styled_text::{SpanKind, StyledText, TextStyle};

/// HTML to styled text, built on html5ever.
///
/// Handles the inline formatting tags, links, images and the block elements
/// that need line breaks. Whitespace is collapsed the way a browser would.
#[derive(Debug, Default)]
pub struct HtmlParser;

impl HtmlParser {
    pub fn new() -> Self {
        HtmlParser
    }
}

impl MarkupParser for HtmlParser {
    fn parse(
        &self,
        source: &str,
        resolve_image: &mut ImageResolver<'_>,
    ) -> Result<StyledText, RenderError> {
        let dom = parse_document(RcDom::default(), Default::default())
            .from_utf8()
            .read_from(&mut source.as_bytes())
            .map_err(|e| RenderError::parse(MarkupKind::Html, e.to_string()))?;

        let mut builder = HtmlBuilder {
            out: StyledText::new(),
            resolve_image,
        };
        builder.visit(&dom.document);
        builder.out.trim_end();
        Ok(builder.out)
    }
}

struct HtmlBuilder<'r, 'a> {
    out: StyledText,
    resolve_image: &'r mut ImageResolver<'a>,
}

impl HtmlBuilder<'_, '_> {
    fn visit(&mut self, node: &Rc<Node>) {
        match node.data {
            NodeData::Text { ref contents } => {
                self.push_text(&contents.borrow());
            }
            NodeData::Element {
                ref name,
                ref attrs,
                ..
            } => {
                self.visit_element(name.local.as_ref(), attrs, node);
            }
            _ => self.visit_children(node),
        }
    }

    fn visit_children(&mut self, node: &Rc<Node>) {
        for child in node.children.borrow().iter() {
            self.visit(child);
        }
    }

    fn visit_element(
        &mut self,
        tag: &str,
        attrs: &RefCell<Vec<html5ever::Attribute>>,
        node: &Rc<Node>,
    ) {
        match tag {
            "head" | "script" | "style" | "title" => {}
            "br" => line_break(&mut self.out),
            "img" => {
                if let Some(src) = attribute(attrs, "src").filter(|src| !src.is_empty()) {
                    let slot = (self.resolve_image)(&src);
                    self.out.push_image(src, slot);
                }
            }
            "a" => {
                let start = self.out.len();
                self.visit_children(node);
                if let Some(href) = attribute(attrs, "href") {
                    self.out.add_span(start..self.out.len(), SpanKind::Link(href));
                }
            }
            "b" | "strong" => self.styled(node, TextStyle::Bold),
            "i" | "em" | "cite" | "dfn" => self.styled(node, TextStyle::Italic),
            "u" | "ins" => self.styled(node, TextStyle::Underline),
            "s" | "strike" | "del" => self.styled(node, TextStyle::Strikethrough),
            "code" | "tt" | "kbd" | "samp" => self.styled(node, TextStyle::Monospace),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = tag[1..].parse().unwrap_or(1);
                paragraph_break(&mut self.out);
                self.styled(node, TextStyle::Heading(level));
                paragraph_break(&mut self.out);
            }
            "blockquote" => {
                paragraph_break(&mut self.out);
                self.styled(node, TextStyle::Quote);
                paragraph_break(&mut self.out);
            }
            "li" => {
                if !self.out.is_empty() && !self.out.ends_with("\n") {
                    line_break(&mut self.out);
                }
                self.out.push_str("• ");
                self.visit_children(node);
                line_break(&mut self.out);
            }
            "p" | "div" | "ul" | "ol" | "pre" | "table" | "tr" | "section" | "article"
            | "header" | "footer" => {
                paragraph_break(&mut self.out);
                self.visit_children(node);
                paragraph_break(&mut self.out);
            }
            _ => self.visit_children(node),
        }
    }

    fn styled(&mut self, node: &Rc<Node>, style: TextStyle) {
        let start = self.out.len();
        self.visit_children(node);
        self.out
            .add_span(start..self.out.len(), SpanKind::Style(style));
    }

    fn push_text(&mut self, text: &str) {
        for c in text.chars() {
            if c.is_whitespace() {
                let at_break = self.out.is_empty()
                    || self.out.ends_with(" ")
                    || self.out.ends_with("\n");
                if !at_break {
                    self.out.push_char(' ');
                }
            } else {
                self.out.push_char(c);
            }
        }
    }
}

fn attribute(attrs: &RefCell<Vec<html5ever::Attribute>>, name: &str) -> Option<String> {
    attrs
        .borrow()
        .iter()
        .find(|attr| attr.name.local.as_ref() == name)
        .map(|attr| attr.value.to_string())
}

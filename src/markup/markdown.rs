use log::trace;
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag};

use super::{ImageResolver, MarkupParser, line_break, paragraph_break};
use crate::error::RenderError;
use crate::styled_text::{SpanKind, StyledText, TextStyle};

/// Markdown to styled text, built on pulldown-cmark
#[derive(Debug, Default)]
pub struct MarkdownParser;

impl MarkdownParser {
    pub fn new() -> Self {
        MarkdownParser
    }
}

/// What to emit once an open construct is closed
#[derive(Clone, Copy)]
enum Break {
    None,
    Line,
    Paragraph,
    Cell,
}

/// An open inline or block construct waiting for its end event
enum Open {
    Style(TextStyle, usize, Break),
    Link(String, usize),
    Image,
    List(Option<u64>),
    Other(Break),
}

impl MarkupParser for MarkdownParser {
    fn parse(
        &self,
        source: &str,
        resolve_image: &mut ImageResolver<'_>,
    ) -> Result<StyledText, RenderError> {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_TASKLISTS);

        let mut out = StyledText::new();
        let mut stack: Vec<Open> = Vec::new();
        // Alt text of an image is not part of the rendered text
        let mut image_depth = 0usize;

        for event in Parser::new_ext(source, options) {
            match event {
                Event::Start(tag) => {
                    let open = match tag {
                        Tag::Image { dest_url, .. } => {
                            if image_depth == 0 {
                                let slot = resolve_image(dest_url.as_ref());
                                out.push_image(dest_url.to_string(), slot);
                            }
                            image_depth += 1;
                            Open::Image
                        }
                        _ if image_depth > 0 => Open::Other(Break::None),
                        Tag::Paragraph => Open::Other(Break::Paragraph),
                        Tag::Heading { level, .. } => {
                            paragraph_break(&mut out);
                            Open::Style(TextStyle::Heading(level as u8), out.len(), Break::Paragraph)
                        }
                        Tag::BlockQuote(..) => {
                            paragraph_break(&mut out);
                            Open::Style(TextStyle::Quote, out.len(), Break::Paragraph)
                        }
                        Tag::CodeBlock(kind) => {
                            paragraph_break(&mut out);
                            if let CodeBlockKind::Fenced(lang) = kind {
                                trace!("code block language: {lang}");
                            }
                            Open::Style(TextStyle::Monospace, out.len(), Break::Paragraph)
                        }
                        Tag::List(start) => {
                            paragraph_break(&mut out);
                            Open::List(start)
                        }
                        Tag::Item => {
                            if !out.is_empty() && !out.ends_with("\n") {
                                line_break(&mut out);
                            }
                            let counter = stack.iter_mut().rev().find_map(|open| match open {
                                Open::List(counter) => Some(counter),
                                _ => None,
                            });
                            let marker = match counter {
                                Some(Some(n)) => {
                                    let marker = format!("{n}. ");
                                    *n += 1;
                                    marker
                                }
                                _ => "• ".to_string(),
                            };
                            out.push_str(&marker);
                            Open::Other(Break::Line)
                        }
                        Tag::Table(_) => Open::Other(Break::Paragraph),
                        Tag::TableHead | Tag::TableRow => Open::Other(Break::Line),
                        Tag::TableCell => Open::Other(Break::Cell),
                        Tag::Emphasis => Open::Style(TextStyle::Italic, out.len(), Break::None),
                        Tag::Strong => Open::Style(TextStyle::Bold, out.len(), Break::None),
                        Tag::Strikethrough => {
                            Open::Style(TextStyle::Strikethrough, out.len(), Break::None)
                        }
                        Tag::Link { dest_url, .. } => Open::Link(dest_url.to_string(), out.len()),
                        _ => Open::Other(Break::None),
                    };
                    stack.push(open);
                }
                Event::End(_) => {
                    let Some(open) = stack.pop() else {
                        continue;
                    };
                    let after = match open {
                        Open::Image => {
                            image_depth = image_depth.saturating_sub(1);
                            continue;
                        }
                        _ if image_depth > 0 => continue,
                        Open::Style(style, start, after) => {
                            out.add_span(start..out.len(), SpanKind::Style(style));
                            after
                        }
                        Open::Link(url, start) => {
                            out.add_span(start..out.len(), SpanKind::Link(url));
                            Break::None
                        }
                        Open::List(_) => Break::Paragraph,
                        Open::Other(after) => after,
                    };
                    match after {
                        Break::None => {}
                        Break::Line => line_break(&mut out),
                        Break::Paragraph => paragraph_break(&mut out),
                        Break::Cell => out.push_char('\t'),
                    }
                }
                _ if image_depth > 0 => {}
                Event::Text(text) => out.push_str(&text),
                Event::Code(code) => {
                    let start = out.len();
                    out.push_str(&code);
                    out.add_span(start..out.len(), SpanKind::Style(TextStyle::Monospace));
                }
                Event::SoftBreak => out.push_char(' '),
                Event::HardBreak => line_break(&mut out),
                Event::Rule => {
                    paragraph_break(&mut out);
                    out.push_str("* * *");
                    paragraph_break(&mut out);
                }
                Event::TaskListMarker(done) => out.push_str(if done { "[x] " } else { "[ ] " }),
                _ => {}
            }
        }

        out.trim_end();
        Ok(out)
    }
}

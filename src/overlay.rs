//! Click handling for image and link regions

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::config::Callbacks;
use crate::sink::LinkMode;
use crate::styled_text::{SpanKind, StyledText};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
    /// Every image source of the render, in order, and the clicked one's index
    Image { sources: Arc<[String]>, index: usize },
    Link { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Handled,
    Ignored,
    /// The host should open this URL itself
    OpenUrl(String),
}

/// Click behavior attached to an image or link region
#[derive(Clone)]
pub struct Clickable {
    action: ClickAction,
    callbacks: Callbacks,
}

impl Clickable {
    pub fn new(action: ClickAction, callbacks: Callbacks) -> Self {
        Self { action, callbacks }
    }

    pub fn action(&self) -> &ClickAction {
        &self.action
    }

    pub fn click(&self) -> ClickOutcome {
        match &self.action {
            ClickAction::Image { sources, index } => match &self.callbacks.image_click {
                Some(callback) => {
                    callback(&sources[..], *index);
                    ClickOutcome::Handled
                }
                None => ClickOutcome::Ignored,
            },
            ClickAction::Link { url } => match &self.callbacks.url_click {
                Some(callback) if callback(url.as_str()) => ClickOutcome::Handled,
                Some(_) => ClickOutcome::OpenUrl(url.clone()),
                None => ClickOutcome::Ignored,
            },
        }
    }

    pub fn long_click(&self) -> bool {
        match &self.action {
            ClickAction::Image { sources, index } => self
                .callbacks
                .image_long_click
                .as_ref()
                .is_some_and(|callback| callback(&sources[..], *index)),
            ClickAction::Link { url } => self
                .callbacks
                .url_long_click
                .as_ref()
                .is_some_and(|callback| callback(url.as_str())),
        }
    }
}

impl fmt::Debug for Clickable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clickable")
            .field("action", &self.action)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

/// Replace the click behavior of every image and link region with one that
/// reports to `callbacks`.
pub fn attach_click_handlers(text: &mut StyledText, callbacks: &Callbacks) {
    let images: Vec<_> = text
        .images()
        .into_iter()
        .map(|(range, image)| (range, image.source.clone()))
        .collect();
    let sources: Arc<[String]> = images.iter().map(|(_, source)| source.clone()).collect();

    for (index, (range, _)) in images.iter().enumerate() {
        // Links wrapping the image keep only the parts outside it
        let mut split = Vec::new();
        text.retain_spans(|span| match &span.kind {
            SpanKind::Clickable(_) => !span.overlaps(range),
            SpanKind::Link(url) if span.overlaps(range) => {
                split.push((span.range.clone(), url.clone()));
                false
            }
            _ => true,
        });
        for (link, url) in split {
            text.add_span(link.start..range.start, SpanKind::Link(url.clone()));
            text.add_span(range.end..link.end, SpanKind::Link(url));
        }
        let action = ClickAction::Image {
            sources: Arc::clone(&sources),
            index,
        };
        text.add_span(
            range.clone(),
            SpanKind::Clickable(Clickable::new(action, callbacks.clone())),
        );
    }

    let links: Vec<_> = text
        .links()
        .into_iter()
        .map(|(range, url)| (range, url.to_string()))
        .collect();
    text.retain_spans(|span| !matches!(span.kind, SpanKind::Link(_)));
    for (range, url) in links {
        text.add_span(
            range,
            SpanKind::Clickable(Clickable::new(ClickAction::Link { url }, callbacks.clone())),
        );
    }
    debug!(
        "Attached click handlers to {} images and links",
        text.spans()
            .iter()
            .filter(|span| matches!(span.kind, SpanKind::Clickable(_)))
            .count()
    );
}

pub fn dispatch_click(text: &StyledText, offset: usize, mode: LinkMode) -> ClickOutcome {
    match mode {
        LinkMode::None => ClickOutcome::Ignored,
        LinkMode::Custom => clickable_at(text, offset)
            .map(Clickable::click)
            .unwrap_or(ClickOutcome::Ignored),
        LinkMode::Default => text
            .spans_at(offset)
            .find_map(|span| match &span.kind {
                SpanKind::Link(url) => Some(ClickOutcome::OpenUrl(url.clone())),
                _ => None,
            })
            .unwrap_or(ClickOutcome::Ignored),
    }
}

pub fn dispatch_long_click(text: &StyledText, offset: usize, mode: LinkMode) -> bool {
    match mode {
        LinkMode::Custom => clickable_at(text, offset).is_some_and(Clickable::long_click),
        LinkMode::None | LinkMode::Default => false,
    }
}

fn clickable_at(text: &StyledText, offset: usize) -> Option<&Clickable> {
    text.spans_at(offset).find_map(|span| match &span.kind {
        SpanKind::Clickable(clickable) => Some(clickable),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::styled_text::PlaceholderSlot;
    use std::sync::Mutex;

    fn sample() -> StyledText {
        let mut text = StyledText::plain("a ");
        text.push_image("one.png", PlaceholderSlot::transparent());
        text.push_str(" b ");
        let start = text.len();
        text.push_str("link");
        text.add_span(start..text.len(), SpanKind::Link("https://x.org".into()));
        text.push_str(" ");
        text.push_image("two.png", PlaceholderSlot::transparent());
        text
    }

    #[test]
    fn image_clicks_report_all_sources_and_index() {
        let clicks = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&clicks);
        let callbacks = Callbacks {
            image_click: Some(Arc::new(move |sources: &[String], index: usize| {
                seen.lock().unwrap().push((sources.to_vec(), index));
            })),
            ..Callbacks::default()
        };
        let mut text = sample();
        attach_click_handlers(&mut text, &callbacks);

        let second = text.images()[1].0.start;
        assert_eq!(dispatch_click(&text, second, LinkMode::Custom), ClickOutcome::Handled);
        assert_eq!(
            *clicks.lock().unwrap(),
            vec![(vec!["one.png".to_string(), "two.png".to_string()], 1)]
        );
    }

    #[test]
    fn links_are_replaced_by_clickables() {
        let mut text = sample();
        attach_click_handlers(&mut text, &Callbacks::default());

        assert!(text.links().is_empty());
        let link_offset = text.as_str().find("link").unwrap();
        // Forced clickable without callbacks: inert, and no default navigation
        assert_eq!(
            dispatch_click(&text, link_offset, LinkMode::Custom),
            ClickOutcome::Ignored
        );
        assert!(!dispatch_long_click(&text, link_offset, LinkMode::Custom));
    }

    #[test]
    fn previous_click_behavior_on_images_is_stripped() {
        let mut text = sample();
        let range = text.images()[0].0.clone();
        text.add_span(
            range,
            SpanKind::Clickable(Clickable::new(
                ClickAction::Link { url: "stale".into() },
                Callbacks::default(),
            )),
        );
        attach_click_handlers(&mut text, &Callbacks::default());

        let clickables: Vec<_> = text
            .spans()
            .iter()
            .filter_map(|span| match &span.kind {
                SpanKind::Clickable(c) => Some(c.action().clone()),
                _ => None,
            })
            .collect();
        assert_eq!(clickables.len(), 3);
        assert!(!clickables.contains(&ClickAction::Link { url: "stale".into() }));
    }

    #[test]
    fn image_inside_link_reports_image_click() {
        let clicks = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&clicks);
        let callbacks = Callbacks {
            image_click: Some(Arc::new(move |_: &[String], index: usize| {
                seen.lock().unwrap().push(index);
            })),
            url_click: Some(Arc::new(|_: &str| false)),
            ..Callbacks::default()
        };
        let mut text = StyledText::plain("see ");
        let start = text.len();
        text.push_image("pic.png", PlaceholderSlot::transparent());
        text.push_str(" here");
        text.add_span(start..text.len(), SpanKind::Link("https://x.org".into()));
        attach_click_handlers(&mut text, &callbacks);

        let image = text.images()[0].0.start;
        assert_eq!(dispatch_click(&text, image, LinkMode::Custom), ClickOutcome::Handled);
        assert_eq!(*clicks.lock().unwrap(), vec![0]);

        let after = text.as_str().find("here").unwrap();
        assert_eq!(
            dispatch_click(&text, after, LinkMode::Custom),
            ClickOutcome::OpenUrl("https://x.org".into())
        );
        assert_eq!(*clicks.lock().unwrap(), vec![0]);
    }

    #[test]
    fn url_click_falls_back_to_navigation_when_unhandled() {
        let callbacks = Callbacks {
            url_click: Some(Arc::new(|url: &str| url.starts_with("app:"))),
            url_long_click: Some(Arc::new(|_: &str| true)),
            ..Callbacks::default()
        };
        let mut text = sample();
        attach_click_handlers(&mut text, &callbacks);
        let offset = text.as_str().find("link").unwrap();

        assert_eq!(
            dispatch_click(&text, offset, LinkMode::Custom),
            ClickOutcome::OpenUrl("https://x.org".into())
        );
        assert!(dispatch_long_click(&text, offset, LinkMode::Custom));
    }

    #[test]
    fn default_mode_opens_links_and_none_mode_ignores() {
        let text = sample();
        let offset = text.as_str().find("link").unwrap();
        assert_eq!(
            dispatch_click(&text, offset, LinkMode::Default),
            ClickOutcome::OpenUrl("https://x.org".into())
        );
        assert_eq!(dispatch_click(&text, offset, LinkMode::None), ClickOutcome::Ignored);
        assert_eq!(dispatch_click(&text, 0, LinkMode::Default), ClickOutcome::Ignored);
    }
}

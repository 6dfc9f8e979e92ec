//! Render entry points
//!
//! [`RichTextEngine`] owns what renders share (cache, reuse guard, image
//! pipeline, parsers). [`RichText`] is one render of one source text; attaching
//! it to a sink parses the source, shows the result immediately and lets the
//! images stream in.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, info};

use crate::cache::RenderCache;
use crate::config::{RenderRequest, RenderRequestBuilder, Settings};
use crate::coordinator::{LoadCoordinator, RenderRun, RenderState};
use crate::error::RenderError;
use crate::guard::{RenderId, ReuseGuard};
use crate::images::{ImagePipeline, ImageRegistry};
use crate::markup::{self, MarkupKind, MarkupParser};
use crate::overlay;
use crate::sink::{DisplaySink, LinkMode, SinkId};
use crate::styled_text::{StyledText, Visual};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct EngineInner {
    settings: Settings,
    cache: Arc<Mutex<RenderCache>>,
    guard: Arc<Mutex<ReuseGuard>>,
    pipeline: Arc<dyn ImagePipeline>,
    html: Arc<dyn MarkupParser>,
    markdown: Arc<dyn MarkupParser>,
}

/// Shared render context. Cloning is cheap and clones share everything.
#[derive(Clone)]
pub struct RichTextEngine {
    inner: Arc<EngineInner>,
}

impl RichTextEngine {
    pub fn new(pipeline: Arc<dyn ImagePipeline>) -> Self {
        Self::builder(pipeline).build()
    }

    pub fn with_settings(settings: Settings, pipeline: Arc<dyn ImagePipeline>) -> Self {
        Self::builder(pipeline).settings(settings).build()
    }

    pub fn builder(pipeline: Arc<dyn ImagePipeline>) -> RichTextEngineBuilder {
        RichTextEngineBuilder {
            settings: Settings::default(),
            pipeline,
            html: None,
            markdown: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Request builder for HTML, seeded with the engine's defaults
    pub fn html(&self, source: impl Into<Arc<str>>) -> RenderRequestBuilder {
        RenderRequest::html(source).auto_fix(self.inner.settings.auto_fix)
    }

    /// Request builder for Markdown, seeded with the engine's defaults
    pub fn markdown(&self, source: impl Into<Arc<str>>) -> RenderRequestBuilder {
        RenderRequest::markdown(source).auto_fix(self.inner.settings.auto_fix)
    }

    pub fn render(&self, request: RenderRequest) -> RichText {
        RichText {
            engine: self.clone(),
            request,
            phase: Phase::Ready,
            binding: None,
        }
    }

    /// Frozen render cached for `source`, if any
    pub fn cached(&self, source: &str) -> Option<StyledText> {
        lock(&self.inner.cache).get(source)
    }

    pub fn cache_len(&self) -> usize {
        lock(&self.inner.cache).len()
    }

    pub fn clear_cache(&self) {
        lock(&self.inner.cache).clear_all();
    }

    /// Loads still tracked for whatever render `sink` shows
    pub fn active_loads(&self, sink: SinkId) -> usize {
        let mut guard = lock(&self.inner.guard);
        guard.prune();
        guard.active_loads(sink)
    }

    fn parser(&self, kind: MarkupKind) -> Arc<dyn MarkupParser> {
        match kind {
            MarkupKind::Html => Arc::clone(&self.inner.html),
            MarkupKind::Markdown => Arc::clone(&self.inner.markdown),
        }
    }

    fn visuals(&self, request: &RenderRequest) -> (Visual, Visual) {
        let placeholder = request
            .placeholder()
            .resolve()
            .unwrap_or_else(|| self.inner.settings.placeholder_visual());
        let error = request
            .error()
            .resolve()
            .unwrap_or_else(|| self.inner.settings.error_visual());
        (placeholder, error)
    }
}

#[must_use]
pub struct RichTextEngineBuilder {
    settings: Settings,
    pipeline: Arc<dyn ImagePipeline>,
    html: Option<Arc<dyn MarkupParser>>,
    markdown: Option<Arc<dyn MarkupParser>>,
}

impl RichTextEngineBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the built-in parser for `kind`
    pub fn parser(mut self, kind: MarkupKind, parser: Arc<dyn MarkupParser>) -> Self {
        match kind {
            MarkupKind::Html => self.html = Some(parser),
            MarkupKind::Markdown => self.markdown = Some(parser),
        }
        self
    }

    pub fn build(self) -> RichTextEngine {
        let cache = RenderCache::new(self.settings.cache_capacity);
        debug!(
            "Render engine ready (cache capacity {})",
            cache.capacity()
        );
        RichTextEngine {
            inner: Arc::new(EngineInner {
                cache: Arc::new(Mutex::new(cache)),
                guard: Arc::new(Mutex::new(ReuseGuard::new())),
                pipeline: self.pipeline,
                html: self
                    .html
                    .unwrap_or_else(|| markup::default_parser(MarkupKind::Html)),
                markdown: self
                    .markdown
                    .unwrap_or_else(|| markup::default_parser(MarkupKind::Markdown)),
                settings: self.settings,
            }),
        }
    }
}

enum Phase {
    Ready,
    Running(Arc<RenderRun>),
    /// Served from the cache, already final
    Cached(StyledText),
}

struct Binding {
    sink: SinkId,
    render: RenderId,
    target: Weak<dyn DisplaySink>,
}

/// One render of one source text
pub struct RichText {
    engine: RichTextEngine,
    request: RenderRequest,
    phase: Phase,
    binding: Option<Binding>,
}

impl RichText {
    pub fn request(&self) -> &RenderRequest {
        &self.request
    }

    /// Show the render in `sink`.
    ///
    /// An already loaded render (or a cached one) is shown as is, with no
    /// parsing and no image loads. Otherwise the source is parsed, the sink
    /// gets the text with placeholders right away, and images load on the
    /// sink's next refresh tick.
    pub fn attach<S: DisplaySink + 'static>(&mut self, sink: &Arc<S>) -> Result<(), RenderError> {
        let sink: Arc<dyn DisplaySink> = Arc::clone(sink) as Arc<dyn DisplaySink>;
        self.request.validate()?;
        sink.set_link_mode(self.request.link_mode());

        let render = RenderId::next();
        lock(&self.engine.inner.guard).bind(&sink, render);
        self.binding = Some(Binding {
            sink: sink.id(),
            render,
            target: Arc::downgrade(&sink),
        });

        let text = match self.generate(&sink, render) {
            Ok(text) => text,
            Err(e) => {
                lock(&self.engine.inner.guard).release(sink.id(), render);
                self.binding = None;
                return Err(e);
            }
        };
        sink.set_text(text);
        Ok(())
    }

    fn generate(
        &mut self,
        sink: &Arc<dyn DisplaySink>,
        render: RenderId,
    ) -> Result<StyledText, RenderError> {
        if let Some(frozen) = self.frozen_text() {
            debug!("Reusing loaded render for sink {:?}", sink.id());
            return Ok(frozen);
        }

        let source = self.request.source_arc();
        if let Some(hit) = self.engine.cached(&source) {
            info!("Render cache hit ({} bytes of source)", source.len());
            self.phase = Phase::Cached(hit.clone());
            return Ok(hit);
        }

        let engine = &self.engine;
        let kind = self.request.kind();
        debug!("Cache miss, rendering {kind} source ({} bytes)", source.len());
        let run = Arc::new(RenderRun::new(
            render,
            Arc::clone(&source),
            sink,
            Arc::clone(&engine.inner.cache),
            Arc::clone(&engine.inner.guard),
        ));
        let (placeholder, error) = engine.visuals(&self.request);
        let mut registry = ImageRegistry::for_source(kind, &source);
        let mut coordinator = LoadCoordinator::new(
            &run,
            &self.request,
            &engine.inner.pipeline,
            sink,
            placeholder,
            error,
        );

        let parsed = engine
            .parser(kind)
            .parse(&source, &mut |image: &str| coordinator.resolve(&mut registry, image));
        let handles = coordinator.into_handles();
        let mut text = match parsed {
            Ok(text) => text,
            Err(e) => {
                for handle in &handles {
                    handle.recycle();
                }
                return Err(e);
            }
        };

        if self.request.link_mode() == LinkMode::Custom {
            overlay::attach_click_handlers(&mut text, self.request.callbacks());
        }
        debug!(
            "Parsed {kind} render {:?}: {} chars, {} images, {} loads",
            render,
            text.len(),
            registry.len(),
            handles.len()
        );

        lock(&engine.inner.guard).track(sink.id(), render, handles);
        run.set_live(text.clone());
        self.phase = Phase::Running(Arc::clone(&run));
        run.finish_parse();
        Ok(text)
    }

    /// Cancel pending loads, blank the sink and forget the cached result.
    /// The render can be attached again afterwards.
    pub fn clear(&mut self) {
        if let Some(binding) = self.binding.take() {
            let still_shown = {
                let mut guard = lock(&self.engine.inner.guard);
                let shown = guard.active_render(binding.sink) == Some(binding.render);
                let recycled = guard.release(binding.sink, binding.render);
                debug!("Cleared render {:?}, recycled {recycled} loads", binding.render);
                shown
            };
            if still_shown {
                if let Some(sink) = binding.target.upgrade() {
                    sink.set_text(StyledText::new());
                }
            }
        }
        lock(&self.engine.inner.cache).clear(self.request.source());
        self.phase = Phase::Ready;
    }

    pub fn state(&self) -> RenderState {
        match &self.phase {
            Phase::Ready => RenderState::Ready,
            Phase::Running(run) => run.state(),
            Phase::Cached(_) => RenderState::Loaded,
        }
    }

    /// Final text, once every image reached a terminal state
    pub fn frozen_text(&self) -> Option<StyledText> {
        match &self.phase {
            Phase::Ready => None,
            Phase::Running(run) => run.frozen(),
            Phase::Cached(text) => Some(text.clone()),
        }
    }

    /// Loads issued by the current attach and still outstanding
    pub fn pending_loads(&self) -> usize {
        match &self.phase {
            Phase::Running(run) if run.state() == RenderState::Loading => {
                let tracker = run.tracker();
                tracker.prepared().saturating_sub(tracker.loaded())
            }
            _ => 0,
        }
    }
}

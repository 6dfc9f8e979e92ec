//! Image load coordination
//!
//! While the parser runs, every visible image gets a placeholder slot and a
//! load. Loads are issued on the sink's next refresh tick, and their results
//! are applied back on the owner thread. When the last outstanding load of a
//! render reports in, the render is frozen and written to the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use log::{debug, info, warn};

use crate::cache::RenderCache;
use crate::config::{ImageFixCallback, RenderRequest};
use crate::guard::{RenderId, ReuseGuard};
use crate::images::pipeline::{CancelToken, LoadId};
use crate::images::{
    DecodeKind, DecodedImage, ImagePipeline, ImageReference, ImageRegistry, ImageSource,
    LoadHandle, LoadRequest, LoadResult, LoadTarget, ScaleType,
};
use crate::markup::MarkupKind;
use crate::sink::{DisplaySink, SinkId};
use crate::styled_text::{ImageVisual, PlaceholderSlot, StyledText, Visual};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Ready,
    Loading,
    Loaded,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    prepared: usize,
    loaded: usize,
    sealed: bool,
    finalized: bool,
}

impl Counts {
    fn try_finalize(&mut self) -> bool {
        if self.sealed && !self.finalized && self.loaded >= self.prepared {
            self.finalized = true;
            return true;
        }
        false
    }
}

/// Prepared/loaded bookkeeping for one render.
///
/// Increment and comparison happen under one lock, so of any number of
/// completions racing each other exactly one is told to finalize.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    counts: Mutex<Counts>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A load was issued
    pub fn prepare(&self) {
        let mut counts = lock(&self.counts);
        if counts.sealed {
            warn!("Load prepared after parsing finished");
        }
        counts.prepared += 1;
    }

    /// Parsing finished, no more loads will be prepared. Returns true if every
    /// prepared load has already completed (or there were none) and the caller
    /// must finalize.
    pub fn seal(&self) -> bool {
        let mut counts = lock(&self.counts);
        counts.sealed = true;
        counts.try_finalize()
    }

    /// A load reached a terminal state. Returns true for the one call that
    /// completes the set.
    pub fn complete(&self) -> bool {
        let mut counts = lock(&self.counts);
        if counts.loaded >= counts.prepared {
            warn!(
                "Completion without a pending load ({}/{})",
                counts.loaded, counts.prepared
            );
            return false;
        }
        counts.loaded += 1;
        counts.try_finalize()
    }

    pub fn prepared(&self) -> usize {
        lock(&self.counts).prepared
    }

    pub fn loaded(&self) -> usize {
        lock(&self.counts).loaded
    }

    pub fn is_finalized(&self) -> bool {
        lock(&self.counts).finalized
    }
}

/// Shared state of one attach of a render
pub(crate) struct RenderRun {
    id: RenderId,
    source: Arc<str>,
    tracker: CompletionTracker,
    live: Mutex<StyledText>,
    frozen: OnceLock<StyledText>,
    sink_id: SinkId,
    sink: Weak<dyn DisplaySink>,
    cache: Arc<Mutex<RenderCache>>,
    guard: Arc<Mutex<ReuseGuard>>,
}

impl RenderRun {
    pub fn new(
        id: RenderId,
        source: Arc<str>,
        sink: &Arc<dyn DisplaySink>,
        cache: Arc<Mutex<RenderCache>>,
        guard: Arc<Mutex<ReuseGuard>>,
    ) -> Self {
        Self {
            id,
            source,
            tracker: CompletionTracker::new(),
            live: Mutex::new(StyledText::new()),
            frozen: OnceLock::new(),
            sink_id: sink.id(),
            sink: Arc::downgrade(sink),
            cache,
            guard,
        }
    }

    pub fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }

    pub fn state(&self) -> RenderState {
        if self.frozen.get().is_some() {
            RenderState::Loaded
        } else {
            RenderState::Loading
        }
    }

    pub fn frozen(&self) -> Option<StyledText> {
        self.frozen.get().cloned()
    }

    pub fn set_live(&self, text: StyledText) {
        *lock(&self.live) = text;
    }

    fn live_snapshot(&self) -> StyledText {
        lock(&self.live).freeze()
    }

    /// Parsing is over. A render with no outstanding loads finalizes here.
    pub fn finish_parse(&self) {
        if self.tracker.seal() {
            debug!("Render {:?} has no pending images", self.id);
            self.finalize(Some(self.live_snapshot()));
        }
    }

    /// Completion signal of one load. `None` means "freeze whatever the sink
    /// currently shows".
    pub fn done(&self, value: Option<StyledText>) {
        if self.tracker.complete() {
            self.finalize(value);
        }
    }

    fn finalize(&self, value: Option<StyledText>) {
        let frozen = match value {
            Some(text) => text,
            None => match self.sink.upgrade() {
                Some(sink) => sink.text().freeze(),
                None => {
                    debug!("Sink gone before render {:?} finished", self.id);
                    return;
                }
            },
        };
        if self.frozen.set(frozen.clone()).is_err() {
            return;
        }
        lock(&self.cache).put(&self.source, frozen);
        // Every load has settled; the guard no longer needs their handles
        lock(&self.guard).settle(self.sink_id, self.id);
        info!(
            "Render {:?} loaded ({} images)",
            self.id,
            self.tracker.prepared()
        );
    }
}

/// Size for an auto-fixed image: as wide as the sink at most, aspect kept
pub fn auto_fit(intrinsic: (u32, u32), max_width: u32) -> (u32, u32) {
    let (width, height) = intrinsic;
    if max_width == 0 || width <= max_width {
        return (width, height);
    }
    let scaled = (u64::from(height) * u64::from(max_width) / u64::from(width)).max(1);
    (max_width, u32::try_from(scaled).unwrap_or(u32::MAX))
}

/// Image side of a parse: resolves image tokens into slots and issues loads
pub(crate) struct LoadCoordinator<'a> {
    run: &'a Arc<RenderRun>,
    request: &'a RenderRequest,
    pipeline: &'a Arc<dyn ImagePipeline>,
    sink: &'a Arc<dyn DisplaySink>,
    placeholder: Visual,
    error: Visual,
    handles: Vec<LoadHandle>,
    /// HTML slots by registry index; repeated sources share one slot and load
    shared: HashMap<usize, PlaceholderSlot>,
}

impl<'a> LoadCoordinator<'a> {
    pub fn new(
        run: &'a Arc<RenderRun>,
        request: &'a RenderRequest,
        pipeline: &'a Arc<dyn ImagePipeline>,
        sink: &'a Arc<dyn DisplaySink>,
        placeholder: Visual,
        error: Visual,
    ) -> Self {
        Self {
            run,
            request,
            pipeline,
            sink,
            placeholder,
            error,
            handles: Vec::new(),
            shared: HashMap::new(),
        }
    }

    /// Resolver for one image token found by the parser
    pub fn resolve(&mut self, registry: &mut ImageRegistry, source: &str) -> PlaceholderSlot {
        if self.request.suppress_images() {
            return PlaceholderSlot::transparent();
        }

        let index = registry.register(source);
        if let Some(slot) = self.shared.get(&index) {
            return slot.clone();
        }
        let Some(reference) = registry.get_mut(index) else {
            return PlaceholderSlot::transparent();
        };
        if let Some(fix) = self.request.manual_fix() {
            fix.on_fix(reference, false);
            if !reference.is_visible() {
                debug!("Image {source} hidden by fix callback");
                return PlaceholderSlot::transparent();
            }
        }

        let slot = PlaceholderSlot::new(self.placeholder.clone());
        let handle = self.issue_load(reference.clone(), slot.clone());
        self.handles.push(handle);
        if registry.kind() == MarkupKind::Html {
            self.shared.insert(index, slot.clone());
        }
        slot
    }

    /// Register a load for `reference` that fills `slot`, issued on the next
    /// refresh tick of the sink.
    pub fn issue_load(&self, reference: ImageReference, slot: PlaceholderSlot) -> LoadHandle {
        let kind = if reference.is_animated() {
            DecodeKind::Animated
        } else {
            DecodeKind::Static
        };
        let (size_override, scale) = match self.request.manual_fix() {
            Some(_) => match reference.declared_size() {
                Some(size) => (Some(size), reference.scale()),
                None => (None, ScaleType::None),
            },
            None => (None, ScaleType::None),
        };
        let request = LoadRequest {
            source: ImageSource::resolve(reference.source()),
            kind,
            size_override,
            scale,
            placeholder: self.placeholder.clone(),
            error: self.error.clone(),
        };

        let handle = LoadHandle::new(reference.source());
        self.run.tracker().prepare();
        debug!(
            "Issuing load {:?} for {} ({kind:?}, size {size_override:?})",
            handle.id(),
            reference.source()
        );

        let target = ImageTarget {
            run: Arc::clone(self.run),
            slot,
            reference,
            token: handle.token(),
            sink: Arc::downgrade(self.sink),
            auto_fix: self.request.auto_fix(),
            fix: self.request.manual_fix().cloned(),
            error: self.error.clone(),
        };
        let load_target = target.into_load_target(handle.id());
        let pipeline = Arc::clone(self.pipeline);
        let token = handle.token();
        self.sink.post(Box::new(move || {
            if token.is_cancelled() {
                return;
            }
            pipeline.load(request, load_target);
        }));
        handle
    }

    pub fn into_handles(self) -> Vec<LoadHandle> {
        self.handles
    }
}

/// Receives one load's outcome and patches it into the render
struct ImageTarget {
    run: Arc<RenderRun>,
    slot: PlaceholderSlot,
    reference: ImageReference,
    token: CancelToken,
    sink: Weak<dyn DisplaySink>,
    auto_fix: bool,
    fix: Option<Arc<dyn ImageFixCallback>>,
    error: Visual,
}

impl ImageTarget {
    fn into_load_target(self, id: LoadId) -> LoadTarget {
        let token = self.token.clone();
        LoadTarget::new(id, token, move |result| self.post_result(result))
    }

    /// Results may arrive on any thread; hop onto the owner thread first
    fn post_result(self, result: LoadResult) {
        let Some(sink) = self.sink.upgrade() else {
            debug!("Sink gone, dropping image {}", self.reference.source());
            return;
        };
        sink.post(Box::new(move || self.apply(result)));
    }

    fn apply(mut self, result: LoadResult) {
        if self.token.is_cancelled() {
            debug!("Dropping stale image {}", self.reference.source());
            return;
        }
        let Some(sink) = self.sink.upgrade() else {
            debug!("Sink gone, dropping image {}", self.reference.source());
            return;
        };

        match result {
            Ok(image) => {
                let (width, height) = self.final_bounds(&image, sink.content_width());
                self.slot
                    .set(Visual::Image(ImageVisual { image, width, height }));
                sink.refresh();
                let snapshot = self.run.live_snapshot();
                self.run.done(Some(snapshot));
            }
            Err(e) => {
                warn!("Image {} failed to load: {e}", self.reference.source());
                self.slot.set(self.error.clone());
                sink.refresh();
                self.run.done(None);
            }
        }
    }

    fn final_bounds(&mut self, image: &DecodedImage, content_width: u32) -> (u32, u32) {
        let intrinsic = image.dimensions();
        if self.auto_fix {
            return auto_fit(intrinsic, content_width);
        }
        if let Some(fix) = &self.fix {
            fix.on_fix(&mut self.reference, true);
        }
        self.reference.declared_size().unwrap_or(intrinsic)
    }
}

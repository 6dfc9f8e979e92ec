//! Sink reuse guard
//!
//! Each sink has at most one active render. Binding a sink to a new render
//! recycles every load handle of the render it showed before, so a reused sink
//! (a recycled list row, say) never receives images from stale content.
//! Bindings of dropped sinks are pruned, and a render that finished loading
//! keeps its binding but none of its handles.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use crate::images::LoadHandle;
use crate::sink::{DisplaySink, SinkId};

/// Identity of one attach of a render
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderId(pub u64);

impl RenderId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct Binding {
    render: RenderId,
    target: Weak<dyn DisplaySink>,
    handles: Vec<LoadHandle>,
}

#[derive(Default)]
pub struct ReuseGuard {
    active: HashMap<SinkId, Binding>,
}

impl ReuseGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `render` the sink's active render, recycling whatever was bound
    /// before. Returns the number of recycled handles.
    pub fn bind(&mut self, target: &Arc<dyn DisplaySink>, render: RenderId) -> usize {
        self.prune();
        let sink = target.id();
        let recycled = self
            .active
            .remove(&sink)
            .map(|previous| recycle(previous.handles))
            .unwrap_or(0);
        if recycled > 0 {
            debug!("Recycled {recycled} stale loads on sink {sink:?}");
        }
        self.active.insert(
            sink,
            Binding {
                render,
                target: Arc::downgrade(target),
                handles: Vec::new(),
            },
        );
        recycled
    }

    /// Track handles for the sink's active render. Handles for a render that
    /// is no longer bound are recycled immediately.
    pub fn track(&mut self, sink: SinkId, render: RenderId, handles: Vec<LoadHandle>) {
        match self.active.get_mut(&sink) {
            Some(binding) if binding.render == render => binding.handles.extend(handles),
            _ => {
                recycle(handles);
            }
        }
    }

    /// Drop the sink's binding if it belongs to `render`, recycling its loads
    pub fn release(&mut self, sink: SinkId, render: RenderId) -> usize {
        if self.active_render(sink) != Some(render) {
            return 0;
        }
        self.active
            .remove(&sink)
            .map(|binding| recycle(binding.handles))
            .unwrap_or(0)
    }

    /// All loads of `render` reached a terminal state: drop its handles but
    /// keep it as the sink's active render
    pub fn settle(&mut self, sink: SinkId, render: RenderId) -> usize {
        match self.active.get_mut(&sink) {
            Some(binding) if binding.render == render => {
                let settled = binding.handles.len();
                binding.handles.clear();
                settled
            }
            _ => 0,
        }
    }

    /// Drop bindings whose sink no longer exists, recycling their loads.
    /// Returns the number of bindings removed.
    pub fn prune(&mut self) -> usize {
        let before = self.active.len();
        self.active.retain(|sink, binding| {
            if binding.target.strong_count() > 0 {
                return true;
            }
            let recycled = recycle(std::mem::take(&mut binding.handles));
            debug!("Sink {sink:?} is gone, recycled {recycled} loads");
            false
        });
        before - self.active.len()
    }

    pub fn active_render(&self, sink: SinkId) -> Option<RenderId> {
        self.active.get(&sink).map(|binding| binding.render)
    }

    pub fn active_loads(&self, sink: SinkId) -> usize {
        self.active
            .get(&sink)
            .map(|binding| binding.handles.len())
            .unwrap_or(0)
    }

    pub fn bound_sinks(&self) -> usize {
        self.active.len()
    }
}

fn recycle(handles: Vec<LoadHandle>) -> usize {
    for handle in &handles {
        handle.recycle();
    }
    handles.len()
}

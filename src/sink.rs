//! Display sink boundary
//!
//! A sink is the widget that shows the styled text. It is driven from one
//! owner thread; work that has to run there (issuing loads, applying finished
//! images) is queued with [`DisplaySink::post`] and runs on the next refresh
//! tick.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use log::debug;

use crate::overlay::{self, ClickOutcome};
use crate::styled_text::StyledText;

pub type Task = Box<dyn FnOnce() + Send>;

/// Identity of a sink instance, used as the reuse guard key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

impl SinkId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// How the sink treats clicks on links and images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkMode {
    /// No click handling at all
    None,
    /// Links open their URL
    #[default]
    Default,
    /// Clicks go to the clickable spans attached by the overlay
    Custom,
}

pub trait DisplaySink: Send + Sync {
    fn id(&self) -> SinkId;

    fn set_text(&self, text: StyledText);

    /// Current live content
    fn text(&self) -> StyledText;

    fn set_link_mode(&self, mode: LinkMode);

    /// Run `task` on the owner thread at the next refresh tick
    fn post(&self, task: Task);

    /// Width available to auto-fixed images, in pixels
    fn content_width(&self) -> u32;

    /// An image slot changed; redraw
    fn refresh(&self) {}
}

#[derive(Default)]
struct BufferState {
    text: StyledText,
    link_mode: LinkMode,
}

/// In-memory sink with an explicit task queue.
///
/// Whoever owns it plays the owner thread: call [`BufferSink::run_pending`]
/// (or [`BufferSink::run_until`]) to drain posted tasks.
pub struct BufferSink {
    id: SinkId,
    width: u32,
    state: Mutex<BufferState>,
    task_tx: Sender<Task>,
    task_rx: Receiver<Task>,
    refreshes: AtomicUsize,
}

impl BufferSink {
    pub fn new(width: u32) -> Arc<Self> {
        let (task_tx, task_rx) = flume::unbounded();
        Arc::new(Self {
            id: SinkId::next(),
            width,
            state: Mutex::new(BufferState::default()),
            task_tx,
            task_rx,
            refreshes: AtomicUsize::new(0),
        })
    }

    /// Run every task queued so far, including tasks they queue in turn
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.task_rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Run tasks as they arrive until `done` holds or `timeout` passes.
    /// Returns whether `done` held.
    pub fn run_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.task_rx.recv_timeout(remaining) {
                Ok(task) => task(),
                Err(flume::RecvTimeoutError::Timeout) => return done(),
                Err(flume::RecvTimeoutError::Disconnected) => return done(),
            }
        }
    }

    pub fn pending_tasks(&self) -> usize {
        self.task_rx.len()
    }

    pub fn link_mode(&self) -> LinkMode {
        self.lock().link_mode
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub fn click(&self, offset: usize) -> ClickOutcome {
        let (text, mode) = {
            let state = self.lock();
            (state.text.clone(), state.link_mode)
        };
        overlay::dispatch_click(&text, offset, mode)
    }

    pub fn long_click(&self, offset: usize) -> bool {
        let (text, mode) = {
            let state = self.lock();
            (state.text.clone(), state.link_mode)
        };
        overlay::dispatch_long_click(&text, offset, mode)
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DisplaySink for BufferSink {
    fn id(&self) -> SinkId {
        self.id
    }

    fn set_text(&self, text: StyledText) {
        self.lock().text = text;
    }

    fn text(&self) -> StyledText {
        self.lock().text.clone()
    }

    fn set_link_mode(&self, mode: LinkMode) {
        self.lock().link_mode = mode;
    }

    fn post(&self, task: Task) {
        if self.task_tx.send(task).is_err() {
            debug!("Sink {:?} task queue closed", self.id);
        }
    }

    fn content_width(&self) -> u32 {
        self.width
    }

    fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }
}

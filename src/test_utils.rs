//! Helpers for driving renders in tests

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::{Rgba, RgbaImage};

use crate::error::LoadError;
use crate::images::{DecodedImage, ImagePipeline, ImageSource, LoadRequest, LoadTarget};

/// Solid-color still image
pub fn solid_image(width: u32, height: u32) -> DecodedImage {
    DecodedImage::Still(Arc::new(RgbaImage::from_pixel(
        width,
        height,
        Rgba([0x33, 0x66, 0x99, 0xFF]),
    )))
}

struct ScriptedLoad {
    request: LoadRequest,
    target: Option<LoadTarget>,
}

/// Pipeline that records every load and completes it only when the test
/// says so, in whatever order the test picks.
#[derive(Default)]
pub struct ScriptedPipeline {
    loads: Mutex<Vec<ScriptedLoad>>,
}

impl ScriptedPipeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ScriptedLoad>> {
        self.loads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of loads the pipeline received
    pub fn issued(&self) -> usize {
        self.lock().len()
    }

    pub fn requests(&self) -> Vec<LoadRequest> {
        self.lock().iter().map(|load| load.request.clone()).collect()
    }

    /// Sources of all received loads; inline data shows as `<N bytes>`
    pub fn sources(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|load| match &load.request.source {
                ImageSource::Url(url) => url.clone(),
                ImageSource::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
            })
            .collect()
    }

    /// Whether load `index` was recycled by its render
    pub fn is_cancelled(&self, index: usize) -> bool {
        self.lock()
            .get(index)
            .and_then(|load| load.target.as_ref())
            .is_some_and(LoadTarget::is_cancelled)
    }

    /// Deliver a `width` x `height` image to load `index`. Returns false if
    /// there is no such load or it was already completed.
    pub fn succeed(&self, index: usize, width: u32, height: u32) -> bool {
        self.complete(index, Ok(solid_image(width, height)))
    }

    pub fn fail(&self, index: usize) -> bool {
        self.complete(
            index,
            Err(LoadError::fetch(format!("load #{index}"), "scripted failure")),
        )
    }

    /// Succeed every outstanding load with the same size
    pub fn succeed_all(&self, width: u32, height: u32) -> usize {
        let count = self.issued();
        (0..count)
            .filter(|&index| self.succeed(index, width, height))
            .count()
    }

    fn complete(&self, index: usize, result: Result<DecodedImage, LoadError>) -> bool {
        // Deliver outside the lock; delivery posts back into the sink
        let target = self
            .lock()
            .get_mut(index)
            .and_then(|load| load.target.take());
        match target {
            Some(target) => {
                target.deliver(result);
                true
            }
            None => false,
        }
    }
}

impl ImagePipeline for ScriptedPipeline {
    fn load(&self, request: LoadRequest, target: LoadTarget) {
        self.lock().push(ScriptedLoad {
            request,
            target: Some(target),
        });
    }
}

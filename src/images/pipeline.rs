//! Boundary to the image fetch/decode pipeline
//!
//! The coordinator hands a [`LoadRequest`] and a [`LoadTarget`] to an
//! [`ImagePipeline`]. The pipeline runs the load wherever it likes and reports
//! the outcome through the target exactly once. A target whose handle has been
//! recycled swallows the delivery.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use image::{Frame, RgbaImage};
use log::debug;

use super::inline::decode_data_uri;
use super::registry::ScaleType;
use crate::error::LoadError;
use crate::styled_text::Visual;

/// Where the pixels come from
#[derive(Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    Bytes(Arc<[u8]>),
}

impl ImageSource {
    /// Inline base64 data becomes bytes, anything else is a URL
    pub fn resolve(source: &str) -> Self {
        match decode_data_uri(source) {
            Some(bytes) => ImageSource::Bytes(bytes),
            None => ImageSource::Url(source.to_string()),
        }
    }
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
            ImageSource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeKind {
    Static,
    Animated,
}

#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub source: ImageSource,
    pub kind: DecodeKind,
    /// Target size in pixels; `None` leaves sizing to the display sink
    pub size_override: Option<(u32, u32)>,
    pub scale: ScaleType,
    pub placeholder: Visual,
    pub error: Visual,
}

#[derive(Clone)]
pub enum DecodedImage {
    Still(Arc<RgbaImage>),
    Animated(Arc<Vec<Frame>>),
}

impl DecodedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            DecodedImage::Still(image) => image.dimensions(),
            DecodedImage::Animated(frames) => frames
                .first()
                .map(|frame| frame.buffer().dimensions())
                .unwrap_or((0, 0)),
        }
    }

    pub fn is_animated(&self) -> bool {
        matches!(self, DecodedImage::Animated(_))
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.dimensions();
        match self {
            DecodedImage::Still(_) => write!(f, "Still({width}x{height})"),
            DecodedImage::Animated(frames) => {
                write!(f, "Animated({width}x{height}, {} frames)", frames.len())
            }
        }
    }
}

pub type LoadResult = Result<DecodedImage, LoadError>;

pub trait ImagePipeline: Send + Sync {
    /// Start a load. Must not block; the outcome goes to `target`.
    fn load(&self, request: LoadRequest, target: LoadTarget);
}

/// Identifies one issued load
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LoadId(pub u64);

impl LoadId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Cancellation side of a load, held by the reuse guard
#[derive(Debug)]
pub struct LoadHandle {
    id: LoadId,
    source: String,
    dead: Arc<AtomicBool>,
}

impl LoadHandle {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: LoadId::next(),
            source: source.into(),
            dead: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> LoadId {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Cancel the load; nothing it delivers afterwards is applied
    pub fn recycle(&self) {
        if !self.dead.swap(true, Ordering::AcqRel) {
            debug!("Recycled load {:?} for {}", self.id, self.source);
        }
    }

    pub fn is_recycled(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub(crate) fn token(&self) -> CancelToken {
        CancelToken(Arc::clone(&self.dead))
    }
}

/// Read side of a handle's cancellation flag
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

type Deliver = Box<dyn FnOnce(LoadResult) + Send>;

/// Completion side of a load, handed to the pipeline
pub struct LoadTarget {
    id: LoadId,
    token: CancelToken,
    deliver: Deliver,
}

impl LoadTarget {
    pub fn new(
        id: LoadId,
        token: CancelToken,
        deliver: impl FnOnce(LoadResult) + Send + 'static,
    ) -> Self {
        Self {
            id,
            token,
            deliver: Box::new(deliver),
        }
    }

    pub fn id(&self) -> LoadId {
        self.id
    }

    /// Pipelines may check this to skip work nobody will see
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deliver(self, result: LoadResult) {
        if self.token.is_cancelled() {
            debug!("Dropping delivery for recycled load {:?}", self.id);
            return;
        }
        (self.deliver)(result);
    }
}

impl fmt::Debug for LoadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadTarget")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

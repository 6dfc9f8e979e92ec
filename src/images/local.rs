//! Threaded image pipeline for local files and inline data
//!
//! Requests go onto a shared queue that a small pool of worker threads pulls
//! from, the same fan-out layout the PDF renderer uses. Remote URLs are not
//! fetched: they fail with [`LoadError::Fetch`] and the render shows the error
//! visual for them.

use std::fs;
use std::io::Cursor;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fast_image_resize as fr;
use flume::{Receiver, Sender};
use image::codecs::gif::GifDecoder;
use image::imageops::{self, FilterType};
use image::{AnimationDecoder, Frame, RgbaImage};
use log::{debug, warn};

use super::pipeline::{
    DecodeKind, DecodedImage, ImagePipeline, ImageSource, LoadRequest, LoadResult, LoadTarget,
};
use super::registry::ScaleType;
use crate::error::LoadError;

pub const DEFAULT_WORKERS: usize = 2;

struct Job {
    request: LoadRequest,
    target: LoadTarget,
}

pub struct LocalImagePipeline {
    request_tx: Sender<Job>,
    num_workers: usize,
}

impl LocalImagePipeline {
    /// Spawn `num_workers` loader threads. Relative paths resolve against
    /// `base_dir` when one is given.
    pub fn new(num_workers: usize, base_dir: Option<PathBuf>) -> Self {
        let (request_tx, request_rx) = flume::unbounded();
        let mut spawned = 0;
        for index in 0..num_workers.max(1) {
            let rx = request_rx.clone();
            let base_dir = base_dir.clone();
            let result = std::thread::Builder::new()
                .name(format!("richtext-loader-{index}"))
                .spawn(move || load_worker(rx, base_dir));
            match result {
                Ok(_) => spawned += 1,
                Err(e) => warn!("Failed to spawn image loader thread: {e}"),
            }
        }
        Self {
            request_tx,
            num_workers: spawned,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }
}

impl ImagePipeline for LocalImagePipeline {
    fn load(&self, request: LoadRequest, target: LoadTarget) {
        if let Err(flume::SendError(job)) = self.request_tx.send(Job { request, target }) {
            warn!("Image loader queue is closed");
            job.target.deliver(Err(LoadError::Cancelled));
        }
    }
}

fn load_worker(rx: Receiver<Job>, base_dir: Option<PathBuf>) {
    while let Ok(Job { request, target }) = rx.recv() {
        if target.is_cancelled() {
            debug!("Skipping cancelled load {:?}", target.id());
            continue;
        }
        let result = load_image(&request, base_dir.as_deref());
        if let Err(e) = &result {
            warn!("Image load {:?} failed: {e}", target.id());
        }
        target.deliver(result);
    }
    debug!("Image loader worker exiting");
}

/// Fetch, decode and size one image on the calling thread
pub fn load_image(request: &LoadRequest, base_dir: Option<&Path>) -> LoadResult {
    let bytes = read_source(&request.source, base_dir)?;
    let image = decode(&bytes, request.kind)?;
    match request.size_override {
        Some((width, height)) if width > 0 && height > 0 => {
            Ok(apply_scale(image, width, height, request.scale))
        }
        _ => Ok(image),
    }
}

fn read_source(source: &ImageSource, base_dir: Option<&Path>) -> Result<Arc<[u8]>, LoadError> {
    let url = match source {
        ImageSource::Bytes(bytes) => return Ok(Arc::clone(bytes)),
        ImageSource::Url(url) => url,
    };

    let location = url.strip_prefix("file://").unwrap_or(url);
    if location.contains("://") {
        return Err(LoadError::fetch(url, "only local files are supported"));
    }

    let path = Path::new(location);
    let path = match base_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    };
    fs::read(&path)
        .map(Arc::from)
        .map_err(|e| LoadError::fetch(url, format!("{}: {e}", path.display())))
}

fn decode(bytes: &[u8], kind: DecodeKind) -> Result<DecodedImage, LoadError> {
    if kind == DecodeKind::Animated {
        match decode_frames(bytes) {
            Ok(frames) if !frames.is_empty() => {
                return Ok(DecodedImage::Animated(Arc::new(frames)));
            }
            Ok(_) => debug!("Animated image has no frames, decoding as still"),
            Err(e) => debug!("Animated decode failed ({e}), decoding as still"),
        }
    }
    let image = image::load_from_memory(bytes).map_err(|e| LoadError::Decode(e.to_string()))?;
    Ok(DecodedImage::Still(Arc::new(image.to_rgba8())))
}

fn decode_frames(bytes: &[u8]) -> image::ImageResult<Vec<Frame>> {
    let decoder = GifDecoder::new(Cursor::new(bytes))?;
    decoder.into_frames().collect_frames()
}

/// Size an image into a `width` x `height` box according to `scale`
pub fn apply_scale(image: DecodedImage, width: u32, height: u32, scale: ScaleType) -> DecodedImage {
    match image {
        DecodedImage::Still(still) => {
            DecodedImage::Still(Arc::new(scale_buffer(&still, width, height, scale)))
        }
        DecodedImage::Animated(frames) => {
            let scaled = frames
                .iter()
                .map(|frame| {
                    let buffer = scale_buffer(frame.buffer(), width, height, scale);
                    Frame::from_parts(buffer, frame.left(), frame.top(), frame.delay())
                })
                .collect();
            DecodedImage::Animated(Arc::new(scaled))
        }
    }
}

fn scale_buffer(src: &RgbaImage, width: u32, height: u32, scale: ScaleType) -> RgbaImage {
    let (src_width, src_height) = src.dimensions();
    if src_width == 0 || src_height == 0 {
        return src.clone();
    }
    let ratio_x = width as f32 / src_width as f32;
    let ratio_y = height as f32 / src_height as f32;
    let scaled_dims = |ratio: f32| {
        (
            ((src_width as f32 * ratio).round() as u32).max(1),
            ((src_height as f32 * ratio).round() as u32).max(1),
        )
    };

    match scale {
        ScaleType::None => resize(src, width, height),
        ScaleType::FitCenter => {
            let (w, h) = scaled_dims(ratio_x.min(ratio_y));
            resize(src, w, h)
        }
        ScaleType::CenterCrop => {
            let (w, h) = scaled_dims(ratio_x.max(ratio_y));
            let covered = resize(src, w.max(width), h.max(height));
            let x = (covered.width() - width) / 2;
            let y = (covered.height() - height) / 2;
            imageops::crop_imm(&covered, x, y, width, height).to_image()
        }
    }
}

fn resize(src: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if src.dimensions() == (width, height) {
        return src.clone();
    }
    match fast_resize(src, width, height) {
        Ok(resized) => resized,
        Err(e) => {
            warn!("Fast resize failed: {e}, falling back to slow resize");
            imageops::resize(src, width, height, FilterType::Lanczos3)
        }
    }
}

/// Resize with fast_image_resize (Lanczos3)
fn fast_resize(
    src: &RgbaImage,
    new_width: u32,
    new_height: u32,
) -> Result<RgbaImage, Box<dyn std::error::Error>> {
    let (src_width, src_height) = src.dimensions();

    let src_image = fr::Image::from_vec_u8(
        NonZeroU32::new(src_width).ok_or("Invalid width")?,
        NonZeroU32::new(src_height).ok_or("Invalid height")?,
        src.as_raw().clone(),
        fr::PixelType::U8x4,
    )?;

    let dst_width = NonZeroU32::new(new_width).ok_or("Invalid target width")?;
    let dst_height = NonZeroU32::new(new_height).ok_or("Invalid target height")?;
    let mut dst_image = fr::Image::new(dst_width, dst_height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new(fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3));
    resizer.resize(&src_image.view(), &mut dst_image.view_mut())?;

    RgbaImage::from_raw(new_width, new_height, dst_image.into_vec())
        .ok_or_else(|| "Failed to create ImageBuffer".into())
}

pub mod inline;
pub mod local;
pub mod pipeline;
pub mod registry;

pub use local::LocalImagePipeline;
pub use pipeline::{
    DecodeKind, DecodedImage, ImagePipeline, ImageSource, LoadHandle, LoadRequest, LoadResult,
    LoadTarget,
};
pub use registry::{ImageReference, ImageRegistry, ScaleType};

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod guard;
pub mod images;
pub mod markup;
pub mod overlay;
pub mod rich_text;
pub mod sink;
pub mod styled_text;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cache::RenderCache;
pub use config::{Callbacks, ImageFixCallback, RenderRequest, RenderRequestBuilder, Settings};
pub use coordinator::RenderState;
pub use error::{LoadError, RenderError};
pub use images::{ImagePipeline, ImageReference, LocalImagePipeline, ScaleType};
pub use markup::{MarkupKind, MarkupParser};
pub use overlay::{ClickAction, ClickOutcome};
pub use rich_text::{RichText, RichTextEngine, RichTextEngineBuilder};
pub use sink::{BufferSink, DisplaySink, LinkMode};
pub use styled_text::{Color, ResourceId, StyledText, Visual};

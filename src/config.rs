//! Render configuration
//!
//! [`RenderRequest`] is the immutable per-render configuration, built through
//! [`RenderRequestBuilder`]. [`Settings`] holds engine-wide defaults and can be
//! read from a YAML file.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::RenderError;
use crate::images::ImageReference;
use crate::markup::MarkupKind;
use crate::sink::LinkMode;
use crate::styled_text::{Color, ResourceId, Visual};

const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "richtext";

pub type ImageClickFn = dyn Fn(&[String], usize) + Send + Sync;
pub type ImageLongClickFn = dyn Fn(&[String], usize) -> bool + Send + Sync;
/// Returns true if the click was handled; false falls back to opening the URL
pub type UrlClickFn = dyn Fn(&str) -> bool + Send + Sync;
pub type UrlLongClickFn = dyn Fn(&str) -> bool + Send + Sync;

/// Manual size/visibility fix for images.
///
/// Called with `loaded == false` before a load is issued (mark the reference
/// invisible to skip it) and with `loaded == true` once the image arrived, to
/// adjust the final bounds. Only consulted when auto-fix is off.
pub trait ImageFixCallback: Send + Sync {
    fn on_fix(&self, image: &mut ImageReference, loaded: bool);
}

impl<F> ImageFixCallback for F
where
    F: Fn(&mut ImageReference, bool) + Send + Sync,
{
    fn on_fix(&self, image: &mut ImageReference, loaded: bool) {
        self(image, loaded)
    }
}

#[derive(Clone, Default)]
pub struct Callbacks {
    pub image_click: Option<Arc<ImageClickFn>>,
    pub image_long_click: Option<Arc<ImageLongClickFn>>,
    pub url_click: Option<Arc<UrlClickFn>>,
    pub url_long_click: Option<Arc<UrlLongClickFn>>,
}

impl Callbacks {
    pub fn any(&self) -> bool {
        self.image_click.is_some()
            || self.image_long_click.is_some()
            || self.url_click.is_some()
            || self.url_long_click.is_some()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("image_click", &self.image_click.is_some())
            .field("image_long_click", &self.image_long_click.is_some())
            .field("url_click", &self.url_click.is_some())
            .field("url_long_click", &self.url_long_click.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClickPolicy {
    /// Custom handling only when a callback is set, default link behavior otherwise
    #[default]
    Unset,
    Enabled,
    Disabled,
}

impl ClickPolicy {
    pub fn link_mode(self, has_callbacks: bool) -> LinkMode {
        match self {
            ClickPolicy::Enabled => LinkMode::Custom,
            ClickPolicy::Disabled => LinkMode::None,
            ClickPolicy::Unset if has_callbacks => LinkMode::Custom,
            ClickPolicy::Unset => LinkMode::Default,
        }
    }
}

/// Placeholder or error visual: an explicit visual, a host resource, or both.
/// The resource wins when both are set.
#[derive(Debug, Clone, Default)]
pub struct VisualSource {
    pub visual: Option<Visual>,
    pub resource: Option<ResourceId>,
}

impl VisualSource {
    pub fn resolve(&self) -> Option<Visual> {
        match (self.resource, &self.visual) {
            (Some(id), _) => Some(Visual::Resource(id)),
            (None, Some(visual)) => Some(visual.clone()),
            (None, None) => None,
        }
    }
}

/// Immutable description of one render
#[derive(Clone)]
pub struct RenderRequest {
    source: Arc<str>,
    kind: MarkupKind,
    auto_fix: bool,
    suppress_images: bool,
    click_policy: ClickPolicy,
    placeholder: VisualSource,
    error: VisualSource,
    callbacks: Callbacks,
    fix: Option<Arc<dyn ImageFixCallback>>,
}

impl RenderRequest {
    /// Builder for an HTML render
    pub fn builder(source: impl Into<Arc<str>>) -> RenderRequestBuilder {
        RenderRequestBuilder::new(source.into(), MarkupKind::Html)
    }

    pub fn html(source: impl Into<Arc<str>>) -> RenderRequestBuilder {
        RenderRequestBuilder::new(source.into(), MarkupKind::Html)
    }

    pub fn markdown(source: impl Into<Arc<str>>) -> RenderRequestBuilder {
        RenderRequestBuilder::new(source.into(), MarkupKind::Markdown)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn source_arc(&self) -> Arc<str> {
        Arc::clone(&self.source)
    }

    pub fn kind(&self) -> MarkupKind {
        self.kind
    }

    pub fn auto_fix(&self) -> bool {
        self.auto_fix
    }

    pub fn suppress_images(&self) -> bool {
        self.suppress_images
    }

    pub fn click_policy(&self) -> ClickPolicy {
        self.click_policy
    }

    pub fn link_mode(&self) -> LinkMode {
        self.click_policy.link_mode(self.callbacks.any())
    }

    pub fn placeholder(&self) -> &VisualSource {
        &self.placeholder
    }

    pub fn error(&self) -> &VisualSource {
        &self.error
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    /// Fix callback, if it applies to this render (auto-fix off)
    pub fn manual_fix(&self) -> Option<&Arc<dyn ImageFixCallback>> {
        if self.auto_fix {
            None
        } else {
            self.fix.as_ref()
        }
    }

    /// Checked again when the request is attached to a sink
    pub fn validate(&self) -> Result<(), RenderError> {
        for (name, source) in [("placeholder", &self.placeholder), ("error", &self.error)] {
            if source.resource == Some(ResourceId(0)) {
                return Err(RenderError::InvalidRequest(format!(
                    "{name} resource id must be positive"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for RenderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderRequest")
            .field("kind", &self.kind)
            .field("source_len", &self.source.len())
            .field("auto_fix", &self.auto_fix)
            .field("suppress_images", &self.suppress_images)
            .field("click_policy", &self.click_policy)
            .field("callbacks", &self.callbacks)
            .field("fix", &self.fix.is_some())
            .finish()
    }
}

/// Consuming builder for [`RenderRequest`]
#[must_use]
pub struct RenderRequestBuilder {
    request: RenderRequest,
}

impl RenderRequestBuilder {
    fn new(source: Arc<str>, kind: MarkupKind) -> Self {
        Self {
            request: RenderRequest {
                source,
                kind,
                auto_fix: true,
                suppress_images: false,
                click_policy: ClickPolicy::Unset,
                placeholder: VisualSource::default(),
                error: VisualSource::default(),
                callbacks: Callbacks::default(),
                fix: None,
            },
        }
    }

    pub fn kind(mut self, kind: MarkupKind) -> Self {
        self.request.kind = kind;
        self
    }

    /// Size images to the sink's width (default true)
    pub fn auto_fix(mut self, auto_fix: bool) -> Self {
        self.request.auto_fix = auto_fix;
        self
    }

    /// Replace every image with a transparent placeholder and load nothing
    pub fn no_image(mut self, no_image: bool) -> Self {
        self.request.suppress_images = no_image;
        self
    }

    pub fn clickable(mut self, clickable: bool) -> Self {
        self.request.click_policy = if clickable {
            ClickPolicy::Enabled
        } else {
            ClickPolicy::Disabled
        };
        self
    }

    pub fn placeholder(mut self, visual: Visual) -> Self {
        self.request.placeholder.visual = Some(visual);
        self
    }

    pub fn placeholder_res(mut self, id: ResourceId) -> Self {
        self.request.placeholder.resource = Some(id);
        self
    }

    pub fn error(mut self, visual: Visual) -> Self {
        self.request.error.visual = Some(visual);
        self
    }

    pub fn error_res(mut self, id: ResourceId) -> Self {
        self.request.error.resource = Some(id);
        self
    }

    pub fn image_click(mut self, f: impl Fn(&[String], usize) + Send + Sync + 'static) -> Self {
        self.request.callbacks.image_click = Some(Arc::new(f));
        self
    }

    pub fn image_long_click(
        mut self,
        f: impl Fn(&[String], usize) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.request.callbacks.image_long_click = Some(Arc::new(f));
        self
    }

    pub fn url_click(mut self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.request.callbacks.url_click = Some(Arc::new(f));
        self
    }

    pub fn url_long_click(mut self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.request.callbacks.url_long_click = Some(Arc::new(f));
        self
    }

    pub fn fix(mut self, callback: impl ImageFixCallback + 'static) -> Self {
        self.request.fix = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Result<RenderRequest, RenderError> {
        self.request.validate()?;
        Ok(self.request)
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_loader_workers")]
    pub loader_workers: usize,

    #[serde(default = "default_placeholder_color")]
    pub placeholder_color: String,

    #[serde(default = "default_error_color")]
    pub error_color: String,

    #[serde(default = "default_true")]
    pub auto_fix: bool,
}

fn default_true() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    50
}

fn default_loader_workers() -> usize {
    crate::images::local::DEFAULT_WORKERS
}

fn default_placeholder_color() -> String {
    "#CCCCCC".to_string()
}

fn default_error_color() -> String {
    "#888888".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            loader_workers: default_loader_workers(),
            placeholder_color: default_placeholder_color(),
            error_color: default_error_color(),
            auto_fix: true,
        }
    }
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {path:?}"))?;
        let settings = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse settings file: {path:?}"))?;
        info!("Loaded settings from {path:?}");
        Ok(settings)
    }

    /// Settings from the default location, or defaults if there is no file
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No settings file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn placeholder_visual(&self) -> Visual {
        Visual::Color(Color::from_hex(&self.placeholder_color).unwrap_or(Color::LIGHT_GRAY))
    }

    pub fn error_visual(&self) -> Visual {
        Visual::Color(Color::from_hex(&self.error_color).unwrap_or(Color::GRAY))
    }
}

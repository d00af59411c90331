//! Sandboxed viewer injection for detected identifiers.
//!
//! The [`Embedder`] turns an identifier into a [`ViewerRequest`] (resolved
//! address plus presentation hints from the namespaced query parameters)
//! and hands it to a [`ViewerHost`], which owns the actual rendering.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EmbedConfig;
use crate::constants;
use crate::detector::{Detector, Document, NodeId};
use crate::uri::UriCodec;

/// Tag used for injected viewer elements.
pub const VIEWER_TAG: &str = "iframe";

/// Suggested viewer height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewerHeight {
    /// 200px.
    Compact,
    /// 350px.
    #[default]
    Standard,
    /// 500px.
    Tall,
}

impl ViewerHeight {
    /// Parse a `height` hint; `None` for unknown values.
    #[must_use]
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "standard" => Some(Self::Standard),
            "tall" => Some(Self::Tall),
            _ => None,
        }
    }

    /// Height in pixels.
    #[must_use]
    pub const fn pixels(self) -> u32 {
        match self {
            Self::Compact => constants::VIEWER_HEIGHT_COMPACT,
            Self::Standard => constants::VIEWER_HEIGHT_STANDARD,
            Self::Tall => constants::VIEWER_HEIGHT_TALL,
        }
    }
}

/// Presentation hints for one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewerOptions {
    /// Suggested height.
    pub height: ViewerHeight,
    /// Accent color as `#rrggbb` (lowercase), if a valid one was given.
    pub color: Option<String>,
}

impl ViewerOptions {
    /// Read `height` and `color` from namespaced parameters.
    ///
    /// Unknown heights fall back to standard; colors must be exactly six
    /// hex digits, optionally prefixed with `#`, and are dropped otherwise.
    #[must_use]
    pub fn from_params(params: &BTreeMap<String, String>) -> Self {
        let height = params
            .get("height")
            .and_then(|hint| {
                let parsed = ViewerHeight::from_hint(hint);
                if parsed.is_none() {
                    log::debug!("Ignoring unknown height hint '{hint}'");
                }
                parsed
            })
            .unwrap_or_default();
        let color = params
            .get("color")
            .map(String::as_str)
            .and_then(normalize_color);
        Self { height, color }
    }
}

fn normalize_color(raw: &str) -> Option<String> {
    let hex = raw.strip_prefix('#').unwrap_or(raw);
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(format!("#{}", hex.to_ascii_lowercase()))
    } else {
        log::debug!("Ignoring invalid color hint '{raw}'");
        None
    }
}

/// What to load, and how to present it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerRequest {
    /// The identifier as found (or the address, if given one directly).
    pub identifier: String,
    /// Loadable address.
    pub address: String,
    /// Presentation hints.
    pub options: ViewerOptions,
}

/// Renders sandboxed viewers.
#[async_trait]
pub trait ViewerHost: Send + Sync {
    /// Load `request`; resolve once loaded, fail if loading failed.
    async fn load(&self, request: &ViewerRequest) -> anyhow::Result<()>;
}

/// Result of one embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerOutcome {
    /// The viewer finished loading.
    Loaded,
    /// The host reported an error.
    Failed(String),
    /// Loading did not finish within the load timeout.
    TimedOut,
}

/// A viewer placed into a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedViewer {
    /// The viewer element.
    pub element: NodeId,
    /// What was loaded.
    pub request: ViewerRequest,
    /// How loading went.
    pub outcome: ViewerOutcome,
}

/// Resolves identifiers and drives a [`ViewerHost`].
pub struct Embedder {
    codec: UriCodec,
    config: EmbedConfig,
    host: Arc<dyn ViewerHost>,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("codec", &self.codec)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Embedder {
    /// Create an embedder.
    #[must_use]
    pub fn new(codec: UriCodec, config: EmbedConfig, host: Arc<dyn ViewerHost>) -> Self {
        Self {
            codec,
            config,
            host,
        }
    }

    /// Resolve `identifier` into a request. Non-identifiers pass through as
    /// addresses with default options.
    #[must_use]
    pub fn prepare(&self, identifier: &str) -> ViewerRequest {
        match self.codec.parse(identifier) {
            Some(parsed) => ViewerRequest {
                identifier: identifier.to_string(),
                address: self.codec.address_of(&parsed),
                options: ViewerOptions::from_params(&parsed.namespaced_params),
            },
            None => ViewerRequest {
                identifier: identifier.to_string(),
                address: self.codec.to_address(identifier),
                options: ViewerOptions::default(),
            },
        }
    }

    /// Load a viewer for `identifier`, bounded by the load timeout.
    pub async fn embed(&self, identifier: &str) -> ViewerOutcome {
        let request = self.prepare(identifier);
        self.load(&request).await
    }

    /// Replace every identifier under the detector's root with a viewer.
    ///
    /// Occurrences are taken from one full scan; within each text node they
    /// are replaced last-to-first so earlier spans stay valid. Results come
    /// back in document order.
    pub async fn embed_document(
        &self,
        document: &Document,
        detector: &Detector,
    ) -> Vec<EmbeddedViewer> {
        let occurrences = detector.find_all();
        let mut placed = Vec::with_capacity(occurrences.len());

        for occurrence in occurrences.iter().rev() {
            let element = match document.replace_span(&occurrence.span, VIEWER_TAG) {
                Ok(element) => element,
                Err(e) => {
                    log::warn!("Cannot embed {}: {e}", occurrence.identifier);
                    continue;
                }
            };
            let request = self.prepare(&occurrence.identifier);
            if let Err(e) = self.decorate(document, element, &request) {
                log::warn!("Cannot decorate viewer for {}: {e}", occurrence.identifier);
            }
            placed.push((element, request));
        }
        placed.reverse();

        let mut viewers = Vec::with_capacity(placed.len());
        for (element, request) in placed {
            let outcome = self.load(&request).await;
            let state = match &outcome {
                ViewerOutcome::Loaded => "loaded",
                ViewerOutcome::Failed(_) => "error",
                ViewerOutcome::TimedOut => "timeout",
            };
            if let Err(e) = document.set_attribute(element, "data-state", state) {
                log::warn!("Cannot mark viewer state: {e}");
            }
            viewers.push(EmbeddedViewer {
                element,
                request,
                outcome,
            });
        }
        viewers
    }

    fn decorate(
        &self,
        document: &Document,
        element: NodeId,
        request: &ViewerRequest,
    ) -> Result<(), crate::detector::DetectorError> {
        document.set_attribute(element, "src", &request.address)?;
        document.set_attribute(element, "sandbox", "allow-scripts allow-forms")?;
        document.set_attribute(
            element,
            "height",
            &request.options.height.pixels().to_string(),
        )?;
        if let Some(color) = &request.options.color {
            document.set_attribute(element, "data-color", color)?;
        }
        document.set_attribute(element, "data-state", "loading")
    }

    async fn load(&self, request: &ViewerRequest) -> ViewerOutcome {
        match tokio::time::timeout(self.config.load_timeout, self.host.load(request)).await {
            Ok(Ok(())) => {
                log::debug!("Viewer loaded {}", request.address);
                ViewerOutcome::Loaded
            }
            Ok(Err(e)) => {
                log::warn!("Viewer failed to load {}: {e:#}", request.address);
                ViewerOutcome::Failed(format!("{e:#}"))
            }
            Err(_) => {
                log::warn!(
                    "Viewer load timed out after {:?}: {}",
                    self.config.load_timeout,
                    request.address
                );
                ViewerOutcome::TimedOut
            }
        }
    }
}

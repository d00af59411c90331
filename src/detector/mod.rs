//! Continuous discovery of scheme identifiers in a live text tree.
//!
//! A [`Detector`] watches one subtree of a [`Document`] and reports every
//! identifier occurrence to a callback, together with a [`TextSpan`]
//! covering exactly the matched text.
//!
//! # Scanning
//!
//! `start()` runs one full scan right away, then follows the document's
//! [`Mutation`] stream. The first mutation after a quiet period triggers an
//! immediate rescan; further mutations within the throttle window coalesce
//! into one trailing rescan when the window closes.
//!
//! Within a text node all matches are collected before any callback runs.
//! Just before its callback each span is forwarded through any
//! [`Document::replace_span`] splits made so far (see
//! [`Document::resolve_span`]) and re-validated, so a callback that replaces
//! one occurrence still gets every later occurrence of the same node, with
//! a span pointing at where that text lives now. Spans whose text was
//! otherwise edited away are skipped. A failing or panicking callback is
//! logged and the scan moves on.
//!
//! # De-duplication
//!
//! With `DetectorConfig::dedupe` on, full scans remember `(node, start,
//! identifier)` keys and never report the same key twice until
//! [`Detector::reset`] or [`Detector::stop`]. [`Detector::scan_node`] never
//! consults the ledger.

pub mod document;
pub mod pattern;

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::DetectorConfig;
use crate::events::panic_message;

pub use document::{Document, Mutation, NodeId, TextSpan};
pub use pattern::{Found, IdentifierPattern};

/// Failures touching the document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectorError {
    /// No such node.
    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),

    /// The node was removed from the tree.
    #[error("Node {0:?} is detached")]
    Detached(NodeId),

    /// Expected a text node.
    #[error("Node {0:?} is not a text node")]
    NotText(NodeId),

    /// Expected an element.
    #[error("Node {0:?} is not an element")]
    NotElement(NodeId),

    /// The root (or an orphan) cannot be removed or split.
    #[error("Node {0:?} has no parent")]
    NotRemovable(NodeId),

    /// The span no longer fits the node's text.
    #[error("Span {0:?} no longer matches its node")]
    StaleSpan(TextSpan),

    /// The identifier pattern failed to compile.
    #[error("Invalid identifier pattern: {0}")]
    Pattern(String),
}

/// One reported identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    /// Text node containing the identifier.
    pub node: NodeId,
    /// Matched identifier.
    pub identifier: String,
    /// Exact range of `identifier` in `node`.
    pub span: TextSpan,
}

/// Called once per reported occurrence.
pub type OccurrenceCallback = Arc<dyn Fn(&Occurrence) -> anyhow::Result<()> + Send + Sync>;

type Ledger = HashMap<NodeId, HashSet<(usize, String)>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Delivered,
    Failed,
}

struct Scanner {
    document: Arc<Document>,
    root: NodeId,
    config: DetectorConfig,
    pattern: IdentifierPattern,
    callback: OccurrenceCallback,
    ledger: Mutex<Ledger>,
}

/// Watches a subtree for identifiers.
pub struct Detector {
    scanner: Arc<Scanner>,
    watch: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("root", &self.scanner.root)
            .field("token", &self.scanner.pattern.token())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Detector {
    /// Detector for `<scheme>://` identifiers under `root`.
    ///
    /// # Errors
    ///
    /// [`DetectorError::Pattern`] if `scheme` yields an unusable pattern.
    pub fn new<F>(
        document: Arc<Document>,
        root: NodeId,
        scheme: &str,
        config: DetectorConfig,
        callback: F,
    ) -> Result<Self, DetectorError>
    where
        F: Fn(&Occurrence) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let pattern =
            IdentifierPattern::new(scheme).map_err(|e| DetectorError::Pattern(e.to_string()))?;
        Ok(Self {
            scanner: Arc::new(Scanner {
                document,
                root,
                config,
                pattern,
                callback: Arc::new(callback),
                ledger: Mutex::new(HashMap::new()),
            }),
            watch: Mutex::new(None),
        })
    }

    /// Scan now, then keep rescanning on document changes.
    ///
    /// Must be called inside a tokio runtime. Calling it while already
    /// running only performs the immediate scan.
    pub fn start(&self) {
        if self.is_running() {
            self.scanner.scan_all();
            return;
        }

        // Subscribe first so changes made during the initial scan count.
        let mutations = self.scanner.document.subscribe();
        self.scanner.scan_all();

        let scanner = Arc::clone(&self.scanner);
        let task = tokio::spawn(async move { scanner.follow(mutations).await });
        if let Some(previous) = self.watch().replace(task) {
            previous.abort();
        }
        log::debug!("Detector started");
    }

    /// Stop watching, cancel any queued rescan and forget reported keys.
    pub fn stop(&self) {
        if let Some(task) = self.watch().take() {
            task.abort();
            log::debug!("Detector stopped");
        }
        self.scanner.clear_ledger();
    }

    /// [`Detector::stop`], after which `start()` reports everything again.
    pub fn reset(&self) {
        self.stop();
        self.scanner.clear_ledger();
    }

    /// Whether the mutation watch is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.watch().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// One full scan right now (honours de-duplication).
    ///
    /// Returns the number of occurrences reported.
    pub fn scan(&self) -> usize {
        self.scanner.scan_all()
    }

    /// Scan one text node immediately, reporting every match.
    ///
    /// Bypasses throttling and de-duplication. Returns, in order, the
    /// identifiers handed to the callback (including ones whose callback
    /// failed).
    pub fn scan_node(&self, node: NodeId) -> Vec<String> {
        let Some(text) = self.scanner.document.text(node) else {
            log::debug!("scan_node on non-text node {node:?}");
            return Vec::new();
        };
        let mut identifiers = Vec::new();
        let mut failed = 0;
        for occurrence in self.scanner.occurrences_in(node, &text) {
            let Some(current) = self.scanner.locate(&occurrence) else {
                continue;
            };
            if self.scanner.report(&current) == Delivery::Failed {
                failed += 1;
            }
            identifiers.push(current.identifier);
        }
        if failed > 0 {
            log::debug!("scan_node {node:?}: {failed} callback(s) failed");
        }
        identifiers
    }

    /// Every occurrence under the root, without reporting or recording.
    #[must_use]
    pub fn find_all(&self) -> Vec<Occurrence> {
        self.scanner
            .document
            .text_nodes(self.scanner.root, |tag| self.scanner.skips(tag))
            .into_iter()
            .flat_map(|(node, text)| self.scanner.occurrences_in(node, &text))
            .collect()
    }

    fn watch(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.watch.lock().expect("Detector watch mutex poisoned")
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        if let Some(task) = self.watch().take() {
            task.abort();
        }
    }
}

impl Scanner {
    fn skips(&self, tag: &str) -> bool {
        self.config
            .skip_tags
            .iter()
            .any(|skip| skip.eq_ignore_ascii_case(tag))
    }

    fn occurrences_in(&self, node: NodeId, text: &str) -> Vec<Occurrence> {
        self.pattern
            .find_all(text)
            .into_iter()
            .map(|found| Occurrence {
                node,
                span: TextSpan {
                    node,
                    start: found.start,
                    end: found.end,
                },
                identifier: found.text,
            })
            .collect()
    }

    fn scan_all(&self) -> usize {
        let nodes = self.document.text_nodes(self.root, |tag| self.skips(tag));
        let mut reported = 0;
        for (node, text) in nodes {
            for occurrence in self.occurrences_in(node, &text) {
                let Some(current) = self.locate(&occurrence) else {
                    continue;
                };
                if self.config.dedupe && self.already_reported(&current) {
                    continue;
                }
                let delivery = self.report(&current);
                if self.config.dedupe {
                    self.mark(&current);
                }
                if delivery == Delivery::Delivered {
                    reported += 1;
                }
            }
        }
        log::trace!("Full scan reported {reported} occurrence(s)");
        reported
    }

    fn already_reported(&self, occurrence: &Occurrence) -> bool {
        let ledger = self.ledger.lock().expect("Detector ledger mutex poisoned");
        ledger.get(&occurrence.node).is_some_and(|keys| {
            keys.contains(&(occurrence.span.start, occurrence.identifier.clone()))
        })
    }

    fn mark(&self, occurrence: &Occurrence) {
        let mut ledger = self.ledger.lock().expect("Detector ledger mutex poisoned");
        ledger
            .entry(occurrence.node)
            .or_default()
            .insert((occurrence.span.start, occurrence.identifier.clone()));
    }

    fn clear_ledger(&self) {
        self.ledger
            .lock()
            .expect("Detector ledger mutex poisoned")
            .clear();
    }

    /// Where `occurrence` lives now, or `None` if its text is gone.
    fn locate(&self, occurrence: &Occurrence) -> Option<Occurrence> {
        let span = self.document.resolve_span(&occurrence.span);
        match self.document.span_text(&span) {
            Ok(current) if current == occurrence.identifier => Some(Occurrence {
                node: span.node,
                identifier: current,
                span,
            }),
            Ok(current) => {
                log::warn!(
                    "Skipping {}: span now holds '{current}'",
                    occurrence.identifier
                );
                None
            }
            Err(e) => {
                log::warn!("Skipping {}: {e}", occurrence.identifier);
                None
            }
        }
    }

    fn report(&self, occurrence: &Occurrence) -> Delivery {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(occurrence))) {
            Ok(Ok(())) => Delivery::Delivered,
            Ok(Err(e)) => {
                log::warn!("Detector callback failed for {}: {e:#}", occurrence.identifier);
                Delivery::Failed
            }
            Err(panic) => {
                log::warn!(
                    "Detector callback panicked for {}: {}",
                    occurrence.identifier,
                    panic_message(panic.as_ref())
                );
                Delivery::Failed
            }
        }
    }

    /// Throttled rescan loop: leading scan on the first change, one
    /// trailing scan for everything that arrives inside the window.
    async fn follow(&self, mut mutations: mpsc::UnboundedReceiver<Mutation>) {
        let throttle = self.config.throttle;
        let mut window_end: Option<Instant> = None;
        let mut queued = false;

        loop {
            let deadline = window_end.unwrap_or_else(Instant::now);
            tokio::select! {
                mutation = mutations.recv() => {
                    let Some(mutation) = mutation else {
                        log::debug!("Document mutation stream closed");
                        break;
                    };
                    log::trace!("Observed {mutation:?}");
                    if window_end.is_some() {
                        queued = true;
                    } else {
                        self.scan_all();
                        window_end = Some(Instant::now() + throttle);
                    }
                }
                () = tokio::time::sleep_until(deadline), if window_end.is_some() => {
                    if queued {
                        queued = false;
                        self.scan_all();
                        window_end = Some(Instant::now() + throttle);
                    } else {
                        window_end = None;
                    }
                }
            }
        }
    }
}

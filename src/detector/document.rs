//! Minimal text tree with change notifications.
//!
//! Nodes live in an arena addressed by [`NodeId`]. Removed nodes stay in
//! the arena but are detached, so stale handles fail cleanly instead of
//! pointing at reused slots. Every structural or text change is broadcast
//! as a [`Mutation`] to subscribers, which is what drives the detector's
//! incremental rescans.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use tokio::sync::mpsc;

use super::DetectorError;

/// Handle to a node in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Byte range `[start, end)` within one text node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextSpan {
    /// Text node the range belongs to.
    pub node: NodeId,
    /// Start byte offset.
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

/// A change to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// `child` was inserted under `parent`.
    ChildAdded {
        /// New parent.
        parent: NodeId,
        /// Inserted node.
        child: NodeId,
    },
    /// A text node's content changed.
    TextChanged(NodeId),
    /// A node (and its subtree) was detached.
    Removed(NodeId),
}

#[derive(Debug, Clone)]
enum NodeKind {
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attached: bool,
}

/// Text at and after `at` moved to the start of `tail`.
#[derive(Debug, Clone, Copy)]
struct Split {
    at: usize,
    tail: NodeId,
}

#[derive(Debug)]
struct Tree {
    nodes: Vec<Node>,
    splits: HashMap<NodeId, Vec<Split>>,
}

impl Tree {
    fn node(&self, id: NodeId) -> Result<&Node, DetectorError> {
        self.nodes.get(id.0).ok_or(DetectorError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, DetectorError> {
        self.nodes.get_mut(id.0).ok_or(DetectorError::UnknownNode(id))
    }

    fn attached(&self, id: NodeId) -> Result<&Node, DetectorError> {
        let node = self.node(id)?;
        if node.attached {
            Ok(node)
        } else {
            Err(DetectorError::Detached(id))
        }
    }

    fn push(&mut self, kind: NodeKind, parent: NodeId, index: Option<usize>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
            attached: true,
        });
        let siblings = &mut self.nodes[parent.0].children;
        match index {
            Some(i) if i <= siblings.len() => siblings.insert(i, id),
            _ => siblings.push(id),
        }
        id
    }

    /// Follow recorded splits until `span` lands in the node now holding it.
    ///
    /// Splits of one node are checked oldest first: each later split only
    /// cuts the text the earlier ones left behind.
    fn forward(&self, mut span: TextSpan) -> TextSpan {
        while let Some(split) = self
            .splits
            .get(&span.node)
            .and_then(|splits| splits.iter().find(|split| span.start >= split.at))
        {
            span = TextSpan {
                node: split.tail,
                start: span.start - split.at,
                end: span.end - split.at,
            };
        }
        span
    }

    fn detach_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = &mut self.nodes[current.0];
            node.attached = false;
            stack.extend(node.children.iter().copied());
        }
    }
}

/// A shared, mutable text tree.
///
/// All methods take `&self`; share it as `Arc<Document>`.
pub struct Document {
    tree: Mutex<Tree>,
    watchers: Mutex<Vec<mpsc::UnboundedSender<Mutation>>>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tree = self.tree();
        f.debug_struct("Document")
            .field("nodes", &tree.nodes.len())
            .finish_non_exhaustive()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty document with a single root element.
    #[must_use]
    pub fn new() -> Self {
        let root = Node {
            kind: NodeKind::Element {
                tag: "#document".to_string(),
                attributes: BTreeMap::new(),
            },
            parent: None,
            children: Vec::new(),
            attached: true,
        };
        Self {
            tree: Mutex::new(Tree {
                nodes: vec![root],
                splits: HashMap::new(),
            }),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Document whose root holds a single text node with `text`.
    #[must_use]
    pub fn from_text(text: &str) -> (Self, NodeId) {
        let document = Self::new();
        let node = document.tree().push(NodeKind::Text(text.to_string()), NodeId(0), None);
        (document, node)
    }

    /// The root element.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Receive every future [`Mutation`].
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Mutation> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers
            .lock()
            .expect("Document watchers mutex poisoned")
            .push(tx);
        rx
    }

    /// Append an element under `parent`.
    ///
    /// # Errors
    ///
    /// `parent` is unknown, detached, or not an element.
    pub fn append_element(&self, parent: NodeId, tag: &str) -> Result<NodeId, DetectorError> {
        let child = {
            let mut tree = self.tree();
            Self::require_element(&tree, parent)?;
            tree.push(
                NodeKind::Element {
                    tag: tag.to_ascii_lowercase(),
                    attributes: BTreeMap::new(),
                },
                parent,
                None,
            )
        };
        self.notify(Mutation::ChildAdded { parent, child });
        Ok(child)
    }

    /// Append a text node under `parent`.
    ///
    /// # Errors
    ///
    /// `parent` is unknown, detached, or not an element.
    pub fn append_text(&self, parent: NodeId, text: &str) -> Result<NodeId, DetectorError> {
        let child = {
            let mut tree = self.tree();
            Self::require_element(&tree, parent)?;
            tree.push(NodeKind::Text(text.to_string()), parent, None)
        };
        self.notify(Mutation::ChildAdded { parent, child });
        Ok(child)
    }

    /// Replace a text node's content.
    ///
    /// # Errors
    ///
    /// `node` is unknown, detached, or not a text node.
    pub fn set_text(&self, node: NodeId, text: &str) -> Result<(), DetectorError> {
        {
            let mut tree = self.tree();
            tree.attached(node)?;
            match &mut tree.node_mut(node)?.kind {
                NodeKind::Text(content) => text.clone_into(content),
                NodeKind::Element { .. } => return Err(DetectorError::NotText(node)),
            }
            // Old offsets mean nothing against new content.
            tree.splits.remove(&node);
        }
        self.notify(Mutation::TextChanged(node));
        Ok(())
    }

    /// Set an attribute on an element.
    ///
    /// # Errors
    ///
    /// `node` is unknown or not an element.
    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<(), DetectorError> {
        let mut tree = self.tree();
        match &mut tree.node_mut(node)?.kind {
            NodeKind::Element { attributes, .. } => {
                attributes.insert(name.to_string(), value.to_string());
                Ok(())
            }
            NodeKind::Text(_) => Err(DetectorError::NotElement(node)),
        }
    }

    /// Detach `node` and its subtree.
    ///
    /// # Errors
    ///
    /// `node` is unknown, already detached, or the root.
    pub fn remove(&self, node: NodeId) -> Result<(), DetectorError> {
        {
            let mut tree = self.tree();
            let parent = tree
                .attached(node)?
                .parent
                .ok_or(DetectorError::NotRemovable(node))?;
            tree.node_mut(parent)?.children.retain(|child| *child != node);
            tree.detach_subtree(node);
        }
        self.notify(Mutation::Removed(node));
        Ok(())
    }

    /// Content of a text node.
    #[must_use]
    pub fn text(&self, node: NodeId) -> Option<String> {
        match &self.tree().node(node).ok()?.kind {
            NodeKind::Text(text) => Some(text.clone()),
            NodeKind::Element { .. } => None,
        }
    }

    /// Tag of an element.
    #[must_use]
    pub fn tag(&self, node: NodeId) -> Option<String> {
        match &self.tree().node(node).ok()?.kind {
            NodeKind::Element { tag, .. } => Some(tag.clone()),
            NodeKind::Text(_) => None,
        }
    }

    /// Attribute of an element.
    #[must_use]
    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        match &self.tree().node(node).ok()?.kind {
            NodeKind::Element { attributes, .. } => attributes.get(name).cloned(),
            NodeKind::Text(_) => None,
        }
    }

    /// Children of `node`, in order.
    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.tree()
            .node(node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Parent of `node`.
    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.tree().node(node).ok()?.parent
    }

    /// Whether `node` is still part of the tree.
    #[must_use]
    pub fn is_attached(&self, node: NodeId) -> bool {
        self.tree().node(node).is_ok_and(|n| n.attached)
    }

    /// Concatenated text of the subtree under `node`, in document order.
    #[must_use]
    pub fn text_content(&self, node: NodeId) -> String {
        self.text_nodes(node, |_| false)
            .into_iter()
            .map(|(_, text)| text)
            .collect()
    }

    /// Snapshot of every text node under `root` in document order,
    /// skipping subtrees whose element tag satisfies `skip`.
    pub fn text_nodes(&self, root: NodeId, skip: impl Fn(&str) -> bool) -> Vec<(NodeId, String)> {
        let tree = self.tree();
        let mut found = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Ok(node) = tree.attached(id) else {
                continue;
            };
            match &node.kind {
                NodeKind::Text(text) => found.push((id, text.clone())),
                NodeKind::Element { tag, .. } => {
                    if id != root && skip(tag) {
                        continue;
                    }
                    stack.extend(node.children.iter().rev().copied());
                }
            }
        }
        found
    }

    /// Text covered by `span`.
    ///
    /// # Errors
    ///
    /// The node is gone or no longer a text node, or the range no longer
    /// fits its content.
    pub fn span_text(&self, span: &TextSpan) -> Result<String, DetectorError> {
        let tree = self.tree();
        match &tree.attached(span.node)?.kind {
            NodeKind::Text(text) => text
                .get(span.start..span.end)
                .map(str::to_string)
                .ok_or(DetectorError::StaleSpan(*span)),
            NodeKind::Element { .. } => Err(DetectorError::NotText(span.node)),
        }
    }

    /// Split `span` out of its text node and put a new `tag` element in
    /// its place.
    ///
    /// The original node keeps the text before the span; text after it
    /// moves to a new sibling text node following the element. Spans that
    /// end at or before `span.start` in the same node stay valid, and spans
    /// that started after the replaced range can be carried over to the new
    /// node with [`Document::resolve_span`].
    ///
    /// # Errors
    ///
    /// As [`Document::span_text`], or the node has no parent.
    pub fn replace_span(&self, span: &TextSpan, tag: &str) -> Result<NodeId, DetectorError> {
        let mut mutations = Vec::new();
        let element = {
            let mut tree = self.tree();
            let node = tree.attached(span.node)?;
            let NodeKind::Text(text) = &node.kind else {
                return Err(DetectorError::NotText(span.node));
            };
            let parent = node.parent.ok_or(DetectorError::NotRemovable(span.node))?;
            let (Some(before), Some(after)) = (text.get(..span.start), text.get(span.end..)) else {
                return Err(DetectorError::StaleSpan(*span));
            };
            if span.start > span.end {
                return Err(DetectorError::StaleSpan(*span));
            }
            let (before, after) = (before.to_string(), after.to_string());

            let index = tree
                .node(parent)?
                .children
                .iter()
                .position(|child| *child == span.node)
                .map_or(0, |i| i + 1);

            tree.node_mut(span.node)?.kind = NodeKind::Text(before);
            mutations.push(Mutation::TextChanged(span.node));

            let element = tree.push(
                NodeKind::Element {
                    tag: tag.to_ascii_lowercase(),
                    attributes: BTreeMap::new(),
                },
                parent,
                Some(index),
            );
            mutations.push(Mutation::ChildAdded {
                parent,
                child: element,
            });

            if !after.is_empty() {
                let tail = tree.push(NodeKind::Text(after), parent, Some(index + 1));
                tree.splits.entry(span.node).or_default().push(Split {
                    at: span.end,
                    tail,
                });
                mutations.push(Mutation::ChildAdded { parent, child: tail });
            }
            element
        };

        for mutation in mutations {
            self.notify(mutation);
        }
        Ok(element)
    }

    /// Where `span` lives now, after any [`Document::replace_span`] calls
    /// that moved its text into a new node.
    ///
    /// Spans that were never moved come back unchanged. The result is not
    /// validated; check it with [`Document::span_text`].
    #[must_use]
    pub fn resolve_span(&self, span: &TextSpan) -> TextSpan {
        self.tree().forward(*span)
    }

    fn tree(&self) -> std::sync::MutexGuard<'_, Tree> {
        self.tree.lock().expect("Document tree mutex poisoned")
    }

    fn require_element(tree: &Tree, id: NodeId) -> Result<(), DetectorError> {
        match tree.attached(id)?.kind {
            NodeKind::Element { .. } => Ok(()),
            NodeKind::Text(_) => Err(DetectorError::NotElement(id)),
        }
    }

    fn notify(&self, mutation: Mutation) {
        let mut watchers = self.watchers.lock().expect("Document watchers mutex poisoned");
        watchers.retain(|tx| tx.send(mutation).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_read() {
        let doc = Document::new();
        let p = doc.append_element(doc.root(), "P").unwrap();
        let t = doc.append_text(p, "hello").unwrap();
        assert_eq!(doc.tag(p).as_deref(), Some("p"));
        assert_eq!(doc.text(t).as_deref(), Some("hello"));
        assert_eq!(doc.parent(t), Some(p));
        assert_eq!(doc.children(p), vec![t]);
        assert!(doc.append_text(t, "x").is_err());
    }

    #[test]
    fn test_text_nodes_in_document_order_with_skip() {
        let doc = Document::new();
        let root = doc.root();
        let a = doc.append_text(root, "a").unwrap();
        let script = doc.append_element(root, "script").unwrap();
        doc.append_text(script, "hidden").unwrap();
        let div = doc.append_element(root, "div").unwrap();
        let b = doc.append_text(div, "b").unwrap();
        let c = doc.append_text(root, "c").unwrap();

        let found = doc.text_nodes(root, |tag| tag == "script");
        assert_eq!(
            found,
            vec![(a, "a".into()), (b, "b".into()), (c, "c".into())]
        );
        assert_eq!(doc.text_content(root), "ahiddenbc");
    }

    #[test]
    fn test_remove_detaches_subtree() {
        let doc = Document::new();
        let div = doc.append_element(doc.root(), "div").unwrap();
        let t = doc.append_text(div, "x").unwrap();
        doc.remove(div).unwrap();
        assert!(!doc.is_attached(div));
        assert!(!doc.is_attached(t));
        assert!(doc.children(doc.root()).is_empty());
        assert_eq!(doc.set_text(t, "y"), Err(DetectorError::Detached(t)));
        assert_eq!(doc.remove(doc.root()), Err(DetectorError::NotRemovable(doc.root())));
    }

    #[test]
    fn test_span_text_and_stale_span() {
        let (doc, t) = Document::from_text("see rift://a here");
        let span = TextSpan { node: t, start: 4, end: 12 };
        assert_eq!(doc.span_text(&span).unwrap(), "rift://a");

        doc.set_text(t, "short").unwrap();
        assert_eq!(doc.span_text(&span), Err(DetectorError::StaleSpan(span)));
    }

    #[test]
    fn test_replace_span_splits_text() {
        let (doc, t) = Document::from_text("before rift://a after");
        let element = doc
            .replace_span(&TextSpan { node: t, start: 7, end: 15 }, "iframe")
            .unwrap();

        let children = doc.children(doc.root());
        assert_eq!(children.len(), 3);
        assert_eq!(children[0], t);
        assert_eq!(children[1], element);
        assert_eq!(doc.text(t).as_deref(), Some("before "));
        assert_eq!(doc.tag(element).as_deref(), Some("iframe"));
        assert_eq!(doc.text(children[2]).as_deref(), Some(" after"));
    }

    #[test]
    fn test_replace_span_last_to_first_keeps_earlier_spans_valid() {
        let (doc, t) = Document::from_text("rift://a and rift://b");
        let first = TextSpan { node: t, start: 0, end: 8 };
        let second = TextSpan { node: t, start: 13, end: 21 };

        doc.replace_span(&second, "iframe").unwrap();
        assert_eq!(doc.span_text(&first).unwrap(), "rift://a");
        doc.replace_span(&first, "iframe").unwrap();

        let tags: Vec<_> = doc
            .children(doc.root())
            .into_iter()
            .map(|n| doc.tag(n).unwrap_or_else(|| doc.text(n).unwrap_or_default()))
            .collect();
        assert_eq!(tags, vec!["", "iframe", " and ", "iframe"]);
    }

    #[test]
    fn test_resolve_span_follows_splits_left_to_right() {
        let (doc, t) = Document::from_text("rift://a, rift://b and rift://c!");
        let a = TextSpan { node: t, start: 0, end: 8 };
        let b = TextSpan { node: t, start: 10, end: 18 };
        let c = TextSpan { node: t, start: 23, end: 31 };

        assert_eq!(doc.resolve_span(&a), a);
        doc.replace_span(&a, "iframe").unwrap();

        let b_now = doc.resolve_span(&b);
        assert_ne!(b_now.node, t);
        assert_eq!(doc.span_text(&b_now).unwrap(), "rift://b");
        doc.replace_span(&b_now, "iframe").unwrap();

        let c_now = doc.resolve_span(&c);
        assert_eq!(doc.span_text(&c_now).unwrap(), "rift://c");
        doc.replace_span(&c_now, "iframe").unwrap();

        let text: Vec<_> = doc
            .children(doc.root())
            .into_iter()
            .filter_map(|n| doc.text(n))
            .collect();
        assert_eq!(text, vec!["", ", ", " and ", "!"]);
    }

    #[test]
    fn test_resolve_span_checks_older_splits_first() {
        let (doc, t) = Document::from_text("rift://a x rift://b y rift://c!");
        let a = TextSpan { node: t, start: 0, end: 8 };
        let b = TextSpan { node: t, start: 11, end: 19 };
        let c = TextSpan { node: t, start: 22, end: 30 };
        let bang = TextSpan { node: t, start: 30, end: 31 };

        doc.replace_span(&c, "iframe").unwrap();
        doc.replace_span(&a, "iframe").unwrap();
        assert_eq!(doc.span_text(&doc.resolve_span(&b)).unwrap(), "rift://b");
        assert_eq!(doc.span_text(&doc.resolve_span(&bang)).unwrap(), "!");
    }

    #[test]
    fn test_set_text_drops_forwarding() {
        let (doc, t) = Document::from_text("rift://a rift://b");
        let b = TextSpan { node: t, start: 9, end: 17 };
        doc.replace_span(&TextSpan { node: t, start: 0, end: 8 }, "iframe")
            .unwrap();
        doc.set_text(t, "0123456789abcdefgh").unwrap();
        assert_eq!(doc.resolve_span(&b), b);
    }

    #[test]
    fn test_mutations_are_broadcast() {
        let doc = Document::new();
        let mut rx = doc.subscribe();
        let div = doc.append_element(doc.root(), "div").unwrap();
        let t = doc.append_text(div, "x").unwrap();
        doc.set_text(t, "y").unwrap();
        doc.remove(div).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            Mutation::ChildAdded { parent: doc.root(), child: div }
        );
        assert_eq!(rx.try_recv().unwrap(), Mutation::ChildAdded { parent: div, child: t });
        assert_eq!(rx.try_recv().unwrap(), Mutation::TextChanged(t));
        assert_eq!(rx.try_recv().unwrap(), Mutation::Removed(div));
    }

    #[test]
    fn test_closed_subscribers_are_pruned() {
        let doc = Document::new();
        drop(doc.subscribe());
        doc.append_text(doc.root(), "x").unwrap();
        assert!(doc.watchers.lock().unwrap().is_empty());
    }

    #[test]
    fn test_attributes() {
        let doc = Document::new();
        let el = doc.append_element(doc.root(), "iframe").unwrap();
        doc.set_attribute(el, "src", "https://a").unwrap();
        assert_eq!(doc.attribute(el, "src").as_deref(), Some("https://a"));
        assert_eq!(doc.attribute(el, "missing"), None);
    }
}

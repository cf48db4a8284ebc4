//! The topic tree: the in-memory hierarchy of retained values and subscribers.
//!
//! Subscriber entries reference connections by an opaque [`ConnId`] handle
//! rather than owning the socket — the reactor's connection registry is the
//! sole owner of connection state, so disconnect cleanup is a plain ID
//! removal with no back-references to untangle.

use std::collections::HashMap;

use serde_json::Value;

use crate::codec::Format;

/// Opaque handle to a connection, stable for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub usize);

#[derive(Default)]
struct TopicNode {
    retained_value: Option<Value>,
    visible: bool,
    subscribers: Vec<(ConnId, Format)>,
    children: HashMap<String, TopicNode>,
}

/// The hierarchical topic tree. Top-level keys are either `"/"` for the
/// absolute root or a bare first segment for each relative namespace;
/// everything below that is keyed by the full joined path.
#[derive(Default)]
pub struct TopicTree {
    roots: HashMap<String, TopicNode>,
}

impl TopicTree {
    pub fn new() -> Self {
        TopicTree::default()
    }

    /// Produces the root-to-terminal key chain for `path`. Absolute paths key
    /// their root `"/"` and join nested segments as `/a`, `/a/b`, ...; relative
    /// paths key their root as the bare first segment and join nested segments
    /// as `a/b`, `a/b/c`, ... The bare path `"/"` yields exactly one key (the
    /// root itself) — it is a node in its own right, not an ancestor of `/a`.
    fn keys_for(path: &str) -> Vec<String> {
        if let Some(rest) = path.strip_prefix('/') {
            let mut keys = vec!["/".to_owned()];
            let mut joined = String::new();
            for segment in rest.split('/').filter(|s| !s.is_empty()) {
                joined.push('/');
                joined.push_str(segment);
                keys.push(joined.clone());
            }
            keys
        } else {
            let mut keys = Vec::new();
            let mut joined = String::new();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                if joined.is_empty() {
                    joined.push_str(segment);
                } else {
                    joined.push('/');
                    joined.push_str(segment);
                }
                keys.push(joined.clone());
            }
            if keys.is_empty() {
                keys.push(path.to_owned());
            }
            keys
        }
    }

    /// Walks/creates all ancestors and returns the terminal node. Never fails.
    fn find_or_create(&mut self, path: &str) -> &mut TopicNode {
        let keys = Self::keys_for(path);
        let mut node = self.roots.entry(keys[0].clone()).or_default();
        for key in &keys[1..] {
            node = node.children.entry(key.clone()).or_default();
        }
        node
    }

    fn find(&self, path: &str) -> Option<&TopicNode> {
        let keys = Self::keys_for(path);
        let mut node = self.roots.get(&keys[0])?;
        for key in &keys[1..] {
            node = node.children.get(key)?;
        }
        Some(node)
    }

    fn find_mut(&mut self, path: &str) -> Option<&mut TopicNode> {
        let keys = Self::keys_for(path);
        let mut node = self.roots.get_mut(&keys[0])?;
        for key in &keys[1..] {
            node = node.children.get_mut(key)?;
        }
        Some(node)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.find(path).and_then(|node| node.retained_value.as_ref())
    }

    pub fn put(&mut self, path: &str, value: Value) {
        let node = self.find_or_create(path);
        node.retained_value = Some(value);
        node.visible = true;
    }

    pub fn subscribers_of(&self, path: &str) -> &[(ConnId, Format)] {
        self.find(path).map(|node| node.subscribers.as_slice()).unwrap_or(&[])
    }

    pub fn add_subscriber(&mut self, path: &str, conn: ConnId, format: Format) {
        let node = self.find_or_create(path);
        node.subscribers.push((conn, format));
        node.visible = true;
    }

    pub fn remove_subscriber_single(&mut self, path: &str, conn: ConnId) {
        if let Some(node) = self.find_mut(path) {
            if let Some(pos) = node.subscribers.iter().position(|(c, _)| *c == conn) {
                node.subscribers.remove(pos);
            }
        }
    }

    pub fn remove_subscriber_everywhere(&mut self, conn: ConnId) {
        for node in self.roots.values_mut() {
            Self::prune_subtree(node, conn);
        }
    }

    fn prune_subtree(node: &mut TopicNode, conn: ConnId) {
        node.subscribers.retain(|(c, _)| *c != conn);
        for child in node.children.values_mut() {
            Self::prune_subtree(child, conn);
        }
    }

    /// Every node where `visible` is true and a retained value is present.
    /// A node can be visible from a subscribe with nothing ever published to
    /// it, so the value check excludes those from the listing. Order is
    /// unspecified but contains no duplicates.
    pub fn list_visible(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (key, node) in &self.roots {
            Self::collect_visible(key, node, &mut out);
        }
        out
    }

    fn collect_visible(path: &str, node: &TopicNode, out: &mut Vec<String>) {
        if node.visible && node.retained_value.is_some() {
            out.push(path.to_owned());
        }
        for (child_path, child) in &node.children {
            Self::collect_visible(child_path, child, out);
        }
    }

    /// Walks root-to-terminal along `path`, returning the concatenated,
    /// ordered subscriber list of every ancestor and the terminal node (spec
    /// §4.3: "ancestor subscribers receive the message before deeper
    /// subscribers; within a node, subscribers are delivered in insertion
    /// order"), then sets the terminal's retained value.
    pub fn publish(&mut self, path: &str, value: Value) -> Vec<(ConnId, Format)> {
        let keys = Self::keys_for(path);
        let mut fanout = Vec::new();

        let mut node = self.roots.entry(keys[0].clone()).or_default();
        fanout.extend_from_slice(&node.subscribers);
        for key in &keys[1..] {
            node = node.children.entry(key.clone()).or_default();
            fanout.extend_from_slice(&node.subscribers);
        }

        node.retained_value = Some(value);
        node.visible = true;
        fanout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Value {
        Value::String(s.to_owned())
    }

    #[test]
    fn absolute_and_relative_namespaces_are_disjoint() {
        let mut tree = TopicTree::new();
        tree.put("/a", v("absolute"));
        tree.put("a", v("relative"));

        assert_eq!(tree.get("/a"), Some(&v("absolute")));
        assert_eq!(tree.get("a"), Some(&v("relative")));
    }

    #[test]
    fn the_bare_root_is_a_distinct_reachable_node() {
        let mut tree = TopicTree::new();
        tree.put("/", v("root value"));
        assert_eq!(tree.get("/"), Some(&v("root value")));
        assert_eq!(tree.get("/a"), None);
    }

    #[test]
    fn retention_is_per_node() {
        let mut tree = TopicTree::new();
        tree.publish("/a", v("for a"));
        assert_eq!(tree.get("/a/b"), None);
    }

    #[test]
    fn publish_fanout_includes_ancestors_before_terminal_in_order() {
        let mut tree = TopicTree::new();
        tree.add_subscriber("/a", ConnId(1), Format::Json);
        tree.add_subscriber("/a/b", ConnId(2), Format::Json);
        tree.add_subscriber("/other", ConnId(3), Format::Json);

        let fanout = tree.publish("/a/b/c", v("hi"));
        assert_eq!(fanout, vec![(ConnId(1), Format::Json), (ConnId(2), Format::Json)]);
    }

    #[test]
    fn list_visible_contains_only_nodes_with_a_retained_value() {
        let mut tree = TopicTree::new();
        tree.add_subscriber("/subscribed-only", ConnId(1), Format::Json);
        tree.put("/a", v("1"));
        tree.put("/a/b", v("2"));
        tree.put("/x", v("3"));

        let mut topics = tree.list_visible();
        topics.sort();
        assert_eq!(topics, vec!["/a", "/a/b", "/x"]);
    }

    #[test]
    fn remove_subscriber_everywhere_sweeps_the_whole_tree() {
        let mut tree = TopicTree::new();
        tree.add_subscriber("/a", ConnId(1), Format::Json);
        tree.add_subscriber("/a/b", ConnId(1), Format::Xml);
        tree.add_subscriber("/a/b", ConnId(2), Format::Json);

        tree.remove_subscriber_everywhere(ConnId(1));

        assert_eq!(tree.subscribers_of("/a"), &[]);
        assert_eq!(tree.subscribers_of("/a/b"), &[(ConnId(2), Format::Json)]);
    }

    #[test]
    fn remove_subscriber_single_only_touches_the_named_topic() {
        let mut tree = TopicTree::new();
        tree.add_subscriber("/t", ConnId(1), Format::Json);
        tree.add_subscriber("/t/u", ConnId(1), Format::Json);

        tree.remove_subscriber_single("/t", ConnId(1));

        assert_eq!(tree.subscribers_of("/t"), &[]);
        assert_eq!(tree.subscribers_of("/t/u"), &[(ConnId(1), Format::Json)]);
    }
}

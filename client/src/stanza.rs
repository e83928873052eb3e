//! Stanza node tree.
//!
//! One protocol frame is a tagged node with string attributes and either
//! nested child nodes or a raw byte body. Byte-level encoding and
//! decoding belongs to the external codec; the pipeline only walks and
//! builds trees.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::jid::Jid;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Node {
    pub tag: String,
    pub attrs: HashMap<String, String>,
    pub content: NodeContent,
}

#[derive(Debug, Clone, Default, Serialize)]
pub enum NodeContent {
    #[default]
    None,
    Nodes(Vec<Node>),
    Bytes(Vec<u8>),
}

impl Node {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: HashMap::new(),
            content: NodeContent::None,
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.content = NodeContent::Nodes(children);
        self
    }

    pub fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.content = NodeContent::Bytes(bytes);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Attribute that the stanza grammar requires on this tag.
    pub fn required_attr(&self, name: &str) -> Result<&str> {
        self.attr(name)
            .ok_or_else(|| Error::protocol(format!("<{}> without {name:?} attribute", self.tag)))
    }

    /// Attribute parsed as a JID.
    pub fn jid_attr(&self, name: &str) -> Option<Jid> {
        self.attr(name).and_then(|raw| raw.parse().ok())
    }

    pub fn required_jid_attr(&self, name: &str) -> Result<Jid> {
        self.required_attr(name)?.parse()
    }

    pub fn children(&self) -> &[Node] {
        match &self.content {
            NodeContent::Nodes(nodes) => nodes,
            _ => &[],
        }
    }

    pub fn child(&self, tag: &str) -> Option<&Node> {
        self.children().iter().find(|node| node.tag == tag)
    }

    pub fn children_with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Node> {
        self.children().iter().filter(move |node| node.tag == tag)
    }

    pub fn first_child(&self) -> Option<&Node> {
        self.children().first()
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.content {
            NodeContent::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Node {
        Node::new("notification")
            .with_attr("id", "abc")
            .with_attr("type", "w:gp2")
            .with_children(vec![
                Node::new("remove").with_children(vec![
                    Node::new("participant").with_attr("jid", "bob@s.whatsapp.net"),
                    Node::new("participant").with_attr("jid", "carol@s.whatsapp.net"),
                ]),
                Node::new("registration").with_bytes(vec![0, 0, 1, 2]),
            ])
    }

    #[test]
    fn test_attr_access() {
        let node = sample();
        assert_eq!(node.attr("id"), Some("abc"));
        assert_eq!(node.attr("missing"), None);
        assert!(node.required_attr("from").is_err());
    }

    #[test]
    fn test_child_walks() {
        let node = sample();
        let remove = node.child("remove").unwrap();
        assert_eq!(remove.children_with_tag("participant").count(), 2);
        assert_eq!(node.first_child().unwrap().tag, "remove");
        assert!(node.child("add").is_none());
    }

    #[test]
    fn test_bytes_content() {
        let node = sample();
        assert_eq!(node.child("registration").unwrap().bytes(), Some(&[0u8, 0, 1, 2][..]));
        assert!(node.bytes().is_none());
    }

    #[test]
    fn test_jid_attr() {
        let node = Node::new("receipt").with_attr("from", "alice@s.whatsapp.net");
        assert_eq!(node.jid_attr("from").unwrap().user, "alice");
        assert!(node.required_jid_attr("participant").is_err());
    }
}

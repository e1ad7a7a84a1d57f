//! A minimal owned XML tree for stanzas.
//!
//! Stanzas are small, so they are parsed fully into [`Element`]s by the
//! codec and built with a fluent API on the way out:
//!
//! ```rust,ignore
//! let iq = Element::new("iq")
//!     .attr("type", "get")
//!     .attr("id", "roster1")
//!     .child(Element::new("query").ns(ns::ROSTER));
//! assert_eq!(iq.to_string(), "<iq type='get' id='roster1'><query xmlns='jabber:iq:roster'/></iq>");
//! ```

use std::fmt;

use quick_xml::escape::escape;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An XML element with attributes in document order.
///
/// Names keep their prefix (`stream:features`); namespaces are read from the
/// element's own `xmlns` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    // ---- building ----

    /// Sets an attribute, replacing an existing one of the same name.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Sets an attribute only when a value is given.
    pub fn attr_opt(self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.attr(name, value),
            None => self,
        }
    }

    pub fn ns(self, ns: &str) -> Self {
        self.attr("xmlns", ns)
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text);
        self
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name, value)),
        }
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(&text);
        } else {
            self.children.push(Node::Text(text));
        }
    }

    // ---- reading ----

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local name without prefix.
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn namespace(&self) -> Option<&str> {
        self.get_attr("xmlns")
    }

    pub fn is(&self, local_name: &str, ns: &str) -> bool {
        self.local_name() == local_name && self.namespace() == Some(ns)
    }

    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First child with the given local name.
    pub fn get_child(&self, local_name: &str) -> Option<&Element> {
        self.children().find(|c| c.local_name() == local_name)
    }

    /// First child with the given local name and namespace.
    pub fn get_child_ns(&self, local_name: &str, ns: &str) -> Option<&Element> {
        self.children().find(|c| c.is(local_name, ns))
    }

    pub fn has_child(&self, local_name: &str) -> bool {
        self.get_child(local_name).is_some()
    }

    /// Concatenated direct text content.
    pub fn text_content(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Text of the first child with the given local name.
    pub fn child_text(&self, local_name: &str) -> Option<String> {
        self.get_child(local_name).map(Element::text_content)
    }

    fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attrs {
            out.push(' ');
            out.push_str(k);
            out.push_str("='");
            out.push_str(&escape(v.as_str()));
            out.push('\'');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.children {
            match node {
                Node::Element(e) => e.write_to(out),
                Node::Text(t) => out.push_str(&escape(t.as_str())),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_to(&mut out);
        f.write_str(&out)
    }
}

//! Owned XML element trees.
//!
//! Coverage dialects are recognized by the elements a file contains, and
//! several preprocessors rewrite reports before parsing, so matching
//! subtrees are materialized as owned elements. Extraction still streams:
//! only subtrees rooted at a requested element name are built, everything
//! else passes through the event reader untouched.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{CovError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Replaces the attribute if present, appends it otherwise.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    /// Concatenated direct text content.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            if let Node::Text(text) = node {
                out.push_str(text);
            }
        }
        out
    }

    /// Replaces the direct text content. Intended for leaf elements.
    pub fn set_text(&mut self, value: impl Into<String>) {
        self.children.retain(|node| !matches!(node, Node::Text(_)));
        self.children.insert(0, Node::Text(value.into()));
    }

    pub fn push_element(&mut self, element: Element) {
        self.children.push(Node::Element(element));
    }

    /// First direct child element with the given name.
    #[must_use]
    pub fn child<'a>(&'a self, name: &'a str) -> Option<&'a Element> {
        self.elements(name).next()
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|node| match node {
            Node::Element(el) if el.name == name => Some(el),
            _ => None,
        })
    }

    /// Text of the first direct child element with the given name.
    #[must_use]
    pub fn child_text(&self, name: &str) -> Option<String> {
        self.child(name).map(Element::text)
    }

    /// Direct child elements with the given name.
    pub fn elements<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter_map(move |node| match node {
            Node::Element(el) if el.name == name => Some(el),
            _ => None,
        })
    }

    pub fn elements_mut<'a>(&'a mut self, name: &'a str) -> impl Iterator<Item = &'a mut Element> {
        self.children.iter_mut().filter_map(move |node| match node {
            Node::Element(el) if el.name == name => Some(el),
            _ => None,
        })
    }

    /// All direct child elements.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }

    /// All descendant elements with the given name, depth-first document
    /// order, excluding this element itself.
    #[must_use]
    pub fn descendants(&self, name: &str) -> Vec<&Element> {
        let mut out = Vec::new();
        self.collect_descendants(name, &mut out);
        out
    }

    fn collect_descendants<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        for node in &self.children {
            if let Node::Element(el) = node {
                if el.name == name {
                    out.push(el);
                }
                el.collect_descendants(name, out);
            }
        }
    }

    /// Applies `f` to every descendant element with the given name.
    pub fn for_each_named_mut<F: FnMut(&mut Element)>(&mut self, name: &str, f: &mut F) {
        for node in &mut self.children {
            if let Node::Element(el) = node {
                if el.name == name {
                    f(el);
                }
                el.for_each_named_mut(name, f);
            }
        }
    }

    /// Removes and returns the direct child elements matching `pred`,
    /// preserving the order of everything kept.
    pub fn extract_children<F: FnMut(&Element) -> bool>(&mut self, mut pred: F) -> Vec<Element> {
        let mut taken = Vec::new();
        let mut kept = Vec::with_capacity(self.children.len());
        for node in self.children.drain(..) {
            match node {
                Node::Element(el) if pred(&el) => taken.push(el),
                other => kept.push(other),
            }
        }
        self.children = kept;
        taken
    }
}

/// Extracts every subtree rooted at an element named `name`, at any depth.
/// A match nested inside another match stays inside its parent's subtree.
pub fn collect_named(input: &[u8], name: &str) -> Result<Vec<Element>> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut found = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Err(err) => {
                return Err(CovError::Xml {
                    message: err.to_string(),
                    position: reader.buffer_position() as u64,
                })
            }
            Ok(Event::Eof) => break,
            Ok(Event::Start(start)) => {
                let tag = tag_name(&start);
                if !stack.is_empty() || tag == name {
                    stack.push(element_from_start(tag, &start, &reader)?);
                }
            }
            Ok(Event::Empty(start)) => {
                let tag = tag_name(&start);
                if !stack.is_empty() || tag == name {
                    let el = element_from_start(tag, &start, &reader)?;
                    match stack.last_mut() {
                        Some(parent) => parent.push_element(el),
                        None => found.push(el),
                    }
                }
            }
            Ok(Event::End(_)) => {
                if let Some(el) = stack.pop() {
                    match stack.last_mut() {
                        Some(parent) => parent.push_element(el),
                        None => found.push(el),
                    }
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(parent) = stack.last_mut() {
                    let text = text.unescape().map_err(|err| CovError::Xml {
                        message: err.to_string(),
                        position: reader.buffer_position() as u64,
                    })?;
                    if !text.is_empty() {
                        parent.children.push(Node::Text(text.into_owned()));
                    }
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8_lossy(data.as_ref()).into_owned();
                    if !text.is_empty() {
                        parent.children.push(Node::Text(text));
                    }
                }
            }
            Ok(_) => {}
        }
        buf.clear();
    }

    Ok(found)
}

fn tag_name(start: &BytesStart) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

fn element_from_start(tag: String, start: &BytesStart, reader: &Reader<&[u8]>) -> Result<Element> {
    let mut el = Element::new(tag);
    for attr in start.attributes() {
        let attr = attr.map_err(|err| CovError::Xml {
            message: err.to_string(),
            position: reader.buffer_position() as u64,
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| CovError::Xml {
                message: err.to_string(),
                position: reader.buffer_position() as u64,
            })?
            .into_owned();
        el.attributes.push((key, value));
    }
    Ok(el)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_subtrees_at_any_depth() {
        let xml = br#"<?xml version="1.0"?>
<root>
  <wrapper>
    <target id="1"><inner>a</inner></target>
  </wrapper>
  <target id="2"/>
</root>"#;

        let found = collect_named(xml, "target").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].attr("id"), Some("1"));
        assert_eq!(found[0].child("inner").unwrap().text(), "a");
        assert_eq!(found[1].attr("id"), Some("2"));
    }

    #[test]
    fn nested_match_stays_inside_parent_subtree() {
        let xml = b"<root><m><x/><m><y/></m></m></root>";

        let found = collect_named(xml, "m").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].descendants("m").len(), 1);
        assert_eq!(found[0].descendants("y").len(), 1);
    }

    #[test]
    fn unescapes_attributes_and_text() {
        let xml = br#"<c name="A&lt;T&gt;">x &amp; y</c>"#;

        let found = collect_named(xml, "c").unwrap();
        assert_eq!(found[0].attr("name"), Some("A<T>"));
        assert_eq!(found[0].text(), "x & y");
        assert_eq!(found[0].attribute_count(), 1);
    }

    #[test]
    fn no_match_returns_empty() {
        let found = collect_named(b"<a><b/></a>", "c").unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(collect_named(b"<a><b></a>", "a").is_err());
    }

    #[test]
    fn set_attr_and_set_text_replace_in_place() {
        let mut el = collect_named(b"<a x=\"1\">old</a>", "a")
            .unwrap()
            .remove(0);

        el.set_attr("x", "2");
        el.set_attr("y", "3");
        el.set_text("new");

        assert_eq!(el.attr("x"), Some("2"));
        assert_eq!(el.attr("y"), Some("3"));
        assert_eq!(el.text(), "new");
    }

    #[test]
    fn extract_children_removes_matches_in_order() {
        let mut el = collect_named(b"<a><b i=\"1\"/><c/><b i=\"2\"/></a>", "a")
            .unwrap()
            .remove(0);

        let taken = el.extract_children(|child| child.name == "b");
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].attr("i"), Some("1"));
        assert_eq!(taken[1].attr("i"), Some("2"));
        assert_eq!(el.child_elements().count(), 1);
    }
}

//! A small read-only DOM for zypper's `--xmlout` documents.
//!
//! zypper writes modest documents (search results, product lists, progress
//! messages), so the whole tree is built in memory from quick-xml events and
//! queried with [`Element::elements_by_tag`] much like a browser DOM.

use indexmap::IndexMap;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Errors raised while building a [`Document`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XmlError {
    #[error("XML syntax error at position {position}: {message}")]
    Syntax { position: u64, message: String },

    #[error("XML document has no root element")]
    NoRoot,

    #[error("unclosed element <{0}>")]
    Unclosed(String),
}

/// A node inside an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An XML element with ordered attributes and children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: IndexMap<String, String>,
    pub children: Vec<Node>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, XmlError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = IndexMap::new();
        for attr in start.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let raw = String::from_utf8_lossy(&attr.value).into_owned();
            let value = unescape(&raw)
                .map(|v| v.into_owned())
                .map_err(|e| XmlError::Syntax {
                    position: 0,
                    message: e.to_string(),
                })?;
            attributes.insert(key, value);
        }
        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
        })
    }

    /// Attribute value, if present.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Attribute value or the empty string when missing.
    pub fn attr_or_empty(&self, name: &str) -> &str {
        self.attr(name).unwrap_or("")
    }

    /// Child elements, in document order.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    /// All descendant elements named `tag`, depth first, in document order.
    pub fn elements_by_tag(&self, tag: &str) -> Vec<&Element> {
        let mut found = Vec::new();
        self.collect_by_tag(tag, &mut found);
        found
    }

    fn collect_by_tag<'a>(&'a self, tag: &str, found: &mut Vec<&'a Element>) {
        for child in self.child_elements() {
            if child.name == tag {
                found.push(child);
            }
            child.collect_by_tag(tag, found);
        }
    }

    /// Text of the first child node, when that node is text.
    pub fn first_text(&self) -> Option<&str> {
        match self.children.first() {
            Some(Node::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    /// The direct text children joined by newlines.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(Node::Text(text.to_string()));
        }
    }
}

/// A parsed XML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    root: Element,
}

impl Document {
    /// Parse a document from a string.
    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(xml);
        let mut buf = Vec::new();

        // Slot 0 is a synthetic container so top-level text and the root
        // element share one code path.
        let mut stack: Vec<Element> = vec![Element::default()];
        let mut seen_root = false;

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| XmlError::Syntax {
                    position: reader.buffer_position(),
                    message: e.to_string(),
                })?;
            match event {
                Event::Start(ref e) => {
                    stack.push(Element::from_start(e)?);
                }
                Event::Empty(ref e) => {
                    let element = Element::from_start(e)?;
                    attach(&mut stack, element, &mut seen_root);
                }
                Event::End(_) => {
                    if stack.len() > 1 {
                        if let Some(element) = stack.pop() {
                            attach(&mut stack, element, &mut seen_root);
                        }
                    }
                }
                Event::Text(ref e) => {
                    if stack.len() > 1 {
                        let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                        if let Some(top) = stack.last_mut() {
                            top.push_text(&text);
                        }
                    }
                }
                Event::CData(ref e) => {
                    if stack.len() > 1 {
                        let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                        if let Some(top) = stack.last_mut() {
                            top.push_text(&text);
                        }
                    }
                }
                Event::GeneralRef(ref e) => {
                    let entity = format!("&{};", String::from_utf8_lossy(e.as_ref()));
                    let resolved = unescape(&entity).map_err(|err| XmlError::Syntax {
                        position: reader.buffer_position(),
                        message: err.to_string(),
                    })?;
                    if stack.len() > 1 {
                        if let Some(top) = stack.last_mut() {
                            top.push_text(&resolved);
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if stack.len() > 1 {
            let name = stack.last().map(|e| e.name.clone()).unwrap_or_default();
            return Err(XmlError::Unclosed(name));
        }
        if !seen_root {
            return Err(XmlError::NoRoot);
        }
        let root = stack.pop().unwrap_or_default();
        Ok(Self { root })
    }

    /// The document element.
    pub fn document_element(&self) -> Option<&Element> {
        self.root.child_elements().next()
    }

    /// All elements named `tag`, including the document element itself.
    pub fn elements_by_tag(&self, tag: &str) -> Vec<&Element> {
        self.root.elements_by_tag(tag)
    }
}

fn attach(stack: &mut [Element], element: Element, seen_root: &mut bool) {
    if stack.len() == 1 {
        *seen_root = true;
    }
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(element));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SEARCH: &str = r#"<?xml version='1.0'?>
<stream>
<search-result version="0.0">
<solvable-list>
<solvable status="installed" name="vim" kind="package" edition="9.0.1572-1.1" arch="x86_64" repository="(System Packages)"/>
<solvable status="not-installed" name="vim" kind="package" edition="9.0.1632-1.1" arch="x86_64" repository="Main &amp; Updates"/>
</solvable-list>
</search-result>
</stream>
"#;

    #[test]
    fn test_elements_by_tag_document_order() {
        let doc = Document::parse(SEARCH).unwrap();
        let solvables = doc.elements_by_tag("solvable");
        assert_eq!(solvables.len(), 2);
        assert_eq!(solvables[0].attr("status"), Some("installed"));
        assert_eq!(solvables[1].attr("repository"), Some("Main & Updates"));
        assert_eq!(solvables[1].attr_or_empty("summary"), "");
        assert_eq!(doc.document_element().unwrap().name, "stream");
    }

    #[test]
    fn test_message_text_with_entities() {
        let doc = Document::parse(
            r#"<stream><message type="error">Repository 'a' &lt;b&gt; is invalid.</message></stream>"#,
        )
        .unwrap();
        let messages = doc.elements_by_tag("message");
        assert_eq!(
            messages[0].first_text(),
            Some("Repository 'a' <b> is invalid.")
        );
    }

    #[test]
    fn test_text_skips_child_elements() {
        let doc = Document::parse(
            "<product><description>\n  Line one\n  <br/>Line two\n</description></product>",
        )
        .unwrap();
        let description = doc.elements_by_tag("description");
        assert_eq!(description[0].text(), "\n  Line one\n  \nLine two\n");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Document::parse(""), Err(XmlError::NoRoot));
        assert_eq!(Document::parse("   \n"), Err(XmlError::NoRoot));
        assert!(Document::parse("<stream><message>").is_err());
        assert!(Document::parse("<stream></other>").is_err());
    }
}

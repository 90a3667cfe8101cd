//! Minimal element tree for XML sub-response bodies (Atom feeds, XML errors).

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// One XML element. Names are stored without their namespace prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Depth-first search for the first element named `name`, self included.
    pub fn find(&self, name: &str) -> Option<&XmlNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }
}

/// Parse `text` into its root element.
pub fn parse(text: &str) -> Result<XmlNode, String> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(start) => stack.push(element(&start)?),
            Event::Empty(start) => attach(&mut stack, &mut root, element(&start)?)?,
            Event::End(_) => {
                let node = stack.pop().ok_or("unbalanced closing tag")?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::Text(text) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text.unescape().map_err(|e| e.to_string())?);
                }
            }
            Event::CData(data) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err("unexpected end of document".to_string());
    }
    root.ok_or_else(|| "document has no root element".to_string())
}

fn element(start: &BytesStart<'_>) -> Result<XmlNode, String> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        attributes.push((key, value));
    }
    Ok(XmlNode {
        name,
        attributes,
        ..XmlNode::default()
    })
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) -> Result<(), String> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => return Err("multiple root elements".to_string()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_odata_error_document() {
        let doc = r#"<?xml version="1.0" encoding="utf-8"?>
<error xmlns="http://schemas.microsoft.com/ado/2007/08/dataservices/metadata">
  <code>SY/530</code>
  <message xml:lang="en">Resource not found for segment 'Product'</message>
</error>"#;
        let root = parse(doc).unwrap();
        assert_eq!(root.name, "error");
        let message = root.find("message").unwrap();
        assert_eq!(message.text, "Resource not found for segment 'Product'");
        assert_eq!(message.attribute("lang"), Some("en"));
    }

    #[test]
    fn strips_namespace_prefixes_and_keeps_empty_elements() {
        let doc = r#"<a:feed xmlns:a="urn:x"><a:entry id="1"/><a:entry id="2"/></a:feed>"#;
        let root = parse(doc).unwrap();
        assert_eq!(root.name, "feed");
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[1].attribute("id"), Some("2"));
    }

    #[test]
    fn unescapes_text() {
        let root = parse("<m>a &amp; b</m>").unwrap();
        assert_eq!(root.text, "a & b");
    }

    #[test]
    fn rejects_truncated_document() {
        assert!(parse("<feed><entry>").is_err());
    }
}

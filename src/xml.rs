use thiserror::Error;
use xml::reader::{EventReader, XmlEvent as ReadEvent};
use xml::writer::{EmitterConfig, EventWriter, XmlEvent as WriteEvent};

/// Errors produced while turning request bytes into an element tree.
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed XML request: {0}")]
    Malformed(String),
    #[error("request document is empty")]
    Empty,
}

/// One parsed XML element: tag name, attributes in document order, nested
/// children and accumulated character data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    /// Builder-style attribute append.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Builder-style child append.
    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Look up a nested element by a `/`-separated path of child tag names,
    /// e.g. `find("targets/target")`. The first match wins at each level.
    pub fn find(&self, path: &str) -> Option<&Element> {
        let mut current = self;
        for segment in path.split('/') {
            current = current.children.iter().find(|c| c.name == segment)?;
        }
        Some(current)
    }

    /// Serialize the element tree without an XML declaration.
    pub fn render(&self) -> String {
        let mut buf: Vec<u8> = Vec::new();
        let mut writer = EmitterConfig::new()
            .write_document_declaration(false)
            .create_writer(&mut buf);
        // Writing into a Vec cannot fail; a tree walk cannot produce
        // unbalanced events.
        let _ = self.write_into(&mut writer);
        String::from_utf8(buf).unwrap_or_default()
    }

    fn write_into<W: std::io::Write>(&self, writer: &mut EventWriter<W>) -> xml::writer::Result<()> {
        let mut start = WriteEvent::start_element(self.name.as_str());
        for (name, value) in &self.attributes {
            start = start.attr(name.as_str(), value);
        }
        writer.write(start)?;
        if !self.text.is_empty() {
            writer.write(WriteEvent::characters(&self.text))?;
        }
        for child in &self.children {
            child.write_into(writer)?;
        }
        writer.write(WriteEvent::end_element())?;
        Ok(())
    }
}

/// Parse one XML document into an element tree.
pub fn parse(input: &str) -> Result<Element, XmlError> {
    let reader = EventReader::new(input.as_bytes());
    let mut stack: Vec<Element> = Vec::new();

    for event in reader {
        match event.map_err(|e| XmlError::Malformed(e.to_string()))? {
            ReadEvent::StartElement {
                name, attributes, ..
            } => {
                let mut element = Element::new(name.local_name);
                for attr in attributes {
                    element
                        .attributes
                        .push((attr.name.local_name, attr.value));
                }
                stack.push(element);
            }
            ReadEvent::Characters(text) | ReadEvent::CData(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            ReadEvent::EndElement { .. } => {
                let element = stack.pop().ok_or(XmlError::Empty)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
            _ => {}
        }
    }

    Err(XmlError::Empty)
}

/// Escape character data or attribute values for hand-built fragments.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Opening tag for a streamed fragment. The consumer reconstructs a full
/// document by concatenating fragments, so this deliberately leaves the
/// element open.
pub fn open_tag(name: &str, attrs: &[(&str, String)]) -> String {
    let mut out = format!("<{name}");
    for (k, v) in attrs {
        out.push_str(&format!(" {}=\"{}\"", k, escape(v)));
    }
    out.push('>');
    out
}

pub fn close_tag(name: &str) -> String {
    format!("</{name}>")
}

/// Build the standard `<{command}_response>` document wrapping a payload.
pub fn simple_response(
    command: &str,
    status: u16,
    status_text: &str,
    content: Vec<Element>,
) -> Element {
    let mut response = Element::new(format!("{command}_response"))
        .attr("status", status.to_string())
        .attr("status_text", status_text);
    response.children = content;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_attributes_and_children() {
        let doc = parse(r#"<start_scan scan_id="abc"><scanner_params><profile>fast</profile></scanner_params></start_scan>"#).unwrap();
        assert_eq!(doc.name, "start_scan");
        assert_eq!(doc.get_attr("scan_id"), Some("abc"));
        let profile = doc.find("scanner_params/profile").unwrap();
        assert_eq!(profile.text, "fast");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse("<oops").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn render_escapes_text_and_attributes() {
        let el = Element::new("result")
            .attr("name", "a<b")
            .child(Element::with_text("value", "x&y"));
        let s = el.render();
        assert!(s.contains("a&lt;b"), "got: {s}");
        assert!(s.contains("x&amp;y"), "got: {s}");
        // Round trip through the parser.
        let back = parse(&s).unwrap();
        assert_eq!(back.get_attr("name"), Some("a<b"));
        assert_eq!(back.children[0].text, "x&y");
    }

    #[test]
    fn simple_response_shape() {
        let resp = simple_response("stop_scan", 200, "OK", vec![]);
        assert_eq!(resp.name, "stop_scan_response");
        assert_eq!(resp.get_attr("status"), Some("200"));
        assert_eq!(resp.get_attr("status_text"), Some("OK"));
    }

    #[test]
    fn fragments_concatenate_into_a_document() {
        let whole = format!(
            "{}{}{}",
            open_tag("vts", &[("total", "2".to_string())]),
            "<vt id=\"a\"></vt>",
            close_tag("vts"),
        );
        let doc = parse(&whole).unwrap();
        assert_eq!(doc.get_attr("total"), Some("2"));
        assert_eq!(doc.children.len(), 1);
    }
}

use super::document::{Element, Node};
use crate::error::{EbicsError, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

fn xml_error(err: impl std::fmt::Display) -> EbicsError {
    EbicsError::XmlError(err.to_string())
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(xml_error)
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element> {
    let mut element = Element::new(utf8(start.name().as_ref())?);
    for attribute in start.attributes() {
        let attribute = attribute.map_err(xml_error)?;
        let name = utf8(attribute.key.as_ref())?;
        let value = attribute.unescape_value().map_err(xml_error)?;
        element = element.with_attr(name, value.into_owned());
    }
    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.push_node(Node::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err(xml_error("document has more than one root element")),
    }
    Ok(())
}

/// Parses a complete document. Comments, processing instructions and the XML
/// declaration are dropped; text is kept verbatim, line endings normalized.
pub fn parse(bytes: &[u8]) -> Result<Element> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(start) => stack.push(element_from_start(&start)?),
            Event::Empty(start) => {
                let element = element_from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| xml_error("unexpected closing tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(xml_error)?.replace("\r\n", "\n");
                match stack.last_mut() {
                    Some(parent) => parent.push_node(Node::Text(text)),
                    None if text.trim().is_empty() => {}
                    None => return Err(xml_error("text outside of the root element")),
                }
            }
            Event::CData(data) => {
                let text = utf8(&data.into_inner())?;
                if let Some(parent) = stack.last_mut() {
                    parent.push_node(Node::Text(text));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(xml_error(format!("element <{}> is not closed", open.name())));
    }
    root.ok_or_else(|| xml_error("document has no root element"))
}

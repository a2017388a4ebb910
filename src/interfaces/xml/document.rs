use super::c14n;

/// Immutable XML element. Names are kept exactly as written, prefix included;
/// lookups go by local name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

pub(crate) fn local_name(qualified: &str) -> &str {
    qualified.rsplit(':').next().unwrap_or(qualified)
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Shorthand for `<name>text</name>`.
    pub fn text_element(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name).with_text(text)
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value,
            None => self.attributes.push((name, value)),
        }
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_optional_child(self, child: Option<Element>) -> Self {
        match child {
            Some(child) => self.with_child(child),
            None => self,
        }
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children
            .extend(children.into_iter().map(Node::Element));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// Returns a copy with `child` inserted right after the first direct child
    /// named `sibling`, or appended when there is none.
    pub fn with_child_after(mut self, sibling: &str, child: Element) -> Self {
        let position = self
            .children
            .iter()
            .position(|node| matches!(node, Node::Element(e) if e.local_name() == sibling));
        match position {
            Some(index) => self.children.insert(index + 1, Node::Element(child)),
            None => self.children.push(Node::Element(child)),
        }
        self
    }

    pub(crate) fn push_node(&mut self, node: Node) {
        self.children.push(node);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.children
    }

    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn child(&self, local: &str) -> Option<&Element> {
        self.children().find(|e| e.local_name() == local)
    }

    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children().filter(move |e| e.local_name() == local)
    }

    /// Follows a path of local names from this element.
    pub fn find(&self, path: &[&str]) -> Option<&Element> {
        path.iter()
            .try_fold(self, |element, local| element.child(local))
    }

    /// Text of the element at `path`, trimmed.
    pub fn find_text(&self, path: &[&str]) -> Option<String> {
        self.find(path).map(Element::text)
    }

    /// Concatenated direct text content, trimmed.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for node in &self.children {
            if let Node::Text(t) = node {
                text.push_str(t);
            }
        }
        text.trim().to_string()
    }

    /// Serialized document with an XML declaration. The element itself is
    /// written in canonical form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str(&c14n::canonicalize(self));
        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Element {
        Element::new("ebicsRequest")
            .with_attr("xmlns", "urn:org:ebics:H004")
            .with_child(
                Element::new("header")
                    .with_attr("authenticate", "true")
                    .with_child(Element::text_element("HostID", " HOST ")),
            )
            .with_child(Element::new("body"))
    }

    #[test]
    fn test_navigation() {
        let doc = sample();
        assert_eq!(doc.find_text(&["header", "HostID"]).as_deref(), Some("HOST"));
        assert!(doc.find(&["header", "Missing"]).is_none());
        assert_eq!(doc.child("header").unwrap().attr("authenticate"), Some("true"));
        assert!(doc.child("body").unwrap().children().next().is_none());
    }

    #[test]
    fn test_with_child_after_keeps_order() {
        let doc = sample().with_child_after("header", Element::new("AuthSignature"));
        let names: Vec<_> = doc.children().map(Element::name).collect();
        assert_eq!(names, ["header", "AuthSignature", "body"]);
    }

    #[test]
    fn test_local_name_strips_prefix() {
        let e = Element::new("ds:SignedInfo");
        assert_eq!(e.local_name(), "SignedInfo");
        assert_eq!(e.name(), "ds:SignedInfo");
    }

    #[test]
    fn test_attribute_overwrite() {
        let e = Element::new("a").with_attr("x", "1").with_attr("x", "2");
        assert_eq!(e.attributes().len(), 1);
        assert_eq!(e.attr("x"), Some("2"));
    }
}

//! Inclusive canonical XML 1.0 (without comments) over the element tree.
//!
//! Empty elements are written as start/end pairs, namespace declarations come
//! first ordered by prefix, then attributes ordered by namespace URI and local
//! name. An element canonicalized on its own renders every namespace in scope
//! at its position.

use super::document::{Element, Node, local_name};
use std::collections::BTreeMap;

/// Prefix to namespace URI; the default namespace has the empty prefix.
pub type NamespaceScope = BTreeMap<String, String>;

fn declaration_prefix(attribute: &str) -> Option<&str> {
    if attribute == "xmlns" {
        Some("")
    } else {
        attribute.strip_prefix("xmlns:")
    }
}

/// Scope of `element` given the scope of its parent.
pub fn scope_of(element: &Element, parent: &NamespaceScope) -> NamespaceScope {
    let mut scope = parent.clone();
    for (name, value) in element.attributes() {
        if let Some(prefix) = declaration_prefix(name) {
            scope.insert(prefix.to_string(), value.clone());
        }
    }
    scope
}

pub fn canonicalize(element: &Element) -> String {
    canonicalize_in_scope(element, &NamespaceScope::new())
}

/// Canonical form of `element` as a document subset whose parent has the
/// namespace scope `parent_scope`.
pub fn canonicalize_in_scope(element: &Element, parent_scope: &NamespaceScope) -> String {
    let mut out = String::new();
    write_element(&mut out, element, parent_scope, &NamespaceScope::new());
    out
}

/// Concatenated canonical forms of every element matching `selected`, in
/// document order. Nested matches are rendered again on their own.
pub fn canonicalize_matching<F>(root: &Element, selected: F) -> String
where
    F: Fn(&Element) -> bool,
{
    let mut out = String::new();
    collect_matching(&mut out, root, &NamespaceScope::new(), &selected);
    out
}

fn collect_matching<F>(out: &mut String, element: &Element, parent_scope: &NamespaceScope, selected: &F)
where
    F: Fn(&Element) -> bool,
{
    if selected(element) {
        write_element(out, element, parent_scope, &NamespaceScope::new());
    }
    let scope = scope_of(element, parent_scope);
    for child in element.children() {
        collect_matching(out, child, &scope, selected);
    }
}

fn write_element(out: &mut String, element: &Element, parent_scope: &NamespaceScope, rendered: &NamespaceScope) {
    let scope = scope_of(element, parent_scope);

    out.push('<');
    out.push_str(element.name());

    for (prefix, uri) in &scope {
        let already = rendered.get(prefix);
        if already == Some(uri) {
            continue;
        }
        // xmlns="" is only needed to undo a rendered default namespace.
        if prefix.is_empty() && uri.is_empty() && already.is_none() {
            continue;
        }
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        escape_attribute(out, uri);
        out.push('"');
    }

    let mut attributes: Vec<(&str, &str, &str, &str)> = element
        .attributes()
        .iter()
        .filter(|(name, _)| declaration_prefix(name).is_none())
        .map(|(name, value)| {
            let namespace = match name.split_once(':') {
                Some((prefix, _)) => scope.get(prefix).map(String::as_str).unwrap_or(""),
                None => "",
            };
            (namespace, local_name(name), name.as_str(), value.as_str())
        })
        .collect();
    attributes.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    for (_, _, name, value) in attributes {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_attribute(out, value);
        out.push('"');
    }
    out.push('>');

    for node in element.nodes() {
        match node {
            Node::Element(child) => write_element(out, child, &scope, &scope),
            Node::Text(text) => escape_text(out, text),
        }
    }

    out.push_str("</");
    out.push_str(element.name());
    out.push('>');
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

fn escape_attribute(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

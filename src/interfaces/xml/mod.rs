//! Minimal XML toolkit for EBICS documents: an immutable element tree, a
//! `quick-xml` based parser, canonicalization and the authentication signature.

pub mod c14n;
mod document;
pub mod dsig;
mod parser;

pub use document::{Element, Node};
pub use parser::parse;

//-
// Copyright (c) 2023, Jason Lingle
//
// This file is part of Deadprop.
//
// Deadprop is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Deadprop is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Deadprop. If not, see <http://www.gnu.org/licenses/>.

//! The structured values stored in properties.
//!
//! A property value is the root element of a small XML document. The store
//! does not interpret values; it only needs to turn them into text and back,
//! which is what `ValueSerializer` abstracts.

use std::fmt::Write as _;

use quick_xml::{
    events::{BytesStart, Event},
    name::{Namespace, ResolveResult},
    NsReader,
};
use serde::{Deserialize, Serialize};

use super::name::PropertyName;
use crate::support::error::Error;

/// An element in a property value document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub name: PropertyName,
    /// Attributes in document order. Unqualified attributes have an empty
    /// namespace.
    pub attributes: Vec<(PropertyName, String)>,
    pub children: Vec<Node>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    pub fn new(name: PropertyName) -> Self {
        Element {
            name,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_attribute(
        mut self,
        name: PropertyName,
        value: impl Into<String>,
    ) -> Self {
        self.attributes.push((name, value.into()));
        self
    }

    /// The concatenation of all text within this element.
    pub fn text(&self) -> String {
        let mut accum = String::new();
        self.collect_text(&mut accum);
        accum
    }

    fn collect_text(&self, accum: &mut String) {
        for child in &self.children {
            match *child {
                Node::Text(ref t) => accum.push_str(t),
                Node::Element(ref e) => e.collect_text(accum),
            }
        }
    }
}

/// Conversion between values and their canonical text form.
///
/// `from_canonical_text` must accept anything `to_canonical_text` produced
/// and return an equal value.
pub trait ValueSerializer {
    fn to_canonical_text(&self, value: &Element) -> String;
    fn from_canonical_text(&self, text: &[u8]) -> Result<Element, Error>;
}

/// Serialises values as namespaced XML documents.
#[derive(Clone, Copy, Debug, Default)]
pub struct XmlSerializer;

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n";

impl ValueSerializer for XmlSerializer {
    fn to_canonical_text(&self, value: &Element) -> String {
        let mut out = String::from(XML_DECLARATION);
        write_element(&mut out, value, "");
        out
    }

    fn from_canonical_text(&self, text: &[u8]) -> Result<Element, Error> {
        std::str::from_utf8(text).map_err(|e| bad(e))?;

        let mut reader = NsReader::from_reader(text);
        let mut stack = Vec::<Element>::new();
        let mut root = None::<Element>;

        loop {
            let (resolved, event) = reader.read_resolved_event().map_err(bad)?;
            let namespace = resolved_namespace(resolved)?;

            match event {
                Event::Start(ref tag) => {
                    stack.push(start_element(&reader, namespace, tag)?);
                }
                Event::Empty(ref tag) => {
                    let element = start_element(&reader, namespace, tag)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| bad("unbalanced end tag"))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(ref text) => {
                    let text = text.unescape().map_err(bad)?;
                    match stack.last_mut() {
                        Some(parent) => {
                            parent.children.push(Node::Text(text.into_owned()))
                        }
                        None if text.trim().is_empty() => (),
                        None => return Err(bad("text outside root element")),
                    }
                }
                Event::CData(ref data) => {
                    let text = std::str::from_utf8(data).map_err(bad)?;
                    match stack.last_mut() {
                        Some(parent) => {
                            parent.children.push(Node::Text(text.to_owned()))
                        }
                        None => return Err(bad("CDATA outside root element")),
                    }
                }
                Event::Eof => break,
                _ => (),
            }
        }

        if !stack.is_empty() {
            return Err(bad("unclosed element"));
        }
        root.ok_or_else(|| bad("no root element"))
    }
}

fn bad(e: impl std::fmt::Display) -> Error {
    Error::MalformedDocument(e.to_string())
}

fn resolved_namespace(resolved: ResolveResult) -> Result<String, Error> {
    match resolved {
        ResolveResult::Bound(Namespace(ns)) => {
            String::from_utf8(ns.to_vec()).map_err(bad)
        }
        ResolveResult::Unbound => Ok(String::new()),
        ResolveResult::Unknown(prefix) => Err(bad(format!(
            "unknown namespace prefix {:?}",
            String::from_utf8_lossy(&prefix)
        ))),
    }
}

fn start_element(
    reader: &NsReader<&[u8]>,
    namespace: String,
    tag: &BytesStart,
) -> Result<Element, Error> {
    let local = String::from_utf8(tag.local_name().as_ref().to_vec())
        .map_err(bad)?;
    let mut element = Element::new(PropertyName::new(namespace, local));

    for attr in tag.attributes() {
        let attr = attr.map_err(bad)?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }

        let (resolved, local) = reader.resolve_attribute(attr.key);
        let namespace = resolved_namespace(resolved)?;
        let local = String::from_utf8(local.as_ref().to_vec()).map_err(bad)?;
        let value = attr.unescape_value().map_err(bad)?;
        element
            .attributes
            .push((PropertyName::new(namespace, local), value.into_owned()));
    }

    Ok(element)
}

fn attach(
    stack: &mut Vec<Element>,
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), Error> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(element));
        Ok(())
    } else if root.is_none() {
        *root = Some(element);
        Ok(())
    } else {
        Err(bad("multiple root elements"))
    }
}

/// Write `element` to `out`, declaring its namespace as the default
/// namespace whenever it differs from `default_ns`.
fn write_element(out: &mut String, element: &Element, default_ns: &str) {
    let name = &element.name;
    out.push('<');
    out.push_str(&name.name);
    if name.namespace != default_ns {
        let _ = write!(out, " xmlns=\"{}\"", escape(&name.namespace));
    }

    for (ix, &(ref attr, ref value)) in element.attributes.iter().enumerate() {
        if attr.namespace.is_empty() {
            let _ = write!(out, " {}=\"{}\"", attr.name, escape(value));
        } else {
            let _ = write!(
                out,
                " xmlns:a{ix}=\"{}\" a{ix}:{}=\"{}\"",
                escape(&attr.namespace),
                attr.name,
                escape(value),
            );
        }
    }

    if element.children.is_empty() {
        out.push_str("/>");
        return;
    }

    out.push('>');
    for child in &element.children {
        match *child {
            Node::Text(ref t) => out.push_str(&escape(t)),
            Node::Element(ref e) => write_element(out, e, &name.namespace),
        }
    }
    let _ = write!(out, "</{}>", name.name);
}

fn escape(s: &str) -> std::borrow::Cow<'_, str> {
    quick_xml::escape::escape(s)
}

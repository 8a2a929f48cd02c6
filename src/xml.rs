use std::fs;

use camino::Utf8Path;
use indexmap::IndexMap;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::PushError;

/// A parsed XML element. Names are local names; namespace prefixes and
/// `xmlns` declarations are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    /// Attribute values as written, prefixes kept (`xs:string`).
    pub attributes: IndexMap<String, String>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn read(path: &Utf8Path) -> Result<Self, PushError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| PushError::Filesystem(format!("read {path}: {err}")))?;
        Self::parse(&content)
    }

    pub fn parse(xml: &str) -> Result<Self, PushError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        loop {
            let event = reader
                .read_event()
                .map_err(|err| PushError::Xml(format!("at byte {}: {err}", reader.buffer_position())))?;
            match event {
                Event::Start(start) => stack.push(element_from_start(&start)?),
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| PushError::Xml("unbalanced end tag".to_string()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|err| PushError::Xml(err.to_string()))?;
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current
                            .text
                            .push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(PushError::Xml("unexpected end of document".to_string()));
        }
        root.ok_or_else(|| PushError::Xml("document has no root element".to_string()))
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn children_named<'a, 'n>(
        &'a self,
        name: &'n str,
    ) -> impl Iterator<Item = &'a Element> + use<'a, 'n> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// First element along a `/`-separated path of child names.
    pub fn find(&self, path: &str) -> Option<&Element> {
        path.split('/')
            .filter(|part| !part.is_empty())
            .try_fold(self, |current, part| current.child(part))
    }

    /// Every element matching a `/`-separated path of child names.
    pub fn find_all(&self, path: &str) -> Vec<&Element> {
        let mut current = vec![self];
        for part in path.split('/').filter(|part| !part.is_empty()) {
            current = current
                .into_iter()
                .flat_map(|element| element.children_named(part))
                .collect();
        }
        current
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element, PushError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = IndexMap::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|err| PushError::Xml(err.to_string()))?;
        let key = attribute.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let local = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|err| PushError::Xml(err.to_string()))?
            .into_owned();
        attributes.insert(local, value);
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), PushError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(PushError::Xml(format!(
            "second root element <{}>",
            element.name
        ))),
    }
}

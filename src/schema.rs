//! Structural validation of submission documents against an XSD.
//!
//! Only the parts of XML Schema that NCBI's submission schemas rely on are
//! understood: global and local element declarations, named and anonymous
//! complex and simple types, `sequence`/`choice`/`all` particles with
//! occurrence bounds, element and group references, attribute groups,
//! `complexContent`/`simpleContent` derivation, required attributes,
//! enumerations and the common numeric/boolean/date built-ins. Facets other
//! than enumeration are ignored. `include` and `import` are resolved relative
//! to the including file.

use std::collections::{HashMap, HashSet};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::debug;

use crate::error::PushError;
use crate::xml::Element;

const MAX_TYPE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occurs {
    Bounded(u32),
    Unbounded,
}

impl Occurs {
    fn allows(self, count: u32) -> bool {
        match self {
            Occurs::Bounded(max) => count < max,
            Occurs::Unbounded => true,
        }
    }
}

#[derive(Debug, Clone)]
enum TypeRef {
    Named(String),
    Complex(Box<ComplexType>),
    Simple(SimpleType),
    Any,
}

#[derive(Debug, Clone)]
struct ElementDecl {
    name: String,
    kind: TypeRef,
}

#[derive(Debug, Clone)]
enum Term {
    Element(ElementDecl),
    ElementRef(String),
    Sequence(Vec<Particle>),
    Choice(Vec<Particle>),
    All(Vec<Particle>),
    GroupRef(String),
    Any,
}

#[derive(Debug, Clone)]
struct Particle {
    term: Term,
    min: u32,
    max: Occurs,
}

#[derive(Debug, Clone)]
enum Derivation {
    Extension(String),
    Restriction(String),
}

#[derive(Debug, Clone, Default)]
struct ComplexType {
    content: Option<Particle>,
    attributes: Vec<AttributeDecl>,
    attribute_groups: Vec<String>,
    any_attribute: bool,
    mixed: bool,
    derivation: Option<Derivation>,
    /// Set for `simpleContent`: the type of the element's text.
    text_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct SimpleType {
    base: Option<String>,
    enumeration: Vec<String>,
}

#[derive(Debug, Clone)]
struct AttributeDecl {
    name: String,
    required: bool,
    kind: Option<TypeRef>,
    /// Set when the declaration is a `ref` to a global attribute.
    reference: bool,
}

#[derive(Debug, Clone, Default)]
struct AttributeGroup {
    attributes: Vec<AttributeDecl>,
    groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub document: Utf8PathBuf,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Schema {
    elements: HashMap<String, ElementDecl>,
    complex_types: HashMap<String, ComplexType>,
    simple_types: HashMap<String, SimpleType>,
    groups: HashMap<String, Particle>,
    attribute_groups: HashMap<String, AttributeGroup>,
    attributes: HashMap<String, AttributeDecl>,
}

impl Schema {
    pub fn load(path: &Utf8Path) -> Result<Self, PushError> {
        let mut schema = Schema::default();
        let mut visited = HashSet::new();
        schema.load_file(path, &mut visited)?;
        debug!(
            "loaded schema {path}: {} elements, {} complex types",
            schema.elements.len(),
            schema.complex_types.len()
        );
        Ok(schema)
    }

    /// Parses a single schema document; includes resolve against `base_dir`.
    pub fn parse_str(xsd: &str, base_dir: Option<&Utf8Path>) -> Result<Self, PushError> {
        let mut schema = Schema::default();
        let root = Element::parse(xsd).map_err(|err| PushError::Schema {
            path: Utf8PathBuf::from("<inline>"),
            message: err.to_string(),
        })?;
        let mut visited = HashSet::new();
        schema.add_document(&root, base_dir, &mut visited)?;
        Ok(schema)
    }

    fn load_file(
        &mut self,
        path: &Utf8Path,
        visited: &mut HashSet<Utf8PathBuf>,
    ) -> Result<(), PushError> {
        if !visited.insert(path.to_path_buf()) {
            return Ok(());
        }
        let root = Element::read(path).map_err(|err| PushError::Schema {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        self.add_document(&root, path.parent(), visited)
    }

    fn add_document(
        &mut self,
        root: &Element,
        base_dir: Option<&Utf8Path>,
        visited: &mut HashSet<Utf8PathBuf>,
    ) -> Result<(), PushError> {
        if root.name != "schema" {
            return Err(PushError::Schema {
                path: base_dir.map(Utf8Path::to_path_buf).unwrap_or_default(),
                message: format!("expected <schema> root, found <{}>", root.name),
            });
        }

        for child in &root.children {
            match child.name.as_str() {
                "include" | "import" | "redefine" => {
                    let Some(location) = child.attr("schemaLocation") else {
                        continue;
                    };
                    if location.contains("://") {
                        debug!("skipping remote schema {location}");
                        continue;
                    }
                    let path = match base_dir {
                        Some(dir) => dir.join(location),
                        None => Utf8PathBuf::from(location),
                    };
                    self.load_file(&path, visited)?;
                }
                "element" => {
                    if let Some(decl) = parse_element_decl(child) {
                        self.elements.insert(decl.name.clone(), decl);
                    }
                }
                "complexType" => {
                    if let Some(name) = child.attr("name") {
                        self.complex_types
                            .insert(name.to_string(), parse_complex_type(child));
                    }
                }
                "simpleType" => {
                    if let Some(name) = child.attr("name") {
                        self.simple_types
                            .insert(name.to_string(), parse_simple_type(child));
                    }
                }
                "group" => {
                    let name = child.attr("name");
                    let particle = child.children.iter().find_map(parse_particle);
                    if let (Some(name), Some(particle)) = (name, particle) {
                        self.groups.insert(name.to_string(), particle);
                    }
                }
                "attributeGroup" => {
                    if let Some(name) = child.attr("name") {
                        self.attribute_groups
                            .insert(name.to_string(), parse_attribute_group(child));
                    }
                }
                "attribute" => {
                    if let Some(decl) = parse_attribute(child) {
                        self.attributes.insert(decl.name.clone(), decl);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate_file(&self, path: &Utf8Path) -> Result<ValidationReport, PushError> {
        let root = Element::read(path)?;
        Ok(ValidationReport {
            document: path.to_path_buf(),
            violations: self.validate(&root),
        })
    }

    pub fn validate(&self, root: &Element) -> Vec<Violation> {
        let mut violations = Vec::new();
        let path = format!("/{}", root.name);
        match self.elements.get(&root.name) {
            Some(decl) => self.check_element(root, decl, &path, &mut violations),
            None => violations.push(Violation {
                path,
                message: format!("root element <{}> is not declared", root.name),
            }),
        }
        violations
    }

    fn check_element(
        &self,
        element: &Element,
        decl: &ElementDecl,
        path: &str,
        violations: &mut Vec<Violation>,
    ) {
        match self.resolve_type(&decl.kind) {
            Resolved::Any => {}
            Resolved::Builtin(name) => {
                self.check_simple_only(element, path, violations);
                self.check_builtin_value(&element.text, name, path, violations);
            }
            Resolved::Simple(simple) => {
                self.check_simple_only(element, path, violations);
                self.check_simple_value(&element.text, simple, path, 0, violations);
            }
            Resolved::Complex(complex) => self.check_complex(element, complex, path, violations),
            Resolved::Unknown(name) => {
                debug!("unknown type {name} at {path}, not checked");
            }
        }
    }

    fn check_simple_only(&self, element: &Element, path: &str, violations: &mut Vec<Violation>) {
        if let Some(child) = element.children.first() {
            violations.push(Violation {
                path: path.to_string(),
                message: format!("<{}> must not contain element <{}>", element.name, child.name),
            });
        }
        for name in element.attributes.keys() {
            if !is_instance_attribute(name) {
                violations.push(Violation {
                    path: path.to_string(),
                    message: format!("attribute {name} is not allowed on <{}>", element.name),
                });
            }
        }
    }

    fn check_complex(
        &self,
        element: &Element,
        complex: &ComplexType,
        path: &str,
        violations: &mut Vec<Violation>,
    ) {
        let attributes = self.effective_attributes(complex, 0);
        for decl in &attributes {
            match element.attributes.get(&decl.name) {
                Some(value) => {
                    if let Some(kind) = &decl.kind {
                        self.check_value(value, kind, &format!("{path}/@{}", decl.name), violations);
                    }
                }
                None if decl.required => violations.push(Violation {
                    path: path.to_string(),
                    message: format!(
                        "<{}> is missing required attribute {}",
                        element.name, decl.name
                    ),
                }),
                None => {}
            }
        }
        if !self.allows_any_attribute(complex, 0) {
            for name in element.attributes.keys() {
                let declared = attributes.iter().any(|decl| &decl.name == name);
                if !declared && !is_instance_attribute(name) {
                    violations.push(Violation {
                        path: path.to_string(),
                        message: format!("attribute {name} is not allowed on <{}>", element.name),
                    });
                }
            }
        }

        if let Some(text_type) = self.effective_text_type(complex, 0) {
            if let Some(child) = element.children.first() {
                violations.push(Violation {
                    path: path.to_string(),
                    message: format!(
                        "<{}> has simple content but contains <{}>",
                        element.name, child.name
                    ),
                });
            }
            self.check_value(
                &element.text,
                &TypeRef::Named(text_type),
                path,
                violations,
            );
            return;
        }

        let mixed = complex.mixed;
        if !mixed && !element.text.trim().is_empty() {
            violations.push(Violation {
                path: path.to_string(),
                message: format!("<{}> must not contain text", element.name),
            });
        }

        let children: Vec<&Element> = element.children.iter().collect();
        let content = self.effective_content(complex, 0);
        let Some(content) = content else {
            if let Some(child) = children.first() {
                violations.push(Violation {
                    path: path.to_string(),
                    message: format!("<{}> must be empty, found <{}>", element.name, child.name),
                });
            }
            return;
        };

        let mut matched = Vec::new();
        match self.match_particle(&content, &children, 0, &mut matched) {
            Some(end) if end == children.len() => {}
            Some(end) => violations.push(Violation {
                path: format!("{path}/{}[{}]", children[end].name, end + 1),
                message: format!(
                    "unexpected element <{}> in <{}>",
                    children[end].name, element.name
                ),
            }),
            None => {
                let mut expected = Vec::new();
                self.expected_names(&content, &mut expected, 0);
                violations.push(Violation {
                    path: path.to_string(),
                    message: format!(
                        "content of <{}> does not match the schema (expected {})",
                        element.name,
                        expected.join(", ")
                    ),
                });
                return;
            }
        }

        for (index, decl) in matched {
            let child = children[index];
            let child_path = format!("{path}/{}[{}]", child.name, index + 1);
            if let Some(decl) = decl {
                self.check_element(child, &decl, &child_path, violations);
            }
        }
    }

    /// Greedily matches `particle` against `children[pos..]`, honouring its
    /// occurrence bounds. Returns the position after the match.
    fn match_particle(
        &self,
        particle: &Particle,
        children: &[&Element],
        pos: usize,
        matched: &mut Vec<(usize, Option<ElementDecl>)>,
    ) -> Option<usize> {
        let checkpoint = matched.len();
        let mut count = 0u32;
        let mut current = pos;
        while particle.max.allows(count) {
            match self.match_once(&particle.term, children, current, matched) {
                Some(next) if next > current => {
                    current = next;
                    count += 1;
                }
                Some(_) => {
                    // an empty match satisfies any remaining minimum
                    count = count.max(particle.min);
                    break;
                }
                None => break,
            }
        }
        if count < particle.min {
            matched.truncate(checkpoint);
            return None;
        }
        Some(current)
    }

    fn match_once(
        &self,
        term: &Term,
        children: &[&Element],
        pos: usize,
        matched: &mut Vec<(usize, Option<ElementDecl>)>,
    ) -> Option<usize> {
        match term {
            Term::Element(decl) => {
                let child = children.get(pos)?;
                (child.name == decl.name).then(|| {
                    matched.push((pos, Some(decl.clone())));
                    pos + 1
                })
            }
            Term::ElementRef(name) => {
                let child = children.get(pos)?;
                if &child.name != name {
                    return None;
                }
                matched.push((pos, self.elements.get(name).cloned()));
                Some(pos + 1)
            }
            Term::Any => {
                children.get(pos)?;
                matched.push((pos, None));
                Some(pos + 1)
            }
            Term::Sequence(items) => {
                let checkpoint = matched.len();
                let mut current = pos;
                for item in items {
                    match self.match_particle(item, children, current, matched) {
                        Some(next) => current = next,
                        None => {
                            matched.truncate(checkpoint);
                            return None;
                        }
                    }
                }
                Some(current)
            }
            Term::Choice(items) => {
                let mut empty_match = false;
                for item in items {
                    let checkpoint = matched.len();
                    match self.match_particle(item, children, pos, matched) {
                        Some(next) if next > pos => return Some(next),
                        Some(_) => {
                            matched.truncate(checkpoint);
                            empty_match = true;
                        }
                        None => {}
                    }
                }
                empty_match.then_some(pos)
            }
            Term::All(items) => {
                let mut used = vec![false; items.len()];
                let mut current = pos;
                'children: while let Some(child) = children.get(current) {
                    for (i, item) in items.iter().enumerate() {
                        if used[i] || self.term_name(&item.term) != Some(child.name.as_str()) {
                            continue;
                        }
                        if self.match_once(&item.term, children, current, matched).is_some() {
                            used[i] = true;
                            current += 1;
                            continue 'children;
                        }
                    }
                    break;
                }
                let complete = items
                    .iter()
                    .zip(&used)
                    .all(|(item, used)| *used || item.min == 0);
                complete.then_some(current)
            }
            Term::GroupRef(name) => {
                let group = self.groups.get(name)?;
                self.match_particle(group, children, pos, matched)
            }
        }
    }

    fn term_name<'a>(&'a self, term: &'a Term) -> Option<&'a str> {
        match term {
            Term::Element(decl) => Some(decl.name.as_str()),
            Term::ElementRef(name) => Some(name.as_str()),
            _ => None,
        }
    }

    fn expected_names(&self, particle: &Particle, names: &mut Vec<String>, depth: usize) {
        if depth > MAX_TYPE_DEPTH {
            return;
        }
        match &particle.term {
            Term::Element(decl) => names.push(format!("<{}>", decl.name)),
            Term::ElementRef(name) => names.push(format!("<{name}>")),
            Term::Any => names.push("any element".to_string()),
            Term::Sequence(items) | Term::Choice(items) | Term::All(items) => {
                for item in items {
                    self.expected_names(item, names, depth + 1);
                }
            }
            Term::GroupRef(name) => {
                if let Some(group) = self.groups.get(name) {
                    self.expected_names(group, names, depth + 1);
                }
            }
        }
    }

    fn effective_content(&self, complex: &ComplexType, depth: usize) -> Option<Particle> {
        let own = complex.content.clone();
        let Some(Derivation::Extension(base)) = &complex.derivation else {
            return own;
        };
        if depth > MAX_TYPE_DEPTH {
            return own;
        }
        let inherited = self
            .complex_types
            .get(base)
            .and_then(|base| self.effective_content(base, depth + 1));
        match (inherited, own) {
            (Some(inherited), Some(own)) => Some(Particle {
                term: Term::Sequence(vec![inherited, own]),
                min: 1,
                max: Occurs::Bounded(1),
            }),
            (inherited, own) => inherited.or(own),
        }
    }

    fn effective_attributes(&self, complex: &ComplexType, depth: usize) -> Vec<AttributeDecl> {
        let mut attributes = Vec::new();
        for decl in &complex.attributes {
            attributes.push(self.resolve_attribute(decl));
        }
        for group in &complex.attribute_groups {
            self.collect_group_attributes(group, &mut attributes, depth + 1);
        }
        if depth <= MAX_TYPE_DEPTH {
            let base = match &complex.derivation {
                Some(Derivation::Extension(base)) | Some(Derivation::Restriction(base)) => {
                    self.complex_types.get(base)
                }
                None => None,
            };
            if let Some(base) = base {
                for decl in self.effective_attributes(base, depth + 1) {
                    if !attributes.iter().any(|own| own.name == decl.name) {
                        attributes.push(decl);
                    }
                }
            }
        }
        attributes
    }

    fn collect_group_attributes(&self, name: &str, out: &mut Vec<AttributeDecl>, depth: usize) {
        if depth > MAX_TYPE_DEPTH {
            return;
        }
        let Some(group) = self.attribute_groups.get(name) else {
            return;
        };
        for decl in &group.attributes {
            out.push(self.resolve_attribute(decl));
        }
        for nested in &group.groups {
            self.collect_group_attributes(nested, out, depth + 1);
        }
    }

    fn resolve_attribute(&self, decl: &AttributeDecl) -> AttributeDecl {
        if !decl.reference {
            return decl.clone();
        }
        match self.attributes.get(&decl.name) {
            Some(global) => AttributeDecl {
                name: decl.name.clone(),
                required: decl.required,
                kind: global.kind.clone(),
                reference: false,
            },
            None => decl.clone(),
        }
    }

    fn allows_any_attribute(&self, complex: &ComplexType, depth: usize) -> bool {
        if complex.any_attribute {
            return true;
        }
        if depth > MAX_TYPE_DEPTH {
            return false;
        }
        match &complex.derivation {
            Some(Derivation::Extension(base)) => self
                .complex_types
                .get(base)
                .is_some_and(|base| self.allows_any_attribute(base, depth + 1)),
            _ => false,
        }
    }

    fn effective_text_type(&self, complex: &ComplexType, depth: usize) -> Option<String> {
        if let Some(text_type) = &complex.text_type {
            // simpleContent deriving from a complex type inherits its text type
            return match self.complex_types.get(text_type) {
                Some(base) if depth <= MAX_TYPE_DEPTH => self
                    .effective_text_type(base, depth + 1)
                    .or_else(|| Some("string".to_string())),
                _ => Some(text_type.clone()),
            };
        }
        None
    }

    fn resolve_type<'a>(&'a self, kind: &'a TypeRef) -> Resolved<'a> {
        match kind {
            TypeRef::Any => Resolved::Any,
            TypeRef::Complex(complex) => Resolved::Complex(complex),
            TypeRef::Simple(simple) => Resolved::Simple(simple),
            TypeRef::Named(name) => {
                if let Some(complex) = self.complex_types.get(name) {
                    Resolved::Complex(complex)
                } else if let Some(simple) = self.simple_types.get(name) {
                    Resolved::Simple(simple)
                } else if name == "anyType" {
                    Resolved::Any
                } else if is_builtin(name) {
                    Resolved::Builtin(name)
                } else {
                    Resolved::Unknown(name)
                }
            }
        }
    }

    fn check_value(&self, value: &str, kind: &TypeRef, path: &str, violations: &mut Vec<Violation>) {
        match self.resolve_type(kind) {
            Resolved::Simple(simple) => self.check_simple_value(value, simple, path, 0, violations),
            Resolved::Builtin(name) => self.check_builtin_value(value, name, path, violations),
            _ => {}
        }
    }

    fn check_simple_value(
        &self,
        value: &str,
        simple: &SimpleType,
        path: &str,
        depth: usize,
        violations: &mut Vec<Violation>,
    ) {
        if !simple.enumeration.is_empty() && !simple.enumeration.iter().any(|v| v == value.trim()) {
            violations.push(Violation {
                path: path.to_string(),
                message: format!(
                    "value {:?} is not one of [{}]",
                    value.trim(),
                    simple.enumeration.join(", ")
                ),
            });
            return;
        }
        let Some(base) = &simple.base else {
            return;
        };
        if depth > MAX_TYPE_DEPTH {
            return;
        }
        if let Some(parent) = self.simple_types.get(base) {
            self.check_simple_value(value, parent, path, depth + 1, violations);
        } else if is_builtin(base) {
            self.check_builtin_value(value, base, path, violations);
        }
    }

    fn check_builtin_value(
        &self,
        value: &str,
        builtin: &str,
        path: &str,
        violations: &mut Vec<Violation>,
    ) {
        if !builtin_accepts(builtin, value.trim()) {
            violations.push(Violation {
                path: path.to_string(),
                message: format!("value {:?} is not a valid {builtin}", value.trim()),
            });
        }
    }
}

enum Resolved<'a> {
    Any,
    Builtin(&'a str),
    Simple(&'a SimpleType),
    Complex(&'a ComplexType),
    Unknown(&'a str),
}

/// Attributes every instance element may carry (`xsi:*`, `xml:*`).
fn is_instance_attribute(name: &str) -> bool {
    matches!(
        name,
        "schemaLocation" | "noNamespaceSchemaLocation" | "type" | "nil" | "lang" | "space"
    )
}

fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "string"
            | "normalizedString"
            | "token"
            | "NMTOKEN"
            | "NMTOKENS"
            | "Name"
            | "NCName"
            | "ID"
            | "IDREF"
            | "IDREFS"
            | "anyURI"
            | "language"
            | "base64Binary"
            | "hexBinary"
            | "QName"
            | "anySimpleType"
            | "boolean"
            | "decimal"
            | "float"
            | "double"
            | "integer"
            | "int"
            | "long"
            | "short"
            | "byte"
            | "nonNegativeInteger"
            | "positiveInteger"
            | "nonPositiveInteger"
            | "negativeInteger"
            | "unsignedLong"
            | "unsignedInt"
            | "unsignedShort"
            | "unsignedByte"
            | "date"
            | "dateTime"
            | "time"
            | "duration"
            | "gYear"
            | "gYearMonth"
    )
}

fn builtin_accepts(builtin: &str, value: &str) -> bool {
    match builtin {
        "boolean" => matches!(value, "true" | "false" | "1" | "0"),
        "decimal" | "float" | "double" => {
            value.parse::<f64>().is_ok() || matches!(value, "INF" | "-INF" | "NaN")
        }
        "integer" | "int" | "long" | "short" | "byte" => value.parse::<i128>().is_ok(),
        "nonNegativeInteger" | "unsignedLong" | "unsignedInt" | "unsignedShort"
        | "unsignedByte" => value.parse::<u128>().is_ok(),
        "positiveInteger" => value.parse::<u128>().is_ok_and(|n| n > 0),
        "nonPositiveInteger" => value.parse::<i128>().is_ok_and(|n| n <= 0),
        "negativeInteger" => value.parse::<i128>().is_ok_and(|n| n < 0),
        "date" => {
            let date = value.get(..10).unwrap_or(value);
            NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
        }
        "dateTime" => {
            DateTime::parse_from_rfc3339(value).is_ok()
                || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        }
        "gYear" => value.len() >= 4 && value[..4].chars().all(|ch| ch.is_ascii_digit()),
        _ => true,
    }
}

fn local(name: &str) -> String {
    name.rsplit(':').next().unwrap_or(name).to_string()
}

fn parse_occurs(element: &Element) -> (u32, Occurs) {
    let min = element
        .attr("minOccurs")
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(1);
    let max = match element.attr("maxOccurs").map(str::trim) {
        Some("unbounded") => Occurs::Unbounded,
        Some(value) => Occurs::Bounded(value.parse().unwrap_or(1)),
        None => Occurs::Bounded(1),
    };
    (min, max)
}

fn parse_element_decl(element: &Element) -> Option<ElementDecl> {
    let name = element.attr("name")?.to_string();
    let kind = if let Some(type_name) = element.attr("type") {
        TypeRef::Named(local(type_name))
    } else if let Some(complex) = element.child("complexType") {
        TypeRef::Complex(Box::new(parse_complex_type(complex)))
    } else if let Some(simple) = element.child("simpleType") {
        TypeRef::Simple(parse_simple_type(simple))
    } else {
        TypeRef::Any
    };
    Some(ElementDecl { name, kind })
}

fn parse_particle(element: &Element) -> Option<Particle> {
    let (min, max) = parse_occurs(element);
    let term = match element.name.as_str() {
        "element" => match element.attr("ref") {
            Some(reference) => Term::ElementRef(local(reference)),
            None => Term::Element(parse_element_decl(element)?),
        },
        "sequence" => Term::Sequence(element.children.iter().filter_map(parse_particle).collect()),
        "choice" => Term::Choice(element.children.iter().filter_map(parse_particle).collect()),
        "all" => Term::All(element.children.iter().filter_map(parse_particle).collect()),
        "group" => Term::GroupRef(local(element.attr("ref")?)),
        "any" => Term::Any,
        _ => return None,
    };
    Some(Particle { term, min, max })
}

fn parse_complex_type(element: &Element) -> ComplexType {
    let mut complex = ComplexType {
        mixed: element.attr("mixed") == Some("true"),
        ..ComplexType::default()
    };
    collect_complex_children(element, &mut complex);

    if let Some(content) = element.child("complexContent") {
        if content.attr("mixed") == Some("true") {
            complex.mixed = true;
        }
        if let Some(extension) = content.child("extension") {
            complex.derivation = extension.attr("base").map(|base| Derivation::Extension(local(base)));
            collect_complex_children(extension, &mut complex);
        } else if let Some(restriction) = content.child("restriction") {
            complex.derivation = restriction
                .attr("base")
                .map(|base| Derivation::Restriction(local(base)));
            collect_complex_children(restriction, &mut complex);
        }
    }

    if let Some(content) = element.child("simpleContent") {
        let derived = content
            .child("extension")
            .or_else(|| content.child("restriction"));
        if let Some(derived) = derived {
            complex.text_type = Some(derived.attr("base").map(local).unwrap_or_else(|| "string".to_string()));
            collect_complex_children(derived, &mut complex);
        }
    }

    complex
}

fn collect_complex_children(element: &Element, complex: &mut ComplexType) {
    for child in &element.children {
        match child.name.as_str() {
            "sequence" | "choice" | "all" | "group" => {
                if complex.content.is_none() {
                    complex.content = parse_particle(child);
                }
            }
            "attribute" => {
                if let Some(decl) = parse_attribute(child) {
                    complex.attributes.push(decl);
                }
            }
            "attributeGroup" => {
                if let Some(reference) = child.attr("ref") {
                    complex.attribute_groups.push(local(reference));
                }
            }
            "anyAttribute" => complex.any_attribute = true,
            _ => {}
        }
    }
}

fn parse_attribute(element: &Element) -> Option<AttributeDecl> {
    if element.attr("use") == Some("prohibited") {
        return None;
    }
    let (name, reference) = match (element.attr("name"), element.attr("ref")) {
        (Some(name), _) => (name.to_string(), false),
        (None, Some(reference)) => (local(reference), true),
        (None, None) => return None,
    };
    let kind = if let Some(type_name) = element.attr("type") {
        Some(TypeRef::Named(local(type_name)))
    } else {
        element
            .child("simpleType")
            .map(|simple| TypeRef::Simple(parse_simple_type(simple)))
    };
    Some(AttributeDecl {
        name,
        required: element.attr("use") == Some("required"),
        kind,
        reference,
    })
}

fn parse_attribute_group(element: &Element) -> AttributeGroup {
    let mut group = AttributeGroup::default();
    for child in &element.children {
        match child.name.as_str() {
            "attribute" => {
                if let Some(decl) = parse_attribute(child) {
                    group.attributes.push(decl);
                }
            }
            "attributeGroup" => {
                if let Some(reference) = child.attr("ref") {
                    group.groups.push(local(reference));
                }
            }
            _ => {}
        }
    }
    group
}

fn parse_simple_type(element: &Element) -> SimpleType {
    let Some(restriction) = element.child("restriction") else {
        // lists and unions are accepted as plain strings
        return SimpleType::default();
    };
    let base = match restriction.attr("base") {
        Some(base) => Some(local(base)),
        None => restriction.child("simpleType").map(|_| "string".to_string()),
    };
    let enumeration = restriction
        .children_named("enumeration")
        .filter_map(|facet| facet.attr("value"))
        .map(str::to_string)
        .collect();
    SimpleType { base, enumeration }
}

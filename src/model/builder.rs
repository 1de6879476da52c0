//! Schema Model Builder
//!
//! Walks a (possibly cross-imported, cyclic) XSD graph and derives the
//! relational model: one class per instantiated element, flattened
//! single-occurrence compound content, nested child tables for repeated
//! content, link fields and junction tables for substitution groups and
//! independently identified children, geometry fields for GML geometry
//! properties.

use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::geometry::GeometryKind;
use crate::locations::SchemaLocation;
use crate::namespaces::{QName, UriPrefixMap};
use crate::resolver::Resolver;
use crate::value::FieldType;
use crate::xpath::XPathMatcher;
use crate::{is_gml_namespace, XLINK_NAMESPACE, XS_NAMESPACE};

use super::{
    ClassCategory, Field, FieldCategory, GeometryInfo, Occurs, SchemaClass, SchemaModel,
    JUNCTION_CHILD_FIELD, JUNCTION_PARENT_FIELD,
};

/// Build the relational model from entry schema documents
///
/// Imports and includes are followed transitively through the resolver;
/// re-visits of an already-loaded document are no-ops, which keeps cyclic
/// schema graphs from looping.
pub fn build_model(
    entries: &[SchemaLocation],
    resolver: &mut Resolver,
    config: &Configuration,
) -> Result<SchemaModel> {
    let loaded = load_documents(entries, resolver, config)?;
    let mut parsed = Vec::with_capacity(loaded.len());
    for doc in &loaded {
        parsed.push(
            roxmltree::Document::parse(&doc.text)
                .map_err(|e| Error::SchemaInvalid(format!("cannot parse {}: {}", doc.key, e)))?,
        );
    }

    let mut analyzer = Analyzer::new(config);
    for (idx, doc) in parsed.iter().enumerate() {
        analyzer.index_document(idx, doc)?;
    }
    analyzer.instantiate()?;
    analyzer.finish()
}

struct LoadedDoc {
    key: String,
    text: Rc<str>,
}

const ALLOWED_SCHEMA_CHILDREN: &[&str] = &[
    "element",
    "complexType",
    "simpleType",
    "attribute",
    "attributeGroup",
    "group",
    "notation",
    "import",
    "include",
    "redefine",
    "annotation",
];

/// Resolve the transitive closure of schema documents
fn load_documents(
    entries: &[SchemaLocation],
    resolver: &mut Resolver,
    config: &Configuration,
) -> Result<Vec<LoadedDoc>> {
    let mut worklist: VecDeque<(SchemaLocation, usize)> =
        entries.iter().map(|e| (e.clone(), 0)).collect();
    let mut visited = HashSet::new();
    let mut docs = Vec::new();

    while let Some((location, depth)) = worklist.pop_front() {
        config.limits.check_schema_depth(depth)?;
        let key = location.as_str();
        if !visited.insert(key.clone()) {
            continue;
        }
        let text = resolver.resolve(&location)?;
        let references = check_schema_document(&key, &text)?;
        let base = location.base();
        for reference in references {
            worklist.push_back((
                SchemaLocation::from_reference(&reference, base.as_deref()),
                depth + 1,
            ));
        }
        docs.push(LoadedDoc { key, text });
    }
    Ok(docs)
}

/// Validate the coarse structure of a schema document and collect its
/// import/include references
fn check_schema_document(key: &str, text: &str) -> Result<Vec<String>> {
    let doc = roxmltree::Document::parse(text)
        .map_err(|e| Error::SchemaInvalid(format!("invalid content in 'schema' element: {}", e)))?;
    let root = doc.root_element();
    if root.tag_name().namespace() != Some(XS_NAMESPACE) || root.tag_name().name() != "schema" {
        return Err(Error::SchemaInvalid(format!(
            "invalid content in 'schema' element: {} has root '{}'",
            key,
            root.tag_name().name()
        )));
    }
    let mut references = Vec::new();
    for child in root.children().filter(|n| n.is_element()) {
        if child.tag_name().namespace() != Some(XS_NAMESPACE)
            || !ALLOWED_SCHEMA_CHILDREN.contains(&child.tag_name().name())
        {
            return Err(Error::SchemaInvalid(format!(
                "invalid content in 'schema' element: unexpected element '{}'",
                child.tag_name().name()
            )));
        }
        if matches!(child.tag_name().name(), "import" | "include") {
            if let Some(location) = child.attribute("schemaLocation") {
                references.push(location.to_string());
            }
        }
    }
    Ok(references)
}

/// Form and namespace properties of one schema document
#[derive(Debug, Clone)]
struct DocInfo {
    target_ns: Option<String>,
    qualified_elements: bool,
    qualified_attributes: bool,
}

type NodeRef<'a> = (roxmltree::Node<'a, 'a>, usize);
type Key = (String, String);

fn key(ns: Option<&str>, name: &str) -> Key {
    (ns.unwrap_or_default().to_string(), name.to_string())
}

struct Analyzer<'a, 'c> {
    config: &'c Configuration,
    doc_infos: Vec<DocInfo>,
    prefixes: UriPrefixMap,
    elements: HashMap<Key, NodeRef<'a>>,
    element_order: Vec<Key>,
    complex_types: HashMap<Key, NodeRef<'a>>,
    simple_types: HashMap<Key, NodeRef<'a>>,
    attributes: HashMap<Key, NodeRef<'a>>,
    attribute_groups: HashMap<Key, NodeRef<'a>>,
    groups: HashMap<Key, NodeRef<'a>>,
    /// head (ns, name) → members declaring `substitutionGroup` on it
    subst_members: HashMap<Key, Vec<Key>>,
    classes: Vec<SchemaClass>,
    instantiated: HashSet<Key>,
    needed: Vec<Key>,
}

impl<'a, 'c> Analyzer<'a, 'c> {
    fn new(config: &'c Configuration) -> Self {
        Self {
            config,
            doc_infos: Vec::new(),
            prefixes: UriPrefixMap::new(),
            elements: HashMap::new(),
            element_order: Vec::new(),
            complex_types: HashMap::new(),
            simple_types: HashMap::new(),
            attributes: HashMap::new(),
            attribute_groups: HashMap::new(),
            groups: HashMap::new(),
            subst_members: HashMap::new(),
            classes: Vec::new(),
            instantiated: HashSet::new(),
            needed: Vec::new(),
        }
    }

    fn index_document(&mut self, doc_idx: usize, doc: &'a roxmltree::Document<'a>) -> Result<()> {
        let root = doc.root_element();
        let target_ns = root.attribute("targetNamespace").map(|s| s.to_string());
        let info = DocInfo {
            target_ns: target_ns.clone(),
            qualified_elements: root.attribute("elementFormDefault") == Some("qualified"),
            qualified_attributes: root.attribute("attributeFormDefault") == Some("qualified"),
        };
        self.doc_infos.push(info);

        // Prefix declarations feed the disambiguation map.
        for ns in root.namespaces() {
            if ns.uri() != XS_NAMESPACE {
                self.prefixes.register(ns.uri(), ns.name());
            }
        }
        if let Some(tns) = &target_ns {
            self.prefixes.register(tns, None);
        }

        for child in root.children().filter(|n| n.is_element()) {
            let name = match child.attribute("name") {
                Some(n) => n.to_string(),
                None => continue,
            };
            let k = key(target_ns.as_deref(), &name);
            match child.tag_name().name() {
                "element" => {
                    self.elements.insert(k.clone(), (child, doc_idx));
                    self.element_order.push(k.clone());
                    if let Some(head) = child.attribute("substitutionGroup") {
                        let head_key = self.resolve_qname_key(&child, head)?;
                        self.subst_members.entry(head_key).or_default().push(k);
                    }
                }
                "complexType" => {
                    self.complex_types.insert(k, (child, doc_idx));
                }
                "simpleType" => {
                    self.simple_types.insert(k, (child, doc_idx));
                }
                "attribute" => {
                    self.attributes.insert(k, (child, doc_idx));
                }
                "attributeGroup" => {
                    self.attribute_groups.insert(k, (child, doc_idx));
                }
                "group" => {
                    self.groups.insert(k, (child, doc_idx));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Resolve a prefixed QName attribute value against the in-scope
    /// namespaces of `node`
    fn resolve_qname_key(&self, node: &roxmltree::Node, value: &str) -> Result<Key> {
        let (prefix, local) = crate::names::split_qname(value);
        let ns = node
            .lookup_namespace_uri(prefix)
            .map(|s| s.to_string())
            .or_else(|| {
                // Unprefixed references fall back to the document's target
                // namespace.
                if prefix.is_none() {
                    node.document()
                        .root_element()
                        .attribute("targetNamespace")
                        .map(|s| s.to_string())
                } else {
                    None
                }
            });
        if prefix.is_some() && ns.is_none() {
            return Err(Error::SchemaInvalid(format!(
                "cannot resolve namespace prefix in reference '{}'",
                value
            )));
        }
        Ok(key(ns.as_deref(), local))
    }

    fn xpath_segment(&self, ns: Option<&str>, local: &str) -> String {
        self.prefixes.qualify(ns, local)
    }

    /// All transitive, non-abstract substitution-group realizations of a head
    fn realizations_of(&self, head: &Key) -> Vec<Key> {
        let mut out = Vec::new();
        let mut stack = vec![head.clone()];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if current != *head {
                if let Some((node, _)) = self.elements.get(&current) {
                    if node.attribute("abstract") != Some("true") {
                        out.push(current.clone());
                    }
                }
            }
            if let Some(members) = self.subst_members.get(&current) {
                for m in members {
                    stack.push(m.clone());
                }
            }
        }
        // Deterministic order: declaration order.
        out.sort_by_key(|k| self.element_order.iter().position(|e| e == k));
        out
    }

    /// Whether an element is (transitively) substitutable for a GML abstract
    /// feature head
    fn is_feature_like(&self, elem_key: &Key) -> bool {
        let mut current = elem_key.clone();
        let mut hops = 0;
        loop {
            if is_gml_namespace(&current.0)
                && matches!(current.1.as_str(), "AbstractFeature" | "_Feature")
            {
                return true;
            }
            let head = self
                .elements
                .get(&current)
                .and_then(|(node, _)| node.attribute("substitutionGroup"))
                .and_then(|v| {
                    let (node, _) = self.elements.get(&current).unwrap();
                    self.resolve_qname_key(node, v).ok()
                });
            match head {
                Some(h) if hops < 32 => {
                    current = h;
                    hops += 1;
                }
                _ => return false,
            }
        }
    }

    fn instantiate(&mut self) -> Result<()> {
        let feature_like: Vec<Key> = self
            .element_order
            .iter()
            .filter(|k| self.is_feature_like(k))
            .cloned()
            .collect();
        let restrict_to_features = !feature_like.is_empty() && !self.config.instantiate_all_top_level;

        let top_level: Vec<Key> = self
            .element_order
            .iter()
            .filter(|k| {
                let (node, _) = self.elements[*k];
                if node.attribute("abstract") == Some("true") {
                    return false;
                }
                if restrict_to_features {
                    feature_like.contains(k)
                } else {
                    true
                }
            })
            .cloned()
            .collect();

        // Same local name in two namespaces: prefix both class names.
        let named: Vec<(Key, String)> = top_level
            .iter()
            .map(|k| (k.clone(), self.top_level_name(k)))
            .collect();

        for (k, name) in &named {
            self.instantiate_element(k, name)?;
        }

        // Realizations referenced from relationships but not yet instantiated
        // (only reachable in feature-restricted mode).
        while let Some(k) = self.needed.pop() {
            if self.instantiated.contains(&k) {
                continue;
            }
            let name = self.top_level_name(&k);
            self.instantiate_element(&k, &name)?;
        }
        Ok(())
    }

    fn instantiate_element(&mut self, elem_key: &Key, name: &str) -> Result<()> {
        if !self.instantiated.insert(elem_key.clone()) {
            return Ok(());
        }
        let (node, doc_idx) = *self
            .elements
            .get(elem_key)
            .ok_or_else(|| Error::SchemaInvalid(format!("unknown element '{}'", elem_key.1)))?;

        let ns = if elem_key.0.is_empty() {
            None
        } else {
            Some(elem_key.0.as_str())
        };
        let xpath = self.xpath_segment(ns, &elem_key.1);
        let mut class = SchemaClass::new(
            name,
            QName::new(ns, elem_key.1.clone()),
            xpath.clone(),
            ClassCategory::TopLevel,
        );

        match self.element_type(&node, doc_idx)? {
            ElementType::Simple(field_type) => {
                let mut field = Field::new("value", xpath, field_type);
                field.max_occurs = Occurs::Bounded(1);
                class.fields.push(field);
            }
            ElementType::Complex(type_node) => {
                let mut stack = Vec::new();
                self.explore_type(type_node, &mut class, &xpath, "", &mut stack)?;
            }
            ElementType::AnyType => {
                let mut field = Field::new("value", xpath, FieldType::AnyType);
                field.max_occurs = Occurs::Bounded(1);
                class.fields.push(field);
            }
        }

        self.config.limits.check_classes(self.classes.len() + 1)?;
        self.classes.push(class);
        Ok(())
    }

    /// Resolve an element declaration to its type
    fn element_type(&self, node: &roxmltree::Node<'a, 'a>, doc_idx: usize) -> Result<ElementType<'a>> {
        if let Some(type_ref) = node.attribute("type") {
            let k = self.resolve_qname_key(node, type_ref)?;
            if k.0 == XS_NAMESPACE {
                return Ok(match k.1.as_str() {
                    "anyType" => ElementType::AnyType,
                    other => ElementType::Simple(FieldType::from_xsd(other)),
                });
            }
            if let Some((ct, ct_doc)) = self.complex_types.get(&k) {
                return Ok(ElementType::Complex((*ct, *ct_doc)));
            }
            if self.simple_types.contains_key(&k) {
                return Ok(ElementType::Simple(self.resolve_simple_type(&k, 0)?));
            }
            return Err(Error::SchemaInvalid(format!(
                "cannot resolve type '{}'",
                type_ref
            )));
        }
        for child in node.children().filter(|n| n.is_element()) {
            match child.tag_name().name() {
                "complexType" => return Ok(ElementType::Complex((child, doc_idx))),
                "simpleType" => {
                    return Ok(ElementType::Simple(self.simple_type_of_node(&child, 0)?))
                }
                _ => {}
            }
        }
        Ok(ElementType::AnyType)
    }

    fn resolve_simple_type(&self, k: &Key, depth: usize) -> Result<FieldType> {
        if depth > 32 {
            return Ok(FieldType::String);
        }
        if k.0 == XS_NAMESPACE {
            return Ok(FieldType::from_xsd(&k.1));
        }
        match self.simple_types.get(k) {
            Some((node, _)) => self.simple_type_of_node(node, depth),
            None => Err(Error::SchemaInvalid(format!(
                "cannot resolve simple type '{}'",
                k.1
            ))),
        }
    }

    fn simple_type_of_node(&self, node: &roxmltree::Node<'a, 'a>, depth: usize) -> Result<FieldType> {
        for child in node.children().filter(|n| n.is_element()) {
            match child.tag_name().name() {
                "restriction" => {
                    if let Some(base) = child.attribute("base") {
                        let k = self.resolve_qname_key(&child, base)?;
                        return self.resolve_simple_type(&k, depth + 1);
                    }
                }
                "list" | "union" => return Ok(FieldType::String),
                _ => {}
            }
        }
        Ok(FieldType::String)
    }

    /// Explore a complex type's attributes and content model into `class`
    ///
    /// `xpath_prefix` is the XPath of the element being explored;
    /// `name_prefix` accumulates flattened element names (`elt2_`).
    fn explore_type(
        &mut self,
        type_node: NodeRef<'a>,
        class: &mut SchemaClass,
        xpath_prefix: &str,
        name_prefix: &str,
        stack: &mut Vec<(usize, usize)>,
    ) -> Result<()> {
        let (node, doc_idx) = type_node;
        let node_id = (doc_idx, node.id().get() as usize);
        if stack.contains(&node_id) {
            // Type recursion: represent the cycle as a raw-XML field instead
            // of flattening forever.
            let mut field = Field::new(
                format!("{}value", name_prefix),
                xpath_prefix.to_string(),
                FieldType::AnyType,
            );
            field.max_occurs = Occurs::Bounded(1);
            class.fields.push(field);
            return Ok(());
        }
        stack.push(node_id);
        let result = self.explore_type_inner(node, doc_idx, class, xpath_prefix, name_prefix, stack);
        stack.pop();
        result
    }

    fn explore_type_inner(
        &mut self,
        node: roxmltree::Node<'a, 'a>,
        doc_idx: usize,
        class: &mut SchemaClass,
        xpath_prefix: &str,
        name_prefix: &str,
        stack: &mut Vec<(usize, usize)>,
    ) -> Result<()> {
        // Extension chains flatten base-class content first.
        for content in node.children().filter(|n| {
            n.is_element()
                && matches!(n.tag_name().name(), "complexContent" | "simpleContent")
        }) {
            for ext in content.children().filter(|n| {
                n.is_element() && matches!(n.tag_name().name(), "extension" | "restriction")
            }) {
                if let Some(base) = ext.attribute("base") {
                    let base_key = self.resolve_qname_key(&ext, base)?;
                    if base_key.0 == XS_NAMESPACE || self.simple_types.contains_key(&base_key) {
                        // simpleContent: the element text is the value
                        let field_type = self.resolve_simple_type(&base_key, 0)?;
                        let mut field = Field::new(
                            format!("{}value", name_prefix),
                            xpath_prefix.to_string(),
                            field_type,
                        );
                        field.max_occurs = Occurs::Bounded(1);
                        class.fields.push(field);
                    } else if let Some(base_ct) = self.complex_types.get(&base_key).copied() {
                        self.explore_type(base_ct, class, xpath_prefix, name_prefix, stack)?;
                    }
                }
                self.collect_attributes(&ext, doc_idx, class, xpath_prefix, name_prefix)?;
                for particle in ext.children().filter(|n| {
                    n.is_element()
                        && matches!(n.tag_name().name(), "sequence" | "choice" | "all" | "group")
                }) {
                    self.walk_particle(particle, doc_idx, class, xpath_prefix, name_prefix, false, stack)?;
                }
            }
        }

        self.collect_attributes(&node, doc_idx, class, xpath_prefix, name_prefix)?;

        for particle in node.children().filter(|n| {
            n.is_element() && matches!(n.tag_name().name(), "sequence" | "choice" | "all" | "group")
        }) {
            self.walk_particle(particle, doc_idx, class, xpath_prefix, name_prefix, false, stack)?;
        }
        Ok(())
    }

    fn collect_attributes(
        &mut self,
        node: &roxmltree::Node<'a, 'a>,
        doc_idx: usize,
        class: &mut SchemaClass,
        xpath_prefix: &str,
        name_prefix: &str,
    ) -> Result<()> {
        for child in node.children().filter(|n| n.is_element()) {
            match child.tag_name().name() {
                "attribute" => {
                    let (attr_node, attr_doc) = match child.attribute("ref") {
                        Some(reference) => {
                            let k = self.resolve_qname_key(&child, reference)?;
                            // xlink:href carries link semantics, no declaration
                            // of it is required to be loaded.
                            if k.0 == XLINK_NAMESPACE && k.1 == "href" {
                                self.add_href_fields(class, xpath_prefix, name_prefix);
                                continue;
                            }
                            match self.attributes.get(&k) {
                                Some(found) => *found,
                                None => {
                                    return Err(Error::SchemaInvalid(format!(
                                        "cannot resolve attribute '{}'",
                                        reference
                                    )))
                                }
                            }
                        }
                        None => (child, doc_idx),
                    };
                    self.add_attribute_field(&attr_node, attr_doc, class, xpath_prefix, name_prefix)?;
                }
                "attributeGroup" => {
                    if let Some(reference) = child.attribute("ref") {
                        let k = self.resolve_qname_key(&child, reference)?;
                        // xlink attribute groups reduce to the href field.
                        if k.0 == XLINK_NAMESPACE {
                            self.add_href_fields(class, xpath_prefix, name_prefix);
                            continue;
                        }
                        let (group_node, group_doc) =
                            *self.attribute_groups.get(&k).ok_or_else(|| {
                                Error::SchemaInvalid(format!(
                                    "cannot resolve attribute group '{}'",
                                    reference
                                ))
                            })?;
                        self.collect_attributes(&group_node, group_doc, class, xpath_prefix, name_prefix)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn add_attribute_field(
        &mut self,
        attr: &roxmltree::Node<'a, 'a>,
        doc_idx: usize,
        class: &mut SchemaClass,
        xpath_prefix: &str,
        name_prefix: &str,
    ) -> Result<()> {
        let name = match attr.attribute("name") {
            Some(n) => n,
            None => return Ok(()),
        };
        let info = &self.doc_infos[doc_idx];
        let qualified =
            attr.attribute("form").map(|f| f == "qualified").unwrap_or(info.qualified_attributes);
        let attr_ns = if qualified { info.target_ns.clone() } else { None };
        let segment = format!("@{}", self.xpath_segment(attr_ns.as_deref(), name));

        let field_type = match attr.attribute("type") {
            Some(t) => {
                let k = self.resolve_qname_key(attr, t)?;
                self.resolve_simple_type(&k, 0)?
            }
            None => FieldType::String,
        };

        let mut field = Field::new(
            format!("{}{}", name_prefix, crate::names::launder_name(name)),
            format!("{}/{}", xpath_prefix, segment),
            field_type,
        );
        field.not_nullable = attr.attribute("use") == Some("required");
        field.min_occurs = if field.not_nullable { 1 } else { 0 };
        field.fixed_value = attr.attribute("fixed").map(|s| s.to_string());
        field.default_value = attr.attribute("default").map(|s| s.to_string());
        if field_type == FieldType::Id && name_prefix.is_empty() && class.id_field.is_none() {
            class.id_field = Some(class.fields.len());
        }
        class.fields.push(field);
        Ok(())
    }

    /// `xlink:href` produces the raw href column plus the resolved-pkid
    /// link column next to it
    fn add_href_fields(&mut self, class: &mut SchemaClass, xpath_prefix: &str, name_prefix: &str) {
        self.prefixes.register(XLINK_NAMESPACE, Some("xlink"));
        let base = name_prefix.trim_end_matches('_');
        let base = if base.is_empty() { "href".to_string() } else { base.to_string() };

        let mut href = Field::new(
            format!("{}_href", base),
            format!("{}/@xlink:href", xpath_prefix),
            FieldType::String,
        );
        href.is_link = true;
        class.fields.push(href);

        let mut pkid = Field::new(
            format!("{}_pkid", base),
            format!("{}/@xlink:href/pkid", xpath_prefix),
            FieldType::String,
        );
        pkid.is_link = true;
        pkid.category = FieldCategory::PathToChildElementWithLink;
        class.fields.push(pkid);
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_particle(
        &mut self,
        particle: roxmltree::Node<'a, 'a>,
        doc_idx: usize,
        class: &mut SchemaClass,
        xpath_prefix: &str,
        name_prefix: &str,
        repeated_context: bool,
        stack: &mut Vec<(usize, usize)>,
    ) -> Result<()> {
        let particle_repeats = repeated_context || parse_max_occurs(&particle)?.is_repeated();
        match particle.tag_name().name() {
            "sequence" | "choice" | "all" => {
                for child in particle.children().filter(|n| n.is_element()) {
                    match child.tag_name().name() {
                        "element" => {
                            self.handle_element_particle(
                                child,
                                doc_idx,
                                class,
                                xpath_prefix,
                                name_prefix,
                                particle_repeats,
                                stack,
                            )?;
                        }
                        "sequence" | "choice" | "all" | "group" => {
                            self.walk_particle(
                                child,
                                doc_idx,
                                class,
                                xpath_prefix,
                                name_prefix,
                                particle_repeats,
                                stack,
                            )?;
                        }
                        "any" | "annotation" => {}
                        other => {
                            return Err(Error::SchemaInvalid(format!(
                                "invalid content model: unexpected element '{}'",
                                other
                            )))
                        }
                    }
                }
            }
            "group" => {
                if let Some(reference) = particle.attribute("ref") {
                    let k = self.resolve_qname_key(&particle, reference)?;
                    let (group_node, group_doc) = *self.groups.get(&k).ok_or_else(|| {
                        Error::SchemaInvalid(format!("cannot resolve group '{}'", reference))
                    })?;
                    let group_id = (group_doc, group_node.id().get() as usize);
                    if stack.contains(&group_id) {
                        return Ok(());
                    }
                    stack.push(group_id);
                    for inner in group_node.children().filter(|n| {
                        n.is_element()
                            && matches!(n.tag_name().name(), "sequence" | "choice" | "all")
                    }) {
                        self.walk_particle(
                            inner,
                            group_doc,
                            class,
                            xpath_prefix,
                            name_prefix,
                            particle_repeats,
                            stack,
                        )?;
                    }
                    stack.pop();
                }
            }
            _ => {}
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_element_particle(
        &mut self,
        elem: roxmltree::Node<'a, 'a>,
        doc_idx: usize,
        class: &mut SchemaClass,
        xpath_prefix: &str,
        name_prefix: &str,
        repeated_context: bool,
        stack: &mut Vec<(usize, usize)>,
    ) -> Result<()> {
        let min_occurs = parse_min_occurs(&elem)?;
        let mut max_occurs = parse_max_occurs(&elem)?;
        if repeated_context && !max_occurs.is_repeated() {
            max_occurs = Occurs::Unbounded;
        }
        if max_occurs == Occurs::Bounded(0) {
            return Ok(());
        }

        // Resolve ref → global declaration.
        let (decl, decl_doc, elem_key) = match elem.attribute("ref") {
            Some(reference) => {
                let k = self.resolve_qname_key(&elem, reference)?;
                // References into the GML geometry hierarchy resolve to a
                // geometry field without the GML schemas being loaded.
                if is_gml_namespace(&k.0)
                    && matches!(k.1.as_str(), "AbstractGeometry" | "_Geometry")
                {
                    let segment = self.xpath_segment(Some(&k.0), &k.1);
                    let elem_xpath = format!("{}/{}", xpath_prefix, segment);
                    self.add_geometry_field(
                        class,
                        &elem_xpath,
                        name_prefix,
                        &k.1,
                        GeometryKind::Unknown,
                        min_occurs,
                    );
                    return Ok(());
                }
                match self.elements.get(&k) {
                    Some((node, d)) => (*node, *d, k),
                    None => {
                        return Err(Error::SchemaInvalid(format!(
                            "cannot resolve element '{}'",
                            reference
                        )))
                    }
                }
            }
            None => {
                let name = elem.attribute("name").ok_or_else(|| {
                    Error::SchemaInvalid("element without name or ref".to_string())
                })?;
                let info = &self.doc_infos[doc_idx];
                let qualified = elem
                    .attribute("form")
                    .map(|f| f == "qualified")
                    .unwrap_or(info.qualified_elements);
                let ns = if qualified { info.target_ns.clone() } else { None };
                (elem, doc_idx, key(ns.as_deref(), name))
            }
        };

        let local = elem_key.1.clone();
        let elem_ns = if elem_key.0.is_empty() { None } else { Some(elem_key.0.as_str()) };
        let segment = self.xpath_segment(elem_ns, &local);
        let elem_xpath = format!("{}/{}", xpath_prefix, segment);
        let is_abstract = decl.attribute("abstract") == Some("true");

        // Substitution groups: realizations stand in for the slot.
        let realizations = if elem.attribute("ref").is_some() {
            self.realizations_of(&elem_key)
        } else {
            Vec::new()
        };
        if is_abstract || !realizations.is_empty() {
            // Geometry references short-circuit to a geometry field.
            if is_gml_namespace(&elem_key.0)
                && matches!(local.as_str(), "AbstractGeometry" | "_Geometry")
            {
                self.add_geometry_field(
                    class,
                    &elem_xpath,
                    name_prefix,
                    &local,
                    GeometryKind::Unknown,
                    min_occurs,
                );
                return Ok(());
            }
            // Realizations substitute for the head: they appear at the
            // head's own position.
            self.create_non_nested_relationship(
                class,
                &elem_key,
                &local,
                &elem_xpath,
                xpath_prefix,
                name_prefix,
                realizations,
                max_occurs,
            )?;
            return Ok(());
        }

        // GML geometry property types become geometry fields.
        if let Some(kind) = self.geometry_kind_of(&decl)? {
            self.add_geometry_field(class, &elem_xpath, name_prefix, &local, kind, min_occurs);
            return Ok(());
        }

        match self.element_type(&decl, decl_doc)? {
            ElementType::Simple(field_type) => {
                self.add_scalar_field(
                    class,
                    &elem_xpath,
                    name_prefix,
                    &local,
                    field_type,
                    min_occurs,
                    max_occurs,
                )?;
            }
            ElementType::AnyType => {
                let mut field = Field::new(
                    format!("{}{}", name_prefix, crate::names::launder_name(&local)),
                    elem_xpath,
                    FieldType::AnyType,
                );
                field.min_occurs = min_occurs;
                field.max_occurs = max_occurs;
                class.fields.push(field);
            }
            ElementType::Complex(type_node) => {
                self.handle_complex_child(
                    class,
                    &elem_key,
                    &local,
                    &elem_xpath,
                    name_prefix,
                    type_node,
                    min_occurs,
                    max_occurs,
                    stack,
                )?;
            }
        }
        Ok(())
    }

    fn add_scalar_field(
        &mut self,
        class: &mut SchemaClass,
        elem_xpath: &str,
        name_prefix: &str,
        local: &str,
        field_type: FieldType,
        min_occurs: u32,
        max_occurs: Occurs,
    ) -> Result<()> {
        let name = format!("{}{}", name_prefix, crate::names::launder_name(local));
        if max_occurs.is_repeated() {
            if self.config.use_arrays && field_type.is_array_compatible() {
                let mut field = Field::new(name, elem_xpath.to_string(), field_type);
                field.array = true;
                field.min_occurs = min_occurs;
                field.max_occurs = max_occurs;
                class.fields.push(field);
            } else {
                // One row per occurrence in a child table.
                let nested_name = format!(
                    "{}_{}{}",
                    class.name,
                    name_prefix,
                    crate::names::launder_name(local)
                );
                let mut nested = SchemaClass::new(
                    nested_name,
                    QName::new(None::<String>, local.to_string()),
                    elem_xpath.to_string(),
                    ClassCategory::Nested,
                );
                nested.parent_xpath = Some(class.xpath.clone());
                let mut value = Field::new("value", elem_xpath.to_string(), field_type);
                value.max_occurs = Occurs::Bounded(1);
                nested.fields.push(value);
                self.config.limits.check_classes(self.classes.len() + 1)?;
                self.classes.push(nested);

                let mut field = Field::new(name, elem_xpath.to_string(), field_type);
                field.category = FieldCategory::PathToChildElement;
                field.related_class_xpath = Some(elem_xpath.to_string());
                field.min_occurs = min_occurs;
                field.max_occurs = max_occurs;
                class.fields.push(field);
            }
        } else {
            let mut field = Field::new(name, elem_xpath.to_string(), field_type);
            field.min_occurs = min_occurs;
            field.max_occurs = max_occurs;
            field.not_nullable = min_occurs >= 1;
            class.fields.push(field);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_complex_child(
        &mut self,
        class: &mut SchemaClass,
        elem_key: &Key,
        local: &str,
        elem_xpath: &str,
        name_prefix: &str,
        type_node: NodeRef<'a>,
        min_occurs: u32,
        max_occurs: Occurs,
        stack: &mut Vec<(usize, usize)>,
    ) -> Result<()> {
        // Property/part pattern: a wrapper around a single independently
        // identified element gets a junction table, the inner element its own
        // table.
        if max_occurs.is_repeated() {
            if let Some(inner_key) = self.single_identified_child(&type_node)? {
                // The identified child appears under the wrapper element.
                self.create_non_nested_relationship(
                    class,
                    elem_key,
                    local,
                    elem_xpath,
                    elem_xpath,
                    name_prefix,
                    vec![inner_key],
                    max_occurs,
                )?;
                return Ok(());
            }

            // Repeated compound content without identity: nested child table.
            let nested_name = format!(
                "{}_{}{}",
                class.name,
                name_prefix,
                crate::names::launder_name(local)
            );
            let mut nested = SchemaClass::new(
                nested_name,
                QName::new(
                    (!elem_key.0.is_empty()).then(|| elem_key.0.clone()),
                    local.to_string(),
                ),
                elem_xpath.to_string(),
                ClassCategory::Nested,
            );
            nested.parent_xpath = Some(class.xpath.clone());
            self.explore_type(type_node, &mut nested, elem_xpath, "", stack)?;
            self.config.limits.check_classes(self.classes.len() + 1)?;
            self.classes.push(nested);

            let mut field = Field::new(
                format!("{}{}", name_prefix, crate::names::launder_name(local)),
                elem_xpath.to_string(),
                FieldType::String,
            );
            field.category = FieldCategory::PathToChildElement;
            field.related_class_xpath = Some(elem_xpath.to_string());
            field.min_occurs = min_occurs;
            field.max_occurs = max_occurs;
            class.fields.push(field);
            return Ok(());
        }

        // Single occurrence: flatten into the current class. Repeated
        // content inside the flattened type still spawns its own nested or
        // junction tables, named through the accumulated prefix.
        let child_prefix = format!("{}{}_", name_prefix, crate::names::launder_name(local));
        self.explore_type(type_node, class, elem_xpath, &child_prefix, stack)?;
        Ok(())
    }

    /// The single element child of a wrapper type, when it exists and carries
    /// an ID attribute (independent identity)
    fn single_identified_child(&self, type_node: &NodeRef<'a>) -> Result<Option<Key>> {
        let (node, _doc_idx) = *type_node;
        let sequence = node
            .children()
            .find(|n| n.is_element() && matches!(n.tag_name().name(), "sequence" | "choice" | "all"));
        let sequence = match sequence {
            Some(s) => s,
            None => return Ok(None),
        };
        let elements: Vec<_> = sequence
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "element")
            .collect();
        if elements.len() != 1 {
            return Ok(None);
        }
        let inner = elements[0];
        if parse_max_occurs(&inner)?.is_repeated() {
            return Ok(None);
        }
        let reference = match inner.attribute("ref") {
            Some(r) => r,
            None => return Ok(None),
        };
        let k = self.resolve_qname_key(&inner, reference)?;
        let (decl, decl_doc) = match self.elements.get(&k) {
            Some(found) => *found,
            None => return Ok(None),
        };
        if let ElementType::Complex(ct) = self.element_type(&decl, decl_doc)? {
            if self.type_has_id_attribute(&ct)? {
                return Ok(Some(k));
            }
        }
        Ok(None)
    }

    fn type_has_id_attribute(&self, type_node: &NodeRef<'a>) -> Result<bool> {
        let (node, _) = *type_node;
        for attr in node.descendants().filter(|n| n.is_element() && n.tag_name().name() == "attribute")
        {
            if let Some(t) = attr.attribute("type") {
                if let Ok(k) = self.resolve_qname_key(&attr, t) {
                    if k.0 == XS_NAMESPACE && k.1 == "ID" {
                        return Ok(true);
                    }
                }
            }
            if let Some(r) = attr.attribute("ref") {
                if let Ok(k) = self.resolve_qname_key(&attr, r) {
                    if is_gml_namespace(&k.0) && k.1 == "id" {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Link fields (single occurrence) or junction tables (repeated) towards
    /// every concrete realization of an abstract slot or identified child
    #[allow(clippy::too_many_arguments)]
    fn create_non_nested_relationship(
        &mut self,
        class: &mut SchemaClass,
        head_key: &Key,
        head_local: &str,
        head_xpath: &str,
        container_xpath: &str,
        name_prefix: &str,
        mut realizations: Vec<Key>,
        max_occurs: Occurs,
    ) -> Result<()> {
        // A non-abstract head is itself a candidate realization.
        if let Some((decl, _)) = self.elements.get(head_key) {
            if decl.attribute("abstract") != Some("true") && !realizations.contains(head_key) {
                realizations.insert(0, head_key.clone());
            }
        }
        if realizations.is_empty() {
            return Ok(());
        }
        let several = realizations.len() > 1;

        for realization in realizations {
            let target_name = self.top_level_name(&realization);
            let ns = if realization.0.is_empty() {
                None
            } else {
                Some(realization.0.as_str())
            };
            let target_xpath = self.xpath_segment(ns, &realization.1);
            let concrete_xpath = format!("{}/{}", container_xpath, target_xpath);

            if !self.instantiated.contains(&realization) {
                self.needed.push(realization.clone());
            }

            if !max_occurs.is_repeated() {
                let name = if several {
                    format!(
                        "{}{}_{}_pkid",
                        name_prefix,
                        crate::names::launder_name(head_local),
                        crate::names::launder_name(&target_name)
                    )
                } else {
                    format!("{}{}_pkid", name_prefix, crate::names::launder_name(head_local))
                };
                let mut field = Field::new(name, concrete_xpath, FieldType::String);
                field.category = FieldCategory::PathToChildElementWithLink;
                field.is_link = true;
                field.related_class_xpath = Some(target_xpath.clone());
                class.fields.push(field);
            } else {
                let junction_name = format!(
                    "{}_{}{}_{}",
                    class.name,
                    name_prefix,
                    crate::names::launder_name(head_local),
                    crate::names::launder_name(&target_name)
                );
                let mut junction = SchemaClass::new(
                    junction_name,
                    QName::new(ns, realization.1.clone()),
                    concrete_xpath.clone(),
                    ClassCategory::Junction,
                );
                junction.parent_xpath = Some(class.xpath.clone());
                junction.child_xpath = Some(target_xpath.clone());
                junction.fields.push(Field::new(
                    JUNCTION_PARENT_FIELD,
                    format!("{}/parent", concrete_xpath),
                    FieldType::String,
                ));
                junction.fields.push(Field::new(
                    JUNCTION_CHILD_FIELD,
                    format!("{}/child", concrete_xpath),
                    FieldType::String,
                ));
                self.config.limits.check_classes(self.classes.len() + 1)?;
                self.classes.push(junction);

                let mut field = Field::new(
                    format!(
                        "{}{}_{}",
                        name_prefix,
                        crate::names::launder_name(head_local),
                        crate::names::launder_name(&target_name)
                    ),
                    concrete_xpath.clone(),
                    FieldType::String,
                );
                field.category = FieldCategory::PathToChildElementWithJunction;
                field.related_class_xpath = Some(target_xpath);
                field.abstract_element_xpath = Some(head_xpath.to_string());
                class.fields.push(field);
            }
        }
        Ok(())
    }

    /// Name an element gets as a top-level class: its local name, prefixed
    /// with the namespace identifier once another instantiable element in a
    /// different namespace shares the local name
    fn top_level_name(&self, elem_key: &Key) -> String {
        let collides = self.elements.iter().any(|(k, (node, _))| {
            k.1 == elem_key.1 && k.0 != elem_key.0 && node.attribute("abstract") != Some("true")
        });
        if collides {
            let prefix = self.prefixes.prefix(&elem_key.0).unwrap_or("ns");
            format!("{}_{}", crate::names::launder_name(prefix), elem_key.1)
        } else {
            elem_key.1.clone()
        }
    }

    fn geometry_kind_of(&self, decl: &roxmltree::Node<'a, 'a>) -> Result<Option<GeometryKind>> {
        let type_ref = match decl.attribute("type") {
            Some(t) => t,
            None => return Ok(None),
        };
        let k = self.resolve_qname_key(decl, type_ref)?;
        if !is_gml_namespace(&k.0) {
            return Ok(None);
        }
        let kind = match k.1.as_str() {
            "PointPropertyType" => GeometryKind::Point,
            "CurvePropertyType" | "LineStringPropertyType" => GeometryKind::Line,
            "SurfacePropertyType" | "PolygonPropertyType" => GeometryKind::Polygon,
            "GeometryPropertyType" | "GeometricPrimitivePropertyType" | "MultiPointPropertyType"
            | "MultiCurvePropertyType" | "MultiSurfacePropertyType" | "MultiGeometryPropertyType" => {
                GeometryKind::Unknown
            }
            _ => return Ok(None),
        };
        Ok(Some(kind))
    }

    fn add_geometry_field(
        &mut self,
        class: &mut SchemaClass,
        elem_xpath: &str,
        name_prefix: &str,
        local: &str,
        kind: GeometryKind,
        min_occurs: u32,
    ) {
        let name = format!("{}{}", name_prefix, crate::names::launder_name(local));
        let mut field = Field::new(name.clone(), elem_xpath.to_string(), FieldType::Geometry);
        field.min_occurs = min_occurs;
        field.geometry = Some(GeometryInfo { kind, srs: None });
        class.fields.push(field);

        if self.config.include_geometry_xml {
            let mut shadow = Field::new(
                format!("{}_xml", name),
                format!("{}/xml", elem_xpath),
                FieldType::AnyType,
            );
            shadow.min_occurs = 0;
            class.fields.push(shadow);
        }
    }

    fn finish(mut self) -> Result<SchemaModel> {
        // Exclusion rules remove matching fields from the model.
        let matcher = XPathMatcher::compile(&self.config.ignored_xpaths, &self.prefixes);
        if !matcher.is_empty() {
            for class in &mut self.classes {
                for field in &mut class.fields {
                    if matcher.matches(&field.xpath).is_some() {
                        field.ignored = true;
                    }
                }
            }
        }

        // Duplicate generated field names get positional suffixes.
        for class in &mut self.classes {
            let mut seen: HashMap<String, usize> = HashMap::new();
            for field in &mut class.fields {
                let count = seen.entry(field.name.clone()).or_insert(0);
                *count += 1;
                if *count > 1 {
                    field.name = format!("{}_{}", field.name, count);
                }
            }
        }

        let model = SchemaModel::new(self.classes, self.prefixes);

        // Containment parents resolve by xpath now that every class has an id.
        let parent_links: Vec<(usize, super::ClassId)> = model
            .classes()
            .filter_map(|(id, class)| {
                class
                    .parent_xpath
                    .as_ref()
                    .filter(|_| class.category == ClassCategory::Nested)
                    .and_then(|p| model.class_by_xpath(p))
                    .map(|parent| (id.0, parent))
            })
            .collect();
        let mut model = model;
        for (idx, parent) in parent_links {
            model.set_parent(idx, parent);
        }
        Ok(model)
    }
}

enum ElementType<'a> {
    Simple(FieldType),
    Complex(NodeRef<'a>),
    AnyType,
}

fn parse_min_occurs(node: &roxmltree::Node) -> Result<u32> {
    match node.attribute("minOccurs") {
        Some(v) => v
            .parse::<u32>()
            .map_err(|_| Error::SchemaInvalid(format!("invalid minOccurs '{}'", v))),
        None => Ok(1),
    }
}

fn parse_max_occurs(node: &roxmltree::Node) -> Result<Occurs> {
    match node.attribute("maxOccurs") {
        Some("unbounded") => Ok(Occurs::Unbounded),
        Some(v) => v
            .parse::<u32>()
            .map(Occurs::Bounded)
            .map_err(|_| Error::SchemaInvalid(format!("invalid maxOccurs '{}'", v))),
        None => Ok(Occurs::Bounded(1)),
    }
}

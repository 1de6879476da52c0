//! Instance Mapper / Feature Assembler
//!
//! Streams an instance document against the built model and assembles one
//! [`Feature`] per matched class instance, lazily: features are produced as
//! the stream is consumed, and a caller that stops asking leaves the stream
//! partially read. A stack of open-context frames tracks the element being
//! filled; links are resolved against an ID registry built during the same
//! single forward pass, with one retry once the document has been consumed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::PathBuf;
use std::rc::Rc;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;

use crate::config::Configuration;
use crate::diagnostics::{Diagnostic, DiagnosticKind, SharedSink};
use crate::error::{Error, Result};
use crate::geometry::{self, SwapCoordinates};
use crate::limits::Limits;
use crate::model::{
    ClassCategory, ClassId, Feature, FieldCategory, SchemaModel, JUNCTION_CHILD_FIELD,
    JUNCTION_PARENT_FIELD, PARENT_PKID_FIELD,
};
use crate::value::{FieldType, Value};
use crate::xpath::XPathMatcher;
use crate::{is_gml_namespace, XLINK_NAMESPACE};

/// Re-openable source of the instance document
#[derive(Debug, Clone)]
pub enum InstanceSource {
    /// Document on disk
    Path(PathBuf),
    /// Document in memory
    Memory(String),
}

impl InstanceSource {
    /// Open a fresh buffered stream over the document
    pub fn open(&self) -> Result<Box<dyn BufRead>> {
        match self {
            InstanceSource::Path(path) => {
                let file = File::open(path).map_err(|e| {
                    Error::Io(std::io::Error::new(
                        e.kind(),
                        format!("Cannot open {}", path.display()),
                    ))
                })?;
                Ok(Box::new(BufReader::new(file)))
            }
            InstanceSource::Memory(text) => Ok(Box::new(Cursor::new(text.clone().into_bytes()))),
        }
    }
}

/// One in-progress feature frame
struct FeatureCtx {
    class: ClassId,
    /// `segments.len()` right after the feature's element was pushed
    root_depth: usize,
    /// Index of the first segment of the XPaths this frame matches against
    base_depth: usize,
    feature: Feature,
    /// (pkid field name, referenced id) pairs awaiting resolution
    pending_links: Vec<(String, String)>,
    /// Parent frame field to receive this feature's pkid on close
    link_parent_field: Option<String>,
    /// Junction row to emit on close: (junction class, parent pkid)
    junction: Option<(ClassId, String)>,
}

/// Scalar field capture in progress
struct CurField {
    ctx_idx: usize,
    field_idx: usize,
    depth: usize,
    text: String,
}

/// Geometry sub-tree capture in progress
struct GeomCapture {
    ctx_idx: usize,
    field_idx: usize,
    /// Depth of the matched property element (content below it is captured)
    depth: usize,
    /// Verbatim serialization of the captured content
    raw: String,
    /// Namespace binding to re-declare on the outermost captured element
    root_ns: Option<(String, String)>,
    /// Whether the matched element itself is part of the capture
    include_self: bool,
}

enum Mode {
    Normal,
    /// Skipping a subtree; back to Normal when depth drops below the value
    Skip(usize),
}

/// Pull-style streaming reader producing features
pub struct InstanceReader {
    model: Rc<SchemaModel>,
    swap: SwapCoordinates,
    matcher: XPathMatcher,
    sink: SharedSink,
    limits: Limits,
    xml: NsReader<Box<dyn BufRead>>,
    buf: Vec<u8>,
    segments: Vec<String>,
    ctx_stack: Vec<FeatureCtx>,
    mode: Mode,
    cur_field: Option<CurField>,
    geom: Option<GeomCapture>,
    ready: VecDeque<Feature>,
    parked: Vec<(Feature, Vec<(String, String)>)>,
    id_registry: HashMap<String, String>,
    counters: HashMap<usize, u64>,
    /// First-seen SRS code per geometry field, to flag mixed-SRS content
    field_srs: HashMap<(usize, usize), String>,
    /// Identified rows already emitted, per class (repeated references to
    /// the same identity yield one row)
    emitted_ids: HashSet<(usize, String)>,
    fatal: Option<Error>,
    finished: bool,
}

impl InstanceReader {
    /// Create a reader over a fresh instance stream
    pub fn new(
        model: Rc<SchemaModel>,
        config: &Configuration,
        source: &InstanceSource,
        sink: SharedSink,
    ) -> Result<Self> {
        let stream = source.open()?;
        let matcher = XPathMatcher::compile(&config.ignored_xpaths, &model.prefixes);
        Ok(Self {
            model,
            swap: config.swap_coordinates,
            matcher,
            sink,
            limits: config.limits.clone(),
            xml: NsReader::from_reader(stream),
            buf: Vec::new(),
            segments: Vec::new(),
            ctx_stack: Vec::new(),
            mode: Mode::Normal,
            cur_field: None,
            geom: None,
            ready: VecDeque::new(),
            parked: Vec::new(),
            id_registry: HashMap::new(),
            counters: HashMap::new(),
            field_srs: HashMap::new(),
            emitted_ids: HashSet::new(),
            fatal: None,
            finished: false,
        })
    }

    /// Produce the next feature of any table, in document completion order
    ///
    /// May consume an unbounded amount of the underlying document; further
    /// non-fatal diagnostics may be reported while doing so.
    pub fn next_feature(&mut self) -> Result<Option<Feature>> {
        loop {
            if let Some(feature) = self.ready.pop_front() {
                return Ok(Some(feature));
            }
            if let Some(err) = self.fatal.take() {
                self.finished = true;
                return Err(err);
            }
            if self.finished {
                return Ok(None);
            }
            self.advance();
        }
    }

    fn report(&self, diagnostic: Diagnostic) {
        self.sink.borrow_mut().report(diagnostic);
    }

    /// Consume one XML event
    fn advance(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        // The resolved event borrows both the reader and the buffer, so it
        // is lowered to an owned form before any state is touched.
        let parsed = match self.xml.read_resolved_event_into(&mut buf) {
            Err(e) => Parsed::Fatal(e.to_string()),
            Ok((ns, Event::Start(ref start))) => Parsed::Start(raw_start(&ns, start)),
            Ok((ns, Event::Empty(ref start))) => Parsed::Empty(raw_start(&ns, start)),
            Ok((_, Event::End(ref end))) => {
                Parsed::End(String::from_utf8_lossy(end.name().as_ref()).into_owned())
            }
            Ok((_, Event::Text(ref text))) => match text.unescape() {
                Ok(t) => Parsed::Text(t.into_owned()),
                Err(e) => Parsed::Fatal(e.to_string()),
            },
            Ok((_, Event::CData(ref data))) => {
                Parsed::Text(String::from_utf8_lossy(data).into_owned())
            }
            Ok((_, Event::Eof)) => Parsed::Eof,
            Ok(_) => Parsed::Nothing,
        };
        self.buf = buf;

        match parsed {
            Parsed::Fatal(message) => {
                self.fatal = Some(Error::MalformedDocument(message));
            }
            Parsed::Start(raw) => {
                let info = self.element_info(raw);
                self.on_start(info);
            }
            Parsed::Empty(raw) => {
                let info = self.element_info(raw);
                let raw_name = info.raw_name.clone();
                self.on_start(info);
                self.on_end(&raw_name);
            }
            Parsed::End(raw_name) => self.on_end(&raw_name),
            Parsed::Text(text) => self.on_text(&text),
            Parsed::Eof => self.on_eof(),
            Parsed::Nothing => {}
        }
    }

    /// Resolve a raw start element against the model's prefixes
    fn element_info(&self, raw: RawStart) -> ElementInfo {
        let segment = self.model.prefixes.qualify(raw.ns_uri.as_deref(), &raw.local);

        let mut attributes = Vec::new();
        for (key, value) in raw.attributes {
            let (attr_ns, attr_local) = self.xml.resolve_attribute(quick_xml::name::QName(&key));
            let attr_ns_uri = match attr_ns {
                ResolveResult::Bound(Namespace(uri)) => {
                    Some(String::from_utf8_lossy(uri).into_owned())
                }
                _ => None,
            };
            let attr_segment = self.model.prefixes.qualify(
                attr_ns_uri.as_deref(),
                &String::from_utf8_lossy(attr_local.as_ref()),
            );
            attributes.push(AttributeInfo {
                segment: attr_segment,
                ns_uri: attr_ns_uri,
                raw_key: String::from_utf8_lossy(&key).into_owned(),
                value,
            });
        }

        ElementInfo {
            raw_name: raw.raw_name,
            ns_uri: raw.ns_uri,
            segment,
            attributes,
        }
    }

    fn on_start(&mut self, info: ElementInfo) {
        self.segments.push(info.segment.clone());
        if let Err(e) = self.limits.check_xml_depth(self.segments.len()) {
            self.fatal = Some(e);
            return;
        }
        if matches!(self.mode, Mode::Skip(_)) {
            return;
        }
        if self.geom.is_some() {
            self.capture_start(&info);
            return;
        }

        let model = Rc::clone(&self.model);

        if self.ctx_stack.is_empty() {
            // Document level: look for a top-level class, descend through
            // anything else (collection wrappers).
            if let Some(class_id) = model.class_by_xpath(&info.segment) {
                self.open_feature(class_id, None, None);
                self.apply_attributes(&info);
                self.assign_pkid();
                self.maybe_capture_own_text();
            }
            return;
        }

        let (ctx_class, ctx_base, parent_pkid) = {
            let ctx = self.ctx_stack.last().unwrap();
            (ctx.class, ctx.base_depth, ctx.feature.pkid.clone())
        };
        let class = model.class(ctx_class);
        let sub_xpath = self.sub_xpath(ctx_base);

        if let Some((field_idx, field)) = class.field_by_xpath(&sub_xpath) {
            if field.ignored {
                let warn = self
                    .matcher
                    .matches(&sub_xpath)
                    .map(|m| m.warn)
                    .unwrap_or(false);
                self.skip_subtree(&sub_xpath, warn);
                return;
            }
            match field.category {
                FieldCategory::Regular => {
                    if field.field_type == FieldType::Geometry {
                        self.geom = Some(GeomCapture {
                            ctx_idx: self.ctx_stack.len() - 1,
                            field_idx,
                            depth: self.segments.len(),
                            raw: String::new(),
                            root_ns: None,
                            include_self: false,
                        });
                    } else {
                        self.cur_field = Some(CurField {
                            ctx_idx: self.ctx_stack.len() - 1,
                            field_idx,
                            depth: self.segments.len(),
                            text: String::new(),
                        });
                        self.apply_attributes(&info);
                    }
                }
                FieldCategory::PathToChildElement => {
                    if let Some(child_id) = field
                        .related_class_xpath
                        .as_deref()
                        .and_then(|p| model.class_by_xpath(p))
                    {
                        self.open_feature(child_id, None, None);
                        if let Some(child_ctx) = self.ctx_stack.last_mut() {
                            child_ctx
                                .feature
                                .set(PARENT_PKID_FIELD, Value::String(parent_pkid));
                        }
                        self.apply_attributes(&info);
                        self.assign_pkid();
                        self.maybe_capture_own_text();
                    }
                }
                FieldCategory::PathToChildElementWithLink => {
                    if let Some(target_id) = field
                        .related_class_xpath
                        .as_deref()
                        .and_then(|p| model.class_by_xpath(p))
                    {
                        let link_field = field.name.clone();
                        self.open_feature(target_id, Some(link_field), None);
                        self.apply_attributes(&info);
                        self.assign_pkid();
                        self.maybe_capture_own_text();
                    }
                }
                FieldCategory::PathToChildElementWithJunction => {
                    let junction_id = model.class_by_xpath(&field.xpath);
                    let target_id = field
                        .related_class_xpath
                        .as_deref()
                        .and_then(|p| model.class_by_xpath(p));
                    if let (Some(junction_id), Some(target_id)) = (junction_id, target_id) {
                        self.open_feature(target_id, None, Some((junction_id, parent_pkid)));
                        self.apply_attributes(&info);
                        self.assign_pkid();
                        self.maybe_capture_own_text();
                    }
                }
            }
            return;
        }

        // A GML geometry element standing in for an abstract geometry slot.
        if info.ns_uri.as_deref().map(is_gml_namespace).unwrap_or(false) {
            let parent = sub_xpath.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
            let abstract_segment = model
                .prefixes
                .qualify(info.ns_uri.as_deref(), "AbstractGeometry");
            let abstract_xpath = if parent.is_empty() {
                abstract_segment
            } else {
                format!("{}/{}", parent, abstract_segment)
            };
            let matched = class.field_by_xpath(&abstract_xpath).and_then(|(i, f)| {
                (f.field_type == FieldType::Geometry && !f.ignored).then_some(i)
            });
            if let Some(field_idx) = matched {
                self.geom = Some(GeomCapture {
                    ctx_idx: self.ctx_stack.len() - 1,
                    field_idx,
                    depth: self.segments.len() - 1,
                    raw: String::new(),
                    root_ns: None,
                    include_self: true,
                });
                self.capture_start(&info);
                return;
            }
        }

        // Intermediate element of a flattened compound: descend, applying
        // attribute fields declared at this level.
        let prefix = format!("{}/", sub_xpath);
        if class.fields.iter().any(|f| f.xpath.starts_with(&prefix)) {
            self.apply_attributes(&info);
            return;
        }

        // Not modeled: excluded or genuinely unexpected.
        let ignored = self.matcher.matches(&sub_xpath).map(|m| m.warn);
        match ignored {
            Some(warn) => self.skip_subtree(&sub_xpath, warn),
            None => {
                self.report(Diagnostic::at(
                    DiagnosticKind::UnexpectedElement,
                    sub_xpath.clone(),
                    format!("Unexpected element {}", sub_xpath),
                ));
                self.mode = Mode::Skip(self.segments.len());
            }
        }
    }

    fn capture_start(&mut self, info: &ElementInfo) {
        let capture = match self.geom.as_mut() {
            Some(c) => c,
            None => return,
        };
        if capture.root_ns.is_none() {
            if let Some(uri) = &info.ns_uri {
                let prefix = match info.raw_name.split_once(':') {
                    Some((p, _)) => p.to_string(),
                    None => String::new(),
                };
                capture.root_ns = Some((prefix, uri.clone()));
            }
        }
        capture.raw.push('<');
        capture.raw.push_str(&info.raw_name);
        for attr in &info.attributes {
            capture
                .raw
                .push_str(&format!(" {}=\"{}\"", attr.raw_key, attr.value));
        }
        capture.raw.push('>');
    }

    fn skip_subtree(&mut self, sub_xpath: &str, warn: bool) {
        if warn {
            self.report(Diagnostic::at(
                DiagnosticKind::IgnoredXPathMatchedInInstance,
                sub_xpath.to_string(),
                format!("Element {} matches an ignored XPath", sub_xpath),
            ));
        }
        self.mode = Mode::Skip(self.segments.len());
    }

    fn on_text(&mut self, text: &str) {
        if matches!(self.mode, Mode::Skip(_)) {
            return;
        }
        if let Some(capture) = &mut self.geom {
            capture.raw.push_str(&escape_text(text));
            if let Err(e) = self.limits.check_content_size(capture.raw.len()) {
                self.fatal = Some(e);
            }
            return;
        }
        if let Some(cur) = &mut self.cur_field {
            cur.text.push_str(text);
            if let Err(e) = self.limits.check_content_size(cur.text.len()) {
                self.fatal = Some(e);
            }
        }
    }

    fn on_end(&mut self, raw_name: &str) {
        if let Mode::Skip(depth) = self.mode {
            self.segments.pop();
            if self.segments.len() < depth {
                self.mode = Mode::Normal;
            }
            return;
        }

        if let Some((depth, include_self)) =
            self.geom.as_ref().map(|c| (c.depth, c.include_self))
        {
            if self.segments.len() > depth {
                if let Some(capture) = self.geom.as_mut() {
                    capture.raw.push_str("</");
                    capture.raw.push_str(raw_name);
                    capture.raw.push('>');
                }
                self.segments.pop();
                // A self-captured geometry element ends its own capture.
                if include_self && self.segments.len() == depth {
                    self.finish_geometry();
                }
                return;
            }
            // The property element closes: process what was captured.
            self.finish_geometry();
        }

        if let Some(depth) = self.cur_field.as_ref().map(|c| c.depth) {
            if self.segments.len() == depth {
                self.commit_current_field();
            }
        }

        if let Some(root_depth) = self.ctx_stack.last().map(|c| c.root_depth) {
            if self.segments.len() == root_depth {
                self.finalize_feature();
            }
        }

        self.segments.pop();
    }

    fn on_eof(&mut self) {
        if !self.segments.is_empty() {
            self.fatal = Some(Error::MalformedDocument(
                "input ended before all started tags were ended".to_string(),
            ));
            return;
        }
        // Retry pass: forward references may be resolvable now.
        let parked = std::mem::take(&mut self.parked);
        for (mut feature, pending) in parked {
            for (field_name, id) in pending {
                match self.id_registry.get(&id) {
                    Some(pkid) => {
                        let pkid = pkid.clone();
                        feature.set(field_name, Value::String(pkid));
                    }
                    None => {
                        self.report(Diagnostic::new(
                            DiagnosticKind::LinkUnresolved,
                            format!("field '{}': no element with id '{}'", field_name, id),
                        ));
                    }
                }
            }
            self.ready.push_back(feature);
        }
        self.finished = true;
    }

    /// XPath of the current element relative to the active frame's base
    fn sub_xpath(&self, base_depth: usize) -> String {
        self.segments[base_depth - 1..].join("/")
    }

    fn open_feature(
        &mut self,
        class_id: ClassId,
        link_parent_field: Option<String>,
        junction: Option<(ClassId, String)>,
    ) {
        let base_depth = if self.model.class(class_id).category == ClassCategory::Nested {
            // Nested class field XPaths stay rooted at the enclosing
            // top-level feature.
            self.ctx_stack
                .last()
                .map(|c| c.base_depth)
                .unwrap_or(self.segments.len())
        } else {
            self.segments.len()
        };
        self.ctx_stack.push(FeatureCtx {
            class: class_id,
            root_depth: self.segments.len(),
            base_depth,
            feature: Feature::new(class_id),
            pending_links: Vec::new(),
            link_parent_field,
            junction,
        });
    }

    /// Set attribute-backed fields of the element just opened
    fn apply_attributes(&mut self, info: &ElementInfo) {
        let ctx_idx = match self.ctx_stack.len() {
            0 => return,
            n => n - 1,
        };
        let model = Rc::clone(&self.model);
        let (ctx_class, ctx_base) = {
            let ctx = &self.ctx_stack[ctx_idx];
            (ctx.class, ctx.base_depth)
        };
        let class = model.class(ctx_class);
        let sub_xpath = self.sub_xpath(ctx_base);

        let mut updates: Vec<(String, Value)> = Vec::new();
        let mut links: Vec<(String, String)> = Vec::new();
        for attr in &info.attributes {
            let attr_xpath = format!("{}/@{}", sub_xpath, attr.segment);
            if let Some((_, field)) = class.field_by_xpath(&attr_xpath) {
                if field.ignored {
                    continue;
                }
                let value = Value::parse(field.field_type, &attr.value)
                    .unwrap_or_else(|_| Value::String(attr.value.clone()));
                updates.push((field.name.clone(), value));

                // xlink:href="#id" also feeds the resolved-pkid column.
                if attr.ns_uri.as_deref() == Some(XLINK_NAMESPACE) && field.name.ends_with("_href")
                {
                    if let Some(id) = attr.value.strip_prefix('#') {
                        let pkid_field = format!("{}_pkid", field.name.trim_end_matches("_href"));
                        if class.field_by_name(&pkid_field).is_some() {
                            links.push((pkid_field, id.to_string()));
                        }
                    }
                }
            }
        }

        let ctx = &mut self.ctx_stack[ctx_idx];
        for (name, value) in updates {
            ctx.feature.set(name, value);
        }
        ctx.pending_links.extend(links);
    }

    /// Generate or adopt the primary key of the frame just opened
    fn assign_pkid(&mut self) {
        let model = Rc::clone(&self.model);
        let ctx_idx = self.ctx_stack.len() - 1;
        let class_id = self.ctx_stack[ctx_idx].class;
        let class = model.class(class_id);

        // Document-provided identifier wins.
        if let Some(id_idx) = class.id_field {
            let id_name = &class.fields[id_idx].name;
            if let Some(id) = self.ctx_stack[ctx_idx].feature.get_str(id_name) {
                let id = id.to_string();
                self.ctx_stack[ctx_idx].feature.pkid = id;
                return;
            }
        }

        let counter = self.counters.entry(class_id.0).or_insert(0);
        *counter += 1;
        let n = *counter;
        let local = &class.qname.local_name;

        let parent_pkid = if class.category == ClassCategory::Nested && ctx_idx >= 1 {
            Some(self.ctx_stack[ctx_idx - 1].feature.pkid.clone())
        } else {
            None
        };
        self.ctx_stack[ctx_idx].feature.pkid = match parent_pkid {
            Some(parent) if !parent.is_empty() => format!("{}_{}_{}", parent, local, n),
            _ => format!("{}_{}", local, n),
        };
    }

    /// A class for a simple-type element stores its text in the `value` field
    fn maybe_capture_own_text(&mut self) {
        let model = Rc::clone(&self.model);
        let ctx = self.ctx_stack.last().unwrap();
        let class = model.class(ctx.class);
        let own_xpath = self.sub_xpath(ctx.base_depth);
        if let Some((field_idx, field)) = class.field_by_xpath(&own_xpath) {
            if field.category == FieldCategory::Regular
                && !field.ignored
                && field.field_type != FieldType::Geometry
            {
                self.cur_field = Some(CurField {
                    ctx_idx: self.ctx_stack.len() - 1,
                    field_idx,
                    depth: self.segments.len(),
                    text: String::new(),
                });
            }
        }
    }

    fn commit_current_field(&mut self) {
        let cur = match self.cur_field.take() {
            Some(c) => c,
            None => return,
        };
        let model = Rc::clone(&self.model);
        let class_id = match self.ctx_stack.get(cur.ctx_idx) {
            Some(c) => c.class,
            None => return,
        };
        let field = &model.class(class_id).fields[cur.field_idx];
        let parsed = Value::parse(field.field_type, &cur.text)
            .unwrap_or_else(|_| Value::String(cur.text.trim().to_string()));

        let mut duplicate = None;
        {
            let ctx = &mut self.ctx_stack[cur.ctx_idx];
            if field.array {
                match ctx.feature.get_mut(&field.name) {
                    Some(list) => Value::push_to_list(list, parsed),
                    None => {
                        let mut list = Value::empty_list(field.field_type);
                        Value::push_to_list(&mut list, parsed);
                        ctx.feature.set(field.name.clone(), list);
                    }
                }
            } else {
                if ctx.feature.is_set(&field.name) {
                    // The schema allows a single logical value here; the
                    // later occurrence wins.
                    duplicate = Some(field.xpath.clone());
                }
                ctx.feature.set(field.name.clone(), parsed);
            }
        }
        if let Some(xpath) = duplicate {
            self.report(Diagnostic::at(
                DiagnosticKind::DuplicateNonArrayField,
                xpath.clone(),
                format!(
                    "Unexpected element {}: duplicate value, keeping the last one",
                    xpath
                ),
            ));
        }
    }

    fn finish_geometry(&mut self) {
        let capture = match self.geom.take() {
            Some(c) => c,
            None => return,
        };
        let model = Rc::clone(&self.model);
        let class_id = match self.ctx_stack.get(capture.ctx_idx) {
            Some(c) => c.class,
            None => return,
        };
        let field = &model.class(class_id).fields[capture.field_idx];
        let raw = capture.raw.trim().to_string();

        // Raw-XML shadow column keeps the serialized sub-tree verbatim.
        let shadow_name = format!("{}_xml", field.name);
        let has_shadow = model.class(class_id).field_by_name(&shadow_name).is_some();
        if has_shadow && !raw.is_empty() {
            self.ctx_stack[capture.ctx_idx]
                .feature
                .set(shadow_name, Value::String(raw.clone()));
        }
        if raw.is_empty() {
            return;
        }

        let parseable = inject_namespace(&raw, capture.root_ns.as_ref());
        let declared_srs = field.geometry.as_ref().and_then(|g| g.srs.clone());
        let mut diagnostic = None;
        match geometry::parse_gml(&parseable, declared_srs.as_deref(), self.swap) {
            Ok(geom) => {
                // Mixed reference systems within one field cannot be
                // reconciled without reprojection support.
                let srs_key = (class_id.0, capture.field_idx);
                let mut reprojection_failed = false;
                if let Some(srs) = geom.srs() {
                    let code = geometry::srs_code(srs).unwrap_or(srs).to_string();
                    match self.field_srs.get(&srs_key) {
                        Some(first) if *first != code => {
                            diagnostic = Some(Diagnostic::new(
                                DiagnosticKind::ReprojectionFailed,
                                format!(
                                    "field '{}': cannot transform geometry from '{}' into '{}'",
                                    field.name, code, first
                                ),
                            ));
                            reprojection_failed = true;
                        }
                        Some(_) => {}
                        None => {
                            self.field_srs.insert(srs_key, code);
                        }
                    }
                }
                if !reprojection_failed {
                    self.ctx_stack[capture.ctx_idx]
                        .feature
                        .set(field.name.clone(), Value::Geometry(geom));
                }
            }
            Err(e) => {
                diagnostic = Some(Diagnostic::new(
                    DiagnosticKind::ReprojectionFailed,
                    format!("field '{}': {}", field.name, e),
                ));
            }
        }
        if let Some(d) = diagnostic {
            self.report(d);
        }
    }

    fn finalize_feature(&mut self) {
        let mut ctx = match self.ctx_stack.pop() {
            Some(c) => c,
            None => return,
        };
        let model = Rc::clone(&self.model);
        let class = model.class(ctx.class);

        // Register the document identifier for link resolution. A second
        // occurrence of the same identity does not produce a second row.
        let mut already_emitted = false;
        if let Some(id_idx) = class.id_field {
            if let Some(id) = ctx.feature.get_str(&class.fields[id_idx].name) {
                self.id_registry
                    .insert(id.to_string(), ctx.feature.pkid.clone());
                already_emitted = !self
                    .emitted_ids
                    .insert((ctx.class.0, id.to_string()));
            }
        }

        // Resolve what the registry already knows; park the rest.
        let mut unresolved = Vec::new();
        for (field_name, id) in std::mem::take(&mut ctx.pending_links) {
            match self.id_registry.get(&id) {
                Some(pkid) => {
                    let pkid = pkid.clone();
                    ctx.feature.set(field_name, Value::String(pkid));
                }
                None => unresolved.push((field_name, id)),
            }
        }

        // A link slot hands its pkid to the parent frame.
        if let Some(parent_field) = ctx.link_parent_field.take() {
            let pkid = ctx.feature.pkid.clone();
            if let Some(parent) = self.ctx_stack.last_mut() {
                parent.feature.set(parent_field, Value::String(pkid));
            }
        }

        // A junction slot emits the junction row alongside the child.
        let junction_row = ctx.junction.take().map(|(junction_id, parent_pkid)| {
            let junction_class = model.class(junction_id);
            let counter = self.counters.entry(junction_id.0).or_insert(0);
            *counter += 1;
            let mut row = Feature::new(junction_id);
            row.pkid = format!("{}_{}", junction_class.name, *counter);
            row.set(JUNCTION_PARENT_FIELD, Value::String(parent_pkid));
            row.set(
                JUNCTION_CHILD_FIELD,
                Value::String(ctx.feature.pkid.clone()),
            );
            row
        });

        if !already_emitted {
            if unresolved.is_empty() {
                self.ready.push_back(ctx.feature);
            } else {
                self.parked.push((ctx.feature, unresolved));
            }
        }
        if let Some(row) = junction_row {
            self.ready.push_back(row);
        }
    }
}

/// One event lowered to owned data
enum Parsed {
    Start(RawStart),
    Empty(RawStart),
    End(String),
    Text(String),
    Eof,
    Fatal(String),
    Nothing,
}

/// A start element before prefix resolution
struct RawStart {
    raw_name: String,
    local: String,
    ns_uri: Option<String>,
    /// (raw key bytes, unescaped value) per non-xmlns attribute
    attributes: Vec<(Vec<u8>, String)>,
}

fn raw_start(ns: &ResolveResult, start: &BytesStart) -> RawStart {
    let ns_uri = match ns {
        ResolveResult::Bound(Namespace(uri)) => Some(String::from_utf8_lossy(uri).into_owned()),
        _ => None,
    };
    let mut attributes = Vec::new();
    for attr in start.attributes().flatten() {
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        attributes.push((
            attr.key.as_ref().to_vec(),
            String::from_utf8_lossy(&attr.value).into_owned(),
        ));
    }
    RawStart {
        raw_name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        local: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        ns_uri,
        attributes,
    }
}

struct ElementInfo {
    raw_name: String,
    ns_uri: Option<String>,
    segment: String,
    attributes: Vec<AttributeInfo>,
}

struct AttributeInfo {
    segment: String,
    ns_uri: Option<String>,
    raw_key: String,
    value: String,
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Re-declare the root element's namespace binding so the captured fragment
/// parses standalone
fn inject_namespace(xml: &str, root_ns: Option<&(String, String)>) -> String {
    let (prefix, uri) = match root_ns {
        Some(pair) => pair,
        None => return xml.to_string(),
    };
    let decl = if prefix.is_empty() {
        "xmlns".to_string()
    } else {
        format!("xmlns:{}", prefix)
    };
    if xml.contains(&format!("{}=", decl)) {
        return xml.to_string();
    }
    match xml.find(|c| c == '>' || c == ' ') {
        Some(pos) => {
            let mut out = String::with_capacity(xml.len() + decl.len() + uri.len() + 4);
            out.push_str(&xml[..pos]);
            out.push_str(&format!(" {}=\"{}\"", decl, uri));
            out.push_str(&xml[pos..]);
            out
        }
        None => xml.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("a < b & c"), "a &lt; b &amp; c");
    }

    #[test]
    fn test_inject_namespace() {
        let ns = (
            "gml".to_string(),
            "http://www.opengis.net/gml/3.2".to_string(),
        );
        let out = inject_namespace("<gml:Point><gml:pos>1 2</gml:pos></gml:Point>", Some(&ns));
        assert!(out.starts_with("<gml:Point xmlns:gml=\"http://www.opengis.net/gml/3.2\""));

        // Existing declarations are preserved untouched.
        let already = r#"<gml:Point xmlns:gml="http://x"><gml:pos>1 2</gml:pos></gml:Point>"#;
        assert_eq!(inject_namespace(already, Some(&ns)), already);

        // Default-namespace capture re-declares xmlns.
        let ns = (String::new(), "http://www.opengis.net/gml/3.2".to_string());
        let out = inject_namespace("<Point><pos>1 2</pos></Point>", Some(&ns));
        assert!(out.starts_with("<Point xmlns=\""));
    }

    #[test]
    fn test_instance_source_memory() {
        let source = InstanceSource::Memory("<a/>".to_string());
        let mut stream = source.open().unwrap();
        let mut text = String::new();
        stream.read_to_string(&mut text).unwrap();
        assert_eq!(text, "<a/>");
    }

    #[test]
    fn test_instance_source_missing_file() {
        let source = InstanceSource::Path(PathBuf::from("/nonexistent/file.xml"));
        let err = source.open().err().unwrap();
        let msg = format!("{}", err);
        assert!(msg.contains("Cannot open"));
    }
}

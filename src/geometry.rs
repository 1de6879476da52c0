//! GML geometry values
//!
//! The instance mapper captures the raw sub-tree of a geometry property and
//! hands it here for deserialization. Supported encodings are the common GML
//! point/line/polygon forms (`gml:pos`, `gml:posList`, exterior/interior
//! linear rings). The declared or parsed coordinate reference system decides
//! axis order under the configured swap policy.

use crate::error::{Error, Result};
use crate::is_gml_namespace;

/// Geometry kind of a field or value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    /// Point geometry
    Point,
    /// Line string geometry
    Line,
    /// Polygon geometry
    Polygon,
    /// More than one kind is possible at this XPath
    Unknown,
}

/// Axis-order policy for geometry extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapCoordinates {
    /// Swap when the SRS declares latitude-first axis order
    #[default]
    Auto,
    /// Always exchange the first two coordinates
    Yes,
    /// Never exchange coordinates
    No,
}

/// A parsed geometry value
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// A single position
    Point {
        /// Easting / longitude after axis policy is applied
        x: f64,
        /// Northing / latitude after axis policy is applied
        y: f64,
        /// SRS name as written in the document, if any
        srs: Option<String>,
    },
    /// An ordered sequence of positions
    Line {
        /// Vertices after axis policy is applied
        points: Vec<(f64, f64)>,
        /// SRS name as written in the document, if any
        srs: Option<String>,
    },
    /// An exterior ring plus zero or more interior rings
    Polygon {
        /// Rings, exterior first
        rings: Vec<Vec<(f64, f64)>>,
        /// SRS name as written in the document, if any
        srs: Option<String>,
    },
}

impl Geometry {
    /// SRS name carried by the value
    pub fn srs(&self) -> Option<&str> {
        match self {
            Geometry::Point { srs, .. } | Geometry::Line { srs, .. } | Geometry::Polygon { srs, .. } => {
                srs.as_deref()
            }
        }
    }

    /// Kind of this value
    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Point { .. } => GeometryKind::Point,
            Geometry::Line { .. } => GeometryKind::Line,
            Geometry::Polygon { .. } => GeometryKind::Polygon,
        }
    }

    /// Well-known-text rendering (used by tests and the CLI dump)
    pub fn to_wkt(&self) -> String {
        fn coords(points: &[(f64, f64)]) -> String {
            points
                .iter()
                .map(|(x, y)| format!("{} {}", x, y))
                .collect::<Vec<_>>()
                .join(",")
        }
        match self {
            Geometry::Point { x, y, .. } => format!("POINT ({} {})", x, y),
            Geometry::Line { points, .. } => format!("LINESTRING ({})", coords(points)),
            Geometry::Polygon { rings, .. } => {
                let rings = rings
                    .iter()
                    .map(|r| format!("({})", coords(r)))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("POLYGON ({})", rings)
            }
        }
    }
}

/// Whether an SRS name declares latitude-first (inverted) axis order
///
/// URN-style and OGC http URI references carry the authority's axis order,
/// which for geographic EPSG systems is latitude first; the legacy
/// `EPSG:<code>` shorthand is conventionally treated as x/y.
pub fn srs_axis_inverted(srs_name: &str) -> bool {
    srs_name.starts_with("urn:ogc:def:crs:EPSG")
        || srs_name.starts_with("urn:x-ogc:def:crs:EPSG")
        || srs_name.starts_with("http://www.opengis.net/def/crs/EPSG/")
}

/// Authority code of an SRS name, for same-system comparison
pub fn srs_code(srs_name: &str) -> Option<&str> {
    srs_name.rsplit(&[':', '/'][..]).next().filter(|s| !s.is_empty())
}

/// Parse a captured GML sub-tree into a geometry value
///
/// `xml` is the serialized geometry element (e.g. `<gml:Point>...</gml:Point>`).
/// The swap policy is applied against the SRS declared on the geometry, or
/// `default_srs` when the geometry declares none.
pub fn parse_gml(xml: &str, default_srs: Option<&str>, swap: SwapCoordinates) -> Result<Geometry> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| Error::Xml(format!("cannot parse geometry: {}", e)))?;
    let root = doc.root_element();
    if !root.tag_name().namespace().map(is_gml_namespace).unwrap_or(false) {
        return Err(Error::Xml(format!(
            "element '{}' is not a GML geometry",
            root.tag_name().name()
        )));
    }

    let srs = root
        .attribute("srsName")
        .map(|s| s.to_string())
        .or_else(|| default_srs.map(|s| s.to_string()));
    let must_swap = match swap {
        SwapCoordinates::Yes => true,
        SwapCoordinates::No => false,
        SwapCoordinates::Auto => srs.as_deref().map(srs_axis_inverted).unwrap_or(false),
    };

    let geometry = match root.tag_name().name() {
        "Point" => {
            let pos = child_text(&root, "pos")
                .or_else(|| child_text(&root, "coordinates"))
                .ok_or_else(|| Error::Xml("Point without position".to_string()))?;
            let coords = parse_coords(&pos, must_swap)?;
            let (x, y) = *coords
                .first()
                .ok_or_else(|| Error::Xml("empty position".to_string()))?;
            Geometry::Point { x, y, srs }
        }
        "LineString" | "Curve" => {
            let pos = child_text(&root, "posList")
                .or_else(|| child_text(&root, "pos"))
                .or_else(|| child_text(&root, "coordinates"))
                .ok_or_else(|| Error::Xml("LineString without positions".to_string()))?;
            Geometry::Line {
                points: parse_coords(&pos, must_swap)?,
                srs,
            }
        }
        "Polygon" | "Surface" => {
            let mut rings = Vec::new();
            for ring_holder in ["exterior", "interior", "outerBoundaryIs", "innerBoundaryIs"] {
                for holder in root
                    .children()
                    .filter(|n| n.is_element() && n.tag_name().name() == ring_holder)
                {
                    if let Some(pos) = descendant_text(&holder, "posList")
                        .or_else(|| descendant_text(&holder, "coordinates"))
                    {
                        rings.push(parse_coords(&pos, must_swap)?);
                    }
                }
            }
            if rings.is_empty() {
                return Err(Error::Xml("Polygon without rings".to_string()));
            }
            Geometry::Polygon { rings, srs }
        }
        other => {
            return Err(Error::Xml(format!("unsupported geometry '{}'", other)));
        }
    };
    Ok(geometry)
}

fn child_text(node: &roxmltree::Node, name: &str) -> Option<String> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
        .and_then(|n| n.text())
        .map(|t| t.to_string())
}

fn descendant_text(node: &roxmltree::Node, name: &str) -> Option<String> {
    node.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == name)
        .and_then(|n| n.text())
        .map(|t| t.to_string())
}

fn parse_coords(text: &str, swap: bool) -> Result<Vec<(f64, f64)>> {
    // gml:pos/posList use whitespace separation; legacy gml:coordinates uses
    // comma-separated tuples.
    let numbers: Vec<f64> = if text.contains(',') {
        text.split_whitespace()
            .flat_map(|tuple| tuple.split(','))
            .map(|t| t.parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| Error::Xml(format!("invalid coordinates '{}'", text)))?
    } else {
        text.split_whitespace()
            .map(|t| t.parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| Error::Xml(format!("invalid coordinates '{}'", text)))?
    };
    if numbers.len() < 2 || numbers.len() % 2 != 0 {
        return Err(Error::Xml(format!("odd coordinate count in '{}'", text)));
    }
    Ok(numbers
        .chunks(2)
        .map(|pair| {
            if swap {
                (pair[1], pair[0])
            } else {
                (pair[0], pair[1])
            }
        })
        .collect())
}

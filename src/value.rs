//! Typed field values
//!
//! Declared XSD simple types map onto a small set of relational field types;
//! instance text content is parsed into [`Value`]s accordingly. Array-valued
//! fields hold homogeneous lists.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::geometry::Geometry;

/// Declared type of a field, derived from the XSD simple type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// xs:string and every simple type without a closer mapping
    String,
    /// xs:ID (also used for identifier attributes)
    Id,
    /// xs:boolean
    Boolean,
    /// xs:short / xs:byte
    Short,
    /// xs:int / xs:unsignedShort
    Int32,
    /// xs:long / xs:integer / xs:unsignedInt
    Int64,
    /// xs:float
    Float,
    /// xs:double / xs:decimal
    Double,
    /// xs:date
    Date,
    /// xs:time
    Time,
    /// xs:dateTime
    DateTime,
    /// xs:base64Binary
    Base64Binary,
    /// xs:hexBinary
    HexBinary,
    /// xs:anyURI
    AnyUri,
    /// xs:anyType / xs:anySimpleType (stored as raw text/XML)
    AnyType,
    /// Geometry-valued field (not an XML primitive type)
    Geometry,
}

impl FieldType {
    /// Map an XSD built-in type name to a field type
    pub fn from_xsd(local_name: &str) -> FieldType {
        match local_name {
            "string" | "normalizedString" | "token" | "NMTOKEN" | "NCName" | "Name"
            | "language" | "duration" | "gYear" | "gYearMonth" | "gMonth" | "gMonthDay"
            | "gDay" | "QName" => FieldType::String,
            "ID" => FieldType::Id,
            "IDREF" => FieldType::String,
            "boolean" => FieldType::Boolean,
            "short" | "byte" | "unsignedByte" => FieldType::Short,
            "int" | "unsignedShort" => FieldType::Int32,
            "long" | "integer" | "nonNegativeInteger" | "positiveInteger"
            | "nonPositiveInteger" | "negativeInteger" | "unsignedInt" | "unsignedLong" => {
                FieldType::Int64
            }
            "float" => FieldType::Float,
            "double" | "decimal" => FieldType::Double,
            "date" => FieldType::Date,
            "time" => FieldType::Time,
            "dateTime" => FieldType::DateTime,
            "base64Binary" => FieldType::Base64Binary,
            "hexBinary" => FieldType::HexBinary,
            "anyURI" => FieldType::AnyUri,
            "anyType" | "anySimpleType" => FieldType::AnyType,
            _ => FieldType::String,
        }
    }

    /// Whether repeated occurrences of this type can be folded into one
    /// array-valued column
    pub fn is_array_compatible(&self) -> bool {
        matches!(
            self,
            FieldType::String
                | FieldType::Boolean
                | FieldType::Short
                | FieldType::Int32
                | FieldType::Int64
                | FieldType::Float
                | FieldType::Double
                | FieldType::AnyUri
        )
    }

    /// Short lowercase name used in metadata rows
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Id => "id",
            FieldType::Boolean => "boolean",
            FieldType::Short => "short",
            FieldType::Int32 => "int",
            FieldType::Int64 => "long",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::DateTime => "datetime",
            FieldType::Base64Binary => "base64binary",
            FieldType::HexBinary => "hexbinary",
            FieldType::AnyUri => "anyuri",
            FieldType::AnyType => "anytype",
            FieldType::Geometry => "geometry",
        }
    }
}

/// One field value of an assembled feature
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Text value
    String(String),
    /// Boolean value
    Boolean(bool),
    /// Integer value (all integral widths)
    Int(i64),
    /// Floating point value
    Double(f64),
    /// Date value
    Date(NaiveDate),
    /// Time of day value
    Time(NaiveTime),
    /// Date and time value
    DateTime(NaiveDateTime),
    /// Decoded binary content
    Binary(Vec<u8>),
    /// Geometry value
    Geometry(Geometry),
    /// Array of text values
    StringList(Vec<String>),
    /// Array of integer values
    IntList(Vec<i64>),
    /// Array of floating point values
    DoubleList(Vec<f64>),
    /// Array of boolean values
    BooleanList(Vec<bool>),
}

impl Value {
    /// Parse instance text into a value of the declared type
    ///
    /// Returns `Err` with a description when the text does not conform; the
    /// caller decides whether that is a validation error or a fall-back to
    /// raw text.
    pub fn parse(field_type: FieldType, text: &str) -> std::result::Result<Value, String> {
        let text = text.trim();
        match field_type {
            FieldType::String
            | FieldType::Id
            | FieldType::AnyUri
            | FieldType::AnyType
            | FieldType::Geometry => Ok(Value::String(text.to_string())),
            FieldType::Boolean => match text {
                "true" | "1" => Ok(Value::Boolean(true)),
                "false" | "0" => Ok(Value::Boolean(false)),
                _ => Err(format!("'{}' is not a valid boolean", text)),
            },
            FieldType::Short | FieldType::Int32 | FieldType::Int64 => text
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| format!("'{}' is not a valid integer", text)),
            FieldType::Float | FieldType::Double => text
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| format!("'{}' is not a valid number", text)),
            FieldType::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| format!("'{}' is not a valid date", text)),
            FieldType::Time => NaiveTime::parse_from_str(text, "%H:%M:%S")
                .map(Value::Time)
                .map_err(|_| format!("'{}' is not a valid time", text)),
            FieldType::DateTime => {
                NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
                    .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
                    .map(Value::DateTime)
                    .map_err(|_| format!("'{}' is not a valid dateTime", text))
            }
            FieldType::Base64Binary => BASE64
                .decode(text.as_bytes())
                .map(Value::Binary)
                .map_err(|_| format!("'{}' is not valid base64", text)),
            FieldType::HexBinary => decode_hex(text)
                .map(Value::Binary)
                .ok_or_else(|| format!("'{}' is not valid hex", text)),
        }
    }

    /// The value as text, when it is textual
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Append a parsed scalar to an array value of the matching kind
    pub fn push_to_list(list: &mut Value, item: Value) {
        match (list, item) {
            (Value::StringList(l), Value::String(s)) => l.push(s),
            (Value::IntList(l), Value::Int(i)) => l.push(i),
            (Value::DoubleList(l), Value::Double(d)) => l.push(d),
            (Value::BooleanList(l), Value::Boolean(b)) => l.push(b),
            // Mixed content degrades to its text form
            (Value::StringList(l), other) => l.push(render_scalar(&other)),
            _ => {}
        }
    }

    /// Create an empty list value for an array field of the given type
    pub fn empty_list(field_type: FieldType) -> Value {
        match field_type {
            FieldType::Short | FieldType::Int32 | FieldType::Int64 => Value::IntList(Vec::new()),
            FieldType::Float | FieldType::Double => Value::DoubleList(Vec::new()),
            FieldType::Boolean => Value::BooleanList(Vec::new()),
            _ => Value::StringList(Vec::new()),
        }
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Boolean(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Double(d) => d.to_string(),
        other => format!("{:?}", other),
    }
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}

//! Limits and constraints for document processing
//!
//! This module defines limits to prevent resource exhaustion while streaming
//! instance documents or walking schema graphs (deeply nested documents,
//! runaway text content, unbounded include chains).

use crate::error::{Error, Result};

/// Global limits configuration
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum XML element nesting depth in instance documents
    pub max_xml_depth: usize,

    /// Maximum accumulated size of a single field's text content in bytes
    pub max_content_size: usize,

    /// Maximum schema depth (includes/imports)
    pub max_schema_depth: usize,

    /// Maximum number of derived classes in one schema graph
    pub max_classes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_xml_depth: 1000,
            max_content_size: 10 * 1024 * 1024, // 10 MB
            max_schema_depth: 100,
            max_classes: 100000,
        }
    }
}

impl Limits {
    /// Create a new Limits with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create strict limits (more restrictive)
    pub fn strict() -> Self {
        Self {
            max_xml_depth: 100,
            max_content_size: 1024 * 1024, // 1 MB
            max_schema_depth: 20,
            max_classes: 10000,
        }
    }

    /// Check if XML depth is within limits
    pub fn check_xml_depth(&self, depth: usize) -> Result<()> {
        if depth > self.max_xml_depth {
            Err(Error::LimitExceeded(format!(
                "XML depth {} exceeds maximum {}",
                depth, self.max_xml_depth
            )))
        } else {
            Ok(())
        }
    }

    /// Check if accumulated content size is within limits
    pub fn check_content_size(&self, size: usize) -> Result<()> {
        if size > self.max_content_size {
            Err(Error::LimitExceeded(format!(
                "content size {} bytes exceeds maximum {} bytes",
                size, self.max_content_size
            )))
        } else {
            Ok(())
        }
    }

    /// Check if schema depth is within limits
    pub fn check_schema_depth(&self, depth: usize) -> Result<()> {
        if depth > self.max_schema_depth {
            Err(Error::LimitExceeded(format!(
                "schema depth {} exceeds maximum {}",
                depth, self.max_schema_depth
            )))
        } else {
            Ok(())
        }
    }

    /// Check if the number of derived classes is within limits
    pub fn check_classes(&self, count: usize) -> Result<()> {
        if count > self.max_classes {
            Err(Error::LimitExceeded(format!(
                "class count {} exceeds maximum {}",
                count, self.max_classes
            )))
        } else {
            Ok(())
        }
    }
}

//! Results returned by the remote analysis.
//!
//! Field names follow the analysis service's JSON wire shape (`lineItems`,
//! `returnReasons`, `box`, `localizedLabels`), so a result can be loaded
//! straight from a response body or a recorded file.

use crate::invoice::ReturnReason;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Location of an extracted value on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub page: u32,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// An alternative value the analysis considered for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub entity: String,
    pub value: String,
    #[serde(rename = "box", default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

/// One named field produced by the analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    /// Field name. Filled from the map key when loaded from a result.
    #[serde(default)]
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub entity: String,
    #[serde(rename = "box", default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Candidate>,
}

impl Extraction {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            entity: String::new(),
            bbox: None,
            candidates: Vec::new(),
        }
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = entity.into();
        self
    }
}

/// Everything the analysis returned for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    /// Named fields, keyed by name.
    #[serde(default)]
    pub extractions: BTreeMap<String, Extraction>,

    /// Raw line items; each inner list is the extractions of one item.
    /// Present only for documents with line items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_items: Option<Vec<Vec<Extraction>>>,

    /// Reasons a user may give for returning a line item.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub return_reasons: Vec<ReturnReason>,
}

impl ExtractionResult {
    /// Build a result from a list of extractions, keyed by their names.
    pub fn from_extractions(extractions: impl IntoIterator<Item = Extraction>) -> Self {
        Self {
            extractions: extractions
                .into_iter()
                .map(|e| (e.name.clone(), e))
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_line_items(mut self, line_items: Vec<Vec<Extraction>>) -> Self {
        self.line_items = Some(line_items);
        self
    }

    pub fn with_return_reasons(mut self, reasons: Vec<ReturnReason>) -> Self {
        self.return_reasons = reasons;
        self
    }

    /// Parse a result from the service's JSON representation.
    ///
    /// Map keys become extraction names when the body leaves `name` out.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut result: Self = serde_json::from_str(json)?;
        for (key, extraction) in result.extractions.iter_mut() {
            if extraction.name.is_empty() {
                extraction.name = key.clone();
            }
        }
        Ok(result)
    }

    pub fn has_line_items(&self) -> bool {
        self.line_items.is_some()
    }

    /// True when the analysis found nothing at all.
    pub fn is_empty(&self) -> bool {
        self.extractions.is_empty()
            && self.line_items.as_ref().is_none_or(|items| items.is_empty())
    }

    pub fn get(&self, name: &str) -> Option<&Extraction> {
        self.extractions.get(name)
    }
}

//! One purchasable entry on a digital invoice.

use crate::error::{LineItemError, PriceError};
use crate::extraction::Extraction;
use crate::invoice::Price;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const NAME_KEY: &str = "description";
const QUANTITY_KEY: &str = "quantity";
const PRICE_KEY: &str = "baseGross";
const RETURN_REASON_KEY: &str = "returnReason";

/// Fallback language for return-reason labels.
const FALLBACK_LANGUAGE: &str = "de";

/// A reason a user may give for not paying for a line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnReason {
    pub id: String,
    #[serde(default)]
    pub localized_labels: BTreeMap<String, String>,
}

impl ReturnReason {
    /// Label in `language`, else German, else empty.
    pub fn label(&self, language: &str) -> &str {
        self.localized_labels
            .get(language)
            .or_else(|| self.localized_labels.get(FALLBACK_LANGUAGE))
            .map(String::as_str)
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SelectedState {
    Selected,
    Deselected { reason: Option<ReturnReason> },
}

impl SelectedState {
    pub fn is_selected(&self) -> bool {
        matches!(self, SelectedState::Selected)
    }
}

/// A line item built from its raw extractions.
///
/// The raw extractions are kept so the item can be written back in the
/// service's format with the user's edits applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub name: Option<String>,
    pub quantity: u32,
    pub price: Price,
    pub selected_state: SelectedState,
    #[serde(skip)]
    raw: Vec<Extraction>,
}

impl LineItem {
    pub fn new(name: Option<String>, quantity: u32, price: Price) -> Self {
        Self {
            name,
            quantity,
            price,
            selected_state: SelectedState::Selected,
            raw: Vec::new(),
        }
    }

    /// Build an item from the extractions of one `lineItems` entry.
    ///
    /// Missing fields are checked before parsing: an item lacking a price
    /// and carrying a bad quantity reports the missing price.
    pub fn from_extractions(
        extractions: &[Extraction],
        default_currency: &str,
    ) -> Result<Self, LineItemError> {
        let find = |key: &str| {
            extractions
                .iter()
                .find(|e| e.name == key)
                .map(|e| e.value.as_str())
        };
        let name = find(NAME_KEY).ok_or(LineItemError::NameMissing)?;
        let quantity = find(QUANTITY_KEY).ok_or(LineItemError::QuantityMissing)?;
        let price = find(PRICE_KEY).ok_or(LineItemError::PriceMissing)?;

        let quantity: u32 = quantity
            .trim()
            .parse()
            .map_err(|_| LineItemError::CannotParseQuantity(quantity.to_string()))?;
        let price = Price::parse(price, default_currency)
            .map_err(|_| LineItemError::CannotParsePrice(price.to_string()))?;

        Ok(Self {
            name: Some(name.to_string()),
            quantity,
            price,
            selected_state: SelectedState::Selected,
            raw: extractions.to_vec(),
        })
    }

    /// `price × quantity`, regardless of selection.
    pub fn total_price(&self) -> Result<Price, PriceError> {
        self.price.checked_mul(self.quantity)
    }

    pub fn is_selected(&self) -> bool {
        self.selected_state.is_selected()
    }

    pub fn select(&mut self) {
        self.selected_state = SelectedState::Selected;
    }

    pub fn deselect(&mut self, reason: Option<ReturnReason>) {
        self.selected_state = SelectedState::Deselected { reason };
    }

    /// Take over the raw extractions of the item this one replaces.
    pub(crate) fn inherit_raw(&mut self, from: &LineItem) {
        if self.raw.is_empty() {
            self.raw = from.raw.clone();
        }
    }

    /// The raw extractions with the current values written back.
    ///
    /// A deselected item always reports quantity `"0"` whatever its stored
    /// quantity, and carries a `returnReason` extraction when a reason was
    /// chosen.
    pub fn extractions(&self) -> Vec<Extraction> {
        let mut out: Vec<Extraction> = self
            .raw
            .iter()
            .cloned()
            .map(|mut e| {
                match e.name.as_str() {
                    NAME_KEY => e.value = self.name.clone().unwrap_or_default(),
                    QUANTITY_KEY => {
                        e.value = match self.selected_state {
                            SelectedState::Selected => self.quantity.to_string(),
                            SelectedState::Deselected { .. } => "0".to_string(),
                        }
                    }
                    PRICE_KEY => e.value = self.price.extraction_string(),
                    _ => {}
                }
                e
            })
            .collect();

        if let SelectedState::Deselected {
            reason: Some(reason),
        } = &self.selected_state
        {
            out.push(Extraction::new(RETURN_REASON_KEY, reason.id.clone()));
        }
        out
    }
}

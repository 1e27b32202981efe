//! Digital invoices built from line-item extractions.
//!
//! A [`DigitalInvoice`] exists only for results that carry `lineItems`.
//! Construction is all or nothing: one malformed item fails the whole
//! invoice, and the caller falls back to showing plain extractions.

mod line_item;
mod price;

pub use line_item::{LineItem, ReturnReason, SelectedState};
pub use price::Price;

use crate::error::{LineItemError, PriceError, SessionError};
use crate::extraction::{Extraction, ExtractionResult};
use serde::Serialize;

/// Extraction names that carry invoice-level surcharges or discounts.
pub const ADDON_NAMES: [&str; 5] = [
    "discount-addon",
    "giftcard-addon",
    "other-discounts-addon",
    "other-charges-addon",
    "shipment-addon",
];

const AMOUNT_TO_PAY_KEY: &str = "amountToPay";

/// An invoice-level amount that is not a line item, e.g. shipping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Addon {
    pub name: String,
    pub price: Price,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigitalInvoice {
    line_items: Vec<LineItem>,
    addons: Vec<Addon>,
    return_reasons: Vec<ReturnReason>,
    #[serde(skip)]
    source: ExtractionResult,
}

impl DigitalInvoice {
    pub fn new(result: &ExtractionResult, default_currency: &str) -> Result<Self, LineItemError> {
        let raw_items = result
            .line_items
            .as_ref()
            .ok_or(LineItemError::LineItemsMissing)?;
        let line_items = raw_items
            .iter()
            .map(|raw| LineItem::from_extractions(raw, default_currency))
            .collect::<Result<Vec<_>, _>>()?;

        let addons = ADDON_NAMES
            .iter()
            .filter_map(|name| {
                let extraction = result.get(name)?;
                let price = Price::parse(&extraction.value, default_currency).ok()?;
                Some(Addon {
                    name: (*name).to_string(),
                    price,
                })
            })
            .collect();

        Ok(Self {
            line_items,
            addons,
            return_reasons: result.return_reasons.clone(),
            source: result.clone(),
        })
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn addons(&self) -> &[Addon] {
        &self.addons
    }

    pub fn return_reasons(&self) -> &[ReturnReason] {
        &self.return_reasons
    }

    /// Sum of selected items plus addons; `None` for an invoice without
    /// line items.
    pub fn total(&self) -> Result<Option<Price>, PriceError> {
        let Some(first) = self.line_items.first() else {
            return Ok(None);
        };
        let mut total = Price::zero(first.price.currency_code.clone());
        for item in self.line_items.iter().filter(|i| i.is_selected()) {
            total = total.checked_add(&item.total_price()?)?;
        }
        for addon in &self.addons {
            total = total.checked_add(&addon.price)?;
        }
        Ok(Some(total))
    }

    /// Sum of the quantities of selected items.
    pub fn num_selected(&self) -> u32 {
        self.line_items
            .iter()
            .filter(|i| i.is_selected())
            .fold(0u32, |n, i| n.saturating_add(i.quantity))
    }

    /// Sum of all quantities.
    pub fn num_total(&self) -> u32 {
        self.line_items
            .iter()
            .fold(0u32, |n, i| n.saturating_add(i.quantity))
    }

    pub fn select(&mut self, index: usize) -> Result<(), SessionError> {
        self.item_mut(index)?.select();
        Ok(())
    }

    pub fn deselect(
        &mut self,
        index: usize,
        reason: Option<ReturnReason>,
    ) -> Result<(), SessionError> {
        self.item_mut(index)?.deselect(reason);
        Ok(())
    }

    /// Store an edited version of the item at `index`.
    pub fn replace(&mut self, index: usize, mut item: LineItem) -> Result<(), SessionError> {
        let slot = self.item_mut(index)?;
        item.inherit_raw(slot);
        *slot = item;
        Ok(())
    }

    /// The original result with line items re-serialised from the current
    /// state and `amountToPay` set to the current total.
    pub fn extraction_result(&self) -> Result<ExtractionResult, PriceError> {
        let mut result = self.source.clone();
        result.line_items = Some(self.line_items.iter().map(LineItem::extractions).collect());
        if let Some(total) = self.total()? {
            let entity = result
                .get(AMOUNT_TO_PAY_KEY)
                .map(|e| e.entity.clone())
                .unwrap_or_else(|| "amount".to_string());
            result.extractions.insert(
                AMOUNT_TO_PAY_KEY.to_string(),
                Extraction::new(AMOUNT_TO_PAY_KEY, total.extraction_string()).with_entity(entity),
            );
        }
        Ok(result)
    }

    fn item_mut(&mut self, index: usize) -> Result<&mut LineItem, SessionError> {
        let len = self.line_items.len();
        self.line_items
            .get_mut(index)
            .ok_or(SessionError::LineItemOutOfRange { index, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, quantity: &str, price: &str) -> Vec<Extraction> {
        vec![
            Extraction::new("description", name),
            Extraction::new("quantity", quantity),
            Extraction::new("baseGross", price),
        ]
    }

    fn result() -> ExtractionResult {
        ExtractionResult::from_extractions([
            Extraction::new("iban", "DE89370400440532013000"),
            Extraction::new("shipment-addon", "4.95:EUR"),
        ])
        .with_line_items(vec![
            item("Widget", "3", "9.99:EUR"),
            item("Gadget", "1", "20.00:EUR"),
        ])
    }

    #[test]
    fn totals_follow_selection() {
        let mut invoice = DigitalInvoice::new(&result(), "EUR").unwrap();
        assert_eq!(invoice.addons().len(), 1);
        assert_eq!(invoice.total().unwrap().unwrap().extraction_string(), "54.92:EUR");
        assert_eq!(invoice.num_selected(), 4);

        invoice.deselect(1, None).unwrap();
        assert_eq!(invoice.total().unwrap().unwrap().extraction_string(), "34.92:EUR");
        assert_eq!(invoice.num_selected(), 3);
        assert_eq!(invoice.num_total(), 4);
    }

    #[test]
    fn huge_amounts_fail_to_total_instead_of_panicking() {
        let huge = ExtractionResult::default().with_line_items(vec![
            item("Widget", "2", "79228162514264337593543950335"),
            item("Gadget", "4294967295", "1"),
            item("Gizmo", "4294967295", "1"),
        ]);
        let mut invoice = DigitalInvoice::new(&huge, "EUR").unwrap();
        assert_eq!(invoice.total(), Err(PriceError::Overflow));
        assert!(invoice.extraction_result().is_err());
        assert_eq!(invoice.num_total(), u32::MAX);

        invoice.deselect(0, None).unwrap();
        assert_eq!(
            invoice.total().unwrap().unwrap().extraction_string(),
            "8589934590.00:EUR"
        );
    }

    #[test]
    fn one_bad_item_fails_the_invoice() {
        let bad = ExtractionResult::default().with_line_items(vec![
            item("Widget", "3", "9.99"),
            vec![Extraction::new("description", "Broken")],
        ]);
        assert_eq!(
            DigitalInvoice::new(&bad, "EUR"),
            Err(LineItemError::QuantityMissing)
        );
        assert_eq!(
            DigitalInvoice::new(&ExtractionResult::default(), "EUR"),
            Err(LineItemError::LineItemsMissing)
        );
    }

    #[test]
    fn extraction_result_reflects_edits() {
        let mut invoice = DigitalInvoice::new(&result(), "EUR").unwrap();
        invoice.deselect(0, None).unwrap();
        let edited = LineItem::new(
            Some("Gadget XL".into()),
            2,
            Price::parse("20.00", "EUR").unwrap(),
        );
        invoice.replace(1, edited).unwrap();

        let out = invoice.extraction_result().unwrap();
        let items = out.line_items.as_ref().unwrap();
        assert_eq!(items[0][1].value, "0");
        assert_eq!(items[1][0].value, "Gadget XL");
        assert_eq!(items[1][1].value, "2");
        assert_eq!(out.get("amountToPay").unwrap().value, "44.95:EUR");
        assert!(out.get("iban").is_some());
    }

    #[test]
    fn out_of_range_index() {
        let mut invoice = DigitalInvoice::new(&result(), "EUR").unwrap();
        assert!(matches!(
            invoice.select(7),
            Err(SessionError::LineItemOutOfRange { index: 7, len: 2 })
        ));
    }
}

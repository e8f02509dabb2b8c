use crate::schema::{EnrichedLine, RawDate};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Result columns appended to every exported row, in display order.
pub const RESULT_COLUMNS: [&str; 12] = [
    "expected_price",
    "match_status",
    "matched_period",
    "quantity_split",
    "calculated_amount",
    "diff",
    "diff_percent",
    "confidence",
    "item_label",
    "promotion",
    "resolution",
    "calculation_trace",
];

impl EnrichedLine {
    /// Flattens the original row and its enrichment into one record suitable
    /// for a table renderer or spreadsheet writer.
    pub fn to_record(&self) -> BTreeMap<String, Value> {
        let mut record: BTreeMap<String, Value> = self.line.extra.clone();

        record.insert("item_code".to_string(), json!(self.line.item_code));
        record.insert(
            "invoice_date".to_string(),
            match &self.line.invoice_date {
                RawDate::Serial(serial) => json!(serial),
                RawDate::Text(text) => json!(text),
            },
        );
        record.insert("quantity".to_string(), json!(self.line.quantity));
        record.insert("total_amount".to_string(), json!(self.line.total_amount));
        if let Some(context) = &self.line.context {
            record.insert("location".to_string(), json!(context.location));
            record.insert("employee".to_string(), json!(context.employee));
        }

        let primary = self.matched_periods.first();
        let promotions: Vec<&str> = self
            .allocation
            .iter()
            .flat_map(|a| a.entries.iter())
            .filter(|e| e.is_promotion)
            .map(|e| e.tier_label.as_str())
            .collect();

        let values: [Value; 12] = [
            json!(self.expected_unit_price),
            json!(self.status.as_str()),
            json!(self
                .matched_periods
                .iter()
                .map(|p| p.describe())
                .collect::<Vec<_>>()
                .join("; ")),
            json!(self.allocation.as_ref().map(|a| a.describe())),
            json!(self.calculated_amount.map(round_cents)),
            json!(self.diff.map(round_cents)),
            json!(self.diff_percent.map(round_cents)),
            json!(self.confidence.map(round_cents)),
            json!(primary.map(|p| p.label.clone())),
            json!(if promotions.is_empty() {
                None
            } else {
                Some(promotions.join(", "))
            }),
            json!(self.resolution),
            json!(self.trace_text()),
        ];

        for (column, value) in RESULT_COLUMNS.iter().zip(values) {
            record.insert(column.to_string(), value);
        }

        record
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use crate::config::ReconciliationConfig;
    use crate::engine::Reconciler;
    use crate::export::RESULT_COLUMNS;
    use crate::index::PriceIndex;
    use crate::schema::{InvoiceLine, PriceTier};
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_record_keeps_original_fields_and_adds_results() {
        let index = PriceIndex::build(&[
            PriceTier {
                item_code: "SK-1".to_string(),
                start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                end_date: None,
                price_excl_tax: 100.0,
                price_incl_tax: 107.0,
                price_invoice_basis: 100.0,
                label: None,
            },
            PriceTier {
                item_code: "SK-1".to_string(),
                start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                end_date: None,
                price_excl_tax: 50.0,
                price_incl_tax: 53.5,
                price_invoice_basis: 50.0,
                label: Some("Promo".to_string()),
            },
        ]);
        let config = ReconciliationConfig::default();
        let mut line = InvoiceLine::new("SK-1", "06-JAN-0026", 4.0, 300.0);
        line.extra.insert("invoice_no".to_string(), json!("INV-7"));

        let enriched = Reconciler::new(&index, &config).enrich(&line).unwrap();
        let record = enriched.to_record();

        assert_eq!(record["invoice_no"], json!("INV-7"));
        assert_eq!(record["item_code"], json!("SK-1"));
        for column in RESULT_COLUMNS {
            assert!(record.contains_key(column), "missing column {}", column);
        }
        assert_eq!(record["match_status"], json!("matched"));
        assert_eq!(record["expected_price"], json!(100.0));
        assert_eq!(
            record["quantity_split"],
            json!("2 x Standard @ 100.00 + 2 x Promo @ 50.00")
        );
        assert_eq!(record["promotion"], json!("Promo"));
        assert_eq!(record["item_label"], json!("Standard"));
        assert_eq!(record["resolution"], json!(null));
    }

    #[test]
    fn test_promotion_named_standard_is_still_a_promotion() {
        let index = PriceIndex::build(&[
            PriceTier {
                item_code: "SK-1".to_string(),
                start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                end_date: None,
                price_excl_tax: 100.0,
                price_incl_tax: 107.0,
                price_invoice_basis: 100.0,
                label: None,
            },
            PriceTier {
                item_code: "SK-1".to_string(),
                start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                end_date: None,
                price_excl_tax: 50.0,
                price_incl_tax: 53.5,
                price_invoice_basis: 50.0,
                label: Some("Standard".to_string()),
            },
        ]);
        let config = ReconciliationConfig::default();
        let line = InvoiceLine::new("SK-1", "06-JAN-0026", 4.0, 300.0);

        let enriched = Reconciler::new(&index, &config).enrich(&line).unwrap();
        let record = enriched.to_record();

        assert_eq!(record["promotion"], json!("Standard"));
        assert!(!enriched.matched_periods[0].is_promotion);
        assert!(enriched.matched_periods[1].is_promotion);
    }
}

use crate::dates::normalize;
use crate::schema::{InvoiceLine, LineContext, PriceTier, RawDate};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A loosely typed tabular row as delivered by a document store or sheet.
pub type RawRow = BTreeMap<String, Value>;

/// Field names owned by `InvoiceLine` itself; source columns with these
/// names are consumed rather than passed through.
const INVOICE_LINE_FIELDS: [&str; 5] = [
    "item_code",
    "invoice_date",
    "quantity",
    "total_amount",
    "context",
];

/// Candidate column names per invoice field, in precedence order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceFieldMapping {
    pub item_code: Vec<String>,
    pub date: Vec<String>,
    pub quantity: Vec<String>,
    pub amount: Vec<String>,
    pub location: Vec<String>,
    pub employee: Vec<String>,
}

impl Default for InvoiceFieldMapping {
    fn default() -> Self {
        Self {
            item_code: names(&["item_code", "itemCode", "sku", "product_code"]),
            date: names(&["invoice_date", "invoiceDate", "date"]),
            quantity: names(&["quantity", "qty", "count"]),
            amount: names(&["total_amount", "totalAmount", "amount", "total"]),
            location: names(&["location", "branch", "store"]),
            employee: names(&["employee", "staff"]),
        }
    }
}

/// Candidate column names per price-list field, in precedence order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceFieldMapping {
    pub item_code: Vec<String>,
    pub start_date: Vec<String>,
    pub end_date: Vec<String>,
    pub price_excl_tax: Vec<String>,
    pub price_incl_tax: Vec<String>,
    pub price_invoice_basis: Vec<String>,
    pub label: Vec<String>,
}

impl Default for PriceFieldMapping {
    fn default() -> Self {
        Self {
            item_code: names(&["item_code", "itemCode", "sku", "product_code"]),
            start_date: names(&["start_date", "startDate", "valid_from"]),
            end_date: names(&["end_date", "endDate", "valid_to"]),
            price_excl_tax: names(&["price_excl_tax", "priceExclTax", "price"]),
            price_incl_tax: names(&["price_incl_tax", "priceInclTax"]),
            price_invoice_basis: names(&[
                "price_invoice_basis",
                "priceInvoiceBasis",
                "invoice_price",
            ]),
            label: names(&["label", "promotion", "remark"]),
        }
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// The one precedence rule for multi-name columns: the first candidate whose
/// value is present, non-null and not blank wins.
pub fn first_present<'a>(row: &'a RawRow, candidates: &[String]) -> Option<&'a Value> {
    candidates.iter().find_map(|name| match row.get(name) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(value) => Some(value),
    })
}

/// Lenient numeric parse: thousand separators are stripped and accounting
/// parentheses read as negative. Non-numeric input yields `None`.
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, ',' | '_') && !c.is_whitespace())
                .collect();
            let (negative, digits) = match cleaned
                .strip_prefix('(')
                .and_then(|rest| rest.strip_suffix(')'))
            {
                Some(inner) => (true, inner),
                None => (false, cleaned.as_str()),
            };
            let parsed: f64 = digits.parse().ok()?;
            if !parsed.is_finite() {
                return None;
            }
            Some(if negative { -parsed } else { parsed })
        }
        _ => None,
    }
}

pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn value_to_raw_date(value: Option<&Value>) -> RawDate {
    match value {
        Some(Value::Number(n)) => n
            .as_f64()
            .map(RawDate::Serial)
            .unwrap_or_else(|| RawDate::Text(n.to_string())),
        Some(Value::String(s)) => RawDate::Text(s.clone()),
        _ => RawDate::Text(String::new()),
    }
}

/// Converts loose rows into invoice lines. Never fails: unreadable numbers
/// become zero and unreadable dates stay raw for the enricher to flag.
pub fn invoice_lines_from_rows(rows: &[RawRow], mapping: &InvoiceFieldMapping) -> Vec<InvoiceLine> {
    rows.iter().map(|row| invoice_line_from_row(row, mapping)).collect()
}

pub fn invoice_line_from_row(row: &RawRow, mapping: &InvoiceFieldMapping) -> InvoiceLine {
    let item_code = first_present(row, &mapping.item_code)
        .and_then(value_to_text)
        .unwrap_or_default();
    let quantity = first_present(row, &mapping.quantity)
        .and_then(parse_number)
        .unwrap_or(0.0);
    let total_amount = first_present(row, &mapping.amount)
        .and_then(parse_number)
        .unwrap_or(0.0);

    let location = first_present(row, &mapping.location).and_then(value_to_text);
    let employee = first_present(row, &mapping.employee).and_then(value_to_text);
    let context = if location.is_some() || employee.is_some() {
        Some(LineContext { location, employee })
    } else {
        None
    };

    let extra = row
        .iter()
        .filter(|(key, _)| !INVOICE_LINE_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    InvoiceLine {
        item_code,
        invoice_date: value_to_raw_date(first_present(row, &mapping.date)),
        quantity,
        total_amount,
        context,
        extra,
    }
}

/// Converts loose price-list rows into tiers, dropping rows that cannot be
/// placed in time or carry no positive price.
pub fn price_tiers_from_rows(rows: &[RawRow], mapping: &PriceFieldMapping) -> Vec<PriceTier> {
    let mut tiers = Vec::with_capacity(rows.len());

    for (row_no, row) in rows.iter().enumerate() {
        let Some(item_code) = first_present(row, &mapping.item_code).and_then(value_to_text) else {
            warn!("Price row {}: missing item code, skipped", row_no);
            continue;
        };

        let start_raw = value_to_raw_date(first_present(row, &mapping.start_date));
        let Some(start_date) = normalize(&start_raw) else {
            warn!(
                "Price row {} ('{}'): unparseable start date, skipped",
                row_no, item_code
            );
            continue;
        };

        let end_date = first_present(row, &mapping.end_date)
            .and_then(|v| normalize(&value_to_raw_date(Some(v))));

        let price_excl_tax = first_present(row, &mapping.price_excl_tax)
            .and_then(parse_number)
            .unwrap_or(0.0);
        if price_excl_tax <= 0.0 {
            warn!(
                "Price row {} ('{}'): non-positive price {}, skipped",
                row_no, item_code, price_excl_tax
            );
            continue;
        }

        let price_incl_tax = first_present(row, &mapping.price_incl_tax)
            .and_then(parse_number)
            .unwrap_or(price_excl_tax);
        let price_invoice_basis = first_present(row, &mapping.price_invoice_basis)
            .and_then(parse_number)
            .unwrap_or(0.0);
        let label = first_present(row, &mapping.label).and_then(value_to_text);

        tiers.push(PriceTier {
            item_code,
            start_date,
            end_date,
            price_excl_tax,
            price_incl_tax,
            price_invoice_basis,
            label,
        });
    }

    tiers
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn row(value: Value) -> RawRow {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_first_present_precedence() {
        let r = row(json!({"qty": "", "count": 4, "quantity": null}));
        let mapping = InvoiceFieldMapping::default();
        assert_eq!(first_present(&r, &mapping.quantity), Some(&json!(4)));

        let r = row(json!({"quantity": 2, "qty": 9}));
        assert_eq!(first_present(&r, &mapping.quantity), Some(&json!(2)));

        let r = row(json!({"other": 1}));
        assert_eq!(first_present(&r, &mapping.quantity), None);
    }

    #[test]
    fn test_parse_number_is_lenient() {
        assert_eq!(parse_number(&json!(12.5)), Some(12.5));
        assert_eq!(parse_number(&json!("1,234.50")), Some(1234.5));
        assert_eq!(parse_number(&json!(" 300 ")), Some(300.0));
        assert_eq!(parse_number(&json!("(200)")), Some(-200.0));
        assert_eq!(parse_number(&json!("n/a")), None);
        assert_eq!(parse_number(&json!(true)), None);
    }

    #[test]
    fn test_invoice_rows_soft_fail_and_pass_through() {
        let rows = vec![
            row(json!({
                "sku": "SK-1",
                "date": "06-JAN-0026",
                "qty": "3",
                "amount": "300.00",
                "invoice_no": "INV-9",
                "branch": "North"
            })),
            row(json!({
                "sku": "SK-2",
                "date": 46028,
                "qty": "three",
                "amount": "abc"
            })),
        ];
        let lines = invoice_lines_from_rows(&rows, &InvoiceFieldMapping::default());

        assert_eq!(lines[0].item_code, "SK-1");
        assert_eq!(lines[0].quantity, 3.0);
        assert_eq!(lines[0].total_amount, 300.0);
        assert_eq!(lines[0].extra.get("invoice_no"), Some(&json!("INV-9")));
        assert_eq!(
            lines[0].context.as_ref().and_then(|c| c.location.clone()),
            Some("North".to_string())
        );

        assert_eq!(lines[1].invoice_date, RawDate::Serial(46028.0));
        assert_eq!(lines[1].quantity, 0.0);
        assert_eq!(lines[1].total_amount, 0.0);
        assert!(lines[1].context.is_none());
    }

    #[test]
    fn test_canonical_columns_are_not_duplicated_in_extra() {
        let rows = vec![row(json!({
            "item_code": "SK-1",
            "invoice_date": "1/6/2026",
            "quantity": 2,
            "total_amount": 200
        }))];
        let lines = invoice_lines_from_rows(&rows, &InvoiceFieldMapping::default());
        assert!(lines[0].extra.is_empty());
        let json = serde_json::to_value(&lines[0]).unwrap();
        assert_eq!(json["quantity"], json!(2.0));
    }

    #[test]
    fn test_price_rows() {
        let rows = vec![
            row(json!({
                "item_code": "SK-1",
                "start_date": "01-JAN-0026",
                "price": "100",
                "price_incl_tax": 107,
                "promotion": "  "
            })),
            row(json!({
                "item_code": "SK-1",
                "start_date": "1/15/2026",
                "end_date": "1/31/2026",
                "price": 80,
                "promotion": "Member Week"
            })),
            row(json!({"item_code": "SK-2", "start_date": "someday", "price": 10})),
            row(json!({"item_code": "SK-3", "start_date": "1/1/2026", "price": 0})),
            row(json!({"start_date": "1/1/2026", "price": 5})),
        ];
        let tiers = price_tiers_from_rows(&rows, &PriceFieldMapping::default());

        assert_eq!(tiers.len(), 2);
        assert_eq!(tiers[0].start_date, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        assert_eq!(tiers[0].end_date, None);
        assert_eq!(tiers[0].price_incl_tax, 107.0);
        assert_eq!(tiers[0].label, None);
        assert_eq!(tiers[1].end_date, NaiveDate::from_ymd_opt(2026, 1, 31));
        assert_eq!(tiers[1].price_incl_tax, 80.0);
        assert_eq!(tiers[1].label.as_deref(), Some("Member Week"));
    }
}

use price_reconciler::{
    apply_bulk_decisions, invoice_lines_from_rows, price_tiers_from_rows, reconcile, BulkAction,
    BulkDecision, InvoiceFieldMapping, PriceFieldMapping, RawRow, ReconciliationConfig,
    SuggestedAction,
};
use serde_json::json;

fn rows(values: Vec<serde_json::Value>) -> anyhow::Result<Vec<RawRow>> {
    values
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(anyhow::Error::from))
        .collect()
}

fn main() -> anyhow::Result<()> {
    let price_rows = rows(vec![
        json!({"item_code": "COF-250", "start_date": "01-JAN-0026", "price": 100, "price_incl_tax": 107}),
        json!({"item_code": "COF-250", "start_date": "01-JAN-0026", "end_date": "31-JAN-0026", "price": 50, "promotion": "January Promo"}),
        json!({"item_code": "TEA-100", "start_date": "1/1/2026", "price": "20.00"}),
        json!({"item_code": "MUG-01", "start_date": "1/1/2026", "price": "80"}),
    ])?;

    let invoice_rows = rows(vec![
        json!({"invoice_no": "INV-1001", "sku": "COF-250", "date": "06-JAN-0026", "qty": 4, "amount": "300.00", "branch": "North"}),
        json!({"invoice_no": "INV-1002", "sku": "COF-250", "date": 46030, "qty": 1, "amount": 100}),
        json!({"invoice_no": "INV-1003", "sku": "TEA-100", "date": "1/9/2026", "qty": 10, "amount": "180.00"}),
        json!({"invoice_no": "INV-1004", "sku": "TEA-100", "date": "1/12/2026", "qty": 5, "amount": "90.00"}),
        json!({"invoice_no": "INV-1005", "sku": "TEA-100", "date": "1/20/2026", "qty": 20, "amount": "360.00"}),
        json!({"invoice_no": "INV-1006", "sku": "MUG-01", "date": "1/21/2026", "qty": -2, "amount": "(160.00)"}),
        json!({"invoice_no": "INV-1007", "sku": "LID-07", "date": "1/22/2026", "qty": 3, "amount": 45}),
        json!({"invoice_no": "INV-1008", "sku": "COF-250", "date": "sometime", "qty": 2, "amount": 200}),
    ])?;

    let tiers = price_tiers_from_rows(&price_rows, &PriceFieldMapping::default());
    let lines = invoice_lines_from_rows(&invoice_rows, &InvoiceFieldMapping::default());
    let config = ReconciliationConfig::default();

    let report = reconcile(&tiers, &lines, &config)?;

    println!("Reconciled {} line(s)", report.summary.total_lines);
    for line in &report.lines {
        let record = line.to_record();
        println!(
            "  {:<9} {:<8} {:<17} confidence={:<7} split={}",
            record["invoice_no"].as_str().unwrap_or("-"),
            line.item_code(),
            line.status.as_str(),
            line.confidence
                .map(|c| format!("{:.2}", c))
                .unwrap_or_else(|| "-".to_string()),
            record["quantity_split"].as_str().unwrap_or("-"),
        );
    }

    match report.summary.match_rate {
        Some(rate) => println!("Match rate: {:.1}%", rate * 100.0),
        None => println!("Match rate: n/a"),
    }
    println!("Suspect lines: {}", report.summary.suspect_lines);

    println!("\nPatterns:");
    for pattern in &report.patterns {
        println!(
            "  {} ({} rows, consistency {:.2}): {}",
            pattern.item_code, pattern.row_count, pattern.consistency, pattern.suggestion
        );
    }

    let decisions: Vec<BulkDecision> = report
        .patterns
        .iter()
        .filter(|p| p.suggested_action == SuggestedAction::BulkAccept)
        .map(|p| BulkDecision {
            item_code: p.item_code.clone(),
            action: BulkAction::Accept,
        })
        .collect();

    let resolved = apply_bulk_decisions(&report.lines, &decisions, config.confidence_threshold);
    let accepted = resolved.iter().filter(|l| l.resolution.is_some()).count();
    println!("\nBulk-accepted {} line(s) across {} item(s)", accepted, decisions.len());

    println!("\n{}", serde_json::to_string_pretty(&report.summary)?);
    Ok(())
}

use crate::schema::{BulkAction, BulkDecision, EnrichedLine, PriceTier, Resolution};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Merge key of a price tier: item code, start date and exclusive price.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TierKey {
    item_code: String,
    start_date: NaiveDate,
    price_cents: i64,
}

impl TierKey {
    fn of(tier: &PriceTier) -> Self {
        Self {
            item_code: tier.item_code.trim().to_string(),
            start_date: tier.start_date,
            price_cents: (tier.price_excl_tax * 100.0).round() as i64,
        }
    }
}

/// Applies an incremental price list import on top of an existing one.
///
/// A tier whose key already exists replaces it in place (later import wins);
/// anything else is appended in import order. Neither input is modified.
pub fn merge_price_lists(existing: &[PriceTier], incoming: &[PriceTier]) -> Vec<PriceTier> {
    let mut merged = existing.to_vec();
    let mut positions: HashMap<TierKey, usize> = HashMap::new();
    for (i, tier) in merged.iter().enumerate() {
        positions.entry(TierKey::of(tier)).or_insert(i);
    }

    for tier in incoming {
        let key = TierKey::of(tier);
        match positions.get(&key) {
            Some(&i) => merged[i] = tier.clone(),
            None => {
                positions.insert(key, merged.len());
                merged.push(tier.clone());
            }
        }
    }

    merged
}

/// Records operator bulk decisions on a copy of the lines.
///
/// Only lines below the confidence threshold are touched, and only their
/// `resolution`; the status always keeps what the engine concluded.
pub fn apply_bulk_decisions(
    lines: &[EnrichedLine],
    decisions: &[BulkDecision],
    confidence_threshold: f64,
) -> Vec<EnrichedLine> {
    // Last decision for an item wins
    let by_item: HashMap<&str, BulkAction> = decisions
        .iter()
        .map(|d| (d.item_code.trim(), d.action))
        .collect();

    lines
        .iter()
        .map(|line| {
            let mut updated = line.clone();
            if line.is_suspect(confidence_threshold) {
                if let Some(action) = by_item.get(line.item_code().trim()) {
                    updated.resolution = Some(match action {
                        BulkAction::Accept => Resolution::BulkAccepted,
                        BulkAction::Skip => Resolution::BulkSkipped,
                    });
                    updated.trace.push(format!(
                        "Bulk decision for '{}': {}",
                        line.item_code(),
                        match action {
                            BulkAction::Accept => "accepted",
                            BulkAction::Skip => "skipped",
                        }
                    ));
                }
            }
            updated
        })
        .collect()
}

use crate::matcher::PeriodLookup;
use crate::schema::{MatchedPeriod, PriceTier};
use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// The validity interval of one price tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePeriod {
    pub start_date: NaiveDate,
    /// `None` means open-ended.
    pub end_date: Option<NaiveDate>,
    pub tier: PriceTier,
}

impl PricePeriod {
    pub fn from_tier(tier: &PriceTier) -> Self {
        Self {
            start_date: tier.start_date,
            end_date: tier.end_date,
            tier: tier.clone(),
        }
    }

    /// Inclusive at both ends.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && self.end_date.map_or(true, |end| date <= end)
    }

    pub fn ends_before(&self, date: NaiveDate) -> bool {
        matches!(self.end_date, Some(end) if end < date)
    }

    pub fn to_matched(&self) -> MatchedPeriod {
        MatchedPeriod {
            label: self.tier.display_label(),
            start_date: self.start_date,
            end_date: self.end_date,
            price_excl_tax: self.tier.price_excl_tax,
            price_incl_tax: self.tier.price_incl_tax,
            price_invoice_basis: self.tier.price_invoice_basis,
            is_promotion: self.tier.is_promotion(),
        }
    }
}

/// All periods of one item, ordered by start date ascending and, within a
/// shared start date, by price descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPriceHistory {
    pub item_code: String,
    pub periods: Vec<PricePeriod>,
}

impl ItemPriceHistory {
    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }
}

/// Price list grouped by item code. Never mutated after construction, so one
/// index can back any number of concurrent reconciliation runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceIndex {
    items: BTreeMap<String, ItemPriceHistory>,
}

impl PriceIndex {
    pub fn build(tiers: &[PriceTier]) -> Self {
        let mut items: BTreeMap<String, ItemPriceHistory> = BTreeMap::new();
        let mut discarded = 0usize;

        for tier in tiers {
            if tier.price_excl_tax.is_nan() || tier.price_excl_tax <= 0.0 {
                discarded += 1;
                continue;
            }
            let code = tier.item_code.trim();
            items
                .entry(code.to_string())
                .or_insert_with(|| ItemPriceHistory {
                    item_code: code.to_string(),
                    periods: Vec::new(),
                })
                .periods
                .push(PricePeriod::from_tier(tier));
        }

        for history in items.values_mut() {
            history.periods.sort_by(compare_periods);
        }

        if discarded > 0 {
            warn!(
                "Discarded {} price tier(s) with a non-positive exclusive-of-tax price",
                discarded
            );
        }
        debug!(
            "Built price index: {} item(s), {} period(s)",
            items.len(),
            items.values().map(|h| h.len()).sum::<usize>()
        );

        Self { items }
    }

    pub fn history(&self, item_code: &str) -> Option<&ItemPriceHistory> {
        self.items.get(item_code.trim())
    }

    pub fn contains_item(&self, item_code: &str) -> bool {
        self.history(item_code).is_some()
    }

    pub fn tier_count(&self, item_code: &str) -> usize {
        self.history(item_code).map_or(0, |h| h.len())
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn period_count(&self) -> usize {
        self.items.values().map(|h| h.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemPriceHistory> {
        self.items.values()
    }

    pub fn lookup(&self, item_code: &str, date: NaiveDate) -> PeriodLookup<'_> {
        crate::matcher::lookup(self, item_code, date)
    }
}

fn compare_periods(a: &PricePeriod, b: &PricePeriod) -> Ordering {
    a.start_date.cmp(&b.start_date).then_with(|| {
        b.tier
            .price_excl_tax
            .partial_cmp(&a.tier.price_excl_tax)
            .unwrap_or(Ordering::Equal)
    })
}

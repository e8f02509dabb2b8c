//! Bounded exhaustive search for a quantity split that explains an observed
//! line total.
//!
//! Known tiers are tried alone and in every pairwise split. Synthetic
//! discount ratios are only used to produce what-if suggestions; they never
//! produce an accepted allocation.

use crate::config::ReconciliationConfig;
use crate::error::{ReconciliationError, Result};
use crate::index::PricePeriod;
use crate::schema::{Allocation, AllocationEntry, SyntheticCandidate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

const PRICE_EPSILON: f64 = 1e-9;

/// A distinct unit price the solver may allocate units to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceOption {
    pub label: String,
    pub unit_price: f64,
    pub unit_price_incl_tax: f64,
    pub unit_price_invoice_basis: f64,
    pub is_promotion: bool,
}

impl PriceOption {
    pub fn from_period(period: &PricePeriod) -> Self {
        Self {
            label: period.tier.display_label(),
            unit_price: period.tier.price_excl_tax,
            unit_price_incl_tax: period.tier.price_incl_tax,
            unit_price_invoice_basis: period.tier.price_invoice_basis,
            is_promotion: period.tier.is_promotion(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    /// Best known-tier split inside the tolerance, if any.
    pub allocation: Option<Allocation>,
    /// Closest known-tier split regardless of tolerance. Equal to
    /// `allocation` when one exists.
    pub nearest: Allocation,
    pub calculated_amount: f64,
    pub invoice_basis_amount: f64,
    /// Observed minus calculated.
    pub diff: f64,
    /// Absolute difference relative to the observed amount.
    pub diff_percent: f64,
    pub confidence: f64,
    pub is_acceptable: bool,
    pub candidates_tried: usize,
    pub suggestions: Vec<SyntheticCandidate>,
}

/// Units per option index, in option order.
#[derive(Debug, Clone)]
struct Split {
    parts: Vec<(usize, u32)>,
    calculated: f64,
    diff_percent: f64,
}

impl Split {
    fn new(options: &[PriceOption], parts: Vec<(usize, u32)>, observed: f64) -> Self {
        let calculated = parts
            .iter()
            .map(|(idx, qty)| *qty as f64 * options[*idx].unit_price)
            .sum();
        Self {
            diff_percent: diff_percent(observed, calculated),
            parts,
            calculated,
        }
    }

    fn tiers_used(&self) -> usize {
        self.parts.iter().filter(|(_, qty)| *qty > 0).count()
    }

    /// Units on the first (highest priced) option of the split.
    fn lead_units(&self) -> u32 {
        self.parts.first().map_or(0, |(_, qty)| *qty)
    }

    /// Lower diff wins; ties go to fewer tiers, then more units at the
    /// higher price.
    fn is_better_than(&self, other: &Split) -> bool {
        if (self.diff_percent - other.diff_percent).abs() > PRICE_EPSILON {
            return self.diff_percent < other.diff_percent;
        }
        match self.tiers_used().cmp(&other.tiers_used()) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => self.lead_units() > other.lead_units(),
        }
    }

    fn to_allocation(&self, options: &[PriceOption]) -> Allocation {
        Allocation {
            entries: self
                .parts
                .iter()
                .filter(|(_, qty)| *qty > 0)
                .map(|(idx, qty)| AllocationEntry {
                    tier_label: options[*idx].label.clone(),
                    unit_price: options[*idx].unit_price,
                    unit_price_incl_tax: options[*idx].unit_price_incl_tax,
                    allocated_qty: *qty,
                    is_promotion: options[*idx].is_promotion,
                })
                .collect(),
        }
    }

    fn invoice_basis_amount(&self, options: &[PriceOption]) -> f64 {
        self.parts
            .iter()
            .map(|(idx, qty)| *qty as f64 * options[*idx].unit_price_invoice_basis)
            .sum()
    }
}

/// `|observed - calculated| / observed * 100`, with a zero observed amount
/// matching only a zero calculation.
pub fn diff_percent(observed: f64, calculated: f64) -> f64 {
    if observed.abs() < PRICE_EPSILON {
        if calculated.abs() < PRICE_EPSILON {
            0.0
        } else {
            100.0
        }
    } else {
        (observed - calculated).abs() / observed.abs() * 100.0
    }
}

pub fn confidence_from_diff_percent(diff_percent: f64) -> f64 {
    100.0 - diff_percent.clamp(0.0, 100.0)
}

/// Collapses options sharing a unit price (a labelled one wins) and orders
/// the result by price, highest first.
pub fn dedupe_options(options: &[PriceOption]) -> Vec<PriceOption> {
    let mut distinct: Vec<PriceOption> = Vec::new();

    for option in options {
        match distinct
            .iter_mut()
            .find(|o| (o.unit_price - option.unit_price).abs() < PRICE_EPSILON)
        {
            Some(existing) => {
                if !existing.is_promotion && option.is_promotion {
                    *existing = option.clone();
                }
            }
            None => distinct.push(option.clone()),
        }
    }

    distinct.sort_by(|a, b| {
        b.unit_price
            .partial_cmp(&a.unit_price)
            .unwrap_or(Ordering::Equal)
    });
    distinct
}

/// Searches for the split of `quantity` across `options` that best explains
/// `observed_amount`. Pure and deterministic.
pub fn solve(
    options: &[PriceOption],
    quantity: u32,
    observed_amount: f64,
    config: &ReconciliationConfig,
) -> Result<AllocationOutcome> {
    if options.is_empty() && quantity > 0 {
        return Err(ReconciliationError::EmptyTierSet { quantity });
    }

    let options = dedupe_options(options);
    let tolerance = config.match_tolerance_percent;

    let mut candidates_tried = 0usize;
    let mut nearest: Option<Split> = None;
    let mut best: Option<Split> = None;

    let mut consider = |split: Split| {
        candidates_tried += 1;
        if split.diff_percent <= tolerance + PRICE_EPSILON
            && best.as_ref().map_or(true, |b| split.is_better_than(b))
        {
            best = Some(split.clone());
        }
        if nearest.as_ref().map_or(true, |n| split.is_better_than(n)) {
            nearest = Some(split);
        }
    };

    if quantity == 0 {
        consider(Split::new(&options, Vec::new(), observed_amount));
    }

    if quantity > 0 {
        for idx in 0..options.len() {
            consider(Split::new(&options, vec![(idx, quantity)], observed_amount));
        }

        for high in 0..options.len() {
            for low in (high + 1)..options.len() {
                for high_qty in 1..quantity {
                    consider(Split::new(
                        &options,
                        vec![(high, high_qty), (low, quantity - high_qty)],
                        observed_amount,
                    ));
                }
            }
        }
    }

    // Either the zero-quantity split or at least one single-tier split was considered
    let nearest = nearest.unwrap_or_else(|| Split::new(&options, Vec::new(), observed_amount));

    let (confidence, reported) = match &best {
        Some(split) => (confidence_from_diff_percent(split.diff_percent), split),
        None => (0.0, &nearest),
    };
    let is_acceptable =
        best.is_some() && confidence + PRICE_EPSILON >= config.confidence_threshold * 100.0;

    let mut diff = observed_amount - reported.calculated;
    if diff.abs() < PRICE_EPSILON {
        diff = 0.0;
    }

    let suggestions = if is_acceptable {
        Vec::new()
    } else {
        synthetic_candidates(&options, quantity, observed_amount, config)
    };

    Ok(AllocationOutcome {
        allocation: best.as_ref().map(|s| s.to_allocation(&options)),
        nearest: nearest.to_allocation(&options),
        calculated_amount: reported.calculated,
        invoice_basis_amount: reported.invoice_basis_amount(&options),
        diff,
        diff_percent: reported.diff_percent,
        confidence,
        is_acceptable,
        candidates_tried,
        suggestions,
    })
}

/// What-if splits where part of the quantity is priced at a fraction of the
/// standard price, or at the token add-on price.
pub fn synthetic_candidates(
    options: &[PriceOption],
    quantity: u32,
    observed_amount: f64,
    config: &ReconciliationConfig,
) -> Vec<SyntheticCandidate> {
    let Some(standard) = options.first() else {
        return Vec::new();
    };
    if quantity == 0 {
        return Vec::new();
    }

    let standard_price = standard.unit_price;
    let known_price = |price: f64| {
        options
            .iter()
            .any(|o| (o.unit_price - price).abs() < PRICE_EPSILON)
    };

    let mut promos: Vec<(f64, String)> = config
        .discount_ratios
        .iter()
        .map(|ratio| (standard_price * ratio, format!("{:.0}% of standard", ratio * 100.0)))
        .collect();
    if config.token_promo_price > 0.0 && config.token_promo_price < standard_price {
        promos.push((
            config.token_promo_price,
            format!("token add-on at {:.2}", config.token_promo_price),
        ));
    }

    let mut found = Vec::new();
    for (promo_price, promo_name) in promos {
        if known_price(promo_price) {
            continue;
        }
        for standard_qty in 0..quantity {
            let promo_qty = quantity - standard_qty;
            let calculated = standard_qty as f64 * standard_price + promo_qty as f64 * promo_price;
            let pct = diff_percent(observed_amount, calculated);
            if pct <= config.match_tolerance_percent + PRICE_EPSILON {
                found.push(SyntheticCandidate {
                    description: format!(
                        "{} x standard @ {:.2} + {} x {} @ {:.2}",
                        standard_qty, standard_price, promo_qty, promo_name, promo_price
                    ),
                    standard_price,
                    promo_unit_price: promo_price,
                    standard_qty,
                    promo_qty,
                    calculated_amount: calculated,
                    diff_percent: pct,
                });
            }
        }
    }

    // Uniform discounts first among equally close explanations, then the
    // shallowest discount
    let tiers_used = |c: &SyntheticCandidate| usize::from(c.standard_qty > 0) + 1;
    found.sort_by(|a, b| {
        a.diff_percent
            .partial_cmp(&b.diff_percent)
            .unwrap_or(Ordering::Equal)
            .then_with(|| tiers_used(a).cmp(&tiers_used(b)))
            .then_with(|| {
                b.promo_unit_price
                    .partial_cmp(&a.promo_unit_price)
                    .unwrap_or(Ordering::Equal)
            })
    });
    found.truncate(config.max_suggestions);
    found
}

use crate::config::ReconciliationConfig;
use crate::dates::normalize;
use crate::error::Result;
use crate::index::{PriceIndex, PricePeriod};
use crate::matcher::PeriodLookup;
use crate::schema::{EnrichedLine, InvoiceLine, LineStatus, RawDate};
use crate::solver::{solve, PriceOption};
use chrono::NaiveDate;
use log::debug;

const QTY_EPSILON: f64 = 1e-9;

/// Reconciles invoice lines against one price index.
///
/// Holds only shared references; any number of reconcilers may read the
/// same index concurrently.
pub struct Reconciler<'a> {
    index: &'a PriceIndex,
    config: &'a ReconciliationConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(index: &'a PriceIndex, config: &'a ReconciliationConfig) -> Self {
        Self { index, config }
    }

    pub fn enrich_all(&self, lines: &[InvoiceLine]) -> Result<Vec<EnrichedLine>> {
        lines.iter().map(|line| self.enrich(line)).collect()
    }

    pub fn enrich(&self, line: &InvoiceLine) -> Result<EnrichedLine> {
        let normalized_date = normalize(&line.invoice_date);
        let mut enriched = EnrichedLine {
            line: line.clone(),
            normalized_date,
            is_return: line.is_return(),
            quantity: finite_abs(line.quantity),
            amount: finite_abs(line.total_amount),
            matched_periods: Vec::new(),
            expected_unit_price: None,
            allocation: None,
            calculated_amount: None,
            invoice_basis_amount: None,
            diff: None,
            diff_percent: None,
            confidence: None,
            status: LineStatus::NoPrice,
            suggestions: Vec::new(),
            trace: Vec::new(),
            resolution: None,
        };

        enriched.trace.push(describe_date(&line.invoice_date, normalized_date));

        if enriched.is_return {
            enriched.status = LineStatus::Return;
            enriched.trace.push(format!(
                "Return line (quantity {}, amount {}): allocation search skipped",
                line.quantity, line.total_amount
            ));
            return Ok(self.finish(enriched));
        }

        if (enriched.quantity - 1.0).abs() < QTY_EPSILON {
            self.attach_periods_if_known(&mut enriched);
            enriched.status = LineStatus::SingleUnitSkip;
            enriched.confidence = Some(100.0);
            enriched.calculated_amount = Some(enriched.amount);
            enriched.diff = Some(0.0);
            enriched.diff_percent = Some(0.0);
            enriched.trace.push(format!(
                "Single unit at {:.2}: accepted without tier validation",
                enriched.amount
            ));
            return Ok(self.finish(enriched));
        }

        if !self.index.contains_item(&line.item_code) {
            return Ok(self.no_price(enriched));
        }

        let Some(date) = normalized_date else {
            enriched.status = LineStatus::NoPeriod;
            enriched.confidence = Some(0.0);
            enriched.trace.push(format!(
                "Cannot place the line in time; {} price period(s) exist for '{}'",
                self.index.tier_count(&line.item_code),
                line.item_code
            ));
            return Ok(self.finish(enriched));
        };

        let periods = match self.index.lookup(&line.item_code, date) {
            PeriodLookup::Active(periods) => periods,
            PeriodLookup::NoPeriod {
                nearest_before,
                nearest_after,
            } => {
                enriched.status = LineStatus::NoPeriod;
                enriched.confidence = Some(0.0);
                enriched.trace.push(format!(
                    "No price period covers {} (before: {}; after: {})",
                    date,
                    describe_optional_period(nearest_before),
                    describe_optional_period(nearest_after)
                ));
                return Ok(self.finish(enriched));
            }
            PeriodLookup::NoPrice => return Ok(self.no_price(enriched)),
        };

        enriched.matched_periods = periods.iter().map(|p| p.to_matched()).collect();
        enriched.expected_unit_price = periods.first().map(|p| p.tier.price_excl_tax);
        enriched.trace.push(format!(
            "{} active period(s): {}",
            periods.len(),
            enriched
                .matched_periods
                .iter()
                .map(|p| p.describe())
                .collect::<Vec<_>>()
                .join("; ")
        ));

        let quantity = whole_units(enriched.quantity);
        if (quantity as f64 - enriched.quantity).abs() > QTY_EPSILON {
            enriched.trace.push(format!(
                "Fractional quantity {} rounded to {} for allocation",
                enriched.quantity, quantity
            ));
        }

        if quantity == 0 {
            return Ok(self.unvalidated(
                enriched,
                periods[0],
                "Quantity missing or zero; cannot validate".to_string(),
            ));
        }
        if quantity > self.config.max_search_quantity {
            let reason = format!(
                "Quantity {} exceeds the search limit of {}; cannot validate",
                quantity, self.config.max_search_quantity
            );
            return Ok(self.unvalidated(enriched, periods[0], reason));
        }

        let options: Vec<PriceOption> = periods
            .iter()
            .copied()
            .map(PriceOption::from_period)
            .collect();
        let outcome = solve(&options, quantity, enriched.amount, self.config)?;

        enriched.trace.push(format!(
            "Tried {} known-tier split(s) for {} unit(s) totalling {:.2}",
            outcome.candidates_tried, quantity, enriched.amount
        ));

        match &outcome.allocation {
            Some(allocation) => enriched.trace.push(format!(
                "Best split: {} = {:.2} (diff {:+.2}, {:.2}%)",
                allocation.describe(),
                outcome.calculated_amount,
                outcome.diff,
                outcome.diff_percent
            )),
            None => enriched.trace.push(format!(
                "No split within {:.2}%; closest: {} = {:.2} (diff {:+.2}, {:.2}%)",
                self.config.match_tolerance_percent,
                outcome.nearest.describe(),
                outcome.calculated_amount,
                outcome.diff,
                outcome.diff_percent
            )),
        }

        if !outcome.suggestions.is_empty() {
            enriched.trace.push(format!(
                "What-if: {}",
                outcome
                    .suggestions
                    .iter()
                    .map(|s| s.description.as_str())
                    .collect::<Vec<_>>()
                    .join(" | ")
            ));
        }

        enriched.status = if outcome.is_acceptable {
            LineStatus::Matched
        } else if outcome.diff < 0.0 {
            LineStatus::MismatchLow
        } else {
            LineStatus::MismatchHigh
        };
        enriched.trace.push(format!(
            "Confidence {:.2} against threshold {:.2}: {}",
            outcome.confidence,
            self.config.confidence_threshold * 100.0,
            enriched.status.as_str()
        ));

        enriched.allocation = outcome.allocation;
        enriched.calculated_amount = Some(outcome.calculated_amount);
        enriched.invoice_basis_amount = Some(outcome.invoice_basis_amount);
        enriched.diff = Some(outcome.diff);
        enriched.diff_percent = Some(signed_diff_percent(enriched.amount, outcome.diff));
        enriched.confidence = Some(outcome.confidence);
        enriched.suggestions = outcome.suggestions;

        Ok(self.finish(enriched))
    }

    fn no_price(&self, mut enriched: EnrichedLine) -> EnrichedLine {
        enriched.status = LineStatus::NoPrice;
        enriched.confidence = Some(0.0);
        enriched.trace.push(format!(
            "Item '{}' is not on the price list",
            enriched.line.item_code
        ));
        self.finish(enriched)
    }

    /// A priced line whose quantity cannot be searched. The direction comes
    /// from the primary price alone; no diff is recorded, so the line never
    /// feeds pattern detection.
    fn unvalidated(
        &self,
        mut enriched: EnrichedLine,
        primary: &PricePeriod,
        reason: String,
    ) -> EnrichedLine {
        let expected = enriched.quantity * primary.tier.price_excl_tax;
        enriched.status = if enriched.amount < expected {
            LineStatus::MismatchLow
        } else {
            LineStatus::MismatchHigh
        };
        enriched.confidence = Some(0.0);
        enriched.trace.push(reason);
        enriched.trace.push(format!(
            "Reported as {} without allocation",
            enriched.status.as_str()
        ));
        self.finish(enriched)
    }

    fn attach_periods_if_known(&self, enriched: &mut EnrichedLine) {
        if let Some(date) = enriched.normalized_date {
            let lookup = self.index.lookup(&enriched.line.item_code, date);
            if let PeriodLookup::Active(periods) = lookup {
                enriched.matched_periods = periods.iter().map(|p| p.to_matched()).collect();
                enriched.expected_unit_price = periods.first().map(|p| p.tier.price_excl_tax);
            }
        }
    }

    fn finish(&self, enriched: EnrichedLine) -> EnrichedLine {
        debug!(
            "Line '{}' ({:?}): {}",
            enriched.line.item_code,
            enriched.normalized_date,
            enriched.status.as_str()
        );
        enriched
    }
}

/// Diff relative to the line's own observed amount, signed like the diff.
pub fn signed_diff_percent(amount: f64, diff: f64) -> f64 {
    if amount.abs() < QTY_EPSILON {
        if diff.abs() < QTY_EPSILON {
            0.0
        } else {
            100.0_f64.copysign(diff)
        }
    } else {
        diff / amount * 100.0
    }
}

fn finite_abs(value: f64) -> f64 {
    if value.is_finite() {
        value.abs()
    } else {
        0.0
    }
}

fn whole_units(quantity: f64) -> u32 {
    quantity.round().clamp(0.0, u32::MAX as f64) as u32
}

fn describe_date(raw: &RawDate, normalized: Option<NaiveDate>) -> String {
    let shown = match raw {
        RawDate::Serial(serial) => format!("serial {}", serial),
        RawDate::Text(text) => format!("'{}'", text),
    };
    match normalized {
        Some(date) => format!("Date {} normalized to {}", shown, date),
        None => format!("Date {} could not be parsed", shown),
    }
}

fn describe_optional_period(period: Option<&PricePeriod>) -> String {
    period
        .map(|p| p.to_matched().describe())
        .unwrap_or_else(|| "none".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PriceTier;

    fn tier(price: f64, label: Option<&str>) -> PriceTier {
        PriceTier {
            item_code: "SK-1".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: None,
            price_excl_tax: price,
            price_incl_tax: price * 1.07,
            price_invoice_basis: price,
            label: label.map(str::to_string),
        }
    }

    fn enrich(tiers: &[PriceTier], line: InvoiceLine) -> EnrichedLine {
        let index = PriceIndex::build(tiers);
        let config = ReconciliationConfig::default();
        Reconciler::new(&index, &config).enrich(&line).unwrap()
    }

    #[test]
    fn test_exact_single_tier_match() {
        let enriched = enrich(
            &[tier(100.0, None)],
            InvoiceLine::new("SK-1", "06-JAN-0026", 3.0, 300.0),
        );
        assert_eq!(enriched.status, LineStatus::Matched);
        assert_eq!(enriched.confidence, Some(100.0));
        assert_eq!(enriched.normalized_date, NaiveDate::from_ymd_opt(2026, 1, 6));
        let allocation = enriched.allocation.unwrap();
        assert_eq!(allocation.entries.len(), 1);
        assert_eq!(allocation.entries[0].allocated_qty, 3);
        assert_eq!(enriched.expected_unit_price, Some(100.0));
    }

    #[test]
    fn test_promo_split_match() {
        let enriched = enrich(
            &[tier(100.0, None), tier(50.0, Some("Promo"))],
            InvoiceLine::new("SK-1", "06-JAN-0026", 4.0, 300.0),
        );
        assert_eq!(enriched.status, LineStatus::Matched);
        let allocation = enriched.allocation.unwrap();
        assert_eq!(allocation.entries[0].tier_label, "Standard");
        assert_eq!(allocation.entries[0].allocated_qty, 2);
        assert_eq!(allocation.entries[1].tier_label, "Promo");
        assert_eq!(allocation.entries[1].allocated_qty, 2);
        assert_eq!(enriched.matched_periods.len(), 2);
    }

    #[test]
    fn test_return_skips_search() {
        let enriched = enrich(
            &[tier(100.0, None)],
            InvoiceLine::new("SK-1", "06-JAN-0026", -2.0, -200.0),
        );
        assert_eq!(enriched.status, LineStatus::Return);
        assert!(enriched.confidence.is_none());
        assert!(enriched.allocation.is_none());
        assert!(enriched.calculated_amount.is_none());
        assert!(enriched.is_return);
        assert!((enriched.quantity - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_single_unit_skip_ignores_price_list() {
        let enriched = enrich(&[], InvoiceLine::new("UNKNOWN", "garbage", 1.0, 999.0));
        assert_eq!(enriched.status, LineStatus::SingleUnitSkip);
        assert_eq!(enriched.confidence, Some(100.0));
        assert_eq!(enriched.calculated_amount, Some(999.0));
    }

    #[test]
    fn test_no_price_vs_no_period() {
        let tiers = [PriceTier {
            end_date: NaiveDate::from_ymd_opt(2025, 12, 31),
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            ..tier(100.0, None)
        }];

        let missing = enrich(&tiers, InvoiceLine::new("OTHER", "1/6/2026", 2.0, 200.0));
        assert_eq!(missing.status, LineStatus::NoPrice);

        let uncovered = enrich(&tiers, InvoiceLine::new("SK-1", "1/6/2026", 2.0, 200.0));
        assert_eq!(uncovered.status, LineStatus::NoPeriod);
        assert!(uncovered.trace_text().contains("2025-01-01..2025-12-31"));
    }

    #[test]
    fn test_unparseable_date_is_no_period() {
        let enriched = enrich(&[tier(100.0, None)], InvoiceLine::new("SK-1", "soon", 2.0, 200.0));
        assert_eq!(enriched.status, LineStatus::NoPeriod);
        assert!(enriched.normalized_date.is_none());
        assert!(enriched.trace_text().contains("could not be parsed"));
    }

    #[test]
    fn test_mismatch_direction() {
        let low = enrich(&[tier(100.0, None)], InvoiceLine::new("SK-1", "1/6/2026", 5.0, 450.0));
        assert_eq!(low.status, LineStatus::MismatchLow);
        assert_eq!(low.confidence, Some(0.0));
        assert!((low.diff.unwrap() + 50.0).abs() < 1e-9);
        assert!((low.diff_percent.unwrap() + 50.0 / 450.0 * 100.0).abs() < 1e-9);
        assert!(!low.suggestions.is_empty());

        let high = enrich(&[tier(100.0, None)], InvoiceLine::new("SK-1", "1/6/2026", 5.0, 600.0));
        assert_eq!(high.status, LineStatus::MismatchHigh);
        assert!(high.diff.unwrap() > 0.0);
    }

    #[test]
    fn test_trace_records_each_step() {
        let enriched = enrich(
            &[tier(100.0, None)],
            InvoiceLine::new("SK-1", "06-JAN-0026", 3.0, 300.0),
        );
        assert!(enriched.trace[0].contains("2026-01-06"));
        assert!(enriched.trace.iter().any(|t| t.contains("active period")));
        assert!(enriched.trace.iter().any(|t| t.contains("Best split")));
        assert!(enriched.trace.last().unwrap().ends_with("matched"));
    }

    #[test]
    fn test_unreadable_quantity_is_not_validated() {
        for quantity in [0.0, 0.4] {
            let enriched = enrich(
                &[tier(100.0, None)],
                InvoiceLine::new("SK-1", "1/6/2026", quantity, 100.0),
            );
            assert_eq!(enriched.status, LineStatus::MismatchHigh);
            assert!(enriched.allocation.is_none());
            assert!(enriched.diff.is_none());
            assert!(enriched.diff_percent.is_none());
            assert!(!enriched.is_suspect(0.98));
            assert!(enriched.trace_text().contains("Quantity missing or zero"));
        }

        let empty = enrich(&[tier(100.0, None)], InvoiceLine::new("SK-1", "1/6/2026", 0.0, 0.0));
        assert_ne!(empty.status, LineStatus::Matched);
        assert!(empty.calculated_amount.is_none());
    }

    #[test]
    fn test_quantity_above_search_limit_is_not_validated() {
        let index = PriceIndex::build(&[tier(100.0, None), tier(50.0, Some("Promo"))]);
        let config = ReconciliationConfig {
            max_search_quantity: 1_000,
            ..Default::default()
        };
        let line = InvoiceLine::new("SK-1", "1/6/2026", 5_000_000.0, 300.0);
        let enriched = Reconciler::new(&index, &config).enrich(&line).unwrap();

        assert_eq!(enriched.status, LineStatus::MismatchLow);
        assert!(enriched.allocation.is_none());
        assert!(enriched.diff_percent.is_none());
        assert!(enriched.trace_text().contains("exceeds the search limit of 1000"));
        assert_eq!(enriched.matched_periods.len(), 2);
    }

    #[test]
    fn test_every_status_writes_a_reason() {
        let tiers = [tier(100.0, None)];
        let lines = [
            InvoiceLine::new("OTHER", "1/6/2026", 2.0, 200.0),
            InvoiceLine::new("SK-1", "1/6/2025", 2.0, 200.0),
            InvoiceLine::new("SK-1", "soon", 2.0, 200.0),
            InvoiceLine::new("SK-1", "1/6/2026", -2.0, -200.0),
            InvoiceLine::new("SK-1", "1/6/2026", 1.0, 100.0),
            InvoiceLine::new("SK-1", "1/6/2026", 0.0, 100.0),
            InvoiceLine::new("SK-1", "1/6/2026", 2.0, 200.0),
        ];
        for line in lines {
            let enriched = enrich(&tiers, line);
            // Date line plus at least one line explaining the status
            assert!(enriched.trace.len() >= 2, "{:?}", enriched.status);
        }

        let missing = enrich(&tiers, InvoiceLine::new("OTHER", "1/6/2026", 2.0, 200.0));
        assert!(missing.trace_text().contains("not on the price list"));
    }

    #[test]
    fn test_non_numeric_amount_degrades_to_zero() {
        let enriched = enrich(
            &[tier(100.0, None)],
            InvoiceLine::new("SK-1", "1/6/2026", 2.0, f64::NAN),
        );
        assert!((enriched.amount - 0.0).abs() < f64::EPSILON);
        assert_eq!(enriched.status, LineStatus::MismatchLow);
        assert_eq!(enriched.diff_percent, Some(-100.0));
    }
}

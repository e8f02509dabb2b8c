//! # Price Reconciler
//!
//! Reconciles invoice line items against a date-bounded price list and
//! detects systematic, correctable pricing patterns across unexplained lines.
//!
//! ## Core Concepts
//!
//! - **Tier**: one price-and-validity-interval record for an item. Several tiers
//!   can be active on the same day (standard price plus promotions).
//! - **Allocation**: a split of an invoiced quantity across active tiers that
//!   explains the charged total, e.g. "2 at standard + 2 at promo".
//! - **Confidence**: closeness (0-100) between the observed and computed amount.
//! - **Pattern**: a consistent diff trend over the suspect lines of one item,
//!   used to justify a bulk accept or skip decision.
//!
//! Every function is a pure transformation over its inputs. A built
//! [`PriceIndex`] is never mutated and can be shared across threads.
//!
//! ## Example
//!
//! ```rust,ignore
//! use price_reconciler::*;
//! use chrono::NaiveDate;
//!
//! let tiers = vec![PriceTier {
//!     item_code: "SK-1".to_string(),
//!     start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
//!     end_date: None,
//!     price_excl_tax: 100.0,
//!     price_incl_tax: 107.0,
//!     price_invoice_basis: 100.0,
//!     label: None,
//! }];
//! let lines = vec![InvoiceLine::new("SK-1", "06-JAN-0026", 3.0, 300.0)];
//!
//! let report = reconcile(&tiers, &lines, &ReconciliationConfig::default()).unwrap();
//! assert_eq!(report.lines[0].status, LineStatus::Matched);
//! ```

pub mod config;
pub mod dates;
pub mod engine;
pub mod error;
pub mod export;
pub mod index;
pub mod ingestion;
pub mod matcher;
pub mod merge;
pub mod patterns;
pub mod schema;
pub mod solver;

pub use config::{PatternThresholds, ReconciliationConfig};
pub use dates::normalize;
pub use engine::Reconciler;
pub use error::{ReconciliationError, Result};
pub use export::RESULT_COLUMNS;
pub use index::{ItemPriceHistory, PriceIndex, PricePeriod};
pub use ingestion::*;
pub use matcher::{find_all_active, find_primary, lookup, PeriodLookup};
pub use merge::{apply_bulk_decisions, merge_price_lists};
pub use patterns::aggregate;
pub use schema::*;
pub use solver::{solve, AllocationOutcome, PriceOption};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub total_lines: usize,
    pub status_counts: BTreeMap<LineStatus, usize>,
    /// Lines that went through allocation search.
    pub validated_lines: usize,
    /// Matched share of validated lines; `None` when nothing was validated.
    pub match_rate: Option<f64>,
    pub suspect_lines: usize,
    /// Sum of |diff| over validated lines.
    pub total_abs_diff: f64,
}

impl ReconciliationSummary {
    pub fn from_lines(lines: &[EnrichedLine], confidence_threshold: f64) -> Self {
        let mut status_counts: BTreeMap<LineStatus, usize> = BTreeMap::new();
        for line in lines {
            *status_counts.entry(line.status).or_default() += 1;
        }

        // Mismatches without a diff never reached the allocation search
        let validated: Vec<&EnrichedLine> = lines
            .iter()
            .filter(|l| l.status == LineStatus::Matched || l.status.is_mismatch())
            .filter(|l| l.diff.is_some())
            .collect();
        let validated_lines = validated.len();
        let matched = validated
            .iter()
            .filter(|l| l.status == LineStatus::Matched)
            .count();
        let total_abs_diff = validated.iter().filter_map(|l| l.diff).map(f64::abs).sum();

        Self {
            total_lines: lines.len(),
            validated_lines,
            match_rate: (validated_lines > 0).then(|| matched as f64 / validated_lines as f64),
            suspect_lines: lines
                .iter()
                .filter(|l| l.is_suspect(confidence_threshold))
                .count(),
            total_abs_diff,
            status_counts,
        }
    }

    pub fn count(&self, status: LineStatus) -> usize {
        self.status_counts.get(&status).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub lines: Vec<EnrichedLine>,
    pub patterns: Vec<ItemPattern>,
    pub summary: ReconciliationSummary,
}

pub struct ReconciliationProcessor;

impl ReconciliationProcessor {
    pub fn process(
        tiers: &[PriceTier],
        lines: &[InvoiceLine],
        config: &ReconciliationConfig,
    ) -> Result<ReconciliationReport> {
        config.validate()?;
        let index = PriceIndex::build(tiers);
        Self::process_with_index(&index, lines, config)
    }

    /// Runs against an already built index, e.g. one shared by several
    /// concurrent batches.
    pub fn process_with_index(
        index: &PriceIndex,
        lines: &[InvoiceLine],
        config: &ReconciliationConfig,
    ) -> Result<ReconciliationReport> {
        config.validate()?;

        info!(
            "Reconciling {} invoice line(s) against {} item(s) / {} price period(s)",
            lines.len(),
            index.item_count(),
            index.period_count()
        );
        debug!(
            "Confidence threshold {:.2}, tolerance {:.2}%",
            config.confidence_threshold, config.match_tolerance_percent
        );

        let enriched = Reconciler::new(index, config).enrich_all(lines)?;
        let patterns = aggregate(&enriched, index, config);
        let summary = ReconciliationSummary::from_lines(&enriched, config.confidence_threshold);

        info!(
            "Reconciliation finished: {} matched, {} suspect, {} pattern(s)",
            summary.count(LineStatus::Matched),
            summary.suspect_lines,
            patterns.len()
        );

        Ok(ReconciliationReport {
            lines: enriched,
            patterns,
            summary,
        })
    }
}

pub fn reconcile(
    tiers: &[PriceTier],
    lines: &[InvoiceLine],
    config: &ReconciliationConfig,
) -> Result<ReconciliationReport> {
    ReconciliationProcessor::process(tiers, lines, config)
}

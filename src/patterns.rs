use crate::config::ReconciliationConfig;
use crate::index::PriceIndex;
use crate::schema::{EnrichedLine, ItemPattern, PatternType, SuggestedAction};
use log::debug;
use std::collections::BTreeMap;

/// Summary statistics over the signed diff percents of one item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

impl DiffStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            std_dev: variance.sqrt(),
        })
    }
}

/// 1 for a single row; otherwise `max(0, 1 - stddev / scale)`.
pub fn consistency_score(row_count: usize, std_dev: f64, stddev_scale: f64) -> f64 {
    if row_count <= 1 {
        1.0
    } else {
        (1.0 - std_dev / stddev_scale).max(0.0)
    }
}

pub fn classify(
    consistency: f64,
    mean_diff_percent: f64,
    config: &ReconciliationConfig,
) -> (PatternType, SuggestedAction) {
    let thresholds = &config.pattern;
    if consistency >= thresholds.strong_consistency {
        let pattern = if mean_diff_percent < -thresholds.trend_percent {
            PatternType::Discount
        } else if mean_diff_percent > thresholds.trend_percent {
            PatternType::Markup
        } else {
            PatternType::Mixed
        };
        (pattern, SuggestedAction::BulkAccept)
    } else if consistency >= thresholds.weak_consistency {
        (PatternType::Mixed, SuggestedAction::NeedsReview)
    } else {
        (PatternType::Unknown, SuggestedAction::RowByRow)
    }
}

/// Groups suspect lines by item and proposes one bulk action per item,
/// largest groups first. Lines are never modified.
pub fn aggregate(
    lines: &[EnrichedLine],
    index: &PriceIndex,
    config: &ReconciliationConfig,
) -> Vec<ItemPattern> {
    let mut groups: BTreeMap<&str, Vec<&EnrichedLine>> = BTreeMap::new();
    for line in lines
        .iter()
        .filter(|l| l.is_suspect(config.confidence_threshold))
    {
        groups.entry(line.item_code()).or_default().push(line);
    }

    let mut patterns: Vec<ItemPattern> = groups
        .into_iter()
        .filter_map(|(item_code, rows)| build_pattern(item_code, &rows, index, config))
        .collect();

    patterns.sort_by(|a, b| {
        b.row_count
            .cmp(&a.row_count)
            .then_with(|| a.item_code.cmp(&b.item_code))
    });

    for pattern in &patterns {
        debug!(
            "Pattern for '{}': {:?} over {} row(s), mean {:.2}%, consistency {:.2}",
            pattern.item_code,
            pattern.pattern_type,
            pattern.row_count,
            pattern.avg_diff_percent,
            pattern.consistency
        );
    }

    patterns
}

fn build_pattern(
    item_code: &str,
    rows: &[&EnrichedLine],
    index: &PriceIndex,
    config: &ReconciliationConfig,
) -> Option<ItemPattern> {
    let diff_percents: Vec<f64> = rows.iter().filter_map(|r| r.diff_percent).collect();
    let stats = DiffStats::from_values(&diff_percents)?;

    let consistency = consistency_score(rows.len(), stats.std_dev, config.pattern.stddev_scale);
    let (pattern_type, suggested_action) = classify(consistency, stats.mean, config);

    let ratios: Vec<f64> = rows
        .iter()
        .filter_map(|r| match r.calculated_amount {
            Some(calculated) if calculated > 0.0 => Some(r.amount / calculated),
            _ => None,
        })
        .collect();
    let implied_price_ratio = if ratios.is_empty() {
        1.0
    } else {
        ratios.iter().sum::<f64>() / ratios.len() as f64
    };

    let total_diff = rows.iter().filter_map(|r| r.diff).sum();

    let suggestion = describe_suggestion(
        pattern_type,
        suggested_action,
        rows.len(),
        stats.mean,
        implied_price_ratio,
    );

    Some(ItemPattern {
        item_code: item_code.to_string(),
        row_count: rows.len(),
        price_tier_count: index.tier_count(item_code),
        avg_diff_percent: stats.mean,
        min_diff_percent: stats.min,
        max_diff_percent: stats.max,
        consistency,
        total_diff,
        implied_price_ratio,
        pattern_type,
        suggested_action,
        suggestion,
    })
}

fn describe_suggestion(
    pattern_type: PatternType,
    action: SuggestedAction,
    rows: usize,
    mean: f64,
    ratio: f64,
) -> String {
    match (pattern_type, action) {
        (PatternType::Discount, _) => format!(
            "Consistent undercharge of {:.1}% across {} row(s), billed at ~{:.0}% of list. Bulk-accept as an undocumented promotion or member discount.",
            mean.abs(),
            rows,
            ratio * 100.0
        ),
        (PatternType::Markup, _) => format!(
            "Consistent overcharge of {:.1}% across {} row(s), billed at ~{:.0}% of list. Bulk-accept if a price increase is missing from the list.",
            mean,
            rows,
            ratio * 100.0
        ),
        (PatternType::Mixed, SuggestedAction::BulkAccept) => format!(
            "Small, consistent variance (mean {:+.1}%) across {} row(s). Bulk-accept as rounding or tax-basis noise.",
            mean, rows
        ),
        (PatternType::Mixed, _) => format!(
            "Moderately consistent variance (mean {:+.1}%) across {} row(s). Needs review before a bulk decision.",
            mean, rows
        ),
        (PatternType::Unknown, _) => format!(
            "Inconsistent differences across {} row(s). Review row by row.",
            rows
        ),
    }
}

use crate::error::{ReconciliationError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tuning knobs for a reconciliation run.
///
/// Every field has a default, so `{}` is a valid configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReconciliationConfig {
    #[serde(default = "default_confidence_threshold")]
    #[schemars(
        description = "Fraction (0.0-1.0). Lines whose confidence falls below threshold x 100 are not accepted and feed pattern detection."
    )]
    pub confidence_threshold: f64,

    #[serde(default = "default_match_tolerance_percent")]
    #[schemars(description = "Maximum |observed - computed| / observed, in percent, for a split to count as a candidate")]
    pub match_tolerance_percent: f64,

    #[serde(default = "default_discount_ratios")]
    #[schemars(description = "Synthetic promotional price ratios relative to the standard price, tried for what-if suggestions")]
    pub discount_ratios: Vec<f64>,

    #[serde(default = "default_token_promo_price")]
    #[schemars(description = "Unit price of the token add-on promotion (e.g. 'buy one, add one for 1')")]
    pub token_promo_price: f64,

    #[serde(default = "default_max_suggestions")]
    #[schemars(description = "Maximum synthetic suggestions attached to one line")]
    pub max_suggestions: usize,

    #[serde(default = "default_max_search_quantity")]
    #[schemars(
        description = "Largest whole-unit quantity the allocation search will split. Larger lines are reported as mismatches without a search."
    )]
    pub max_search_quantity: u32,

    #[serde(default)]
    pub pattern: PatternThresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PatternThresholds {
    #[serde(default = "default_strong_consistency")]
    #[schemars(description = "Consistency at or above which a group is considered systematic")]
    pub strong_consistency: f64,

    #[serde(default = "default_weak_consistency")]
    #[schemars(description = "Consistency below which a group is considered noise")]
    pub weak_consistency: f64,

    #[serde(default = "default_trend_percent")]
    #[schemars(description = "Mean diff percent beyond which a consistent group is a discount or markup")]
    pub trend_percent: f64,

    #[serde(default = "default_stddev_scale")]
    #[schemars(description = "Standard deviation (in percent points) that drives consistency to zero")]
    pub stddev_scale: f64,
}

fn default_confidence_threshold() -> f64 {
    0.98
}

fn default_match_tolerance_percent() -> f64 {
    2.0
}

fn default_discount_ratios() -> Vec<f64> {
    vec![0.5, 0.6, 2.0 / 3.0, 0.75, 0.8, 0.9, 0.95]
}

fn default_token_promo_price() -> f64 {
    1.0
}

fn default_max_suggestions() -> usize {
    5
}

fn default_max_search_quantity() -> u32 {
    100_000
}

fn default_strong_consistency() -> f64 {
    0.7
}

fn default_weak_consistency() -> f64 {
    0.4
}

fn default_trend_percent() -> f64 {
    3.0
}

fn default_stddev_scale() -> f64 {
    20.0
}

impl Default for PatternThresholds {
    fn default() -> Self {
        Self {
            strong_consistency: default_strong_consistency(),
            weak_consistency: default_weak_consistency(),
            trend_percent: default_trend_percent(),
            stddev_scale: default_stddev_scale(),
        }
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            match_tolerance_percent: default_match_tolerance_percent(),
            discount_ratios: default_discount_ratios(),
            token_promo_price: default_token_promo_price(),
            max_suggestions: default_max_suggestions(),
            max_search_quantity: default_max_search_quantity(),
            pattern: PatternThresholds::default(),
        }
    }
}

impl ReconciliationConfig {
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ReconciliationError::InvalidConfidenceThreshold(
                self.confidence_threshold,
            ));
        }

        if !self.match_tolerance_percent.is_finite() || self.match_tolerance_percent < 0.0 {
            return Err(ReconciliationError::InvalidTolerance(
                self.match_tolerance_percent,
            ));
        }

        if let Some(bad) = self
            .discount_ratios
            .iter()
            .find(|r| !(r.is_finite() && **r > 0.0 && **r < 1.0))
        {
            return Err(ReconciliationError::InvalidDiscountRatio(*bad));
        }

        if self.max_search_quantity == 0 {
            return Err(ReconciliationError::InvalidSearchQuantity(
                self.max_search_quantity,
            ));
        }

        let p = &self.pattern;
        if !(0.0..=1.0).contains(&p.weak_consistency)
            || !(0.0..=1.0).contains(&p.strong_consistency)
            || p.weak_consistency > p.strong_consistency
        {
            return Err(ReconciliationError::InvalidPatternThresholds(format!(
                "weak ({}) and strong ({}) consistency must satisfy 0 <= weak <= strong <= 1",
                p.weak_consistency, p.strong_consistency
            )));
        }
        if p.stddev_scale <= 0.0 || p.trend_percent < 0.0 {
            return Err(ReconciliationError::InvalidPatternThresholds(format!(
                "stddev_scale ({}) must be positive and trend_percent ({}) non-negative",
                p.stddev_scale, p.trend_percent
            )));
        }

        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ReconciliationConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One row of the price list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PriceTier {
    #[schemars(description = "Stable product identifier shared with invoice lines")]
    pub item_code: String,

    #[schemars(description = "First day (inclusive) on which this price applies")]
    pub start_date: NaiveDate,

    #[serde(default)]
    #[schemars(description = "Last day (inclusive) on which this price applies. Absent means open-ended.")]
    pub end_date: Option<NaiveDate>,

    #[schemars(description = "Unit price exclusive of tax. Tiers with a non-positive value are ignored.")]
    pub price_excl_tax: f64,

    #[serde(default)]
    #[schemars(description = "Unit price inclusive of tax")]
    pub price_incl_tax: f64,

    #[serde(default)]
    #[schemars(
        description = "Secondary reference price used for commission-style reporting only, never for matching"
    )]
    pub price_invoice_basis: f64,

    #[serde(default)]
    #[schemars(description = "Optional promotion name, e.g. 'Member Week'")]
    pub label: Option<String>,
}

impl PriceTier {
    /// Label shown in allocations and traces.
    pub fn display_label(&self) -> String {
        match &self.label {
            Some(label) if !label.trim().is_empty() => label.trim().to_string(),
            _ => "Standard".to_string(),
        }
    }

    pub fn is_promotion(&self) -> bool {
        matches!(&self.label, Some(label) if !label.trim().is_empty())
    }
}

/// A date exactly as it arrived from the source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RawDate {
    #[schemars(description = "Spreadsheet serial number (days since 1899-12-30)")]
    Serial(f64),

    #[schemars(description = "Free text such as '06-JAN-0026', '1/6/2026' or '2026-01-06'")]
    Text(String),
}

impl From<&str> for RawDate {
    fn from(value: &str) -> Self {
        RawDate::Text(value.to_string())
    }
}

impl From<f64> for RawDate {
    fn from(value: f64) -> Self {
        RawDate::Serial(value)
    }
}

/// Structured capture metadata carried alongside an invoice line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LineContext {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub employee: Option<String>,
}

/// One invoice row to reconcile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InvoiceLine {
    pub item_code: String,

    #[schemars(description = "Invoice date in any supported encoding")]
    pub invoice_date: RawDate,

    #[schemars(description = "Signed quantity. Negative values denote a return.")]
    pub quantity: f64,

    #[schemars(description = "Signed line total, same sign convention as quantity")]
    pub total_amount: f64,

    #[serde(default)]
    pub context: Option<LineContext>,

    #[serde(flatten, default)]
    #[schemars(description = "Any other source columns, passed through untouched")]
    pub extra: BTreeMap<String, Value>,
}

impl InvoiceLine {
    pub fn new(
        item_code: impl Into<String>,
        invoice_date: impl Into<RawDate>,
        quantity: f64,
        total_amount: f64,
    ) -> Self {
        Self {
            item_code: item_code.into(),
            invoice_date: invoice_date.into(),
            quantity,
            total_amount,
            context: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn is_return(&self) -> bool {
        self.quantity < 0.0 || self.total_amount < 0.0
    }
}

/// Outcome tag of a reconciled line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineStatus {
    Matched,
    MismatchHigh,
    MismatchLow,
    NoPrice,
    NoPeriod,
    Return,
    SingleUnitSkip,
}

impl LineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Matched => "matched",
            LineStatus::MismatchHigh => "mismatch-high",
            LineStatus::MismatchLow => "mismatch-low",
            LineStatus::NoPrice => "no-price",
            LineStatus::NoPeriod => "no-period",
            LineStatus::Return => "return",
            LineStatus::SingleUnitSkip => "single-unit-skip",
        }
    }

    pub fn is_mismatch(&self) -> bool {
        matches!(self, LineStatus::MismatchHigh | LineStatus::MismatchLow)
    }
}

/// Operator decision recorded on a line after a bulk review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    BulkAccepted,
    BulkSkipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub tier_label: String,
    pub unit_price: f64,
    pub unit_price_incl_tax: f64,
    pub allocated_qty: u32,
    #[serde(default)]
    pub is_promotion: bool,
}

/// A split of the invoiced quantity across price tiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub entries: Vec<AllocationEntry>,
}

impl Allocation {
    pub fn total_quantity(&self) -> u32 {
        self.entries.iter().map(|e| e.allocated_qty).sum()
    }

    pub fn total_amount(&self) -> f64 {
        self.entries
            .iter()
            .map(|e| e.allocated_qty as f64 * e.unit_price)
            .sum()
    }

    /// Compact form such as "2 x Standard @ 100.00 + 2 x Promo @ 50.00".
    pub fn describe(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{} x {} @ {:.2}", e.allocated_qty, e.tier_label, e.unit_price))
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

/// A price period that covered the invoice date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedPeriod {
    pub label: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub price_excl_tax: f64,
    pub price_incl_tax: f64,
    pub price_invoice_basis: f64,
    #[serde(default)]
    pub is_promotion: bool,
}

impl MatchedPeriod {
    pub fn describe(&self) -> String {
        let end = self
            .end_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "open".to_string());
        format!(
            "{} {}..{} @ {:.2}",
            self.label,
            self.start_date.format("%Y-%m-%d"),
            end,
            self.price_excl_tax
        )
    }
}

/// A what-if explanation built from a synthetic discount, never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticCandidate {
    pub description: String,
    pub standard_price: f64,
    pub promo_unit_price: f64,
    pub standard_qty: u32,
    pub promo_qty: u32,
    pub calculated_amount: f64,
    pub diff_percent: f64,
}

/// An invoice line plus everything the engine concluded about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedLine {
    pub line: InvoiceLine,
    pub normalized_date: Option<NaiveDate>,
    pub is_return: bool,
    /// Absolute quantity once the return flag is captured.
    pub quantity: f64,
    /// Absolute amount once the return flag is captured.
    pub amount: f64,
    pub matched_periods: Vec<MatchedPeriod>,
    pub expected_unit_price: Option<f64>,
    pub allocation: Option<Allocation>,
    pub calculated_amount: Option<f64>,
    pub invoice_basis_amount: Option<f64>,
    /// Observed minus computed amount.
    pub diff: Option<f64>,
    pub diff_percent: Option<f64>,
    /// 0-100; `None` when not applicable (returns).
    pub confidence: Option<f64>,
    pub status: LineStatus,
    pub suggestions: Vec<SyntheticCandidate>,
    pub trace: Vec<String>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
}

impl EnrichedLine {
    pub fn trace_text(&self) -> String {
        self.trace.join("\n")
    }

    pub fn item_code(&self) -> &str {
        &self.line.item_code
    }

    /// Below the threshold and carrying a computed diff.
    pub fn is_suspect(&self, confidence_threshold: f64) -> bool {
        match (self.confidence, self.diff_percent) {
            (Some(confidence), Some(_)) => confidence < confidence_threshold * 100.0,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternType {
    Discount,
    Markup,
    Mixed,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuggestedAction {
    BulkAccept,
    NeedsReview,
    RowByRow,
}

/// Cross-row diff trend for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPattern {
    pub item_code: String,
    pub row_count: usize,
    pub price_tier_count: usize,
    pub avg_diff_percent: f64,
    pub min_diff_percent: f64,
    pub max_diff_percent: f64,
    pub consistency: f64,
    pub total_diff: f64,
    /// Mean of observed / computed amount; 0.9 reads as "charged at 90%".
    pub implied_price_ratio: f64,
    pub pattern_type: PatternType,
    pub suggested_action: SuggestedAction,
    pub suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Accept,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BulkDecision {
    pub item_code: String,
    pub action: BulkAction,
}

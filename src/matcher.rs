use crate::index::{PriceIndex, PricePeriod};
use chrono::NaiveDate;

/// Result of placing an item and a date against the price list.
#[derive(Debug, Clone, PartialEq)]
pub enum PeriodLookup<'a> {
    /// One or more tiers cover the date, primary (highest price) first.
    Active(Vec<&'a PricePeriod>),
    /// The item is priced, but not on this date.
    NoPeriod {
        nearest_before: Option<&'a PricePeriod>,
        nearest_after: Option<&'a PricePeriod>,
    },
    /// The item is absent from the price list.
    NoPrice,
}

/// Every period of `item_code` whose interval contains `date`.
pub fn find_all_active<'a>(
    index: &'a PriceIndex,
    item_code: &str,
    date: NaiveDate,
) -> Vec<&'a PricePeriod> {
    index
        .history(item_code)
        .map(|history| history.periods.iter().filter(|p| p.contains(date)).collect())
        .unwrap_or_default()
}

/// First active period in index order: the standard price when several
/// tiers share a start date.
pub fn find_primary<'a>(
    index: &'a PriceIndex,
    item_code: &str,
    date: NaiveDate,
) -> Option<&'a PricePeriod> {
    index
        .history(item_code)?
        .periods
        .iter()
        .find(|p| p.contains(date))
}

pub fn lookup<'a>(index: &'a PriceIndex, item_code: &str, date: NaiveDate) -> PeriodLookup<'a> {
    let Some(history) = index.history(item_code) else {
        return PeriodLookup::NoPrice;
    };

    let active: Vec<&PricePeriod> = history.periods.iter().filter(|p| p.contains(date)).collect();
    if !active.is_empty() {
        return PeriodLookup::Active(active);
    }

    let nearest_before = history
        .periods
        .iter()
        .filter(|p| p.ends_before(date))
        .max_by_key(|p| p.end_date);
    let nearest_after = history
        .periods
        .iter()
        .filter(|p| p.start_date > date)
        .min_by_key(|p| p.start_date);

    PeriodLookup::NoPeriod {
        nearest_before,
        nearest_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PriceTier;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn tier(
        start: NaiveDate,
        end: Option<NaiveDate>,
        price: f64,
        label: Option<&str>,
    ) -> PriceTier {
        PriceTier {
            item_code: "SK-1".to_string(),
            start_date: start,
            end_date: end,
            price_excl_tax: price,
            price_incl_tax: price,
            price_invoice_basis: price,
            label: label.map(str::to_string),
        }
    }

    fn sample_index() -> PriceIndex {
        PriceIndex::build(&[
            tier(date(2025, 1, 1), Some(date(2025, 6, 30)), 90.0, None),
            tier(date(2026, 1, 1), None, 50.0, Some("Promo")),
            tier(date(2026, 1, 1), None, 100.0, None),
        ])
    }

    #[test]
    fn test_find_all_active_returns_overlapping_tiers() {
        let index = sample_index();
        let active = find_all_active(&index, "SK-1", date(2026, 1, 6));
        assert_eq!(active.len(), 2);
        assert!((active[0].tier.price_excl_tax - 100.0).abs() < f64::EPSILON);
        assert!((active[1].tier.price_excl_tax - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_find_primary_is_highest_price() {
        let index = sample_index();
        let primary = find_primary(&index, "SK-1", date(2026, 1, 6)).unwrap();
        assert!((primary.tier.price_excl_tax - 100.0).abs() < f64::EPSILON);
        assert!(find_primary(&index, "SK-1", date(2025, 9, 1)).is_none());
        assert!(find_primary(&index, "UNKNOWN", date(2026, 1, 6)).is_none());
    }

    #[test]
    fn test_lookup_distinguishes_no_price_from_no_period() {
        let index = sample_index();
        assert_eq!(lookup(&index, "UNKNOWN", date(2026, 1, 6)), PeriodLookup::NoPrice);

        match lookup(&index, "SK-1", date(2025, 9, 1)) {
            PeriodLookup::NoPeriod {
                nearest_before,
                nearest_after,
            } => {
                assert_eq!(nearest_before.unwrap().end_date, Some(date(2025, 6, 30)));
                assert_eq!(nearest_after.unwrap().start_date, date(2026, 1, 1));
            }
            other => panic!("expected NoPeriod, got {:?}", other),
        }

        match lookup(&index, "SK-1", date(2024, 1, 1)) {
            PeriodLookup::NoPeriod {
                nearest_before,
                nearest_after,
            } => {
                assert!(nearest_before.is_none());
                assert_eq!(nearest_after.unwrap().start_date, date(2025, 1, 1));
            }
            other => panic!("expected NoPeriod, got {:?}", other),
        }
    }

    #[test]
    fn test_lookup_active() {
        let index = sample_index();
        match lookup(&index, "SK-1", date(2025, 3, 1)) {
            PeriodLookup::Active(periods) => assert_eq!(periods.len(), 1),
            other => panic!("expected Active, got {:?}", other),
        }
    }
}

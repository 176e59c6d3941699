//! Per-asset indicator battery.
//!
//! Every indicator is a pure function of one asset's projected snapshot
//! rows at the fixed lookback offsets. Checked decimal arithmetic
//! throughout: a zero denominator, a missing input, or an overflow omits
//! the indicator for that asset instead of writing null or zero.

use rust_decimal::{Decimal, MathematicalOps};
use std::collections::HashMap;

use crate::entities::indicator_data;
use crate::services::store::SnapshotPoint;

/// Lookback offsets, in minutes, fetched in one history window per bucket.
pub const OFFSETS_MINUTES: [i64; 9] = [0, 3, 6, 9, 12, 60, 180, 480, 1440];

/// Scale applied to written indicator values.
pub const VALUE_SCALE: u32 = 12;

const MS_PER_MINUTE: i64 = 60_000;

/// One asset's rows keyed by lookback offset (minutes).
#[derive(Debug, Default, Clone)]
pub struct AssetWindow {
    by_offset: HashMap<i64, SnapshotPoint>,
}

impl AssetWindow {
    pub fn insert(&mut self, offset_minutes: i64, point: SnapshotPoint) {
        self.by_offset.insert(offset_minutes, point);
    }

    pub fn has_current(&self) -> bool {
        self.by_offset.contains_key(&0)
    }

    fn price(&self, offset_minutes: i64) -> Option<Decimal> {
        self.by_offset
            .get(&offset_minutes)
            .and_then(|p| p.current_price)
    }

    fn volume(&self, offset_minutes: i64) -> Option<Decimal> {
        self.by_offset
            .get(&offset_minutes)
            .and_then(|p| p.total_volume)
    }

    fn market_cap(&self, offset_minutes: i64) -> Option<Decimal> {
        self.by_offset
            .get(&offset_minutes)
            .and_then(|p| p.market_cap)
    }
}

/// Group a history window read into per-asset windows. Rows whose time does
/// not land exactly on a known offset are dropped; row order is irrelevant.
pub fn group_window(
    aligned_time: i64,
    rows: Vec<SnapshotPoint>,
) -> HashMap<String, AssetWindow> {
    let mut grouped: HashMap<String, AssetWindow> = HashMap::new();
    for row in rows {
        let delta = aligned_time - row.time;
        if delta < 0 || delta % MS_PER_MINUTE != 0 {
            continue;
        }
        let offset = delta / MS_PER_MINUTE;
        if !OFFSETS_MINUTES.contains(&offset) {
            continue;
        }
        grouped
            .entry(row.coin_id.clone())
            .or_default()
            .insert(offset, row);
    }
    grouped
}

/// Closed set of indicator codes, fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    PriceChange3m,
    PriceChange6m,
    PriceChange12m,
    PriceChange24h,
    VolumeChange3m,
    VolumeChange6m,
    VolumeChange9m,
    VolumeChange1h,
    VolumeChange3h,
    VolumeChange8h,
    VolumeChange24h,
    VolumeChangeRatio3m,
    AvgVolume3m24h,
    CapitalInflowIntensity3m,
    VolumeImpactLogRatio,
}

pub const ALL_INDICATORS: [Indicator; 15] = [
    Indicator::PriceChange3m,
    Indicator::PriceChange6m,
    Indicator::PriceChange12m,
    Indicator::PriceChange24h,
    Indicator::VolumeChange3m,
    Indicator::VolumeChange6m,
    Indicator::VolumeChange9m,
    Indicator::VolumeChange1h,
    Indicator::VolumeChange3h,
    Indicator::VolumeChange8h,
    Indicator::VolumeChange24h,
    Indicator::VolumeChangeRatio3m,
    Indicator::AvgVolume3m24h,
    Indicator::CapitalInflowIntensity3m,
    Indicator::VolumeImpactLogRatio,
];

impl Indicator {
    pub fn code(&self) -> &'static str {
        match self {
            Indicator::PriceChange3m => "PRICE_CHANGE_3M",
            Indicator::PriceChange6m => "PRICE_CHANGE_6M",
            Indicator::PriceChange12m => "PRICE_CHANGE_12M",
            Indicator::PriceChange24h => "PRICE_CHANGE_24H",
            Indicator::VolumeChange3m => "VOLUME_CHANGE_3M",
            Indicator::VolumeChange6m => "VOLUME_CHANGE_6M",
            Indicator::VolumeChange9m => "VOLUME_CHANGE_9M",
            Indicator::VolumeChange1h => "VOLUME_CHANGE_1H",
            Indicator::VolumeChange3h => "VOLUME_CHANGE_3H",
            Indicator::VolumeChange8h => "VOLUME_CHANGE_8H",
            Indicator::VolumeChange24h => "VOLUME_CHANGE_24H",
            Indicator::VolumeChangeRatio3m => "VOLUME_CHANGE_RATIO_3M",
            Indicator::AvgVolume3m24h => "AVG_VOLUME_3M_24H",
            Indicator::CapitalInflowIntensity3m => "CAPITAL_INFLOW_INTENSITY_3M",
            Indicator::VolumeImpactLogRatio => "VOLUME_IMPACT_LOG_RATIO",
        }
    }

    pub fn timeframe(&self) -> &'static str {
        match self {
            Indicator::PriceChange3m | Indicator::VolumeChange3m => "3m",
            Indicator::PriceChange6m | Indicator::VolumeChange6m => "6m",
            Indicator::VolumeChange9m => "9m",
            Indicator::PriceChange12m => "12m",
            Indicator::VolumeChange1h => "1h",
            Indicator::VolumeChange3h => "3h",
            Indicator::VolumeChange8h => "8h",
            Indicator::PriceChange24h | Indicator::VolumeChange24h => "24h",
            Indicator::AvgVolume3m24h => "24h",
            Indicator::VolumeChangeRatio3m
            | Indicator::CapitalInflowIntensity3m
            | Indicator::VolumeImpactLogRatio => "3m",
        }
    }

    /// Evaluate against one asset's window. `None` means "not written".
    pub fn compute(&self, w: &AssetWindow) -> Option<Decimal> {
        match self {
            Indicator::PriceChange3m => rel_change(w.price(0)?, w.price(3)?),
            Indicator::PriceChange6m => rel_change(w.price(0)?, w.price(6)?),
            Indicator::PriceChange12m => rel_change(w.price(0)?, w.price(12)?),
            Indicator::PriceChange24h => rel_change(w.price(0)?, w.price(1440)?),
            Indicator::VolumeChange3m => rel_change(w.volume(0)?, w.volume(3)?),
            Indicator::VolumeChange6m => rel_change(w.volume(0)?, w.volume(6)?),
            Indicator::VolumeChange9m => rel_change(w.volume(0)?, w.volume(9)?),
            Indicator::VolumeChange1h => rel_change(w.volume(0)?, w.volume(60)?),
            Indicator::VolumeChange3h => rel_change(w.volume(0)?, w.volume(180)?),
            Indicator::VolumeChange8h => rel_change(w.volume(0)?, w.volume(480)?),
            Indicator::VolumeChange24h => rel_change(w.volume(0)?, w.volume(1440)?),
            Indicator::VolumeChangeRatio3m => {
                let baseline = w.volume(1440)?;
                if baseline.is_zero() {
                    return None;
                }
                w.volume(0)?
                    .checked_sub(w.volume(3)?)?
                    .checked_div(baseline)
            }
            Indicator::AvgVolume3m24h => {
                let present: Vec<Decimal> = OFFSETS_MINUTES
                    .iter()
                    .filter_map(|off| w.volume(*off))
                    .collect();
                if present.is_empty() {
                    return None;
                }
                let mut sum = Decimal::ZERO;
                for v in &present {
                    sum = sum.checked_add(*v)?;
                }
                sum.checked_div(Decimal::from(present.len() as u64))
            }
            Indicator::CapitalInflowIntensity3m => {
                rel_change(w.price(0)?, w.price(3)?)?.checked_mul(w.volume(0)?)
            }
            Indicator::VolumeImpactLogRatio => {
                let market_cap = w.market_cap(0)?;
                if market_cap <= Decimal::ONE {
                    return None;
                }
                let log_cap = market_cap.ln();
                if log_cap <= Decimal::ZERO {
                    return None;
                }
                w.volume(0)?
                    .checked_sub(w.volume(3)?)?
                    .checked_div(log_cap)
            }
        }
    }
}

/// `(now - then) / then`, omitted on a zero denominator or overflow.
fn rel_change(now: Decimal, then: Decimal) -> Option<Decimal> {
    if then.is_zero() {
        return None;
    }
    now.checked_sub(then)?.checked_div(then)
}

/// Result of evaluating the whole battery for one bucket.
#[derive(Debug, Default)]
pub struct BucketOutput {
    pub rows: Vec<indicator_data::Model>,
    pub assets_written: usize,
    pub assets_skipped: usize,
}

/// Evaluate every indicator for every asset with a current-offset row.
/// Assets without one are skipped and counted; output order follows the
/// asset iteration order and carries no semantics.
pub fn compute_bucket_rows(
    aligned_time: i64,
    window: &HashMap<String, AssetWindow>,
    computed_at: i64,
) -> BucketOutput {
    let mut out = BucketOutput::default();

    for (coin_id, asset) in window {
        if !asset.has_current() {
            out.assets_skipped += 1;
            continue;
        }

        let mut wrote_any = false;
        for indicator in ALL_INDICATORS {
            if let Some(value) = indicator.compute(asset) {
                out.rows.push(indicator_data::Model {
                    time: aligned_time,
                    coin_id: coin_id.clone(),
                    indicator_name: indicator.code().to_string(),
                    timeframe: indicator.timeframe().to_string(),
                    indicator_value: value.round_dp(VALUE_SCALE),
                    computed_at,
                });
                wrote_any = true;
            }
        }

        if wrote_any {
            out.assets_written += 1;
        } else {
            out.assets_skipped += 1;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    const T: i64 = 1_700_000_000_000;

    fn point(
        coin_id: &str,
        time: i64,
        price: Option<&str>,
        volume: Option<&str>,
        market_cap: Option<&str>,
    ) -> SnapshotPoint {
        SnapshotPoint {
            coin_id: coin_id.to_string(),
            time,
            current_price: price.map(|p| Decimal::from_str(p).unwrap()),
            total_volume: volume.map(|v| Decimal::from_str(v).unwrap()),
            market_cap: market_cap.map(|m| Decimal::from_str(m).unwrap()),
        }
    }

    /// Scenario: btc present at offsets 0, 3, 6 and 1440 minutes with
    /// prices [52000, 51000, 50000, 48000] and volumes [1200, 1000, 900, 800].
    fn btc_rows() -> Vec<SnapshotPoint> {
        vec![
            point("btc", T, Some("52000"), Some("1200"), None),
            point("btc", T - 3 * 60_000, Some("51000"), Some("1000"), None),
            point("btc", T - 6 * 60_000, Some("50000"), Some("900"), None),
            point("btc", T - 1440 * 60_000, Some("48000"), Some("800"), None),
        ]
    }

    fn btc_window() -> AssetWindow {
        group_window(T, btc_rows()).remove("btc").unwrap()
    }

    #[rstest]
    #[case(Indicator::PriceChange3m, "0.019607843137")]
    #[case(Indicator::PriceChange6m, "0.04")]
    #[case(Indicator::PriceChange24h, "0.083333333333")]
    #[case(Indicator::VolumeChange3m, "0.2")]
    #[case(Indicator::VolumeChange6m, "0.333333333333")]
    #[case(Indicator::VolumeChange24h, "0.5")]
    #[case(Indicator::VolumeChangeRatio3m, "0.25")]
    #[case(Indicator::AvgVolume3m24h, "975")]
    #[case(Indicator::CapitalInflowIntensity3m, "23.529411764706")]
    fn battery_reference_values(#[case] indicator: Indicator, #[case] expected: &str) {
        let window = btc_window();
        let value = indicator.compute(&window).unwrap().round_dp(VALUE_SCALE);
        assert_eq!(value, Decimal::from_str(expected).unwrap());
    }

    #[rstest]
    #[case(Indicator::PriceChange12m)]
    #[case(Indicator::VolumeChange1h)]
    #[case(Indicator::VolumeChange3h)]
    #[case(Indicator::VolumeChange8h)]
    #[case(Indicator::VolumeChange9m)]
    #[case(Indicator::VolumeImpactLogRatio)]
    fn absent_offsets_are_omitted(#[case] indicator: Indicator) {
        let window = btc_window();
        assert_eq!(indicator.compute(&window), None);
    }

    #[test]
    fn missing_3m_row_omits_its_dependents() {
        let rows: Vec<SnapshotPoint> = btc_rows()
            .into_iter()
            .filter(|r| r.time != T - 3 * 60_000)
            .collect();
        let window = group_window(T, rows).remove("btc").unwrap();

        for indicator in [
            Indicator::PriceChange3m,
            Indicator::VolumeChange3m,
            Indicator::VolumeChangeRatio3m,
            Indicator::CapitalInflowIntensity3m,
        ] {
            assert_eq!(indicator.compute(&window), None, "{}", indicator.code());
        }

        // The rest of the battery is unaffected by the missing row.
        assert_eq!(
            Indicator::PriceChange6m.compute(&window),
            Some(Decimal::from_str("0.04").unwrap())
        );
        assert_eq!(
            Indicator::PriceChange24h.compute(&window).map(|v| v.round_dp(6)),
            Some(Decimal::from_str("0.083333").unwrap())
        );
        // Mean over the offsets still present: (1200 + 900 + 800) / 3
        assert_eq!(
            Indicator::AvgVolume3m24h.compute(&window).map(|v| v.round_dp(6)),
            Some(Decimal::from_str("966.666667").unwrap())
        );
    }

    #[test]
    fn zero_denominator_is_omitted() {
        let rows = vec![
            point("x", T, Some("10"), Some("5"), None),
            point("x", T - 3 * 60_000, Some("0"), Some("0"), None),
        ];
        let window = group_window(T, rows).remove("x").unwrap();
        assert_eq!(Indicator::PriceChange3m.compute(&window), None);
        assert_eq!(Indicator::VolumeChange3m.compute(&window), None);
    }

    #[test]
    fn log_ratio_uses_current_market_cap() {
        let rows = vec![
            point("x", T, None, Some("1100"), Some("2718281828")),
            point("x", T - 3 * 60_000, None, Some("1000"), None),
        ];
        let window = group_window(T, rows).remove("x").unwrap();
        let value = Indicator::VolumeImpactLogRatio.compute(&window).unwrap();
        // ln(2718281828) ≈ 21.723265, so 100 / 21.723265 ≈ 4.60336
        assert_eq!(value.round_dp(3), Decimal::from_str("4.603").unwrap());

        // Market cap at or below 1 has no usable logarithm.
        let rows = vec![
            point("y", T, None, Some("1100"), Some("1")),
            point("y", T - 3 * 60_000, None, Some("1000"), None),
        ];
        let window = group_window(T, rows).remove("y").unwrap();
        assert_eq!(Indicator::VolumeImpactLogRatio.compute(&window), None);
    }

    #[test]
    fn grouping_is_order_insensitive() {
        let mut rows = btc_rows();
        rows.extend(vec![
            point("eth", T, Some("3000"), Some("500"), None),
            point("eth", T - 3 * 60_000, Some("2900"), Some("450"), None),
        ]);

        let forward = compute_bucket_rows(T, &group_window(T, rows.clone()), 1);
        rows.reverse();
        let reversed = compute_bucket_rows(T, &group_window(T, rows), 1);

        let key = |m: &indicator_data::Model| {
            (
                m.coin_id.clone(),
                m.indicator_name.clone(),
                m.timeframe.clone(),
                m.indicator_value,
            )
        };
        let mut a: Vec<_> = forward.rows.iter().map(key).collect();
        let mut b: Vec<_> = reversed.rows.iter().map(key).collect();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn rows_outside_known_offsets_are_dropped() {
        let rows = vec![
            point("btc", T, Some("100"), None, None),
            // 7 minutes back: not a battery offset
            point("btc", T - 7 * 60_000, Some("90"), None, None),
            // In the future of the bucket
            point("btc", T + 3 * 60_000, Some("110"), None, None),
        ];
        let window = group_window(T, rows).remove("btc").unwrap();
        assert!(window.has_current());
        assert_eq!(window.price(3), None);
        assert_eq!(window.price(7), None);
    }

    #[test]
    fn assets_without_current_row_are_skipped() {
        let rows = vec![point("stale", T - 3 * 60_000, Some("10"), Some("1"), None)];
        let out = compute_bucket_rows(T, &group_window(T, rows), 1);
        assert!(out.rows.is_empty());
        assert_eq!(out.assets_written, 0);
        assert_eq!(out.assets_skipped, 1);
    }

    #[test]
    fn bucket_rows_carry_key_and_scale() {
        let out = compute_bucket_rows(T, &group_window(T, btc_rows()), 42);
        assert!(!out.rows.is_empty());
        for row in &out.rows {
            assert_eq!(row.time, T);
            assert_eq!(row.coin_id, "btc");
            assert_eq!(row.computed_at, 42);
            assert!(row.indicator_value.scale() <= VALUE_SCALE);
        }
        // One row per computable indicator, none duplicated.
        let mut names: Vec<_> = out
            .rows
            .iter()
            .map(|r| (r.indicator_name.clone(), r.timeframe.clone()))
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), out.rows.len());
    }
}

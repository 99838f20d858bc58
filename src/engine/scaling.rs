//! Reconciles window-normalized pulls against a single monthly baseline.
//!
//! Every daily chunk comes back scaled 0–100 *within its own window*, so values
//! from different chunks are not comparable. The monthly baseline is fetched in
//! one query over the whole history and is therefore internally consistent; each
//! month's ratio `baseline / mean(daily)` maps that month's daily values onto
//! the baseline's scale.
//!
//! Two entry points:
//!
//! - [`scale_daily`]: one pull: concatenated chunks + the pull's own baseline.
//! - [`aggregate`]: many stored pulls: per-date median, optionally after
//!   re-normalizing each pull against the stored monthly median.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

use super::types::{
    month_index, month_start, RobustRow, RobustTable, ScaledRow, ScaledTable, TimeSeries,
};

/// How stored pulls are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Pulls share one scaling convention: take the per-date median directly.
    Uniform,
    /// Pulls are not mutually comparable: rescale each onto the monthly median first.
    Normalized,
}

impl Aggregation {
    pub fn from_uniform(uniform: bool) -> Self {
        if uniform {
            Aggregation::Uniform
        } else {
            Aggregation::Normalized
        }
    }
}

/// Concatenate chunk results in chronological order into one daily series.
pub fn concat_chunks<I>(chunks: I) -> TimeSeries
where
    I: IntoIterator<Item = TimeSeries>,
{
    let mut raw = TimeSeries::new();
    for chunk in chunks {
        raw.extend(chunk);
    }
    raw
}

/// Mean of the observed values in each calendar month, keyed by month start.
pub fn monthly_means(series: &TimeSeries) -> TimeSeries {
    let mut sums: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for (date, value) in series.iter() {
        let entry = sums.entry(month_start(date)).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(month, (sum, n))| (month, sum / n as f64))
        .collect()
}

/// Value of `series` at every `index` date, carrying the last observation forward.
///
/// The carry is seeded from the latest observation before `index[0]`, so a value
/// that precedes the index still fills it. Dates before any observation stay absent.
pub fn forward_fill(index: &[NaiveDate], series: &TimeSeries) -> TimeSeries {
    let mut last = index
        .first()
        .and_then(|first| series.last_before(*first))
        .map(|(_, v)| v);
    let mut filled = TimeSeries::new();
    for &date in index {
        if let Some(v) = series.get(date) {
            last = Some(v);
        }
        if let Some(v) = last {
            filled.insert(date, v);
        }
    }
    filled
}

/// Per-month `baseline / observed`, forward-filled across undefined months.
///
/// A month is undefined when either side is missing or the observed mean is zero.
/// Months before the first defined ratio stay absent.
pub fn scale_factors(
    months: &[NaiveDate],
    baseline: &TimeSeries,
    observed: &TimeSeries,
) -> TimeSeries {
    let mut last: Option<f64> = None;
    let mut factors = TimeSeries::new();
    for &month in months {
        let ratio = match (baseline.get(month), observed.get(month)) {
            (Some(b), Some(o)) if o != 0.0 => Some(b / o).filter(|r| r.is_finite()),
            _ => None,
        };
        if ratio.is_some() {
            last = ratio;
        }
        if let Some(r) = last {
            factors.insert(month, r);
        }
    }
    factors
}

/// Scale one pull's daily values onto its monthly baseline.
///
/// Output has one row per day present in `raw`, carrying the unscaled value,
/// the forward-filled baseline for that month, the month's scale factor and
/// the scaled value. Days whose month has no defined scale get no scaled value.
pub fn scale_daily(raw: &TimeSeries, baseline: &TimeSeries) -> ScaledTable {
    let (Some(first), Some(last)) = (raw.first_date(), raw.last_date()) else {
        return ScaledTable::default();
    };
    let months = month_index(first, last);

    let observed = forward_fill(&months, &monthly_means(raw));
    let base = forward_fill(&months, &monthly_means(baseline));
    let scale = scale_factors(&months, &base, &observed);

    let rows = raw
        .iter()
        .map(|(date, unscaled)| {
            let month = month_start(date);
            let factor = scale.get(month);
            ScaledRow {
                date,
                unscaled,
                monthly: base.get(month),
                scale: factor,
                scaled: factor.map(|s| unscaled * s),
            }
        })
        .collect();
    ScaledTable { rows }
}

/// Median of the present values across `pulls` for every date any pull covers.
///
/// Missing values are skipped; a date where every pull is missing is absent.
pub fn cross_median(pulls: &BTreeMap<NaiveDate, TimeSeries>) -> TimeSeries {
    let mut by_date: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for series in pulls.values() {
        for (date, value) in series.iter() {
            by_date.entry(date).or_default().push(value);
        }
    }
    by_date
        .into_iter()
        .filter_map(|(date, mut values)| median(&mut values).map(|m| (date, m)))
        .collect()
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Rescale one pull onto the monthly baseline.
///
/// The per-month factor is `mean(pull in month) / baseline[month]`, defined only
/// when both exist and the result is finite and non-zero; undefined months reuse
/// the previous month's factor. Each daily value is divided by its month's factor.
pub fn normalize_pull(pull: &TimeSeries, baseline: &TimeSeries) -> TimeSeries {
    let (Some(first), Some(last)) = (pull.first_date(), pull.last_date()) else {
        return TimeSeries::new();
    };
    let months = month_index(first, last);
    let means = monthly_means(pull);
    let base = monthly_means(baseline);

    let mut carried: Option<f64> = None;
    let mut factors = TimeSeries::new();
    for &month in &months {
        let factor = match (means.get(month), base.get(month)) {
            (Some(m), Some(b)) if b != 0.0 => Some(m / b).filter(|f| f.is_finite() && *f != 0.0),
            _ => None,
        };
        if factor.is_some() {
            carried = factor;
        }
        if let Some(f) = carried {
            factors.insert(month, f);
        }
    }

    pull.iter()
        .filter_map(|(date, value)| {
            factors
                .get(month_start(date))
                .map(|factor| (date, value / factor))
        })
        .collect()
}

/// Combine stored daily pulls into one robust daily series alongside the monthly baseline.
///
/// Rows cover every date present in any pull. The monthly column is the baseline
/// forward-filled onto each row's month, so it has no gaps after its first value.
pub fn aggregate(
    daily: &BTreeMap<NaiveDate, TimeSeries>,
    monthly_baseline: &TimeSeries,
    policy: Aggregation,
) -> RobustTable {
    let combined = match policy {
        Aggregation::Uniform => cross_median(daily),
        Aggregation::Normalized => {
            let normalized: BTreeMap<NaiveDate, TimeSeries> = daily
                .iter()
                .map(|(pulled, series)| (*pulled, normalize_pull(series, monthly_baseline)))
                .collect();
            cross_median(&normalized)
        }
    };

    let dates: BTreeSet<NaiveDate> = daily.values().flat_map(TimeSeries::dates).collect();
    let (Some(first), Some(last)) = (dates.first(), dates.last()) else {
        return RobustTable::default();
    };
    let months = month_index(*first, *last);
    let monthly = forward_fill(&months, &monthly_means(monthly_baseline));

    let rows = dates
        .into_iter()
        .map(|date| RobustRow {
            date,
            daily: combined.get(date),
            monthly: monthly.get(month_start(date)),
        })
        .collect();
    RobustTable { rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::month_end;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Every day of the months `[first, last]` set to `value(date)`.
    fn daily_fill(
        first: NaiveDate,
        last: NaiveDate,
        value: impl Fn(NaiveDate) -> f64,
    ) -> TimeSeries {
        let mut ts = TimeSeries::new();
        let mut cur = first;
        while cur <= last {
            ts.insert(cur, value(cur));
            cur = cur.succ_opt().unwrap();
        }
        ts
    }

    fn monthly(values: &[(NaiveDate, f64)]) -> TimeSeries {
        values.iter().copied().collect()
    }

    #[test]
    fn constant_daily_scales_to_baseline_per_month() {
        let raw = daily_fill(d(2020, 1, 1), d(2020, 2, 29), |_| 5.0);
        let baseline = monthly(&[(d(2020, 1, 1), 10.0), (d(2020, 2, 1), 20.0)]);

        let table = scale_daily(&raw, &baseline);
        assert_eq!(table.len(), 60);

        let jan = table.rows.iter().find(|r| r.date == d(2020, 1, 5)).unwrap();
        assert_eq!(jan.scale, Some(2.0));
        assert_eq!(jan.monthly, Some(10.0));

        let feb10 = table
            .rows
            .iter()
            .find(|r| r.date == d(2020, 2, 10))
            .unwrap();
        assert_eq!(feb10.unscaled, 5.0);
        assert_eq!(feb10.scale, Some(4.0));
        assert_eq!(feb10.scaled, Some(20.0));
    }

    #[test]
    fn scaled_monthly_mean_recovers_constant_baseline() {
        let k = 37.0;
        // Varying daily shape, different within-window normalization per month.
        let raw = daily_fill(d(2019, 1, 1), d(2019, 6, 30), |date| {
            use chrono::Datelike;
            f64::from(date.day() % 7 + 1) * f64::from(date.month())
        });
        let baseline: TimeSeries = month_index(d(2019, 1, 1), d(2019, 6, 1))
            .into_iter()
            .map(|m| (m, k))
            .collect();

        let table = scale_daily(&raw, &baseline);
        let observed = monthly_means(&raw);
        for row in &table.rows {
            let m = observed.get(month_start(row.date)).unwrap();
            assert!((row.scale.unwrap() - k / m).abs() < 1e-12);
        }
        for (_, mean) in monthly_means(&table.scaled_series()).iter() {
            assert!((mean - k).abs() < 1e-9, "monthly mean {mean} != {k}");
        }
    }

    #[test]
    fn zero_observed_month_reuses_previous_scale() {
        let raw = daily_fill(d(2020, 1, 1), d(2020, 3, 31), |date| {
            use chrono::Datelike;
            if date.month() == 2 {
                0.0
            } else {
                4.0
            }
        });
        let baseline = monthly(&[
            (d(2020, 1, 1), 8.0),
            (d(2020, 2, 1), 0.0),
            (d(2020, 3, 1), 12.0),
        ]);
        let table = scale_daily(&raw, &baseline);
        let feb = table
            .rows
            .iter()
            .find(|r| r.date == d(2020, 2, 14))
            .unwrap();
        assert_eq!(feb.scale, Some(2.0));
        assert_eq!(feb.scaled, Some(0.0));
        let mar = table.rows.iter().find(|r| r.date == d(2020, 3, 1)).unwrap();
        assert_eq!(mar.scale, Some(3.0));
    }

    #[test]
    fn leading_zero_month_leaves_scale_undefined() {
        let raw = daily_fill(d(2020, 1, 1), d(2020, 2, 29), |date| {
            use chrono::Datelike;
            if date.month() == 1 {
                0.0
            } else {
                5.0
            }
        });
        let baseline = monthly(&[(d(2020, 1, 1), 3.0), (d(2020, 2, 1), 10.0)]);
        let table = scale_daily(&raw, &baseline);

        let jan = table
            .rows
            .iter()
            .find(|r| r.date == d(2020, 1, 20))
            .unwrap();
        assert_eq!(jan.scale, None);
        assert_eq!(jan.scaled, None);
        assert_eq!(jan.unscaled, 0.0);
        assert_eq!(table.scaled_series().first_date(), Some(d(2020, 2, 1)));
    }

    #[test]
    fn baseline_gaps_are_forward_filled() {
        let raw = daily_fill(d(2020, 1, 1), d(2020, 4, 30), |_| 2.0);
        // No January or March value; December carries into January.
        let baseline = monthly(&[
            (d(2019, 12, 1), 6.0),
            (d(2020, 2, 1), 8.0),
            (d(2020, 4, 1), 10.0),
        ]);
        let table = scale_daily(&raw, &baseline);
        let pick = |date| table.rows.iter().find(|r| r.date == date).unwrap().monthly;
        assert_eq!(pick(d(2020, 1, 10)), Some(6.0));
        assert_eq!(pick(d(2020, 3, 10)), Some(8.0));
        assert_eq!(pick(d(2020, 4, 10)), Some(10.0));
        assert!(table.rows.iter().all(|r| r.monthly.is_some()));
    }

    #[test]
    fn empty_raw_gives_empty_table() {
        let baseline = monthly(&[(d(2020, 1, 1), 10.0)]);
        assert!(scale_daily(&TimeSeries::new(), &baseline).is_empty());
    }

    #[test]
    fn concat_preserves_chronology_across_chunks() {
        let a = daily_fill(d(2020, 1, 1), d(2020, 1, 31), |_| 1.0);
        let b = daily_fill(d(2020, 2, 1), d(2020, 2, 29), |_| 2.0);
        let raw = concat_chunks([a, b]);
        assert_eq!(raw.len(), 60);
        assert_eq!(raw.get(d(2020, 1, 31)), Some(1.0));
        assert_eq!(raw.get(d(2020, 2, 1)), Some(2.0));
    }

    fn three_pulls() -> BTreeMap<NaiveDate, TimeSeries> {
        let mut pulls = BTreeMap::new();
        pulls.insert(
            d(2021, 3, 1),
            daily_fill(d(2020, 1, 1), d(2020, 2, 29), |_| 10.0),
        );
        pulls.insert(
            d(2021, 3, 2),
            daily_fill(d(2020, 1, 1), d(2020, 2, 29), |_| 12.0),
        );
        // An anomalous all-zero pull.
        pulls.insert(
            d(2021, 3, 3),
            daily_fill(d(2020, 1, 1), d(2020, 2, 29), |_| 0.0),
        );
        pulls
    }

    #[test]
    fn uniform_median_tolerates_one_zero_pull() {
        let baseline = monthly(&[(d(2020, 1, 1), 50.0), (d(2020, 2, 1), 60.0)]);
        let table = aggregate(&three_pulls(), &baseline, Aggregation::Uniform);
        assert_eq!(table.len(), 60);
        assert!(table.rows.iter().all(|r| r.daily == Some(10.0)));
        assert_eq!(table.rows[0].monthly, Some(50.0));
        assert_eq!(table.rows.last().unwrap().monthly, Some(60.0));
    }

    #[test]
    fn uniform_median_is_independent_of_column_order() {
        let baseline = monthly(&[(d(2020, 1, 1), 50.0)]);
        let pulls = three_pulls();
        let forward = aggregate(&pulls, &baseline, Aggregation::Uniform);

        // Same series under permuted pull labels.
        let series: Vec<TimeSeries> = pulls.values().cloned().collect();
        let mut permuted = BTreeMap::new();
        for (i, s) in series.into_iter().rev().enumerate() {
            permuted.insert(d(2022, 1, 1 + i as u32), s);
        }
        let reversed = aggregate(&permuted, &baseline, Aggregation::Uniform);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn even_count_median_averages_middle_pair() {
        let mut pulls = BTreeMap::new();
        pulls.insert(d(2021, 1, 1), monthly(&[(d(2020, 1, 1), 2.0)]));
        pulls.insert(d(2021, 1, 2), monthly(&[(d(2020, 1, 1), 6.0)]));
        assert_eq!(cross_median(&pulls).get(d(2020, 1, 1)), Some(4.0));
    }

    #[test]
    fn normalized_aggregation_puts_mixed_scales_on_the_baseline() {
        // Same shape pulled at two different normalizations.
        let mut pulls = BTreeMap::new();
        pulls.insert(
            d(2021, 5, 1),
            daily_fill(d(2020, 1, 1), d(2020, 2, 29), |_| 100.0),
        );
        pulls.insert(
            d(2021, 5, 2),
            daily_fill(d(2020, 1, 1), d(2020, 2, 29), |_| 25.0),
        );
        let baseline = monthly(&[(d(2020, 1, 1), 40.0), (d(2020, 2, 1), 80.0)]);

        let table = aggregate(&pulls, &baseline, Aggregation::Normalized);
        let jan = table.rows.iter().find(|r| r.date == d(2020, 1, 9)).unwrap();
        let feb = table.rows.iter().find(|r| r.date == d(2020, 2, 9)).unwrap();
        assert!((jan.daily.unwrap() - 40.0).abs() < 1e-12);
        assert!((feb.daily.unwrap() - 80.0).abs() < 1e-12);
    }

    #[test]
    fn normalization_carries_factor_over_zero_baseline_month() {
        let pull = daily_fill(d(2020, 1, 1), d(2020, 2, 29), |_| 10.0);
        let baseline = monthly(&[(d(2020, 1, 1), 5.0), (d(2020, 2, 1), 0.0)]);
        let normalized = normalize_pull(&pull, &baseline);
        // January factor 10/5 = 2 is reused for February.
        assert_eq!(normalized.get(d(2020, 2, 3)), Some(5.0));
    }

    #[test]
    fn aggregated_monthly_column_has_no_gaps_after_first_value() {
        let mut pulls = BTreeMap::new();
        pulls.insert(
            d(2021, 1, 1),
            daily_fill(d(2019, 11, 1), d(2020, 4, 30), |_| 3.0),
        );
        let baseline = monthly(&[(d(2019, 12, 1), 7.0), (d(2020, 3, 1), 9.0)]);
        for policy in [Aggregation::Uniform, Aggregation::Normalized] {
            let table = aggregate(&pulls, &baseline, policy);
            let first = table.rows.iter().position(|r| r.monthly.is_some()).unwrap();
            assert_eq!(table.rows[first].date, d(2019, 12, 1));
            assert!(table.rows[first..].iter().all(|r| r.monthly.is_some()));
            let feb_end = table
                .rows
                .iter()
                .find(|r| r.date == month_end(d(2020, 2, 1)))
                .unwrap();
            assert_eq!(feb_end.monthly, Some(7.0));
        }
    }
}

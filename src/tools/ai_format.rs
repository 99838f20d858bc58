use chrono::NaiveDate;

use crate::data::provider::{BuildOutcome, DailyRetrieval};
use crate::data::store::{pull_label, Dataset, Table};
use crate::engine::types::{DatasetKey, PrecisionMode, QuerySpec, ScaledTable, TimeSeries};

use super::response_types::{
    AcquireResponse, BuildResponse, DailyFromDbResponse, DatasetStatusResponse, DateRange,
    MonthlyFromDbResponse, PullInfo, RobustPoint, ScaledPoint, SeriesPoint,
};

fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn date_range(span: Option<(NaiveDate, NaiveDate)>) -> DateRange {
    DateRange {
        start: span.map(|(s, _)| fmt_date(s)),
        end: span.map(|(_, e)| fmt_date(e)),
    }
}

fn series_span(series: &TimeSeries) -> Option<(NaiveDate, NaiveDate)> {
    Some((series.first_date()?, series.last_date()?))
}

fn series_points(series: &TimeSeries) -> Vec<SeriesPoint> {
    series
        .iter()
        .map(|(date, value)| SeriesPoint {
            date: fmt_date(date),
            value,
        })
        .collect()
}

fn search_term(category: u32, term: &str, geo: &str) -> String {
    let geo = if geo.is_empty() { "worldwide" } else { geo };
    format!("'{term}' ({geo}, category {category})")
}

pub fn format_acquire(
    spec: &QuerySpec,
    precision: PrecisionMode,
    table: &ScaledTable,
    api_requests: u32,
) -> AcquireResponse {
    let term = search_term(spec.category, &spec.keyword, &spec.geo);
    let unscaled_days = table.rows.iter().filter(|r| r.scaled.is_none()).count();
    let span = table
        .rows
        .first()
        .zip(table.rows.last())
        .map(|(f, l)| (f.date, l.date));

    let summary = if table.is_empty() {
        format!("No daily data returned for {term}.")
    } else {
        let mut s = format!(
            "Scaled {} days of {term} onto one monthly baseline using {api_requests} queries.",
            table.len()
        );
        if unscaled_days > 0 {
            s.push_str(&format!(
                " {unscaled_days} days fall in months with no usable scale and are left unscaled."
            ));
        }
        s
    };

    let data = table
        .rows
        .iter()
        .map(|r| ScaledPoint {
            date: fmt_date(r.date),
            unscaled: r.unscaled,
            monthly: r.monthly,
            scale: r.scale,
            scaled: r.scaled,
        })
        .collect();

    AcquireResponse {
        summary,
        search_term: term,
        precision,
        rows: table.len(),
        unscaled_days,
        api_requests,
        date_range: date_range(span),
        data,
        suggested_next_steps: vec![
            format!(
                "Call build_database for '{}' to keep repeated pulls and aggregate them robustly.",
                spec.keyword
            ),
            "Compare 'scaled' across months; 'unscaled' is only comparable within one query window."
                .to_string(),
        ],
    }
}

pub fn format_build(key: &DatasetKey, outcome: BuildOutcome, api_requests: u32) -> BuildResponse {
    let dataset = key.to_string();
    match outcome {
        BuildOutcome::AlreadyPresent { label } => BuildResponse {
            summary: format!("{dataset} already holds today's pull {label}; nothing was fetched."),
            dataset,
            label,
            appended: false,
            reused_baseline: false,
            chunks: 0,
            monthly_points: 0,
            daily_points: 0,
            api_requests: 0,
            suggested_next_steps: vec![
                "Call get_daily_from_database or get_monthly_from_database to read the stored pulls."
                    .to_string(),
                "Run the build again on a later day to add another pull.".to_string(),
            ],
        },
        BuildOutcome::Appended {
            label,
            chunks,
            monthly_points,
            daily_points,
            reused_baseline,
        } => {
            let mut summary = if daily_points == 0 && chunks == 0 {
                format!("Appended monthly pull {label} ({monthly_points} months) to {dataset}.")
            } else {
                format!(
                    "Appended pull {label} to {dataset}: {monthly_points} monthly and \
                     {daily_points} daily values from {chunks} daily queries."
                )
            };
            if reused_baseline {
                summary.push_str(" The monthly baseline stored earlier today was reused.");
            }
            BuildResponse {
                summary,
                dataset,
                label,
                appended: true,
                reused_baseline,
                chunks,
                monthly_points,
                daily_points,
                api_requests,
                suggested_next_steps: vec![
                    "Call check_dataset_status to see every stored pull.".to_string(),
                    "Call get_daily_from_database to aggregate the stored pulls.".to_string(),
                ],
            }
        }
    }
}

fn not_found_steps(key: &DatasetKey) -> Vec<String> {
    vec![
        format!(
            "Call build_database for '{}' to create the dataset.",
            key.term
        ),
        "Check term, geo and category; datasets are keyed by all three.".to_string(),
    ]
}

pub fn format_daily(key: &DatasetKey, retrieval: Option<DailyRetrieval>) -> DailyFromDbResponse {
    let dataset = key.to_string();
    let Some(retrieval) = retrieval else {
        return DailyFromDbResponse {
            summary: format!(
                "No data found for {}.",
                search_term(key.category, &key.term, &key.geo)
            ),
            dataset,
            found: false,
            uniform: None,
            rows: 0,
            date_range: date_range(None),
            monthly: vec![],
            data: vec![],
            suggested_next_steps: not_found_steps(key),
        };
    };

    let table = &retrieval.table;
    let span = table
        .rows
        .first()
        .zip(table.rows.last())
        .map(|(f, l)| (f.date, l.date));
    let policy = if retrieval.uniform {
        "per-date median"
    } else {
        "per-date median after normalizing each pull to the monthly baseline"
    };
    let summary = if table.is_empty() {
        format!("{dataset} has no daily values in the requested years.")
    } else {
        format!("{} days from {dataset} combined by {policy}.", table.len())
    };

    DailyFromDbResponse {
        summary,
        dataset,
        found: true,
        uniform: Some(retrieval.uniform),
        rows: table.len(),
        date_range: date_range(span),
        monthly: series_points(&retrieval.monthly),
        data: table
            .rows
            .iter()
            .map(|r| RobustPoint {
                date: fmt_date(r.date),
                daily: r.daily,
                monthly: r.monthly,
            })
            .collect(),
        suggested_next_steps: vec![
            "Pass uniform=false if the stored pulls mix precision modes.".to_string(),
            "Call check_dataset_status to see which pulls were combined.".to_string(),
        ],
    }
}

pub fn format_monthly(key: &DatasetKey, monthly: Option<TimeSeries>) -> MonthlyFromDbResponse {
    let dataset = key.to_string();
    let Some(monthly) = monthly else {
        return MonthlyFromDbResponse {
            summary: format!(
                "No data found for {}.",
                search_term(key.category, &key.term, &key.geo)
            ),
            dataset,
            found: false,
            rows: 0,
            date_range: date_range(None),
            data: vec![],
            suggested_next_steps: not_found_steps(key),
        };
    };

    MonthlyFromDbResponse {
        summary: format!(
            "{} months from {dataset}, median across stored monthly pulls.",
            monthly.len()
        ),
        dataset,
        found: true,
        rows: monthly.len(),
        date_range: date_range(series_span(&monthly)),
        data: series_points(&monthly),
        suggested_next_steps: vec![
            "Call get_daily_from_database for daily resolution.".to_string(),
        ],
    }
}

pub fn format_status(
    key: &DatasetKey,
    path: String,
    dataset: Option<&Dataset>,
) -> DatasetStatusResponse {
    let name = key.to_string();
    let Some(dataset) = dataset else {
        return DatasetStatusResponse {
            summary: format!("No dataset {name} at {path}."),
            dataset: name,
            exists: false,
            path,
            pulls: vec![],
            monthly_range: date_range(None),
            daily_range: date_range(None),
            uniform: None,
            suggested_next_steps: not_found_steps(key),
        };
    };

    let pulls: Vec<PullInfo> = dataset
        .manifest
        .pulls
        .iter()
        .map(|(pulled, record)| PullInfo {
            label: pull_label(&key.term, *pulled),
            pulled_on: fmt_date(*pulled),
            tables: record
                .tables
                .iter()
                .map(|t| match t {
                    Table::Monthly => "monthly".to_string(),
                    Table::Daily => "daily".to_string(),
                })
                .collect(),
            precision: record.precision,
        })
        .collect();
    let uniform = dataset.is_uniform();
    let uniformity = match uniform {
        Some(true) => "all daily pulls share one precision",
        Some(false) => "daily pulls mix precision modes",
        None => "daily pull precision unknown",
    };

    DatasetStatusResponse {
        summary: format!(
            "{name}: {} monthly and {} daily pulls; {uniformity}.",
            dataset.monthly.len(),
            dataset.daily.len()
        ),
        dataset: name,
        exists: true,
        path,
        pulls,
        monthly_range: date_range(dataset.span(Table::Monthly)),
        daily_range: date_range(dataset.span(Table::Daily)),
        uniform,
        suggested_next_steps: vec![
            "Call get_daily_from_database to aggregate the daily pulls.".to_string(),
            "Call build_database on a later day to add another pull.".to_string(),
        ],
    }
}

//! Partitions a date range into query windows the service will accept.
//!
//! The service only returns daily resolution for windows of roughly 270 days or
//! less, so long histories are split into contiguous, non-overlapping chunks.
//! Chunk ends are aligned to calendar month ends so that every month's daily
//! values come from a single query and share one normalization.

use chrono::{Days, Months, NaiveDate};

use super::types::{month_end, month_index, month_start, Chunk};

/// How a chunk's tentative end is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    /// End on the last day of the `span - 1`th month after the chunk start's month.
    #[default]
    MonthEnd,
    /// End `span` months after the chunk start, minus one day.
    Rolling,
}

/// Plan the chunks covering `[start, min(stop, today)]`.
///
/// Returns an empty plan when `start` is after the clamped stop date.
pub fn plan(
    start: NaiveDate,
    stop: NaiveDate,
    max_span_months: u32,
    alignment: Alignment,
    today: NaiveDate,
) -> Vec<Chunk> {
    let stop = stop.min(today);
    let span = max_span_months.max(1);
    let mut chunks = Vec::new();
    if start > stop {
        return chunks;
    }

    let mut current = start;
    loop {
        let tentative = match alignment {
            Alignment::MonthEnd => month_start(current)
                .checked_add_months(Months::new(span - 1))
                .map_or(NaiveDate::MAX, month_end),
            Alignment::Rolling => current
                .checked_add_months(Months::new(span))
                .and_then(|d| d.checked_sub_days(Days::new(1)))
                .unwrap_or(NaiveDate::MAX),
        };
        let end = tentative.min(stop);
        chunks.push(Chunk::new(current, end));
        if end >= stop {
            break;
        }
        let Some(next) = end.succ_opt() else { break };
        current = next;
    }
    chunks
}

/// A single window spanning the whole clamped range, used for the baseline query.
pub fn single_window(start: NaiveDate, stop: NaiveDate, today: NaiveDate) -> Option<Chunk> {
    let clamped = stop.min(today);
    if start > clamped {
        return None;
    }
    let span = month_index(start, clamped).len() as u32;
    plan(start, clamped, span, Alignment::MonthEnd, today)
        .into_iter()
        .next()
}

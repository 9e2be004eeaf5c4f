//! Windowed digest aggregation.
//!
//! Summarises all fines issued in a trailing period into a deterministic
//! ranking (amount descending, ties broken by earlier issue date) plus totals.
//! A period with no fines is a valid, sendable summary, not an error.

use chrono::NaiveDate;

use crate::models::{DigestFrequency, Fine};

/// Ranked summary of one digest period.
#[derive(Debug, Clone)]
pub struct DigestSummary {
    /// Ordered by amount descending; equal amounts ordered by earlier
    /// `date_issued` first so repeated runs produce identical output.
    pub fines: Vec<Fine>,
    pub total_amount: f64,
    pub average_amount: f64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

impl DigestSummary {
    /// The N largest fines of the period, in ranking order.
    pub fn top(&self, n: usize) -> &[Fine] {
        &self.fines[..self.fines.len().min(n)]
    }
}

/// Inclusive period covered by a digest ending at `period_end`.
pub fn period_for(frequency: DigestFrequency, period_end: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = period_end - chrono::Duration::days(frequency.period_days());
    (start, period_end)
}

/// Aggregate the fines issued within `[period_start, period_end]` (inclusive).
pub fn aggregate(fines: &[Fine], period_start: NaiveDate, period_end: NaiveDate) -> DigestSummary {
    let mut in_period: Vec<Fine> = fines
        .iter()
        .filter(|f| f.date_issued >= period_start && f.date_issued <= period_end)
        .cloned()
        .collect();

    in_period.sort_by(|a, b| {
        b.amount
            .partial_cmp(&a.amount)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.date_issued.cmp(&b.date_issued))
    });

    let total_amount: f64 = in_period.iter().map(|f| f.amount).sum();
    let average_amount = if in_period.is_empty() {
        0.0
    } else {
        total_amount / in_period.len() as f64
    };

    DigestSummary {
        fines: in_period,
        total_amount,
        average_amount,
        period_start,
        period_end,
    }
}

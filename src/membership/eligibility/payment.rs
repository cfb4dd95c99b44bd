use chrono::{DateTime, Datelike, FixedOffset};
use serde::{Deserialize, Serialize};

use super::super::calendar::{club_offset, MonthCutoffs};
use super::super::domain::{PaymentRecord, VerificationStatus};
use super::super::ledger::{aggregate_year, parse_amount};
use super::config::PolicyConfig;

/// Outcome of the monthly-dues policy for one member at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PaymentVerdict {
    /// Before the day-5 cutoff the previous month's rule still applies.
    ClearedInGrace,
    /// The current month's fee was covered by payments submitted on or
    /// before day 5.
    ClearedOnTime,
    /// Fee covered by payments submitted days 6-10: barred from the next
    /// scheduled session after the 5th only.
    RestrictedNextSession,
    /// Fee covered by payments submitted day 11 onward: barred for the
    /// entire current month.
    RestrictedForMonth,
    /// Validated totals fall short of the accumulated dues.
    BehindOnDues,
    /// Aggregate-current, but no tier window reached the monthly fee.
    NoQualifyingPayment,
}

impl PaymentVerdict {
    pub fn is_cleared(&self) -> bool {
        matches!(
            self,
            PaymentVerdict::ClearedInGrace | PaymentVerdict::ClearedOnTime
        )
    }

    pub fn summary(&self) -> String {
        match self {
            PaymentVerdict::ClearedInGrace => {
                "cleared: within the day-5 grace window".to_string()
            }
            PaymentVerdict::ClearedOnTime => {
                "cleared: current month paid on time".to_string()
            }
            PaymentVerdict::RestrictedNextSession => {
                "restricted from the next session: fee submitted days 6-10".to_string()
            }
            PaymentVerdict::RestrictedForMonth => {
                "restricted for the month: fee submitted after day 10".to_string()
            }
            PaymentVerdict::BehindOnDues => "not current on dues".to_string(),
            PaymentVerdict::NoQualifyingPayment => "not current".to_string(),
        }
    }
}

/// Full payment standing with the figures that produced the verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAssessment {
    pub year: i32,
    pub month: u32,
    pub required_due: f64,
    pub validated_total: f64,
    pub registered_total: f64,
    pub observed_total: f64,
    pub is_current: bool,
    pub verdict: PaymentVerdict,
}

/// Sums of the current month's validated payments, bucketed by the civil-time
/// window in which each was submitted.
struct TierWindows {
    on_or_before_5: f64,
    day6_to_10: f64,
    day11_to_eom: f64,
}

fn tier_windows(
    payments: &[PaymentRecord],
    year: i32,
    month: u32,
    cutoffs: &MonthCutoffs,
) -> TierWindows {
    let offset = club_offset();
    let mut windows = TierWindows {
        on_or_before_5: 0.0,
        day6_to_10: 0.0,
        day11_to_eom: 0.0,
    };

    for record in payments {
        if record.verification != VerificationStatus::Validated {
            continue;
        }

        // Tier classification goes by when the record was submitted, not by
        // the declared operation instant.
        let submitted = record.submitted_at.with_timezone(&offset);
        if submitted.year() != year || submitted.month() != month {
            continue;
        }

        let amount = parse_amount(&record.amount);
        if record.submitted_at <= cutoffs.day5 {
            windows.on_or_before_5 += amount;
        } else if record.submitted_at <= cutoffs.day10 {
            windows.day6_to_10 += amount;
        } else if record.submitted_at <= cutoffs.end_of_month {
            windows.day11_to_eom += amount;
        }
    }

    windows
}

pub(crate) fn assess_payments(
    payments: &[PaymentRecord],
    now: DateTime<FixedOffset>,
    config: &PolicyConfig,
) -> PaymentAssessment {
    let local = now.with_timezone(&club_offset());
    let year = local.year();
    let month = local.month();
    let cutoffs = MonthCutoffs::for_month(year, month).expect("month comes from the clock");

    let ledger = aggregate_year(payments, year);
    let fee = config.monthly_fee;

    let within_grace = now <= cutoffs.day5;
    let months_due = if within_grace { month - 1 } else { month };
    let required_due = fee * f64::from(months_due);
    let is_current = ledger.validated >= required_due;

    let verdict = if !is_current {
        PaymentVerdict::BehindOnDues
    } else if within_grace {
        PaymentVerdict::ClearedInGrace
    } else {
        let windows = tier_windows(payments, year, month, &cutoffs);
        if windows.on_or_before_5 >= fee {
            PaymentVerdict::ClearedOnTime
        } else if windows.day6_to_10 >= fee {
            PaymentVerdict::RestrictedNextSession
        } else if windows.day11_to_eom >= fee {
            PaymentVerdict::RestrictedForMonth
        } else {
            PaymentVerdict::NoQualifyingPayment
        }
    };

    PaymentAssessment {
        year,
        month,
        required_due,
        validated_total: ledger.validated,
        registered_total: ledger.registered,
        observed_total: ledger.observed,
        is_current,
        verdict,
    }
}

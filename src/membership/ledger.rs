use chrono::Datelike;

use super::calendar::club_offset;
use super::domain::{PaymentRecord, VerificationStatus};

/// Parses a ledger amount the way the spreadsheet sends it: comma decimal
/// separators are accepted and anything non-numeric coerces to zero.
pub fn parse_amount(raw: &str) -> f64 {
    raw.trim().replace(',', ".").parse::<f64>().unwrap_or(0.0)
}

/// Per-year sums keyed by the admin verification status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct YearLedger {
    /// Everything submitted for the year, regardless of status.
    pub registered: f64,
    pub validated: f64,
    pub observed: f64,
    /// The validated payment with the latest declared-or-submitted instant.
    pub last_validated: Option<PaymentRecord>,
}

/// Sums a member's payment history for one calendar year. A record belongs to
/// the year of its declared operation instant, falling back to submission
/// time, evaluated in club-local civil time.
pub fn aggregate_year(payments: &[PaymentRecord], year: i32) -> YearLedger {
    let offset = club_offset();
    let mut ledger = YearLedger::default();

    for record in payments {
        if record.effective_at().with_timezone(&offset).year() != year {
            continue;
        }

        let amount = parse_amount(&record.amount);
        ledger.registered += amount;

        match record.verification {
            VerificationStatus::Validated => {
                ledger.validated += amount;
                let newer = ledger
                    .last_validated
                    .as_ref()
                    .map(|held| record.latest_at() > held.latest_at())
                    .unwrap_or(true);
                if newer {
                    ledger.last_validated = Some(record.clone());
                }
            }
            VerificationStatus::Observed => ledger.observed += amount,
            VerificationStatus::Pending => {}
        }
    }

    ledger
}

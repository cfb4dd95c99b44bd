//! Reconciliation against the treasurer's spreadsheet feed. The feed is the
//! verification source of truth: each entry patches the matching ledger
//! record's status, remarks, and optionally its amount. The sync never
//! inserts records and keeps going past per-record failures.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::domain::{FineId, PaymentId, VerificationStatus};
use super::ledger::parse_amount;
use super::repository::{FineRepository, PaymentRepository, VerificationPatch};

/// One spreadsheet row. Column names come straight from the sheet, so the
/// aliases track what the treasurer's export actually emits.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FeedEntry {
    #[serde(alias = "payment_id", alias = "pago_id", alias = "fine_id", alias = "multa_id")]
    pub record_id: String,
    /// Bank-statement match as recorded by the treasurer.
    #[serde(default, alias = "confirmacion_bancaria")]
    pub bank_confirmation: Option<String>,
    /// Manual admin ruling; when present it overrides the bank column.
    #[serde(default, alias = "verificacion_admin")]
    pub admin_verification: Option<String>,
    #[serde(
        default,
        alias = "admin_observacion",
        alias = "admin_observaciones",
        alias = "observaciones"
    )]
    pub remarks: Option<String>,
    /// Corrected amount, in the sheet's comma-decimal text form.
    #[serde(default, alias = "monto")]
    pub amount: Option<String>,
}

impl FeedEntry {
    /// The status this row assigns. An explicit admin ruling wins over the
    /// bank-confirmation column; blank cells count for nothing.
    pub fn status(&self) -> VerificationStatus {
        let ruling = self
            .admin_verification
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| {
                self.bank_confirmation
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
            });
        ruling
            .map(VerificationStatus::from_loose)
            .unwrap_or(VerificationStatus::Pending)
    }

    pub fn patch(&self) -> VerificationPatch {
        VerificationPatch {
            status: self.status(),
            remarks: self
                .remarks
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            amount: self
                .amount
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(parse_amount),
        }
    }
}

/// Outcome counters for one sync run. Re-running the same feed yields the
/// same counts; a patch that changes nothing still counts as updated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub updated: usize,
    pub missing: usize,
    pub failed: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed did not return a JSON array")]
    NotAnArray,
    #[error("feed row could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("feed csv could not be read: {0}")]
    Csv(#[from] csv::Error),
}

/// Fetches a published feed over HTTP. The body must be a bare JSON array;
/// anything else aborts the run before a single write happens.
#[derive(Clone, Default)]
pub struct HttpLedgerFeed {
    client: reqwest::Client,
}

impl HttpLedgerFeed {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn fetch_entries(&self, url: &str) -> Result<Vec<FeedEntry>, FeedError> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let value: serde_json::Value = serde_json::from_str(&body)?;
        if !value.is_array() {
            return Err(FeedError::NotAnArray);
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Reads a feed exported as CSV, for offline reconciliation runs.
pub fn parse_csv_entries<R: std::io::Read>(reader: R) -> Result<Vec<FeedEntry>, FeedError> {
    let mut entries = Vec::new();
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    for row in csv_reader.deserialize() {
        entries.push(row?);
    }
    Ok(entries)
}

pub fn sync_payments<R: PaymentRepository>(repo: &R, entries: &[FeedEntry]) -> SyncReport {
    let mut report = SyncReport::default();
    for entry in entries {
        let id = PaymentId(entry.record_id.trim().to_string());
        if id.0.is_empty() {
            report.missing += 1;
            continue;
        }
        match repo.apply_verification(&id, &entry.patch()) {
            Ok(Some(_)) => report.updated += 1,
            Ok(None) => report.missing += 1,
            Err(error) => {
                warn!(payment = %id.0, %error, "payment sync row failed");
                report.failed += 1;
            }
        }
    }
    info!(
        updated = report.updated,
        missing = report.missing,
        failed = report.failed,
        "payment sync finished"
    );
    report
}

pub fn sync_fines<R: FineRepository>(repo: &R, entries: &[FeedEntry]) -> SyncReport {
    let mut report = SyncReport::default();
    for entry in entries {
        let id = FineId(entry.record_id.trim().to_string());
        if id.0.is_empty() {
            report.missing += 1;
            continue;
        }
        match repo.apply_verification(&id, &entry.patch()) {
            Ok(Some(_)) => report.updated += 1,
            Ok(None) => report.missing += 1,
            Err(error) => {
                warn!(fine = %id.0, %error, "fine sync row failed");
                report.failed += 1;
            }
        }
    }
    info!(
        updated = report.updated,
        missing = report.missing,
        failed = report.failed,
        "fine sync finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::membership::calendar::club_offset;
    use crate::membership::domain::{MemberId, PaymentRecord};
    use crate::membership::memory::{ledger_channel, InMemoryPaymentRepository};

    fn entry(id: &str, bank: Option<&str>, admin: Option<&str>) -> FeedEntry {
        FeedEntry {
            record_id: id.to_string(),
            bank_confirmation: bank.map(str::to_string),
            admin_verification: admin.map(str::to_string),
            remarks: None,
            amount: None,
        }
    }

    fn seeded_repo(ids: &[&str]) -> InMemoryPaymentRepository {
        let repo = InMemoryPaymentRepository::new(ledger_channel());
        for id in ids {
            repo.insert(PaymentRecord {
                id: PaymentId(id.to_string()),
                member_id: MemberId("uid-1".to_string()),
                amount: "100".to_string(),
                operation_number: 42,
                bank: "BCP".to_string(),
                operation_at: None,
                submitted_at: club_offset()
                    .with_ymd_and_hms(2026, 3, 2, 10, 0, 0)
                    .unwrap(),
                receipt_path: format!("uid-1/{id}.png"),
                verification: VerificationStatus::Pending,
                remarks: None,
                verified_by: None,
                verified_at: None,
            })
            .unwrap();
        }
        repo
    }

    #[test]
    fn admin_ruling_overrides_bank_confirmation() {
        let row = entry("p-1", Some("Validado"), Some("Observado"));
        assert_eq!(row.status(), VerificationStatus::Observed);
    }

    #[test]
    fn blank_admin_cell_falls_back_to_bank() {
        let row = entry("p-1", Some("Validado"), Some("  "));
        assert_eq!(row.status(), VerificationStatus::Validated);
    }

    #[test]
    fn empty_columns_mean_pending() {
        let row = entry("p-1", None, None);
        assert_eq!(row.status(), VerificationStatus::Pending);
    }

    #[test]
    fn sync_counts_updated_missing_and_failed() {
        let repo = seeded_repo(&["p-1", "p-2"]);
        repo.poison_verification(PaymentId("p-2".to_string()));
        let entries = vec![
            entry("p-1", Some("Validado"), None),
            entry("p-2", Some("Validado"), None),
            entry("ghost", Some("Validado"), None),
        ];

        let report = sync_payments(&repo, &entries);
        assert_eq!(
            report,
            SyncReport {
                updated: 1,
                missing: 1,
                failed: 1
            }
        );
        assert_eq!(
            repo.get(&PaymentId("p-1".to_string())).unwrap().verification,
            VerificationStatus::Validated
        );
    }

    #[test]
    fn sync_is_idempotent() {
        let repo = seeded_repo(&["p-1"]);
        let entries = vec![entry("p-1", Some("Validado"), None)];
        let first = sync_payments(&repo, &entries);
        let second = sync_payments(&repo, &entries);
        assert_eq!(first, second);
    }

    #[test]
    fn patch_carries_remarks_and_corrected_amount() {
        let repo = seeded_repo(&["p-1"]);
        let mut row = entry("p-1", Some("Observado"), None);
        row.remarks = Some("monto no coincide".to_string());
        row.amount = Some("150,50".to_string());
        sync_payments(&repo, &[row]);

        let record = repo.get(&PaymentId("p-1".to_string())).unwrap();
        assert_eq!(record.verification, VerificationStatus::Observed);
        assert_eq!(record.remarks.as_deref(), Some("monto no coincide"));
        assert_eq!(record.amount, "150.5");
    }

    #[test]
    fn csv_feed_with_sheet_headers_parses() {
        let csv = "pago_id,confirmacion_bancaria,verificacion_admin,admin_observacion,monto\n\
                   p-1,Validado,,,\n\
                   p-2,,Observado,sin voucher,80\n";
        let entries = parse_csv_entries(csv.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status(), VerificationStatus::Validated);
        assert_eq!(entries[1].status(), VerificationStatus::Observed);
        assert_eq!(entries[1].remarks.as_deref(), Some("sin voucher"));
    }
}

//! CSV ingestion for the offline standing report: exported payments, fines,
//! and attendance rows become domain records without touching a backend.

use std::io::Read;

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;

use super::calendar::club_offset;
use super::domain::{
    AttendanceRecord, FineId, FineRecord, MemberId, PaymentId, PaymentRecord, TrainingId,
    VerificationStatus,
};
use super::ledger::parse_amount;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("csv read failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("timestamp {0:?} is not RFC 3339")]
    Timestamp(String),
}

fn parse_instant(raw: &str) -> Result<DateTime<FixedOffset>, ImportError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|at| at.with_timezone(&club_offset()))
        .map_err(|_| ImportError::Timestamp(raw.to_string()))
}

fn parse_optional_instant(raw: Option<&str>) -> Result<Option<DateTime<FixedOffset>>, ImportError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => parse_instant(value).map(Some),
        None => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct PaymentRow {
    id: String,
    member_id: String,
    amount: String,
    #[serde(default)]
    operation_number: u64,
    #[serde(default)]
    bank: String,
    #[serde(default)]
    operation_at: Option<String>,
    submitted_at: String,
    #[serde(default)]
    receipt_path: Option<String>,
    #[serde(default, alias = "estado")]
    status: Option<String>,
    #[serde(default, alias = "observaciones")]
    remarks: Option<String>,
}

pub fn read_payments<R: Read>(reader: R) -> Result<Vec<PaymentRecord>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for row in csv_reader.deserialize::<PaymentRow>() {
        let row = row?;
        records.push(PaymentRecord {
            id: PaymentId(row.id),
            member_id: MemberId(row.member_id),
            amount: row.amount,
            operation_number: row.operation_number,
            bank: row.bank,
            operation_at: parse_optional_instant(row.operation_at.as_deref())?,
            submitted_at: parse_instant(&row.submitted_at)?,
            receipt_path: row.receipt_path.unwrap_or_default(),
            verification: row
                .status
                .as_deref()
                .map(VerificationStatus::from_loose)
                .unwrap_or(VerificationStatus::Pending),
            remarks: row.remarks,
            verified_by: None,
            verified_at: None,
        });
    }
    Ok(records)
}

#[derive(Debug, Deserialize)]
struct FineRow {
    id: String,
    member_id: String,
    amount: String,
    #[serde(default)]
    operation_number: u64,
    #[serde(default)]
    bank: String,
    #[serde(default)]
    operation_at: Option<String>,
    submitted_at: String,
    #[serde(default)]
    receipt_path: Option<String>,
    #[serde(default, alias = "estado")]
    status: Option<String>,
    #[serde(default, alias = "observaciones")]
    remarks: Option<String>,
}

pub fn read_fines<R: Read>(reader: R) -> Result<Vec<FineRecord>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for row in csv_reader.deserialize::<FineRow>() {
        let row = row?;
        records.push(FineRecord {
            id: FineId(row.id),
            member_id: MemberId(row.member_id),
            amount: parse_amount(&row.amount),
            operation_number: row.operation_number,
            bank: row.bank,
            operation_at: parse_optional_instant(row.operation_at.as_deref())?,
            submitted_at: parse_instant(&row.submitted_at)?,
            receipt_path: row.receipt_path.unwrap_or_default(),
            verification: row
                .status
                .as_deref()
                .map(VerificationStatus::from_loose)
                .unwrap_or(VerificationStatus::Pending),
            remarks: row.remarks,
        });
    }
    Ok(records)
}

#[derive(Debug, Deserialize)]
struct AttendanceRow {
    training_id: String,
    member_id: String,
    scanned_at: String,
}

pub fn read_attendance<R: Read>(reader: R) -> Result<Vec<AttendanceRecord>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for row in csv_reader.deserialize::<AttendanceRow>() {
        let row = row?;
        records.push(AttendanceRecord {
            training_id: TrainingId(row.training_id),
            member_id: MemberId(row.member_id),
            scanned_at: parse_instant(&row.scanned_at)?,
            attended: true,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use chrono::Timelike;

    use super::*;

    #[test]
    fn payments_export_round_trips_into_records() {
        let csv = "id,member_id,amount,operation_number,bank,operation_at,submitted_at,receipt_path,estado,observaciones\n\
                   p-1,uid-1,\"100,00\",991,BCP,,2026-03-02T10:00:00-05:00,uid-1/991.png,Validado,\n\
                   p-2,uid-1,50,992,Interbank,2026-02-27T09:00:00-05:00,2026-03-01T08:00:00-05:00,,,tarde\n";
        let records = read_payments(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].verification, VerificationStatus::Validated);
        assert_eq!(records[0].amount, "100,00");
        assert!(records[1].operation_at.is_some());
        assert_eq!(records[1].remarks.as_deref(), Some("tarde"));
    }

    #[test]
    fn bad_timestamp_fails_the_import() {
        let csv = "id,member_id,amount,submitted_at\np-1,uid-1,100,yesterday\n";
        assert!(matches!(
            read_payments(csv.as_bytes()),
            Err(ImportError::Timestamp(_))
        ));
    }

    #[test]
    fn attendance_export_parses_with_club_offset() {
        let csv = "training_id,member_id,scanned_at\nt-1,uid-1,2026-03-07T12:00:00Z\n";
        let records = read_attendance(csv.as_bytes()).unwrap();
        assert_eq!(records[0].scanned_at.offset(), &club_offset());
        assert_eq!(records[0].scanned_at.hour(), 7);
    }
}

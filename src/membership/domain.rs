use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for club members (the auth provider's opaque user id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberId(pub String);

/// Identifier wrapper for submitted payments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(pub String);

/// Identifier wrapper for training-absence fines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FineId(pub String);

/// Identifier wrapper for scheduled training sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingId(pub String);

/// Role assigned to an authenticated member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Member,
    Admin,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Member => "socio",
            Role::Admin => "admin",
        }
    }

    /// Loose parse matching what the profile table actually stores.
    pub fn from_loose(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::Member
        }
    }
}

/// Member profile as maintained by the member and import tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberProfile {
    pub id: MemberId,
    pub full_name: String,
    pub national_id: String,
    pub email: String,
    #[serde(default)]
    pub team: Option<String>,
    pub role: Role,
    /// Bare object key in the avatars bucket, never a URL.
    #[serde(default)]
    pub avatar_path: Option<String>,
}

impl MemberProfile {
    /// A scan or submission needs at least a name and national id on file.
    pub fn is_complete(&self) -> bool {
        !self.full_name.trim().is_empty() && !self.national_id.trim().is_empty()
    }
}

/// The three admin-assigned verification states for a payment or fine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Pending,
    Validated,
    Observed,
}

impl VerificationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            VerificationStatus::Pending => "Pendiente",
            VerificationStatus::Validated => "Validado",
            VerificationStatus::Observed => "Observado",
        }
    }

    /// Normalizes the free-form strings the spreadsheet sync carries.
    /// Anything unrecognized counts as pending.
    pub fn from_loose(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "validado" | "validada" | "validated" | "confirmado" | "confirmada" => {
                VerificationStatus::Validated
            }
            "observado" | "observada" | "observed" | "rechazado" | "rechazada" => {
                VerificationStatus::Observed
            }
            _ => VerificationStatus::Pending,
        }
    }
}

/// A monthly-fee payment as submitted by the member and later verified by an
/// admin. The amount keeps the submitted text so spreadsheet round-trips with
/// comma decimals or stray characters never poison the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: PaymentId,
    pub member_id: MemberId,
    pub amount: String,
    pub operation_number: u64,
    pub bank: String,
    /// Declared bank operation instant (what the voucher says).
    #[serde(default)]
    pub operation_at: Option<DateTime<FixedOffset>>,
    /// When the member submitted the record.
    pub submitted_at: DateTime<FixedOffset>,
    /// Bare object key in the receipts bucket.
    pub receipt_path: String,
    pub verification: VerificationStatus,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub verified_by: Option<String>,
    #[serde(default)]
    pub verified_at: Option<DateTime<FixedOffset>>,
}

impl PaymentRecord {
    /// Declared operation instant, falling back to submission time.
    pub fn effective_at(&self) -> DateTime<FixedOffset> {
        self.operation_at.unwrap_or(self.submitted_at)
    }

    /// The later of the declared and submission instants, used to pick the
    /// most recent validated payment.
    pub fn latest_at(&self) -> DateTime<FixedOffset> {
        match self.operation_at {
            Some(op) if op > self.submitted_at => op,
            _ => self.submitted_at,
        }
    }
}

/// A fixed-amount penalty for a week with no training attendance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FineRecord {
    pub id: FineId,
    pub member_id: MemberId,
    pub amount: f64,
    pub operation_number: u64,
    pub bank: String,
    #[serde(default)]
    pub operation_at: Option<DateTime<FixedOffset>>,
    pub submitted_at: DateTime<FixedOffset>,
    /// Bare object key in the fines bucket.
    pub receipt_path: String,
    pub verification: VerificationStatus,
    #[serde(default)]
    pub remarks: Option<String>,
}

impl FineRecord {
    pub fn effective_at(&self) -> DateTime<FixedOffset> {
        self.operation_at.unwrap_or(self.submitted_at)
    }
}

/// A scheduled training with its check-in window. Maintained by admin-side
/// tooling; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSession {
    pub id: TrainingId,
    pub label: String,
    pub checkin_open_at: DateTime<FixedOffset>,
    pub checkin_close_at: DateTime<FixedOffset>,
}

impl TrainingSession {
    pub fn is_open_at(&self, instant: DateTime<FixedOffset>) -> bool {
        self.checkin_open_at <= instant && instant <= self.checkin_close_at
    }
}

/// One check-in scan. The store enforces uniqueness per (training, member).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub training_id: TrainingId,
    pub member_id: MemberId,
    pub scanned_at: DateTime<FixedOffset>,
    pub attended: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_status_normalizes_loose_input() {
        assert_eq!(
            VerificationStatus::from_loose(" Validado "),
            VerificationStatus::Validated
        );
        assert_eq!(
            VerificationStatus::from_loose("OBSERVADO"),
            VerificationStatus::Observed
        );
        assert_eq!(
            VerificationStatus::from_loose("pendiente"),
            VerificationStatus::Pending
        );
        assert_eq!(
            VerificationStatus::from_loose("??"),
            VerificationStatus::Pending
        );
        assert_eq!(
            VerificationStatus::from_loose(""),
            VerificationStatus::Pending
        );
    }

    #[test]
    fn role_parse_defaults_to_member() {
        assert_eq!(Role::from_loose("ADMIN"), Role::Admin);
        assert_eq!(Role::from_loose("socio"), Role::Member);
        assert_eq!(Role::from_loose(""), Role::Member);
    }
}

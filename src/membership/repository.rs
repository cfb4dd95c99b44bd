use chrono::{DateTime, FixedOffset};

use super::domain::{
    AttendanceRecord, FineId, FineRecord, MemberId, MemberProfile, PaymentId, PaymentRecord,
    TrainingSession, VerificationStatus,
};

/// Error enumeration for backing-store failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Verification fields the reconciliation sync is allowed to touch.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationPatch {
    pub status: VerificationStatus,
    pub remarks: Option<String>,
    pub amount: Option<f64>,
}

/// Change notification emitted when a member's payments or fines move, so the
/// standing cache can re-aggregate (the realtime feed's job in the original
/// deployment).
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerChange {
    pub member_id: MemberId,
}

/// Storage abstraction for monthly-fee payments.
pub trait PaymentRepository: Send + Sync {
    fn insert(&self, record: PaymentRecord) -> Result<PaymentRecord, RepositoryError>;
    /// Full history for one member, newest submission first.
    fn history(&self, member: &MemberId) -> Result<Vec<PaymentRecord>, RepositoryError>;
    /// Applies a verification patch. `Ok(None)` means the record is absent;
    /// the sync counts it as missing and never inserts.
    fn apply_verification(
        &self,
        id: &PaymentId,
        patch: &VerificationPatch,
    ) -> Result<Option<MemberId>, RepositoryError>;
}

/// Storage abstraction for training-absence fines.
pub trait FineRepository: Send + Sync {
    fn insert(&self, record: FineRecord) -> Result<FineRecord, RepositoryError>;
    fn history(&self, member: &MemberId) -> Result<Vec<FineRecord>, RepositoryError>;
    fn apply_verification(
        &self,
        id: &FineId,
        patch: &VerificationPatch,
    ) -> Result<Option<MemberId>, RepositoryError>;
}

/// Storage abstraction for check-in scans. Inserts must reject a duplicate
/// (training, member) pair with `RepositoryError::Conflict`.
pub trait AttendanceRepository: Send + Sync {
    fn record(&self, record: AttendanceRecord) -> Result<(), RepositoryError>;
    fn for_member_between(
        &self,
        member: &MemberId,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<Vec<AttendanceRecord>, RepositoryError>;
}

/// Read-only view over the admin-maintained training schedule.
pub trait TrainingRepository: Send + Sync {
    /// The training whose check-in window contains `now`, if any.
    fn open_at(
        &self,
        now: DateTime<FixedOffset>,
    ) -> Result<Option<TrainingSession>, RepositoryError>;
}

/// Storage abstraction for member profiles.
pub trait ProfileRepository: Send + Sync {
    fn fetch(&self, id: &MemberId) -> Result<Option<MemberProfile>, RepositoryError>;
    /// Creates or replaces a profile (first payment auto-creates one).
    fn upsert(&self, profile: MemberProfile) -> Result<(), RepositoryError>;
}

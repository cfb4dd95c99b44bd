//! Orchestration over the repositories, object store, and reconciliation
//! feed. Handlers and the CLI only ever talk to this type.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, FixedOffset};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::BucketConfig;

use super::calendar::CivilWeek;
use super::domain::{
    FineId, FineRecord, MemberId, MemberProfile, PaymentId, PaymentRecord, Role,
    VerificationStatus,
};
use super::eligibility::{EligibilityEngine, MemberStanding};
use super::ledger::parse_amount;
use super::reconcile::{
    sync_fines, sync_payments, FeedEntry, FeedError, HttpLedgerFeed, SyncReport,
};
use super::repository::{
    AttendanceRepository, FineRepository, LedgerChange, PaymentRepository, ProfileRepository,
    RepositoryError,
};
use super::storage::{
    avatar_path, extract_object_path, receipt_path, ObjectStore, StorageError,
};

const SIGNED_URL_TTL_SECS: u32 = 3600;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("amount {0:?} is not a positive number")]
    InvalidAmount(String),
    #[error("operation number {0:?} is not numeric")]
    InvalidOperationNumber(String),
    #[error("the bank operation date is required")]
    MissingOperationDate,
    #[error("no profile on file for member {0}")]
    UnknownMember(String),
    #[error("the full name is required")]
    MissingFullName,
    #[error("national id {0:?} must be exactly 8 digits")]
    InvalidNationalId(String),
    #[error("no {0} feed url configured")]
    FeedNotConfigured(&'static str),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Monthly-fee submission as it arrives from the form. Amount and operation
/// number stay text until validated; profile fields feed the auto-created
/// minimal profile on a first submission.
#[derive(Debug, Clone)]
pub struct PaymentSubmission {
    pub member_id: MemberId,
    pub full_name: String,
    pub national_id: String,
    pub email: String,
    pub amount: String,
    pub operation_number: String,
    pub bank: String,
    pub operation_at: Option<DateTime<FixedOffset>>,
    pub receipt_file_name: String,
    pub receipt_content: Vec<u8>,
}

/// Fine submission. The amount is fixed by policy, never by the form.
#[derive(Debug, Clone)]
pub struct FineSubmission {
    pub member_id: MemberId,
    pub operation_number: String,
    pub bank: String,
    pub operation_at: Option<DateTime<FixedOffset>>,
    pub receipt_file_name: String,
    pub receipt_content: Vec<u8>,
}

/// A ledger row plus a freshly signed receipt URL. Stored paths may be bare
/// keys or stale URLs from older clients; both are normalized first.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentView {
    #[serde(flatten)]
    pub record: PaymentRecord,
    pub receipt_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FineView {
    #[serde(flatten)]
    pub record: FineRecord,
    pub receipt_url: Option<String>,
}

pub struct MembershipService<P, F, A, Pr, S> {
    payments: Arc<P>,
    fines: Arc<F>,
    attendance: Arc<A>,
    profiles: Arc<Pr>,
    store: Arc<S>,
    engine: EligibilityEngine,
    buckets: BucketConfig,
    feed: HttpLedgerFeed,
    payments_feed_url: Option<String>,
    fines_feed_url: Option<String>,
    standing_cache: Mutex<HashMap<MemberId, MemberStanding>>,
}

impl<P, F, A, Pr, S> MembershipService<P, F, A, Pr, S>
where
    P: PaymentRepository,
    F: FineRepository,
    A: AttendanceRepository,
    Pr: ProfileRepository,
    S: ObjectStore,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        payments: Arc<P>,
        fines: Arc<F>,
        attendance: Arc<A>,
        profiles: Arc<Pr>,
        store: Arc<S>,
        engine: EligibilityEngine,
        buckets: BucketConfig,
        payments_feed_url: Option<String>,
        fines_feed_url: Option<String>,
    ) -> Self {
        Self {
            payments,
            fines,
            attendance,
            profiles,
            store,
            engine,
            buckets,
            feed: HttpLedgerFeed::default(),
            payments_feed_url,
            fines_feed_url,
            standing_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &EligibilityEngine {
        &self.engine
    }

    /// Submits a monthly-fee payment: validates the form, creates a minimal
    /// profile on first contact, uploads the receipt, inserts the record as
    /// pending. An insert failure removes the uploaded object best-effort.
    pub fn submit_payment(
        &self,
        submission: PaymentSubmission,
        now: DateTime<FixedOffset>,
    ) -> Result<PaymentRecord, ServiceError> {
        if parse_amount(&submission.amount) <= 0.0 {
            return Err(ServiceError::InvalidAmount(submission.amount));
        }
        let operation_number: u64 = submission
            .operation_number
            .trim()
            .parse()
            .map_err(|_| ServiceError::InvalidOperationNumber(submission.operation_number.clone()))?;
        let operation_at = submission
            .operation_at
            .ok_or(ServiceError::MissingOperationDate)?;

        self.ensure_profile(&submission)?;

        let millis = now.timestamp_millis();
        let path = receipt_path(&submission.member_id, millis, &submission.receipt_file_name);
        self.store
            .upload(&self.buckets.receipts, &path, &submission.receipt_content)?;

        let record = PaymentRecord {
            id: PaymentId(format!("pay-{operation_number}-{millis}")),
            member_id: submission.member_id.clone(),
            amount: submission.amount,
            operation_number,
            bank: submission.bank,
            operation_at: Some(operation_at),
            submitted_at: now,
            receipt_path: path.clone(),
            verification: VerificationStatus::Pending,
            remarks: None,
            verified_by: None,
            verified_at: None,
        };

        match self.payments.insert(record) {
            Ok(inserted) => {
                info!(
                    member = %inserted.member_id.0,
                    payment = %inserted.id.0,
                    "payment submitted"
                );
                Ok(inserted)
            }
            Err(error) => {
                if let Err(cleanup) = self.store.remove(&self.buckets.receipts, &path) {
                    warn!(%path, error = %cleanup, "orphaned receipt after failed insert");
                }
                Err(error.into())
            }
        }
    }

    /// Submits a training-absence fine payment at the policy amount.
    pub fn submit_fine(
        &self,
        submission: FineSubmission,
        now: DateTime<FixedOffset>,
    ) -> Result<FineRecord, ServiceError> {
        let operation_number: u64 = submission
            .operation_number
            .trim()
            .parse()
            .map_err(|_| ServiceError::InvalidOperationNumber(submission.operation_number.clone()))?;
        let operation_at = submission
            .operation_at
            .ok_or(ServiceError::MissingOperationDate)?;
        if self.profiles.fetch(&submission.member_id)?.is_none() {
            return Err(ServiceError::UnknownMember(submission.member_id.0.clone()));
        }

        let millis = now.timestamp_millis();
        let path = receipt_path(&submission.member_id, millis, &submission.receipt_file_name);
        self.store
            .upload(&self.buckets.fines, &path, &submission.receipt_content)?;

        let record = FineRecord {
            id: FineId(format!("fine-{operation_number}-{millis}")),
            member_id: submission.member_id.clone(),
            amount: self.engine.config().fine_amount,
            operation_number,
            bank: submission.bank,
            operation_at: Some(operation_at),
            submitted_at: now,
            receipt_path: path.clone(),
            verification: VerificationStatus::Pending,
            remarks: None,
        };

        match self.fines.insert(record) {
            Ok(inserted) => {
                info!(
                    member = %inserted.member_id.0,
                    fine = %inserted.id.0,
                    "fine payment submitted"
                );
                Ok(inserted)
            }
            Err(error) => {
                if let Err(cleanup) = self.store.remove(&self.buckets.fines, &path) {
                    warn!(%path, error = %cleanup, "orphaned fine receipt after failed insert");
                }
                Err(error.into())
            }
        }
    }

    /// Evaluates and caches the member's combined standing at `now`.
    pub fn standing(
        &self,
        member: &MemberId,
        now: DateTime<FixedOffset>,
    ) -> Result<MemberStanding, ServiceError> {
        let payments = self.payments.history(member)?;
        let fines = self.fines.history(member)?;
        let week = CivilWeek::containing(now);
        let attendance = self
            .attendance
            .for_member_between(member, week.start, week.end)?;

        let standing = self.engine.standing(&payments, &attendance, &fines, now);
        self.standing_cache
            .lock()
            .expect("standing cache mutex poisoned")
            .insert(member.clone(), standing.clone());
        Ok(standing)
    }

    /// Last evaluated standing, if the cache still holds one. Ledger changes
    /// evict entries, so a hit is never staler than the last change event.
    pub fn cached_standing(&self, member: &MemberId) -> Option<MemberStanding> {
        self.standing_cache
            .lock()
            .expect("standing cache mutex poisoned")
            .get(member)
            .cloned()
    }

    fn invalidate(&self, member: &MemberId) {
        self.standing_cache
            .lock()
            .expect("standing cache mutex poisoned")
            .remove(member);
    }

    pub fn payment_history(
        &self,
        member: &MemberId,
        year: i32,
    ) -> Result<Vec<PaymentView>, ServiceError> {
        let rows = self.payments.history(member)?;
        Ok(rows
            .into_iter()
            .filter(|record| record.effective_at().year() == year)
            .map(|record| {
                let receipt_url =
                    self.fresh_receipt_url(&self.buckets.receipts, &record.receipt_path);
                PaymentView {
                    record,
                    receipt_url,
                }
            })
            .collect())
    }

    pub fn fine_history(
        &self,
        member: &MemberId,
        year: i32,
    ) -> Result<Vec<FineView>, ServiceError> {
        let rows = self.fines.history(member)?;
        Ok(rows
            .into_iter()
            .filter(|record| record.effective_at().year() == year)
            .map(|record| {
                let receipt_url = self.fresh_receipt_url(&self.buckets.fines, &record.receipt_path);
                FineView {
                    record,
                    receipt_url,
                }
            })
            .collect())
    }

    fn fresh_receipt_url(&self, bucket: &str, stored: &str) -> Option<String> {
        let path = extract_object_path(stored, bucket)?;
        match self.store.signed_url(bucket, &path, SIGNED_URL_TTL_SECS) {
            Ok(url) => Some(url),
            Err(error) => {
                warn!(%path, %error, "could not sign receipt url");
                None
            }
        }
    }

    /// Replaces the member's avatar: uploads the new object, persists the new
    /// key, then deletes the prior object best-effort.
    pub fn update_avatar(
        &self,
        member: &MemberId,
        extension: &str,
        content: &[u8],
        now: DateTime<FixedOffset>,
    ) -> Result<String, ServiceError> {
        let Some(mut profile) = self.profiles.fetch(member)? else {
            return Err(ServiceError::UnknownMember(member.0.clone()));
        };

        let path = avatar_path(member, now.timestamp_millis(), extension);
        self.store.upload(&self.buckets.avatars, &path, content)?;

        let previous = profile.avatar_path.replace(path.clone());
        self.profiles.upsert(profile)?;

        if let Some(old) = previous {
            if let Err(error) = self.store.remove(&self.buckets.avatars, &old) {
                warn!(path = %old, %error, "stale avatar left behind");
            }
        }
        Ok(path)
    }

    pub fn profile(&self, member: &MemberId) -> Result<Option<MemberProfile>, ServiceError> {
        Ok(self.profiles.fetch(member)?)
    }

    /// Members may correct their own name and national id. The national id
    /// must be exactly eight digits before the profile is accepted.
    pub fn update_profile(
        &self,
        member: &MemberId,
        full_name: &str,
        national_id: &str,
    ) -> Result<MemberProfile, ServiceError> {
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(ServiceError::MissingFullName);
        }
        if national_id.len() != 8 || !national_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ServiceError::InvalidNationalId(national_id.to_string()));
        }

        let Some(mut profile) = self.profiles.fetch(member)? else {
            return Err(ServiceError::UnknownMember(member.0.clone()));
        };
        profile.full_name = full_name.to_string();
        profile.national_id = national_id.to_string();
        self.profiles.upsert(profile.clone())?;
        Ok(profile)
    }

    pub async fn run_payment_sync(&self) -> Result<SyncReport, ServiceError> {
        let url = self
            .payments_feed_url
            .as_deref()
            .ok_or(ServiceError::FeedNotConfigured("payments"))?;
        let entries = self.feed.fetch_entries(url).await?;
        Ok(sync_payments(self.payments.as_ref(), &entries))
    }

    pub async fn run_fine_sync(&self) -> Result<SyncReport, ServiceError> {
        let url = self
            .fines_feed_url
            .as_deref()
            .ok_or(ServiceError::FeedNotConfigured("fines"))?;
        let entries = self.feed.fetch_entries(url).await?;
        Ok(sync_fines(self.fines.as_ref(), &entries))
    }

    /// CSV-mode reconciliation for offline runs.
    pub fn apply_payment_feed(&self, entries: &[FeedEntry]) -> SyncReport {
        sync_payments(self.payments.as_ref(), entries)
    }

    pub fn apply_fine_feed(&self, entries: &[FeedEntry]) -> SyncReport {
        sync_fines(self.fines.as_ref(), entries)
    }

    fn ensure_profile(&self, submission: &PaymentSubmission) -> Result<(), ServiceError> {
        if self.profiles.fetch(&submission.member_id)?.is_some() {
            return Ok(());
        }
        info!(member = %submission.member_id.0, "creating minimal profile on first payment");
        self.profiles.upsert(MemberProfile {
            id: submission.member_id.clone(),
            full_name: submission.full_name.clone(),
            national_id: submission.national_id.clone(),
            email: submission.email.clone(),
            team: None,
            role: Role::Member,
            avatar_path: None,
        })?;
        Ok(())
    }
}

impl<P, F, A, Pr, S> MembershipService<P, F, A, Pr, S>
where
    P: PaymentRepository + 'static,
    F: FineRepository + 'static,
    A: AttendanceRepository + 'static,
    Pr: ProfileRepository + 'static,
    S: ObjectStore + 'static,
{
    /// Evicts cached standings as ledger change events arrive, so the next
    /// read re-aggregates. Lag clears the whole cache rather than guessing
    /// which members were skipped.
    pub fn spawn_refresh_listener(
        self: &Arc<Self>,
        mut changes: broadcast::Receiver<LedgerChange>,
    ) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        debug!(member = %change.member_id.0, "ledger changed, evicting standing");
                        service.invalidate(&change.member_id);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "ledger change stream lagged, clearing cache");
                        service
                            .standing_cache
                            .lock()
                            .expect("standing cache mutex poisoned")
                            .clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::membership::calendar::club_offset;
    use crate::membership::eligibility::PolicyConfig;
    use crate::membership::memory::{
        ledger_channel, InMemoryAttendanceRepository, InMemoryFineRepository,
        InMemoryObjectStore, InMemoryPaymentRepository, InMemoryProfileRepository,
    };

    type TestService = MembershipService<
        InMemoryPaymentRepository,
        InMemoryFineRepository,
        InMemoryAttendanceRepository,
        InMemoryProfileRepository,
        InMemoryObjectStore,
    >;

    fn service() -> (TestService, Arc<InMemoryObjectStore>) {
        let changes = ledger_channel();
        let store = Arc::new(InMemoryObjectStore::default());
        let service = MembershipService::new(
            Arc::new(InMemoryPaymentRepository::new(changes.clone())),
            Arc::new(InMemoryFineRepository::new(changes)),
            Arc::new(InMemoryAttendanceRepository::default()),
            Arc::new(InMemoryProfileRepository::default()),
            Arc::clone(&store),
            EligibilityEngine::new(PolicyConfig::default()),
            BucketConfig::default(),
            None,
            None,
        );
        (service, store)
    }

    fn march(day: u32, hour: u32) -> DateTime<FixedOffset> {
        club_offset()
            .with_ymd_and_hms(2026, 3, day, hour, 0, 0)
            .unwrap()
    }

    fn submission(amount: &str, op: &str) -> PaymentSubmission {
        PaymentSubmission {
            member_id: MemberId("uid-1".to_string()),
            full_name: "Ana Torres".to_string(),
            national_id: "44556677".to_string(),
            email: "ana@example.com".to_string(),
            amount: amount.to_string(),
            operation_number: op.to_string(),
            bank: "BCP".to_string(),
            operation_at: Some(march(2, 9)),
            receipt_file_name: "voucher.png".to_string(),
            receipt_content: vec![1, 2, 3],
        }
    }

    #[test]
    fn submission_creates_profile_and_stores_receipt() {
        let (service, store) = service();
        let record = service.submit_payment(submission("100", "991"), march(2, 10)).unwrap();

        assert_eq!(record.verification, VerificationStatus::Pending);
        assert!(store.contains("Recibos", &record.receipt_path));
        let profile = service.profile(&record.member_id).unwrap().unwrap();
        assert_eq!(profile.full_name, "Ana Torres");
    }

    #[test]
    fn zero_and_garbage_amounts_are_rejected() {
        let (service, _) = service();
        assert!(matches!(
            service.submit_payment(submission("0", "991"), march(2, 10)),
            Err(ServiceError::InvalidAmount(_))
        ));
        assert!(matches!(
            service.submit_payment(submission("cien", "991"), march(2, 10)),
            Err(ServiceError::InvalidAmount(_))
        ));
    }

    #[test]
    fn non_numeric_operation_number_is_rejected() {
        let (service, _) = service();
        assert!(matches!(
            service.submit_payment(submission("100", "op-991"), march(2, 10)),
            Err(ServiceError::InvalidOperationNumber(_))
        ));
    }

    #[test]
    fn missing_operation_date_is_rejected() {
        let (service, _) = service();
        let mut sub = submission("100", "991");
        sub.operation_at = None;
        assert!(matches!(
            service.submit_payment(sub, march(2, 10)),
            Err(ServiceError::MissingOperationDate)
        ));
    }

    #[test]
    fn failed_insert_removes_the_uploaded_receipt() {
        let (service, store) = service();
        let now = march(2, 10);
        let first = service.submit_payment(submission("100", "991"), now).unwrap();

        // Same operation number at the same instant collides on record id,
        // but a distinct file name lets the upload itself succeed first.
        let mut retry = submission("100", "991");
        retry.receipt_file_name = "voucher-retry.png".to_string();
        let result = service.submit_payment(retry, now);
        assert!(matches!(
            result,
            Err(ServiceError::Repository(RepositoryError::Conflict))
        ));

        let orphan = receipt_path(&first.member_id, now.timestamp_millis(), "voucher-retry.png");
        assert!(!store.contains("Recibos", &orphan));
        assert!(store.contains("Recibos", &first.receipt_path));
    }

    #[test]
    fn history_refreshes_signed_urls_from_stale_values() {
        let (service, _) = service();
        let record = service.submit_payment(submission("100", "991"), march(2, 10)).unwrap();
        let views = service.payment_history(&record.member_id, 2026).unwrap();
        assert_eq!(views.len(), 1);
        let url = views[0].receipt_url.as_deref().unwrap();
        assert!(url.contains(&record.receipt_path));
    }

    #[test]
    fn history_is_year_scoped() {
        let (service, _) = service();
        let member = MemberId("uid-1".to_string());
        service.submit_payment(submission("100", "991"), march(2, 10)).unwrap();
        let mut old = submission("100", "992");
        old.operation_at = Some(
            club_offset()
                .with_ymd_and_hms(2025, 12, 20, 9, 0, 0)
                .unwrap(),
        );
        service
            .submit_payment(
                old,
                club_offset()
                    .with_ymd_and_hms(2025, 12, 21, 9, 0, 0)
                    .unwrap(),
            )
            .unwrap();

        assert_eq!(service.payment_history(&member, 2026).unwrap().len(), 1);
        assert_eq!(service.payment_history(&member, 2025).unwrap().len(), 1);
    }

    #[test]
    fn avatar_replacement_deletes_the_prior_object() {
        let (service, store) = service();
        let member = MemberId("uid-1".to_string());
        service.submit_payment(submission("100", "991"), march(2, 10)).unwrap();

        let first = service
            .update_avatar(&member, "jpg", &[1], march(3, 10))
            .unwrap();
        assert!(store.contains("avatars", &first));

        let second = service
            .update_avatar(&member, "png", &[2], march(4, 10))
            .unwrap();
        assert!(store.contains("avatars", &second));
        assert!(!store.contains("avatars", &first));
        let profile = service.profile(&member).unwrap().unwrap();
        assert_eq!(profile.avatar_path.as_deref(), Some(second.as_str()));
    }

    #[test]
    fn profile_update_rewrites_name_and_national_id() {
        let (service, _) = service();
        let member = MemberId("uid-1".to_string());
        service.submit_payment(submission("100", "991"), march(2, 10)).unwrap();

        let updated = service
            .update_profile(&member, "  Ana Lucia Torres ", "87654321")
            .unwrap();
        assert_eq!(updated.full_name, "Ana Lucia Torres");
        assert_eq!(updated.national_id, "87654321");

        let stored = service.profile(&member).unwrap().unwrap();
        assert_eq!(stored, updated);
    }

    #[test]
    fn profile_update_rejects_bad_input() {
        let (service, _) = service();
        let member = MemberId("uid-1".to_string());
        service.submit_payment(submission("100", "991"), march(2, 10)).unwrap();

        assert!(matches!(
            service.update_profile(&member, "   ", "87654321"),
            Err(ServiceError::MissingFullName)
        ));
        assert!(matches!(
            service.update_profile(&member, "Ana", "8765432"),
            Err(ServiceError::InvalidNationalId(_))
        ));
        assert!(matches!(
            service.update_profile(&member, "Ana", "8765432a"),
            Err(ServiceError::InvalidNationalId(_))
        ));
        assert!(matches!(
            service.update_profile(&MemberId("ghost".to_string()), "Ana", "87654321"),
            Err(ServiceError::UnknownMember(_))
        ));
    }

    #[test]
    fn standing_is_cached_until_invalidated() {
        let (service, _) = service();
        let member = MemberId("uid-1".to_string());
        service.submit_payment(submission("300", "991"), march(2, 10)).unwrap();

        assert!(service.cached_standing(&member).is_none());
        let standing = service.standing(&member, march(3, 12)).unwrap();
        assert_eq!(service.cached_standing(&member), Some(standing));

        service.invalidate(&member);
        assert!(service.cached_standing(&member).is_none());
    }

    #[test]
    fn fine_submission_uses_the_policy_amount() {
        let (service, store) = service();
        service.submit_payment(submission("100", "991"), march(2, 10)).unwrap();
        let fine = service
            .submit_fine(
                FineSubmission {
                    member_id: MemberId("uid-1".to_string()),
                    operation_number: "555".to_string(),
                    bank: "BCP".to_string(),
                    operation_at: Some(march(4, 9)),
                    receipt_file_name: "multa.png".to_string(),
                    receipt_content: vec![9],
                },
                march(4, 10),
            )
            .unwrap();
        assert_eq!(fine.amount, PolicyConfig::default().fine_amount);
        assert!(store.contains("MultasEntrenamiento", &fine.receipt_path));
    }
}

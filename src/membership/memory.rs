//! In-memory backing stores. They keep the default server runnable without
//! the managed backend and give the tests a uniqueness-enforcing store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset};
use tokio::sync::broadcast;

use super::domain::{
    AttendanceRecord, FineId, FineRecord, MemberId, MemberProfile, PaymentId, PaymentRecord,
    TrainingId, TrainingSession,
};
use super::repository::{
    AttendanceRepository, FineRepository, LedgerChange, PaymentRepository, ProfileRepository,
    RepositoryError, TrainingRepository, VerificationPatch,
};
use super::storage::{ObjectStore, StorageError};

/// Broadcast channel for ledger changes; stands in for the realtime feed.
pub fn ledger_channel() -> broadcast::Sender<LedgerChange> {
    broadcast::channel(64).0
}

#[derive(Clone)]
pub struct InMemoryPaymentRepository {
    records: Arc<Mutex<HashMap<PaymentId, PaymentRecord>>>,
    poisoned: Arc<Mutex<HashSet<PaymentId>>>,
    changes: broadcast::Sender<LedgerChange>,
}

impl InMemoryPaymentRepository {
    pub fn new(changes: broadcast::Sender<LedgerChange>) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            poisoned: Arc::new(Mutex::new(HashSet::new())),
            changes,
        }
    }

    /// Makes verification updates for `id` fail, for exercising the sync's
    /// per-record failure accounting.
    pub fn poison_verification(&self, id: PaymentId) {
        self.poisoned
            .lock()
            .expect("repository mutex poisoned")
            .insert(id);
    }

    pub fn get(&self, id: &PaymentId) -> Option<PaymentRecord> {
        self.records
            .lock()
            .expect("repository mutex poisoned")
            .get(id)
            .cloned()
    }
}

impl PaymentRepository for InMemoryPaymentRepository {
    fn insert(&self, record: PaymentRecord) -> Result<PaymentRecord, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(&record.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.id.clone(), record.clone());
        let _ = self.changes.send(LedgerChange {
            member_id: record.member_id.clone(),
        });
        Ok(record)
    }

    fn history(&self, member: &MemberId) -> Result<Vec<PaymentRecord>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        let mut rows: Vec<PaymentRecord> = guard
            .values()
            .filter(|record| &record.member_id == member)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(rows)
    }

    fn apply_verification(
        &self,
        id: &PaymentId,
        patch: &VerificationPatch,
    ) -> Result<Option<MemberId>, RepositoryError> {
        if self
            .poisoned
            .lock()
            .expect("repository mutex poisoned")
            .contains(id)
        {
            return Err(RepositoryError::Unavailable("injected failure".to_string()));
        }

        let mut guard = self.records.lock().expect("repository mutex poisoned");
        let Some(record) = guard.get_mut(id) else {
            return Ok(None);
        };

        record.verification = patch.status;
        record.remarks = patch.remarks.clone();
        if let Some(amount) = patch.amount {
            record.amount = amount.to_string();
        }

        let member_id = record.member_id.clone();
        let _ = self.changes.send(LedgerChange {
            member_id: member_id.clone(),
        });
        Ok(Some(member_id))
    }
}

#[derive(Clone)]
pub struct InMemoryFineRepository {
    records: Arc<Mutex<HashMap<FineId, FineRecord>>>,
    changes: broadcast::Sender<LedgerChange>,
}

impl InMemoryFineRepository {
    pub fn new(changes: broadcast::Sender<LedgerChange>) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            changes,
        }
    }

    pub fn get(&self, id: &FineId) -> Option<FineRecord> {
        self.records
            .lock()
            .expect("repository mutex poisoned")
            .get(id)
            .cloned()
    }
}

impl FineRepository for InMemoryFineRepository {
    fn insert(&self, record: FineRecord) -> Result<FineRecord, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(&record.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.id.clone(), record.clone());
        let _ = self.changes.send(LedgerChange {
            member_id: record.member_id.clone(),
        });
        Ok(record)
    }

    fn history(&self, member: &MemberId) -> Result<Vec<FineRecord>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        let mut rows: Vec<FineRecord> = guard
            .values()
            .filter(|record| &record.member_id == member)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(rows)
    }

    fn apply_verification(
        &self,
        id: &FineId,
        patch: &VerificationPatch,
    ) -> Result<Option<MemberId>, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        let Some(record) = guard.get_mut(id) else {
            return Ok(None);
        };

        record.verification = patch.status;
        record.remarks = patch.remarks.clone();
        if let Some(amount) = patch.amount {
            record.amount = amount;
        }

        let member_id = record.member_id.clone();
        let _ = self.changes.send(LedgerChange {
            member_id: member_id.clone(),
        });
        Ok(Some(member_id))
    }
}

#[derive(Default, Clone)]
pub struct InMemoryAttendanceRepository {
    records: Arc<Mutex<HashMap<(TrainingId, MemberId), AttendanceRecord>>>,
}

impl AttendanceRepository for InMemoryAttendanceRepository {
    fn record(&self, record: AttendanceRecord) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        let key = (record.training_id.clone(), record.member_id.clone());
        if guard.contains_key(&key) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(key, record);
        Ok(())
    }

    fn for_member_between(
        &self,
        member: &MemberId,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<Vec<AttendanceRecord>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard
            .values()
            .filter(|record| {
                &record.member_id == member
                    && record.scanned_at >= start
                    && record.scanned_at <= end
            })
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryTrainingRepository {
    sessions: Arc<Mutex<Vec<TrainingSession>>>,
}

impl InMemoryTrainingRepository {
    pub fn with_schedule(sessions: Vec<TrainingSession>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(sessions)),
        }
    }
}

impl TrainingRepository for InMemoryTrainingRepository {
    fn open_at(
        &self,
        now: DateTime<FixedOffset>,
    ) -> Result<Option<TrainingSession>, RepositoryError> {
        let guard = self.sessions.lock().expect("repository mutex poisoned");
        Ok(guard.iter().find(|s| s.is_open_at(now)).cloned())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryProfileRepository {
    profiles: Arc<Mutex<HashMap<MemberId, MemberProfile>>>,
}

impl ProfileRepository for InMemoryProfileRepository {
    fn fetch(&self, id: &MemberId) -> Result<Option<MemberProfile>, RepositoryError> {
        let guard = self.profiles.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn upsert(&self, profile: MemberProfile) -> Result<(), RepositoryError> {
        let mut guard = self.profiles.lock().expect("repository mutex poisoned");
        guard.insert(profile.id.clone(), profile);
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryObjectStore {
    objects: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
}

impl InMemoryObjectStore {
    pub fn contains(&self, bucket: &str, path: &str) -> bool {
        self.objects
            .lock()
            .expect("store mutex poisoned")
            .contains_key(&(bucket.to_string(), path.to_string()))
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn upload(&self, bucket: &str, path: &str, content: &[u8]) -> Result<(), StorageError> {
        let mut guard = self.objects.lock().expect("store mutex poisoned");
        let key = (bucket.to_string(), path.to_string());
        if guard.contains_key(&key) {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        guard.insert(key, content.to_vec());
        Ok(())
    }

    fn remove(&self, bucket: &str, path: &str) -> Result<(), StorageError> {
        let mut guard = self.objects.lock().expect("store mutex poisoned");
        guard
            .remove(&(bucket.to_string(), path.to_string()))
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn signed_url(&self, bucket: &str, path: &str, ttl_secs: u32) -> Result<String, StorageError> {
        if !self.contains(bucket, path) {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(format!(
            "https://storage.local/object/sign/{bucket}/{path}?ttl={ttl_secs}"
        ))
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("https://storage.local/object/public/{bucket}/{path}")
    }
}

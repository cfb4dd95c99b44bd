//! QR attendance check-in: payload validation, scanner debounce, and the
//! registration flow against the attendance store.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{AttendanceRecord, MemberId, TrainingId};
use super::repository::{
    AttendanceRepository, ProfileRepository, RepositoryError, TrainingRepository,
};

/// The `type` sentinel every club check-in QR carries.
pub const CHECKIN_PAYLOAD_TYPE: &str = "MADRUGADORES_CHECKIN";

/// Seconds during which a re-scan of the same code is swallowed. Scanner guns
/// fire several reads per second while the code is in frame.
const SAME_CODE_COOLDOWN_SECS: i64 = 4;

/// Decoded QR payload. Older badges carry `user_id` instead of `player_id`;
/// everything past the id is informational and never trusted over the profile
/// on file.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckinPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(alias = "user_id")]
    pub player_id: String,
    #[serde(default)]
    pub v: Option<u32>,
    #[serde(default)]
    pub nombre: Option<String>,
    #[serde(default)]
    pub dni: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub ts: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("payload type {0:?} is not a club check-in code")]
    ForeignCode(String),
    #[error("payload carries no member id")]
    MissingMember,
    #[error(transparent)]
    Store(#[from] RepositoryError),
}

/// What a scan resolved to. Every variant is a handled outcome the kiosk
/// displays; only `ScanError` cases are protocol-level rejections.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// First scan for this member at the open training.
    Registered {
        training: TrainingId,
        training_label: String,
        member: MemberId,
        member_name: String,
    },
    /// The member already checked in at this training; counts as success.
    AlreadyRegistered {
        training: TrainingId,
        member: MemberId,
    },
    /// Same code seen again inside the cooldown window, or a scan raced an
    /// in-flight one.
    Debounced,
    /// No training has an open check-in window right now.
    NoOpenTraining,
    /// The id does not match any profile on file.
    UnknownMember { member: MemberId },
    /// Profile exists but lacks name or national id.
    IncompleteProfile { member: MemberId },
}

struct ScannerState {
    busy: bool,
    last_code: Option<String>,
    last_scan_at: Option<DateTime<FixedOffset>>,
}

/// Kiosk-side scanner. One instance per kiosk; the busy flag and same-code
/// cooldown keep scanner guns from double-registering.
pub struct CheckinScanner<A, T, P> {
    attendance: Arc<A>,
    trainings: Arc<T>,
    profiles: Arc<P>,
    state: Mutex<ScannerState>,
}

impl<A, T, P> CheckinScanner<A, T, P>
where
    A: AttendanceRepository,
    T: TrainingRepository,
    P: ProfileRepository,
{
    pub fn new(attendance: Arc<A>, trainings: Arc<T>, profiles: Arc<P>) -> Self {
        Self {
            attendance,
            trainings,
            profiles,
            state: Mutex::new(ScannerState {
                busy: false,
                last_code: None,
                last_scan_at: None,
            }),
        }
    }

    pub fn scan(
        &self,
        raw: &str,
        now: DateTime<FixedOffset>,
    ) -> Result<ScanOutcome, ScanError> {
        {
            let mut state = self.state.lock().expect("scanner mutex poisoned");
            if state.busy {
                return Ok(ScanOutcome::Debounced);
            }
            if let (Some(code), Some(at)) = (&state.last_code, state.last_scan_at) {
                if code == raw && now - at < Duration::seconds(SAME_CODE_COOLDOWN_SECS) {
                    return Ok(ScanOutcome::Debounced);
                }
            }
            state.busy = true;
            state.last_code = Some(raw.to_string());
            state.last_scan_at = Some(now);
        }

        let outcome = self.process(raw, now);

        self.state.lock().expect("scanner mutex poisoned").busy = false;
        outcome
    }

    fn process(
        &self,
        raw: &str,
        now: DateTime<FixedOffset>,
    ) -> Result<ScanOutcome, ScanError> {
        let payload: CheckinPayload = serde_json::from_str(raw)?;
        if payload.kind != CHECKIN_PAYLOAD_TYPE {
            return Err(ScanError::ForeignCode(payload.kind));
        }
        let member = MemberId(payload.player_id.trim().to_string());
        if member.0.is_empty() {
            return Err(ScanError::MissingMember);
        }

        let Some(training) = self.trainings.open_at(now)? else {
            return Ok(ScanOutcome::NoOpenTraining);
        };

        let Some(profile) = self.profiles.fetch(&member)? else {
            return Ok(ScanOutcome::UnknownMember { member });
        };
        if !profile.is_complete() {
            return Ok(ScanOutcome::IncompleteProfile { member });
        }

        match self.attendance.record(AttendanceRecord {
            training_id: training.id.clone(),
            member_id: member.clone(),
            scanned_at: now,
            attended: true,
        }) {
            Ok(()) => {
                info!(
                    member = %member.0,
                    training = %training.id.0,
                    "attendance registered"
                );
                Ok(ScanOutcome::Registered {
                    training: training.id,
                    training_label: training.label,
                    member,
                    member_name: profile.full_name,
                })
            }
            Err(RepositoryError::Conflict) => Ok(ScanOutcome::AlreadyRegistered {
                training: training.id,
                member,
            }),
            Err(other) => Err(ScanError::Store(other)),
        }
    }
}

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::super::calendar::CivilWeek;
use super::super::domain::{AttendanceRecord, FineRecord, VerificationStatus};
use super::config::PolicyConfig;

/// Weekly attendance standing. Three states, not two: once the Friday-noon
/// grace expires the block is terminal for the week, while before it the
/// member can still submit a fine payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttendanceVerdict {
    ClearedByAttendance { sessions: u32 },
    /// A validated fine for this week substitutes for attendance.
    ClearedByFine,
    /// No attendance yet, but a fine submitted before the deadline can still
    /// clear the week.
    BlockedPendingGrace { fine_deadline: DateTime<FixedOffset> },
    /// Grace expired with no attendance and no validated fine.
    BlockedTerminal,
}

impl AttendanceVerdict {
    pub fn is_cleared(&self) -> bool {
        matches!(
            self,
            AttendanceVerdict::ClearedByAttendance { .. } | AttendanceVerdict::ClearedByFine
        )
    }

    pub fn summary(&self) -> String {
        match self {
            AttendanceVerdict::ClearedByAttendance { sessions } => {
                format!("cleared: attended {sessions} training(s) this week")
            }
            AttendanceVerdict::ClearedByFine => {
                "cleared: validated fine covers this week".to_string()
            }
            AttendanceVerdict::BlockedPendingGrace { fine_deadline } => format!(
                "blocked: no attendance this week; fine accepted until {}",
                fine_deadline.format("%Y-%m-%d %H:%M")
            ),
            AttendanceVerdict::BlockedTerminal => {
                "blocked: no attendance this week and the fine window closed".to_string()
            }
        }
    }
}

/// Attendance standing with the week window that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceAssessment {
    pub week_start: DateTime<FixedOffset>,
    pub week_end: DateTime<FixedOffset>,
    pub attended_sessions: u32,
    pub required_sessions: u32,
    pub verdict: AttendanceVerdict,
}

pub(crate) fn assess_attendance(
    attendance: &[AttendanceRecord],
    fines: &[FineRecord],
    now: DateTime<FixedOffset>,
    config: &PolicyConfig,
) -> AttendanceAssessment {
    let week = CivilWeek::containing(now);

    let distinct: HashSet<_> = attendance
        .iter()
        .filter(|record| record.attended && week.contains(record.scanned_at))
        .map(|record| &record.training_id)
        .collect();
    let attended_sessions = distinct.len() as u32;

    let verdict = if attended_sessions >= config.required_weekly_sessions {
        AttendanceVerdict::ClearedByAttendance {
            sessions: attended_sessions,
        }
    } else {
        // A fine only counts if it was submitted before the grace deadline;
        // validation may land later, but the submission window is hard.
        let fine_covers_week = fines.iter().any(|fine| {
            fine.verification == VerificationStatus::Validated
                && week.contains(fine.effective_at())
                && fine.submitted_at <= week.fine_deadline()
        });

        if fine_covers_week {
            AttendanceVerdict::ClearedByFine
        } else if now >= week.fine_deadline() {
            AttendanceVerdict::BlockedTerminal
        } else {
            AttendanceVerdict::BlockedPendingGrace {
                fine_deadline: week.fine_deadline(),
            }
        }
    };

    AttendanceAssessment {
        week_start: week.start,
        week_end: week.end,
        attended_sessions,
        required_sessions: config.required_weekly_sessions,
        verdict,
    }
}

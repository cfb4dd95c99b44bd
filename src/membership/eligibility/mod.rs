mod attendance;
mod config;
mod payment;

pub use attendance::{AttendanceAssessment, AttendanceVerdict};
pub use config::PolicyConfig;
pub use payment::{PaymentAssessment, PaymentVerdict};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::domain::{AttendanceRecord, FineRecord, PaymentRecord};

/// Stateless evaluator applying the club policy to one member's records at a
/// caller-supplied instant. All clock reads happen outside this type.
pub struct EligibilityEngine {
    config: PolicyConfig,
}

impl EligibilityEngine {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn payment_standing(
        &self,
        payments: &[PaymentRecord],
        now: DateTime<FixedOffset>,
    ) -> PaymentAssessment {
        payment::assess_payments(payments, now, &self.config)
    }

    pub fn attendance_standing(
        &self,
        attendance: &[AttendanceRecord],
        fines: &[FineRecord],
        now: DateTime<FixedOffset>,
    ) -> AttendanceAssessment {
        attendance::assess_attendance(attendance, fines, now, &self.config)
    }

    /// The combined snapshot the member-facing views render.
    pub fn standing(
        &self,
        payments: &[PaymentRecord],
        attendance: &[AttendanceRecord],
        fines: &[FineRecord],
        now: DateTime<FixedOffset>,
    ) -> MemberStanding {
        MemberStanding {
            evaluated_at: now,
            payment: self.payment_standing(payments, now),
            attendance: self.attendance_standing(attendance, fines, now),
        }
    }
}

/// Combined payment and attendance standing for one member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberStanding {
    pub evaluated_at: DateTime<FixedOffset>,
    pub payment: PaymentAssessment,
    pub attendance: AttendanceAssessment,
}

impl MemberStanding {
    /// Cleared to play: both policies must agree.
    pub fn is_cleared(&self) -> bool {
        self.payment.verdict.is_cleared() && self.attendance.verdict.is_cleared()
    }
}

//! Club membership workflow: payment submission and validation, attendance
//! check-in, eligibility policy, and reconciliation against the external
//! validation ledger.

pub mod calendar;
pub mod checkin;
pub mod domain;
pub mod eligibility;
pub mod import;
pub mod ledger;
pub mod memory;
pub mod reconcile;
pub mod repository;
pub mod router;
pub mod service;
pub mod storage;

pub use checkin::{CheckinScanner, ScanOutcome};
pub use eligibility::{EligibilityEngine, MemberStanding, PolicyConfig};
pub use reconcile::SyncReport;
pub use router::{membership_router, AppState};
pub use service::{MembershipService, PaymentSubmission, ServiceError};

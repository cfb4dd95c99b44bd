use chrono::{DateTime, FixedOffset, TimeZone};
use club_ops::membership::calendar::club_offset;
use club_ops::membership::domain::{
    AttendanceRecord, FineId, FineRecord, MemberId, PaymentId, PaymentRecord, TrainingId,
    VerificationStatus,
};
use club_ops::membership::eligibility::{
    AttendanceVerdict, EligibilityEngine, PaymentVerdict, PolicyConfig,
};

fn at(month: u32, day: u32, hour: u32) -> DateTime<FixedOffset> {
    club_offset()
        .with_ymd_and_hms(2026, month, day, hour, 0, 0)
        .single()
        .expect("valid test instant")
}

fn engine() -> EligibilityEngine {
    EligibilityEngine::new(PolicyConfig::default())
}

fn validated_payment(id: &str, amount: &str, submitted: DateTime<FixedOffset>) -> PaymentRecord {
    PaymentRecord {
        id: PaymentId(id.to_string()),
        member_id: MemberId("uid-1".to_string()),
        amount: amount.to_string(),
        operation_number: 1000,
        bank: "BCP".to_string(),
        operation_at: None,
        submitted_at: submitted,
        receipt_path: format!("uid-1/{id}.png"),
        verification: VerificationStatus::Validated,
        remarks: None,
        verified_by: Some("tesoreria".to_string()),
        verified_at: Some(submitted),
    }
}

fn validated_fine(id: &str, submitted: DateTime<FixedOffset>) -> FineRecord {
    FineRecord {
        id: FineId(id.to_string()),
        member_id: MemberId("uid-1".to_string()),
        amount: 100.0,
        operation_number: 2000,
        bank: "BCP".to_string(),
        operation_at: None,
        submitted_at: submitted,
        receipt_path: format!("uid-1/{id}.png"),
        verification: VerificationStatus::Pending,
        remarks: None,
    }
}

fn attendance(training: &str, scanned: DateTime<FixedOffset>) -> AttendanceRecord {
    AttendanceRecord {
        training_id: TrainingId(training.to_string()),
        member_id: MemberId("uid-1".to_string()),
        scanned_at: scanned,
        attended: true,
    }
}

// March 3 sits inside the day-5 grace window, so only January and February
// count as owed.
#[test]
fn march_third_with_nothing_paid_owes_two_months() {
    let assessment = engine().payment_standing(&[], at(3, 3, 10));

    assert_eq!(assessment.required_due, 200.0);
    assert_eq!(assessment.validated_total, 0.0);
    assert!(!assessment.is_current);
    assert_eq!(assessment.verdict, PaymentVerdict::BehindOnDues);
}

#[test]
fn march_third_with_three_hundred_validated_is_cleared() {
    let payments = vec![
        validated_payment("p-jan", "100", at(1, 4, 9)),
        validated_payment("p-feb", "100", at(2, 3, 9)),
        validated_payment("p-mar", "100", at(3, 2, 9)),
    ];

    let assessment = engine().payment_standing(&payments, at(3, 3, 10));

    assert_eq!(assessment.required_due, 200.0);
    assert_eq!(assessment.validated_total, 300.0);
    assert!(assessment.is_current);
    assert_eq!(assessment.verdict, PaymentVerdict::ClearedInGrace);
}

// A March fee submitted on the 7th lands in the 6-10 window: current, but
// restricted from the next session.
#[test]
fn fee_submitted_on_the_seventh_restricts_the_next_session() {
    let payments = vec![
        validated_payment("p-jan", "100", at(1, 4, 9)),
        validated_payment("p-feb", "100", at(2, 3, 9)),
        validated_payment("p-mar", "100", at(3, 7, 9)),
    ];

    let assessment = engine().payment_standing(&payments, at(3, 7, 12));

    assert!(assessment.is_current);
    assert_eq!(assessment.verdict, PaymentVerdict::RestrictedNextSession);
    assert!(!assessment.verdict.is_cleared());
}

#[test]
fn fee_submitted_after_the_tenth_restricts_the_whole_month() {
    let payments = vec![
        validated_payment("p-jan", "100", at(1, 4, 9)),
        validated_payment("p-feb", "100", at(2, 3, 9)),
        validated_payment("p-mar", "100", at(3, 12, 9)),
    ];

    let assessment = engine().payment_standing(&payments, at(3, 15, 12));

    assert!(assessment.is_current);
    assert_eq!(assessment.verdict, PaymentVerdict::RestrictedForMonth);
}

// Attending at all during the civil week clears the member regardless of
// fines or the Friday deadline.
#[test]
fn attendance_dominates_fines_and_deadlines() {
    // Saturday of the March 2-8 week, past the Friday-noon fine deadline.
    let now = at(3, 7, 18);
    let scans = vec![attendance("t-1", at(3, 7, 7))];

    let assessment = engine().attendance_standing(&scans, &[], now);

    assert_eq!(
        assessment.verdict,
        AttendanceVerdict::ClearedByAttendance { sessions: 1 }
    );
}

#[test]
fn missed_week_is_recoverable_until_friday_noon() {
    // Wednesday of the week: still inside the grace window.
    let pending = engine().attendance_standing(&[], &[], at(3, 4, 10));
    match pending.verdict {
        AttendanceVerdict::BlockedPendingGrace { fine_deadline } => {
            assert_eq!(fine_deadline, at(3, 6, 12));
        }
        other => panic!("expected pending grace, got {other:?}"),
    }

    // Saturday, no fine paid: terminal for the week.
    let terminal = engine().attendance_standing(&[], &[], at(3, 7, 10));
    assert_eq!(terminal.verdict, AttendanceVerdict::BlockedTerminal);
}

#[test]
fn validated_fine_clears_the_missed_week() {
    let mut fine = validated_fine("f-1", at(3, 5, 9));
    fine.verification = VerificationStatus::Validated;

    let assessment = engine().attendance_standing(&[], &[fine.clone()], at(3, 4, 10));
    assert_eq!(assessment.verdict, AttendanceVerdict::ClearedByFine);

    // A pending fine does not clear anything.
    fine.verification = VerificationStatus::Pending;
    let assessment = engine().attendance_standing(&[], &[fine], at(3, 4, 10));
    assert!(matches!(
        assessment.verdict,
        AttendanceVerdict::BlockedPendingGrace { .. }
    ));
}

// Adding a validated payment can only improve the verdict figures.
#[test]
fn validated_sums_grow_monotonically() {
    let now = at(3, 3, 10);
    let mut payments = vec![validated_payment("p-jan", "100", at(1, 4, 9))];
    let before = engine().payment_standing(&payments, now);

    payments.push(validated_payment("p-feb", "100", at(2, 3, 9)));
    let after = engine().payment_standing(&payments, now);

    assert!(after.validated_total > before.validated_total);
    assert_eq!(after.required_due, before.required_due);
    assert!(after.is_current || !before.is_current);
}

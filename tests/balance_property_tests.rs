//! Property-based tests for balance bookkeeping and contract completion
//!
//! Random schedules are driven through random approve/reject sequences while
//! a simple model tracks what the client should still owe. After every step
//! the stored balance must equal the sum of unpaid installments, and the
//! contract must be signed exactly when nothing is left unpaid.
//!
//! These properties cover:
//!
//! 1. Balance conservation across approvals and rejections
//! 2. Contract completion never firing early
//! 3. Decisions being final (no double decrement)
//! 4. Submission guards: state first, then exact amount

use installment_approval::{
    PaymentService, WorkflowError,
    installment::ScheduledInstallment,
    payment::PaymentSubmission,
    proof::ProofStorage,
    types::{Actor, Amount, Decision, InstallmentStatus, PaymentMethod, Role, TimeStamp},
};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;

fn fresh_service() -> (TempDir, PaymentService) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = sled::Config::new()
        .temporary(true)
        .open()
        .expect("temporary sled db");
    let proofs = ProofStorage::open(dir.path().join("proofs")).expect("proof dir");
    let service = PaymentService::new(Arc::new(db), proofs).expect("service");
    (dir, service)
}

fn schedule_from(amounts: &[u64]) -> Vec<ScheduledInstallment> {
    let first = TimeStamp::date(2026, 1, 1).expect("valid date");
    amounts
        .iter()
        .zip(1u32..)
        .map(|(minor, number)| ScheduledInstallment {
            installment_number: number,
            amount: Amount::from_minor(*minor),
            due_date: first.add_months(number - 1).expect("in range"),
        })
        .collect()
}

/// Strategy for a schedule of 1 to 6 non zero installments
fn amounts_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1u64..=500_000, 1..=6)
}

/// Strategy for a sequence of (installment index, approve?) steps
fn steps_strategy() -> impl Strategy<Value = Vec<(usize, bool)>> {
    prop::collection::vec((0usize..6, any::<bool>()), 1..=16)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: remaining balance always equals the sum of unpaid installments,
    /// and the contract is signed iff every installment is paid
    #[test]
    fn prop_balance_tracks_unpaid_installments(
        amounts in amounts_strategy(),
        steps in steps_strategy(),
    ) {
        let (_dir, service) = fresh_service();
        let admin = Actor::new("user1admin", Role::SystemAdmin);
        let client = service
            .register_client("Prop", None, None, &schedule_from(&amounts))
            .expect("register");
        let plan = service.installments_for_client(&client.id).expect("plan");
        let mut paid = vec![false; amounts.len()];

        for (idx, approve) in steps {
            let idx = idx % amounts.len();
            let installment = &plan[idx];

            let submitted = service.submit_payment(PaymentSubmission::new(
                &installment.id,
                &client.id,
                installment.amount,
                PaymentMethod::BankTransfer,
            ));

            if paid[idx] {
                // a paid installment never takes another payment
                prop_assert!(submitted.is_err());
                continue;
            }
            let payment = submitted.expect("pending installment accepts payment");
            let decision = if approve { Decision::Approved } else { Decision::Rejected };
            service
                .decide_payment(&payment.id, &admin, decision, None)
                .expect("decision");
            if approve {
                paid[idx] = true;
            }

            let unpaid: u64 = amounts
                .iter()
                .zip(&paid)
                .filter(|(_, p)| !**p)
                .map(|(a, _)| *a)
                .sum();
            let stored = service.client(&client.id).expect("client");
            prop_assert_eq!(stored.remaining_balance, Amount::from_minor(unpaid));
            prop_assert_eq!(stored.contract_signed, paid.iter().all(|p| *p));

            let expected_status = if paid[idx] { InstallmentStatus::Paid } else { InstallmentStatus::Pending };
            prop_assert_eq!(
                service.installment(&installment.id).expect("installment").status,
                expected_status
            );
        }
    }

    /// Property: once decided, a payment refuses every further decision and
    /// the balance does not move
    #[test]
    fn prop_decisions_are_final(
        amounts in amounts_strategy(),
        first_approve in any::<bool>(),
        second_approve in any::<bool>(),
    ) {
        let (_dir, service) = fresh_service();
        let admin = Actor::new("user1admin", Role::SystemAdmin);
        let client = service
            .register_client("Final", None, None, &schedule_from(&amounts))
            .expect("register");
        let plan = service.installments_for_client(&client.id).expect("plan");

        let payment = service
            .submit_payment(PaymentSubmission::new(&plan[0].id, &client.id, plan[0].amount, PaymentMethod::Deposit))
            .expect("submit");
        let decide = |approve: bool| if approve { Decision::Approved } else { Decision::Rejected };

        service.decide_payment(&payment.id, &admin, decide(first_approve), None).expect("first decision");
        let balance = service.client(&client.id).expect("client").remaining_balance;

        let err = service
            .decide_payment(&payment.id, &admin, decide(second_approve), None)
            .unwrap_err();
        let is_already_decided = matches!(err.downcast_ref::<WorkflowError>(), Some(WorkflowError::AlreadyDecided(_)));
        prop_assert!(is_already_decided);
        prop_assert_eq!(service.client(&client.id).expect("client").remaining_balance, balance);
    }

    /// Property: any amount other than the stored one is refused with
    /// AmountMismatch and the installment stays pending
    #[test]
    fn prop_amount_must_match_exactly(
        stored in 1u64..=1_000_000,
        offered in 0u64..=1_000_000,
    ) {
        prop_assume!(stored != offered);
        let (_dir, service) = fresh_service();
        let client = service
            .register_client("Exact", None, None, &schedule_from(&[stored]))
            .expect("register");
        let plan = service.installments_for_client(&client.id).expect("plan");

        let err = service
            .submit_payment(PaymentSubmission::new(
                &plan[0].id,
                &client.id,
                Amount::from_minor(offered),
                PaymentMethod::Deposit,
            ))
            .unwrap_err();
        let is_mismatch = matches!(err.downcast_ref::<WorkflowError>(), Some(WorkflowError::AmountMismatch { .. }));
        prop_assert!(is_mismatch);
        prop_assert_eq!(
            service.installment(&plan[0].id).expect("installment").status,
            InstallmentStatus::Pending
        );
    }

    /// Property: a non pending installment is refused with
    /// InvalidInstallmentState whatever amount is offered
    #[test]
    fn prop_state_is_checked_before_amount(
        stored in 1u64..=1_000_000,
        offered in 0u64..=1_000_000,
        aged in prop_oneof![Just(InstallmentStatus::Overdue), Just(InstallmentStatus::Late)],
    ) {
        let (_dir, service) = fresh_service();
        let client = service
            .register_client("Aged", None, None, &schedule_from(&[stored]))
            .expect("register");
        let plan = service.installments_for_client(&client.id).expect("plan");
        service.update_installment_status(&plan[0].id, aged).expect("aging");

        let err = service
            .submit_payment(PaymentSubmission::new(
                &plan[0].id,
                &client.id,
                Amount::from_minor(offered),
                PaymentMethod::Deposit,
            ))
            .unwrap_err();
        let is_state_error = matches!(err.downcast_ref::<WorkflowError>(), Some(WorkflowError::InvalidInstallmentState));
        prop_assert!(is_state_error);
    }
}

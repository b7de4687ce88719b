//! Scenario A end to end: register a client with three installments of
//! 100.00, upload a proof for the first, approve it as the seller.
//!
//! Run with `cargo run --example walkthrough [config.yaml]`. Without a config
//! everything lands in a temp directory.

use anyhow::Context;
use installment_approval::{
    PaymentService,
    config::{Settings, init_tracing},
    installment::FinancePlan,
    payment::PaymentSubmission,
    proof::ProofUpload,
    types::{Actor, Amount, Decision, PaymentMethod, Role, TimeStamp},
    utils,
};
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let scratch = tempfile::tempdir()?;
    let settings = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => Settings::load(Some(&path))?,
        None => Settings::in_dir(scratch.path()),
    };
    init_tracing(&settings)?;

    let service = PaymentService::open(&settings)?;
    let seller = Actor::new(utils::new_uuid_to_bech32(utils::USER_HRP)?, Role::Seller);

    let total = Amount::from_major(300).context("amount overflow")?;
    let first_due = TimeStamp::date(2026, 1, 15).context("invalid date")?;
    let schedule = FinancePlan::monthly(total, 3, first_due).schedule()?;
    let client = service.register_client("Ana Torres", Some(&seller.id), Some("estate_north"), &schedule)?;
    let plan = service.installments_for_client(&client.id)?;

    let proof = ProofUpload::new("transfer.png", b"not really a png".to_vec());
    let payment = service.submit_payment(
        PaymentSubmission::new(&plan[0].id, &client.id, plan[0].amount, PaymentMethod::BankTransfer)
            .with_reference("TRX-20260115")
            .with_notes("January installment")
            .with_proof(proof),
    )?;
    println!("submitted {} for installment #1", payment.id);

    let payment = service.decide_payment(&payment.id, &seller, Decision::Approved, None)?;
    let client = service.client(&client.id)?;
    println!(
        "payment {} is {}, balance {}, contract signed: {}",
        payment.id, payment.status, client.remaining_balance, client.contract_signed
    );

    for notification in service.inbox().list_for_recipient(&client.id)? {
        println!("client inbox: {} - {}", notification.title, notification.message);
    }

    service.flush()?;
    Ok(())
}

//! Service layer API for the installment payment workflow
use super::client::{Client, ClientStore};
use super::config::Settings;
use super::error::WorkflowError;
use super::installment::{Installment, InstallmentStore, ScheduledInstallment, installment_key, validate_schedule};
use super::notification::{Inbox, Notification, NotificationEmitter, NotificationSink, OutboxEntry};
use super::payment::{PaymentRecord, PaymentStore, PaymentSubmission};
use super::proof::ProofStorage;
use super::query::{InstallmentFilter, InstallmentStats, PaymentFilter, PaymentStats};
use super::store::{tx_get, tx_put};
use super::types::{Actor, Decision, InstallmentStatus, PaymentStatus, Role, TimeStamp};
use super::utils::{CLIENT_HRP, INSTALLMENT_HRP, PAYMENT_HRP, new_uuid_to_bech32};
use chrono::Utc;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree, abort};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct PaymentService {
    instance: Arc<sled::Db>,
    clients: ClientStore,
    installments: InstallmentStore,
    payments: PaymentStore,
    proofs: ProofStorage,
    inbox: Arc<Inbox>,
    notifications: NotificationEmitter,
    upcoming_window_days: u64,
}

impl PaymentService {
    /// Notifications go to the sled inbox in the same database
    pub fn new(instance: Arc<sled::Db>, proofs: ProofStorage) -> anyhow::Result<Self> {
        let inbox = Arc::new(Inbox::open(&instance)?);
        Self::build(instance, proofs, inbox.clone(), inbox)
    }

    /// Deliver notifications through a custom sink instead of the inbox
    pub fn with_sink(
        instance: Arc<sled::Db>,
        proofs: ProofStorage,
        sink: Arc<dyn NotificationSink>,
    ) -> anyhow::Result<Self> {
        let inbox = Arc::new(Inbox::open(&instance)?);
        Self::build(instance, proofs, inbox, sink)
    }

    pub fn open(settings: &Settings) -> anyhow::Result<Self> {
        let db = Arc::new(sled::open(&settings.database_path)?);
        let proofs = ProofStorage::open(&settings.proof_dir)?;
        let mut service = Self::new(db, proofs)?;
        service.upcoming_window_days = settings.upcoming_window_days;
        Ok(service)
    }

    fn build(
        instance: Arc<sled::Db>,
        proofs: ProofStorage,
        inbox: Arc<Inbox>,
        sink: Arc<dyn NotificationSink>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            clients: ClientStore::open(&instance)?,
            installments: InstallmentStore::open(&instance)?,
            payments: PaymentStore::open(&instance)?,
            notifications: NotificationEmitter::new(&instance, sink)?,
            instance,
            proofs,
            inbox,
            upcoming_window_days: super::config::DEFAULT_UPCOMING_WINDOW_DAYS,
        })
    }

    /// Register a client together with their installment schedule. Both are
    /// written in one transaction; the opening balance is the schedule total.
    pub fn register_client(
        &self,
        name: &str,
        seller_id: Option<&str>,
        real_estate_id: Option<&str>,
        schedule: &[ScheduledInstallment],
    ) -> anyhow::Result<Client> {
        let total = validate_schedule(schedule)?;
        let installment_count = u32::try_from(schedule.len())
            .map_err(|_| WorkflowError::InvalidSchedule("too many installments".into()))?;

        let now = TimeStamp::new();
        let client = Client {
            id: new_uuid_to_bech32(CLIENT_HRP)?,
            name: name.to_string(),
            seller_id: seller_id.map(str::to_string),
            real_estate_id: real_estate_id.map(str::to_string),
            remaining_balance: total,
            contract_signed: false,
            installment_count,
            created_at: now.clone(),
            updated_at: now.clone(),
        };
        let installments = schedule
            .iter()
            .map(|line| -> anyhow::Result<Installment> {
                Ok(Installment {
                    id: new_uuid_to_bech32(INSTALLMENT_HRP)?,
                    client_id: client.id.clone(),
                    installment_number: line.installment_number,
                    amount: line.amount,
                    due_date: line.due_date.clone(),
                    status: InstallmentStatus::Pending,
                    created_at: now.clone(),
                    updated_at: now.clone(),
                })
            })
            .collect::<anyhow::Result<Vec<Installment>>>()?;

        (
            self.clients.tree(),
            self.installments.rows(),
            self.installments.index(),
        )
            .transaction(|(clients, rows, index)| {
                tx_put(clients, client.id.as_bytes(), &client)?;
                for installment in &installments {
                    let key = installment.key();
                    if rows.get(&key)?.is_some() {
                        return abort(WorkflowError::InvalidSchedule(format!(
                            "installment #{} already exists",
                            installment.installment_number
                        )));
                    }
                    tx_put(rows, &key, installment)?;
                    index.insert(installment.id.as_bytes(), key)?;
                }
                Ok(())
            })
            .map_err(WorkflowError::from)?;

        info!(
            client_id = %client.id,
            installments = installment_count,
            balance = %client.remaining_balance,
            "client registered"
        );
        Ok(client)
    }

    /// Set or clear the seller that receives upload notifications
    pub fn assign_seller(&self, client_id: &str, seller_id: Option<&str>) -> anyhow::Result<Client> {
        let client = self
            .clients
            .tree()
            .transaction(|clients| {
                let Some(mut client) = tx_get::<Client>(clients, client_id.as_bytes())? else {
                    return abort(WorkflowError::NotFound("Client not found"));
                };
                client.seller_id = seller_id.map(str::to_string);
                client.updated_at = TimeStamp::new();
                tx_put(clients, client_id.as_bytes(), &client)?;
                Ok(client)
            })
            .map_err(WorkflowError::from)?;

        info!(client_id, seller_id = ?seller_id, "seller assigned");
        Ok(client)
    }

    /// A client uploads proof of payment for one of their pending
    /// installments. The payment is created and the installment moves to
    /// `pending_approval` in one transaction; the assigned seller is told.
    pub fn submit_payment(&self, submission: PaymentSubmission) -> anyhow::Result<PaymentRecord> {
        // fail fast so a rejected submission never leaves a file behind
        let installment = self
            .installments
            .get(&submission.installment_id)?
            .ok_or(WorkflowError::InvalidInstallmentState)?;
        check_submission(&installment, &submission)?;

        let payment_id = new_uuid_to_bech32(PAYMENT_HRP)?;
        let proof_file = match &submission.proof {
            Some(upload) => Some(self.proofs.store(&payment_id, upload)?),
            None => None,
        };

        let now = TimeStamp::new();
        let payment = PaymentRecord {
            id: payment_id,
            installment_id: submission.installment_id.clone(),
            client_id: submission.client_id.clone(),
            amount: submission.amount,
            payment_method: submission.payment_method,
            reference_number: submission.reference_number.clone(),
            proof_file,
            status: PaymentStatus::Pending,
            approved_by: None,
            approved_at: None,
            notes: submission.notes.clone(),
            created_at: now.clone(),
            updated_at: now,
        };

        let committed = (
            self.installments.index(),
            self.installments.rows(),
            self.clients.tree(),
            self.payments.tree(),
            self.notifications.outbox(),
        )
            .transaction(|(index, rows, clients, payments, outbox)| {
                let (key, mut installment) = tx_installment(index, rows, &payment.installment_id)?;
                if let Err(err) = check_submission(&installment, &submission) {
                    return abort(err);
                }
                let Some(client) = tx_get::<Client>(clients, payment.client_id.as_bytes())? else {
                    return abort(WorkflowError::InvalidReference(format!(
                        "client {} does not exist",
                        payment.client_id
                    )));
                };

                tx_put(payments, payment.id.as_bytes(), &payment)?;
                installment.set_status(InstallmentStatus::PendingApproval);
                tx_put(rows, &key, &installment)?;

                if let Some(seller_id) = client.seller_id.as_deref() {
                    match Notification::payment_uploaded(seller_id, &client, &installment, &payment) {
                        Ok(notification) => NotificationEmitter::enqueue(outbox, &notification)?,
                        Err(err) => warn!(payment_id = %payment.id, error = %err, "skipping upload notification"),
                    }
                }
                Ok(installment)
            })
            .map_err(WorkflowError::from);

        let installment = match committed {
            Ok(installment) => installment,
            Err(err) => {
                self.discard_proof(&payment);
                return Err(err.into());
            }
        };

        info!(
            payment_id = %payment.id,
            installment_id = %installment.id,
            installment_number = installment.installment_number,
            client_id = %payment.client_id,
            amount = %payment.amount,
            "payment submitted"
        );
        self.notifications.dispatch_pending();
        Ok(payment)
    }

    /// Approve or reject a pending payment. Payment, installment, balance,
    /// contract flag and the client notification commit together; a payment
    /// that was already decided is refused without side effects.
    pub fn decide_payment(
        &self,
        payment_id: &str,
        approver: &Actor,
        decision: Decision,
        notes: Option<String>,
    ) -> anyhow::Result<PaymentRecord> {
        let (payment, installment, client) = (
            self.payments.tree(),
            self.installments.index(),
            self.installments.rows(),
            self.clients.tree(),
            self.notifications.outbox(),
        )
            .transaction(|(payments, index, rows, clients, outbox)| {
                let Some(mut payment) = tx_get::<PaymentRecord>(payments, payment_id.as_bytes())?
                else {
                    return abort(WorkflowError::NotFound("Payment not found"));
                };
                let Some(mut client) = tx_get::<Client>(clients, payment.client_id.as_bytes())?
                else {
                    return abort(WorkflowError::DanglingReference(format!(
                        "client {} does not exist",
                        payment.client_id
                    )));
                };
                if let Err(err) = authorize_decision(approver, &client) {
                    return abort(err);
                }
                if let Err(err) = payment.decide(&approver.id, decision, notes.clone()) {
                    return abort(err);
                }

                let (key, mut installment) = tx_installment(index, rows, &payment.installment_id)?;
                if installment.status != InstallmentStatus::PendingApproval {
                    return abort(WorkflowError::InvalidInstallmentState);
                }

                let notification = match decision {
                    Decision::Approved => {
                        installment.set_status(InstallmentStatus::Paid);
                        tx_put(rows, &key, &installment)?;

                        if let Err(err) = client.apply_payment(payment.amount) {
                            return abort(err);
                        }
                        let paid = tx_paid_count(rows, &client, &installment)?;
                        client.refresh_contract(paid);
                        tx_put(clients, client.id.as_bytes(), &client)?;

                        Notification::payment_approved(&approver.id, &installment, &payment)
                    }
                    Decision::Rejected => {
                        installment.set_status(InstallmentStatus::Pending);
                        tx_put(rows, &key, &installment)?;

                        Notification::payment_rejected(&approver.id, &installment, &payment)
                    }
                };
                tx_put(payments, payment.id.as_bytes(), &payment)?;

                match notification {
                    Ok(notification) => NotificationEmitter::enqueue(outbox, &notification)?,
                    Err(err) => warn!(payment_id, error = %err, "skipping decision notification"),
                }
                Ok((payment, installment, client))
            })
            .map_err(WorkflowError::from)?;

        info!(
            payment_id,
            approver_id = %approver.id,
            decision = payment.status.as_str(),
            installment_number = installment.installment_number,
            installment_status = installment.status.as_str(),
            remaining_balance = %client.remaining_balance,
            contract_signed = client.contract_signed,
            "payment decided"
        );
        self.notifications.dispatch_pending();
        Ok(payment)
    }

    /// Remove the stored proof file of a payment and clear the reference.
    /// Payment and installment statuses are untouched.
    pub fn delete_proof(&self, payment_id: &str, operator: &Actor) -> anyhow::Result<PaymentRecord> {
        let payment = self.payments.require(payment_id)?;
        let client = self.clients.get(&payment.client_id)?;
        authorize_maintenance(operator, client.as_ref())?;

        let file_removed = match payment.proof_file.as_deref() {
            Some(path) => self.proofs.remove(path)?,
            None => false,
        };

        let payment = self
            .payments
            .tree()
            .transaction(|payments| {
                let Some(mut payment) = tx_get::<PaymentRecord>(payments, payment_id.as_bytes())?
                else {
                    return abort(WorkflowError::NotFound("Payment not found"));
                };
                payment.proof_file = None;
                payment.updated_at = TimeStamp::new();
                tx_put(payments, payment_id.as_bytes(), &payment)?;
                Ok(payment)
            })
            .map_err(WorkflowError::from)?;

        info!(payment_id, operator_id = %operator.id, file_removed, "payment proof deleted");
        Ok(payment)
    }

    /// The aging endpoint: move an installment between `pending`, `overdue`
    /// and `late`. Workflow owned statuses are refused.
    pub fn update_installment_status(
        &self,
        installment_id: &str,
        status: InstallmentStatus,
    ) -> anyhow::Result<Installment> {
        let installment = (self.installments.index(), self.installments.rows())
            .transaction(|(index, rows)| {
                let (key, mut installment) = tx_installment(index, rows, installment_id)?;
                if let Err(err) = installment.age_to(status) {
                    return abort(err);
                }
                tx_put(rows, &key, &installment)?;
                Ok(installment)
            })
            .map_err(|err| match WorkflowError::from(err) {
                WorkflowError::InvalidInstallmentState => {
                    WorkflowError::NotFound("Installment not found")
                }
                other => other,
            })?;

        info!(installment_id, status = status.as_str(), "installment status updated");
        Ok(installment)
    }

    fn discard_proof(&self, payment: &PaymentRecord) {
        if let Some(path) = payment.proof_file.as_deref() {
            if let Err(err) = self.proofs.remove(path) {
                warn!(payment_id = %payment.id, path, error = %err, "failed to clean up proof file");
            }
        }
    }

    pub fn client(&self, client_id: &str) -> anyhow::Result<Client> {
        Ok(self.clients.require(client_id)?)
    }

    pub fn installment(&self, installment_id: &str) -> anyhow::Result<Installment> {
        Ok(self.installments.require(installment_id)?)
    }

    pub fn payment(&self, payment_id: &str) -> anyhow::Result<PaymentRecord> {
        Ok(self.payments.require(payment_id)?)
    }

    /// A client's schedule ordered by installment number
    pub fn installments_for_client(&self, client_id: &str) -> anyhow::Result<Vec<Installment>> {
        Ok(self.installments.list_for_client(client_id)?)
    }

    /// Every attempt made against an installment, rejected ones included
    pub fn payment_history(&self, installment_id: &str) -> anyhow::Result<Vec<PaymentRecord>> {
        Ok(self.payments.for_installment(installment_id)?)
    }

    pub fn list_installments(&self, filter: &InstallmentFilter) -> anyhow::Result<Vec<Installment>> {
        let candidates = match &filter.client_id {
            Some(client_id) => self.installments.list_for_client(client_id)?,
            None => self.installments.all()?,
        };
        let real_estates = self.real_estates_if(filter.real_estate_id.is_some())?;

        Ok(candidates
            .into_iter()
            .filter(|i| filter.matches(i, lookup(&real_estates, &i.client_id)))
            .collect())
    }

    /// Newest first
    pub fn list_payments(&self, filter: &PaymentFilter) -> anyhow::Result<Vec<PaymentRecord>> {
        let real_estates = self.real_estates_if(filter.real_estate_id.is_some())?;
        let mut payments: Vec<PaymentRecord> = self
            .payments
            .all()?
            .into_iter()
            .filter(|p| filter.matches(p, lookup(&real_estates, &p.client_id)))
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    /// Pending or overdue installments whose due date has passed
    pub fn overdue_installments(
        &self,
        now: &TimeStamp<Utc>,
        filter: &InstallmentFilter,
    ) -> anyhow::Result<Vec<Installment>> {
        let mut overdue: Vec<Installment> = self
            .list_installments(filter)?
            .into_iter()
            .filter(|i| i.is_overdue_at(now))
            .collect();
        overdue.sort_by(|a, b| a.due_date.cmp(&b.due_date));
        Ok(overdue)
    }

    /// Pending installments due within the configured window (30 days by default)
    pub fn upcoming_installments(
        &self,
        now: &TimeStamp<Utc>,
        filter: &InstallmentFilter,
    ) -> anyhow::Result<Vec<Installment>> {
        let mut upcoming: Vec<Installment> = self
            .list_installments(filter)?
            .into_iter()
            .filter(|i| i.is_upcoming_at(now, self.upcoming_window_days))
            .collect();
        upcoming.sort_by(|a, b| a.due_date.cmp(&b.due_date));
        Ok(upcoming)
    }

    pub fn installment_statistics(&self, filter: &InstallmentFilter) -> anyhow::Result<InstallmentStats> {
        Ok(InstallmentStats::collect(&self.list_installments(filter)?))
    }

    pub fn payment_statistics(&self, filter: &PaymentFilter) -> anyhow::Result<PaymentStats> {
        Ok(PaymentStats::collect(&self.list_payments(filter)?))
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    /// Direct, best-effort delivery for messages outside the payment flow
    pub fn notifications(&self) -> &NotificationEmitter {
        &self.notifications
    }

    /// Notifications that could not be delivered yet
    pub fn pending_notifications(&self) -> anyhow::Result<Vec<OutboxEntry>> {
        Ok(self.notifications.pending()?)
    }

    /// Retry delivery of queued notifications, returns how many went out
    pub fn retry_notifications(&self) -> usize {
        self.notifications.dispatch_pending()
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        self.instance.flush()?;
        Ok(())
    }

    fn real_estates_if(&self, needed: bool) -> Result<HashMap<String, Option<String>>, WorkflowError> {
        if !needed {
            return Ok(HashMap::new());
        }
        Ok(self
            .clients
            .all()?
            .into_iter()
            .map(|c| (c.id, c.real_estate_id))
            .collect())
    }
}

fn lookup<'a>(real_estates: &'a HashMap<String, Option<String>>, client_id: &str) -> Option<&'a str> {
    real_estates.get(client_id).and_then(|r| r.as_deref())
}

/// State is checked before amount: a non pending installment is refused
/// whatever the amount.
fn check_submission(installment: &Installment, submission: &PaymentSubmission) -> Result<(), WorkflowError> {
    if !installment.accepts_payment_from(&submission.client_id) {
        return Err(WorkflowError::InvalidInstallmentState);
    }
    if submission.amount != installment.amount {
        return Err(WorkflowError::AmountMismatch {
            expected: installment.amount,
            submitted: submission.amount,
        });
    }
    Ok(())
}

/// System admins decide everything, real estate admins their own real
/// estate's clients, sellers only the clients assigned to them.
fn authorize_decision(approver: &Actor, client: &Client) -> Result<(), WorkflowError> {
    let allowed = match &approver.role {
        Role::SystemAdmin => true,
        Role::RealEstateAdmin { real_estate_id } => {
            client.real_estate_id.as_deref() == Some(real_estate_id.as_str())
        }
        Role::Seller => client.seller_id.as_deref() == Some(approver.id.as_str()),
        Role::Client => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(WorkflowError::Unauthorized(format!(
            "{} may not decide payments of client {}",
            approver.id, client.id
        )))
    }
}

fn authorize_maintenance(operator: &Actor, client: Option<&Client>) -> Result<(), WorkflowError> {
    let allowed = match &operator.role {
        Role::SystemAdmin => true,
        Role::RealEstateAdmin { real_estate_id } => client
            .and_then(|c| c.real_estate_id.as_deref())
            .is_some_and(|r| r == real_estate_id),
        Role::Seller | Role::Client => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(WorkflowError::Unauthorized(format!(
            "{} may not delete payment proofs",
            operator.id
        )))
    }
}

/// Resolve an installment id inside a transaction. Unknown ids surface as
/// `InvalidInstallmentState`, a dangling index entry as an integrity failure.
fn tx_installment(
    index: &TransactionalTree,
    rows: &TransactionalTree,
    installment_id: &str,
) -> ConflictableTransactionResult<(Vec<u8>, Installment), WorkflowError> {
    let Some(key) = index.get(installment_id.as_bytes())? else {
        return abort(WorkflowError::InvalidInstallmentState);
    };
    match tx_get::<Installment>(rows, &key)? {
        Some(installment) => Ok((key.to_vec(), installment)),
        None => abort(WorkflowError::DanglingReference(format!(
            "installment {installment_id} is indexed but missing"
        ))),
    }
}

/// Count paid installments by reading the client's whole schedule through
/// the transaction, so a concurrent approval for the same client conflicts.
fn tx_paid_count(
    rows: &TransactionalTree,
    client: &Client,
    just_updated: &Installment,
) -> ConflictableTransactionResult<u32, WorkflowError> {
    let mut paid = 0;
    for number in 1..=client.installment_count {
        let status = if number == just_updated.installment_number {
            Some(just_updated.status)
        } else {
            tx_get::<Installment>(rows, &installment_key(&client.id, number))?.map(|i| i.status)
        };
        if status == Some(InstallmentStatus::Paid) {
            paid += 1;
        }
    }
    Ok(paid)
}

//! Inbox notifications for sellers and clients.
//!
//! Workflow steps never write to the inbox directly. They enqueue into the
//! outbox tree inside their own transaction, and [`NotificationEmitter`]
//! drains the outbox afterwards. A failed delivery stays queued with its
//! attempt counter bumped, so every message is attempted at least once and
//! a broken inbox never fails a payment.
use super::client::Client;
use super::error::WorkflowError;
use super::installment::Installment;
use super::payment::PaymentRecord;
use super::store::{self, Record};
use super::types::TimeStamp;
use super::utils::{NOTIFICATION_HRP, new_uuid_to_bech32};
use chrono::Utc;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    #[n(0)]
    PaymentUploaded,
    #[n(1)]
    PaymentApproved,
    #[n(2)]
    PaymentRejected,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::PaymentUploaded => "payment_uploaded",
            NotificationType::PaymentApproved => "payment_approved",
            NotificationType::PaymentRejected => "payment_rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Notification {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub recipient_id: String,
    #[n(2)]
    pub sender_id: Option<String>,
    #[n(3)]
    pub notification_type: NotificationType,
    #[n(4)]
    pub title: String,
    #[n(5)]
    pub message: String,
    #[n(6)]
    pub related_client_id: Option<String>,
    #[n(7)]
    pub related_payment_id: Option<String>,
    #[n(8)]
    pub read: bool,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
}

impl Record for Notification {}

impl Notification {
    pub fn new(
        recipient_id: &str,
        sender_id: Option<&str>,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        related_client_id: Option<&str>,
        related_payment_id: Option<&str>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            id: new_uuid_to_bech32(NOTIFICATION_HRP)?,
            recipient_id: recipient_id.to_string(),
            sender_id: sender_id.map(str::to_string),
            notification_type,
            title: title.into(),
            message: message.into(),
            related_client_id: related_client_id.map(str::to_string),
            related_payment_id: related_payment_id.map(str::to_string),
            read: false,
            created_at: TimeStamp::new(),
        })
    }

    /// Tells the assigned seller a client uploaded a proof
    pub fn payment_uploaded(
        seller_id: &str,
        client: &Client,
        installment: &Installment,
        payment: &PaymentRecord,
    ) -> anyhow::Result<Self> {
        Self::new(
            seller_id,
            Some(client.id.as_str()),
            NotificationType::PaymentUploaded,
            "Payment uploaded",
            format!(
                "{} uploaded a payment of {} for installment #{}",
                client.name, payment.amount, installment.installment_number
            ),
            Some(client.id.as_str()),
            Some(payment.id.as_str()),
        )
    }

    pub fn payment_approved(
        approver_id: &str,
        installment: &Installment,
        payment: &PaymentRecord,
    ) -> anyhow::Result<Self> {
        Self::new(
            &payment.client_id,
            Some(approver_id),
            NotificationType::PaymentApproved,
            "Payment approved",
            format!(
                "Your payment of {} for installment #{} was approved",
                payment.amount, installment.installment_number
            ),
            Some(payment.client_id.as_str()),
            Some(payment.id.as_str()),
        )
    }

    /// Carries the approver's notes so the client knows what to fix
    pub fn payment_rejected(
        approver_id: &str,
        installment: &Installment,
        payment: &PaymentRecord,
    ) -> anyhow::Result<Self> {
        let mut message = format!(
            "Your payment of {} for installment #{} was rejected",
            payment.amount, installment.installment_number
        );
        if let Some(notes) = payment.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            message.push_str(". Reason: ");
            message.push_str(notes);
        }
        Self::new(
            &payment.client_id,
            Some(approver_id),
            NotificationType::PaymentRejected,
            "Payment rejected",
            message,
            Some(payment.client_id.as_str()),
            Some(payment.id.as_str()),
        )
    }

    fn outbox_key(&self) -> Vec<u8> {
        let micros = self.created_at.to_datetime_utc().timestamp_micros().max(0) as u64;
        let mut key = micros.to_be_bytes().to_vec();
        key.extend_from_slice(self.id.as_bytes());
        key
    }
}

/// A queued notification and how often delivery has been tried
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct OutboxEntry {
    #[n(0)]
    pub notification: Notification,
    #[n(1)]
    pub attempts: u32,
}

impl Record for OutboxEntry {}

/// Where notifications end up. The sled [`Inbox`] is the default; tests and
/// other transports plug in here.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: &Notification) -> anyhow::Result<()>;
}

pub struct Inbox {
    tree: sled::Tree,
}

impl Inbox {
    pub fn open(db: &sled::Db) -> Result<Self, WorkflowError> {
        Ok(Self {
            tree: db.open_tree(store::NOTIFICATIONS_TREE)?,
        })
    }
    /// Newest first
    pub fn list_for_recipient(&self, recipient_id: &str) -> Result<Vec<Notification>, WorkflowError> {
        let mut found: Vec<Notification> = store::scan_records::<Notification>(&self.tree)?
            .into_iter()
            .filter(|n| n.recipient_id == recipient_id)
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
    pub fn unread_count(&self, recipient_id: &str) -> Result<usize, WorkflowError> {
        Ok(self
            .list_for_recipient(recipient_id)?
            .iter()
            .filter(|n| !n.read)
            .count())
    }
    pub fn mark_read(&self, notification_id: &str) -> Result<Notification, WorkflowError> {
        let mut notification: Notification =
            store::get_record(&self.tree, notification_id.as_bytes())?
                .ok_or(WorkflowError::NotFound("Notification not found"))?;
        notification.read = true;
        self.tree
            .insert(notification.id.as_bytes(), notification.to_cbor()?)?;
        Ok(notification)
    }
}

impl NotificationSink for Inbox {
    /// Only the first delivery lands. A repeat keeps the stored copy and
    /// with it the read flag.
    fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        let bytes = notification.to_cbor()?;
        if self
            .tree
            .compare_and_swap(notification.id.as_bytes(), None as Option<&[u8]>, Some(bytes))?
            .is_err()
        {
            debug!(notification_id = %notification.id, "notification already in the inbox");
        }
        Ok(())
    }
}

pub struct NotificationEmitter {
    outbox: sled::Tree,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationEmitter {
    pub fn new(db: &sled::Db, sink: Arc<dyn NotificationSink>) -> Result<Self, WorkflowError> {
        Ok(Self {
            outbox: db.open_tree(store::OUTBOX_TREE)?,
            sink,
        })
    }

    pub(crate) fn outbox(&self) -> &sled::Tree {
        &self.outbox
    }

    /// Queue a notification as part of the caller's transaction
    pub(crate) fn enqueue(
        outbox: &TransactionalTree,
        notification: &Notification,
    ) -> ConflictableTransactionResult<(), WorkflowError> {
        let entry = OutboxEntry {
            notification: notification.clone(),
            attempts: 0,
        };
        store::tx_put(outbox, &notification.outbox_key(), &entry)
    }

    /// Deliver a notification right away. Best effort: failures are logged
    /// and swallowed.
    #[allow(clippy::too_many_arguments)]
    pub fn notify(
        &self,
        recipient_id: &str,
        sender_id: Option<&str>,
        notification_type: NotificationType,
        title: &str,
        message: &str,
        related_client_id: Option<&str>,
        related_payment_id: Option<&str>,
    ) {
        let delivered = Notification::new(
            recipient_id,
            sender_id,
            notification_type,
            title,
            message,
            related_client_id,
            related_payment_id,
        )
        .and_then(|notification| self.sink.deliver(&notification));

        if let Err(err) = delivered {
            warn!(
                recipient_id,
                notification_type = notification_type.as_str(),
                error = %err,
                "notification could not be delivered"
            );
        }
    }

    /// Entries still waiting for delivery, oldest first
    pub fn pending(&self) -> Result<Vec<OutboxEntry>, WorkflowError> {
        store::scan_records(&self.outbox)
    }

    /// Try to deliver everything in the outbox. Returns how many were
    /// delivered; failures stay queued for the next run.
    ///
    /// Each entry is claimed by swapping it out of the outbox before
    /// delivery, so concurrent dispatchers never hand out the same entry
    /// twice and a failed attempt cannot resurrect one another run already
    /// delivered.
    pub fn dispatch_pending(&self) -> usize {
        let mut delivered = 0;
        for item in self.outbox.iter() {
            let (key, value) = match item {
                Ok(kv) => kv,
                Err(err) => {
                    warn!(error = %err, "failed to read notification outbox");
                    break;
                }
            };

            match self.outbox.compare_and_swap(&key, Some(&value), None as Option<sled::IVec>) {
                Ok(Ok(())) => {}
                // another dispatcher got there first
                Ok(Err(_)) => continue,
                Err(err) => {
                    warn!(error = %err, "failed to claim outbox entry");
                    continue;
                }
            }

            let mut entry = match OutboxEntry::from_cbor(&value) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "dropped undecodable outbox entry");
                    continue;
                }
            };

            match self.sink.deliver(&entry.notification) {
                Ok(()) => {
                    debug!(
                        notification_id = %entry.notification.id,
                        notification_type = entry.notification.notification_type.as_str(),
                        "notification delivered"
                    );
                    delivered += 1;
                }
                Err(err) => {
                    entry.attempts += 1;
                    warn!(
                        notification_id = %entry.notification.id,
                        attempts = entry.attempts,
                        error = %err,
                        "notification delivery failed, keeping it queued"
                    );
                    self.requeue(&key, &entry);
                }
            }
        }
        delivered
    }

    fn requeue(&self, key: &[u8], entry: &OutboxEntry) {
        let bytes = match entry.to_cbor() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(notification_id = %entry.notification.id, error = %err, "notification lost, could not encode it");
                return;
            }
        };
        match self.outbox.compare_and_swap(key, None as Option<&[u8]>, Some(bytes)) {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                warn!(notification_id = %entry.notification.id, "outbox slot taken, dropping retry")
            }
            Err(err) => {
                warn!(notification_id = %entry.notification.id, error = %err, "notification lost, could not requeue it")
            }
        }
    }
}

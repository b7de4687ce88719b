//! Uploaded proof-of-payment submissions
use super::error::WorkflowError;
use super::proof::ProofUpload;
use super::store::{self, Record};
use super::types::{Amount, Decision, PaymentMethod, PaymentStatus, TimeStamp};
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct PaymentRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub installment_id: String,
    #[n(2)]
    pub client_id: String, // denormalized for filtering
    #[n(3)]
    pub amount: Amount,
    #[n(4)]
    pub payment_method: PaymentMethod,
    #[n(5)]
    pub reference_number: Option<String>,
    #[n(6)]
    pub proof_file: Option<String>, // path inside the proof directory
    #[n(7)]
    pub status: PaymentStatus,
    #[n(8)]
    pub approved_by: Option<String>,
    #[n(9)]
    pub approved_at: Option<TimeStamp<Utc>>,
    #[n(10)]
    pub notes: Option<String>,
    #[n(11)]
    pub created_at: TimeStamp<Utc>,
    #[n(12)]
    pub updated_at: TimeStamp<Utc>,
}

impl Record for PaymentRecord {}

impl PaymentRecord {
    /// Record the approver's decision. Only a pending payment can be
    /// decided; anything else is a conflict and leaves the record untouched.
    pub fn decide(
        &mut self,
        approver_id: &str,
        decision: Decision,
        notes: Option<String>,
    ) -> Result<(), WorkflowError> {
        if self.status != PaymentStatus::Pending {
            return Err(WorkflowError::AlreadyDecided(self.status));
        }
        let now = TimeStamp::new();
        self.status = decision.resulting_status();
        self.approved_by = Some(approver_id.to_string());
        self.approved_at = Some(now.clone());
        self.notes = notes;
        self.updated_at = now;
        Ok(())
    }
}

/// What a client hands in when paying an installment
#[derive(Debug, Clone)]
pub struct PaymentSubmission {
    pub installment_id: String,
    pub client_id: String,
    pub amount: Amount,
    pub payment_method: PaymentMethod,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub proof: Option<ProofUpload>,
}

impl PaymentSubmission {
    pub fn new(
        installment_id: impl Into<String>,
        client_id: impl Into<String>,
        amount: Amount,
        payment_method: PaymentMethod,
    ) -> Self {
        Self {
            installment_id: installment_id.into(),
            client_id: client_id.into(),
            amount,
            payment_method,
            reference_number: None,
            notes: None,
            proof: None,
        }
    }
    pub fn with_reference(mut self, reference_number: impl Into<String>) -> Self {
        self.reference_number = Some(reference_number.into());
        self
    }
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
    pub fn with_proof(mut self, proof: ProofUpload) -> Self {
        self.proof = Some(proof);
        self
    }
}

pub struct PaymentStore {
    tree: sled::Tree,
}

impl PaymentStore {
    pub fn open(db: &sled::Db) -> Result<Self, WorkflowError> {
        Ok(Self {
            tree: db.open_tree(store::PAYMENTS_TREE)?,
        })
    }
    pub(crate) fn tree(&self) -> &sled::Tree {
        &self.tree
    }
    pub fn get(&self, payment_id: &str) -> Result<Option<PaymentRecord>, WorkflowError> {
        store::get_record(&self.tree, payment_id.as_bytes())
    }
    pub fn require(&self, payment_id: &str) -> Result<PaymentRecord, WorkflowError> {
        self.get(payment_id)?
            .ok_or(WorkflowError::NotFound("Payment not found"))
    }
    pub fn all(&self) -> Result<Vec<PaymentRecord>, WorkflowError> {
        store::scan_records(&self.tree)
    }
    /// Every attempt made against one installment, oldest first
    pub fn for_installment(&self, installment_id: &str) -> Result<Vec<PaymentRecord>, WorkflowError> {
        let mut attempts: Vec<PaymentRecord> = self
            .all()?
            .into_iter()
            .filter(|p| p.installment_id == installment_id)
            .collect();
        attempts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(attempts)
    }
}

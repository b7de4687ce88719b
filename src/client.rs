//! The client entity as far as the payment workflow cares: who sells to
//! them, how much they still owe and whether their contract is complete.
use super::error::WorkflowError;
use super::store::{self, Record};
use super::types::{Amount, TimeStamp};
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Client {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub seller_id: Option<String>, // notification routing only
    #[n(3)]
    pub real_estate_id: Option<String>,
    #[n(4)]
    pub remaining_balance: Amount,
    #[n(5)]
    pub contract_signed: bool,
    #[n(6)]
    pub installment_count: u32,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
    #[n(8)]
    pub updated_at: TimeStamp<Utc>,
}

impl Record for Client {}

impl Client {
    /// Take an approved payment off the balance
    pub fn apply_payment(&mut self, amount: Amount) -> Result<(), WorkflowError> {
        self.remaining_balance = self
            .remaining_balance
            .checked_sub(amount)
            .ok_or(WorkflowError::BalanceUnderflow)?;
        self.updated_at = TimeStamp::new();
        Ok(())
    }

    /// The contract counts as signed once every installment is paid. A
    /// client without installments is never signed automatically.
    pub fn refresh_contract(&mut self, paid_count: u32) {
        if self.installment_count > 0 && paid_count == self.installment_count {
            self.contract_signed = true;
        }
    }
}

pub struct ClientStore {
    tree: sled::Tree,
}

impl ClientStore {
    pub fn open(db: &sled::Db) -> Result<Self, WorkflowError> {
        Ok(Self {
            tree: db.open_tree(store::CLIENTS_TREE)?,
        })
    }
    pub(crate) fn tree(&self) -> &sled::Tree {
        &self.tree
    }
    pub fn get(&self, client_id: &str) -> Result<Option<Client>, WorkflowError> {
        store::get_record(&self.tree, client_id.as_bytes())
    }
    pub fn require(&self, client_id: &str) -> Result<Client, WorkflowError> {
        self.get(client_id)?
            .ok_or(WorkflowError::NotFound("Client not found"))
    }
    pub fn all(&self) -> Result<Vec<Client>, WorkflowError> {
        store::scan_records(&self.tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(balance: u64, installments: u32) -> Client {
        Client {
            id: "client1test".into(),
            name: "Test".into(),
            seller_id: None,
            real_estate_id: None,
            remaining_balance: Amount::from_minor(balance),
            contract_signed: false,
            installment_count: installments,
            created_at: TimeStamp::new(),
            updated_at: TimeStamp::new(),
        }
    }

    #[test]
    fn apply_payment_refuses_to_go_negative() {
        let mut c = client(100, 1);
        assert!(matches!(
            c.apply_payment(Amount::from_minor(101)),
            Err(WorkflowError::BalanceUnderflow)
        ));
        assert_eq!(c.remaining_balance, Amount::from_minor(100));
    }

    #[test]
    fn zero_installments_never_signs() {
        let mut c = client(0, 0);
        c.refresh_contract(0);
        assert!(!c.contract_signed);
    }

    #[test]
    fn signs_once_all_paid() {
        let mut c = client(0, 3);
        c.refresh_contract(2);
        assert!(!c.contract_signed);
        c.refresh_contract(3);
        assert!(c.contract_signed);
    }
}

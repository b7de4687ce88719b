//! Scheduled payment obligations and their store
use super::error::WorkflowError;
use super::store::{self, Record};
use super::types::{Amount, InstallmentStatus, TimeStamp};
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Installment {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub client_id: String,
    #[n(2)]
    pub installment_number: u32, // 1-based, unique per client
    #[n(3)]
    pub amount: Amount,
    #[n(4)]
    pub due_date: TimeStamp<Utc>,
    #[n(5)]
    pub status: InstallmentStatus,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
    #[n(7)]
    pub updated_at: TimeStamp<Utc>,
}

impl Record for Installment {}

/// Primary key: the owning client followed by the big endian installment
/// number, so a prefix scan yields one client's schedule in order.
pub fn installment_key(client_id: &str, installment_number: u32) -> Vec<u8> {
    let mut key = client_prefix(client_id);
    key.extend_from_slice(&installment_number.to_be_bytes());
    key
}

fn client_prefix(client_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(client_id.len() + 5);
    prefix.extend_from_slice(client_id.as_bytes());
    prefix.push(b'/');
    prefix
}

impl Installment {
    pub fn key(&self) -> Vec<u8> {
        installment_key(&self.client_id, self.installment_number)
    }

    /// Only a pending installment owned by `client_id` accepts a payment
    pub fn accepts_payment_from(&self, client_id: &str) -> bool {
        self.client_id == client_id && self.status == InstallmentStatus::Pending
    }

    pub fn set_status(&mut self, status: InstallmentStatus) {
        self.status = status;
        self.updated_at = TimeStamp::new();
    }

    /// Aging transition requested from outside the payment workflow
    pub fn age_to(&mut self, status: InstallmentStatus) -> Result<(), WorkflowError> {
        if !self.status.is_aging_status() || !status.is_aging_status() {
            return Err(WorkflowError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        self.set_status(status);
        Ok(())
    }

    pub fn is_overdue_at(&self, now: &TimeStamp<Utc>) -> bool {
        matches!(
            self.status,
            InstallmentStatus::Pending | InstallmentStatus::Overdue
        ) && self.due_date < *now
    }

    /// Pending and due within `window_days` from `now`, inclusive
    pub fn is_upcoming_at(&self, now: &TimeStamp<Utc>, window_days: u64) -> bool {
        let Some(horizon) = now.add_days(window_days) else {
            return false;
        };
        self.status == InstallmentStatus::Pending
            && self.due_date >= *now
            && self.due_date <= horizon
    }
}

/// One line of a schedule handed over when a financed purchase is set up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledInstallment {
    pub installment_number: u32,
    pub amount: Amount,
    pub due_date: TimeStamp<Utc>,
}

/// Equal monthly installments over a financed total
#[derive(Debug, Clone)]
pub struct FinancePlan {
    pub total: Amount,
    pub installment_count: u32,
    pub first_due_date: TimeStamp<Utc>,
}

impl FinancePlan {
    pub fn monthly(total: Amount, installment_count: u32, first_due_date: TimeStamp<Utc>) -> Self {
        Self {
            total,
            installment_count,
            first_due_date,
        }
    }

    /// Split the total evenly; the last installment absorbs the remainder
    pub fn schedule(&self) -> Result<Vec<ScheduledInstallment>, WorkflowError> {
        if self.installment_count == 0 {
            return Err(WorkflowError::InvalidSchedule(
                "a plan needs at least one installment".into(),
            ));
        }
        let count = u64::from(self.installment_count);
        let base = self.total.minor_units() / count;
        let remainder = self.total.minor_units() % count;
        if base == 0 {
            return Err(WorkflowError::InvalidSchedule(format!(
                "{} cannot be split into {} installments",
                self.total, self.installment_count
            )));
        }

        (1..=self.installment_count)
            .map(|number| -> Result<ScheduledInstallment, WorkflowError> {
                let minor = if number == self.installment_count {
                    base + remainder
                } else {
                    base
                };
                let due_date = self.first_due_date.add_months(number - 1).ok_or_else(|| {
                    WorkflowError::InvalidSchedule("due date out of range".into())
                })?;
                Ok(ScheduledInstallment {
                    installment_number: number,
                    amount: Amount::from_minor(minor),
                    due_date,
                })
            })
            .collect()
    }
}

/// Check a schedule before it is written: non empty, non zero amounts,
/// numbers exactly 1..=n.
pub fn validate_schedule(schedule: &[ScheduledInstallment]) -> Result<Amount, WorkflowError> {
    if schedule.is_empty() {
        return Err(WorkflowError::InvalidSchedule(
            "schedule has no installments".into(),
        ));
    }
    let mut numbers: Vec<u32> = schedule.iter().map(|s| s.installment_number).collect();
    numbers.sort_unstable();
    for (expected, number) in (1u32..).zip(&numbers) {
        if *number != expected {
            return Err(WorkflowError::InvalidSchedule(format!(
                "installment numbers must run 1..={} without gaps or duplicates",
                schedule.len()
            )));
        }
    }
    if let Some(zero) = schedule.iter().find(|s| s.amount.is_zero()) {
        return Err(WorkflowError::InvalidSchedule(format!(
            "installment #{} has a zero amount",
            zero.installment_number
        )));
    }
    Amount::total(schedule.iter().map(|s| &s.amount))
        .ok_or_else(|| WorkflowError::InvalidSchedule("schedule total overflows".into()))
}

pub struct InstallmentStore {
    rows: sled::Tree,
    index: sled::Tree, // installment id -> row key
}

impl InstallmentStore {
    pub fn open(db: &sled::Db) -> Result<Self, WorkflowError> {
        Ok(Self {
            rows: db.open_tree(store::INSTALLMENTS_TREE)?,
            index: db.open_tree(store::INSTALLMENT_INDEX_TREE)?,
        })
    }
    pub(crate) fn rows(&self) -> &sled::Tree {
        &self.rows
    }
    pub(crate) fn index(&self) -> &sled::Tree {
        &self.index
    }
    pub fn get(&self, installment_id: &str) -> Result<Option<Installment>, WorkflowError> {
        match self.index.get(installment_id.as_bytes())? {
            Some(key) => store::get_record(&self.rows, &key),
            None => Ok(None),
        }
    }
    pub fn require(&self, installment_id: &str) -> Result<Installment, WorkflowError> {
        self.get(installment_id)?
            .ok_or(WorkflowError::NotFound("Installment not found"))
    }
    /// A client's schedule ordered by installment number
    pub fn list_for_client(&self, client_id: &str) -> Result<Vec<Installment>, WorkflowError> {
        self.rows
            .scan_prefix(client_prefix(client_id))
            .values()
            .map(|value| Installment::from_cbor(&value?))
            .collect()
    }
    pub fn all(&self) -> Result<Vec<Installment>, WorkflowError> {
        store::scan_records(&self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> TimeStamp<Utc> {
        TimeStamp::date(2025, 3, d).unwrap()
    }

    fn installment(status: InstallmentStatus, due: TimeStamp<Utc>) -> Installment {
        Installment {
            id: "inst1test".into(),
            client_id: "client1test".into(),
            installment_number: 1,
            amount: Amount::from_minor(10_000),
            due_date: due,
            status,
            created_at: TimeStamp::new(),
            updated_at: TimeStamp::new(),
        }
    }

    #[test]
    fn keys_sort_by_installment_number() {
        assert!(installment_key("c", 2) < installment_key("c", 10));
        assert!(installment_key("c", 255) < installment_key("c", 256));
    }

    #[test]
    fn plan_puts_remainder_on_last_installment() {
        let plan = FinancePlan::monthly(Amount::from_minor(1_000), 3, day(1));
        let schedule = plan.schedule().unwrap();

        let amounts: Vec<u64> = schedule.iter().map(|s| s.amount.minor_units()).collect();
        assert_eq!(amounts, vec![333, 333, 334]);
        assert_eq!(schedule[2].due_date, TimeStamp::date(2025, 5, 1).unwrap());
        assert_eq!(validate_schedule(&schedule).unwrap(), Amount::from_minor(1_000));
    }

    #[test]
    fn schedule_with_gap_is_rejected() {
        let mut schedule = FinancePlan::monthly(Amount::from_minor(300), 3, day(1))
            .schedule()
            .unwrap();
        schedule[2].installment_number = 4;

        assert!(matches!(
            validate_schedule(&schedule),
            Err(WorkflowError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn overdue_only_counts_open_installments() {
        let now = day(10);
        assert!(installment(InstallmentStatus::Pending, day(9)).is_overdue_at(&now));
        assert!(installment(InstallmentStatus::Overdue, day(9)).is_overdue_at(&now));
        assert!(!installment(InstallmentStatus::Late, day(9)).is_overdue_at(&now));
        assert!(!installment(InstallmentStatus::Paid, day(9)).is_overdue_at(&now));
        assert!(!installment(InstallmentStatus::Pending, day(10)).is_overdue_at(&now));
    }

    #[test]
    fn upcoming_window_is_inclusive() {
        let now = day(1);
        assert!(installment(InstallmentStatus::Pending, day(31)).is_upcoming_at(&now, 30));
        let past_window = day(1).add_days(31).unwrap();
        assert!(!installment(InstallmentStatus::Pending, past_window).is_upcoming_at(&now, 30));
        assert!(!installment(InstallmentStatus::PendingApproval, day(5)).is_upcoming_at(&now, 30));
    }

    #[test]
    fn workflow_statuses_cannot_be_aged() {
        let mut inst = installment(InstallmentStatus::PendingApproval, day(1));
        assert!(inst.age_to(InstallmentStatus::Overdue).is_err());

        let mut inst = installment(InstallmentStatus::Pending, day(1));
        assert!(inst.age_to(InstallmentStatus::Paid).is_err());
        inst.age_to(InstallmentStatus::Late).unwrap();
        assert_eq!(inst.status, InstallmentStatus::Late);
    }
}

//! Read side filters and aggregates over installments and payments. Nothing
//! here writes.
use super::installment::Installment;
use super::payment::PaymentRecord;
use super::types::{Amount, InstallmentStatus, PaymentStatus, TimeStamp};
use chrono::Utc;

#[derive(Debug, Clone, Default)]
pub struct InstallmentFilter {
    pub client_id: Option<String>,
    pub status: Option<InstallmentStatus>,
    pub real_estate_id: Option<String>,
    pub due_from: Option<TimeStamp<Utc>>,
    pub due_to: Option<TimeStamp<Utc>>,
}

impl InstallmentFilter {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
    pub fn status(mut self, status: InstallmentStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn real_estate(mut self, real_estate_id: impl Into<String>) -> Self {
        self.real_estate_id = Some(real_estate_id.into());
        self
    }
    /// Due dates within `from..=to`
    pub fn due_between(mut self, from: TimeStamp<Utc>, to: TimeStamp<Utc>) -> Self {
        self.due_from = Some(from);
        self.due_to = Some(to);
        self
    }

    /// `real_estate_of` is the real estate of the installment's client, if any
    pub fn matches(&self, installment: &Installment, real_estate_of: Option<&str>) -> bool {
        if let Some(client_id) = &self.client_id {
            if &installment.client_id != client_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if installment.status != status {
                return false;
            }
        }
        if let Some(real_estate_id) = &self.real_estate_id {
            if real_estate_of != Some(real_estate_id.as_str()) {
                return false;
            }
        }
        if let Some(from) = &self.due_from {
            if installment.due_date < *from {
                return false;
            }
        }
        if let Some(to) = &self.due_to {
            if installment.due_date > *to {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub client_id: Option<String>,
    pub status: Option<PaymentStatus>,
    pub installment_id: Option<String>,
    pub real_estate_id: Option<String>,
    pub created_from: Option<TimeStamp<Utc>>,
    pub created_to: Option<TimeStamp<Utc>>,
}

impl PaymentFilter {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
    pub fn status(mut self, status: PaymentStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn installment(mut self, installment_id: impl Into<String>) -> Self {
        self.installment_id = Some(installment_id.into());
        self
    }
    pub fn real_estate(mut self, real_estate_id: impl Into<String>) -> Self {
        self.real_estate_id = Some(real_estate_id.into());
        self
    }
    pub fn created_between(mut self, from: TimeStamp<Utc>, to: TimeStamp<Utc>) -> Self {
        self.created_from = Some(from);
        self.created_to = Some(to);
        self
    }

    pub fn matches(&self, payment: &PaymentRecord, real_estate_of: Option<&str>) -> bool {
        if let Some(client_id) = &self.client_id {
            if &payment.client_id != client_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if payment.status != status {
                return false;
            }
        }
        if let Some(installment_id) = &self.installment_id {
            if &payment.installment_id != installment_id {
                return false;
            }
        }
        if let Some(real_estate_id) = &self.real_estate_id {
            if real_estate_of != Some(real_estate_id.as_str()) {
                return false;
            }
        }
        if let Some(from) = &self.created_from {
            if payment.created_at < *from {
                return false;
            }
        }
        if let Some(to) = &self.created_to {
            if payment.created_at > *to {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallmentStats {
    pub total: usize,
    pub pending: usize,
    pub pending_approval: usize,
    pub paid: usize,
    pub overdue: usize,
    pub late: usize,
    pub total_amount: Amount,
    pub paid_amount: Amount,
    pub outstanding_amount: Amount,
}

impl InstallmentStats {
    pub fn collect<'a>(installments: impl IntoIterator<Item = &'a Installment>) -> Self {
        let mut stats = Self::default();
        for installment in installments {
            stats.total += 1;
            stats.total_amount = stats.total_amount.saturating_add(installment.amount);
            match installment.status {
                InstallmentStatus::Pending => stats.pending += 1,
                InstallmentStatus::PendingApproval => stats.pending_approval += 1,
                InstallmentStatus::Paid => stats.paid += 1,
                InstallmentStatus::Overdue => stats.overdue += 1,
                InstallmentStatus::Late => stats.late += 1,
            }
            if installment.status == InstallmentStatus::Paid {
                stats.paid_amount = stats.paid_amount.saturating_add(installment.amount);
            } else {
                stats.outstanding_amount =
                    stats.outstanding_amount.saturating_add(installment.amount);
            }
        }
        stats
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub pending_amount: Amount,
    pub approved_amount: Amount,
}

impl PaymentStats {
    pub fn collect<'a>(payments: impl IntoIterator<Item = &'a PaymentRecord>) -> Self {
        let mut stats = Self::default();
        for payment in payments {
            stats.total += 1;
            match payment.status {
                PaymentStatus::Pending => {
                    stats.pending += 1;
                    stats.pending_amount = stats.pending_amount.saturating_add(payment.amount);
                }
                PaymentStatus::Approved => {
                    stats.approved += 1;
                    stats.approved_amount = stats.approved_amount.saturating_add(payment.amount);
                }
                PaymentStatus::Rejected => stats.rejected += 1,
            }
        }
        stats
    }
}

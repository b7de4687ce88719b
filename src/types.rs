//! Core value types shared by every record: money, time and statuses
use super::error::WorkflowError;
use chrono::{DateTime, Days, Months, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Money as an integer count of minor units (cents). Equality is exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_minor(minor_units: u64) -> Self {
        Self(minor_units)
    }
    /// Whole currency units, e.g. `Amount::from_major(100)` is `100.00`
    pub fn from_major(units: u64) -> Option<Self> {
        units.checked_mul(100).map(Self)
    }
    pub fn minor_units(&self) -> u64 {
        self.0
    }
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }
    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }
    /// Sum a set of amounts, `None` on overflow
    pub fn total<'a>(amounts: impl IntoIterator<Item = &'a Amount>) -> Option<Amount> {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, next| acc.checked_add(*next))
    }
    /// The amount in currency units, always with two decimal places
    pub fn to_decimal(&self) -> Decimal {
        Decimal::from_i128_with_scale(i128::from(self.0), 2)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = WorkflowError;

    /// Refuses negative values and anything finer than a cent
    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        let invalid = || WorkflowError::InvalidAmount(value.to_string());
        let value = value.normalize();
        if value.is_sign_negative() || value.scale() > 2 {
            return Err(invalid());
        }
        value
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|minor| minor.to_u64())
            .map(Amount)
            .ok_or_else(invalid)
    }
}

impl FromStr for Amount {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str_exact(s.trim())
            .map_err(|_| WorkflowError::InvalidAmount(s.to_string()))?;
        Amount::try_from(value).map_err(|_| WorkflowError::InvalidAmount(s.to_string()))
    }
}

impl<C> minicbor::Encode<C> for Amount {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.u64(self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Amount {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(Amount(d.u64()?))
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    /// Midnight UTC on the given calendar day, `None` if the date does not exist
    pub fn date(year: i32, month: u32, day: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn add_days(&self, days: u64) -> Option<Self> {
        self.0.checked_add_days(Days::new(days)).map(Self)
    }
    pub fn add_months(&self, months: u32) -> Option<Self> {
        self.0.checked_add_months(Months::new(months)).map(Self)
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl fmt::Display for TimeStamp<Utc> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallmentStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    PendingApproval,
    #[n(2)]
    Paid,
    #[n(3)]
    Overdue,
    #[n(4)]
    Late,
}

impl InstallmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallmentStatus::Pending => "pending",
            InstallmentStatus::PendingApproval => "pending_approval",
            InstallmentStatus::Paid => "paid",
            InstallmentStatus::Overdue => "overdue",
            InstallmentStatus::Late => "late",
        }
    }
    /// Statuses the aging endpoint may move between. `paid` and
    /// `pending_approval` belong to the payment workflow.
    pub fn is_aging_status(&self) -> bool {
        matches!(
            self,
            InstallmentStatus::Pending | InstallmentStatus::Overdue | InstallmentStatus::Late
        )
    }
}

impl fmt::Display for InstallmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallmentStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InstallmentStatus::Pending),
            "pending_approval" => Ok(InstallmentStatus::PendingApproval),
            "paid" => Ok(InstallmentStatus::Paid),
            "overdue" => Ok(InstallmentStatus::Overdue),
            "late" => Ok(InstallmentStatus::Late),
            other => Err(WorkflowError::UnknownName {
                kind: "installment status",
                name: other.to_string(),
            }),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    #[n(0)]
    BankTransfer,
    #[n(1)]
    Deposit,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Deposit => "deposit",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "deposit" => Ok(PaymentMethod::Deposit),
            other => Err(WorkflowError::UnknownName {
                kind: "payment method",
                name: other.to_string(),
            }),
        }
    }
}

/// The two outcomes an approver can give a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn resulting_status(&self) -> PaymentStatus {
        match self {
            Decision::Approved => PaymentStatus::Approved,
            Decision::Rejected => PaymentStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    SystemAdmin,
    RealEstateAdmin { real_estate_id: String },
    Seller,
    Client,
}

/// The authenticated caller, as handed over by the auth layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn amount_parses_decimal_strings() {
        assert_eq!("100".parse::<Amount>().unwrap(), Amount::from_minor(10_000));
        assert_eq!("100.5".parse::<Amount>().unwrap(), Amount::from_minor(10_050));
        assert_eq!("0.07".parse::<Amount>().unwrap(), Amount::from_minor(7));
        assert_eq!("100.000".parse::<Amount>().unwrap(), Amount::from_minor(10_000));
        assert_eq!(".50".parse::<Amount>().unwrap(), Amount::from_minor(50));
        assert!("100.505".parse::<Amount>().is_err());
        assert!("-1".parse::<Amount>().is_err());
        assert!("".parse::<Amount>().is_err());
        assert!("abc".parse::<Amount>().is_err());
    }

    #[test]
    fn amount_from_decimal() {
        assert_eq!(Amount::try_from(Decimal::new(15_000, 2)).unwrap(), Amount::from_minor(15_000));
        assert_eq!(Amount::try_from(Decimal::new(1_500, 0)).unwrap(), Amount::from_minor(150_000));
        assert!(Amount::try_from(Decimal::new(1, 3)).is_err());
        assert!(Amount::try_from(Decimal::new(-100, 2)).is_err());
        assert_eq!(Amount::from_minor(10_050).to_decimal(), Decimal::new(10_050, 2));
    }

    #[test]
    fn timestamps_order_chronologically() {
        let earlier = TimeStamp::date(2026, 1, 15).unwrap();
        let later = TimeStamp::date(2026, 2, 1).unwrap();

        assert!(earlier < later);
        assert_eq!(later.cmp(&earlier), Ordering::Greater);
        let mut dates = vec![later.clone(), earlier.clone()];
        dates.sort();
        assert_eq!(dates, vec![earlier, later]);
    }

    #[test]
    fn amount_displays_two_places() {
        assert_eq!(Amount::from_minor(10_000).to_string(), "100.00");
        assert_eq!(Amount::from_minor(5).to_string(), "0.05");
    }

    #[test]
    fn month_arithmetic_clamps_to_month_end() {
        let jan_31 = TimeStamp::date(2025, 1, 31).unwrap();
        let feb = jan_31.add_months(1).unwrap();

        assert_eq!(feb, TimeStamp::date(2025, 2, 28).unwrap());
    }
}

pub mod client;
pub mod config;
pub mod error;
pub mod installment;
pub mod notification;
pub mod payment;
pub mod proof;
pub mod query;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

pub use error::{ErrorKind, WorkflowError};
pub use service::PaymentService;

//! Time-based participation gates

pub mod temporal;

pub use temporal::{LockReceipt, LockRequest, TemporalLockManager};

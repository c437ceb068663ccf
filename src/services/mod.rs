//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They handle database transactions, partner API calls and anything
//! shared between a handler and a background job.

pub mod access;
pub mod auth_service;
pub mod employee_sync_service;
pub mod plaid_service;
pub mod program_service;
pub mod transaction_service;
pub mod wallet_service;

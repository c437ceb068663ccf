//! HTTP request handlers, one module per feature.
//!
//! Each handler:
//! 1. Receives the caller's [`AuthContext`](crate::middleware::auth::AuthContext) and payload
//! 2. Dispatches on the principal's role (admin, employer, user)
//! 3. Runs the query or service call for that role
//! 4. Returns JSON, or an [`AppError`](crate::error::AppError) rendered from the code table

pub mod account;
pub mod address;
pub mod admin;
pub mod credit_wallet;
pub mod employee_sync;
pub mod employer;
pub mod health;
pub mod job;
pub mod organization;
pub mod partner;
pub mod plaid_account;
pub mod program;
pub mod questionnaire;
pub mod resource;
pub mod transaction;
pub mod user;

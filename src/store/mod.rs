//! # Application Store Module
//!
//! Owns the job-application domain model and every query/mutation the voice
//! agent's tools can perform against it.
//!
//! ## Key Components:
//! - **Models**: `Application`, `Note`, `Followup` and their status enums
//! - **Engine**: `ApplicationStore` with deduplicating upsert, reference
//!   resolution, search and pipeline summaries
//!
//! ## Tenancy:
//! Every operation is scoped to a user id. Records for one user are never
//! visible to queries made on behalf of another user.

pub mod engine;
pub mod models;

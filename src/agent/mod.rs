//! # Agent Module
//!
//! The conversational side of the service: which agent persona is answering,
//! how its structured function calls map onto store operations, and how one
//! utterance is driven through transcribe → agent turn → synthesize.
//!
//! ## Key Components:
//! - **Profiles**: the available agent variants and their handoff names
//! - **Tools**: the Function Tool Dispatcher
//! - **Turn**: orchestration of a single agent turn over the pipeline

pub mod profile;
pub mod tools;
pub mod turn;

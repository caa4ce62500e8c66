pub mod client;

pub use client::{DialState, DialSyncClient, PhaseOutcome, SyncReport, SyncRequest};

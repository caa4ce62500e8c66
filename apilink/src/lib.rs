//! API Link Library
//!
//! Polls JSON HTTP APIs, turns one field of each response into a dial
//! percent and keeps VU dials in sync with it.

pub mod app;
pub mod dial;
pub mod errors;
pub mod filesys;
pub mod link;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod transform;
pub mod utils;
pub mod workers;

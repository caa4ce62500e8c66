//! Data models

pub mod link;

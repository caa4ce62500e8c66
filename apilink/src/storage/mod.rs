//! Persistent storage: data directory layout, settings, link files, images

pub mod images;
pub mod layout;
pub mod links;
pub mod settings;

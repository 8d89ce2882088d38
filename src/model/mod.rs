//! Core data model types: addresses, attachments and unpacked messages.

pub mod address;
pub mod attachment;
pub mod mail;

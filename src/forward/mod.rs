//! Delivery of processed messages to the HTTP target.

pub mod client;
pub mod request;

pub use client::Forwarder;
pub use request::{AttachmentRef, OutgoingRequest};

//! `mailpost`: an MTA delivery agent that bridges mail to HTTP.
//!
//! A raw message read from stdin is decomposed into its plain-text body,
//! HTML body and attachments. Attachments are written to a content-addressed
//! directory tree, and the slimmed message is posted to a web endpoint
//! together with references to the stored files.

pub mod config;
pub mod error;
pub mod forward;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod rewrite;
pub mod store;

//! netheal-oracle - client for the external reasoning service
//!
//! The service is a fallible black box behind a typed boundary:
//! - request: optional system prompt, user prompt or message list, structured flag
//! - response: text, or a parsed JSON record
//! - errors: [`OracleError::Unavailable`] after one retry,
//!   [`OracleError::MalformedResponse`] with raw and cleaned text

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod message;

pub use backend::{HttpBackend, OracleBackend};
pub use client::OracleClient;
pub use config::{OracleConfig, Provider};
pub use error::{OracleError, ParseError};
pub use extract::{extract_payload, parse_structured, repair_trailing_commas};
pub use message::{ChatMessage, OracleRequest, Role};

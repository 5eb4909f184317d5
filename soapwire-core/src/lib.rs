//! Core exchange types for soapwire.
//!
//! This crate provides the types shared between the request adapter
//! (`soapwire-client`) and the protocol client sitting above it.
//!
//! ## Modules
//!
//! - `error`: The [`ErrorEnvelope`] raised for every failed exchange
//! - `response`: The [`ResponseWrapper`] returned for a completed exchange

mod error;
mod response;

pub use error::*;
pub use response::*;

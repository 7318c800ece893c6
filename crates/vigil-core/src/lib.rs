//! Vigil Core — domain models, repository contracts, and error types for
//! the Vigil IoT PKI control plane.
//!
//! This crate provides:
//! - Domain models for CAs, certificates, DMS instances, and devices
//! - Repository traits with bookmark pagination ([`repository`])
//! - The lifecycle event-publisher contract ([`events`])
//! - The shared error taxonomy ([`error::VigilError`])

pub mod error;
pub mod events;
pub mod models;
pub mod repository;

pub use error::{VigilError, VigilResult};

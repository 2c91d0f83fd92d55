//! Seam between the persistence worker and a concrete SQL product.
//!
//! A [`Connector`] knows how to reach the endpoint, a [`Connection`] executes the two
//! statement shapes the logger needs. Every statement of a connection can be cancelled
//! from another thread through its [`Interrupt`] handle.
use std::sync::Arc;

use super::error::StoreError;
use super::session::{Sample, SessionId, SessionMetadata};

pub trait Interrupt: Send + Sync {
    /// Abort the statement currently executing on the owning connection
    fn interrupt(&self);
}

pub trait Connection: Send {
    /// Insert a header row and return the key generated by the endpoint
    fn insert_session(&mut self, metadata: &SessionMetadata) -> Result<SessionId, StoreError>;
    fn insert_sample(&mut self, sample: &Sample) -> Result<(), StoreError>;
    fn interrupt_handle(&self) -> Arc<dyn Interrupt>;
}

pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Connection>, StoreError>;
    /// Human readable endpoint description. Must not include credentials
    fn describe(&self) -> String;
}

/// Check that a name is safe to splice into a table name
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Per-chamber table names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub measurements: String,
    pub xy_values: String,
}

impl TableNames {
    pub fn for_chamber(chamber: &str) -> Result<Self, StoreError> {
        if !is_valid_identifier(chamber) {
            return Err(StoreError::InvalidIdentifier(chamber.to_string()));
        }
        Ok(Self {
            measurements: format!("measurements_{chamber}"),
            xy_values: format!("xy_values_{chamber}"),
        })
    }
}

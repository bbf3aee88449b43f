//! Seam between the limiter and the shared quota store.

use super::algorithm::{AtomicUnit, Command};
use crate::error::StoreError;
use async_trait::async_trait;

/// Reply value the store returns for an atomic unit that admitted the request
pub const ALLOW: i64 = 1;
/// Reply value the store returns for an atomic unit that denied the request
pub const DENY: i64 = 0;

/// Store holding quota state shared by every client of the same backend.
///
/// The store is the only authority that mutates quota state. Implementations
/// must evaluate an [`AtomicUnit`] without interleaving with any other unit or
/// command on the same key.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Evaluate one check-and-update atomically.
    ///
    /// Returns [`ALLOW`] or [`DENY`].
    async fn evaluate(&self, unit: &AtomicUnit) -> Result<i64, StoreError>;

    /// Send a batch of commands in one round trip.
    ///
    /// Replies are returned in command order. Commands in a batch are not
    /// atomic with respect to other callers.
    async fn pipeline(&self, commands: &[Command]) -> Result<Vec<Option<i64>>, StoreError>;

    /// Delete the quota state for `key`
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Check the store is reachable
    async fn ping(&self) -> Result<(), StoreError>;
}

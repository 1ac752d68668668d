use async_trait::async_trait;
use dyn_clone::DynClone;
use std::time::Duration;
use tenanto_store::ConnectionDescriptor;

use crate::{
    error::Result,
    migration::{AppliedVersion, Version},
};

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "pg")]
mod pg;

#[cfg(feature = "memory")]
pub use memory::*;
#[cfg(feature = "pg")]
pub use pg::*;

/// One migratable database, master or tenant.
///
/// The applied-version bookkeeping lives inside the database itself.
#[async_trait]
pub trait Database: DynClone + Send + Sync {
    fn name(&self) -> &str;

    /// Applied versions ordered by id.
    async fn applied(&self) -> Result<Vec<AppliedVersion>>;

    /// Opens a transaction that holds the database's migration lock until it ends.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

dyn_clone::clone_trait_object!(Database);

/// Schema changes and their bookkeeping commit together or not at all.
#[async_trait]
pub trait Transaction: Send {
    async fn applied(&mut self) -> Result<Vec<AppliedVersion>>;

    /// Cancels any later statement of this transaction that runs longer than `timeout`.
    async fn statement_timeout(&mut self, timeout: Duration) -> Result<()>;

    async fn execute(&mut self, statement: &'_ str) -> Result<()>;

    async fn record(&mut self, version: &'_ Version) -> Result<()>;

    async fn unrecord(&mut self, version: &'_ str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Creates and opens tenant databases on a database server.
#[async_trait]
pub trait Connector: DynClone + Send + Sync {
    async fn exists(&self, descriptor: &'_ ConnectionDescriptor) -> Result<bool>;

    /// Fails with `DatabaseExists` when the database is already there.
    async fn create(&self, descriptor: &'_ ConnectionDescriptor) -> Result<()>;

    async fn connect(&self, descriptor: &'_ ConnectionDescriptor) -> Result<Box<dyn Database>>;
}

dyn_clone::clone_trait_object!(Connector);

#![forbid(unsafe_code)]

mod database;
mod error;
mod migration;
mod migrator;

pub use database::*;
pub use error::*;
pub use migration::*;
pub use migrator::*;

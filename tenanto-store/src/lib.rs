#![forbid(unsafe_code)]

mod engine;
mod error;
mod run;
pub mod schema;
mod store;
mod subscription;
mod tenant;

pub use engine::*;
pub use error::*;
pub use run::*;
pub use store::*;
pub use subscription::*;
pub use tenant::*;
pub use tenanto_query::{Cursor, CursorType, QueryResult};

//! The concurrency layer (spec.md §4.1, §4.2, §5): connection pool, transaction scope, and
//! task dispatcher.

pub mod dispatcher;
pub mod pool;
pub mod transaction;

pub use dispatcher::Dispatcher;
pub use pool::Pool;
pub use transaction::{TransactionKind, TransactionScope};

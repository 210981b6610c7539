//! Analysis modules.
//!
//! Grouping of activity records and the client lookup used to compose
//! repository groups into client groups.

pub mod aggregator;
pub mod lookup;

pub use aggregator::*;
pub use lookup::ClientLookup;

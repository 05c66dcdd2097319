//! SQL query construction and chunked execution.

pub mod builder;
pub mod paginate;

pub use builder::{Cursor, Query, QueryError, QueryResult};
pub use paginate::{paginated_query, Page};

//! Fluent collection queries.
//!
//! A [`QueryBuilder`] is obtained from [`AppState::query`](crate::state::AppState::query)
//! and accumulates clauses until a terminal method consumes it. Reads run
//! `beforeRead`/`afterRead` hooks, mutations run the input pipeline and the
//! create/update/delete hooks, and every returned record passes through
//! population and `beforeReturnRecord`.

mod builder;
mod error;
mod filter;
mod mutation;
mod pages;

pub use builder::{Page, Projection, QueryBuilder};
pub use error::{MutationError, QueryError};
pub use filter::{ConditionGroup, Filter};
pub(crate) use mutation::now_millis;
pub use pages::resolve_page;

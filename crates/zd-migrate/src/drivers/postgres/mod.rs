//! PostgreSQL driver.
//!
//! - [`PgSession`]: the connection, implementing both
//!   [`Connection`](crate::core::traits::Connection) and
//!   [`Introspector`](crate::core::traits::Introspector)

mod catalog;
mod session;

pub use session::PgSession;

//! Helpers shared by the database drivers.
//!
//! - [`tls`]: `ssl_mode` parsing and the rustls connector

pub mod tls;

pub use tls::SslMode;

//! PostgreSQL driver.
//!
//! - [`PostgresTarget`]: target store backed by a deadpool-postgres pool
//! - [`SslMode`]: `sslmode` handling for the pool's TLS connector

mod copy;
mod target;
mod tls;

pub use copy::{array_literal, escape_copy_text, value_to_text};
pub use target::PostgresTarget;
pub use tls::SslMode;

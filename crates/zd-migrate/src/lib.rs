//! # zd-migrate
//!
//! Zero-downtime expand/contract schema migrations for PostgreSQL.
//!
//! A logical change (rename a column, change a column's type, rename a
//! table or a view) is split into steps that old and new application
//! versions can run against concurrently:
//!
//! - **expand** adds the new element, keeps it in sync with the old one via
//!   triggers and backfills existing rows in small committed chunks
//! - **contract** removes the old element and the sync machinery
//!
//! The mode is picked per invocation with the `zd-mode` parameter. Without
//! it, and on databases other than PostgreSQL, the plain one-shot change is
//! emitted.
//!
//! ## Example
//!
//! ```rust,no_run
//! use zd_migrate::{Config, MigrationMode, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> zd_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?.with_mode(MigrationMode::Expand);
//!     let result = orchestrator.run().await?;
//!     println!("Applied {} change sets", result.change_sets.len());
//!     Ok(())
//! }
//! ```

pub mod backfill;
pub mod change;
pub mod config;
pub mod core;
pub mod dialect;
pub mod drivers;
pub mod error;
pub mod migration;
pub mod mode;
pub mod orchestrator;
pub mod load;
pub mod plan;
pub mod sync;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use backfill::{BackfillEngine, BackfillJob, BackfillStats, BackfillTarget};
pub use change::{ExpandContract, ZdChange};
pub use config::{ChangeSet, ChangeSpec, Config, DatabaseConfig};
pub use dialect::DatabaseKind;
pub use error::{Result, ZdError};
pub use load::{LoadData, LoadDataJob, LoadStats};
pub use migration::{Change, Migration};
pub use mode::{MigrationConfig, MigrationMode};
pub use orchestrator::{HealthCheckResult, Orchestrator, PlanReport, RunResult};
pub use plan::{MigrationPlan, Statement};

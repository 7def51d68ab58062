//! # Strata Testkit
//!
//! Shared helpers for Strata's integration tests and benches:
//! [`TestManager`] wraps an [`strata_core::OperatorManager`] over memory or
//! a temporary directory, [`generators`] holds proptest strategies for
//! documents and keys, and [`stress`] drives many threads at one manager.
//!
//! ```rust
//! use strata_core::SearchOperator;
//! use strata_testkit::{collect_rows, users_fixture, TestManager};
//!
//! let manager = TestManager::memory();
//! let users = users_fixture(&manager, "users", 3);
//! assert_eq!(collect_rows(users.cursor(false, &[]).unwrap()).len(), 3);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

pub use fixtures::*;
pub use generators::*;
pub use stress::*;

/// Routes `tracing` output to the test harness, honouring `RUST_LOG` and
/// defaulting to warnings. Safe to call from every test.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    // A second install fails; the first subscriber stays.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

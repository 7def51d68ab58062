//! Test fixtures and manager helpers.
//!
//! Provides managers over memory or a temporary directory and a few
//! pre-filled operators for common test scenarios.

use std::path::Path;
use strata_codec::{KeyType, Value};
use strata_core::{ManagerConfig, ObjectOperator, OperatorManager, SearchOperator};
use tempfile::TempDir;

/// A test manager with automatic cleanup.
pub struct TestManager {
    /// The manager instance.
    pub manager: OperatorManager,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestManager {
    /// Creates an in-memory test manager.
    pub fn memory() -> Self {
        Self {
            manager: OperatorManager::open(ManagerConfig::default())
                .expect("Failed to open in-memory manager"),
            temp_dir: None,
        }
    }

    /// Creates a manager whose engine log lives in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let manager = OperatorManager::open(file_config(temp_dir.path()))
            .expect("Failed to open file manager");
        Self {
            manager,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the data directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Closes the manager and opens a new one over the same directory.
    ///
    /// # Panics
    ///
    /// Panics for in-memory managers, which have nothing to reopen.
    pub fn reopen(self) -> Self {
        let temp_dir = self.temp_dir.expect("Only file managers can be reopened");
        self.manager.close().expect("Failed to close manager");
        drop(self.manager);
        let manager = OperatorManager::open(file_config(temp_dir.path()))
            .expect("Failed to reopen file manager");
        Self {
            manager,
            temp_dir: Some(temp_dir),
        }
    }
}

impl std::ops::Deref for TestManager {
    type Target = OperatorManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

fn file_config(dir: &Path) -> ManagerConfig {
    ManagerConfig::default().path(dir).sync_on_write(false)
}

/// Runs a test with a temporary in-memory manager.
///
/// # Example
///
/// ```rust,ignore
/// use strata_testkit::with_memory_manager;
///
/// #[test]
/// fn my_test() {
///     with_memory_manager(|manager| {
///         manager.create_sequence("events").unwrap();
///     });
/// }
/// ```
pub fn with_memory_manager<F, R>(f: F) -> R
where
    F: FnOnce(&OperatorManager) -> R,
{
    let manager = TestManager::memory();
    f(&manager)
}

/// Creates an object operator keyed by strings and fills it with `count`
/// users `u0..`, each `{ "name", "age", "address": { "city" } }`.
pub fn users_fixture(manager: &OperatorManager, name: &str, count: usize) -> ObjectOperator {
    manager
        .create_object(name, KeyType::String)
        .expect("Failed to create users operator");
    let users = manager
        .get(name)
        .and_then(|handle| handle.into_object())
        .expect("Failed to open users operator");
    for n in 0..count {
        users
            .put(&[Value::from(format!("u{n}"))], user_document(n))
            .expect("Failed to insert user");
    }
    users
}

/// The document [`users_fixture`] stores for user `n`.
pub fn user_document(n: usize) -> Value {
    const CITIES: [&str; 3] = ["Oslo", "Lima", "Pune"];
    Value::document([
        ("name", Value::from(format!("user {n}"))),
        ("age", Value::from(20 + (n % 50) as i64)),
        (
            "address",
            Value::document([("city", CITIES[n % CITIES.len()])]),
        ),
    ])
}

/// Collects a cursor into `(key, document)` pairs, panicking on error.
pub fn collect_rows(cursor: strata_core::Cursor) -> Vec<(strata_core::Key, Value)> {
    cursor
        .collect::<Result<Vec<_>, _>>()
        .expect("Cursor failed")
}

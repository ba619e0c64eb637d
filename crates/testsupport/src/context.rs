//! Test execution context and database state management.
//!
//! Provides helpers for creating isolated test environments with temporary
//! storage and a schema catalog. Each test gets its own clean state that is
//! automatically cleaned up on drop.

use catalog::{Catalog, Column};
use common::{DbResult, Row, TableId};
use executor::ExecutionContext;
use std::path::{Path, PathBuf};
use storage::HeapTable;
use tempfile::TempDir;

/// A test execution context with isolated temporary storage.
///
/// Owns a temporary directory and a schema catalog; every heap file and
/// index file a test touches lives under the temporary directory and is
/// cleaned up when the context is dropped.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// let mut ctx = TestContext::new().unwrap();
/// let mut exec_ctx = ctx.execution_context();
/// // Use exec_ctx for query execution; temp files are cleaned up on drop.
/// ```
pub struct TestContext {
    _temp_dir: TempDir,
    catalog: Catalog,
    data_dir: PathBuf,
}

impl TestContext {
    /// Create a new test context with an empty catalog.
    pub fn new() -> DbResult<Self> {
        let temp_dir = tempfile::tempdir()?;
        Self::with_dir(temp_dir)
    }

    /// Create a test context using an existing temporary directory.
    pub fn with_dir(temp_dir: TempDir) -> DbResult<Self> {
        Ok(Self {
            data_dir: temp_dir.path().to_path_buf(),
            _temp_dir: temp_dir,
            catalog: Catalog::new(),
        })
    }

    /// Create a test context with a pre-populated catalog.
    ///
    /// # Example
    ///
    /// ```
    /// use catalog::{Catalog, Column};
    /// use types::SqlType;
    /// use testsupport::prelude::*;
    ///
    /// let mut catalog = Catalog::new();
    /// catalog.create_table("users", vec![
    ///     Column::new("id", SqlType::Int),
    ///     Column::new("name", SqlType::Text),
    /// ], vec![]).unwrap();
    ///
    /// let ctx = TestContext::with_catalog(catalog).unwrap();
    /// ```
    pub fn with_catalog(catalog: Catalog) -> DbResult<Self> {
        let temp_dir = tempfile::tempdir()?;
        Ok(Self {
            data_dir: temp_dir.path().to_path_buf(),
            _temp_dir: temp_dir,
            catalog,
        })
    }

    /// Get an execution context for running queries. Borrows this
    /// `TestContext` for the duration of the returned value.
    pub fn execution_context(&mut self) -> ExecutionContext<'_> {
        ExecutionContext::new(&mut self.catalog, self.data_dir.clone())
    }

    /// Get the path to the data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get a reference to the catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Get a mutable reference to the catalog.
    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }
}

/// Creates a catalog with a "users" table: id INT, name TEXT, age INT.
///
/// Useful for basic tests that don't need complex schemas.
pub fn create_simple_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog
        .create_table(
            "users",
            vec![
                Column::new("id", types::SqlType::Int),
                Column::new("name", types::SqlType::Text),
                Column::new("age", types::SqlType::Int),
            ],
            vec![],
        )
        .expect("failed to create users table");
    catalog
}

/// Insert rows directly into a table's heap file, bypassing SQL parsing and
/// planning. Useful for seeding fixture data before exercising a query path.
///
/// # Example
///
/// ```no_run
/// use common::{Row, TableId};
/// use types::Value;
/// use testsupport::prelude::*;
///
/// let mut ctx = TestContext::new().unwrap();
/// let mut exec_ctx = ctx.execution_context();
///
/// let rows = vec![
///     Row::new(vec![Value::Int(1), Value::Text("Alice".into()), Value::Int(30)]),
///     Row::new(vec![Value::Int(2), Value::Text("Bob".into()), Value::Int(25)]),
/// ];
///
/// insert_test_rows(&mut exec_ctx, TableId(1), rows).unwrap();
/// ```
pub fn insert_test_rows(
    ctx: &mut ExecutionContext,
    table_id: TableId,
    rows: Vec<Row>,
) -> DbResult<()> {
    let mut heap_table = ctx.heap_table(table_id)?;
    for row in rows {
        heap_table.insert(&row)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_creation() {
        let ctx = TestContext::new();
        assert!(ctx.is_ok());
    }

    #[test]
    fn test_context_with_catalog() {
        let catalog = create_simple_catalog();
        let ctx = TestContext::with_catalog(catalog);
        assert!(ctx.is_ok());

        let ctx = ctx.unwrap();
        assert!(ctx.catalog().table("users").is_ok());
    }

    #[test]
    fn test_execution_context() {
        let mut ctx = TestContext::new().unwrap();
        let _exec_ctx = ctx.execution_context();
    }

    #[test]
    fn test_simple_catalog() {
        let catalog = create_simple_catalog();
        let table = catalog.table("users").unwrap();
        assert_eq!(table.name, "users");
        assert_eq!(table.schema.columns.len(), 3);
    }
}

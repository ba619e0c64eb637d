//! Query executor: executes physical plans using a Volcano-style iterator model.
//!
//! The executor bridges the planner's physical operators with the storage layer,
//! buffer pool, and B-tree indexes to perform actual query execution. It implements
//! a pull-based iterator model where each operator pulls rows from its children.
//!
//! DDL statements (`CREATE TABLE`, `DROP INDEX`, ...) never reach the planner —
//! the planner rejects them outright — and are executed directly from the parsed
//! AST via [`ddl::execute`].
//!
//! # Architecture
//!
//! ```text
//! Physical Plan
//!     ↓
//! Build Executor Tree
//!     ↓
//! open() → Initialize resources
//!     ↓
//! next() → Pull rows iteratively
//!     ↓
//! close() → Clean up resources
//! ```

mod builder;
pub mod ddl;
mod dml;
mod filter;
mod groupby;
mod join;
mod limit;
mod project;
mod scan;
mod sort;

#[cfg(test)]
mod tests;

use catalog::{Catalog, IndexId};
use common::{DbError, DbResult, ExecutionStats, Row, TableId};
use planner::PhysicalPlan;
use std::path::PathBuf;

/// Buffer pool size used for a single index's private file. Indexes are
/// small relative to table heaps and each gets its own pool rather than
/// sharing the table's, since `BTreeIndex::open` assumes page 0 of its own
/// file is the root.
const INDEX_BUFFER_PAGES: usize = 64;

pub use builder::build_executor;
pub use filter::eval_resolved_expr;

/// Volcano-style iterator interface for query execution.
///
/// Each operator implements this trait to provide a pull-based execution model.
/// Operators initialize resources in `open()`, produce rows via `next()`, and
/// clean up in `close()`.
pub trait Executor {
    /// Initialize the operator (open files, allocate buffers, etc.).
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()>;

    /// Fetch the next row, or None if exhausted.
    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>>;

    /// Release resources (close files, flush buffers, etc.).
    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()>;

    /// Return the schema (column names) of rows produced by this operator.
    fn schema(&self) -> &[String];

    /// Execution statistics gathered by `EXPLAIN ANALYZE`, if tracked.
    fn stats(&self) -> Option<&ExecutionStats> {
        None
    }
}

/// Shared execution context passed to all operators.
///
/// Holds the catalog (mutable, since DDL and `AUTO_INCREMENT` both need to
/// update it) and the data directory every table heap and index file lives
/// under. Heap files and index files each own their own file handles, so
/// the context itself holds no open file state.
pub struct ExecutionContext<'a> {
    pub catalog: &'a mut Catalog,
    pub data_dir: PathBuf,
}

impl<'a> ExecutionContext<'a> {
    /// Create a new execution context.
    pub fn new(catalog: &'a mut Catalog, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            data_dir: data_dir.into(),
        }
    }

    /// Open the heap file backing a table, by ID.
    pub fn heap_table(&self, table_id: TableId) -> DbResult<storage::HeapFile> {
        let table_meta = self.catalog.table_by_id(table_id)?;
        let file_path = self.data_dir.join(format!("{}.heap", table_meta.name));
        storage::HeapFile::open(&file_path, table_id.0)
    }

    fn index_file_name(index_id: IndexId) -> String {
        format!("index_{}.idx", index_id.0)
    }

    /// Create the on-disk storage for a brand new index. Only ever call this
    /// from DDL (`CREATE TABLE` with a `PRIMARY KEY`, `CREATE INDEX`): a
    /// B-tree opened against a file that was never `create`d will fail to
    /// find its root page rather than silently operating on garbage.
    ///
    /// Each call opens its own private `FileManager`/`BufferPool` pair —
    /// `BTreeIndex` flushes that pool to disk on drop, so a later call
    /// reopening the same index file always sees every previously allocated
    /// page.
    pub fn create_index_storage(&self, index_id: IndexId) -> DbResult<btree::BTreeIndex> {
        let mut files = storage::FileManager::new(&self.data_dir)?;
        let file_id = files.create_file(&Self::index_file_name(index_id))?;
        let pool = buffer::BufferPool::new(files, INDEX_BUFFER_PAGES);
        btree::BTreeIndex::create(pool, file_id, index_id)
    }

    /// Open the on-disk storage for an index created earlier by DDL.
    pub fn open_index_storage(&self, index_id: IndexId) -> DbResult<btree::BTreeIndex> {
        let mut files = storage::FileManager::new(&self.data_dir)?;
        let file_id = files.open_file(&Self::index_file_name(index_id))?;
        let pool = buffer::BufferPool::new(files, INDEX_BUFFER_PAGES);
        btree::BTreeIndex::open(pool, file_id, index_id)
    }
}

/// Execute a query plan and return all result rows.
///
/// This is the main entry point for executing SELECT queries that return data.
///
/// # Errors
///
/// Returns an error if execution fails at any stage.
pub fn execute_query(plan: PhysicalPlan, ctx: &mut ExecutionContext) -> DbResult<Vec<Row>> {
    let mut executor = builder::build_executor(plan, ctx.catalog)?;

    executor.open(ctx)?;

    let mut results = Vec::new();
    while let Some(row) = executor.next(ctx)? {
        results.push(row);
    }

    executor.close(ctx)?;

    Ok(results)
}

/// Execute a DML statement (INSERT/UPDATE/DELETE) and return affected row count.
///
/// DML statements return a single row containing the number of affected rows.
///
/// # Errors
///
/// Returns an error if execution fails or no result is produced.
pub fn execute_dml(plan: PhysicalPlan, ctx: &mut ExecutionContext) -> DbResult<u64> {
    let mut executor = builder::build_executor(plan, ctx.catalog)?;

    executor.open(ctx)?;

    let result = executor
        .next(ctx)?
        .ok_or_else(|| DbError::Executor("DML operation returned no result".into()))?;

    executor.close(ctx)?;

    match result.values.first() {
        Some(types::Value::Int(count)) => Ok(*count as u64),
        Some(other) => Err(DbError::Executor(format!(
            "DML result count must be integer, got {other:?}"
        ))),
        None => Err(DbError::Executor("DML result has no columns".into())),
    }
}

//! Engine facade: the single entry point external collaborators (CLI, tests,
//! embedders) use to open a database, run SQL, and manage transactions.
//!
//! Wires together the schema catalog, storage/buffer/WAL layers, the lock
//! and transaction managers, and the planner/executor pipeline. DDL
//! statements never reach the planner — it rejects them outright — so they
//! are dispatched straight to [`executor::ddl::execute`] from the parsed AST.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use buffer::{BufferPool, BufferStats};
use catalog::{Catalog, TableMeta};
use common::{Config, DbError, DbResult, ExecutionStats, PageId, Row, TxnId};
use executor::{build_executor, ddl, ExecutionContext, Executor};
use lockmgr::{LockManager, LockMode};
use parser::{parse_sql, JoinClause, SelectStatement, Statement};
use planner::{explain_physical, PhysicalPlan, Planner, PlanningContext};
use storage::{FileManager, Page};
use txn::TransactionManager;
use types::Value;
use wal::Wal;

const METADATA_FILE: &str = "_metadata.tbl";
const WAL_DIR: &str = "wal";

/// Which clause of SQL an [`ExecuteResult`] answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    CreateTable,
    DropTable,
    CreateIndex,
    DropIndex,
    Explain,
}

/// The outcome of a single [`Engine::execute`] call.
///
/// Exactly one of `rows` / `rows_affected` is populated, depending on
/// `statement_type`; DDL statements populate neither.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ExecuteResult {
    pub statement_type: StatementType,
    pub success: bool,
    pub schema: Option<Vec<String>>,
    pub rows: Option<Vec<Row>>,
    pub row_count: Option<u64>,
    pub rows_affected: Option<u64>,
    pub insert_id: Option<i64>,
    pub execution_time_ms: f64,
}

impl ExecuteResult {
    fn ddl(statement_type: StatementType, started: Instant) -> Self {
        Self {
            statement_type,
            success: true,
            schema: None,
            rows: None,
            row_count: None,
            rows_affected: None,
            insert_id: None,
            execution_time_ms: elapsed_ms(started),
        }
    }

    fn select(schema: Vec<String>, rows: Vec<Row>, started: Instant) -> Self {
        let row_count = rows.len() as u64;
        Self {
            statement_type: StatementType::Select,
            success: true,
            schema: Some(schema),
            rows: Some(rows),
            row_count: Some(row_count),
            rows_affected: None,
            insert_id: None,
            execution_time_ms: elapsed_ms(started),
        }
    }

    fn dml(statement_type: StatementType, affected: u64, started: Instant) -> Self {
        Self {
            statement_type,
            success: true,
            schema: None,
            rows: None,
            row_count: None,
            rows_affected: Some(affected),
            insert_id: None,
            execution_time_ms: elapsed_ms(started),
        }
    }

    fn explain(text: String, started: Instant) -> Self {
        Self {
            statement_type: StatementType::Explain,
            success: true,
            schema: Some(vec!["Explain".into()]),
            rows: Some(vec![Row::new(vec![Value::Text(text)])]),
            row_count: Some(1),
            rows_affected: None,
            insert_id: None,
            execution_time_ms: elapsed_ms(started),
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Point-in-time snapshot of engine-wide resource usage.
#[derive(Clone, Debug)]
pub struct EngineStats {
    pub buffer_pool: BufferStats,
    pub active_transactions: usize,
    pub current_lsn: u64,
}

/// Extract the table(s) a `SELECT` reads from, for lock acquisition.
fn select_tables(select: &SelectStatement) -> Vec<&str> {
    let mut tables = vec![select.from.as_str()];
    if let Some(JoinClause { table, .. }) = &select.join {
        tables.push(table.as_str());
    }
    tables
}

fn is_ddl(stmt: &Statement) -> bool {
    matches!(
        stmt,
        Statement::CreateTable { .. }
            | Statement::DropTable { .. }
            | Statement::CreateIndex { .. }
            | Statement::DropIndex { .. }
    )
}

fn ddl_statement_type(stmt: &Statement) -> StatementType {
    match stmt {
        Statement::CreateTable { .. } => StatementType::CreateTable,
        Statement::DropTable { .. } => StatementType::DropTable,
        Statement::CreateIndex { .. } => StatementType::CreateIndex,
        Statement::DropIndex { .. } => StatementType::DropIndex,
        other => unreachable!("not a DDL statement: {other:?}"),
    }
}

/// An embedded SQL engine: one schema catalog, one buffer pool, one WAL,
/// backed by a single data directory.
pub struct Engine {
    config: Config,
    catalog: Catalog,
    catalog_path: PathBuf,
    pool: BufferPool,
    locks: LockManager,
    txns: TransactionManager,
}

impl Engine {
    /// Open (or create) a database at `config.data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the data directory
    /// cannot be created, or the catalog/WAL fail to load.
    pub fn open(config: Config) -> DbResult<Self> {
        config.validate()?;
        if config.page_size != storage::PAGE_SIZE {
            return Err(DbError::Storage(format!(
                "page_size {} is not supported; this engine's storage layer is fixed at {} bytes",
                config.page_size,
                storage::PAGE_SIZE
            )));
        }

        fs::create_dir_all(&config.data_dir)?;

        let wal_dir = config.data_dir.join(WAL_DIR);
        Self::recover(&config.data_dir, &wal_dir)?;

        let catalog_path = config.data_dir.join(METADATA_FILE);
        let catalog = Catalog::load(&catalog_path)?;

        let files = FileManager::new(config.data_dir.clone())?;
        let pool = BufferPool::new(files, config.buffer_pool_pages);

        let wal = Wal::open(wal_dir)?;
        let locks = LockManager::new();
        let txns = TransactionManager::new(wal, pool.clone(), locks.clone());

        if config.wal_enabled {
            let force_txns = txns.clone();
            pool.set_force_rule_hook(Box::new(move |file_name, page| {
                force_txns
                    .force_page_write(file_name, page.id, &[], page.bytes())
                    .map(|_| ())
            }));
        }

        Ok(Self {
            config,
            catalog,
            catalog_path,
            pool,
            locks,
            txns,
        })
    }

    /// Two-pass analysis+redo over `wal_dir`, writing every committed
    /// transaction's page writes straight back to the files in `data_dir`
    /// via their own short-lived `FileManager` (the engine's own buffer pool
    /// and WAL aren't open yet at this point in `Engine::open`).
    fn recover(data_dir: &std::path::Path, wal_dir: &std::path::Path) -> DbResult<()> {
        let mut files = FileManager::new(data_dir)?;
        let outcome = wal::recover(wal_dir, |file_name, page_id, after_image| {
            let file_id = files.open_file(file_name)?;
            let page = Page::from_bytes(PageId(page_id), after_image.to_vec());
            files.write_page(file_id, &page)?;
            files.sync(file_id)
        })?;

        if outcome.pages_redone > 0 {
            tracing::info!(
                pages_redone = outcome.pages_redone,
                committed_txns = outcome.committed_txns.len(),
                "redone pages from WAL during startup recovery"
            );
        }
        if outcome.skipped_invalid_lines > 0 {
            tracing::warn!(
                skipped_invalid_lines = outcome.skipped_invalid_lines,
                "startup recovery skipped invalid WAL lines"
            );
        }
        Ok(())
    }

    /// Parse and run a single SQL statement as its own implicit transaction:
    /// committed on success, rolled back on any error.
    ///
    /// # Errors
    ///
    /// Returns a parse error for malformed SQL, or whatever error the
    /// planner/executor produced for a well-formed but invalid statement.
    pub fn execute(&mut self, sql: &str) -> DbResult<ExecuteResult> {
        let stmt = parse_single_statement(sql)?;
        let txn = self.txns.begin()?;
        match self.execute_statement(stmt, txn.id) {
            Ok(result) => {
                self.txns.commit(txn.id)?;
                Ok(result)
            }
            Err(err) => {
                if let Err(rollback_err) = self.txns.rollback(txn.id) {
                    tracing::error!(%rollback_err, original_error = %err, "rollback after a failed statement also failed");
                }
                Err(err)
            }
        }
    }

    /// Begin an explicit transaction. DDL statements are rejected inside one
    /// (see [`TxnHandle::execute`]); they always auto-commit via
    /// [`Engine::execute`] instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL append for `TRANSACTION BEGIN` fails.
    pub fn begin_transaction(&mut self) -> DbResult<TxnHandle<'_>> {
        let txn = self.txns.begin()?;
        Ok(TxnHandle {
            engine: self,
            txn_id: txn.id,
            finished: false,
        })
    }

    /// Every table currently registered in the catalog.
    pub fn get_schema(&self) -> Vec<TableMeta> {
        self.catalog.tables().cloned().collect()
    }

    /// Buffer pool and transaction-manager counters as of right now.
    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            buffer_pool: self.pool.stats(),
            active_transactions: self.txns.active_count(),
            current_lsn: self.txns.current_lsn(),
        }
    }

    /// Flush all dirty pages and seal the current WAL segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or the WAL append fails.
    pub fn checkpoint(&mut self) -> DbResult<u64> {
        self.txns.checkpoint()
    }

    /// Roll back any still-active transactions, flush, and persist the
    /// catalog. Consumes the engine: there is no reopening a closed handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush or catalog save fails.
    pub fn close(mut self) -> DbResult<()> {
        self.txns.close_all();
        self.pool.flush_all()?;
        self.catalog.save(&self.catalog_path)
    }

    fn execute_statement(&mut self, stmt: Statement, txn_id: TxnId) -> DbResult<ExecuteResult> {
        let started = Instant::now();

        if let Statement::Explain { statement, analyze } = stmt {
            return self.execute_explain(*statement, analyze, txn_id, started);
        }

        if is_ddl(&stmt) {
            return self.execute_ddl(stmt, txn_id, started);
        }

        match &stmt {
            Statement::Select(select) => {
                for table in select_tables(select) {
                    self.locks
                        .acquire(txn_id, table_resource(table), LockMode::Shared, lock_timeout())?;
                }
            }
            Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. } => {
                self.locks.acquire(
                    txn_id,
                    table_resource(table),
                    LockMode::Exclusive,
                    lock_timeout(),
                )?;
            }
            other => {
                return Err(DbError::Executor(format!("unsupported statement: {other:?}")));
            }
        }

        let plan = {
            let mut planning_ctx = PlanningContext::new(&self.catalog);
            Planner::plan(stmt.clone(), &mut planning_ctx)?
        };

        match &stmt {
            Statement::Select(_) => {
                let (schema, rows, _stats) = self.run_select(plan)?;
                Ok(ExecuteResult::select(schema, rows, started))
            }
            Statement::Insert { .. } => {
                let affected = self.run_dml(plan)?;
                Ok(ExecuteResult::dml(StatementType::Insert, affected, started))
            }
            Statement::Update { .. } => {
                let affected = self.run_dml(plan)?;
                Ok(ExecuteResult::dml(StatementType::Update, affected, started))
            }
            Statement::Delete { .. } => {
                let affected = self.run_dml(plan)?;
                Ok(ExecuteResult::dml(StatementType::Delete, affected, started))
            }
            _ => unreachable!("already matched above"),
        }
    }

    fn execute_ddl(&mut self, stmt: Statement, txn_id: TxnId, started: Instant) -> DbResult<ExecuteResult> {
        // DDL statements aren't routed through the lock manager per-table:
        // a single global resource serializes all schema mutations, since
        // `DROP INDEX` only learns its owning table after catalog lookup.
        self.locks
            .acquire(txn_id, "ddl".to_string(), LockMode::Exclusive, lock_timeout())?;

        let statement_type = ddl_statement_type(&stmt);
        {
            let mut ctx = ExecutionContext::new(&mut self.catalog, self.config.data_dir.clone());
            ddl::execute(&stmt, &mut ctx)?;
        }
        self.catalog.save(&self.catalog_path)?;
        Ok(ExecuteResult::ddl(statement_type, started))
    }

    fn execute_explain(
        &mut self,
        inner: Statement,
        analyze: bool,
        txn_id: TxnId,
        started: Instant,
    ) -> DbResult<ExecuteResult> {
        if is_ddl(&inner) {
            return Err(DbError::Planner("EXPLAIN does not support DDL statements".into()));
        }

        match &inner {
            Statement::Select(select) => {
                for table in select_tables(select) {
                    self.locks
                        .acquire(txn_id, table_resource(table), LockMode::Shared, lock_timeout())?;
                }
            }
            Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. } => {
                self.locks.acquire(
                    txn_id,
                    table_resource(table),
                    LockMode::Exclusive,
                    lock_timeout(),
                )?;
            }
            _ => {}
        }

        let plan = {
            let mut planning_ctx = PlanningContext::new(&self.catalog);
            Planner::plan(inner.clone(), &mut planning_ctx)?
        };

        let mut text = String::from("EXPLAIN\n");
        text.push_str(&explain_physical(&plan));

        if analyze {
            let (row_count, stats) = match &inner {
                Statement::Select(_) => {
                    let (_, rows, stats) = self.run_select(plan.clone())?;
                    (rows.len() as u64, stats)
                }
                Statement::Insert { .. } | Statement::Update { .. } | Statement::Delete { .. } => {
                    let affected = self.run_dml(plan.clone())?;
                    (affected, None)
                }
                other => {
                    return Err(DbError::Executor(format!(
                        "EXPLAIN ANALYZE does not support {other:?}"
                    )));
                }
            };

            text.push_str("\n\nExecution:\n");
            text.push_str(&format!("  Total rows: {row_count}\n"));
            if let Some(stats) = stats {
                text.push_str(&format!(
                    "  open: {:?}  next: {:?}  close: {:?}  rows_produced: {}  rows_filtered: {}  pages_scanned: {}\n",
                    stats.open_time,
                    stats.total_next_time,
                    stats.close_time,
                    stats.rows_produced,
                    stats.rows_filtered,
                    stats.pages_scanned,
                ));
            }
        }

        Ok(ExecuteResult::explain(text, started))
    }

    fn run_select(&mut self, plan: PhysicalPlan) -> DbResult<(Vec<String>, Vec<Row>, Option<ExecutionStats>)> {
        let mut ctx = ExecutionContext::new(&mut self.catalog, self.config.data_dir.clone());
        let mut executor = build_executor(plan, ctx.catalog)?;
        let schema = executor.schema().to_vec();

        executor.open(&mut ctx)?;
        let mut rows = Vec::new();
        while let Some(row) = executor.next(&mut ctx)? {
            rows.push(row);
        }
        executor.close(&mut ctx)?;
        let stats = executor.stats().cloned();

        Ok((schema, rows, stats))
    }

    fn run_dml(&mut self, plan: PhysicalPlan) -> DbResult<u64> {
        let mut ctx = ExecutionContext::new(&mut self.catalog, self.config.data_dir.clone());
        let mut executor = build_executor(plan, ctx.catalog)?;

        executor.open(&mut ctx)?;
        let result = executor
            .next(&mut ctx)?
            .ok_or_else(|| DbError::Executor("DML operation returned no result".into()))?;
        executor.close(&mut ctx)?;

        match result.values.first() {
            Some(Value::Int(count)) => Ok(*count as u64),
            Some(other) => Err(DbError::Executor(format!(
                "DML result count must be integer, got {other:?}"
            ))),
            None => Err(DbError::Executor("DML result has no columns".into())),
        }
    }
}

fn table_resource(table: &str) -> String {
    format!("table:{table}")
}

fn lock_timeout() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

fn parse_single_statement(sql: &str) -> DbResult<Statement> {
    let mut statements = parse_sql(sql)?;
    match statements.len() {
        1 => Ok(statements.pop().expect("checked len == 1")),
        0 => Err(DbError::Parser("no statement to execute".into())),
        n => Err(DbError::Parser(format!(
            "expected exactly one statement, got {n}; run statements one at a time"
        ))),
    }
}

/// A handle to an explicit, caller-controlled transaction.
///
/// Borrows the engine mutably for its lifetime: no other statement can run
/// against the same engine until the handle is committed or rolled back (or
/// dropped, which rolls back implicitly).
pub struct TxnHandle<'e> {
    engine: &'e mut Engine,
    txn_id: TxnId,
    finished: bool,
}

impl<'e> TxnHandle<'e> {
    /// Run one statement inside this transaction. DDL is rejected here —
    /// schema changes always auto-commit via [`Engine::execute`] instead,
    /// since the transaction manager's undo log only covers page writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement is DDL, fails to parse, or fails
    /// during planning/execution. The transaction itself stays active; the
    /// caller may retry or roll back explicitly.
    pub fn execute(&mut self, sql: &str) -> DbResult<ExecuteResult> {
        let stmt = parse_single_statement(sql)?;
        if is_ddl(&stmt) {
            return Err(DbError::Transaction(
                "DDL statements cannot run inside an explicit transaction".into(),
            ));
        }
        self.engine.execute_statement(stmt, self.txn_id)
    }

    /// Commit the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or WAL commit record append fails.
    pub fn commit(mut self) -> DbResult<()> {
        self.finished = true;
        self.engine.txns.commit(self.txn_id)
    }

    /// Roll back the transaction, restoring every page it wrote.
    ///
    /// # Errors
    ///
    /// Returns an error if a page restore or the WAL rollback record append
    /// fails.
    pub fn rollback(mut self) -> DbResult<()> {
        self.finished = true;
        self.engine.txns.rollback(self.txn_id)
    }
}

impl<'e> Drop for TxnHandle<'e> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.engine.txns.rollback(self.txn_id) {
                tracing::error!(%err, txn_id = self.txn_id.0, "implicit rollback on drop failed");
            }
        }
    }
}

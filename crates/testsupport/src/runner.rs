//! SQL script execution for snapshot testing.
//!
//! Provides utilities to execute multi-statement SQL scripts against a fresh
//! [`engine::Engine`] and capture pretty-printed output suitable for use with
//! the `insta` snapshot testing framework.

use common::{
    pretty::{self, TableStyleKind},
    Config, DbResult, RecordBatch,
};
use engine::{Engine, StatementType};
use parser::Statement;
use tempfile::TempDir;

/// An engine plus the temporary directory backing it, kept alive together so
/// the directory isn't cleaned up out from under the engine.
pub struct ScriptEngine {
    engine: Engine,
    _temp_dir: TempDir,
}

impl ScriptEngine {
    /// Open a fresh engine in a new temporary directory.
    pub fn new() -> DbResult<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config = Config::builder()
            .data_dir(temp_dir.path().to_path_buf())
            .buffer_pool_pages(32)
            .build();
        let engine = Engine::open(config)?;
        Ok(Self {
            engine,
            _temp_dir: temp_dir,
        })
    }

    pub fn engine(&mut self) -> &mut Engine {
        &mut self.engine
    }
}

/// Execute a SQL script and return pretty-printed output.
///
/// This function:
/// 1. Opens a fresh isolated engine
/// 2. Parses and executes each statement in the script
/// 3. Captures all output (query results, affected row counts, error messages)
/// 4. Returns formatted output suitable for snapshot testing
///
/// # Example
///
/// ```no_run
/// use testsupport::prelude::*;
///
/// let output = run_sql_script(r#"
///     CREATE TABLE users (id INT, name TEXT, age INT);
///     INSERT INTO users VALUES (1, 'Alice', 30);
///     INSERT INTO users VALUES (2, 'Bob', 25);
///     SELECT * FROM users WHERE age > 25;
/// "#).unwrap();
///
/// insta::assert_snapshot!(output);
/// ```
pub fn run_sql_script(sql: &str) -> DbResult<String> {
    let mut script_engine = ScriptEngine::new()?;
    run_sql_script_with_engine(sql, script_engine.engine())
}

/// Execute a SQL script against a specific engine.
///
/// Useful when a script needs a pre-populated schema, or when several
/// scripts should run against the same accumulated state.
///
/// # Example
///
/// ```no_run
/// use testsupport::prelude::*;
///
/// let mut script_engine = ScriptEngine::new().unwrap();
///
/// let output1 = run_sql_script_with_engine(r#"
///     CREATE TABLE users (id INT, name TEXT);
/// "#, script_engine.engine()).unwrap();
///
/// let output2 = run_sql_script_with_engine(r#"
///     INSERT INTO users VALUES (1, 'Alice');
///     SELECT * FROM users;
/// "#, script_engine.engine()).unwrap();
/// ```
pub fn run_sql_script_with_engine(sql: &str, engine: &mut Engine) -> DbResult<String> {
    let mut output = String::new();

    for statement_sql in split_statements(sql) {
        // `Engine::execute` only accepts one statement per call, so the
        // script is split lexically on `;` rather than round-tripped
        // through the parser's AST. The statement is parsed a second time
        // here purely to recover the object name for human-readable output;
        // execution itself always goes through `Engine::execute`.
        let ddl_name = parser::parse_sql(statement_sql)
            .ok()
            .and_then(|stmts| stmts.into_iter().next())
            .and_then(|stmt| ddl_object_name(&stmt));

        let result = engine.execute(statement_sql);

        let stmt_output = match result {
            Ok(outcome) => render_outcome(&outcome, ddl_name.as_deref()),
            Err(err) => format!("Error: {err}"),
        };

        if !stmt_output.is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&stmt_output);
        }
    }

    Ok(output)
}

/// Split a multi-statement SQL script on top-level `;` delimiters, skipping
/// blank statements produced by trailing separators or comments-only lines.
fn split_statements(sql: &str) -> impl Iterator<Item = &str> {
    sql.split(';').map(str::trim).filter(|s| !s.is_empty())
}

fn ddl_object_name(stmt: &Statement) -> Option<String> {
    match stmt {
        Statement::CreateTable { name, .. } => Some(name.clone()),
        Statement::DropTable { name } => Some(name.clone()),
        Statement::CreateIndex { name, .. } => Some(name.clone()),
        Statement::DropIndex { name } => Some(name.clone()),
        _ => None,
    }
}

fn render_outcome(result: &engine::ExecuteResult, ddl_name: Option<&str>) -> String {
    match result.statement_type {
        StatementType::CreateTable => format!("Created table '{}'.", ddl_name.unwrap_or("?")),
        StatementType::DropTable => format!("Dropped table '{}'.", ddl_name.unwrap_or("?")),
        StatementType::CreateIndex => format!("Created index '{}'.", ddl_name.unwrap_or("?")),
        StatementType::DropIndex => format!("Dropped index '{}'.", ddl_name.unwrap_or("?")),
        StatementType::Insert | StatementType::Update | StatementType::Delete => {
            format!("{} row(s) affected.", result.rows_affected.unwrap_or(0))
        }
        StatementType::Explain => result
            .rows
            .as_ref()
            .and_then(|rows| rows.first())
            .map(|row| format!("{:?}", row.values[0]))
            .unwrap_or_default(),
        StatementType::Select => {
            let schema = result.schema.clone().unwrap_or_default();
            let rows = result.rows.clone().unwrap_or_default();
            let batch = RecordBatch { columns: schema, rows };
            pretty::render_record_batch(&batch, TableStyleKind::Modern)
        }
    }
}

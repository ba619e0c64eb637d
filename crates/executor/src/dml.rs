//! DML operators: Insert, Update, Delete.

use crate::scan::scan_all_rows;
use crate::{filter::eval_resolved_expr, ExecutionContext, Executor};
use catalog::{IndexMeta, TableMeta};
use common::{ColumnId, DbError, DbResult, RecordId, Row, TableId};
use planner::ResolvedExpr;
use storage::HeapTable;
use types::Value;

fn empty_row() -> Row {
    Row::new(vec![])
}

fn extract_key(values: &[Value], columns: &[ColumnId]) -> Vec<Value> {
    columns
        .iter()
        .map(|&c| values.get(c as usize).cloned().unwrap_or(Value::Null))
        .collect()
}

fn validate_not_null(table: &TableMeta, values: &[Value]) -> DbResult<()> {
    for (idx, column) in table.schema.columns.iter().enumerate() {
        if !column.nullable && values[idx].is_null() {
            return Err(DbError::Constraint(format!(
                "column '{}' may not be NULL",
                column.name
            )));
        }
    }
    Ok(())
}

fn validate_checks(table: &TableMeta, values: &[Value]) -> DbResult<()> {
    if table.checks.is_empty() {
        return Ok(());
    }
    let schema: Vec<String> = table.schema.columns.iter().map(|c| c.name.clone()).collect();
    let eval_ctx = expr::EvalContext {
        schema: schema.as_slice(),
    };
    let row = Row::new(values.to_vec());
    for check in &table.checks {
        match eval_ctx.eval(check, &row)? {
            Value::Bool(false) => {
                return Err(DbError::Constraint("CHECK constraint violated".into()));
            }
            Value::Bool(true) | Value::Null => {}
            other => {
                return Err(DbError::Executor(format!(
                    "CHECK constraint must evaluate to boolean, got {other:?}"
                )));
            }
        }
    }
    Ok(())
}

/// Full-scan UNIQUE validation: table-level `UNIQUE(cols)` constraints have
/// no dedicated index, so duplicates are caught by scanning every existing
/// row. `exclude_rid` lets UPDATE skip comparing a row against itself.
fn validate_unique_constraints(
    ctx: &mut ExecutionContext,
    table: &TableMeta,
    values: &[Value],
    exclude_rid: Option<RecordId>,
) -> DbResult<()> {
    if table.unique_constraints.is_empty() {
        return Ok(());
    }
    let mut heap = ctx.heap_table(table.id)?;
    let existing = scan_all_rows(&mut heap)?;

    for cols in &table.unique_constraints {
        let key = extract_key(values, cols);
        if key.iter().any(Value::is_null) {
            continue;
        }
        for row in &existing {
            if row.rid() == exclude_rid {
                continue;
            }
            if extract_key(&row.values, cols) == key {
                let names: Vec<&str> = cols
                    .iter()
                    .map(|&c| table.schema.columns[c as usize].name.as_str())
                    .collect();
                return Err(DbError::Constraint(format!(
                    "duplicate value for UNIQUE constraint on ({})",
                    names.join(", ")
                )));
            }
        }
    }
    Ok(())
}

/// Full-scan FOREIGN KEY validation: checks that the referenced row exists
/// in the parent table, scanning it directly since FK lookups have no
/// dedicated index either.
fn validate_foreign_keys(ctx: &mut ExecutionContext, table: &TableMeta, values: &[Value]) -> DbResult<()> {
    if table.foreign_keys.is_empty() {
        return Ok(());
    }
    for fk in &table.foreign_keys {
        let key = extract_key(values, &fk.columns);
        if key.iter().any(Value::is_null) {
            continue;
        }

        let ref_table = ctx.catalog.table(&fk.ref_table)?;
        let ref_cols: Vec<ColumnId> = fk
            .ref_columns
            .iter()
            .map(|name| {
                ref_table.schema.column_index(name).ok_or_else(|| {
                    DbError::Catalog(format!(
                        "unknown column '{name}' on referenced table '{}'",
                        fk.ref_table
                    ))
                })
            })
            .collect::<DbResult<_>>()?;
        let ref_table_id = ref_table.id;

        let mut heap = ctx.heap_table(ref_table_id)?;
        let rows = scan_all_rows(&mut heap)?;
        let found = rows
            .iter()
            .any(|row| extract_key(&row.values, &ref_cols) == key);

        if !found {
            return Err(DbError::Constraint(format!(
                "foreign key violation: no row in '{}' matches {:?}",
                fk.ref_table, key
            )));
        }
    }
    Ok(())
}

fn maintain_indexes_insert(
    ctx: &mut ExecutionContext,
    indexes: &[IndexMeta],
    values: &[Value],
    rid: RecordId,
) -> DbResult<()> {
    for index in indexes {
        let key = extract_key(values, &index.columns);
        let mut btree = ctx.open_index_storage(index.id)?;
        if index.kind == catalog::IndexKind::Primary && btree.search(&key)?.is_some() {
            return Err(DbError::Constraint(format!(
                "duplicate primary key value: {key:?}"
            )));
        }
        btree.insert(key, rid)?;
    }
    Ok(())
}

fn maintain_indexes_remove(ctx: &mut ExecutionContext, indexes: &[IndexMeta], values: &[Value]) -> DbResult<()> {
    for index in indexes {
        let key = extract_key(values, &index.columns);
        let mut btree = ctx.open_index_storage(index.id)?;
        btree.delete(&key)?;
    }
    Ok(())
}

/// Insert operator - inserts one or more rows into a table.
///
/// Evaluates value expressions (no outer row context, since INSERT values
/// are literals or constant expressions), fills in `AUTO_INCREMENT` and
/// `DEFAULT` values for columns the statement omitted, enforces NOT NULL /
/// CHECK / PRIMARY KEY / UNIQUE / FOREIGN KEY constraints, and maintains
/// every index on the table. Returns a single row containing the number of
/// rows inserted.
pub struct InsertExec {
    table_id: TableId,
    columns: Option<Vec<ColumnId>>,
    rows: Vec<Vec<ResolvedExpr>>,
    executed: bool,
}

impl InsertExec {
    pub fn new(table_id: TableId, columns: Option<Vec<ColumnId>>, rows: Vec<Vec<ResolvedExpr>>) -> Self {
        Self {
            table_id,
            columns,
            rows,
            executed: false,
        }
    }
}

impl Executor for InsertExec {
    fn open(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.executed = false;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        if self.executed {
            return Ok(None);
        }
        self.executed = true;

        let mut inserted = 0i64;
        let blank = empty_row();

        for row_exprs in &self.rows {
            let table = ctx.catalog.table_by_id(self.table_id)?.clone();
            let width = table.schema.columns.len();

            let col_order: Vec<ColumnId> = match &self.columns {
                Some(cols) => cols.clone(),
                None => (0..width as ColumnId).collect(),
            };
            if col_order.len() != row_exprs.len() {
                return Err(DbError::Executor(format!(
                    "INSERT column count ({}) does not match value count ({})",
                    col_order.len(),
                    row_exprs.len()
                )));
            }

            let mut values = vec![Value::Null; width];
            let mut provided = vec![false; width];
            for (col_id, expr) in col_order.iter().zip(row_exprs) {
                let idx = *col_id as usize;
                values[idx] = eval_resolved_expr(expr, &blank)?;
                provided[idx] = true;
            }

            for (idx, column) in table.schema.columns.iter().enumerate() {
                if provided[idx] {
                    continue;
                }
                if column.auto_increment {
                    let value = ctx.catalog.table_mut(&table.name)?.next_auto_increment_value();
                    values[idx] = Value::Int(value);
                } else if let Some(default) = &column.default {
                    values[idx] = default.clone();
                }
            }

            validate_not_null(&table, &values)?;
            validate_checks(&table, &values)?;
            validate_unique_constraints(ctx, &table, &values, None)?;
            validate_foreign_keys(ctx, &table, &values)?;

            let row = Row::new(values.clone());
            let rid = {
                let mut heap = ctx.heap_table(self.table_id)?;
                heap.insert(&row)?
            };
            maintain_indexes_insert(ctx, &table.indexes, &values, rid)?;

            inserted += 1;
        }

        Ok(Some(Row::new(vec![Value::Int(inserted)])))
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        Ok(())
    }

    fn schema(&self) -> &[String] {
        &[]
    }
}

/// Update operator - applies assignments to every row matching `input`,
/// re-validating constraints and re-indexing each row.
///
/// Since the storage layer's `HeapTable::update` performs an in-place
/// delete-then-insert (which can move a row to a new `RecordId`), index
/// maintenance is driven explicitly here rather than delegated to storage.
pub struct UpdateExec {
    table_id: TableId,
    input: Box<dyn Executor>,
    assignments: Vec<(ColumnId, ResolvedExpr)>,
    executed: bool,
}

impl UpdateExec {
    pub fn new(
        table_id: TableId,
        input: Box<dyn Executor>,
        assignments: Vec<(ColumnId, ResolvedExpr)>,
    ) -> Self {
        Self {
            table_id,
            input,
            assignments,
            executed: false,
        }
    }

    fn apply_assignments(&self, old_row: &Row) -> DbResult<Vec<Value>> {
        let mut new_values = old_row.values.clone();
        for (col_id, expr) in &self.assignments {
            let idx = *col_id as usize;
            if idx >= new_values.len() {
                return Err(DbError::Executor(format!(
                    "column index {idx} out of bounds (row has {} columns)",
                    new_values.len()
                )));
            }
            new_values[idx] = eval_resolved_expr(expr, old_row)?;
        }
        Ok(new_values)
    }
}

impl Executor for UpdateExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.executed = false;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        if self.executed {
            return Ok(None);
        }

        let mut count = 0i64;

        while let Some(old_row) = self.input.next(ctx)? {
            let rid = old_row.rid().ok_or_else(|| {
                DbError::Executor("UPDATE input row is missing a record id".into())
            })?;

            let table = ctx.catalog.table_by_id(self.table_id)?.clone();
            let new_values = self.apply_assignments(&old_row)?;

            validate_not_null(&table, &new_values)?;
            validate_checks(&table, &new_values)?;
            validate_unique_constraints(ctx, &table, &new_values, Some(rid))?;
            validate_foreign_keys(ctx, &table, &new_values)?;

            maintain_indexes_remove(ctx, &table.indexes, &old_row.values)?;

            let new_rid = {
                let mut heap = ctx.heap_table(self.table_id)?;
                heap.delete(rid)?;
                heap.insert(&Row::new(new_values.clone()))?
            };
            maintain_indexes_insert(ctx, &table.indexes, &new_values, new_rid)?;

            count += 1;
        }

        self.executed = true;
        Ok(Some(Row::new(vec![Value::Int(count)])))
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.close(ctx)
    }

    fn schema(&self) -> &[String] {
        &[]
    }
}

/// Delete operator - removes every row matching `input` from storage and
/// from every index on the table.
pub struct DeleteExec {
    table_id: TableId,
    input: Box<dyn Executor>,
    executed: bool,
}

impl DeleteExec {
    pub fn new(table_id: TableId, input: Box<dyn Executor>) -> Self {
        Self {
            table_id,
            input,
            executed: false,
        }
    }
}

impl Executor for DeleteExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.executed = false;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        if self.executed {
            return Ok(None);
        }

        let mut count = 0i64;

        while let Some(row) = self.input.next(ctx)? {
            let rid = row.rid().ok_or_else(|| {
                DbError::Executor("DELETE input row is missing a record id".into())
            })?;

            let table = ctx.catalog.table_by_id(self.table_id)?.clone();
            maintain_indexes_remove(ctx, &table.indexes, &row.values)?;

            let mut heap = ctx.heap_table(self.table_id)?;
            heap.delete(rid)?;

            count += 1;
        }

        self.executed = true;
        Ok(Some(Row::new(vec![Value::Int(count)])))
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.close(ctx)
    }

    fn schema(&self) -> &[String] {
        &[]
    }
}

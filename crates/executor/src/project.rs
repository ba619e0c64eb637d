//! Project operator: selects, computes, and reorders columns.

use crate::filter::eval_resolved_expr;
use crate::{ExecutionContext, Executor};
use common::{DbError, DbResult, ExecutionStats, Row};
use planner::ResolvedItem;
use std::time::Instant;

/// Project operator - evaluates a list of resolved items against each
/// input row, producing rows with the projected/computed columns.
///
/// A bare `Aggregate` item is rejected here: aggregates are only valid
/// inside a `GROUP BY`, which [`crate::groupby::GroupByExec`] evaluates
/// directly rather than delegating to this operator.
pub struct ProjectExec {
    input: Box<dyn Executor>,
    items: Vec<ResolvedItem>,
    schema: Vec<String>,
    stats: ExecutionStats,
}

impl ProjectExec {
    /// Create a new project operator.
    pub fn new(input: Box<dyn Executor>, items: Vec<ResolvedItem>) -> Self {
        let schema = items.iter().map(item_label).collect();
        Self {
            input,
            items,
            schema,
            stats: ExecutionStats::default(),
        }
    }
}

fn item_label(item: &ResolvedItem) -> String {
    match item {
        ResolvedItem::Column { label, .. } => label.clone(),
        ResolvedItem::Expr { label, .. } => label.clone(),
        ResolvedItem::Aggregate { label, .. } => label.clone(),
    }
}

fn eval_item(item: &ResolvedItem, row: &Row) -> DbResult<types::Value> {
    match item {
        ResolvedItem::Column { col, .. } => {
            let idx = *col as usize;
            row.values.get(idx).cloned().ok_or_else(|| {
                DbError::Executor(format!(
                    "column index {idx} out of bounds (row has {} columns)",
                    row.values.len()
                ))
            })
        }
        ResolvedItem::Expr { expr, .. } => eval_resolved_expr(expr, row),
        ResolvedItem::Aggregate { label, .. } => Err(DbError::Executor(format!(
            "aggregate '{label}' used outside of GROUP BY"
        ))),
    }
}

impl Executor for ProjectExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let start = Instant::now();
        self.stats = ExecutionStats::default();
        self.input.open(ctx)?;
        self.stats.open_time = start.elapsed();
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        let start = Instant::now();

        let row = match self.input.next(ctx)? {
            Some(r) => r,
            None => {
                self.stats.total_next_time += start.elapsed();
                return Ok(None);
            }
        };

        let rid = row.rid();
        let mut projected_values = Vec::with_capacity(self.items.len());
        for item in &self.items {
            projected_values.push(eval_item(item, &row)?);
        }

        let mut projected = Row::new(projected_values);
        projected.set_rid(rid);

        self.stats.rows_produced += 1;
        self.stats.total_next_time += start.elapsed();
        Ok(Some(projected))
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let start = Instant::now();
        self.input.close(ctx)?;
        self.stats.close_time = start.elapsed();
        Ok(())
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }

    fn stats(&self) -> Option<&ExecutionStats> {
        Some(&self.stats)
    }
}

//! GroupBy operator: buckets rows by key columns and computes aggregates
//! and projected expressions over each bucket.
//!
//! The planner emits grouping as a `GroupBy` node wrapped by an outer
//! `Project` that carries the actual output items (plain columns,
//! computed expressions, and aggregate calls). Splitting those into two
//! operators would mean the `Project` operator would need its own notion
//! of "current group", so `builder.rs` special-cases that shape and
//! hands both the keys and the outer items to a single `GroupByExec`.

use crate::filter::eval_resolved_expr;
use crate::sort::compare_values;
use crate::{ExecutionContext, Executor};
use common::{ColumnId, DbError, DbResult, ExecutionStats, Row};
use parser::AggFunc;
use planner::ResolvedItem;
use std::time::Instant;
use types::Value;

pub struct GroupByExec {
    input: Box<dyn Executor>,
    keys: Vec<ColumnId>,
    items: Vec<ResolvedItem>,
    schema: Vec<String>,
    groups: Option<Vec<Row>>,
    cursor: usize,
    stats: ExecutionStats,
}

impl GroupByExec {
    pub fn new(input: Box<dyn Executor>, keys: Vec<ColumnId>, items: Vec<ResolvedItem>) -> Self {
        let schema = items
            .iter()
            .map(|item| match item {
                ResolvedItem::Column { label, .. } => label.clone(),
                ResolvedItem::Expr { label, .. } => label.clone(),
                ResolvedItem::Aggregate { label, .. } => label.clone(),
            })
            .collect();

        Self {
            input,
            keys,
            items,
            schema,
            groups: None,
            cursor: 0,
            stats: ExecutionStats::default(),
        }
    }

    fn key_values(&self, row: &Row) -> Vec<Value> {
        self.keys
            .iter()
            .map(|&k| row.values.get(k as usize).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn build_groups(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let mut buckets: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();

        while let Some(row) = self.input.next(ctx)? {
            let key = self.key_values(&row);
            match buckets.iter_mut().find(|(k, _)| values_eq(k, &key)) {
                Some((_, rows)) => rows.push(row),
                None => buckets.push((key, vec![row])),
            }
        }

        // No GROUP BY keys means the whole input is a single group, even
        // if that group is empty (e.g. COUNT(*) over an empty table).
        if buckets.is_empty() && self.keys.is_empty() {
            buckets.push((Vec::new(), Vec::new()));
        }

        let mut output = Vec::with_capacity(buckets.len());
        for (_, bucket) in &buckets {
            let mut values = Vec::with_capacity(self.items.len());
            for item in &self.items {
                values.push(eval_group_item(item, bucket)?);
            }
            output.push(Row::new(values));
        }

        self.groups = Some(output);
        self.cursor = 0;
        Ok(())
    }
}

fn values_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| compare_values(x, y) == std::cmp::Ordering::Equal)
}

fn eval_group_item(item: &ResolvedItem, bucket: &[Row]) -> DbResult<Value> {
    match item {
        ResolvedItem::Column { col, label } => bucket
            .first()
            .and_then(|row| row.values.get(*col as usize))
            .cloned()
            .ok_or_else(|| {
                DbError::Executor(format!(
                    "column '{label}' referenced outside an aggregate, but group is empty"
                ))
            }),
        ResolvedItem::Expr { expr, label } => {
            let row = bucket.first().ok_or_else(|| {
                DbError::Executor(format!(
                    "expression '{label}' referenced outside an aggregate, but group is empty"
                ))
            })?;
            eval_resolved_expr(expr, row)
        }
        ResolvedItem::Aggregate { func, arg, .. } => compute_aggregate(*func, *arg, bucket),
    }
}

fn compute_aggregate(func: AggFunc, arg: Option<ColumnId>, bucket: &[Row]) -> DbResult<Value> {
    match func {
        AggFunc::Count => match arg {
            None => Ok(Value::Int(bucket.len() as i64)),
            Some(col) => {
                let count = bucket
                    .iter()
                    .filter(|row| {
                        !matches!(row.values.get(col as usize), None | Some(Value::Null))
                    })
                    .count();
                Ok(Value::Int(count as i64))
            }
        },
        AggFunc::Sum => {
            let col = arg.ok_or_else(|| DbError::Executor("SUM requires a column".into()))?;
            let values = non_null_column_values(bucket, col);
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let sum: f64 = values.iter().filter_map(|v| v.as_f64()).sum();
            Ok(Value::Float(sum))
        }
        AggFunc::Avg => {
            let col = arg.ok_or_else(|| DbError::Executor("AVG requires a column".into()))?;
            let values = non_null_column_values(bucket, col);
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let sum: f64 = values.iter().filter_map(|v| v.as_f64()).sum();
            Ok(Value::Float(sum / values.len() as f64))
        }
        AggFunc::Max => {
            let col = arg.ok_or_else(|| DbError::Executor("MAX requires a column".into()))?;
            let values = non_null_column_values(bucket, col);
            Ok(values
                .into_iter()
                .max_by(compare_values)
                .unwrap_or(Value::Null))
        }
        AggFunc::Min => {
            let col = arg.ok_or_else(|| DbError::Executor("MIN requires a column".into()))?;
            let values = non_null_column_values(bucket, col);
            Ok(values
                .into_iter()
                .min_by(compare_values)
                .unwrap_or(Value::Null))
        }
    }
}

fn non_null_column_values(bucket: &[Row], col: ColumnId) -> Vec<Value> {
    bucket
        .iter()
        .filter_map(|row| row.values.get(col as usize).cloned())
        .filter(|v| !matches!(v, Value::Null))
        .collect()
}

impl Executor for GroupByExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let start = Instant::now();
        self.stats = ExecutionStats::default();
        self.groups = None;
        self.cursor = 0;
        self.input.open(ctx)?;
        self.stats.open_time = start.elapsed();
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        let start = Instant::now();

        if self.groups.is_none() {
            self.build_groups(ctx)?;
        }

        let result = match &self.groups {
            Some(rows) if self.cursor < rows.len() => {
                let row = rows[self.cursor].clone();
                self.cursor += 1;
                self.stats.rows_produced += 1;
                Ok(Some(row))
            }
            _ => Ok(None),
        };

        self.stats.total_next_time += start.elapsed();
        result
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let start = Instant::now();
        self.groups = None;
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

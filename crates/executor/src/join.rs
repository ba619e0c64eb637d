//! Join operators: combines rows from multiple tables.

use crate::filter::eval_resolved_expr;
use crate::sort::compare_values;
use crate::{ExecutionContext, Executor};
use common::{DbResult, ExecutionStats, Row};
use parser::JoinKind;
use planner::ResolvedExpr;
use std::collections::HashMap;
use std::time::Instant;
use types::Value;

fn null_row(width: usize) -> Vec<Value> {
    vec![Value::Null; width]
}

/// Evaluate a join condition against a combined row. NULL is treated as
/// false (SQL semantics).
fn eval_join_condition(condition: &ResolvedExpr, row: &Row) -> DbResult<bool> {
    match eval_resolved_expr(condition, row)? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        other => Err(common::DbError::Executor(format!(
            "join condition must evaluate to boolean, got {:?}",
            other
        ))),
    }
}

fn combine(left: &Row, right: &[Value]) -> Row {
    let mut values = left.values.clone();
    values.extend(right.iter().cloned());
    Row::new(values)
}

/// Nested loop join operator - simple O(n*m) join algorithm.
///
/// For each row from the left table, iterates all rows from the right table,
/// evaluating the join condition on combined rows. Supports INNER, LEFT and
/// RIGHT joins; unmatched rows are padded with NULLs on the side that has no
/// match, per the `kind`.
///
/// # Algorithm
///
/// 1. `open()`: Materialize all right-side rows into memory, fetch first left row.
/// 2. `next()`: For each left row, iterate through all right rows, evaluate condition.
/// 3. When all right rows exhausted for current left, advance to next left row.
/// 4. For a LEFT/RIGHT join, once the main pass is done emit the unmatched
///    side's rows padded with NULLs on the other side.
/// 5. `close()`: Release materialized rows and close children.
///
/// # Performance
///
/// - Time: O(n * m) where n = left rows, m = right rows
/// - Space: O(m) to materialize right side
pub struct NestedLoopJoinExec {
    left_input: Box<dyn Executor>,
    right_input: Box<dyn Executor>,
    condition: ResolvedExpr,
    kind: JoinKind,
    schema: Vec<String>,
    right_width: usize,

    current_left_row: Option<Row>,
    current_left_matched: bool,
    right_materialized: Vec<Row>,
    right_matched: Vec<bool>,
    right_cursor: usize,
    right_remainder_cursor: usize,
    left_width: usize,
    stats: ExecutionStats,
}

impl NestedLoopJoinExec {
    /// Create a new nested loop join operator.
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        condition: ResolvedExpr,
        kind: JoinKind,
        schema: Vec<String>,
    ) -> Self {
        let left_width = left.schema().len();
        let right_width = right.schema().len();
        Self {
            left_input: left,
            right_input: right,
            condition,
            kind,
            schema,
            right_width,
            current_left_row: None,
            current_left_matched: false,
            right_materialized: Vec::new(),
            right_matched: Vec::new(),
            right_cursor: 0,
            right_remainder_cursor: 0,
            left_width,
            stats: ExecutionStats::default(),
        }
    }
}

impl Executor for NestedLoopJoinExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let start = Instant::now();
        self.stats = ExecutionStats::default();

        self.left_input.open(ctx)?;
        self.right_input.open(ctx)?;

        self.right_materialized.clear();
        while let Some(row) = self.right_input.next(ctx)? {
            self.right_materialized.push(row);
        }
        self.right_matched = vec![false; self.right_materialized.len()];

        self.current_left_row = self.left_input.next(ctx)?;
        self.current_left_matched = false;
        self.right_cursor = 0;
        self.right_remainder_cursor = 0;

        self.stats.open_time = start.elapsed();
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        let start = Instant::now();

        loop {
            let left_row = match &self.current_left_row {
                Some(r) => r.clone(),
                None => break,
            };

            while self.right_cursor < self.right_materialized.len() {
                let idx = self.right_cursor;
                self.right_cursor += 1;
                let right_row = &self.right_materialized[idx];
                let combined = combine(&left_row, &right_row.values);

                if eval_join_condition(&self.condition, &combined)? {
                    self.current_left_matched = true;
                    self.right_matched[idx] = true;
                    self.stats.rows_produced += 1;
                    self.stats.total_next_time += start.elapsed();
                    return Ok(Some(combined));
                }
            }

            // Right side exhausted for this left row.
            let emit_unmatched_left =
                matches!(self.kind, JoinKind::Left) && !self.current_left_matched;

            self.current_left_row = self.left_input.next(ctx)?;
            self.right_cursor = 0;
            self.current_left_matched = false;

            if emit_unmatched_left {
                let combined = combine(&left_row, &null_row(self.right_width));
                self.stats.rows_produced += 1;
                self.stats.total_next_time += start.elapsed();
                return Ok(Some(combined));
            }
        }

        // Left side exhausted. For RIGHT joins, emit right rows nobody matched.
        if matches!(self.kind, JoinKind::Right) {
            while self.right_remainder_cursor < self.right_matched.len() {
                let idx = self.right_remainder_cursor;
                self.right_remainder_cursor += 1;
                if !self.right_matched[idx] {
                    let mut values = null_row(self.left_width);
                    values.extend(self.right_materialized[idx].values.iter().cloned());
                    self.stats.rows_produced += 1;
                    self.stats.total_next_time += start.elapsed();
                    return Ok(Some(Row::new(values)));
                }
            }
        }

        self.stats.total_next_time += start.elapsed();
        Ok(None)
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let start = Instant::now();

        self.right_materialized.clear();
        self.right_matched.clear();
        self.current_left_row = None;
        self.left_input.close(ctx)?;
        self.right_input.close(ctx)?;

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

/// Key extracted from a row for an equi-join, used by [`HashJoinExec`] and
/// [`SortMergeJoinExec`]. Values compare via [`compare_values`] so cross-type
/// numeric keys (e.g. an `Int` probing a `Float` build key) still match.
fn join_key(values: &[usize], row: &Row) -> Vec<Value> {
    values
        .iter()
        .map(|&idx| row.values.get(idx).cloned().unwrap_or(Value::Null))
        .collect()
}

fn key_hashable(key: &[Value]) -> Vec<String> {
    // HashMap needs a hashable key; values compare by type-aware ordering
    // elsewhere, but for equi-join probing a stable textual encoding of
    // each value is enough since the columns on both sides share a type.
    key.iter().map(|v| format!("{v:?}")).collect()
}

/// Extract the left/right column ordinals being equi-joined out of a
/// conjunction of `left.col = right.col` comparisons. Returns `None` if the
/// condition isn't a pure equi-join the hash/merge strategies can exploit.
fn extract_equi_join_columns(
    condition: &ResolvedExpr,
    left_width: usize,
) -> Option<(Vec<usize>, Vec<usize>)> {
    use expr::BinaryOp;

    fn collect(condition: &ResolvedExpr, out: &mut Vec<(common::ColumnId, common::ColumnId)>) -> bool {
        match condition {
            ResolvedExpr::Binary {
                left,
                op: BinaryOp::Eq,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (ResolvedExpr::Column(a), ResolvedExpr::Column(b)) => {
                    out.push((*a, *b));
                    true
                }
                _ => false,
            },
            ResolvedExpr::Binary {
                left,
                op: BinaryOp::And,
                right,
            } => collect(left, out) && collect(right, out),
            _ => false,
        }
    }

    let mut pairs = Vec::new();
    if !collect(condition, &mut pairs) {
        return None;
    }

    let mut left_cols = Vec::new();
    let mut right_cols = Vec::new();
    for (a, b) in pairs {
        let (l, r) = if (a as usize) < left_width {
            (a, b)
        } else {
            (b, a)
        };
        left_cols.push(l as usize);
        right_cols.push(r as usize - left_width);
    }
    Some((left_cols, right_cols))
}

/// Hash join operator - builds a hash table over the right (build) side,
/// then probes it with each left row. Falls back to nested-loop behavior
/// is not provided; the builder only constructs this operator when the
/// condition is a pure equi-join it can extract join columns from.
pub struct HashJoinExec {
    left_input: Box<dyn Executor>,
    right_input: Box<dyn Executor>,
    left_cols: Vec<usize>,
    right_cols: Vec<usize>,
    kind: JoinKind,
    schema: Vec<String>,
    left_width: usize,
    right_width: usize,

    build_table: HashMap<Vec<String>, Vec<usize>>,
    right_rows: Vec<Row>,
    right_matched: Vec<bool>,
    current_left_row: Option<Row>,
    pending_matches: Vec<usize>,
    pending_cursor: usize,
    current_left_matched: bool,
    remainder_cursor: usize,
    stats: ExecutionStats,
}

impl HashJoinExec {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        condition: &ResolvedExpr,
        kind: JoinKind,
        schema: Vec<String>,
    ) -> Option<Self> {
        let left_width = left.schema().len();
        let right_width = right.schema().len();
        let (left_cols, right_cols) = extract_equi_join_columns(condition, left_width)?;

        Some(Self {
            left_input: left,
            right_input: right,
            left_cols,
            right_cols,
            kind,
            schema,
            left_width,
            right_width,
            build_table: HashMap::new(),
            right_rows: Vec::new(),
            right_matched: Vec::new(),
            current_left_row: None,
            pending_matches: Vec::new(),
            pending_cursor: 0,
            current_left_matched: false,
            remainder_cursor: 0,
            stats: ExecutionStats::default(),
        })
    }
}

impl Executor for HashJoinExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let start = Instant::now();
        self.stats = ExecutionStats::default();

        self.left_input.open(ctx)?;
        self.right_input.open(ctx)?;

        self.right_rows.clear();
        self.build_table.clear();
        while let Some(row) = self.right_input.next(ctx)? {
            let key = key_hashable(&join_key(&self.right_cols, &row));
            let idx = self.right_rows.len();
            self.build_table.entry(key).or_default().push(idx);
            self.right_rows.push(row);
        }
        self.right_matched = vec![false; self.right_rows.len()];

        self.current_left_row = self.left_input.next(ctx)?;
        self.current_left_matched = false;
        self.pending_matches.clear();
        self.pending_cursor = 0;
        self.remainder_cursor = 0;

        self.stats.open_time = start.elapsed();
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        let start = Instant::now();

        loop {
            let left_row = match &self.current_left_row {
                Some(r) => r.clone(),
                None => break,
            };

            if self.pending_cursor == 0 && self.pending_matches.is_empty() {
                let key = key_hashable(&join_key(&self.left_cols, &left_row));
                self.pending_matches = self
                    .build_table
                    .get(&key)
                    .cloned()
                    .unwrap_or_default();
            }

            if self.pending_cursor < self.pending_matches.len() {
                let idx = self.pending_matches[self.pending_cursor];
                self.pending_cursor += 1;
                self.current_left_matched = true;
                self.right_matched[idx] = true;
                let combined = combine(&left_row, &self.right_rows[idx].values);
                self.stats.rows_produced += 1;
                self.stats.total_next_time += start.elapsed();
                return Ok(Some(combined));
            }

            let emit_unmatched_left =
                matches!(self.kind, JoinKind::Left) && !self.current_left_matched;

            self.current_left_row = self.left_input.next(ctx)?;
            self.current_left_matched = false;
            self.pending_matches.clear();
            self.pending_cursor = 0;

            if emit_unmatched_left {
                let combined = combine(&left_row, &null_row(self.right_width));
                self.stats.rows_produced += 1;
                self.stats.total_next_time += start.elapsed();
                return Ok(Some(combined));
            }
        }

        if matches!(self.kind, JoinKind::Right) {
            while self.remainder_cursor < self.right_matched.len() {
                let idx = self.remainder_cursor;
                self.remainder_cursor += 1;
                if !self.right_matched[idx] {
                    let mut values = null_row(self.left_width);
                    values.extend(self.right_rows[idx].values.iter().cloned());
                    self.stats.rows_produced += 1;
                    self.stats.total_next_time += start.elapsed();
                    return Ok(Some(Row::new(values)));
                }
            }
        }

        self.stats.total_next_time += start.elapsed();
        Ok(None)
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let start = Instant::now();
        self.build_table.clear();
        self.right_rows.clear();
        self.right_matched.clear();
        self.current_left_row = None;
        self.left_input.close(ctx)?;
        self.right_input.close(ctx)?;
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

/// Sort-merge join operator - sorts both sides on the equi-join key, then
/// advances two cursors in lockstep. Like [`HashJoinExec`], only built for
/// conditions the builder can reduce to an equi-join.
pub struct SortMergeJoinExec {
    left_input: Box<dyn Executor>,
    right_input: Box<dyn Executor>,
    left_cols: Vec<usize>,
    right_cols: Vec<usize>,
    kind: JoinKind,
    schema: Vec<String>,
    left_width: usize,
    right_width: usize,

    left_rows: Vec<Row>,
    right_rows: Vec<Row>,
    output: Vec<Row>,
    cursor: usize,
    stats: ExecutionStats,
}

impl SortMergeJoinExec {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        condition: &ResolvedExpr,
        kind: JoinKind,
        schema: Vec<String>,
    ) -> Option<Self> {
        let left_width = left.schema().len();
        let right_width = right.schema().len();
        let (left_cols, right_cols) = extract_equi_join_columns(condition, left_width)?;

        Some(Self {
            left_input: left,
            right_input: right,
            left_cols,
            right_cols,
            kind,
            schema,
            left_width,
            right_width,
            left_rows: Vec::new(),
            right_rows: Vec::new(),
            output: Vec::new(),
            cursor: 0,
            stats: ExecutionStats::default(),
        })
    }

    fn merge(&mut self) {
        self.left_rows
            .sort_by(|a, b| compare_key(&self.left_cols, a, b));
        self.right_rows
            .sort_by(|a, b| compare_key(&self.right_cols, a, b));

        let mut i = 0;
        let mut j = 0;
        let mut left_any_matched = vec![false; self.left_rows.len()];
        let mut right_any_matched = vec![false; self.right_rows.len()];

        while i < self.left_rows.len() && j < self.right_rows.len() {
            let lkey = join_key(&self.left_cols, &self.left_rows[i]);
            let rkey = join_key(&self.right_cols, &self.right_rows[j]);
            let ord = compare_key_values(&lkey, &rkey);

            match ord {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    // Gather the full equal-key run on both sides (classic
                    // sort-merge band-join handling for duplicate keys).
                    let i_start = i;
                    let j_start = j;
                    let mut i_end = i;
                    while i_end < self.left_rows.len()
                        && compare_key_values(&join_key(&self.left_cols, &self.left_rows[i_end]), &lkey)
                            == std::cmp::Ordering::Equal
                    {
                        i_end += 1;
                    }
                    let mut j_end = j;
                    while j_end < self.right_rows.len()
                        && compare_key_values(&join_key(&self.right_cols, &self.right_rows[j_end]), &rkey)
                            == std::cmp::Ordering::Equal
                    {
                        j_end += 1;
                    }

                    for li in i_start..i_end {
                        for rj in j_start..j_end {
                            self.output
                                .push(combine(&self.left_rows[li], &self.right_rows[rj].values));
                            left_any_matched[li] = true;
                            right_any_matched[rj] = true;
                        }
                    }

                    i = i_end;
                    j = j_end;
                }
            }
        }

        if matches!(self.kind, JoinKind::Left) {
            for (idx, row) in self.left_rows.iter().enumerate() {
                if !left_any_matched[idx] {
                    self.output.push(combine(row, &null_row(self.right_width)));
                }
            }
        }

        if matches!(self.kind, JoinKind::Right) {
            for (idx, row) in self.right_rows.iter().enumerate() {
                if !right_any_matched[idx] {
                    let mut values = null_row(self.left_width);
                    values.extend(row.values.iter().cloned());
                    self.output.push(Row::new(values));
                }
            }
        }
    }
}

fn compare_key(cols: &[usize], a: &Row, b: &Row) -> std::cmp::Ordering {
    compare_key_values(&join_key(cols, a), &join_key(cols, b))
}

fn compare_key_values(a: &[Value], b: &[Value]) -> std::cmp::Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = compare_values(x, y);
        if ord != std::cmp::Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

impl Executor for SortMergeJoinExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let start = Instant::now();
        self.stats = ExecutionStats::default();

        self.left_input.open(ctx)?;
        self.right_input.open(ctx)?;

        self.left_rows.clear();
        while let Some(row) = self.left_input.next(ctx)? {
            self.left_rows.push(row);
        }
        self.right_rows.clear();
        while let Some(row) = self.right_input.next(ctx)? {
            self.right_rows.push(row);
        }

        self.output.clear();
        self.cursor = 0;
        self.merge();

        self.stats.open_time = start.elapsed();
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        let start = Instant::now();
        let result = if self.cursor < self.output.len() {
            let row = self.output[self.cursor].clone();
            self.cursor += 1;
            self.stats.rows_produced += 1;
            Ok(Some(row))
        } else {
            Ok(None)
        };
        self.stats.total_next_time += start.elapsed();
        result
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let start = Instant::now();
        self.left_rows.clear();
        self.right_rows.clear();
        self.output.clear();
        self.left_input.close(ctx)?;
        self.right_input.close(ctx)?;
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

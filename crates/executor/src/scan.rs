//! Scan operators: SeqScan and IndexScan.

use crate::filter::eval_resolved_expr;
use crate::sort::compare_values;
use crate::{ExecutionContext, Executor};
use catalog::IndexId;
use common::{DbResult, ExecutionStats, PageId, RecordId, Row, TableId};
use planner::IndexPredicate;
use std::time::Instant;
use storage::HeapTable;
use types::Value;

/// Sequential scan operator - iterates all rows in a table.
///
/// Scans pages sequentially from beginning to end, fetching each page
/// via the buffer pool and deserializing rows.
pub struct SeqScanExec {
    table_id: TableId,
    schema: Vec<String>,
    current_page: PageId,
    current_slot: u16,
    num_pages: Option<u64>,
    stats: ExecutionStats,
}

impl SeqScanExec {
    /// Create a new sequential scan operator.
    pub fn new(table_id: TableId, schema: Vec<String>) -> Self {
        Self {
            table_id,
            schema,
            current_page: PageId(0),
            current_slot: 0,
            num_pages: None,
            stats: ExecutionStats::default(),
        }
    }

    /// Try to fetch the next row from storage.
    fn fetch_next_row(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        let mut heap = ctx.heap_table(self.table_id)?;

        let num_pages = match self.num_pages {
            Some(n) => n,
            None => {
                let n = heap.page_count()?;
                self.num_pages = Some(n);
                n
            }
        };

        while self.current_page.0 < num_pages {
            let num_slots = heap.num_slots(self.current_page)?;

            while self.current_slot < num_slots {
                let rid = RecordId {
                    page_id: self.current_page,
                    slot: self.current_slot,
                };

                if heap.slot_is_empty(self.current_page, self.current_slot)? {
                    self.current_slot += 1;
                    continue;
                }

                let mut row = heap.get(rid)?;
                row.set_rid(Some(rid));
                self.current_slot += 1;
                return Ok(Some(row));
            }

            self.current_page = PageId(self.current_page.0 + 1);
            self.current_slot = 0;
        }

        Ok(None)
    }
}

impl Executor for SeqScanExec {
    fn open(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        let start = Instant::now();

        self.current_page = PageId(0);
        self.current_slot = 0;
        self.num_pages = None;
        self.stats = ExecutionStats::default();

        self.stats.open_time = start.elapsed();
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        let start = Instant::now();
        let row = self.fetch_next_row(ctx)?;
        self.stats.total_next_time += start.elapsed();

        if row.is_some() {
            self.stats.rows_produced += 1;
        }

        if let Some(num_pages) = self.num_pages {
            self.stats.pages_scanned = num_pages;
        }

        Ok(row)
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        let start = Instant::now();
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

/// Read every live row out of a heap file, in page/slot order. Used for
/// the full-table scans that back UNIQUE and foreign-key checks, and
/// for backfilling an index created over existing rows.
pub(crate) fn scan_all_rows(heap: &mut storage::HeapFile) -> DbResult<Vec<Row>> {
    let mut rows = Vec::new();
    let num_pages = heap.page_count()?;

    for page_num in 0..num_pages {
        let page_id = PageId(page_num);
        let num_slots = heap.num_slots(page_id)?;

        for slot in 0..num_slots {
            if heap.slot_is_empty(page_id, slot)? {
                continue;
            }

            let rid = RecordId { page_id, slot };
            let mut row = heap.get(rid)?;
            row.set_rid(Some(rid));
            rows.push(row);
        }
    }

    Ok(rows)
}

/// Index scan operator - uses the B-tree index to find rows efficiently.
///
/// Looks up matching RecordIds in the index on `open`, then fetches the
/// actual rows from the heap table as `next` is called.
pub struct IndexScanExec {
    table_id: TableId,
    index_name: String,
    predicate: IndexPredicate,
    schema: Vec<String>,
    matching_rids: Vec<RecordId>,
    cursor: usize,
    stats: ExecutionStats,
}

impl IndexScanExec {
    pub fn new(
        table_id: TableId,
        index_name: String,
        predicate: IndexPredicate,
        schema: Vec<String>,
    ) -> Self {
        Self {
            table_id,
            index_name,
            predicate,
            schema,
            matching_rids: Vec::new(),
            cursor: 0,
            stats: ExecutionStats::default(),
        }
    }

    fn find_index_id(&self, ctx: &ExecutionContext) -> DbResult<IndexId> {
        let table_meta = ctx.catalog.table_by_id(self.table_id)?;
        let index_meta = table_meta.index(&self.index_name)?;
        Ok(index_meta.id)
    }

    /// Evaluate a predicate expression to a literal search-key value.
    /// Index predicates only ever carry literals (the planner resolves
    /// any parameters before building the physical plan).
    fn eval_key_expr(&self, expr: &planner::ResolvedExpr) -> DbResult<Value> {
        let empty_row = Row::new(Vec::new());
        eval_resolved_expr(expr, &empty_row)
    }

    /// Query the index for matching RecordIds.
    fn query_index(&self, ctx: &ExecutionContext) -> DbResult<Vec<RecordId>> {
        let index_id = self.find_index_id(ctx)?;
        let mut btree = ctx.open_index_storage(index_id)?;

        match &self.predicate {
            IndexPredicate::Eq { value, .. } => {
                let key = self.eval_key_expr(value)?;
                Ok(btree.search(&[key])?.into_iter().collect())
            }
            IndexPredicate::CompositeEq { values, .. } => {
                let key = values
                    .iter()
                    .map(|v| self.eval_key_expr(v))
                    .collect::<DbResult<Vec<_>>>()?;
                Ok(btree.search(&key)?.into_iter().collect())
            }
            IndexPredicate::Range { low, high, .. } => {
                let low_val = self.eval_key_expr(low)?;
                let high_val = self.eval_key_expr(high)?;
                let entries = btree.scan_all()?;
                Ok(entries
                    .into_iter()
                    .filter(|(key, _)| {
                        let Some(k) = key.first() else {
                            return false;
                        };
                        compare_values(k, &low_val) != std::cmp::Ordering::Less
                            && compare_values(k, &high_val) != std::cmp::Ordering::Greater
                    })
                    .map(|(_, rid)| rid)
                    .collect())
            }
        }
    }
}

impl Executor for IndexScanExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let start = Instant::now();

        self.cursor = 0;
        self.stats = ExecutionStats::default();
        self.matching_rids = self.query_index(ctx)?;

        self.stats.open_time = start.elapsed();
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        let start = Instant::now();

        if self.cursor >= self.matching_rids.len() {
            self.stats.total_next_time += start.elapsed();
            return Ok(None);
        }

        let rid = self.matching_rids[self.cursor];
        self.cursor += 1;

        let mut heap_table = ctx.heap_table(self.table_id)?;
        let mut row = heap_table.get(rid)?;
        row.set_rid(Some(rid));

        self.stats.rows_produced += 1;
        self.stats.total_next_time += start.elapsed();

        Ok(Some(row))
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        let start = Instant::now();
        self.matching_rids.clear();
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::helpers::{assert_exhausted, assert_next_row, setup_test_context};
    use planner::ResolvedExpr;

    fn insert_test_rows(
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

    #[test]
    fn seq_scan_empty_table() {
        let (mut ctx, _temp) = setup_test_context();
        let table_id = TableId(1);

        let mut scan = SeqScanExec::new(table_id, vec!["id".into(), "name".into()]);

        scan.open(&mut ctx).unwrap();
        assert_exhausted(&mut scan, &mut ctx);
        scan.close(&mut ctx).unwrap();
    }

    #[test]
    fn seq_scan_single_row() {
        let (mut ctx, _temp) = setup_test_context();
        let table_id = TableId(1);

        let rows = vec![Row::new(vec![
            Value::Int(1),
            Value::Text("alice".into()),
            Value::Bool(true),
        ])];
        insert_test_rows(&mut ctx, table_id, rows).unwrap();

        let mut scan = SeqScanExec::new(table_id, vec!["id".into(), "name".into(), "active".into()]);
        scan.open(&mut ctx).unwrap();
        assert_next_row(
            &mut scan,
            &mut ctx,
            Row::new(vec![
                Value::Int(1),
                Value::Text("alice".into()),
                Value::Bool(true),
            ]),
        );
        assert_exhausted(&mut scan, &mut ctx);
        scan.close(&mut ctx).unwrap();
    }

    #[test]
    fn seq_scan_multiple_rows_preserves_order() {
        let (mut ctx, _temp) = setup_test_context();
        let table_id = TableId(1);

        let rows = vec![
            Row::new(vec![Value::Int(1), Value::Text("a".into()), Value::Bool(true)]),
            Row::new(vec![Value::Int(2), Value::Text("b".into()), Value::Bool(false)]),
            Row::new(vec![Value::Int(3), Value::Text("c".into()), Value::Bool(true)]),
        ];
        insert_test_rows(&mut ctx, table_id, rows).unwrap();

        let mut scan = SeqScanExec::new(table_id, vec!["id".into(), "name".into(), "active".into()]);
        scan.open(&mut ctx).unwrap();
        assert_next_row(
            &mut scan,
            &mut ctx,
            Row::new(vec![Value::Int(1), Value::Text("a".into()), Value::Bool(true)]),
        );
        assert_next_row(
            &mut scan,
            &mut ctx,
            Row::new(vec![Value::Int(2), Value::Text("b".into()), Value::Bool(false)]),
        );
        assert_next_row(
            &mut scan,
            &mut ctx,
            Row::new(vec![Value::Int(3), Value::Text("c".into()), Value::Bool(true)]),
        );
        assert_exhausted(&mut scan, &mut ctx);
        scan.close(&mut ctx).unwrap();
    }

    #[test]
    fn seq_scan_skips_deleted_rows() {
        let (mut ctx, _temp) = setup_test_context();
        let table_id = TableId(1);

        let rows = vec![
            Row::new(vec![Value::Int(1), Value::Text("a".into()), Value::Bool(true)]),
            Row::new(vec![Value::Int(2), Value::Text("b".into()), Value::Bool(false)]),
        ];
        insert_test_rows(&mut ctx, table_id, rows).unwrap();

        {
            let mut heap = ctx.heap_table(table_id).unwrap();
            heap.delete(RecordId {
                page_id: PageId(0),
                slot: 0,
            })
            .unwrap();
        }

        let mut scan = SeqScanExec::new(table_id, vec!["id".into(), "name".into(), "active".into()]);
        scan.open(&mut ctx).unwrap();
        assert_next_row(
            &mut scan,
            &mut ctx,
            Row::new(vec![Value::Int(2), Value::Text("b".into()), Value::Bool(false)]),
        );
        assert_exhausted(&mut scan, &mut ctx);
        scan.close(&mut ctx).unwrap();
    }

    #[test]
    fn seq_scan_attaches_rid_to_rows() {
        let (mut ctx, _temp) = setup_test_context();
        let table_id = TableId(1);

        let rows = vec![Row::new(vec![
            Value::Int(1),
            Value::Text("alice".into()),
            Value::Bool(true),
        ])];
        insert_test_rows(&mut ctx, table_id, rows).unwrap();

        let mut scan = SeqScanExec::new(table_id, vec!["id".into(), "name".into(), "active".into()]);
        scan.open(&mut ctx).unwrap();
        let row = scan.next(&mut ctx).unwrap().unwrap();
        assert_eq!(
            row.rid(),
            Some(RecordId {
                page_id: PageId(0),
                slot: 0
            })
        );
        scan.close(&mut ctx).unwrap();
    }

    fn create_pk_index(ctx: &mut ExecutionContext, table_id: TableId) -> IndexId {
        let table_name = ctx.catalog.table_by_id(table_id).unwrap().name.clone();
        let index_id = ctx
            .catalog
            .create_index(&table_name, "idx_users_id", &["id"])
            .unwrap();
        ctx.create_index_storage(index_id).unwrap();
        index_id
    }

    fn open_index(ctx: &ExecutionContext, index_id: IndexId) -> btree::BTreeIndex {
        ctx.open_index_storage(index_id).unwrap()
    }

    fn index_lit(value: i64) -> ResolvedExpr {
        ResolvedExpr::Literal(Value::Int(value))
    }

    #[test]
    fn index_scan_eq_finds_matching_row() {
        let (mut ctx, _temp) = setup_test_context();
        let table_id = TableId(1);
        let index_id = create_pk_index(&mut ctx, table_id);

        let row = Row::new(vec![Value::Int(1), Value::Text("alice".into()), Value::Bool(true)]);
        {
            let mut heap = ctx.heap_table(table_id).unwrap();
            let rid = heap.insert(&row).unwrap();
            let mut btree = open_index(&ctx, index_id);
            btree.insert(vec![Value::Int(1)], rid).unwrap();
        }

        let predicate = IndexPredicate::Eq {
            col: 0,
            value: index_lit(1),
        };
        let mut scan = IndexScanExec::new(
            table_id,
            "idx_users_id".into(),
            predicate,
            vec!["id".into(), "name".into(), "active".into()],
        );

        scan.open(&mut ctx).unwrap();
        assert_next_row(&mut scan, &mut ctx, row);
        assert_exhausted(&mut scan, &mut ctx);
        scan.close(&mut ctx).unwrap();
    }

    #[test]
    fn index_scan_eq_no_match_returns_empty() {
        let (mut ctx, _temp) = setup_test_context();
        let table_id = TableId(1);
        create_pk_index(&mut ctx, table_id);

        let predicate = IndexPredicate::Eq {
            col: 0,
            value: index_lit(99),
        };
        let mut scan = IndexScanExec::new(
            table_id,
            "idx_users_id".into(),
            predicate,
            vec!["id".into(), "name".into(), "active".into()],
        );

        scan.open(&mut ctx).unwrap();
        assert_exhausted(&mut scan, &mut ctx);
        scan.close(&mut ctx).unwrap();
    }

    #[test]
    fn index_scan_range_filters_by_bounds() {
        let (mut ctx, _temp) = setup_test_context();
        let table_id = TableId(1);
        let index_id = create_pk_index(&mut ctx, table_id);

        {
            let mut heap = ctx.heap_table(table_id).unwrap();
            let mut btree = open_index(&ctx, index_id);
            for i in 1..=5 {
                let row = Row::new(vec![
                    Value::Int(i),
                    Value::Text(format!("user{i}")),
                    Value::Bool(true),
                ]);
                let rid = heap.insert(&row).unwrap();
                btree.insert(vec![Value::Int(i)], rid).unwrap();
            }
        }

        let predicate = IndexPredicate::Range {
            col: 0,
            low: index_lit(2),
            high: index_lit(4),
        };
        let mut scan = IndexScanExec::new(
            table_id,
            "idx_users_id".into(),
            predicate,
            vec!["id".into(), "name".into(), "active".into()],
        );

        scan.open(&mut ctx).unwrap();
        let mut seen = Vec::new();
        while let Some(row) = scan.next(&mut ctx).unwrap() {
            seen.push(row.values[0].clone());
        }
        seen.sort_by(compare_values);
        assert_eq!(seen, vec![Value::Int(2), Value::Int(3), Value::Int(4)]);
        scan.close(&mut ctx).unwrap();
    }
}

//! Query planner: converts SQL AST to optimized physical execution plans.
//!
//! The planner bridges between the parser's abstract syntax tree and the executor's
//! runtime operators. It performs three main tasks:
//!
//! 1. **Name Binding** - Resolves column names to ordinals using catalog schemas
//! 2. **Optimization** - Applies simple rules like predicate pushdown and projection pruning
//! 3. **Access Method Selection** - Chooses between sequential and index scans
//!
//! # Architecture
//!
//! ```text
//! Parser AST
//!     ↓
//! Logical Plan (table names, column names)
//!     ↓
//! Optimize (pushdown, pruning, dead-operator elimination)
//!     ↓
//! Bind (names → IDs, cost estimates, join algorithm choice)
//!     ↓
//! Physical Plan (table IDs, column ordinals, access methods)
//!     ↓
//! Executor
//! ```


use catalog::{Catalog, TableMeta};
use common::{ColumnId, DbError, DbResult, TableId};
use expr::{BinaryOp, Expr, UnaryOp};
use parser::{AggArg, AggFunc, JoinKind, SelectItem, SelectStatement, Statement};
use types::Value;

pub use parser::SortDirection;

/// Estimated cost and row count the planner attaches to every operator, per
/// the fixed per-operator cost model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CostEstimate {
    pub cost: f64,
    pub rows: f64,
}

impl CostEstimate {
    fn new(cost: f64, rows: f64) -> Self {
        Self { cost, rows }
    }
}

/// Logical plan node - optimizer-friendly representation with string names.
#[derive(Clone, Debug, PartialEq)]
pub enum LogicalPlan {
    TableScan {
        table: String,
    },
    Filter {
        input: Box<LogicalPlan>,
        predicate: Expr,
    },
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        kind: JoinKind,
        condition: Expr,
        left_name: String,
        right_name: String,
    },
    GroupBy {
        input: Box<LogicalPlan>,
        keys: Vec<Expr>,
        items: Vec<SelectItem>,
    },
    Project {
        input: Box<LogicalPlan>,
        items: Vec<SelectItem>,
    },
    Sort {
        input: Box<LogicalPlan>,
        order_by: Vec<OrderByExpr>,
    },
    Limit {
        input: Box<LogicalPlan>,
        limit: Option<u64>,
        offset: Option<u64>,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Expr>>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Expr)>,
        predicate: Option<Expr>,
    },
    Delete {
        table: String,
        predicate: Option<Expr>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderByExpr {
    pub column: String,
    pub direction: SortDirection,
}

/// One item of a (possibly aggregating) projection, with names resolved to
/// ordinals.
#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedItem {
    Column { col: ColumnId, label: String },
    Expr { expr: ResolvedExpr, label: String },
    Aggregate {
        func: AggFunc,
        arg: Option<ColumnId>,
        label: String,
    },
}

/// Physical plan node - executor-ready with resolved IDs, access methods,
/// and cost/row estimates.
#[derive(Clone, Debug, PartialEq)]
pub enum PhysicalPlan {
    SeqScan {
        table_id: TableId,
        schema: Vec<String>,
        estimate: CostEstimate,
    },
    IndexScan {
        table_id: TableId,
        index_name: String,
        predicate: IndexPredicate,
        schema: Vec<String>,
        estimate: CostEstimate,
    },
    Filter {
        input: Box<PhysicalPlan>,
        predicate: ResolvedExpr,
        estimate: CostEstimate,
    },
    NestedLoopJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        kind: JoinKind,
        condition: ResolvedExpr,
        schema: Vec<String>,
        estimate: CostEstimate,
    },
    HashJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        kind: JoinKind,
        condition: ResolvedExpr,
        schema: Vec<String>,
        estimate: CostEstimate,
    },
    SortMergeJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        kind: JoinKind,
        condition: ResolvedExpr,
        schema: Vec<String>,
        estimate: CostEstimate,
    },
    GroupBy {
        input: Box<PhysicalPlan>,
        keys: Vec<ColumnId>,
        schema: Vec<String>,
    },
    Project {
        input: Box<PhysicalPlan>,
        items: Vec<ResolvedItem>,
        estimate: CostEstimate,
    },
    Sort {
        input: Box<PhysicalPlan>,
        order_by: Vec<ResolvedOrderByExpr>,
        estimate: CostEstimate,
    },
    Limit {
        input: Box<PhysicalPlan>,
        limit: Option<u64>,
        offset: Option<u64>,
        estimate: CostEstimate,
    },
    Insert {
        table_id: TableId,
        columns: Option<Vec<ColumnId>>,
        rows: Vec<Vec<ResolvedExpr>>,
    },
    Update {
        table_id: TableId,
        assignments: Vec<(ColumnId, ResolvedExpr)>,
        predicate: Option<ResolvedExpr>,
    },
    Delete {
        table_id: TableId,
        predicate: Option<ResolvedExpr>,
    },
}

impl PhysicalPlan {
    /// The estimate attached to this node, or its input's if it carries none
    /// of its own (e.g. `GroupBy`, DML statements).
    pub fn estimate(&self) -> Option<CostEstimate> {
        match self {
            PhysicalPlan::SeqScan { estimate, .. }
            | PhysicalPlan::IndexScan { estimate, .. }
            | PhysicalPlan::Filter { estimate, .. }
            | PhysicalPlan::NestedLoopJoin { estimate, .. }
            | PhysicalPlan::HashJoin { estimate, .. }
            | PhysicalPlan::SortMergeJoin { estimate, .. }
            | PhysicalPlan::Project { estimate, .. }
            | PhysicalPlan::Sort { estimate, .. }
            | PhysicalPlan::Limit { estimate, .. } => Some(*estimate),
            PhysicalPlan::GroupBy { input, .. } => input.estimate(),
            PhysicalPlan::Insert { .. }
            | PhysicalPlan::Update { .. }
            | PhysicalPlan::Delete { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedOrderByExpr {
    pub column_id: ColumnId,
    pub direction: SortDirection,
}

/// Index predicate for index scans.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexPredicate {
    Eq { col: ColumnId, value: ResolvedExpr },
    CompositeEq {
        columns: Vec<ColumnId>,
        values: Vec<ResolvedExpr>,
    },
    Range {
        col: ColumnId,
        low: ResolvedExpr,
        high: ResolvedExpr,
    },
}

/// Resolved expression with column references bound to ordinals.
#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedExpr {
    Literal(Value),
    Column(ColumnId),
    Unary {
        op: UnaryOp,
        expr: Box<ResolvedExpr>,
    },
    Binary {
        left: Box<ResolvedExpr>,
        op: BinaryOp,
        right: Box<ResolvedExpr>,
    },
}

/// Planning context - holds catalog for schema lookups.
pub struct PlanningContext<'a> {
    pub catalog: &'a Catalog,
}

impl<'a> PlanningContext<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    pub fn table(&self, name: &str) -> DbResult<&TableMeta> {
        self.catalog
            .table(name)
            .map_err(|e| DbError::Planner(format!("{e}")))
    }
}

/// Main planner entry point.
pub struct Planner;

impl Planner {
    /// Convert a parser statement into an optimized physical plan.
    pub fn plan(stmt: Statement, ctx: &mut PlanningContext) -> DbResult<PhysicalPlan> {
        let logical = Self::lower_to_logical(stmt)?;
        let optimized = Self::optimize(logical);
        Self::bind(optimized, ctx)
    }

    fn lower_to_logical(stmt: Statement) -> DbResult<LogicalPlan> {
        match stmt {
            Statement::CreateTable { .. }
            | Statement::DropTable { .. }
            | Statement::CreateIndex { .. }
            | Statement::DropIndex { .. } => {
                Err(DbError::Planner("DDL handled by the executor, not the planner".into()))
            }
            Statement::Explain { statement, .. } => Self::lower_to_logical(*statement),
            Statement::Insert {
                table,
                columns,
                rows,
            } => Ok(LogicalPlan::Insert {
                table,
                columns,
                rows,
            }),
            Statement::Update {
                table,
                assignments,
                selection,
            } => Ok(LogicalPlan::Update {
                table,
                assignments,
                predicate: selection,
            }),
            Statement::Delete { table, selection } => Ok(LogicalPlan::Delete {
                table,
                predicate: selection,
            }),
            Statement::Select(select) => Self::lower_select(select),
        }
    }

    fn lower_select(select: SelectStatement) -> DbResult<LogicalPlan> {
        let SelectStatement {
            items,
            from,
            from_alias,
            join,
            selection,
            group_by,
            order_by,
            limit,
            offset,
        } = select;

        let left_name = from_alias.clone().unwrap_or_else(|| from.clone());
        let mut plan = LogicalPlan::TableScan { table: from };

        if let Some(join_clause) = join {
            let right_name = join_clause
                .alias
                .clone()
                .unwrap_or_else(|| join_clause.table.clone());
            let right_scan = LogicalPlan::TableScan {
                table: join_clause.table,
            };
            plan = LogicalPlan::Join {
                left: Box::new(plan),
                right: Box::new(right_scan),
                kind: join_clause.kind,
                condition: join_clause.on,
                left_name,
                right_name,
            };
        }

        let with_filter = if let Some(pred) = selection {
            LogicalPlan::Filter {
                input: Box::new(plan),
                predicate: pred,
            }
        } else {
            plan
        };

        let has_aggregates = items
            .iter()
            .any(|i| matches!(i, SelectItem::Aggregate { .. }));

        let with_projection = if has_aggregates || !group_by.is_empty() {
            LogicalPlan::GroupBy {
                input: Box::new(with_filter),
                keys: group_by,
                items,
            }
        } else {
            LogicalPlan::Project {
                input: Box::new(with_filter),
                items,
            }
        };

        let with_sort = if !order_by.is_empty() {
            let order_exprs = order_by
                .into_iter()
                .map(|o| OrderByExpr {
                    column: o.column,
                    direction: o.direction,
                })
                .collect();
            LogicalPlan::Sort {
                input: Box::new(with_projection),
                order_by: order_exprs,
            }
        } else {
            with_projection
        };

        let limit = limit.map(|e| Self::eval_const_u64(&e)).transpose()?;
        let offset = offset.map(|e| Self::eval_const_u64(&e)).transpose()?;

        let with_limit = if limit.is_some() || offset.is_some() {
            LogicalPlan::Limit {
                input: Box::new(with_sort),
                limit,
                offset,
            }
        } else {
            with_sort
        };

        Ok(with_limit)
    }

    /// `LIMIT`/`OFFSET` accept only a non-negative integer literal.
    fn eval_const_u64(e: &Expr) -> DbResult<u64> {
        match e {
            Expr::Literal(Value::Int(n)) if *n >= 0 => Ok(*n as u64),
            other => Err(DbError::Planner(format!(
                "LIMIT/OFFSET must be a non-negative integer literal, got {other:?}"
            ))),
        }
    }

    /// Push filters toward their producing scan, then drop operators whose
    /// presence has no effect (a `Limit`/`Sort` with no rows worth of work).
    fn optimize(plan: LogicalPlan) -> LogicalPlan {
        let pushed = Self::pushdown(plan);
        Self::eliminate_dead_operators(pushed)
    }

    fn pushdown(plan: LogicalPlan) -> LogicalPlan {
        use LogicalPlan::*;
        match plan {
            Filter { input, predicate } => match *input {
                Join {
                    left,
                    right,
                    kind,
                    condition,
                    left_name,
                    right_name,
                } => Filter {
                    input: Box::new(Join {
                        left: Box::new(Self::pushdown(*left)),
                        right: Box::new(Self::pushdown(*right)),
                        kind,
                        condition,
                        left_name,
                        right_name,
                    }),
                    predicate,
                },
                other => Filter {
                    input: Box::new(Self::pushdown(other)),
                    predicate,
                },
            },
            GroupBy { input, keys, items } => GroupBy {
                input: Box::new(Self::pushdown(*input)),
                keys,
                items,
            },
            Project { input, items } => Project {
                input: Box::new(Self::pushdown(*input)),
                items,
            },
            Sort { input, order_by } => Sort {
                input: Box::new(Self::pushdown(*input)),
                order_by,
            },
            Limit {
                input,
                limit,
                offset,
            } => Limit {
                input: Box::new(Self::pushdown(*input)),
                limit,
                offset,
            },
            Join {
                left,
                right,
                kind,
                condition,
                left_name,
                right_name,
            } => Join {
                left: Box::new(Self::pushdown(*left)),
                right: Box::new(Self::pushdown(*right)),
                kind,
                condition,
                left_name,
                right_name,
            },
            Insert { .. } | Update { .. } | Delete { .. } | TableScan { .. } => plan,
        }
    }

    /// Drop a `Limit` carrying neither a limit nor an offset, and a `Sort`
    /// with no keys — both are no-ops a careless rewrite can introduce.
    fn eliminate_dead_operators(plan: LogicalPlan) -> LogicalPlan {
        use LogicalPlan::*;
        match plan {
            Limit {
                input,
                limit: None,
                offset: None,
            } => Self::eliminate_dead_operators(*input),
            Limit {
                input,
                limit,
                offset,
            } => Limit {
                input: Box::new(Self::eliminate_dead_operators(*input)),
                limit,
                offset,
            },
            Sort { input, order_by } if order_by.is_empty() => {
                Self::eliminate_dead_operators(*input)
            }
            Sort { input, order_by } => Sort {
                input: Box::new(Self::eliminate_dead_operators(*input)),
                order_by,
            },
            Filter { input, predicate } => Filter {
                input: Box::new(Self::eliminate_dead_operators(*input)),
                predicate,
            },
            Project { input, items } => Project {
                input: Box::new(Self::eliminate_dead_operators(*input)),
                items,
            },
            GroupBy { input, keys, items } => GroupBy {
                input: Box::new(Self::eliminate_dead_operators(*input)),
                keys,
                items,
            },
            Join {
                left,
                right,
                kind,
                condition,
                left_name,
                right_name,
            } => Join {
                left: Box::new(Self::eliminate_dead_operators(*left)),
                right: Box::new(Self::eliminate_dead_operators(*right)),
                kind,
                condition,
                left_name,
                right_name,
            },
            other => other,
        }
    }

    fn bind(plan: LogicalPlan, ctx: &mut PlanningContext) -> DbResult<PhysicalPlan> {
        match plan {
            LogicalPlan::TableScan { table } => {
                let t = ctx.table(&table)?;
                let rows = Self::table_row_estimate(t);
                let schema = t.schema.columns.iter().map(|c| c.name.clone()).collect();
                Ok(PhysicalPlan::SeqScan {
                    table_id: t.id,
                    schema,
                    estimate: CostEstimate::new(rows * 0.1, rows),
                })
            }
            LogicalPlan::Filter { input, predicate } => Self::bind_filter(*input, predicate, ctx),
            LogicalPlan::Join {
                left,
                right,
                kind,
                condition,
                left_name,
                right_name,
            } => Self::bind_join(*left, *right, kind, condition, left_name, right_name, ctx),
            LogicalPlan::GroupBy { input, keys, items } => {
                Self::bind_group_by(*input, keys, items, ctx)
            }
            LogicalPlan::Project { input, items } => Self::bind_project(*input, items, ctx),
            LogicalPlan::Sort { input, order_by } => Self::bind_sort(*input, order_by, ctx),
            LogicalPlan::Limit {
                input,
                limit,
                offset,
            } => {
                let input_physical = Self::bind(*input, ctx)?;
                let rows = input_physical.estimate().map(|e| e.rows).unwrap_or(0.0);
                Ok(PhysicalPlan::Limit {
                    input: Box::new(input_physical),
                    limit,
                    offset,
                    estimate: CostEstimate::new(1.0, rows),
                })
            }
            LogicalPlan::Insert {
                table,
                columns,
                rows,
            } => {
                let t = ctx.table(&table)?;
                let column_ids = columns
                    .map(|names| {
                        names
                            .into_iter()
                            .map(|name| {
                                t.schema.column_index(&name).ok_or_else(|| {
                                    DbError::Planner(format!("unknown column '{name}'"))
                                })
                            })
                            .collect::<DbResult<Vec<_>>>()
                    })
                    .transpose()?;
                let resolved_rows = rows
                    .into_iter()
                    .map(|row| {
                        row.into_iter()
                            .map(Self::bind_expr_seq)
                            .collect::<DbResult<Vec<_>>>()
                    })
                    .collect::<DbResult<Vec<_>>>()?;
                Ok(PhysicalPlan::Insert {
                    table_id: t.id,
                    columns: column_ids,
                    rows: resolved_rows,
                })
            }
            LogicalPlan::Update {
                table,
                assignments,
                predicate,
            } => {
                let t = ctx.table(&table)?;
                let schema_names: Vec<String> =
                    t.schema.columns.iter().map(|c| c.name.clone()).collect();
                let assigns = assignments
                    .into_iter()
                    .map(|(name, e)| {
                        let idx = t.schema.column_index(&name).ok_or_else(|| {
                            DbError::Planner(format!("unknown column '{name}'"))
                        })?;
                        let re = Self::bind_expr_with_schema(&schema_names, e)?;
                        Ok((idx, re))
                    })
                    .collect::<DbResult<Vec<_>>>()?;
                let pred = predicate
                    .map(|p| Self::bind_expr_with_schema(&schema_names, p))
                    .transpose()?;
                Ok(PhysicalPlan::Update {
                    table_id: t.id,
                    assignments: assigns,
                    predicate: pred,
                })
            }
            LogicalPlan::Delete { table, predicate } => {
                let t = ctx.table(&table)?;
                let schema_names: Vec<String> =
                    t.schema.columns.iter().map(|c| c.name.clone()).collect();
                let pred = predicate
                    .map(|p| Self::bind_expr_with_schema(&schema_names, p))
                    .transpose()?;
                Ok(PhysicalPlan::Delete {
                    table_id: t.id,
                    predicate: pred,
                })
            }
        }
    }

    fn table_row_estimate(t: &TableMeta) -> f64 {
        // No cardinality statistics are collected; a flat estimate keeps the
        // cost model well-defined without inventing a histogram layer. Kept
        // below the nested-loop join threshold so the common small-table
        // join picks a nested loop rather than always falling through to
        // sort-merge.
        let _ = t;
        100.0
    }

    fn bind_filter(
        input: LogicalPlan,
        predicate: Expr,
        ctx: &mut PlanningContext,
    ) -> DbResult<PhysicalPlan> {
        let input_physical = Self::bind(input, ctx)?;
        let schema = Self::output_schema(&input_physical);
        let resolved = Self::bind_expr_with_schema(&schema, predicate)?;
        let input_rows = input_physical.estimate().map(|e| e.rows).unwrap_or(0.0);
        let selectivity = Self::selectivity(&resolved);

        if let PhysicalPlan::SeqScan {
            table_id, schema, ..
        } = &input_physical
            && let Some((index_name, idx_pred)) = Self::find_best_index(ctx, table_id, &resolved)
        {
            let idx_scan = PhysicalPlan::IndexScan {
                table_id: *table_id,
                index_name,
                predicate: idx_pred,
                schema: schema.clone(),
                estimate: CostEstimate::new(1.0, input_rows * selectivity),
            };
            return Ok(PhysicalPlan::Filter {
                input: Box::new(idx_scan),
                predicate: resolved,
                estimate: CostEstimate::new(1.0, input_rows * selectivity),
            });
        }

        Ok(PhysicalPlan::Filter {
            input: Box::new(input_physical),
            predicate: resolved,
            estimate: CostEstimate::new(10.0, input_rows * selectivity),
        })
    }

    /// Equality predicates are the most selective, range predicates less so,
    /// and anything else falls back to a conservative heuristic.
    fn selectivity(pred: &ResolvedExpr) -> f64 {
        match pred {
            ResolvedExpr::Binary { op, .. } => match op {
                BinaryOp::Eq => 0.1,
                BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 0.3,
                BinaryOp::And => {
                    if let ResolvedExpr::Binary { left, right, .. } = pred {
                        Self::selectivity(left) * Self::selectivity(right)
                    } else {
                        0.5
                    }
                }
                _ => 0.5,
            },
            _ => 0.5,
        }
    }

    fn bind_join(
        left: LogicalPlan,
        right: LogicalPlan,
        kind: JoinKind,
        condition: Expr,
        left_name: String,
        right_name: String,
        ctx: &mut PlanningContext,
    ) -> DbResult<PhysicalPlan> {
        let left_physical = Self::bind(left, ctx)?;
        let right_physical = Self::bind(right, ctx)?;

        let left_schema = Self::output_schema(&left_physical);
        let right_schema = Self::output_schema(&right_physical);

        let combined_schema: Vec<String> = left_schema
            .iter()
            .map(|col| Self::qualify(col, &left_name))
            .chain(right_schema.iter().map(|col| Self::qualify(col, &right_name)))
            .collect();

        let resolved_condition = Self::bind_expr_with_schema(&combined_schema, condition)?;

        let left_rows = left_physical.estimate().map(|e| e.rows).unwrap_or(0.0);
        let right_rows = right_physical.estimate().map(|e| e.rows).unwrap_or(0.0);
        let join_rows = left_rows.max(1.0) * right_rows.max(1.0) * 0.1;

        // Join algorithm choice: small inputs on both sides favor a nested
        // loop; a heavily lopsided join favors building a hash table on the
        // smaller side; otherwise a sort-merge join.
        if left_rows < 1000.0 && right_rows < 1000.0 {
            return Ok(PhysicalPlan::NestedLoopJoin {
                left: Box::new(left_physical),
                right: Box::new(right_physical),
                kind,
                condition: resolved_condition,
                schema: combined_schema,
                estimate: CostEstimate::new(100.0, join_rows),
            });
        }

        if left_rows > right_rows * 10.0 || right_rows > left_rows * 10.0 {
            return Ok(PhysicalPlan::HashJoin {
                left: Box::new(left_physical),
                right: Box::new(right_physical),
                kind,
                condition: resolved_condition,
                schema: combined_schema,
                estimate: CostEstimate::new(50.0, join_rows),
            });
        }

        Ok(PhysicalPlan::SortMergeJoin {
            left: Box::new(left_physical),
            right: Box::new(right_physical),
            kind,
            condition: resolved_condition,
            schema: combined_schema,
            estimate: CostEstimate::new(75.0, join_rows),
        })
    }

    fn qualify(col: &str, name: &str) -> String {
        if col.contains('.') {
            col.to_string()
        } else {
            format!("{name}.{col}")
        }
    }

    fn bind_group_by(
        input: LogicalPlan,
        keys: Vec<Expr>,
        items: Vec<SelectItem>,
        ctx: &mut PlanningContext,
    ) -> DbResult<PhysicalPlan> {
        let input_physical = Self::bind(input, ctx)?;
        let schema = Self::output_schema(&input_physical);

        let key_ids = keys
            .into_iter()
            .map(|k| Self::bind_expr_with_schema(&schema, k))
            .map(|r| {
                r.and_then(|resolved| match resolved {
                    ResolvedExpr::Column(id) => Ok(id),
                    other => Err(DbError::Planner(format!(
                        "GROUP BY keys must be plain columns, got {other:?}"
                    ))),
                })
            })
            .collect::<DbResult<Vec<_>>>()?;

        let group_by = PhysicalPlan::GroupBy {
            input: Box::new(input_physical),
            keys: key_ids,
            schema: schema.clone(),
        };

        let resolved_items = Self::resolve_items(&schema, items)?;
        let rows = group_by.estimate().map(|e| e.rows).unwrap_or(0.0);
        let cost = 0.1 * resolved_items_len(&resolved_items);
        Ok(PhysicalPlan::Project {
            input: Box::new(group_by),
            items: resolved_items,
            estimate: CostEstimate::new(cost, rows),
        })
    }

    fn bind_project(
        input: LogicalPlan,
        items: Vec<SelectItem>,
        ctx: &mut PlanningContext,
    ) -> DbResult<PhysicalPlan> {
        let input_physical = Self::bind(input, ctx)?;
        let schema = Self::output_schema(&input_physical);
        let resolved_items = Self::resolve_items(&schema, items)?;
        let rows = input_physical.estimate().map(|e| e.rows).unwrap_or(0.0);
        let cost = 0.1 * resolved_items_len(&resolved_items);
        Ok(PhysicalPlan::Project {
            input: Box::new(input_physical),
            items: resolved_items,
            estimate: CostEstimate::new(cost, rows),
        })
    }

    fn resolve_items(schema: &[String], items: Vec<SelectItem>) -> DbResult<Vec<ResolvedItem>> {
        let mut out = Vec::new();
        for item in items {
            match item {
                SelectItem::Wildcard => {
                    for (i, name) in schema.iter().enumerate() {
                        out.push(ResolvedItem::Column {
                            col: i as ColumnId,
                            label: name.clone(),
                        });
                    }
                }
                SelectItem::Column(name) => {
                    let idx = Self::find_column_in_schema(schema, None, &name)?;
                    out.push(ResolvedItem::Column {
                        col: idx as ColumnId,
                        label: name,
                    });
                }
                SelectItem::Expr(e) => {
                    let label = format!("{e:?}");
                    let resolved = Self::bind_expr_with_schema(schema, e)?;
                    out.push(ResolvedItem::Expr {
                        expr: resolved,
                        label,
                    });
                }
                SelectItem::Aggregate { func, arg } => {
                    let arg_col = match arg {
                        AggArg::Star => None,
                        AggArg::Column(name) => {
                            Some(Self::find_column_in_schema(schema, None, &name)? as ColumnId)
                        }
                    };
                    let label = format!("{func:?}").to_uppercase();
                    out.push(ResolvedItem::Aggregate {
                        func,
                        arg: arg_col,
                        label,
                    });
                }
            }
        }
        Ok(out)
    }

    fn bind_sort(
        input: LogicalPlan,
        order_by: Vec<OrderByExpr>,
        ctx: &mut PlanningContext,
    ) -> DbResult<PhysicalPlan> {
        let input_physical = Self::bind(input, ctx)?;
        let schema = Self::output_schema(&input_physical);

        let resolved_order_by = order_by
            .into_iter()
            .map(|order_expr| {
                let col_id =
                    Self::find_column_in_schema(&schema, None, &order_expr.column)? as ColumnId;
                Ok(ResolvedOrderByExpr {
                    column_id: col_id,
                    direction: order_expr.direction,
                })
            })
            .collect::<DbResult<Vec<_>>>()?;

        let rows = input_physical.estimate().map(|e| e.rows).unwrap_or(0.0);
        Ok(PhysicalPlan::Sort {
            input: Box::new(input_physical),
            order_by: resolved_order_by,
            estimate: CostEstimate::new(10.0, rows),
        })
    }

    fn output_schema(plan: &PhysicalPlan) -> Vec<String> {
        match plan {
            PhysicalPlan::SeqScan { schema, .. }
            | PhysicalPlan::IndexScan { schema, .. }
            | PhysicalPlan::NestedLoopJoin { schema, .. }
            | PhysicalPlan::HashJoin { schema, .. }
            | PhysicalPlan::SortMergeJoin { schema, .. }
            | PhysicalPlan::GroupBy { schema, .. } => schema.clone(),
            PhysicalPlan::Filter { input, .. }
            | PhysicalPlan::Sort { input, .. }
            | PhysicalPlan::Limit { input, .. } => Self::output_schema(input),
            PhysicalPlan::Project { items, .. } => {
                items.iter().map(Self::item_label).collect()
            }
            PhysicalPlan::Insert { .. }
            | PhysicalPlan::Update { .. }
            | PhysicalPlan::Delete { .. } => vec![],
        }
    }

    fn item_label(item: &ResolvedItem) -> String {
        match item {
            ResolvedItem::Column { label, .. }
            | ResolvedItem::Expr { label, .. }
            | ResolvedItem::Aggregate { label, .. } => label.clone(),
        }
    }

    fn bind_expr_seq(e: Expr) -> DbResult<ResolvedExpr> {
        Self::bind_expr_with_schema(&[], e)
    }

    fn bind_expr_with_schema(schema: &[String], e: Expr) -> DbResult<ResolvedExpr> {
        match e {
            Expr::Literal(v) => Ok(ResolvedExpr::Literal(v)),
            Expr::Column { table, name } => {
                let idx = Self::find_column_in_schema(schema, table.as_deref(), &name)?;
                Ok(ResolvedExpr::Column(idx as ColumnId))
            }
            Expr::Unary { op, expr } => Ok(ResolvedExpr::Unary {
                op,
                expr: Box::new(Self::bind_expr_with_schema(schema, *expr)?),
            }),
            Expr::Binary { left, op, right } => Ok(ResolvedExpr::Binary {
                left: Box::new(Self::bind_expr_with_schema(schema, *left)?),
                op,
                right: Box::new(Self::bind_expr_with_schema(schema, *right)?),
            }),
        }
    }

    fn find_column_in_schema(
        schema: &[String],
        table: Option<&str>,
        name: &str,
    ) -> DbResult<usize> {
        if let Some(qualifier) = table {
            let full_name = format!("{qualifier}.{name}");
            schema
                .iter()
                .position(|c| c.eq_ignore_ascii_case(&full_name))
                .ok_or_else(|| DbError::Planner(format!("unknown column '{qualifier}.{name}'")))
        } else {
            if let Some(idx) = schema.iter().position(|c| c.eq_ignore_ascii_case(name)) {
                return Ok(idx);
            }
            let suffix = format!(".{}", name.to_lowercase());
            let matches: Vec<usize> = schema
                .iter()
                .enumerate()
                .filter(|(_, c)| c.to_lowercase().ends_with(&suffix))
                .map(|(i, _)| i)
                .collect();
            match matches.len() {
                0 => Err(DbError::Planner(format!("unknown column '{name}'"))),
                1 => Ok(matches[0]),
                _ => Err(DbError::Planner(format!(
                    "ambiguous column '{name}' (exists in multiple tables)"
                ))),
            }
        }
    }

    fn try_extract_index_predicate(
        pred: &ResolvedExpr,
    ) -> Option<(ColumnId, IndexPredicate)> {
        if let ResolvedExpr::Binary { left, op, right } = pred
            && let (ResolvedExpr::Column(col), ResolvedExpr::Literal(val)) = (&**left, &**right)
        {
            return Some(match op {
                BinaryOp::Eq => (
                    *col,
                    IndexPredicate::Eq {
                        col: *col,
                        value: ResolvedExpr::Literal(val.clone()),
                    },
                ),
                BinaryOp::Lt | BinaryOp::Le => (
                    *col,
                    IndexPredicate::Range {
                        col: *col,
                        low: ResolvedExpr::Literal(Value::Int(i64::MIN)),
                        high: ResolvedExpr::Literal(val.clone()),
                    },
                ),
                BinaryOp::Gt | BinaryOp::Ge => (
                    *col,
                    IndexPredicate::Range {
                        col: *col,
                        low: ResolvedExpr::Literal(val.clone()),
                        high: ResolvedExpr::Literal(Value::Int(i64::MAX)),
                    },
                ),
                _ => return None,
            });
        }
        None
    }

    fn extract_equality_predicates(pred: &ResolvedExpr) -> Vec<(ColumnId, ResolvedExpr)> {
        let mut result = Vec::new();
        Self::collect_equality_predicates(pred, &mut result);
        result
    }

    fn collect_equality_predicates(pred: &ResolvedExpr, out: &mut Vec<(ColumnId, ResolvedExpr)>) {
        match pred {
            ResolvedExpr::Binary {
                left,
                op: BinaryOp::And,
                right,
            } => {
                Self::collect_equality_predicates(left, out);
                Self::collect_equality_predicates(right, out);
            }
            ResolvedExpr::Binary {
                left,
                op: BinaryOp::Eq,
                right,
            } => {
                if let (ResolvedExpr::Column(col), ResolvedExpr::Literal(_)) = (&**left, &**right) {
                    out.push((*col, (**right).clone()));
                } else if let (ResolvedExpr::Literal(_), ResolvedExpr::Column(col)) =
                    (&**left, &**right)
                {
                    out.push((*col, (**left).clone()));
                }
            }
            _ => {}
        }
    }

    fn is_pure_equality_predicate(pred: &ResolvedExpr) -> bool {
        match pred {
            ResolvedExpr::Binary {
                op: BinaryOp::Eq, ..
            } => true,
            ResolvedExpr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => Self::is_pure_equality_predicate(left) && Self::is_pure_equality_predicate(right),
            _ => false,
        }
    }

    /// Find the best index for a predicate, supporting composite keys. Every
    /// index is B-tree backed, so both equality and range predicates are
    /// eligible; ranking is purely by prefix column coverage.
    fn find_best_index(
        ctx: &PlanningContext,
        table_id: &TableId,
        pred: &ResolvedExpr,
    ) -> Option<(String, IndexPredicate)> {
        let table_meta = ctx.catalog.table_by_id(*table_id).ok()?;
        let indexes = table_meta.indexes();
        if indexes.is_empty() {
            return None;
        }

        let eq_preds = Self::extract_equality_predicates(pred);

        if eq_preds.is_empty() {
            if let Some((col, range_pred)) = Self::try_extract_index_predicate(pred) {
                for idx in indexes {
                    if idx.columns.len() == 1 && idx.columns[0] == col {
                        return Some((idx.name.clone(), range_pred));
                    }
                }
            }
            return None;
        }

        let pred_map: std::collections::HashMap<ColumnId, ResolvedExpr> =
            eq_preds.into_iter().collect();

        let mut best_match: Option<(&catalog::IndexMeta, usize)> = None;
        for idx in indexes {
            let mut matched_count = 0;
            for &col in &idx.columns {
                if pred_map.contains_key(&col) {
                    matched_count += 1;
                } else {
                    break;
                }
            }
            if matched_count > 0 {
                let is_better = match &best_match {
                    None => true,
                    Some((_, best_count)) => matched_count > *best_count,
                };
                if is_better {
                    best_match = Some((idx, matched_count));
                }
            }
        }

        let (best_idx, matched_count) = best_match?;
        let columns: Vec<ColumnId> = best_idx.columns[..matched_count].to_vec();
        let values: Vec<ResolvedExpr> = columns
            .iter()
            .map(|col| pred_map.get(col).cloned().unwrap())
            .collect();

        let predicate = if matched_count == 1 {
            IndexPredicate::Eq {
                col: columns[0],
                value: values.into_iter().next().unwrap(),
            }
        } else {
            IndexPredicate::CompositeEq { columns, values }
        };

        Some((best_idx.name.clone(), predicate))
    }
}

fn resolved_items_len(items: &[ResolvedItem]) -> f64 {
    items.len() as f64
}

/// Pretty-print a physical plan for debugging / `EXPLAIN`.
pub fn explain_physical(p: &PhysicalPlan) -> String {
    match p {
        PhysicalPlan::SeqScan {
            table_id, estimate, ..
        } => format!(
            "SeqScan table_id={} cost={:.2} rows={:.0}",
            table_id.0, estimate.cost, estimate.rows
        ),
        PhysicalPlan::IndexScan {
            table_id,
            index_name,
            predicate,
            estimate,
            ..
        } => format!(
            "IndexScan table_id={} index={} pred={predicate:?} cost={:.2} rows={:.0}",
            table_id.0, index_name, estimate.cost, estimate.rows
        ),
        PhysicalPlan::Filter {
            input,
            predicate,
            estimate,
        } => format!(
            "Filter [{predicate:?}] cost={:.2} rows={:.0}\n  {}",
            estimate.cost,
            estimate.rows,
            indent(&explain_physical(input))
        ),
        PhysicalPlan::NestedLoopJoin {
            left,
            right,
            condition,
            schema,
            estimate,
            ..
        } => format!(
            "NestedLoopJoin on={condition:?} schema={schema:?} cost={:.2} rows={:.0}\n  left: {}\n  right: {}",
            estimate.cost,
            estimate.rows,
            indent(&explain_physical(left)),
            indent(&explain_physical(right))
        ),
        PhysicalPlan::HashJoin {
            left,
            right,
            condition,
            schema,
            estimate,
            ..
        } => format!(
            "HashJoin on={condition:?} schema={schema:?} cost={:.2} rows={:.0}\n  left: {}\n  right: {}",
            estimate.cost,
            estimate.rows,
            indent(&explain_physical(left)),
            indent(&explain_physical(right))
        ),
        PhysicalPlan::SortMergeJoin {
            left,
            right,
            condition,
            schema,
            estimate,
            ..
        } => format!(
            "SortMergeJoin on={condition:?} schema={schema:?} cost={:.2} rows={:.0}\n  left: {}\n  right: {}",
            estimate.cost,
            estimate.rows,
            indent(&explain_physical(left)),
            indent(&explain_physical(right))
        ),
        PhysicalPlan::GroupBy { input, keys, .. } => format!(
            "GroupBy keys={keys:?}\n  {}",
            indent(&explain_physical(input))
        ),
        PhysicalPlan::Project {
            input,
            items,
            estimate,
        } => format!(
            "Project {items:?} cost={:.2} rows={:.0}\n  {}",
            estimate.cost,
            estimate.rows,
            indent(&explain_physical(input))
        ),
        PhysicalPlan::Sort {
            input,
            order_by,
            estimate,
        } => format!(
            "Sort {order_by:?} cost={:.2} rows={:.0}\n  {}",
            estimate.cost,
            estimate.rows,
            indent(&explain_physical(input))
        ),
        PhysicalPlan::Limit {
            input,
            limit,
            offset,
            estimate,
        } => format!(
            "Limit limit={limit:?} offset={offset:?} cost={:.2} rows={:.0}\n  {}",
            estimate.cost,
            estimate.rows,
            indent(&explain_physical(input))
        ),
        PhysicalPlan::Insert { table_id, rows, .. } => {
            format!("Insert table_id={} rows={}", table_id.0, rows.len())
        }
        PhysicalPlan::Update {
            table_id,
            assignments,
            predicate,
        } => format!(
            "Update table_id={} assigns={assignments:?} pred={predicate:?}",
            table_id.0
        ),
        PhysicalPlan::Delete {
            table_id,
            predicate,
        } => format!("Delete table_id={} pred={predicate:?}", table_id.0),
    }
}

fn indent(s: &str) -> String {
    s.lines().map(|l| format!("  {l}")).collect::<Vec<_>>().join("\n")
}

//! Builder: constructs executor trees from physical plans.

use crate::{
    dml::{DeleteExec, InsertExec, UpdateExec},
    filter::FilterExec,
    groupby::GroupByExec,
    join::{HashJoinExec, NestedLoopJoinExec, SortMergeJoinExec},
    limit::LimitExec,
    project::ProjectExec,
    scan::{IndexScanExec, SeqScanExec},
    sort::{SortExec, SortKey},
    Executor,
};
use catalog::Catalog;
use common::{DbError, DbResult, TableId};
use planner::PhysicalPlan;

// Re-exported so the engine facade can route `CREATE TABLE`/`DROP INDEX`/...
// statements straight to DDL execution without importing `crate::ddl` itself.
pub use crate::ddl::execute as run_ddl;

fn table_schema_names(catalog: &Catalog, table_id: TableId) -> DbResult<Vec<String>> {
    Ok(catalog
        .table_by_id(table_id)?
        .schema
        .columns
        .iter()
        .map(|c| c.name.clone())
        .collect())
}

/// Build an executor tree from a physical plan.
///
/// Recursively constructs operator instances, wiring up child inputs. Needs
/// the catalog to resolve a table's column names for operators (`Update`,
/// `Delete`) whose physical plan carries only a `table_id`.
///
/// # Errors
///
/// Returns `DbError::Executor` if the plan contains unsupported operators.
pub fn build_executor(plan: PhysicalPlan, catalog: &Catalog) -> DbResult<Box<dyn Executor>> {
    match plan {
        PhysicalPlan::SeqScan { table_id, schema, .. } => {
            Ok(Box::new(SeqScanExec::new(table_id, schema)))
        }

        PhysicalPlan::IndexScan {
            table_id,
            index_name,
            predicate,
            schema,
            ..
        } => Ok(Box::new(IndexScanExec::new(
            table_id, index_name, predicate, schema,
        ))),

        PhysicalPlan::Filter { input, predicate, .. } => {
            let child = build_executor(*input, catalog)?;
            Ok(Box::new(FilterExec::new(child, predicate)))
        }

        PhysicalPlan::NestedLoopJoin {
            left,
            right,
            kind,
            condition,
            schema,
            ..
        } => {
            let left_exec = build_executor(*left, catalog)?;
            let right_exec = build_executor(*right, catalog)?;
            Ok(Box::new(NestedLoopJoinExec::new(
                left_exec, right_exec, condition, kind, schema,
            )))
        }

        PhysicalPlan::HashJoin {
            left,
            right,
            kind,
            condition,
            schema,
            ..
        } => {
            let left_exec = build_executor(*left, catalog)?;
            let right_exec = build_executor(*right, catalog)?;
            HashJoinExec::new(left_exec, right_exec, &condition, kind, schema)
                .map(|exec| Box::new(exec) as Box<dyn Executor>)
                .ok_or_else(|| {
                    DbError::Executor(
                        "HashJoin requires an equi-join condition the planner should not have chosen otherwise"
                            .into(),
                    )
                })
        }

        PhysicalPlan::SortMergeJoin {
            left,
            right,
            kind,
            condition,
            schema,
            ..
        } => {
            let left_exec = build_executor(*left, catalog)?;
            let right_exec = build_executor(*right, catalog)?;
            match SortMergeJoinExec::new(left_exec, right_exec, &condition, kind, schema) {
                Some(exec) => Ok(Box::new(exec)),
                None => Err(DbError::Executor(
                    "SortMergeJoin requires an equi-join condition the planner should not have chosen otherwise"
                        .into(),
                )),
            }
        }

        PhysicalPlan::Project { input, items, .. } => match *input {
            PhysicalPlan::GroupBy {
                input: group_input,
                keys,
                ..
            } => {
                let child = build_executor(*group_input, catalog)?;
                Ok(Box::new(GroupByExec::new(child, keys, items)))
            }
            other => {
                let child = build_executor(other, catalog)?;
                Ok(Box::new(ProjectExec::new(child, items)))
            }
        },

        PhysicalPlan::GroupBy { .. } => Err(DbError::Executor(
            "GroupBy must appear nested under a Project node".into(),
        )),

        PhysicalPlan::Sort { input, order_by, .. } => {
            let child = build_executor(*input, catalog)?;
            let sort_keys = order_by
                .into_iter()
                .map(|o| SortKey {
                    column_id: o.column_id,
                    direction: o.direction,
                })
                .collect();
            Ok(Box::new(SortExec::new(child, sort_keys)))
        }

        PhysicalPlan::Limit {
            input,
            limit,
            offset,
            ..
        } => {
            let child = build_executor(*input, catalog)?;
            Ok(Box::new(LimitExec::new(child, limit, offset)))
        }

        PhysicalPlan::Insert {
            table_id,
            columns,
            rows,
        } => Ok(Box::new(InsertExec::new(table_id, columns, rows))),

        PhysicalPlan::Update {
            table_id,
            assignments,
            predicate,
        } => {
            let schema = table_schema_names(catalog, table_id)?;
            let mut input: Box<dyn Executor> = Box::new(SeqScanExec::new(table_id, schema));
            if let Some(pred) = predicate {
                input = Box::new(FilterExec::new(input, pred));
            }
            Ok(Box::new(UpdateExec::new(table_id, input, assignments)))
        }

        PhysicalPlan::Delete { table_id, predicate } => {
            let schema = table_schema_names(catalog, table_id)?;
            let mut input: Box<dyn Executor> = Box::new(SeqScanExec::new(table_id, schema));
            if let Some(pred) = predicate {
                input = Box::new(FilterExec::new(input, pred));
            }
            Ok(Box::new(DeleteExec::new(table_id, input)))
        }
    }
}

//! DDL execution: `CREATE TABLE`, `DROP TABLE`, `CREATE INDEX`, `DROP INDEX`.
//!
//! DDL statements never reach the planner; it rejects them outright. The
//! engine dispatches them here directly from the parsed AST instead.

use crate::scan::scan_all_rows;
use crate::ExecutionContext;
use catalog::IndexId;
use common::{DbError, DbResult, Row, TableId};
use parser::Statement;
use types::Value;

fn index_file_name(index_id: IndexId) -> String {
    format!("index_{}.idx", index_id.0)
}

/// Execute a single DDL statement against the catalog and storage layer.
pub fn execute(statement: &Statement, ctx: &mut ExecutionContext) -> DbResult<()> {
    match statement {
        Statement::CreateTable {
            name,
            columns,
            constraints,
        } => create_table(ctx, name, columns, constraints),
        Statement::DropTable { name } => drop_table(ctx, name),
        Statement::CreateIndex {
            name,
            table,
            columns,
        } => create_index(ctx, name, table, columns),
        Statement::DropIndex { name } => drop_index(ctx, name),
        other => Err(DbError::Executor(format!(
            "not a DDL statement: {other:?}"
        ))),
    }
}

fn eval_default(expr: &expr::Expr) -> DbResult<Value> {
    let eval_ctx = expr::EvalContext { schema: &[] };
    eval_ctx.eval(expr, &Row::new(vec![]))
}

fn build_column(def: &parser::ColumnDef) -> DbResult<(catalog::Column, Vec<catalog::TableConstraint>)> {
    let mut column = catalog::Column::new(def.name.clone(), def.ty.clone());
    let mut extra_constraints = Vec::new();

    for constraint in &def.constraints {
        match constraint {
            parser::ColumnConstraint::NotNull => column = column.not_null(),
            parser::ColumnConstraint::AutoIncrement => column = column.auto_increment(),
            parser::ColumnConstraint::Default(expr) => {
                column = column.with_default(eval_default(expr)?);
            }
            parser::ColumnConstraint::PrimaryKey => {
                extra_constraints.push(catalog::TableConstraint::PrimaryKey(vec![def.name.clone()]));
            }
            parser::ColumnConstraint::Unique => {
                extra_constraints.push(catalog::TableConstraint::Unique(vec![def.name.clone()]));
            }
            parser::ColumnConstraint::References { table, column: ref_col } => {
                extra_constraints.push(catalog::TableConstraint::ForeignKey {
                    columns: vec![def.name.clone()],
                    ref_table: table.clone(),
                    ref_columns: vec![ref_col.clone()],
                });
            }
        }
    }

    Ok((column, extra_constraints))
}

fn convert_table_constraint(tc: &parser::TableConstraint) -> catalog::TableConstraint {
    match tc {
        parser::TableConstraint::PrimaryKey(cols) => catalog::TableConstraint::PrimaryKey(cols.clone()),
        parser::TableConstraint::Unique(cols) => catalog::TableConstraint::Unique(cols.clone()),
        parser::TableConstraint::ForeignKey {
            columns,
            ref_table,
            ref_columns,
        } => catalog::TableConstraint::ForeignKey {
            columns: columns.clone(),
            ref_table: ref_table.clone(),
            ref_columns: ref_columns.clone(),
        },
        parser::TableConstraint::Check(expr) => catalog::TableConstraint::Check(expr.clone()),
    }
}

fn create_table(
    ctx: &mut ExecutionContext,
    name: &str,
    columns: &[parser::ColumnDef],
    constraints: &[parser::TableConstraint],
) -> DbResult<()> {
    let mut catalog_columns = Vec::with_capacity(columns.len());
    let mut all_constraints: Vec<catalog::TableConstraint> =
        constraints.iter().map(convert_table_constraint).collect();

    for def in columns {
        let (column, extra) = build_column(def)?;
        catalog_columns.push(column);
        all_constraints.extend(extra);
    }

    let table_id = ctx.catalog.create_table(name, catalog_columns, all_constraints)?;

    // Eagerly materialize the heap file so later opens never race table
    // creation, and create storage for the implicit PK index, if any.
    ctx.heap_table(table_id)?;
    if let Some(pk_index) = ctx.catalog.table_by_id(table_id)?.primary_key_index() {
        ctx.create_index_storage(pk_index.id)?;
    }

    Ok(())
}

fn drop_table(ctx: &mut ExecutionContext, name: &str) -> DbResult<()> {
    let table = ctx.catalog.table(name)?.clone();

    let mut files = storage::FileManager::new(&ctx.data_dir)?;
    let heap_file_name = format!("{}.heap", table.name);
    if files.open_file(&heap_file_name).is_ok() {
        files.delete_file(&heap_file_name)?;
    }
    for index in &table.indexes {
        let file_name = index_file_name(index.id);
        if files.open_file(&file_name).is_ok() {
            files.delete_file(&file_name)?;
        }
    }

    ctx.catalog.drop_table(name)
}

fn create_index(
    ctx: &mut ExecutionContext,
    index_name: &str,
    table_name: &str,
    columns: &[String],
) -> DbResult<()> {
    let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
    let index_id = ctx.catalog.create_index(table_name, index_name, &column_refs)?;
    let mut btree = ctx.create_index_storage(index_id)?;

    let table_id: TableId = ctx.catalog.table(table_name)?.id;
    let ordinals = ctx.catalog.table(table_name)?.index(index_name)?.columns.clone();

    let mut heap = ctx.heap_table(table_id)?;
    let rows = scan_all_rows(&mut heap)?;
    for row in rows {
        let key: Vec<Value> = ordinals
            .iter()
            .map(|&c| row.values.get(c as usize).cloned().unwrap_or(Value::Null))
            .collect();
        let rid = row
            .rid()
            .ok_or_else(|| DbError::Executor("scanned row missing record id during backfill".into()))?;
        btree.insert(key, rid)?;
    }

    Ok(())
}

fn drop_index(ctx: &mut ExecutionContext, index_name: &str) -> DbResult<()> {
    let table_name = ctx
        .catalog
        .tables()
        .find(|t| t.has_index(index_name))
        .map(|t| t.name.clone())
        .ok_or_else(|| DbError::Catalog(format!("index '{index_name}' does not exist")))?;

    let index_id = ctx.catalog.table(&table_name)?.index(index_name)?.id;
    let mut files = storage::FileManager::new(&ctx.data_dir)?;
    let file_name = index_file_name(index_id);
    if files.open_file(&file_name).is_ok() {
        files.delete_file(&file_name)?;
    }

    ctx.catalog.drop_index(&table_name, index_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::helpers::setup_test_context;
    use crate::scan::SeqScanExec;
    use crate::Executor;
    use types::SqlType;

    fn col(name: &str, ty: SqlType, constraints: Vec<parser::ColumnConstraint>) -> parser::ColumnDef {
        parser::ColumnDef {
            name: name.to_string(),
            ty,
            constraints,
        }
    }

    #[test]
    fn create_table_registers_schema_and_heap_file() {
        let (mut ctx, _temp) = setup_test_context();

        let stmt = Statement::CreateTable {
            name: "widgets".into(),
            columns: vec![
                col("id", SqlType::Int, vec![parser::ColumnConstraint::PrimaryKey]),
                col("label", SqlType::Text, vec![]),
            ],
            constraints: vec![],
        };

        execute(&stmt, &mut ctx).unwrap();

        let table = ctx.catalog.table("widgets").unwrap();
        assert_eq!(table.schema.columns.len(), 2);
        assert!(table.primary_key_index().is_some());

        // The implicit PK index's storage must be usable immediately.
        let index_id = table.primary_key_index().unwrap().id;
        let mut btree = ctx.open_index_storage(index_id).unwrap();
        assert!(btree.search(&[Value::Int(1)]).unwrap().is_none());
    }

    #[test]
    fn create_table_evaluates_default_expression() {
        let (mut ctx, _temp) = setup_test_context();

        let stmt = Statement::CreateTable {
            name: "widgets".into(),
            columns: vec![col(
                "status",
                SqlType::Text,
                vec![parser::ColumnConstraint::Default(expr::Expr::Literal(
                    Value::Text("new".into()),
                ))],
            )],
            constraints: vec![],
        };

        execute(&stmt, &mut ctx).unwrap();
        let table = ctx.catalog.table("widgets").unwrap();
        assert_eq!(table.schema.columns[0].default, Some(Value::Text("new".into())));
    }

    #[test]
    fn drop_table_removes_catalog_entry_and_heap_file() {
        let (mut ctx, _temp) = setup_test_context();
        execute(
            &Statement::CreateTable {
                name: "widgets".into(),
                columns: vec![col("id", SqlType::Int, vec![])],
                constraints: vec![],
            },
            &mut ctx,
        )
        .unwrap();

        execute(&Statement::DropTable { name: "widgets".into() }, &mut ctx).unwrap();
        assert!(ctx.catalog.table("widgets").is_err());
    }

    #[test]
    fn create_index_backfills_existing_rows() {
        let (mut ctx, _temp) = setup_test_context();
        let table_id = ctx.catalog.table("users").unwrap().id;

        let rows = vec![
            Row::new(vec![Value::Int(1), Value::Text("alice".into()), Value::Bool(true)]),
            Row::new(vec![Value::Int(2), Value::Text("bob".into()), Value::Bool(false)]),
        ];
        {
            let mut heap = ctx.heap_table(table_id).unwrap();
            for row in rows {
                heap.insert(&row).unwrap();
            }
        }

        execute(
            &Statement::CreateIndex {
                name: "idx_users_name".into(),
                table: "users".into(),
                columns: vec!["name".into()],
            },
            &mut ctx,
        )
        .unwrap();

        let index_id = ctx.catalog.table("users").unwrap().index("idx_users_name").unwrap().id;
        let mut btree = ctx.open_index_storage(index_id).unwrap();
        assert!(btree
            .search(&[Value::Text("alice".into())])
            .unwrap()
            .is_some());
        assert!(btree.search(&[Value::Text("bob".into())]).unwrap().is_some());
    }

    #[test]
    fn drop_index_removes_catalog_entry() {
        let (mut ctx, _temp) = setup_test_context();
        execute(
            &Statement::CreateIndex {
                name: "idx_users_name".into(),
                table: "users".into(),
                columns: vec!["name".into()],
            },
            &mut ctx,
        )
        .unwrap();

        execute(&Statement::DropIndex { name: "idx_users_name".into() }, &mut ctx).unwrap();
        assert!(ctx.catalog.table("users").unwrap().index("idx_users_name").is_err());
    }

    #[test]
    fn non_ddl_statement_is_rejected() {
        let (mut ctx, _temp) = setup_test_context();
        let stmt = Statement::Insert {
            table: "users".into(),
            columns: None,
            rows: vec![],
        };
        let err = execute(&stmt, &mut ctx).unwrap_err();
        assert!(format!("{err}").contains("not a DDL statement"));
    }

    #[test]
    fn drop_index_on_unknown_name_errors() {
        let (mut ctx, _temp) = setup_test_context();
        let stmt = Statement::DropIndex {
            name: "does_not_exist".into(),
        };
        assert!(execute(&stmt, &mut ctx).is_err());
    }

    #[test]
    fn created_table_is_immediately_scannable() {
        let (mut ctx, _temp) = setup_test_context();
        execute(
            &Statement::CreateTable {
                name: "widgets".into(),
                columns: vec![col("id", SqlType::Int, vec![])],
                constraints: vec![],
            },
            &mut ctx,
        )
        .unwrap();

        let table_id = ctx.catalog.table("widgets").unwrap().id;
        let mut scan = SeqScanExec::new(table_id, vec!["id".into()]);
        scan.open(&mut ctx).unwrap();
        assert!(scan.next(&mut ctx).unwrap().is_none());
        scan.close(&mut ctx).unwrap();
    }
}

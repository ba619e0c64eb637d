//! Smoke tests for primary-key enforcement, exercised through the public
//! `execute_dml` entry point rather than against an individual operator.

#[cfg(test)]
mod tests {
    use crate::tests::helpers::{lit_int, lit_text, setup_test_context};
    use crate::*;
    use common::TableId;
    use planner::ResolvedExpr;
    use types::Value;

    #[test]
    fn duplicate_primary_key_insert_is_rejected() {
        let (mut ctx, _temp) = setup_test_context();
        let table_id = TableId(1);

        let insert_alice = PhysicalPlan::Insert {
            table_id,
            columns: None,
            rows: vec![vec![
                lit_int(1),
                lit_text("alice"),
                ResolvedExpr::Literal(Value::Bool(true)),
            ]],
        };
        assert!(execute_dml(insert_alice, &mut ctx).is_ok());

        let insert_bob = PhysicalPlan::Insert {
            table_id,
            columns: None,
            rows: vec![vec![
                lit_int(1),
                lit_text("bob"),
                ResolvedExpr::Literal(Value::Bool(false)),
            ]],
        };
        let result = execute_dml(insert_bob, &mut ctx);
        assert!(result.is_err());
    }

    #[test]
    fn multi_row_insert_reports_total_count() {
        let (mut ctx, _temp) = setup_test_context();
        let table_id = TableId(1);

        let insert = PhysicalPlan::Insert {
            table_id,
            columns: None,
            rows: vec![
                vec![
                    lit_int(1),
                    lit_text("alice"),
                    ResolvedExpr::Literal(Value::Bool(true)),
                ],
                vec![
                    lit_int(2),
                    lit_text("bob"),
                    ResolvedExpr::Literal(Value::Bool(false)),
                ],
            ],
        };

        assert_eq!(execute_dml(insert, &mut ctx).unwrap(), 2);
    }
}

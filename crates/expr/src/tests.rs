use super::*;
use common::Row;
use types::Value::*;

fn schema(cols: &[&str]) -> Vec<String> {
    cols.iter().map(|s| s.to_string()).collect()
}

fn col(name: &str) -> Expr {
    Expr::Column {
        table: None,
        name: name.into(),
    }
}

#[test]
fn eval_literals_and_columns() {
    let row = Row::new(vec![Int(1), Text("Will".into()), Bool(true)]);
    let schema = schema(&["id", "name", "active"]);
    let ctx = EvalContext { schema: &schema };

    assert_eq!(ctx.eval(&Expr::Literal(Int(42)), &row).unwrap(), Int(42));
    assert_eq!(ctx.eval(&col("name"), &row).unwrap(), Text("Will".into()));
}

#[test]
fn eval_qualified_column() {
    let row = Row::new(vec![Int(1), Int(2)]);
    let schema = schema(&["users.id", "orders.user_id"]);
    let ctx = EvalContext { schema: &schema };

    let qualified = Expr::Column {
        table: Some("users".into()),
        name: "id".into(),
    };
    assert_eq!(ctx.eval(&qualified, &row).unwrap(), Int(1));
}

#[test]
fn eval_comparisons() {
    let row = Row::new(vec![Int(10), Int(20)]);
    let schema = schema(&["a", "b"]);
    let ctx = EvalContext { schema: &schema };

    let lt = Expr::Binary {
        left: Box::new(col("a")),
        op: BinaryOp::Lt,
        right: Box::new(col("b")),
    };
    assert_eq!(ctx.eval(&lt, &row).unwrap(), Bool(true));
}

#[test]
fn eval_logical_ops() {
    let row = Row::new(vec![Bool(true), Bool(false)]);
    let schema = schema(&["x", "y"]);
    let ctx = EvalContext { schema: &schema };

    let expr = Expr::Binary {
        left: Box::new(col("x")),
        op: BinaryOp::And,
        right: Box::new(col("y")),
    };
    assert_eq!(ctx.eval(&expr, &row).unwrap(), Bool(false));
}

#[test]
fn not_operator() {
    let row = Row::new(vec![Bool(false)]);
    let schema = schema(&["f"]);
    let ctx = EvalContext { schema: &schema };

    let expr = Expr::Unary {
        op: UnaryOp::Not,
        expr: Box::new(col("f")),
    };
    assert_eq!(ctx.eval(&expr, &row).unwrap(), Bool(true));
}

#[test]
fn mismatched_types_fail() {
    let row = Row::new(vec![Int(1), Text("hi".into())]);
    let schema = schema(&["a", "b"]);
    let ctx = EvalContext { schema: &schema };

    let expr = Expr::Binary {
        left: Box::new(col("a")),
        op: BinaryOp::Eq,
        right: Box::new(col("b")),
    };

    let err = ctx.eval(&expr, &row).unwrap_err();
    assert!(format!("{err:?}").contains("incompatible types"));
}

#[test]
fn integer_arithmetic_stays_integer() {
    let row = Row::new(vec![Int(7), Int(2)]);
    let schema = schema(&["a", "b"]);
    let ctx = EvalContext { schema: &schema };

    let add = Expr::Binary {
        left: Box::new(col("a")),
        op: BinaryOp::Add,
        right: Box::new(col("b")),
    };
    assert_eq!(ctx.eval(&add, &row).unwrap(), Int(9));

    let modulo = Expr::Binary {
        left: Box::new(col("a")),
        op: BinaryOp::Mod,
        right: Box::new(col("b")),
    };
    assert_eq!(ctx.eval(&modulo, &row).unwrap(), Int(1));
}

#[test]
fn mixed_numeric_arithmetic_promotes_to_float() {
    let row = Row::new(vec![Int(5), Float(2.0)]);
    let schema = schema(&["a", "b"]);
    let ctx = EvalContext { schema: &schema };

    let div = Expr::Binary {
        left: Box::new(col("a")),
        op: BinaryOp::Div,
        right: Box::new(col("b")),
    };
    assert_eq!(ctx.eval(&div, &row).unwrap(), Float(2.5));
}

#[test]
fn division_by_zero_is_an_error() {
    let row = Row::new(vec![Int(1), Int(0)]);
    let schema = schema(&["a", "b"]);
    let ctx = EvalContext { schema: &schema };

    let div = Expr::Binary {
        left: Box::new(col("a")),
        op: BinaryOp::Div,
        right: Box::new(col("b")),
    };
    let err = ctx.eval(&div, &row).unwrap_err();
    assert!(format!("{err}").contains("division by zero"));
}

#[test]
fn arithmetic_with_null_propagates_null() {
    let row = Row::new(vec![Int(1), Null]);
    let schema = schema(&["a", "b"]);
    let ctx = EvalContext { schema: &schema };

    let add = Expr::Binary {
        left: Box::new(col("a")),
        op: BinaryOp::Add,
        right: Box::new(col("b")),
    };
    assert!(ctx.eval(&add, &row).unwrap().is_null());
}

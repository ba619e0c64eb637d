//! Integration tests for EXPLAIN and EXPLAIN ANALYZE functionality.

use common::Config;
use engine::Engine;

fn open_engine(dir: &std::path::Path) -> Engine {
    let config = Config::builder()
        .data_dir(dir.to_path_buf())
        .buffer_pool_pages(32)
        .build();
    Engine::open(config).unwrap()
}

fn explain_text(result: &engine::ExecuteResult) -> String {
    match &result.rows.as_ref().unwrap()[0].values[0] {
        types::Value::Text(t) => t.clone(),
        other => panic!("expected a text explain row, got {other:?}"),
    }
}

#[test]
fn explain_analyze_select_query() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut db = open_engine(temp_dir.path());

    db.execute("CREATE TABLE users (id INT PRIMARY KEY, name TEXT, age INT)")
        .unwrap();
    db.execute("INSERT INTO users VALUES (1, 'Alice', 30)").unwrap();
    db.execute("INSERT INTO users VALUES (2, 'Bob', 25)").unwrap();

    let result = db
        .execute("EXPLAIN ANALYZE SELECT * FROM users WHERE age > 20")
        .unwrap();

    assert_eq!(result.schema.as_ref().unwrap(), &vec!["Explain".to_string()]);
    let output_str = explain_text(&result);
    assert!(output_str.contains("EXPLAIN ANALYZE") || output_str.contains("Execution"));
    assert!(output_str.contains("Total rows") || output_str.contains("rows"));
}

#[test]
fn explain_select_query_without_execution() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut db = open_engine(temp_dir.path());

    db.execute("CREATE TABLE users (id INT PRIMARY KEY, name TEXT)")
        .unwrap();

    let result = db.execute("EXPLAIN SELECT * FROM users").unwrap();

    assert_eq!(result.schema.as_ref().unwrap(), &vec!["Explain".to_string()]);
    let output_str = explain_text(&result);
    assert!(output_str.contains("SeqScan") || output_str.contains("Plan"));
    assert!(!output_str.contains("Total rows"));
}

#[test]
fn explain_analyze_insert_query() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut db = open_engine(temp_dir.path());

    db.execute("CREATE TABLE products (id INT PRIMARY KEY, name TEXT)")
        .unwrap();

    let result = db
        .execute("EXPLAIN ANALYZE INSERT INTO products VALUES (1, 'Widget')")
        .unwrap();
    let output_str = explain_text(&result);
    assert!(output_str.contains("EXPLAIN") || output_str.contains("Insert"));

    let result = db.execute("SELECT * FROM products").unwrap();
    assert_eq!(result.row_count, Some(1), "INSERT should have executed");
}

#[test]
fn explain_analyze_with_filter_shows_stats() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut db = open_engine(temp_dir.path());

    db.execute("CREATE TABLE numbers (id INT PRIMARY KEY, value INT)")
        .unwrap();

    for i in 1..=10 {
        db.execute(&format!("INSERT INTO numbers VALUES ({i}, {})", i * 10))
            .unwrap();
    }

    let result = db
        .execute("EXPLAIN ANALYZE SELECT * FROM numbers WHERE value > 50")
        .unwrap();

    let output_str = explain_text(&result);
    assert!(output_str.contains("Total rows") || output_str.contains('5'));
}

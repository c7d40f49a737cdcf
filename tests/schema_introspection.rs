use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::Connection;

use classroom_restore::error::EngineError;
use classroom_restore::schema::{introspect_table, ColumnType};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn open_memory() -> Connection {
    Connection::open_in_memory().expect("open in-memory db")
}

#[test]
fn composite_unique_index_beats_rowid_alias_pk() {
    let conn = open_memory();
    conn.execute_batch(
        "CREATE TABLE attendances(
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            status TEXT,
            UNIQUE(student_id, date)
        )",
    )
    .expect("create attendances");

    let schema = introspect_table(&conn, "attendances", None).expect("introspect");
    assert_eq!(schema.key_columns, vec!["student_id", "date"]);
    assert_eq!(schema.columns.len(), 4);
}

#[test]
fn declared_composite_primary_key_is_used() {
    let conn = open_memory();
    conn.execute_batch(
        "CREATE TABLE attendance_months(
            section_id TEXT NOT NULL,
            month INTEGER NOT NULL,
            day_codes TEXT NOT NULL,
            PRIMARY KEY(section_id, month)
        )",
    )
    .expect("create attendance_months");

    let schema = introspect_table(&conn, "attendance_months", None).expect("introspect");
    assert_eq!(schema.key_columns, vec!["section_id", "month"]);
}

#[test]
fn text_primary_key_is_not_a_rowid_alias() {
    let conn = open_memory();
    conn.execute_batch(
        "CREATE TABLE sections(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
    )
    .expect("create sections");

    let schema = introspect_table(&conn, "sections", None).expect("introspect");
    assert_eq!(schema.key_columns, vec!["id"]);
}

#[test]
fn lone_integer_pk_is_last_resort() {
    let conn = open_memory();
    conn.execute_batch(
        "CREATE TABLE lessons(
            id INTEGER PRIMARY KEY,
            subject TEXT,
            date TEXT
        )",
    )
    .expect("create lessons");

    let schema = introspect_table(&conn, "lessons", None).expect("introspect");
    assert_eq!(schema.key_columns, vec!["id"]);
}

#[test]
fn missing_table_is_table_not_found() {
    let conn = open_memory();
    let err = introspect_table(&conn, "nope", None).expect_err("must fail");
    assert!(matches!(err, EngineError::TableNotFound { table } if table == "nope"));
}

#[test]
fn keyless_table_is_ambiguous() {
    let conn = open_memory();
    conn.execute_batch("CREATE TABLE notes(body TEXT, author TEXT)")
        .expect("create notes");

    let err = introspect_table(&conn, "notes", None).expect_err("must fail");
    assert!(matches!(err, EngineError::AmbiguousKey { table } if table == "notes"));
}

#[test]
fn explicit_key_overrides_discovery() {
    let conn = open_memory();
    conn.execute_batch("CREATE TABLE notes(body TEXT, author TEXT)")
        .expect("create notes");

    let key = vec!["author".to_string(), "body".to_string()];
    let schema = introspect_table(&conn, "notes", Some(&key)).expect("introspect with key");
    assert_eq!(schema.key_columns, key);

    let bad = vec!["author".to_string(), "missing_col".to_string()];
    let err = introspect_table(&conn, "notes", Some(&bad)).expect_err("must fail");
    match err {
        EngineError::SchemaMismatch { missing, .. } => assert_eq!(missing, "missing_col"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn column_types_follow_affinity() {
    let conn = open_memory();
    conn.execute_batch(
        "CREATE TABLE typed(
            a INTEGER PRIMARY KEY,
            b VARCHAR(30),
            c REAL,
            d BLOB,
            e DECIMAL(10,2)
        )",
    )
    .expect("create typed");

    let schema = introspect_table(&conn, "typed", None).expect("introspect");
    let types: Vec<ColumnType> = schema.columns.iter().map(|(_, t)| *t).collect();
    assert_eq!(
        types,
        vec![
            ColumnType::Integer,
            ColumnType::Text,
            ColumnType::Real,
            ColumnType::Blob,
            ColumnType::Numeric,
        ]
    );
}

#[test]
fn introspection_works_on_file_backed_store() {
    let dir = temp_dir("classroom-schema");
    let db_path = dir.join("classroom.db");
    let conn = Connection::open(&db_path).expect("open file db");
    conn.execute_batch(
        "CREATE TABLE students(id TEXT PRIMARY KEY, section_id TEXT, last_name TEXT)",
    )
    .expect("create students");
    drop(conn);

    let conn = Connection::open(&db_path).expect("reopen");
    let schema = introspect_table(&conn, "students", None).expect("introspect");
    assert_eq!(schema.key_columns, vec!["id"]);

    let _ = std::fs::remove_dir_all(dir);
}

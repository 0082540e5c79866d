//! Editor state database reads against a real SQLite file.

use rusqlite::Connection;

use windsurf_bridge::credentials::{HostInspector, SystemInspector, AUTH_STATUS_KEY};

fn write_state_db(path: &std::path::Path, key: &str, value: &str) {
    let conn = Connection::open(path).unwrap();
    conn.execute(
        "CREATE TABLE ItemTable (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB)",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO ItemTable (key, value) VALUES (?1, ?2)",
        [key, value],
    )
    .unwrap();
}

#[test]
fn test_reads_api_key_from_state_db() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.vscdb");
    write_state_db(
        &path,
        AUTH_STATUS_KEY,
        r#"{"loggedIn": true, "apiKey": "ws-key-123", "name": "dev"}"#,
    );

    let key = SystemInspector.read_auth_db(&path);
    assert_eq!(key.as_deref(), Some("ws-key-123"));
}

#[test]
fn test_missing_key_or_row_yields_none() {
    let dir = tempfile::tempdir().unwrap();

    // No apiKey field in the JSON.
    let path = dir.path().join("no-field.vscdb");
    write_state_db(&path, AUTH_STATUS_KEY, r#"{"loggedIn": false}"#);
    assert_eq!(SystemInspector.read_auth_db(&path), None);

    // Different key entirely.
    let path = dir.path().join("no-row.vscdb");
    write_state_db(&path, "unrelated.setting", r#"{"apiKey": "nope"}"#);
    assert_eq!(SystemInspector.read_auth_db(&path), None);

    // File absent.
    assert_eq!(
        SystemInspector.read_auth_db(&dir.path().join("missing.vscdb")),
        None
    );
}

#[test]
fn test_empty_api_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.vscdb");
    write_state_db(&path, AUTH_STATUS_KEY, r#"{"apiKey": ""}"#);
    assert_eq!(SystemInspector.read_auth_db(&path), None);
}

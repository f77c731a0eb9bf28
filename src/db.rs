use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "olmsted.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS datasets(
            dataset_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            clone_count INTEGER NOT NULL,
            temporary INTEGER NOT NULL,
            upload_time TEXT NOT NULL,
            format_type TEXT,
            record TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_datasets_name ON datasets(name)",
        [],
    )?;

    // A clone_id is only unique inside its dataset.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS clones(
            dataset_id TEXT NOT NULL,
            clone_id TEXT NOT NULL,
            ident TEXT NOT NULL,
            sample_id TEXT,
            name TEXT,
            tree_ids TEXT NOT NULL,
            record TEXT NOT NULL,
            PRIMARY KEY(dataset_id, clone_id),
            FOREIGN KEY(dataset_id) REFERENCES datasets(dataset_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_clones_dataset ON clones(dataset_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_clones_ident ON clones(ident)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_clones_sample ON clones(sample_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS trees(
            ident TEXT PRIMARY KEY,
            tree_id TEXT NOT NULL,
            clone_id TEXT,
            dataset_id TEXT NOT NULL,
            record TEXT NOT NULL,
            FOREIGN KEY(dataset_id) REFERENCES datasets(dataset_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_trees_tree_id ON trees(tree_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_trees_clone ON trees(clone_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_trees_dataset ON trees(dataset_id)",
        [],
    )?;

    Ok(())
}

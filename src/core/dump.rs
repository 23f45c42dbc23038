/// Database dump strategies
///
/// The dump engine is selected once from the configured driver. Each engine
/// prefers its native dump tool and, where the original behavior calls for
/// it, falls back to an in-process dump built from catalog introspection
/// through the generic SQL client.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

use crate::core::config::DatabaseConfig;
use crate::core::sql::{self, SqlClient, SqliteClient};

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("Unsupported database driver: {0}")]
    UnsupportedDriver(String),

    #[error("{tool} is not available on PATH")]
    ToolMissing { tool: String },

    #[error("{tool} failed with exit code {code}: {stderr}")]
    ToolFailed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("Missing required {driver} configuration: {key}")]
    MissingConfig { driver: String, key: String },

    #[error("Dump file is empty or was not created")]
    EmptyDump,
}

/// Check whether an executable resolves on PATH
pub fn tool_available(name: &str) -> bool {
    let finder = if cfg!(windows) { "where" } else { "which" };
    Command::new(finder)
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpStrategy {
    Mysql,
    Postgres,
    Sqlite,
}

impl DumpStrategy {
    /// Select the strategy for a configured driver name
    pub fn for_driver(driver: &str) -> Result<Self, DumpError> {
        match driver {
            "mysql" => Ok(Self::Mysql),
            "pgsql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(DumpError::UnsupportedDriver(other.to_string())),
        }
    }

    /// Write a plain-SQL dump of the configured database to `output`
    pub fn dump(&self, config: &DatabaseConfig, output: &Path) -> Result<()> {
        match self {
            Self::Mysql => mysql_dump(config, output),
            Self::Postgres => postgres_dump(config, output),
            Self::Sqlite => sqlite_dump(config, output),
        }
    }
}

fn mysql_dump(config: &DatabaseConfig, output: &Path) -> Result<()> {
    if !tool_available("mysqldump") {
        return Err(DumpError::ToolMissing {
            tool: "mysqldump".to_string(),
        }
        .into());
    }

    let result = Command::new("mysqldump")
        .arg(format!("--host={}", config.host))
        .arg(format!("--port={}", config.port))
        .arg(format!("--user={}", config.username))
        .arg(format!("--password={}", config.password))
        .arg(&config.database)
        .output()
        .context("Failed to run mysqldump")?;

    if !result.status.success() {
        return Err(DumpError::ToolFailed {
            tool: "mysqldump".to_string(),
            code: result.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
        }
        .into());
    }

    fs::write(output, &result.stdout)
        .with_context(|| format!("Failed to write dump to {}", output.display()))
}

fn postgres_dump(config: &DatabaseConfig, output: &Path) -> Result<()> {
    if !tool_available("pg_dump") {
        log::info!("pg_dump not found, using in-process PostgreSQL dump");
        let mut client = sql::connect(config)?;
        let dump = generate_postgres_dump(client.as_mut(), config)?;
        return fs::write(output, dump)
            .with_context(|| format!("Failed to write dump to {}", output.display()));
    }

    for (key, value) in [
        ("host", &config.host),
        ("database", &config.database),
        ("username", &config.username),
    ] {
        if value.is_empty() {
            return Err(DumpError::MissingConfig {
                driver: "pgsql".to_string(),
                key: key.to_string(),
            }
            .into());
        }
    }

    let result = Command::new("pg_dump")
        .env("PGHOST", &config.host)
        .env("PGPORT", config.port.to_string())
        .env("PGUSER", &config.username)
        .env("PGPASSWORD", &config.password)
        .env("PGDATABASE", &config.database)
        .arg("--no-password")
        .arg("--format=plain")
        .arg("--no-owner")
        .arg("--no-privileges")
        .arg(&config.database)
        .output()
        .context("Failed to run pg_dump")?;

    if !result.status.success() {
        return Err(DumpError::ToolFailed {
            tool: "pg_dump".to_string(),
            code: result.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
        }
        .into());
    }

    if result.stdout.is_empty() {
        return Err(DumpError::EmptyDump.into());
    }

    fs::write(output, &result.stdout)
        .with_context(|| format!("Failed to write dump to {}", output.display()))
}

fn sqlite_dump(config: &DatabaseConfig, output: &Path) -> Result<()> {
    if tool_available("sqlite3") {
        let result = Command::new("sqlite3")
            .arg(&config.database)
            .arg(".dump")
            .output()
            .context("Failed to run sqlite3")?;

        if result.status.success() {
            return fs::write(output, &result.stdout)
                .with_context(|| format!("Failed to write dump to {}", output.display()));
        }
        log::warn!(
            "sqlite3 .dump failed ({}), falling back to in-process dump",
            String::from_utf8_lossy(&result.stderr).trim()
        );
    }

    let mut client = SqliteClient::open(&config.database)?;
    let dump = generate_sqlite_dump(&mut client, &config.exclude_tables)?;
    fs::write(output, dump)
        .with_context(|| format!("Failed to write dump to {}", output.display()))
}

/// Quote a value as a SQL string literal
fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn render_insert(table_quote: char, table: &str, columns: &[String], row: &[Option<String>]) -> String {
    let cols: Vec<String> = columns
        .iter()
        .map(|c| format!("{}{}{}", table_quote, c, table_quote))
        .collect();
    let values: Vec<String> = row
        .iter()
        .map(|v| match v {
            Some(v) => sql_quote(v),
            None => "NULL".to_string(),
        })
        .collect();
    format!(
        "INSERT INTO {q}{t}{q} ({cols}) VALUES ({values});",
        q = table_quote,
        t = table,
        cols = cols.join(","),
        values = values.join(",")
    )
}

/// Build a PostgreSQL dump from catalog introspection
pub fn generate_postgres_dump(client: &mut dyn SqlClient, config: &DatabaseConfig) -> Result<String> {
    let mut sql = String::new();
    sql.push_str("-- PostgreSQL dump generated by opsguard (in-process fallback)\n");
    sql.push_str(&format!("-- Date: {}\n", Local::now().format("%Y-%m-%d %H:%M:%S")));
    sql.push_str(&format!("-- Database: {}\n\n", config.database));
    sql.push_str("SET statement_timeout = 0;\n");
    sql.push_str("SET lock_timeout = 0;\n");
    sql.push_str("SET client_encoding = 'UTF8';\n");
    sql.push_str("SET standard_conforming_strings = on;\n");
    sql.push_str("SET check_function_bodies = false;\n");
    sql.push_str("SET client_min_messages = warning;\n\n");

    let tables: Vec<String> = client
        .query_rows("SELECT tablename FROM pg_tables WHERE schemaname = 'public' ORDER BY tablename")?
        .into_iter()
        .filter_map(|r| r.into_iter().next().flatten())
        .collect();

    for table in &tables {
        if config.exclude_tables.contains(table) {
            continue;
        }

        sql.push_str(&format!("-- Table: {}\n", table));
        sql.push_str(&postgres_table_schema(client, table)?);
        sql.push_str("\n\n");

        let columns_result = client.query(&format!(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_name = {} AND table_schema = 'public' ORDER BY ordinal_position",
            sql_quote(table)
        ))?;
        let columns: Vec<String> = columns_result
            .rows
            .into_iter()
            .filter_map(|r| r.into_iter().next().flatten())
            .collect();

        let select_list: Vec<String> = columns
            .iter()
            .map(|c| format!("\"{}\"::text", c))
            .collect();

        match client.query_rows(&format!(
            "SELECT {} FROM \"{}\"",
            select_list.join(", "),
            table
        )) {
            Ok(rows) if !rows.is_empty() => {
                sql.push_str(&format!("-- Data for table: {}\n", table));
                for row in &rows {
                    sql.push_str(&render_insert('"', table, &columns, row));
                    sql.push('\n');
                }
                sql.push('\n');
            }
            Ok(_) => {}
            Err(e) => {
                sql.push_str(&format!("-- Error dumping data for table {}: {}\n\n", table, e));
            }
        }
    }

    match client.query_rows(
        "SELECT sequence_name FROM information_schema.sequences WHERE sequence_schema = 'public'",
    ) {
        Ok(rows) if !rows.is_empty() => {
            sql.push_str("-- Sequences\n");
            for row in rows {
                if let Some(sequence) = row.into_iter().next().flatten() {
                    match client.query_scalar(&format!("SELECT last_value::text FROM \"{}\"", sequence)) {
                        Ok(Some(value)) => {
                            sql.push_str(&format!("SELECT setval('\"{}\"', {}, true);\n", sequence, value));
                        }
                        Ok(None) => {}
                        Err(e) => {
                            sql.push_str(&format!("-- Error reading sequence {}: {}\n", sequence, e));
                        }
                    }
                }
            }
            sql.push('\n');
        }
        Ok(_) => {}
        Err(e) => {
            sql.push_str(&format!("-- Error dumping sequences: {}\n\n", e));
        }
    }

    Ok(sql)
}

fn postgres_table_schema(client: &mut dyn SqlClient, table: &str) -> Result<String> {
    let result = client.query(&format!(
        "SELECT column_name, data_type, character_maximum_length, is_nullable, column_default \
         FROM information_schema.columns \
         WHERE table_name = {} AND table_schema = 'public' ORDER BY ordinal_position",
        sql_quote(table)
    ));

    let result = match result {
        Ok(r) => r,
        Err(e) => return Ok(format!("-- Error getting schema for table {}: {}", table, e)),
    };

    let mut definitions = Vec::new();
    for row in &result.rows {
        let name = row.first().cloned().flatten().unwrap_or_default();
        let data_type = row.get(1).cloned().flatten().unwrap_or_default();
        let max_length = row.get(2).cloned().flatten();
        let nullable = row.get(3).cloned().flatten();
        let default = row.get(4).cloned().flatten();

        let mut def = format!("    \"{}\" {}", name, data_type);
        if let Some(len) = max_length {
            def.push_str(&format!("({})", len));
        }
        if nullable.as_deref() == Some("NO") {
            def.push_str(" NOT NULL");
        }
        if let Some(d) = default {
            def.push_str(&format!(" DEFAULT {}", d));
        }
        definitions.push(def);
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" (\n{}\n);",
        table,
        definitions.join(",\n")
    ))
}

/// Build a SQLite dump from sqlite_master introspection
pub fn generate_sqlite_dump(client: &mut dyn SqlClient, exclude_tables: &[String]) -> Result<String> {
    let mut sql = String::new();
    sql.push_str("-- SQLite dump generated by opsguard (in-process fallback)\n");
    sql.push_str(&format!("-- Date: {}\n\n", Local::now().format("%Y-%m-%d %H:%M:%S")));
    sql.push_str("PRAGMA foreign_keys=OFF;\n");
    sql.push_str("BEGIN TRANSACTION;\n\n");

    let tables = client.query_rows(
        "SELECT name, sql FROM sqlite_master \
         WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;

    for row in &tables {
        let name = match row.first().cloned().flatten() {
            Some(n) => n,
            None => continue,
        };
        if exclude_tables.contains(&name) {
            continue;
        }

        if let Some(create) = row.get(1).cloned().flatten() {
            sql.push_str(&create);
            sql.push_str(";\n\n");
        }

        let result = client.query(&format!("SELECT * FROM \"{}\"", name))?;
        if !result.rows.is_empty() {
            for data_row in &result.rows {
                sql.push_str(&render_insert('"', &name, &result.columns, data_row));
                sql.push('\n');
            }
            sql.push('\n');
        }
    }

    let indexes = client.query_rows(
        "SELECT sql FROM sqlite_master WHERE type='index' AND sql IS NOT NULL",
    )?;
    for row in indexes {
        if let Some(index) = row.into_iter().next().flatten() {
            sql.push_str(&index);
            sql.push_str(";\n");
        }
    }

    sql.push_str("\nCOMMIT;\n");
    sql.push_str("PRAGMA foreign_keys=ON;\n");

    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sql::QueryResult;
    use tempfile::TempDir;

    fn db_config(driver: &str, database: &str) -> DatabaseConfig {
        DatabaseConfig {
            driver: driver.to_string(),
            host: "localhost".to_string(),
            port: 5432,
            database: database.to_string(),
            username: "app".to_string(),
            password: String::new(),
            exclude_tables: vec!["sessions".to_string()],
        }
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(DumpStrategy::for_driver("mysql").unwrap(), DumpStrategy::Mysql);
        assert_eq!(DumpStrategy::for_driver("pgsql").unwrap(), DumpStrategy::Postgres);
        assert_eq!(DumpStrategy::for_driver("sqlite").unwrap(), DumpStrategy::Sqlite);
        assert!(matches!(
            DumpStrategy::for_driver("mongodb"),
            Err(DumpError::UnsupportedDriver(_))
        ));
    }

    #[test]
    fn test_sql_quote() {
        assert_eq!(sql_quote("plain"), "'plain'");
        assert_eq!(sql_quote("it's"), "'it''s'");
    }

    #[test]
    fn test_sqlite_generator_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.sqlite");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE sessions (id INTEGER PRIMARY KEY, payload TEXT);
             CREATE INDEX idx_users_name ON users(name);
             INSERT INTO users (name) VALUES ('o''brien');
             INSERT INTO sessions (payload) VALUES ('secret');",
        )
        .unwrap();
        drop(conn);

        let mut client = SqliteClient::open(path.to_str().unwrap()).unwrap();
        let dump = generate_sqlite_dump(&mut client, &["sessions".to_string()]).unwrap();

        assert!(dump.contains("CREATE TABLE users"));
        assert!(dump.contains("INSERT INTO \"users\" (\"id\",\"name\") VALUES ('1','o''brien');"));
        assert!(dump.contains("idx_users_name"));
        assert!(dump.contains("BEGIN TRANSACTION;"));
        assert!(dump.trim_end().ends_with("PRAGMA foreign_keys=ON;"));
        // excluded table appears neither as schema nor as data
        assert!(!dump.contains("CREATE TABLE sessions"));
        assert!(!dump.contains("secret"));
    }

    /// Canned client that answers catalog queries the way PostgreSQL would
    struct FakePgClient;

    impl SqlClient for FakePgClient {
        fn query(&mut self, sql: &str) -> Result<QueryResult> {
            if sql.contains("FROM pg_tables") {
                return Ok(QueryResult {
                    columns: vec!["tablename".to_string()],
                    rows: vec![
                        vec![Some("sessions".to_string())],
                        vec![Some("users".to_string())],
                    ],
                });
            }
            if sql.contains("information_schema.columns") && sql.contains("column_name, data_type") {
                return Ok(QueryResult {
                    columns: vec![
                        "column_name".into(),
                        "data_type".into(),
                        "character_maximum_length".into(),
                        "is_nullable".into(),
                        "column_default".into(),
                    ],
                    rows: vec![
                        vec![
                            Some("id".to_string()),
                            Some("integer".to_string()),
                            None,
                            Some("NO".to_string()),
                            None,
                        ],
                        vec![
                            Some("name".to_string()),
                            Some("character varying".to_string()),
                            Some("255".to_string()),
                            Some("YES".to_string()),
                            None,
                        ],
                    ],
                });
            }
            if sql.contains("information_schema.columns") {
                return Ok(QueryResult {
                    columns: vec!["column_name".to_string()],
                    rows: vec![vec![Some("id".to_string())], vec![Some("name".to_string())]],
                });
            }
            if sql.contains("FROM \"users\"") {
                return Ok(QueryResult {
                    columns: vec!["id".to_string(), "name".to_string()],
                    rows: vec![vec![Some("1".to_string()), Some("alice".to_string())]],
                });
            }
            if sql.contains("information_schema.sequences") {
                return Ok(QueryResult {
                    columns: vec!["sequence_name".to_string()],
                    rows: vec![vec![Some("users_id_seq".to_string())]],
                });
            }
            if sql.contains("last_value") {
                return Ok(QueryResult {
                    columns: vec!["last_value".to_string()],
                    rows: vec![vec![Some("1".to_string())]],
                });
            }
            Ok(QueryResult {
                columns: Vec::new(),
                rows: Vec::new(),
            })
        }
    }

    #[test]
    fn test_postgres_generator() {
        let config = db_config("pgsql", "app_db");
        let mut client = FakePgClient;
        let dump = generate_postgres_dump(&mut client, &config).unwrap();

        assert!(dump.contains("SET client_encoding = 'UTF8';"));
        assert!(dump.contains("CREATE TABLE IF NOT EXISTS \"users\""));
        assert!(dump.contains("\"name\" character varying(255)"));
        assert!(dump.contains("\"id\" integer NOT NULL"));
        assert!(dump.contains("INSERT INTO \"users\" (\"id\",\"name\") VALUES ('1','alice');"));
        assert!(dump.contains("SELECT setval('\"users_id_seq\"', 1, true);"));
        // excluded table never dumped
        assert!(!dump.contains("-- Table: sessions"));
    }
}

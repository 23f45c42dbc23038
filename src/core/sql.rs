/// Generic SQL client seam
///
/// The in-process dump fallback and the database health probe need raw
/// query access without caring which engine is behind it. Values come back
/// text-rendered, NULL as `None`. SQLite and PostgreSQL connect in-process;
/// MySQL goes through the `mysql` CLI in batch mode.

use anyhow::{anyhow, bail, Context, Result};
use std::process::Command;

use crate::core::config::DatabaseConfig;

/// Text-rendered result set
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

pub trait SqlClient {
    /// Run a query, returning column names and text-rendered rows
    fn query(&mut self, sql: &str) -> Result<QueryResult>;

    fn query_rows(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        Ok(self.query(sql)?.rows)
    }

    /// First column of the first row, if any
    fn query_scalar(&mut self, sql: &str) -> Result<Option<String>> {
        let rows = self.query_rows(sql)?;
        Ok(rows.into_iter().next().and_then(|r| r.into_iter().next()).flatten())
    }
}

/// Open a client for the configured driver
pub fn connect(config: &DatabaseConfig) -> Result<Box<dyn SqlClient>> {
    match config.driver.as_str() {
        "sqlite" => Ok(Box::new(SqliteClient::open(&config.database)?)),
        "pgsql" => Ok(Box::new(PostgresClient::connect(config)?)),
        "mysql" => Ok(Box::new(MysqlCliClient::new(config.clone()))),
        other => bail!("No SQL client for driver: {}", other),
    }
}

pub struct SqliteClient {
    conn: rusqlite::Connection,
}

impl SqliteClient {
    pub fn open(path: &str) -> Result<Self> {
        if !std::path::Path::new(path).exists() {
            bail!("SQLite database file not found: {}", path);
        }
        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path))?;
        Ok(Self { conn })
    }
}

impl SqlClient for SqliteClient {
    fn query(&mut self, sql: &str) -> Result<QueryResult> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let ncols = columns.len();
        let mut rows = stmt.query([])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(ncols);
            for i in 0..ncols {
                use rusqlite::types::ValueRef;
                let value = match row.get_ref(i)? {
                    ValueRef::Null => None,
                    ValueRef::Integer(v) => Some(v.to_string()),
                    ValueRef::Real(v) => Some(v.to_string()),
                    ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
                    ValueRef::Blob(b) => {
                        Some(b.iter().map(|byte| format!("{:02x}", byte)).collect())
                    }
                };
                record.push(value);
            }
            out.push(record);
        }
        Ok(QueryResult { columns, rows: out })
    }
}

pub struct PostgresClient {
    client: postgres::Client,
}

impl PostgresClient {
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let params = format!(
            "host={} port={} user={} password={} dbname={}",
            config.host, config.port, config.username, config.password, config.database
        );
        let client = postgres::Client::connect(&params, postgres::NoTls)
            .with_context(|| format!("Failed to connect to PostgreSQL at {}:{}", config.host, config.port))?;
        Ok(Self { client })
    }

    fn render_value(row: &postgres::Row, i: usize) -> Result<Option<String>> {
        let type_name = row.columns()[i].type_().name().to_string();
        let value = match type_name.as_str() {
            "int2" => row.try_get::<_, Option<i16>>(i)?.map(|v| v.to_string()),
            "int4" => row.try_get::<_, Option<i32>>(i)?.map(|v| v.to_string()),
            "int8" => row.try_get::<_, Option<i64>>(i)?.map(|v| v.to_string()),
            "float4" => row.try_get::<_, Option<f32>>(i)?.map(|v| v.to_string()),
            "float8" => row.try_get::<_, Option<f64>>(i)?.map(|v| v.to_string()),
            "bool" => row.try_get::<_, Option<bool>>(i)?.map(|v| v.to_string()),
            _ => match row.try_get::<_, Option<String>>(i) {
                Ok(v) => v,
                Err(_) => bail!("Cannot render column type {} as text; cast it in the query", type_name),
            },
        };
        Ok(value)
    }
}

impl SqlClient for PostgresClient {
    fn query(&mut self, sql: &str) -> Result<QueryResult> {
        let stmt = self.client.prepare(sql)?;
        let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();
        let rows = self.client.query(&stmt, &[])?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = Vec::with_capacity(row.len());
            for i in 0..row.len() {
                record.push(Self::render_value(row, i)?);
            }
            out.push(record);
        }
        Ok(QueryResult { columns, rows: out })
    }
}

/// MySQL access through the `mysql` CLI in batch mode
pub struct MysqlCliClient {
    config: DatabaseConfig,
}

impl MysqlCliClient {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }
}

impl SqlClient for MysqlCliClient {
    fn query(&mut self, sql: &str) -> Result<QueryResult> {
        let output = Command::new("mysql")
            .arg(format!("--host={}", self.config.host))
            .arg(format!("--port={}", self.config.port))
            .arg(format!("--user={}", self.config.username))
            .arg(format!("--password={}", self.config.password))
            .arg("--batch")
            .arg("--raw")
            .arg("-e")
            .arg(sql)
            .arg(&self.config.database)
            .output()
            .context("Failed to run mysql client")?;

        if !output.status.success() {
            return Err(anyhow!(
                "mysql query failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        // Batch output is TSV with a header line
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines();
        let columns = lines
            .next()
            .map(|header| header.split('\t').map(|c| c.to_string()).collect())
            .unwrap_or_default();

        let rows = lines
            .map(|line| {
                line.split('\t')
                    .map(|field| {
                        if field == "NULL" {
                            None
                        } else {
                            Some(field.to_string())
                        }
                    })
                    .collect()
            })
            .collect();
        Ok(QueryResult { columns, rows })
    }
}

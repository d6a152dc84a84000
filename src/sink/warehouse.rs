//! Postgres warehouse destination

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use crate::config::WarehouseConfig;
use crate::error::SinkError;
use crate::sink::Sink;
use crate::types::FetchedResource;

/// Loads each fetched payload's NDJSON records into a Postgres table
///
/// One table per resource type, named after the type; a resource with no
/// inferred type is rejected. Tables are created on first load
/// (`CREATE TABLE IF NOT EXISTS`), so an already-existing table is success,
/// not an error. The configured schema must already exist, matching the
/// must-pre-exist semantics of a warehouse dataset. All records of one
/// resource load in a single transaction.
#[derive(Clone, Debug)]
pub struct WarehouseSink {
    pool: PgPool,
    schema: Option<String>,
}

impl WarehouseSink {
    /// Connect to the configured database
    pub async fn connect(config: WarehouseConfig) -> Result<Self, SinkError> {
        let pool = PgPool::connect(&config.database_url)
            .await
            .map_err(|e| SinkError::Connect {
                detail: e.to_string(),
            })?;
        tracing::debug!(schema = ?config.schema, "warehouse sink connected");
        Ok(Self {
            pool,
            schema: config.schema,
        })
    }

    fn qualified_table(&self, table: &str) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(table)),
            None => quote_ident(table),
        }
    }
}

#[async_trait]
impl Sink for WarehouseSink {
    async fn accept(&self, resource: &FetchedResource) -> Result<(), SinkError> {
        let table = resource
            .link
            .resource_type
            .ok_or_else(|| SinkError::MissingResourceType {
                file_name: resource.link.file_name.clone(),
            })?;
        let qualified = self.qualified_table(table);
        let load_err = |e: sqlx::Error| SinkError::Load {
            table: table.to_string(),
            detail: e.to_string(),
        };

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {qualified} (resource jsonb NOT NULL)"
        ))
        .execute(&self.pool)
        .await
        .map_err(load_err)?;

        let mut tx = self.pool.begin().await.map_err(load_err)?;
        let insert = format!("INSERT INTO {qualified} (resource) VALUES ($1)");
        let mut rows = 0u64;
        for line in ndjson_records(&resource.payload) {
            let record: serde_json::Value =
                serde_json::from_slice(line).map_err(|e| SinkError::Load {
                    table: table.to_string(),
                    detail: format!("invalid NDJSON record: {e}"),
                })?;
            sqlx::query(&insert)
                .bind(record)
                .execute(&mut *tx)
                .await
                .map_err(load_err)?;
            rows += 1;
        }
        tx.commit().await.map_err(load_err)?;

        tracing::info!(table = %table, rows, "resource loaded");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "warehouse"
    }
}

/// Split an NDJSON payload into its non-blank records
fn ndjson_records(payload: &[u8]) -> impl Iterator<Item = &[u8]> {
    payload
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

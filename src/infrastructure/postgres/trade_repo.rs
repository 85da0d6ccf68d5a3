use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, Connection, PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, warn, error};
use crate::{
    config::DatabaseConfig,
    domain::{error::IngestionError, models::TradeRecord, ports::TradeRepository},
};

pub const TABLE_NAME: &str = "spimex_trading_results";

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS spimex_trading_results (
    id SERIAL PRIMARY KEY,
    exchange_product_id VARCHAR NOT NULL,
    exchange_product_name VARCHAR NOT NULL,
    oil_id VARCHAR(4) NOT NULL,
    delivery_basis_id VARCHAR(3) NOT NULL,
    delivery_basis_name VARCHAR NOT NULL,
    delivery_type_id VARCHAR(1) NOT NULL,
    volume BIGINT NOT NULL,
    total BIGINT NOT NULL,
    count BIGINT NOT NULL,
    date DATE,
    created_on TIMESTAMP DEFAULT now(),
    updated_on TIMESTAMP DEFAULT now()
)"#;

const INSERT_PREFIX: &str = "INSERT INTO spimex_trading_results (exchange_product_id, exchange_product_name, \
    oil_id, delivery_basis_id, delivery_basis_name, delivery_type_id, volume, total, count, date) ";

/// Rows per multi-row `INSERT`. Postgres allows 65535 bind parameters per
/// statement; each row binds 10.
pub const ROWS_PER_STATEMENT: usize = 1000;

pub struct PgTradeRepository {
    pool: PgPool,
}

impl PgTradeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, IngestionError> {
        debug!("Connecting to Postgres at {}:{}/{}", config.host, config.port, config.name);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options())
            .await
            .map_err(|e| {
                error!("Failed to connect to Postgres: {}", e);
                IngestionError::Storage(e.to_string())
            })?;
        info!("Connected to Postgres database {}", config.name);
        Ok(Self::new(pool))
    }

    /// Creates the results table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), IngestionError> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        debug!("Table {} is ready", TABLE_NAME);
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_chunks(conn: &mut PgConnection, records: &[TradeRecord]) -> Result<u64, IngestionError> {
        let mut inserted = 0;
        for chunk in records.chunks(ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(INSERT_PREFIX);
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.exchange_product_id())
                    .push_bind(record.exchange_product_name())
                    .push_bind(record.oil_id())
                    .push_bind(record.delivery_basis_id())
                    .push_bind(record.delivery_basis_name())
                    .push_bind(record.delivery_type_id())
                    .push_bind(record.volume())
                    .push_bind(record.total())
                    .push_bind(record.count())
                    .push_bind(record.date());
            });
            let result = builder.build().execute(&mut *conn).await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }
}

/// Creates the configured database through the `postgres` maintenance
/// database when it is missing.
pub async fn ensure_database(config: &DatabaseConfig) -> Result<(), IngestionError> {
    let mut conn = PgConnection::connect_with(&config.connect_options_for("postgres")).await?;

    let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
        .bind(&config.name)
        .fetch_optional(&mut conn)
        .await?;

    if exists.is_none() {
        let statement = format!("CREATE DATABASE \"{}\"", config.name.replace('"', "\"\""));
        sqlx::query(&statement).execute(&mut conn).await?;
        info!("Created database {}", config.name);
    } else {
        debug!("Database {} already exists", config.name);
    }

    conn.close().await?;
    Ok(())
}

#[async_trait]
impl TradeRepository for PgTradeRepository {
    async fn insert_records(&self, records: &[TradeRecord]) -> Result<u64, IngestionError> {
        if records.is_empty() {
            debug!("No records to insert into {}", TABLE_NAME);
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        match Self::insert_chunks(&mut *tx, records).await {
            Ok(inserted) => {
                tx.commit().await?;
                info!("Inserted {} rows into {}", inserted, TABLE_NAME);
                Ok(inserted)
            }
            Err(e) => {
                error!("Insert into {} failed, rolling back: {}", TABLE_NAME, e);
                if let Err(rollback) = tx.rollback().await {
                    warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }
}

use crate::config::AppConfig;
use crate::entities;
use crate::errors::ServiceError;
use sea_orm::sea_query::Index;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityName, EntityTrait, Schema,
};
use std::time::Duration;
use tracing::{debug, error, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// Establishes a connection pool to the database
///
/// # Errors
/// Returns a `ServiceError` if the connection cannot be established
pub async fn establish_connection(database_url: &str) -> Result<DbPool, ServiceError> {
    let config = DbConfig {
        url: database_url.to_string(),
        ..Default::default()
    };

    establish_connection_with_config(&config).await
}

/// Establishes a connection pool to the database with custom configuration
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("Configuring database connection with: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());

    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(true);

    info!(
        "Connecting to database with max_connections={}",
        config.max_connections
    );

    let db_pool = Database::connect(opt).await.map_err(|e| {
        error!("Database connection establishment failed: {}", e);
        ServiceError::DatabaseError(e)
    })?;

    info!("Database connection pool established successfully");

    Ok(db_pool)
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Creates any missing tables and indexes from the entity definitions.
///
/// Statements use IF NOT EXISTS so repeated startups are safe.
pub async fn ensure_schema(db: &DbPool) -> Result<(), ServiceError> {
    info!("Ensuring database schema");
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    create_table(db, &schema, entities::product::Entity).await?;
    create_table(db, &schema, entities::warehouse::Entity).await?;
    create_table(db, &schema, entities::purchase_request::Entity).await?;
    create_table(db, &schema, entities::purchase_request_line::Entity).await?;
    create_table(db, &schema, entities::stock_balance::Entity).await?;
    create_table(db, &schema, entities::stock_batch::Entity).await?;
    create_table(db, &schema, entities::line_allocation::Entity).await?;
    create_table(db, &schema, entities::transfer_order::Entity).await?;
    create_table(db, &schema, entities::transfer_order_item::Entity).await?;
    create_table(db, &schema, entities::document_counter::Entity).await?;

    // One balance row per product, warehouse and period.
    let balance_idx = Index::create()
        .name("idx_stock_balances_product_warehouse_period")
        .table(entities::stock_balance::Entity.table_ref())
        .col(entities::stock_balance::Column::ProductId)
        .col(entities::stock_balance::Column::WarehouseId)
        .col(entities::stock_balance::Column::Period)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&balance_idx)).await?;

    let batch_idx = Index::create()
        .name("idx_stock_batches_product_warehouse_arrived")
        .table(entities::stock_batch::Entity.table_ref())
        .col(entities::stock_batch::Column::ProductId)
        .col(entities::stock_batch::Column::WarehouseId)
        .col(entities::stock_batch::Column::ArrivedAt)
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&batch_idx)).await?;

    info!("Database schema is up to date");
    Ok(())
}

async fn create_table<E>(db: &DbPool, schema: &Schema, entity: E) -> Result<(), ServiceError>
where
    E: EntityTrait,
{
    let backend = db.get_database_backend();
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await?;
    Ok(())
}

/// Checks if the database connection is active
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    debug!("Checking database connection");
    pool.ping().await.map_err(ServiceError::DatabaseError)
}

/// Closes the database connection pool
pub async fn close_pool(pool: DbPool) -> Result<(), ServiceError> {
    info!("Closing database connection pool");
    pool.close().await.map_err(ServiceError::DatabaseError)
}

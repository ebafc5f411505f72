use std::sync::OnceLock;

use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::{Connection, SqliteConnection};
use diesel_migrations::{
    EmbeddedMigrations, MigrationHarness, embed_migrations,
};

use crate::error::ApiError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

static POOL: OnceLock<Pool<ConnectionManager<SqliteConnection>>> = OnceLock::new();

pub fn init() {
    migrate();
    let config = crate::config::get();
    let manager = ConnectionManager::<SqliteConnection>::new(&config.database_url);
    let pool = Pool::builder()
        .build(manager)
        .expect("db pool should build");
    POOL.set(pool).expect("db pool should only be set once");
}

fn migrate() {
    let conn = &mut connect().expect("db connect should worked");
    println!(
        "Has pending migration: {}",
        conn.has_pending_migration(MIGRATIONS).unwrap()
    );
    conn.run_pending_migrations(MIGRATIONS)
        .expect("migrate db should worked");
}

/// Raw, unpooled connection. Used for migrations at startup and for the
/// realtime connection repository, whose call volume never justifies a
/// pool checkout.
pub fn connect() -> Result<SqliteConnection, diesel::ConnectionError> {
    let config = crate::config::get();
    SqliteConnection::establish(&config.database_url)
}

/// Pooled connection for request handlers.
pub fn get() -> Result<DbConn, ApiError> {
    POOL.get()
        .expect("db pool not initialized")
        .get()
        .map_err(ApiError::DatabaseConnectionPool)
}

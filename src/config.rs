use std::{
    env::{self, VarError},
    time::Duration,
};

use anyhow::Context;
use rearch::{CData, CapsuleHandle, Container};
use sea_orm::{ConnectOptions, Database, DbConn};
use sea_orm_migration::MigratorTrait;
use tracing::{info, instrument, warn};

use crate::migration::Migrator;

/// Upper bound on connecting to the database, acquiring a connection, and any
/// single store call.
pub const STORE_TIMEOUT: Duration = Duration::from_secs(8);

/// # Errors
/// Will return [`Err`] if the connection to the database or its migration fails.
#[instrument]
pub async fn init_container() -> anyhow::Result<Container> {
    info!("Initializing container");
    let container = Container::new();

    let (db_connection_options, set_db_conn) =
        container.read((db_connection_options_capsule, db_conn_init_action));

    info!(?db_connection_options, "Connecting to database");
    set_db_conn(connect_database(db_connection_options).await?);

    info!("Container initialized");
    Ok(container)
}

/// Connects to the database and brings its schema up to date.
///
/// # Errors
/// Will return [`Err`] if the connection or a migration fails.
pub async fn connect_database(options: ConnectOptions) -> anyhow::Result<DbConn> {
    let db = Database::connect(options)
        .await
        .context("Failed to connect to database")?;
    Migrator::up(&db, None)
        .await
        .context("Failed to run database migrations")?;
    Ok(db)
}

/// # Panics
/// Panics when environment variable is not set or is invalid.
#[must_use]
pub fn db_connection_options_capsule(_: CapsuleHandle) -> ConnectOptions {
    const ENV_VAR_NAME: &str = "DB_URL";
    let db_url = env::var(ENV_VAR_NAME).unwrap_or_else(|err| match err {
        VarError::NotPresent => panic!("{ENV_VAR_NAME} is not set"),
        VarError::NotUnicode(actual) => {
            panic!("{ENV_VAR_NAME} is invalid unicode: {}", actual.display());
        }
    });

    store_connect_options(db_url)
}

fn store_connect_options(db_url: String) -> ConnectOptions {
    let mut options = ConnectOptions::new(db_url);
    options
        .connect_timeout(STORE_TIMEOUT)
        .acquire_timeout(STORE_TIMEOUT)
        // NOTE: Postgres aborts the statement server-side; other backends ignore this
        .statement_timeout(STORE_TIMEOUT);
    options
}

fn db_conn_manager(
    CapsuleHandle { register, .. }: CapsuleHandle,
) -> (Option<DbConn>, impl use<> + CData + Fn(Option<DbConn>)) {
    register.register(rearch_effects::state::<rearch_effects::Cloned<_>>(None))
}

pub fn db_conn_init_action(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> impl use<> + CData + Fn(DbConn) {
    let set_db_conn = get.as_ref(db_conn_manager).1.clone();
    move |db| set_db_conn(Some(db))
}

/// # Panics
/// Panics when the [`DbConn`] was not set via [`db_conn_init_action`].
pub fn db_conn_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> DbConn {
    let db_conn = get.as_ref(db_conn_manager).0.clone();
    db_conn.expect("DbConn should've been set via db_conn_init_action!")
}

/// # Panics
/// Panics when environment variable is invalid.
pub fn addr_capsule(_: CapsuleHandle) -> String {
    const ENV_VAR_NAME: &str = "ADDR";
    const DEFAULT_ADDR: &str = "127.0.0.1:0";

    match env::var(ENV_VAR_NAME) {
        Ok(addr) => {
            info!(addr, "{ENV_VAR_NAME} environment variable set");
            addr
        }
        Err(VarError::NotPresent) => {
            warn!(
                addr = DEFAULT_ADDR,
                "{ENV_VAR_NAME} environment variable not set; defaulting to {DEFAULT_ADDR}"
            );
            DEFAULT_ADDR.to_string()
        }
        Err(VarError::NotUnicode(actual)) => {
            panic!(
                "{ENV_VAR_NAME} environment variable is invalid: {}",
                actual.display()
            );
        }
    }
}

/// Base that short codes are appended to when handing out full short URLs,
/// e.g. `https://sho.rt`. [`None`] means only bare short codes are returned.
///
/// # Panics
/// Panics when environment variable is invalid.
pub fn public_base_url_capsule(_: CapsuleHandle) -> Option<String> {
    const ENV_VAR_NAME: &str = "PUBLIC_BASE_URL";

    match env::var(ENV_VAR_NAME) {
        Ok(base_url) => {
            info!(base_url, "{ENV_VAR_NAME} environment variable set");
            Some(base_url.trim_end_matches('/').to_owned())
        }
        Err(VarError::NotPresent) => {
            info!("{ENV_VAR_NAME} environment variable not set; returning bare short codes");
            None
        }
        Err(VarError::NotUnicode(actual)) => {
            panic!(
                "{ENV_VAR_NAME} environment variable is invalid: {}",
                actual.display()
            );
        }
    }
}

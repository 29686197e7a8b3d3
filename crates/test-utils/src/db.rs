//! Throwaway PostgreSQL databases for notiflow's store tests.
//!
//! Every test gets its own database, created from `TEST_ADMIN_DATABASE_URL`
//! (an account allowed to `CREATE DATABASE`), migrated with
//! `crates/notiflow/migrations`, and dropped again when the test passes.
//! Set `TEST_KEEP_DB` to keep databases around for inspection; failed or
//! panicking tests always keep theirs.

use std::future::Future;
use std::pin::Pin;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use url::Url;
use uuid::Uuid;

const ADMIN_URL_VAR: &str = "TEST_ADMIN_DATABASE_URL";
const KEEP_DB_VAR: &str = "TEST_KEEP_DB";

/// Postgres identifiers are limited to 63 bytes.
const MAX_IDENT: usize = 63;

/// Run `f` against a freshly created and migrated database.
pub async fn with_test_db<F, T>(test_name: &str, f: F) -> Result<T>
where
    F: for<'a> FnOnce(&'a PgPool) -> Pin<Box<dyn Future<Output = Result<T>> + 'a>>,
{
    dotenvy::dotenv().ok();

    let admin_url = std::env::var(ADMIN_URL_VAR)
        .with_context(|| format!("{ADMIN_URL_VAR} must be set for database tests"))?;
    let mut admin = PgConnection::connect(&admin_url)
        .await
        .context("connecting to the admin database")?;

    let db_name = database_name(test_name);
    admin
        .execute(format!(r#"CREATE DATABASE "{db_name}""#).as_str())
        .await
        .with_context(|| format!("creating database {db_name}"))?;

    let mut db_url = Url::parse(&admin_url)?;
    db_url.set_path(&format!("/{db_name}"));

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url.as_str())
        .await?;

    sqlx::migrate!("../notiflow/migrations").run(&pool).await?;

    let result = f(&pool).await;

    if result.is_ok() && std::env::var(KEEP_DB_VAR).is_err() {
        pool.close().await;
        let drop = format!(r#"DROP DATABASE IF EXISTS "{db_name}" WITH (FORCE)"#);
        if let Err(e) = admin.execute(drop.as_str()).await {
            eprintln!("[test-utils] could not drop {db_name}: {e}");
        }
    } else {
        eprintln!("[test-utils] keeping database {db_name}");
    }

    result
}

/// `nf_<sanitized test name>_<uuid>`, cut to fit an identifier.
fn database_name(test_name: &str) -> String {
    const PREFIX: &str = "nf_";
    let suffix = Uuid::now_v7().simple().to_string();

    let sanitized: String = test_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let mut sanitized = sanitized.trim_matches('_').to_string();
    sanitized.truncate(MAX_IDENT - PREFIX.len() - 1 - suffix.len());

    format!("{PREFIX}{sanitized}_{suffix}")
}

/// Define a `#[tokio::test]` that receives a `&PgPool` for a fresh database.
///
/// ```ignore
/// use test_utils::db_test;
///
/// db_test!(claims_oldest_step, |pool| {
///     let store = notiflow::PgStore::new(pool.clone());
///     // ...
///     Ok(())
/// });
/// ```
#[macro_export]
macro_rules! db_test {
    ($name:ident, |$pool:ident| $body:block) => {
        #[tokio::test(flavor = "multi_thread")]
        async fn $name() -> anyhow::Result<()> {
            $crate::db::with_test_db(stringify!($name), |$pool| Box::pin(async move { $body }))
                .await
        }
    };
}

//! SurrealDB connection shared by the tag registry and the run ledger.

use std::path::PathBuf;

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StateError;
use crate::migrations;
use crate::surreal_ledger::SurrealRunLedger;
use crate::surreal_tags::SurrealTagRegistry;
use crate::Result;

/// Default local persistence directory when no endpoint is configured.
pub const DEFAULT_LOCAL_DB_PATH: &str = ".conveyor/db";

const DEFAULT_NAMESPACE: &str = "conveyor";
const DEFAULT_DATABASE: &str = "main";

/// Where state lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Authenticated server (`SURREALDB_ENDPOINT`, `SURREALDB_USERNAME`,
    /// `SURREALDB_PASSWORD`; optional `SURREALDB_NAMESPACE`,
    /// `SURREALDB_DATABASE`, `SURREALDB_ROOT=true`).
    Remote {
        url: String,
        username: String,
        password: String,
        namespace: String,
        database: String,
        root: bool,
    },
    /// Any URL the `any` engine accepts, without sign-in (`SURREALDB_URL`).
    Url(String),
    /// Embedded SurrealKV store.
    Local(PathBuf),
}

impl Endpoint {
    pub fn from_env() -> Self {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Remote when all three credentials are present, then `SURREALDB_URL`,
    /// then [`DEFAULT_LOCAL_DB_PATH`].
    fn resolve(var: impl Fn(&str) -> Option<String>) -> Self {
        let remote = (
            var("SURREALDB_ENDPOINT"),
            var("SURREALDB_USERNAME"),
            var("SURREALDB_PASSWORD"),
        );
        if let (Some(url), Some(username), Some(password)) = remote {
            return Endpoint::Remote {
                url,
                username,
                password,
                namespace: var("SURREALDB_NAMESPACE")
                    .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
                database: var("SURREALDB_DATABASE")
                    .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
                root: var("SURREALDB_ROOT").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            };
        }
        match var("SURREALDB_URL") {
            Some(url) => Endpoint::Url(url),
            None => Endpoint::Local(PathBuf::from(DEFAULT_LOCAL_DB_PATH)),
        }
    }
}

/// Shared SurrealDB client for the tag registry and run ledger.
#[derive(Clone)]
pub struct SurrealHandle {
    db: Surreal<Any>,
}

impl SurrealHandle {
    /// In-memory database with the schema applied.
    pub async fn in_memory() -> Result<Self> {
        Self::connect(&Endpoint::Url("mem://".to_string())).await
    }

    /// Connect to whatever the environment selects (see [`Endpoint::from_env`]).
    pub async fn setup_from_env() -> Result<Self> {
        Self::connect(&Endpoint::from_env()).await
    }

    #[instrument(skip_all)]
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let db = match endpoint {
            Endpoint::Remote {
                url,
                username,
                password,
                namespace,
                database,
                root,
            } => {
                info!(%url, %namespace, %database, root, "connecting to SurrealDB server");
                let db = open(url).await?;
                let signed_in = if *root {
                    db.signin(Root { username, password }).await.map(|_| ())
                } else {
                    db.signin(Database {
                        namespace,
                        database,
                        username,
                        password,
                    })
                    .await
                    .map(|_| ())
                };
                signed_in.map_err(|e| {
                    StateError::Connection(format!("authentication against {url} failed: {e}"))
                })?;
                select(&db, namespace, database).await?;
                db
            }
            Endpoint::Url(url) => {
                info!(%url, "connecting to SurrealDB");
                let db = open(url).await?;
                select(&db, DEFAULT_NAMESPACE, DEFAULT_DATABASE).await?;
                db
            }
            Endpoint::Local(path) => {
                std::fs::create_dir_all(path).map_err(|e| {
                    StateError::Connection(format!("cannot create {}: {e}", path.display()))
                })?;
                let url = format!("surrealkv://{}", path.display());
                info!(%url, "using local SurrealKV store");
                let db = open(&url).await?;
                select(&db, DEFAULT_NAMESPACE, DEFAULT_DATABASE).await?;
                db
            }
        };

        migrations::init_schema(&db).await?;
        Ok(Self { db })
    }

    /// Tag registry over this connection.
    pub fn tag_registry(&self) -> SurrealTagRegistry {
        SurrealTagRegistry::new(self.db.clone())
    }

    /// Run ledger over this connection.
    pub fn run_ledger(&self) -> SurrealRunLedger {
        SurrealRunLedger::new(self.db.clone())
    }
}

async fn open(url: &str) -> Result<Surreal<Any>> {
    surrealdb::engine::any::connect(url)
        .await
        .map_err(|e| StateError::Connection(format!("cannot connect to {url}: {e}")))
}

async fn select(db: &Surreal<Any>, namespace: &str, database: &str) -> Result<()> {
    db.use_ns(namespace)
        .use_db(database)
        .await
        .map_err(|e| StateError::Connection(format!("cannot select {namespace}/{database}: {e}")))
}

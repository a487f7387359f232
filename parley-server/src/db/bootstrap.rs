//! Versioned bootstrap of the `parley` schema.
//!
//! Scripts live under `<bootstrap_path>/{schema,procedures,indexes,seed}`
//! and run in that stage order, by file name within a stage. Every applied
//! script is recorded in `parley.schema_scripts` with its SHA-256, so a
//! restart only runs what is new. Procedure scripts are `CREATE OR REPLACE`
//! and are re-applied when their text changes; any other recorded script
//! whose text changed stops the bootstrap.
//!
//! The whole run is one transaction behind an advisory lock, so processes
//! starting together against the same database apply each script once.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use tracing::{debug, info, warn};

use shared::config::server::DatabaseConfig;

const LEDGER_DDL: &str = "
CREATE SCHEMA IF NOT EXISTS parley;
CREATE TABLE IF NOT EXISTS parley.schema_scripts (
    name TEXT PRIMARY KEY,
    checksum BYTEA NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
);";

/// Advisory lock key held for the duration of a bootstrap run.
const BOOTSTRAP_LOCK_KEY: i64 = 0x0070_6172_6c65_7900;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Schema,
    Procedures,
    Indexes,
    Seed,
}

impl Stage {
    const ORDER: [Stage; 4] = [
        Stage::Schema,
        Stage::Procedures,
        Stage::Indexes,
        Stage::Seed,
    ];

    fn dir(self) -> &'static str {
        match self {
            Stage::Schema => "schema",
            Stage::Procedures => "procedures",
            Stage::Indexes => "indexes",
            Stage::Seed => "seed",
        }
    }

    /// Seed data is per deployment.
    fn optional(self) -> bool {
        self == Stage::Seed
    }

    fn replaceable(self) -> bool {
        self == Stage::Procedures
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database bootstrap directory does not exist: {0}")]
    MissingRoot(PathBuf),
    #[error("bootstrap stage '{stage}' missing at {path}")]
    MissingStage { stage: &'static str, path: PathBuf },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A script recorded as applied no longer matches its file.
    #[error("bootstrap script {0} changed after it was applied; add a new script instead")]
    Drifted(String),
    #[error("bootstrap failed at {script}: {source}")]
    Sql {
        script: String,
        #[source]
        source: sqlx::Error,
    },
}

/// What a run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub applied: usize,
    pub reapplied: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone)]
struct Script {
    stage: Stage,
    /// `<stage>/<file name>`, the ledger key.
    name: String,
    sql: String,
    checksum: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Apply,
    Reapply,
    Skip,
}

fn plan(script: &Script, recorded: Option<&[u8]>) -> Result<Step, BootstrapError> {
    match recorded {
        None => Ok(Step::Apply),
        Some(checksum) if checksum == script.checksum.as_slice() => Ok(Step::Skip),
        Some(_) if script.stage.replaceable() => Ok(Step::Reapply),
        Some(_) => Err(BootstrapError::Drifted(script.name.clone())),
    }
}

/// Applies every script not yet recorded in `parley.schema_scripts`.
///
/// # Errors
/// Fails on a missing required stage, an unreadable script, a drifted
/// script or any SQL error; nothing from the run is committed then.
pub async fn run(pool: &PgPool, config: &DatabaseConfig) -> Result<BootstrapReport, BootstrapError> {
    let scripts = load_scripts(&config.bootstrap_path)?;
    info!(
        path = %config.bootstrap_path.display(),
        scripts = scripts.len(),
        "running database bootstrap"
    );

    let ledger_error = |source: sqlx::Error| BootstrapError::Sql {
        script: "parley.schema_scripts".into(),
        source,
    };
    let mut tx = pool.begin().await.map_err(ledger_error)?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(BOOTSTRAP_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .map_err(ledger_error)?;
    sqlx::raw_sql(LEDGER_DDL)
        .execute(&mut *tx)
        .await
        .map_err(ledger_error)?;
    let recorded: HashMap<String, Vec<u8>> =
        sqlx::query_as::<_, (String, Vec<u8>)>("SELECT name, checksum FROM parley.schema_scripts")
            .fetch_all(&mut *tx)
            .await
            .map_err(ledger_error)?
            .into_iter()
            .collect();

    let mut report = BootstrapReport::default();
    for script in &scripts {
        match plan(script, recorded.get(&script.name).map(Vec::as_slice))? {
            Step::Skip => {
                report.unchanged += 1;
                continue;
            }
            Step::Apply => report.applied += 1,
            Step::Reapply => report.reapplied += 1,
        }
        apply(&mut tx, script).await?;
    }

    tx.commit().await.map_err(ledger_error)?;
    info!(
        applied = report.applied,
        reapplied = report.reapplied,
        unchanged = report.unchanged,
        "database bootstrap complete"
    );
    Ok(report)
}

async fn apply(tx: &mut Transaction<'static, Postgres>, script: &Script) -> Result<(), BootstrapError> {
    let failed = |source: sqlx::Error| BootstrapError::Sql {
        script: script.name.clone(),
        source,
    };
    info!(script = %script.name, "applying bootstrap script");
    // Multi-statement scripts need the simple query protocol.
    sqlx::raw_sql(&script.sql)
        .execute(&mut **tx)
        .await
        .map_err(failed)?;
    sqlx::query(
        "INSERT INTO parley.schema_scripts (name, checksum) VALUES ($1, $2)
         ON CONFLICT (name) DO UPDATE SET checksum = EXCLUDED.checksum, applied_at = now()",
    )
    .bind(&script.name)
    .bind(&script.checksum)
    .execute(&mut **tx)
    .await
    .map_err(failed)?;
    Ok(())
}

/// Liveness: the database answers at all.
pub async fn ensure_liveness(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

/// Readiness: the bootstrap has installed the schema and its procedures.
pub async fn ensure_readiness(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("CALL parley.sp_healthz()")
        .execute(pool)
        .await
        .map(|_| ())
}

fn load_scripts(root: &Path) -> Result<Vec<Script>, BootstrapError> {
    if !root.is_dir() {
        return Err(BootstrapError::MissingRoot(root.to_path_buf()));
    }

    let mut scripts = Vec::new();
    for stage in Stage::ORDER {
        let dir = root.join(stage.dir());
        if !dir.is_dir() {
            if stage.optional() {
                debug!(stage = stage.dir(), "optional bootstrap stage absent");
                continue;
            }
            return Err(BootstrapError::MissingStage {
                stage: stage.dir(),
                path: dir,
            });
        }
        scripts.extend(stage_scripts(stage, &dir)?);
    }
    Ok(scripts)
}

fn stage_scripts(stage: Stage, dir: &Path) -> Result<Vec<Script>, BootstrapError> {
    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| BootstrapError::Io { path, source }
    };

    let mut files = fs::read_dir(dir)
        .map_err(io_error(dir))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error(dir))?;
    files.retain(|path| {
        path.extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
    });
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut scripts = Vec::with_capacity(files.len());
    for path in files {
        let sql = fs::read_to_string(&path).map_err(io_error(&path))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = format!("{}/{file_name}", stage.dir());
        if sql.trim().is_empty() {
            warn!(script = %name, "skipping empty bootstrap script");
            continue;
        }
        let checksum = Sha256::digest(sql.as_bytes()).to_vec();
        scripts.push(Script {
            stage,
            name,
            sql,
            checksum,
        });
    }
    Ok(scripts)
}

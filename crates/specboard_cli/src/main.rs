//! CLI integrity check.
//!
//! # Responsibility
//! - Open (and migrate) a specboard database and report its schema version.
//! - Audit every live specification for dense bullet item orders.
//!
//! Exit status is 1 when the audit finds violations, 2 on any setup error.

use log::error;
use specboard_core::db::migrations::current_user_version;
use specboard_core::{core_version, init_logging, open_db_with_busy_timeout, CoreConfig, CoreRuntime};
use std::process::ExitCode;

const DEFAULT_DB_PATH: &str = "specboard.sqlite3";
const ENV_LOG_DIR: &str = "SPECBOARD_LOG_DIR";

fn main() -> ExitCode {
    match run() {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(message) => {
            error!("event=cli_run module=cli status=error error={message}");
            eprintln!("specboard: {message}");
            ExitCode::from(2)
        }
    }
}

/// Returns the number of specifications with non-dense orders.
fn run() -> Result<usize, String> {
    let config = CoreConfig::from_env().map_err(|err| err.to_string())?;
    if let Ok(log_dir) = std::env::var(ENV_LOG_DIR) {
        init_logging(&config.log_level, &log_dir)?;
    }

    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
    let conn = open_db_with_busy_timeout(&db_path, config.busy_timeout)
        .map_err(|err| format!("cannot open `{db_path}`: {err}"))?;
    let schema_version = current_user_version(&conn).map_err(|err| err.to_string())?;

    println!("specboard_core version={}", core_version());
    println!("database path={db_path} schema_version={schema_version}");

    let runtime = CoreRuntime::new(config);
    let violations = runtime
        .coordinator(&conn)
        .and_then(|coordinator| coordinator.audit_dense_order())
        .map_err(|err| err.to_string())?;

    for violation in &violations {
        println!(
            "violation spec_id={} orders={:?}",
            violation.spec_id, violation.orders
        );
    }
    println!("audit status={} violations={}", status(&violations), violations.len());
    Ok(violations.len())
}

fn status<T>(violations: &[T]) -> &'static str {
    if violations.is_empty() {
        "ok"
    } else {
        "violations"
    }
}

use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Schema steps in order; entry `n` upgrades `user_version` n to n + 1.
const SCHEMA_STEPS: &[(&str, &str)] = &[("schema_v1.sql", include_str!("schemas/schema_v1.sql"))];

/// Version a fully migrated database reports in `user_version`.
pub fn latest_version() -> usize {
    SCHEMA_STEPS.len()
}

/// Brings the schema up to [`latest_version`] in a single transaction.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let stored: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read schema version")?;
    let stored = usize::try_from(stored).context("schema version is negative")?;

    if stored > latest_version() {
        bail!(
            "session store was written by a newer build (schema {stored}, this build knows {})",
            latest_version()
        );
    }
    let pending = &SCHEMA_STEPS[stored..];
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    for (name, sql) in pending {
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply {name}"))?;
    }
    tx.pragma_update(None, "user_version", latest_version() as i64)
        .context("failed to record schema version")?;
    tx.commit().context("failed to commit migrations")?;
    Ok(())
}

//! Schema migration for the Postgres-backed registry.

use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};

/// SQL migration for Hydra tables.
pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS hydra_submissions (
    id              BIGSERIAL PRIMARY KEY,
    repository      VARCHAR(256) NOT NULL,
    branch          VARCHAR(64) NOT NULL,
    status          VARCHAR(32) NOT NULL DEFAULT 'Submitted',
    port            INTEGER,
    generation      BIGINT NOT NULL DEFAULT 0,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_hydra_submissions_status ON hydra_submissions (status);

-- A port can be held by at most one listening submission.
CREATE UNIQUE INDEX IF NOT EXISTS idx_hydra_submissions_live_port
    ON hydra_submissions (port)
    WHERE port IS NOT NULL AND status IN ('Running', 'Serving');
"#;

/// Run Hydra migration.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("Hydra migration failed: {e}"))?;
    Ok(())
}

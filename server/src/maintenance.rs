//! Index maintenance for the admin tool: drop rows whose files have disappeared from disk since the
//! indexer last ran.

use {
    anyhow::Result,
    sqlx::{Row, SqliteConnection},
    tokio::fs,
    tracing::info,
};

/// Deletions are flushed in batches of this size so an interrupted run still makes progress.
const DELETE_BATCH: usize = 500;

async fn delete_ids(conn: &mut SqliteConnection, ids: &[i64]) -> Result<()> {
    let statement = format!(
        "DELETE FROM files WHERE id IN ({})",
        crate::search::placeholders(ids.len())
    );

    let mut query = sqlx::query(&statement);

    for id in ids {
        query = query.bind(*id);
    }

    query.execute(conn).await?;

    Ok(())
}

/// Check every indexed path and delete the rows whose files no longer exist.  Returns the number of rows
/// checked and the number deleted.
pub async fn prune(conn: &mut SqliteConnection) -> Result<(u64, u64)> {
    let rows = sqlx::query("SELECT id, path FROM files")
        .fetch_all(&mut *conn)
        .await?;

    let checked = rows.len() as u64;

    let mut pending = Vec::new();
    let mut deleted = 0u64;

    for row in rows {
        let id = row.get::<i64, _>(0);
        let path = row.get::<String, _>(1);

        if fs::metadata(&path).await.is_err() {
            info!("marking for deletion (file not found): id={id}, path={path}");

            pending.push(id);

            if pending.len() >= DELETE_BATCH {
                delete_ids(&mut *conn, &pending).await?;

                deleted += pending.len() as u64;

                info!("deleted {deleted} rows so far");

                pending.clear();
            }
        }
    }

    if !pending.is_empty() {
        delete_ids(&mut *conn, &pending).await?;

        deleted += pending.len() as u64;
    }

    info!("prune finished: checked {checked}, deleted {deleted}");

    Ok((checked, deleted))
}

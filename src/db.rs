use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::PgPool;

use crate::locker::descriptor::JobDescriptor;

pub async fn make_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Backend PID of the session behind `conn`. This is how the locker is
/// identified externally: in the `lockers` table and in its notification
/// channel name.
pub async fn backend_pid(conn: &mut PgConnection) -> anyhow::Result<i32> {
    let pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
        .fetch_one(&mut *conn)
        .await?;
    Ok(pid)
}

/// Non-blocking advisory lock attempt, keyed by job ID. Session-scoped:
/// the lock belongs to `conn` until released or the session ends.
pub async fn try_advisory_lock(conn: &mut PgConnection, job_id: i64) -> anyhow::Result<bool> {
    let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
        .bind(job_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(locked)
}

/// Releases one advisory lock held by `conn`. Returns false when the lock
/// was not held, which callers treat as already-released.
pub async fn advisory_unlock(conn: &mut PgConnection, job_id: i64) -> anyhow::Result<bool> {
    let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
        .bind(job_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(released)
}

/// Batch candidate selection.
///
/// Walks the `(priority, run_at, job_id)` index in ascending order,
/// skipping `excluded` IDs, and takes a non-blocking advisory lock on each
/// row as it is visited. Recursive-CTE evaluation is incremental, so the
/// outer `LIMIT` stops the walk after the limit-th successful lock; rows
/// whose lock attempt fails are passed over without acquiring anything.
/// Only rows actually returned hold locks owned by `conn`'s session.
///
/// `run_at` participates in the ordering but is not a filter: not-yet-due
/// jobs may be claimed, and the job callback defers them under the lock.
pub async fn poll_jobs(
    conn: &mut PgConnection,
    excluded: &[i64],
    limit: i64,
) -> anyhow::Result<Vec<JobDescriptor>> {
    let jobs = sqlx::query_as::<_, JobDescriptor>(
        r#"
        WITH RECURSIVE candidates AS (
            SELECT (j).priority, (j).run_at, (j).job_id,
                   pg_try_advisory_lock((j).job_id) AS locked
            FROM (
                SELECT j
                FROM jobs AS j
                WHERE NOT job_id = ANY($1)
                ORDER BY priority, run_at, job_id
                LIMIT 1
            ) AS t1
            UNION ALL (
                SELECT (j).priority, (j).run_at, (j).job_id,
                       pg_try_advisory_lock((j).job_id) AS locked
                FROM (
                    SELECT (
                        SELECT j
                        FROM jobs AS j
                        WHERE NOT job_id = ANY($1)
                          AND (priority, run_at, job_id) >
                              (candidates.priority, candidates.run_at, candidates.job_id)
                        ORDER BY priority, run_at, job_id
                        LIMIT 1
                    ) AS j
                    FROM candidates
                    WHERE candidates.job_id IS NOT NULL
                    LIMIT 1
                ) AS t1
            )
        )
        SELECT priority, run_at, job_id
        FROM candidates
        WHERE locked
        LIMIT $2
        "#,
    )
    .bind(excluded)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    Ok(jobs)
}

/// Deletes registration rows that can no longer belong to a live locker:
/// any row reusing this session's PID, and any row whose PID has no
/// backend left in `pg_stat_activity`.
pub async fn clean_stale_lockers(conn: &mut PgConnection) -> anyhow::Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM lockers
        WHERE pid = pg_backend_pid()
           OR pid NOT IN (SELECT pid FROM pg_stat_activity)
        "#,
    )
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Inserts this locker's registration row, keyed by the session's backend
/// PID.
pub async fn register_locker(
    conn: &mut PgConnection,
    worker_count: i16,
    listening: bool,
) -> anyhow::Result<()> {
    let process_id = std::process::id() as i32;
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());

    sqlx::query(
        r#"
        INSERT INTO lockers (pid, process_id, hostname, worker_count, listening)
        VALUES (pg_backend_pid(), $1, $2, $3, $4)
        "#,
    )
    .bind(process_id)
    .bind(hostname)
    .bind(worker_count)
    .bind(listening)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn deregister_locker(conn: &mut PgConnection) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM lockers WHERE pid = pg_backend_pid()")
        .execute(&mut *conn)
        .await?;

    Ok(())
}

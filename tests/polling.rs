mod common;

use chrono::Utc;
use pglocker::db;
use serial_test::serial;
use sqlx::Connection;

use common::{advisory_lock_free, connect_session, insert_job, setup_db};

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn poll_walks_priority_order_and_locks_what_it_returns() {
    let pool = setup_db().await;
    let now = Utc::now();
    let mut ids = Vec::new();
    for priority in [50_i16, 40, 30, 20, 10] {
        ids.push(insert_job(&pool, priority, now).await);
    }
    // Most urgent first: the insertion order reversed.
    ids.reverse();

    let mut conn = connect_session().await;
    let jobs = db::poll_jobs(&mut conn, &[], 3).await.unwrap();

    let polled: Vec<i64> = jobs.iter().map(|j| j.job_id).collect();
    assert_eq!(polled, ids[..3]);

    for job_id in &ids[..3] {
        assert!(!advisory_lock_free(*job_id).await, "returned row not locked");
    }
    for job_id in &ids[3..] {
        assert!(advisory_lock_free(*job_id).await, "skipped row was locked");
    }

    // Session death releases everything.
    conn.close().await.unwrap();
    for job_id in &ids[..3] {
        assert!(advisory_lock_free(*job_id).await, "lock survived session close");
    }
}

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn poll_skips_excluded_ids() {
    let pool = setup_db().await;
    let now = Utc::now();
    let first = insert_job(&pool, 1, now).await;
    let second = insert_job(&pool, 2, now).await;
    let third = insert_job(&pool, 3, now).await;

    let mut conn = connect_session().await;
    let jobs = db::poll_jobs(&mut conn, &[first], 5).await.unwrap();

    let polled: Vec<i64> = jobs.iter().map(|j| j.job_id).collect();
    assert_eq!(polled, vec![second, third]);
    assert!(advisory_lock_free(first).await);

    conn.close().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn poll_passes_over_rows_locked_elsewhere() {
    let pool = setup_db().await;
    let now = Utc::now();
    let contended = insert_job(&pool, 1, now).await;
    let open = insert_job(&pool, 2, now).await;

    let mut holder = connect_session().await;
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(contended)
        .execute(&mut holder)
        .await
        .unwrap();

    let mut conn = connect_session().await;
    let jobs = db::poll_jobs(&mut conn, &[], 5).await.unwrap();

    let polled: Vec<i64> = jobs.iter().map(|j| j.job_id).collect();
    assert_eq!(polled, vec![open]);

    conn.close().await.unwrap();
    holder.close().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn poll_returns_short_batches_when_supply_runs_out() {
    let pool = setup_db().await;
    let now = Utc::now();
    let only = insert_job(&pool, 1, now).await;

    let mut conn = connect_session().await;
    let jobs = db::poll_jobs(&mut conn, &[], 8).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_id, only);
    assert_eq!(jobs[0].priority, 1);

    conn.close().await.unwrap();
}

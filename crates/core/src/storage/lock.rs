use anyhow::Context;
use sqlx::{Connection, PgConnection, PgPool};

/// First half of the two-key advisory lock; the second half is the draw number.
const EVALUATION_CLASS: i32 = 0x4C36_3435; // "L645"

fn lock_keys(draw_number: i32) -> (i32, i32) {
    (EVALUATION_CLASS, draw_number)
}

/// Exclusive claim on evaluating one draw, held for the life of a dedicated session.
///
/// The connection is detached from the pool, so the lock is never handed back to another caller.
/// Dropping the guard closes the session, which also frees the lock.
pub struct DrawLock {
    conn: PgConnection,
    draw_number: i32,
}

impl DrawLock {
    /// `None` when another session already evaluates `draw_number`.
    pub async fn try_acquire(pool: &PgPool, draw_number: i32) -> anyhow::Result<Option<Self>> {
        let mut conn = pool
            .acquire()
            .await
            .context("failed to check out a connection for the draw lock")?
            .detach();
        let (class, key) = lock_keys(draw_number);
        let (granted,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1, $2)")
            .persistent(false)
            .bind(class)
            .bind(key)
            .fetch_one(&mut conn)
            .await
            .with_context(|| format!("draw lock query failed for draw {draw_number}"))?;

        if !granted {
            let _ = conn.close().await;
            return Ok(None);
        }
        Ok(Some(Self { conn, draw_number }))
    }

    pub fn draw_number(&self) -> i32 {
        self.draw_number
    }

    pub async fn release(mut self) -> anyhow::Result<()> {
        let (class, key) = lock_keys(self.draw_number);
        let (released,): (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1, $2)")
            .persistent(false)
            .bind(class)
            .bind(key)
            .fetch_one(&mut self.conn)
            .await
            .with_context(|| format!("draw unlock failed for draw {}", self.draw_number))?;
        if !released {
            tracing::warn!(draw_number = self.draw_number, "draw lock was not held at release");
        }
        self.conn.close().await.context("failed to close draw lock session")?;
        Ok(())
    }
}

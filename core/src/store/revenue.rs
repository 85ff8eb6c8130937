use super::CoreStore;
use crate::{
    error::{CoreError, CoreResult},
    types::{Cents, UnixTs, UserId, VideoId, Window},
};
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueWindowRow {
    pub id:                  Option<i64>,
    pub window_start:        UnixTs,
    pub window_end:          UnixTs,
    pub payment_type:        String,
    pub gross_revenue_cents: Cents,
    pub taxes_cents:         Cents,
    pub fees_cents:          Cents,
    pub refunds_cents:       Cents,
    pub pool_pct:            f64,
    pub margin_target:       f64,
    pub platform_fee_pct:    f64,
    pub risk_reserve_pct:    f64,
    pub costs_est_cents:     Cents,
    pub creator_pool_cents:  Cents,
    pub unallocated_cents:   Cents,
    pub meta:                String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRevShareRow {
    pub id:                Option<i64>,
    pub revenue_window_id: i64,
    pub video_id:          VideoId,
    pub eng_units:         i64,
    pub eis_avg:           f64,
    pub vu:                f64,
    pub share_pct:         f64,
    pub allocated_cents:   Cents,
    pub meta:              String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRow {
    pub id:           i64,
    pub created_at:   UnixTs,
    pub recipient:    UserId,
    pub amount_cents: Cents,
    pub payment_type: String,
    pub status:       String,
    pub direction:    String,
}

/// Holder of a `window_locks` row. Release explicitly; dropping without
/// release leaves the row for operator cleanup, which is the safe side.
#[derive(Debug)]
pub struct WindowLockGuard {
    pub window:       Window,
    pub payment_type: String,
    pub token:        String,
}

impl CoreStore {
    // ── Advisory window lock ───────────────────────────────────

    /// Take the per-(window, payment_type) allocation lock. Fails with
    /// `WindowLocked` while another holder's row exists.
    pub fn acquire_window_lock(
        &self,
        window: Window,
        payment_type: &str,
        now: UnixTs,
    ) -> CoreResult<WindowLockGuard> {
        let token = uuid::Uuid::new_v4().to_string();
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO window_locks
             (window_start, window_end, payment_type, token, acquired_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![window.start, window.end, payment_type, token, now],
        )?;
        if inserted == 0 {
            return Err(CoreError::WindowLocked(format!(
                "{}..{} {payment_type}",
                window.start, window.end
            )));
        }
        Ok(WindowLockGuard {
            window,
            payment_type: payment_type.to_string(),
            token,
        })
    }

    pub fn release_window_lock(&self, guard: WindowLockGuard) -> CoreResult<()> {
        self.conn().execute(
            "DELETE FROM window_locks
             WHERE window_start = ?1 AND window_end = ?2
               AND payment_type = ?3 AND token = ?4",
            params![
                guard.window.start,
                guard.window.end,
                guard.payment_type,
                guard.token
            ],
        )?;
        Ok(())
    }

    // ── Revenue windows ────────────────────────────────────────

    pub fn find_revenue_window(
        &self,
        window: Window,
        payment_type: &str,
    ) -> CoreResult<Option<RevenueWindowRow>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, window_start, window_end, payment_type,
                    gross_revenue_cents, taxes_cents, fees_cents, refunds_cents,
                    pool_pct, margin_target, platform_fee_pct, risk_reserve_pct,
                    costs_est_cents, creator_pool_cents, unallocated_cents, meta
             FROM revenue_windows
             WHERE window_start = ?1 AND window_end = ?2 AND payment_type = ?3",
        )?;
        let row = stmt.query_row(params![window.start, window.end, payment_type], read_window);
        match row {
            Ok(w) => Ok(Some(w)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn insert_revenue_window(&self, w: &RevenueWindowRow) -> CoreResult<i64> {
        self.conn().execute(
            "INSERT INTO revenue_windows (
                window_start, window_end, payment_type,
                gross_revenue_cents, taxes_cents, fees_cents, refunds_cents,
                pool_pct, margin_target, platform_fee_pct, risk_reserve_pct,
                costs_est_cents, creator_pool_cents, unallocated_cents, meta
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            params![
                w.window_start,
                w.window_end,
                w.payment_type,
                w.gross_revenue_cents,
                w.taxes_cents,
                w.fees_cents,
                w.refunds_cents,
                w.pool_pct,
                w.margin_target,
                w.platform_fee_pct,
                w.risk_reserve_pct,
                w.costs_est_cents,
                w.creator_pool_cents,
                w.unallocated_cents,
                w.meta,
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    // ── Video revenue shares ───────────────────────────────────

    pub fn insert_video_rev_share(&self, s: &VideoRevShareRow) -> CoreResult<i64> {
        self.conn().execute(
            "INSERT INTO video_rev_shares (
                revenue_window_id, video_id, eng_units, eis_avg, vu,
                share_pct, allocated_cents, meta
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                s.revenue_window_id,
                s.video_id,
                s.eng_units,
                s.eis_avg,
                s.vu,
                s.share_pct,
                s.allocated_cents,
                s.meta,
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn rev_shares_for_window(&self, revenue_window_id: i64) -> CoreResult<Vec<VideoRevShareRow>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, revenue_window_id, video_id, eng_units, eis_avg, vu,
                    share_pct, allocated_cents, meta
             FROM video_rev_shares
             WHERE revenue_window_id = ?1
             ORDER BY video_id ASC",
        )?;
        let rows = stmt.query_map(params![revenue_window_id], |row| {
            Ok(VideoRevShareRow {
                id: Some(row.get(0)?),
                revenue_window_id: row.get(1)?,
                video_id: row.get(2)?,
                eng_units: row.get(3)?,
                eis_avg: row.get(4)?,
                vu: row.get(5)?,
                share_pct: row.get(6)?,
                allocated_cents: row.get(7)?,
                meta: row.get(8)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Ledger ─────────────────────────────────────────────────

    pub fn insert_inflow(
        &self,
        recipient: UserId,
        amount_cents: Cents,
        payment_type: &str,
        now: UnixTs,
    ) -> CoreResult<i64> {
        self.conn().execute(
            "INSERT INTO transactions
             (created_at, recipient, amount_cents, payment_type, status, direction)
             VALUES (?1, ?2, ?3, ?4, 'pending', 'inflow')",
            params![now, recipient, amount_cents, payment_type],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Compensating delete for a failed finalize. Ledger rows are never
    /// mutated after insert; removal is allowed only for rows the same
    /// run just created.
    pub fn delete_transactions(&self, ids: &[i64]) -> CoreResult<()> {
        let mut stmt = self
            .conn()
            .prepare("DELETE FROM transactions WHERE id = ?1")?;
        for id in ids {
            stmt.execute(params![id])?;
        }
        Ok(())
    }

    pub fn add_to_balance(&self, user_id: UserId, delta: Cents) -> CoreResult<()> {
        let updated = self.conn().execute(
            "UPDATE users SET current_balance_cents = current_balance_cents + ?1
             WHERE id = ?2",
            params![delta, user_id],
        )?;
        if updated == 0 {
            return Err(CoreError::Validation(format!(
                "balance update for unknown user {user_id}"
            )));
        }
        Ok(())
    }

    pub fn transactions_for_recipient(&self, recipient: UserId) -> CoreResult<Vec<TransactionRow>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, created_at, recipient, amount_cents, payment_type, status, direction
             FROM transactions WHERE recipient = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![recipient], read_transaction)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn inflow_count(&self, payment_type: &str) -> CoreResult<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM transactions
             WHERE payment_type = ?1 AND direction = 'inflow'",
            params![payment_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Signed ledger sum for one user: inflows minus outflows.
    pub fn ledger_net_for_user(&self, user_id: UserId) -> CoreResult<Cents> {
        let net = self.conn().query_row(
            "SELECT COALESCE(SUM(CASE direction WHEN 'inflow' THEN amount_cents
                                                 ELSE -amount_cents END), 0)
             FROM transactions WHERE recipient = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(net)
    }
}

fn read_window(row: &rusqlite::Row<'_>) -> rusqlite::Result<RevenueWindowRow> {
    Ok(RevenueWindowRow {
        id: Some(row.get(0)?),
        window_start: row.get(1)?,
        window_end: row.get(2)?,
        payment_type: row.get(3)?,
        gross_revenue_cents: row.get(4)?,
        taxes_cents: row.get(5)?,
        fees_cents: row.get(6)?,
        refunds_cents: row.get(7)?,
        pool_pct: row.get(8)?,
        margin_target: row.get(9)?,
        platform_fee_pct: row.get(10)?,
        risk_reserve_pct: row.get(11)?,
        costs_est_cents: row.get(12)?,
        creator_pool_cents: row.get(13)?,
        unallocated_cents: row.get(14)?,
        meta: row.get(15)?,
    })
}

fn read_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransactionRow> {
    Ok(TransactionRow {
        id: row.get(0)?,
        created_at: row.get(1)?,
        recipient: row.get(2)?,
        amount_cents: row.get(3)?,
        payment_type: row.get(4)?,
        status: row.get(5)?,
        direction: row.get(6)?,
    })
}

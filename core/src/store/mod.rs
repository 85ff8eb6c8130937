//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Pipeline stages call store methods; they never execute SQL directly.

mod aggregate;
mod revenue;

pub use aggregate::AggregateRow;
pub use revenue::{RevenueWindowRow, TransactionRow, VideoRevShareRow, WindowLockGuard};

use crate::{
    error::CoreResult,
    types::{Cents, UnixTs, UserId, VideoId, Window},
};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub struct CoreStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl CoreStore {
    pub fn open(path: &str) -> CoreResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> CoreResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases this returns a new, isolated database.
    pub fn reopen(&self) -> CoreResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> CoreResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_aggregates.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_revenue.sql"))?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Users ──────────────────────────────────────────────────

    pub fn insert_user(&self, u: &UserRow) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO users (
                id, is_creator, likely_bot, kyc_level,
                creator_trust_score, viewer_trust_score, current_balance_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                u.id,
                u.is_creator as i64,
                u.likely_bot as i64,
                u.kyc_level,
                u.creator_trust_score,
                u.viewer_trust_score,
                u.current_balance_cents,
            ],
        )?;
        Ok(())
    }

    pub fn user(&self, id: UserId) -> CoreResult<Option<UserRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, is_creator, likely_bot, kyc_level,
                    creator_trust_score, viewer_trust_score, current_balance_cents
             FROM users WHERE id = ?1",
        )?;
        let row = stmt.query_row(params![id], read_user).map(Some);
        match row {
            Ok(u) => Ok(u),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a set of users in one pass. Ids with no row are simply
    /// absent from the map; callers fall back to trust defaults.
    pub fn users_by_ids(&self, ids: &[UserId]) -> CoreResult<HashMap<UserId, UserRow>> {
        let mut out = HashMap::with_capacity(ids.len());
        let mut stmt = self.conn.prepare(
            "SELECT id, is_creator, likely_bot, kyc_level,
                    creator_trust_score, viewer_trust_score, current_balance_cents
             FROM users WHERE id = ?1",
        )?;
        for &id in ids {
            match stmt.query_row(params![id], read_user) {
                Ok(u) => {
                    out.insert(id, u);
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(out)
    }

    // ── Videos ─────────────────────────────────────────────────

    pub fn insert_video(&self, v: &VideoRow) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO videos (id, creator_id, created_at, duration_s, eis_current, eis_updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                v.id,
                v.creator_id,
                v.created_at,
                v.duration_s,
                v.eis_current,
                v.eis_updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn video(&self, id: VideoId) -> CoreResult<Option<VideoRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, creator_id, created_at, duration_s, eis_current, eis_updated_at
             FROM videos WHERE id = ?1",
        )?;
        match stmt.query_row(params![id], read_video) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn videos_by_ids(&self, ids: &[VideoId]) -> CoreResult<HashMap<VideoId, VideoRow>> {
        let mut out = HashMap::with_capacity(ids.len());
        let mut stmt = self.conn.prepare(
            "SELECT id, creator_id, created_at, duration_s, eis_current, eis_updated_at
             FROM videos WHERE id = ?1",
        )?;
        for &id in ids {
            match stmt.query_row(params![id], read_video) {
                Ok(v) => {
                    out.insert(id, v);
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(out)
    }

    // ── Events ─────────────────────────────────────────────────

    pub fn insert_event(&self, e: &EventRow) -> CoreResult<i64> {
        self.conn.execute(
            "INSERT INTO event (video_id, user_id, event_type, ts, device_id, ip_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                e.video_id,
                e.user_id,
                e.event_type.as_str(),
                e.ts,
                e.device_id,
                e.ip_hash,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// One page of events in `[window.start, window.end)`, ordered by
    /// `(video_id, ts, event_id)`. Keyset pagination: pass the last row's
    /// `(video_id, ts, event_id)` as the cursor for the next page.
    pub fn events_page(
        &self,
        window: Window,
        video_filter: Option<VideoId>,
        cursor: Option<(VideoId, UnixTs, i64)>,
        limit: usize,
    ) -> CoreResult<Vec<EventRow>> {
        let (cv, ct, ce) = cursor.unwrap_or((i64::MIN, i64::MIN, i64::MIN));
        let mut stmt = self.conn.prepare(
            "SELECT event_id, video_id, user_id, event_type, ts, device_id, ip_hash
             FROM event
             WHERE ts >= ?1 AND ts < ?2
               AND (?3 IS NULL OR video_id = ?3)
               AND (video_id, ts, event_id) > (?4, ?5, ?6)
             ORDER BY video_id ASC, ts ASC, event_id ASC
             LIMIT ?7",
        )?;
        let rows = stmt.query_map(
            params![window.start, window.end, video_filter, cv, ct, ce, limit as i64],
            read_event,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Distinct videos with at least one event in the window, ascending.
    pub fn video_ids_with_events(&self, window: Window) -> CoreResult<Vec<VideoId>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT video_id FROM event
             WHERE ts >= ?1 AND ts < ?2
             ORDER BY video_id ASC",
        )?;
        let rows = stmt.query_map(params![window.start, window.end], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Raw event counts per type for one video and window. Used for
    /// EngUnits, which deliberately count every event including the
    /// creator's own.
    pub fn event_type_counts(
        &self,
        video_id: VideoId,
        window: Window,
    ) -> CoreResult<HashMap<EventType, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_type, COUNT(*) FROM event
             WHERE video_id = ?1 AND ts >= ?2 AND ts < ?3
             GROUP BY event_type",
        )?;
        let rows = stmt.query_map(params![video_id, window.start, window.end], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (name, count) = row?;
            if let Some(et) = EventType::parse(&name) {
                out.insert(et, count as u64);
            }
        }
        Ok(out)
    }

    /// View volume and device/IP diversity in a video's first hours,
    /// for the early-velocity kicker.
    pub fn early_view_stats(&self, video_id: VideoId, window: Window) -> CoreResult<EarlyViewStats> {
        let (views, unique_devices, unique_ips) = self.conn.query_row(
            "SELECT COUNT(*),
                    COUNT(DISTINCT device_id),
                    COUNT(DISTINCT ip_hash)
             FROM event
             WHERE video_id = ?1 AND event_type = 'view' AND ts >= ?2 AND ts < ?3",
            params![video_id, window.start, window.end],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )?;
        Ok(EarlyViewStats {
            views: views as u64,
            unique_devices: unique_devices as u64,
            unique_ips: unique_ips as u64,
        })
    }
}

// ── Row types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub id:                    UserId,
    pub is_creator:            bool,
    pub likely_bot:            bool,
    pub kyc_level:             Option<i64>,
    pub creator_trust_score:   Option<f64>,
    pub viewer_trust_score:    Option<f64>,
    pub current_balance_cents: Cents,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRow {
    pub id:             VideoId,
    pub creator_id:     UserId,
    pub created_at:     UnixTs,
    pub duration_s:     f64,
    pub eis_current:    f64,
    pub eis_updated_at: Option<UnixTs>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    View,
    Like,
    Comment,
    Share,
    Report,
    Follow,
    Pause,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Like => "like",
            Self::Comment => "comment",
            Self::Share => "share",
            Self::Report => "report",
            Self::Follow => "follow",
            Self::Pause => "pause",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "view" => Some(Self::View),
            "like" => Some(Self::Like),
            "comment" => Some(Self::Comment),
            "share" => Some(Self::Share),
            "report" => Some(Self::Report),
            "follow" => Some(Self::Follow),
            "pause" => Some(Self::Pause),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub event_id:   i64,
    pub video_id:   VideoId,
    pub user_id:    UserId,
    pub event_type: EventType,
    pub ts:         UnixTs,
    pub device_id:  Option<String>,
    pub ip_hash:    Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EarlyViewStats {
    pub views:          u64,
    pub unique_devices: u64,
    pub unique_ips:     u64,
}

// ── Row readers ────────────────────────────────────────────────

fn read_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        is_creator: row.get::<_, i64>(1)? != 0,
        likely_bot: row.get::<_, i64>(2)? != 0,
        kyc_level: row.get(3)?,
        creator_trust_score: row.get(4)?,
        viewer_trust_score: row.get(5)?,
        current_balance_cents: row.get(6)?,
    })
}

fn read_video(row: &rusqlite::Row<'_>) -> rusqlite::Result<VideoRow> {
    Ok(VideoRow {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        created_at: row.get(2)?,
        duration_s: row.get(3)?,
        eis_current: row.get(4)?,
        eis_updated_at: row.get(5)?,
    })
}

fn read_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    let name: String = row.get(3)?;
    let event_type = EventType::parse(&name).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown event_type '{name}'").into(),
        )
    })?;
    Ok(EventRow {
        event_id: row.get(0)?,
        video_id: row.get(1)?,
        user_id: row.get(2)?,
        event_type,
        ts: row.get(4)?,
        device_id: row.get(5)?,
        ip_hash: row.get(6)?,
    })
}

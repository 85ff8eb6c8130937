use super::CoreStore;
use crate::{
    error::CoreResult,
    types::{UnixTs, VideoId, Window},
};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Persisted per-(video, window) scoring output. The `features` column
/// holds the serialized feature record for explainability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateRow {
    pub video_id:             VideoId,
    pub window_start:         UnixTs,
    pub window_end:           UnixTs,
    pub features:             String,
    pub comment_quality:      f64,
    pub like_integrity:       f64,
    pub report_credibility:   f64,
    pub authentic_engagement: f64,
    pub eis:                  f64,
}

impl CoreStore {
    /// Insert or replace the aggregate for `(video_id, window)`.
    /// Re-analysis of the same window is last-writer-wins.
    pub fn upsert_aggregate(&self, agg: &AggregateRow) -> CoreResult<()> {
        self.conn().execute(
            "INSERT INTO video_aggregates (
                video_id, window_start, window_end, features,
                comment_quality, like_integrity, report_credibility,
                authentic_engagement, eis
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(video_id, window_start, window_end) DO UPDATE SET
                features             = excluded.features,
                comment_quality      = excluded.comment_quality,
                like_integrity       = excluded.like_integrity,
                report_credibility   = excluded.report_credibility,
                authentic_engagement = excluded.authentic_engagement,
                eis                  = excluded.eis",
            params![
                agg.video_id,
                agg.window_start,
                agg.window_end,
                agg.features,
                agg.comment_quality,
                agg.like_integrity,
                agg.report_credibility,
                agg.authentic_engagement,
                agg.eis,
            ],
        )?;
        Ok(())
    }

    pub fn aggregate_for_window(
        &self,
        video_id: VideoId,
        window: Window,
    ) -> CoreResult<Option<AggregateRow>> {
        let mut stmt = self.conn().prepare(
            "SELECT video_id, window_start, window_end, features,
                    comment_quality, like_integrity, report_credibility,
                    authentic_engagement, eis
             FROM video_aggregates
             WHERE video_id = ?1 AND window_start = ?2 AND window_end = ?3",
        )?;
        let row = stmt.query_row(params![video_id, window.start, window.end], |row| {
            Ok(AggregateRow {
                video_id: row.get(0)?,
                window_start: row.get(1)?,
                window_end: row.get(2)?,
                features: row.get(3)?,
                comment_quality: row.get(4)?,
                like_integrity: row.get(5)?,
                report_credibility: row.get(6)?,
                authentic_engagement: row.get(7)?,
                eis: row.get(8)?,
            })
        });
        match row {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Bump the video's latest EIS after an aggregate write.
    pub fn update_video_eis(&self, video_id: VideoId, eis: f64, now: UnixTs) -> CoreResult<()> {
        self.conn().execute(
            "UPDATE videos SET eis_current = ?1, eis_updated_at = ?2 WHERE id = ?3",
            params![eis, now, video_id],
        )?;
        Ok(())
    }

    pub fn aggregate_count(&self, video_id: VideoId) -> CoreResult<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM video_aggregates WHERE video_id = ?1",
            params![video_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

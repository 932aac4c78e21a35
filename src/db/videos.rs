//! Video catalog repository
//!
//! Write operations (insert, upsert-on-path-conflict, batched upsert,
//! deletes, hash/corruption updates) and the filtered/sorted read surface
//! that drives the library views and aggregate statistics.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::StoreError;
use crate::services::metadata::{
    AudioCodec, ContainerFormat, HdrFormat, VideoCodec, VideoMetadata,
};

/// Columns of the videos table, in record order.
const VIDEO_COLUMNS: &str = "id, file_path, file_name, file_size, duration_seconds, video_codec, \
     width, height, frame_rate, bit_rate, bit_depth, hdr_format, audio_codec, audio_channels, \
     is_atmos, is_dtsx, container_format, scan_session_id, scanned_at, file_hash, is_corrupted, \
     corruption_details";

/// One catalogued video file.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VideoRecord {
    pub id: i64,
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub duration_seconds: Option<f64>,
    pub video_codec: VideoCodec,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub frame_rate: Option<f64>,
    pub bit_rate: Option<i64>,
    pub bit_depth: Option<i64>,
    pub hdr_format: HdrFormat,
    pub audio_codec: AudioCodec,
    pub audio_channels: Option<i64>,
    pub is_atmos: bool,
    pub is_dtsx: bool,
    pub container_format: ContainerFormat,
    pub scan_session_id: Option<String>,
    pub scanned_at: DateTime<Utc>,
    pub file_hash: Option<String>,
    pub is_corrupted: bool,
    pub corruption_details: Option<String>,
}

impl VideoRecord {
    /// Resolution band for this record's height, if known.
    pub fn resolution_category(&self) -> Option<ResolutionCategory> {
        self.height.map(ResolutionCategory::from_height)
    }
}

/// Input for creating or replacing a video record.
#[derive(Debug, Clone)]
pub struct CreateVideo {
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub duration_seconds: Option<f64>,
    pub video_codec: VideoCodec,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub frame_rate: Option<f64>,
    pub bit_rate: Option<i64>,
    pub bit_depth: Option<i64>,
    pub hdr_format: HdrFormat,
    pub audio_codec: AudioCodec,
    pub audio_channels: Option<i64>,
    pub is_atmos: bool,
    pub is_dtsx: bool,
    pub container_format: ContainerFormat,
    pub scan_session_id: Option<String>,
}

impl CreateVideo {
    /// Build an insert input from parsed metadata and the owning session.
    pub fn from_metadata(meta: &VideoMetadata, scan_session_id: Option<&str>) -> Self {
        Self {
            file_path: meta.file_path.to_string_lossy().to_string(),
            file_name: meta.file_name.clone(),
            file_size: meta.file_size as i64,
            duration_seconds: meta.duration_seconds,
            video_codec: meta.video_codec,
            width: meta.width,
            height: meta.height,
            frame_rate: meta.frame_rate,
            bit_rate: meta.bit_rate,
            bit_depth: meta.bit_depth,
            hdr_format: meta.hdr_format,
            audio_codec: meta.audio_codec,
            audio_channels: meta.audio_channels,
            is_atmos: meta.is_atmos,
            is_dtsx: meta.is_dtsx,
            container_format: meta.container_format,
            scan_session_id: scan_session_id.map(String::from),
        }
    }
}

/// Named resolution band keyed by image height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionCategory {
    K8,
    K4,
    P1440,
    P1080,
    P720,
    P480,
    P360,
    Sd,
}

impl ResolutionCategory {
    pub const ALL: [ResolutionCategory; 8] = [
        ResolutionCategory::K8,
        ResolutionCategory::K4,
        ResolutionCategory::P1440,
        ResolutionCategory::P1080,
        ResolutionCategory::P720,
        ResolutionCategory::P480,
        ResolutionCategory::P360,
        ResolutionCategory::Sd,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ResolutionCategory::K8 => "8K",
            ResolutionCategory::K4 => "4K",
            ResolutionCategory::P1440 => "1440p",
            ResolutionCategory::P1080 => "1080p",
            ResolutionCategory::P720 => "720p",
            ResolutionCategory::P480 => "480p",
            ResolutionCategory::P360 => "360p",
            ResolutionCategory::Sd => "SD",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.label().eq_ignore_ascii_case(label))
    }

    /// Inclusive lower / exclusive upper height bounds of the band.
    pub fn height_bounds(&self) -> (i64, Option<i64>) {
        match self {
            ResolutionCategory::K8 => (4320, None),
            ResolutionCategory::K4 => (2160, Some(4320)),
            ResolutionCategory::P1440 => (1440, Some(2160)),
            ResolutionCategory::P1080 => (1080, Some(1440)),
            ResolutionCategory::P720 => (720, Some(1080)),
            ResolutionCategory::P480 => (480, Some(720)),
            ResolutionCategory::P360 => (360, Some(480)),
            ResolutionCategory::Sd => (0, Some(360)),
        }
    }

    /// Every height maps to exactly one band.
    pub fn from_height(height: i64) -> Self {
        match height {
            h if h >= 4320 => ResolutionCategory::K8,
            h if h >= 2160 => ResolutionCategory::K4,
            h if h >= 1440 => ResolutionCategory::P1440,
            h if h >= 1080 => ResolutionCategory::P1080,
            h if h >= 720 => ResolutionCategory::P720,
            h if h >= 480 => ResolutionCategory::P480,
            h if h >= 360 => ResolutionCategory::P360,
            _ => ResolutionCategory::Sd,
        }
    }
}

impl std::fmt::Display for ResolutionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Sortable columns of the filtered query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortColumn {
    #[default]
    FileName,
    FileSize,
    Duration,
    Resolution,
    VideoCodec,
    HdrFormat,
    AudioCodec,
    BitRate,
    Container,
}

impl SortColumn {
    fn column_sql(&self) -> &'static str {
        match self {
            SortColumn::FileName => "file_name",
            SortColumn::FileSize => "file_size",
            SortColumn::Duration => "duration_seconds",
            SortColumn::Resolution => "height",
            SortColumn::VideoCodec => "video_codec",
            SortColumn::HdrFormat => "hdr_format",
            SortColumn::AudioCodec => "audio_codec",
            SortColumn::BitRate => "bit_rate",
            SortColumn::Container => "container_format",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "file_name" | "name" => Some(SortColumn::FileName),
            "file_size" | "size" => Some(SortColumn::FileSize),
            "duration" => Some(SortColumn::Duration),
            "resolution" | "height" => Some(SortColumn::Resolution),
            "video_codec" | "codec" => Some(SortColumn::VideoCodec),
            "hdr_format" | "hdr" => Some(SortColumn::HdrFormat),
            "audio_codec" | "audio" => Some(SortColumn::AudioCodec),
            "bit_rate" | "bitrate" => Some(SortColumn::BitRate),
            "container" => Some(SortColumn::Container),
            _ => None,
        }
    }
}

/// Composable filters for the catalog.
///
/// Every filter is optional and combines with AND semantics; resolution
/// categories are OR'd among themselves, and `immersive_audio` is the
/// OR-composed `is_atmos OR is_dtsx` predicate.
#[derive(Debug, Clone, Default)]
pub struct VideoFilter {
    pub search_text: Option<String>,
    pub video_codecs: Vec<VideoCodec>,
    pub hdr_formats: Vec<HdrFormat>,
    pub audio_codecs: Vec<AudioCodec>,
    pub containers: Vec<ContainerFormat>,
    pub resolution_categories: Vec<ResolutionCategory>,
    pub has_atmos: Option<bool>,
    pub has_dtsx: Option<bool>,
    pub immersive_audio: bool,
    pub min_duration: Option<f64>,
    pub max_duration: Option<f64>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub sort: SortColumn,
    pub sort_descending: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Aggregate counts over the whole catalog.
#[derive(Debug, Clone, Default)]
pub struct CatalogStatistics {
    pub total_videos: i64,
    pub total_size_bytes: i64,
    pub total_duration_seconds: f64,
    pub by_video_codec: Vec<(String, i64)>,
    pub by_hdr_format: Vec<(String, i64)>,
    pub by_audio_codec: Vec<(String, i64)>,
    pub by_container: Vec<(String, i64)>,
    pub by_resolution: Vec<(String, i64)>,
    pub atmos_count: i64,
    pub dtsx_count: i64,
}

/// Videos table repository.
pub struct VideoRepository {
    pool: SqlitePool,
}

impl VideoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new record; fails on a duplicate path.
    pub async fn insert(&self, input: &CreateVideo) -> Result<VideoRecord, StoreError> {
        let sql = format!(
            "INSERT INTO videos (file_path, file_name, file_size, duration_seconds, video_codec, \
             width, height, frame_rate, bit_rate, bit_depth, hdr_format, audio_codec, \
             audio_channels, is_atmos, is_dtsx, container_format, scan_session_id, scanned_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {VIDEO_COLUMNS}"
        );
        let record = bind_create(sqlx::query_as::<_, VideoRecord>(&sql), input)
            .fetch_one(&self.pool)
            .await?;
        Ok(record)
    }

    /// Insert or replace on `file_path` conflict.
    ///
    /// The v2 enrichment columns (file_hash, corruption state) are left
    /// untouched on replace; they are maintained by their own operations.
    pub async fn upsert(&self, input: &CreateVideo) -> Result<VideoRecord, StoreError> {
        let sql = format!("{} RETURNING {VIDEO_COLUMNS}", upsert_sql());
        let record = bind_create(sqlx::query_as::<_, VideoRecord>(&sql), input)
            .fetch_one(&self.pool)
            .await?;
        Ok(record)
    }

    /// Upsert a batch atomically in one transaction.
    pub async fn upsert_batch(&self, inputs: &[CreateVideo]) -> Result<(), StoreError> {
        if inputs.is_empty() {
            return Ok(());
        }

        let sql = upsert_sql();
        let mut tx = self.pool.begin().await?;
        for input in inputs {
            bind_create_tail(sqlx::query(&sql), input)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Replace the mutable fields of an existing record.
    pub async fn update(&self, id: i64, input: &CreateVideo) -> Result<bool, StoreError> {
        let result = bind_create_tail(
            sqlx::query(
                "UPDATE videos SET file_path = ?, file_name = ?, file_size = ?, \
                 duration_seconds = ?, video_codec = ?, width = ?, height = ?, frame_rate = ?, \
                 bit_rate = ?, bit_depth = ?, hdr_format = ?, audio_codec = ?, \
                 audio_channels = ?, is_atmos = ?, is_dtsx = ?, container_format = ?, \
                 scan_session_id = ?, scanned_at = ? WHERE id = ?",
            ),
            input,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<VideoRecord>, StoreError> {
        let sql = format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?");
        let record = sqlx::query_as::<_, VideoRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    pub async fn get_by_path(&self, path: &str) -> Result<Option<VideoRecord>, StoreError> {
        let sql = format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE file_path = ?");
        let record = sqlx::query_as::<_, VideoRecord>(&sql)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    pub async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM videos WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_by_session(&self, session_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM videos WHERE scan_session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_all(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM videos").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM videos")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Record a computed content hash.
    pub async fn update_file_hash(&self, id: i64, hash: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE videos SET file_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the outcome of an integrity check.
    pub async fn mark_corruption(
        &self,
        id: i64,
        is_corrupted: bool,
        details: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE videos SET is_corrupted = ?, corruption_details = ? WHERE id = ?")
            .bind(is_corrupted)
            .bind(details)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetch records matching the composed filter.
    pub async fn fetch_filtered(
        &self,
        filter: &VideoFilter,
    ) -> Result<Vec<VideoRecord>, StoreError> {
        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE 1=1"));

        if let Some(text) = filter.search_text.as_deref() {
            if !text.is_empty() {
                qb.push(" AND LOWER(file_name) LIKE ");
                qb.push_bind(format!("%{}%", text.to_lowercase()));
            }
        }

        push_tag_filter(
            &mut qb,
            "video_codec",
            &filter.video_codecs.iter().map(|v| v.as_str()).collect::<Vec<_>>(),
        );
        push_tag_filter(
            &mut qb,
            "hdr_format",
            &filter.hdr_formats.iter().map(|v| v.as_str()).collect::<Vec<_>>(),
        );
        push_tag_filter(
            &mut qb,
            "audio_codec",
            &filter.audio_codecs.iter().map(|v| v.as_str()).collect::<Vec<_>>(),
        );
        push_tag_filter(
            &mut qb,
            "container_format",
            &filter.containers.iter().map(|v| v.as_str()).collect::<Vec<_>>(),
        );

        // Resolution bands OR together, then AND with everything else.
        if !filter.resolution_categories.is_empty() {
            qb.push(" AND (");
            for (i, category) in filter.resolution_categories.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                let (low, high) = category.height_bounds();
                qb.push("(height >= ");
                qb.push_bind(low);
                if let Some(high) = high {
                    qb.push(" AND height < ");
                    qb.push_bind(high);
                }
                qb.push(")");
            }
            qb.push(")");
        }

        if let Some(atmos) = filter.has_atmos {
            qb.push(" AND is_atmos = ");
            qb.push_bind(atmos);
        }
        if let Some(dtsx) = filter.has_dtsx {
            qb.push(" AND is_dtsx = ");
            qb.push_bind(dtsx);
        }
        if filter.immersive_audio {
            qb.push(" AND (is_atmos = 1 OR is_dtsx = 1)");
        }

        if let Some(min) = filter.min_duration {
            qb.push(" AND duration_seconds >= ");
            qb.push_bind(min);
        }
        if let Some(max) = filter.max_duration {
            qb.push(" AND duration_seconds <= ");
            qb.push_bind(max);
        }
        if let Some(min) = filter.min_size {
            qb.push(" AND file_size >= ");
            qb.push_bind(min);
        }
        if let Some(max) = filter.max_size {
            qb.push(" AND file_size <= ");
            qb.push_bind(max);
        }

        qb.push(" ORDER BY ");
        qb.push(filter.sort.column_sql());
        qb.push(if filter.sort_descending { " DESC" } else { " ASC" });

        if filter.limit.is_some() || filter.offset.is_some() {
            qb.push(" LIMIT ");
            qb.push_bind(filter.limit.unwrap_or(-1));
            if let Some(offset) = filter.offset {
                qb.push(" OFFSET ");
                qb.push_bind(offset);
            }
        }

        let records = qb
            .build_query_as::<VideoRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// Aggregate statistics via grouped queries; never streams rows.
    pub async fn fetch_statistics(&self) -> Result<CatalogStatistics, StoreError> {
        let (total_videos, total_size_bytes, total_duration_seconds, atmos_count, dtsx_count): (
            i64,
            i64,
            f64,
            i64,
            i64,
        ) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(file_size), 0), COALESCE(SUM(duration_seconds), 0.0), \
             COALESCE(SUM(is_atmos), 0), COALESCE(SUM(is_dtsx), 0) FROM videos",
        )
        .fetch_one(&self.pool)
        .await?;

        let by_resolution = sqlx::query_as::<_, (String, i64)>(
            "SELECT CASE \
                WHEN height >= 4320 THEN '8K' \
                WHEN height >= 2160 THEN '4K' \
                WHEN height >= 1440 THEN '1440p' \
                WHEN height >= 1080 THEN '1080p' \
                WHEN height >= 720 THEN '720p' \
                WHEN height >= 480 THEN '480p' \
                WHEN height >= 360 THEN '360p' \
                ELSE 'SD' \
             END AS band, COUNT(*) \
             FROM videos WHERE height IS NOT NULL \
             GROUP BY band ORDER BY COUNT(*) DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(CatalogStatistics {
            total_videos,
            total_size_bytes,
            total_duration_seconds,
            by_video_codec: self.group_counts("video_codec").await?,
            by_hdr_format: self.group_counts("hdr_format").await?,
            by_audio_codec: self.group_counts("audio_codec").await?,
            by_container: self.group_counts("container_format").await?,
            by_resolution,
            atmos_count,
            dtsx_count,
        })
    }

    async fn group_counts(&self, column: &str) -> Result<Vec<(String, i64)>, StoreError> {
        let sql = format!(
            "SELECT {column}, COUNT(*) FROM videos GROUP BY {column} ORDER BY COUNT(*) DESC"
        );
        let counts = sqlx::query_as::<_, (String, i64)>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(counts)
    }
}

fn upsert_sql() -> String {
    "INSERT INTO videos (file_path, file_name, file_size, duration_seconds, video_codec, width, \
     height, frame_rate, bit_rate, bit_depth, hdr_format, audio_codec, audio_channels, is_atmos, \
     is_dtsx, container_format, scan_session_id, scanned_at) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
     ON CONFLICT(file_path) DO UPDATE SET \
       file_name = excluded.file_name, \
       file_size = excluded.file_size, \
       duration_seconds = excluded.duration_seconds, \
       video_codec = excluded.video_codec, \
       width = excluded.width, \
       height = excluded.height, \
       frame_rate = excluded.frame_rate, \
       bit_rate = excluded.bit_rate, \
       bit_depth = excluded.bit_depth, \
       hdr_format = excluded.hdr_format, \
       audio_codec = excluded.audio_codec, \
       audio_channels = excluded.audio_channels, \
       is_atmos = excluded.is_atmos, \
       is_dtsx = excluded.is_dtsx, \
       container_format = excluded.container_format, \
       scan_session_id = excluded.scan_session_id, \
       scanned_at = excluded.scanned_at"
        .to_string()
}

fn bind_create<'q>(
    query: sqlx::query::QueryAs<'q, Sqlite, VideoRecord, sqlx::sqlite::SqliteArguments<'q>>,
    input: &'q CreateVideo,
) -> sqlx::query::QueryAs<'q, Sqlite, VideoRecord, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&input.file_path)
        .bind(&input.file_name)
        .bind(input.file_size)
        .bind(input.duration_seconds)
        .bind(input.video_codec)
        .bind(input.width)
        .bind(input.height)
        .bind(input.frame_rate)
        .bind(input.bit_rate)
        .bind(input.bit_depth)
        .bind(input.hdr_format)
        .bind(input.audio_codec)
        .bind(input.audio_channels)
        .bind(input.is_atmos)
        .bind(input.is_dtsx)
        .bind(input.container_format)
        .bind(input.scan_session_id.as_deref())
        .bind(Utc::now())
}

fn bind_create_tail<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    input: &'q CreateVideo,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&input.file_path)
        .bind(&input.file_name)
        .bind(input.file_size)
        .bind(input.duration_seconds)
        .bind(input.video_codec)
        .bind(input.width)
        .bind(input.height)
        .bind(input.frame_rate)
        .bind(input.bit_rate)
        .bind(input.bit_depth)
        .bind(input.hdr_format)
        .bind(input.audio_codec)
        .bind(input.audio_channels)
        .bind(input.is_atmos)
        .bind(input.is_dtsx)
        .bind(input.container_format)
        .bind(input.scan_session_id.as_deref())
        .bind(Utc::now())
}

fn push_tag_filter(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, tags: &[&'static str]) {
    if tags.is_empty() {
        return;
    }
    qb.push(format!(" AND {column} IN ("));
    let mut separated = qb.separated(", ");
    for tag in tags {
        separated.push_bind(*tag);
    }
    qb.push(")");
}

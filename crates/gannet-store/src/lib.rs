//! The persistent metadata store: indexes, packages, releases, builds and
//! compiled requirement sets, plus the durable task queue.
//!
//! All writes go through the named transitions on [`MetadataStore`]; rows
//! are only ever mutated here. Uniqueness is enforced by the schema
//! (`platform.slug`, `backing_index.slug`, `(package.slug, index)`,
//! `(release.package, version)`, `(build.release, platform)`).

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::debug;

use gannet_normalize::PackageName;

pub use crate::models::{
    BackingIndex, Build, BuildDetail, BuildRecord, CompilationStatus, CompiledRequirements,
    IndexBackendKind, Package, ParseKindError, Platform, PlatformKind, QueuedTask, Release,
};

mod models;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid JSON in {0} column")]
    BadJson(&'static str, #[source] serde_json::Error),
}

/// A handle to the SQLite-backed metadata store.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open (creating if missing) the database at the given URL and apply
    /// pending migrations.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// An in-memory store, for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        // A single connection, or every handle would see its own database.
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // Platforms

    pub async fn create_platform(
        &self,
        slug: &str,
        kind: PlatformKind,
        spec: &serde_json::Value,
    ) -> Result<Platform, StoreError> {
        let spec_text = spec.to_string();
        sqlx::query("INSERT INTO platform (slug, kind, spec) VALUES (?1, ?2, ?3)")
            .bind(slug)
            .bind(kind)
            .bind(&spec_text)
            .execute(&self.pool)
            .await?;
        self.platform_by_slug(slug).await
    }

    pub async fn platform_by_slug(&self, slug: &str) -> Result<Platform, StoreError> {
        sqlx::query_as::<_, Platform>("SELECT * FROM platform WHERE slug = ?1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("platform"))
    }

    pub async fn platform_by_id(&self, id: i64) -> Result<Platform, StoreError> {
        sqlx::query_as::<_, Platform>("SELECT * FROM platform WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("platform"))
    }

    pub async fn platforms(&self) -> Result<Vec<Platform>, StoreError> {
        Ok(
            sqlx::query_as::<_, Platform>("SELECT * FROM platform ORDER BY slug")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    // Backing indexes

    pub async fn create_index(
        &self,
        slug: &str,
        url: &str,
        backend: IndexBackendKind,
    ) -> Result<BackingIndex, StoreError> {
        sqlx::query("INSERT INTO backing_index (slug, url, backend) VALUES (?1, ?2, ?3)")
            .bind(slug)
            .bind(url)
            .bind(backend)
            .execute(&self.pool)
            .await?;
        self.index_by_slug(slug).await
    }

    pub async fn index_by_slug(&self, slug: &str) -> Result<BackingIndex, StoreError> {
        sqlx::query_as::<_, BackingIndex>("SELECT * FROM backing_index WHERE slug = ?1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("backing index"))
    }

    pub async fn index_by_id(&self, id: i64) -> Result<BackingIndex, StoreError> {
        sqlx::query_as::<_, BackingIndex>("SELECT * FROM backing_index WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("backing index"))
    }

    /// Advance the sync watermark. The update is monotonic: a serial at or
    /// below the stored one is a no-op.
    pub async fn advance_update_serial(&self, index_id: i64, serial: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE backing_index SET last_update_serial = ?2 \
             WHERE id = ?1 AND (last_update_serial IS NULL OR last_update_serial < ?2)",
        )
        .bind(index_id)
        .bind(serial)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // Packages

    pub async fn get_or_create_package(
        &self,
        index_id: i64,
        display_name: &str,
        slug: &PackageName,
    ) -> Result<Package, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO package (name, slug, index_id) VALUES (?1, ?2, ?3) \
             ON CONFLICT (slug, index_id) DO NOTHING",
        )
        .bind(display_name)
        .bind(slug.as_str())
        .bind(index_id)
        .execute(&mut *tx)
        .await?;
        let package =
            sqlx::query_as::<_, Package>("SELECT * FROM package WHERE slug = ?1 AND index_id = ?2")
                .bind(slug.as_str())
                .bind(index_id)
                .fetch_one(&mut *tx)
                .await?;
        tx.commit().await?;
        Ok(package)
    }

    pub async fn package_by_slug(
        &self,
        index_id: i64,
        slug: &PackageName,
    ) -> Result<Option<Package>, StoreError> {
        Ok(
            sqlx::query_as::<_, Package>("SELECT * FROM package WHERE slug = ?1 AND index_id = ?2")
                .bind(slug.as_str())
                .bind(index_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Delete a package row, cascading to its releases and builds. Returns
    /// whether a row was deleted.
    pub async fn delete_package(
        &self,
        index_id: i64,
        slug: &PackageName,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM package WHERE slug = ?1 AND index_id = ?2")
            .bind(slug.as_str())
            .bind(index_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // Releases

    /// Create or update the release for `(package, version)`, setting the
    /// upstream URL and digest.
    pub async fn upsert_release(
        &self,
        package_id: i64,
        version: &str,
        url: &str,
        md5_digest: &str,
    ) -> Result<Release, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO release (package_id, version, url, md5_digest) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (package_id, version) \
             DO UPDATE SET url = excluded.url, md5_digest = excluded.md5_digest",
        )
        .bind(package_id)
        .bind(version)
        .bind(url)
        .bind(md5_digest)
        .execute(&mut *tx)
        .await?;
        let release = sqlx::query_as::<_, Release>(
            "SELECT * FROM release WHERE package_id = ?1 AND version = ?2",
        )
        .bind(package_id)
        .bind(version)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(release)
    }

    pub async fn release_by_version(
        &self,
        package_id: i64,
        version: &str,
    ) -> Result<Option<Release>, StoreError> {
        Ok(sqlx::query_as::<_, Release>(
            "SELECT * FROM release WHERE package_id = ?1 AND version = ?2",
        )
        .bind(package_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn releases_for_package(&self, package_id: i64) -> Result<Vec<Release>, StoreError> {
        Ok(
            sqlx::query_as::<_, Release>("SELECT * FROM release WHERE package_id = ?1")
                .bind(package_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Delete all releases of a package except the given ones, cascading to
    /// their builds. Used by sync reconciliation to drop vanished versions.
    pub async fn delete_releases_except(
        &self,
        package_id: i64,
        keep: &[i64],
    ) -> Result<u64, StoreError> {
        let sql = if keep.is_empty() {
            "DELETE FROM release WHERE package_id = ?".to_string()
        } else {
            let placeholders = std::iter::repeat("?")
                .take(keep.len())
                .collect::<Vec<_>>()
                .join(", ");
            format!("DELETE FROM release WHERE package_id = ? AND id NOT IN ({placeholders})")
        };
        let mut query = sqlx::query(&sql).bind(package_id);
        for id in keep {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await?;
        if result.rows_affected() > 0 {
            debug!(
                package_id,
                removed = result.rows_affected(),
                "removed outdated releases"
            );
        }
        Ok(result.rows_affected())
    }

    /// Blob paths of all built artifacts of a package, optionally limited
    /// to releases outside the keep set. Collected before a cascade so the
    /// blobs can be removed with their rows.
    pub async fn artifact_blobs_except(
        &self,
        package_id: i64,
        keep: &[i64],
    ) -> Result<Vec<String>, StoreError> {
        let sql = if keep.is_empty() {
            "SELECT b.artifact_blob FROM build b \
             JOIN release r ON r.id = b.release_id \
             WHERE r.package_id = ? AND b.artifact_blob IS NOT NULL"
                .to_string()
        } else {
            let placeholders = std::iter::repeat("?")
                .take(keep.len())
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "SELECT b.artifact_blob FROM build b \
                 JOIN release r ON r.id = b.release_id \
                 WHERE r.package_id = ? AND b.artifact_blob IS NOT NULL \
                 AND r.id NOT IN ({placeholders})"
            )
        };
        let mut query = sqlx::query_scalar::<_, String>(&sql).bind(package_id);
        for id in keep {
            query = query.bind(id);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    // Builds

    pub async fn get_or_create_build(
        &self,
        release_id: i64,
        platform_id: i64,
    ) -> Result<Build, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO build (release_id, platform_id) VALUES (?1, ?2) \
             ON CONFLICT (release_id, platform_id) DO NOTHING",
        )
        .bind(release_id)
        .bind(platform_id)
        .execute(&mut *tx)
        .await?;
        let build = sqlx::query_as::<_, Build>(
            "SELECT * FROM build WHERE release_id = ?1 AND platform_id = ?2",
        )
        .bind(release_id)
        .bind(platform_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(build)
    }

    /// Fetch a build together with its release, package, index and
    /// platform.
    pub async fn build_detail(&self, build_id: i64) -> Result<Option<BuildDetail>, StoreError> {
        let row = sqlx::query(&format!("{DETAIL_QUERY} WHERE b.id = ?1"))
            .bind(build_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| detail_from_row(&row)).transpose()
    }

    /// Fallback build lookup by the full coordinate tuple, for download
    /// requests whose build id is stale.
    pub async fn find_build_detail(
        &self,
        index_slug: &str,
        platform_slug: &str,
        package_slug: &PackageName,
        version: &str,
    ) -> Result<Option<BuildDetail>, StoreError> {
        let row = sqlx::query(&format!(
            "{DETAIL_QUERY} \
             WHERE i.slug = ?1 AND pl.slug = ?2 AND p.slug = ?3 AND r.version = ?4"
        ))
        .bind(index_slug)
        .bind(platform_slug)
        .bind(package_slug.as_str())
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| detail_from_row(&row)).transpose()
    }

    /// All releases of a package with their builds (if any) for one
    /// platform. Version ordering is up to the caller; version strings do
    /// not sort lexically.
    pub async fn listed_builds(
        &self,
        package_id: i64,
        platform_id: i64,
    ) -> Result<Vec<(Release, Option<Build>)>, StoreError> {
        let rows = sqlx::query(
            "SELECT r.id AS r_id, r.package_id AS r_package_id, r.version AS r_version, \
                    r.url AS r_url, r.md5_digest AS r_md5_digest, \
                    b.id AS b_id, b.artifact_blob AS b_artifact_blob, \
                    b.md5_digest AS b_md5_digest, b.filesize AS b_filesize, \
                    b.build_timestamp AS b_build_timestamp, \
                    b.build_duration AS b_build_duration, b.metadata AS b_metadata, \
                    b.build_log AS b_build_log \
             FROM release r \
             LEFT JOIN build b ON b.release_id = r.id AND b.platform_id = ?2 \
             WHERE r.package_id = ?1",
        )
        .bind(package_id)
        .bind(platform_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let release = Release {
                    id: row.try_get("r_id")?,
                    package_id: row.try_get("r_package_id")?,
                    version: row.try_get("r_version")?,
                    url: row.try_get("r_url")?,
                    md5_digest: row.try_get("r_md5_digest")?,
                };
                let build = match row.try_get::<Option<i64>, _>("b_id")? {
                    Some(id) => Some(Build {
                        id,
                        release_id: release.id,
                        platform_id,
                        artifact_blob: row.try_get("b_artifact_blob")?,
                        md5_digest: row.try_get("b_md5_digest")?,
                        filesize: row.try_get("b_filesize")?,
                        build_timestamp: row.try_get("b_build_timestamp")?,
                        build_duration: row.try_get("b_build_duration")?,
                        metadata: parse_json_column(row.try_get("b_metadata")?)?,
                        build_log: row.try_get("b_build_log")?,
                    }),
                    None => None,
                };
                Ok((release, build))
            })
            .collect()
    }

    /// Commit a successful build: artifact reference, digest, size, timing,
    /// extracted metadata and log, all at once. Re-entry via `force` only
    /// replaces the previous artifact reference here, atomically.
    pub async fn commit_build(&self, build_id: i64, record: &BuildRecord) -> Result<(), StoreError> {
        let metadata = record.metadata.to_string();
        let result = sqlx::query(
            "UPDATE build SET artifact_blob = ?2, md5_digest = ?3, filesize = ?4, \
             build_timestamp = ?5, build_duration = ?6, metadata = ?7, build_log = ?8 \
             WHERE id = ?1",
        )
        .bind(build_id)
        .bind(&record.artifact_blob)
        .bind(&record.md5_digest)
        .bind(record.filesize)
        .bind(record.build_timestamp)
        .bind(record.build_duration)
        .bind(&metadata)
        .bind(&record.build_log)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("build"));
        }
        Ok(())
    }

    /// Record a failed build attempt: only the log changes; the artifact
    /// reference (if any) is left alone.
    pub async fn record_build_log(&self, build_id: i64, log: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE build SET build_log = ?2 WHERE id = ?1")
            .bind(build_id)
            .bind(log)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // Compiled requirements

    pub async fn create_compiled(
        &self,
        platform_id: i64,
        requirements: &str,
    ) -> Result<CompiledRequirements, StoreError> {
        let created_at = jiff::Timestamp::now().as_second();
        let result = sqlx::query(
            "INSERT INTO compiled_requirements (platform_id, requirements, created_at) \
             VALUES (?1, ?2, ?3)",
        )
        .bind(platform_id)
        .bind(requirements)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        self.compiled_by_id(result.last_insert_rowid())
            .await?
            .ok_or(StoreError::NotFound("compiled requirements"))
    }

    pub async fn compiled_by_id(
        &self,
        id: i64,
    ) -> Result<Option<CompiledRequirements>, StoreError> {
        Ok(sqlx::query_as::<_, CompiledRequirements>(
            "SELECT * FROM compiled_requirements WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn finish_compiled(
        &self,
        id: i64,
        status: CompilationStatus,
        compiled: Option<&str>,
        log: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE compiled_requirements \
             SET status = ?2, compiled_requirements = ?3, compilation_log = ?4 WHERE id = ?1",
        )
        .bind(id)
        .bind(status)
        .bind(compiled)
        .bind(log)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // Task queue

    pub async fn enqueue_task(
        &self,
        kind: &str,
        payload: &str,
        run_at: i64,
    ) -> Result<i64, StoreError> {
        let created_at = jiff::Timestamp::now().as_second();
        let result = sqlx::query(
            "INSERT INTO task_queue (kind, payload, run_at, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(kind)
        .bind(payload)
        .bind(run_at)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Atomically claim the next due task, pushing its `run_at` out by the
    /// lease so a crashed worker re-delivers instead of losing it.
    pub async fn claim_due_task(
        &self,
        now: i64,
        lease_seconds: i64,
    ) -> Result<Option<QueuedTask>, StoreError> {
        Ok(sqlx::query_as::<_, QueuedTask>(
            "UPDATE task_queue SET attempts = attempts + 1, run_at = ?1 + ?2 \
             WHERE id = (SELECT id FROM task_queue WHERE run_at <= ?1 ORDER BY run_at, id LIMIT 1) \
             RETURNING *",
        )
        .bind(now)
        .bind(lease_seconds)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn delete_task(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM task_queue WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn reschedule_task(&self, id: i64, run_at: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE task_queue SET run_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(run_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

const DETAIL_QUERY: &str = "SELECT \
    b.id AS b_id, b.release_id AS b_release_id, b.platform_id AS b_platform_id, \
    b.artifact_blob AS b_artifact_blob, b.md5_digest AS b_md5_digest, \
    b.filesize AS b_filesize, b.build_timestamp AS b_build_timestamp, \
    b.build_duration AS b_build_duration, b.metadata AS b_metadata, \
    b.build_log AS b_build_log, \
    r.id AS r_id, r.package_id AS r_package_id, r.version AS r_version, \
    r.url AS r_url, r.md5_digest AS r_md5_digest, \
    p.id AS p_id, p.name AS p_name, p.slug AS p_slug, p.index_id AS p_index_id, \
    i.id AS i_id, i.slug AS i_slug, i.url AS i_url, i.backend AS i_backend, \
    i.last_update_serial AS i_last_update_serial, \
    pl.id AS pl_id, pl.slug AS pl_slug, pl.kind AS pl_kind, pl.spec AS pl_spec \
    FROM build b \
    JOIN release r ON r.id = b.release_id \
    JOIN package p ON p.id = r.package_id \
    JOIN backing_index i ON i.id = p.index_id \
    JOIN platform pl ON pl.id = b.platform_id";

fn detail_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<BuildDetail, StoreError> {
    Ok(BuildDetail {
        build: Build {
            id: row.try_get("b_id")?,
            release_id: row.try_get("b_release_id")?,
            platform_id: row.try_get("b_platform_id")?,
            artifact_blob: row.try_get("b_artifact_blob")?,
            md5_digest: row.try_get("b_md5_digest")?,
            filesize: row.try_get("b_filesize")?,
            build_timestamp: row.try_get("b_build_timestamp")?,
            build_duration: row.try_get("b_build_duration")?,
            metadata: parse_json_column(row.try_get("b_metadata")?)?,
            build_log: row.try_get("b_build_log")?,
        },
        release: Release {
            id: row.try_get("r_id")?,
            package_id: row.try_get("r_package_id")?,
            version: row.try_get("r_version")?,
            url: row.try_get("r_url")?,
            md5_digest: row.try_get("r_md5_digest")?,
        },
        package: Package {
            id: row.try_get("p_id")?,
            name: row.try_get("p_name")?,
            slug: row.try_get("p_slug")?,
            index_id: row.try_get("p_index_id")?,
        },
        index: BackingIndex {
            id: row.try_get("i_id")?,
            slug: row.try_get("i_slug")?,
            url: row.try_get("i_url")?,
            backend: row.try_get("i_backend")?,
            last_update_serial: row.try_get("i_last_update_serial")?,
        },
        platform: Platform {
            id: row.try_get("pl_id")?,
            slug: row.try_get("pl_slug")?,
            kind: row.try_get("pl_kind")?,
            spec: parse_json_column(row.try_get("pl_spec")?)?
                .unwrap_or(serde_json::Value::Null),
        },
    })
}

fn parse_json_column(text: Option<String>) -> Result<Option<serde_json::Value>, StoreError> {
    text.map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(|err| StoreError::BadJson("metadata", err))
}

// src/database.rs
use crate::models::Job;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::path::PathBuf;

/// Opens the history database named by `DATABASE_URL`, or a file under the
/// user's data directory when it is unset.
pub async fn init_db(database_url: Option<&str>) -> Result<SqlitePool, sqlx::Error> {
    if let Some(url) = database_url.filter(|u| is_memory_url(u)) {
        log::info!("Using in-memory database; history is lost on restart");
        return init_memory_pool(url).await;
    }

    let db_path = get_db_path(database_url)?;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
    }

    let absolute_path = if db_path.is_relative() {
        std::env::current_dir().map_err(sqlx::Error::Io)?.join(&db_path)
    } else {
        db_path
    };

    log::info!("Database file path: {}", absolute_path.display());
    init_pool(&format!("sqlite://{}?mode=rwc", absolute_path.display())).await
}

/// Connects to `db_url` and runs the migrations.
pub async fn init_pool(db_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    log::info!("Database migrations completed");

    Ok(pool)
}

fn is_memory_url(url: &str) -> bool {
    url.starts_with("sqlite:") && (url.contains(":memory:") || url.contains("mode=memory"))
}

/// Each connection to an in-memory database is its own database, so the pool
/// holds exactly one that never expires.
async fn init_memory_pool(db_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect(db_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

fn get_db_path(database_url: Option<&str>) -> Result<PathBuf, sqlx::Error> {
    match database_url {
        Some(url) => {
            let path = url
                .strip_prefix("sqlite://")
                .or_else(|| url.strip_prefix("sqlite:"))
                .ok_or_else(|| sqlx::Error::Configuration("DATABASE_URL must start with 'sqlite:'".into()))?;
            Ok(PathBuf::from(path))
        }
        None => {
            let base = dirs::data_local_dir()
                .ok_or_else(|| sqlx::Error::Configuration("no data directory; set DATABASE_URL".into()))?;
            Ok(base.join("codebox").join("codebox.db"))
        }
    }
}

pub async fn save_execution(pool: &SqlitePool, job: &Job, code: &str) -> Result<(), sqlx::Error> {
    let result = job.result.as_ref();
    let error_message = result
        .and_then(|r| r.error.clone())
        .or_else(|| job.error.clone());

    sqlx::query(
        r#"
        INSERT OR REPLACE INTO executions (id, status, project_name, language, code, success, output, stderr, error_message, exit_code, timed_out, execution_time, created_at, finished_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    )
    .bind(&job.id)
    .bind(job.status.to_string())
    .bind(&job.project_name)
    .bind(&job.language)
    .bind(code)
    .bind(result.map(|r| r.success).unwrap_or(false))
    .bind(result.map(|r| r.output.clone()))
    .bind(result.map(|r| r.stderr.clone()))
    .bind(&error_message)
    .bind(result.and_then(|r| r.exit_code))
    .bind(result.map(|r| r.timed_out).unwrap_or(false))
    .bind(result.map(|r| r.execution_time).unwrap_or(0.0))
    .bind(&job.created_at)
    .bind(&job.finished_at)
    .execute(pool)
    .await?;

    Ok(())
}

const SELECT_COLUMNS: &str = "SELECT id, status, project_name, language, code, success, output, stderr, error_message, exit_code, timed_out, execution_time, created_at, finished_at FROM executions";

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> HistoryEntry {
    HistoryEntry {
        id: row.get(0),
        status: row.get(1),
        project_name: row.get(2),
        language: row.get(3),
        code: row.get(4),
        success: row.get(5),
        output: row.get(6),
        stderr: row.get(7),
        error_message: row.get(8),
        exit_code: row.get(9),
        timed_out: row.get(10),
        execution_time: row.get(11),
        created_at: row.get(12),
        finished_at: row.get(13),
    }
}

/// Newest first, at most `limit` rows.
pub async fn get_all_executions(pool: &SqlitePool, limit: i64) -> Result<Vec<HistoryEntry>, sqlx::Error> {
    let rows = sqlx::query(&format!("{} ORDER BY created_at DESC LIMIT ?", SELECT_COLUMNS))
        .bind(limit)
        .fetch_all(pool)
        .await?;

    Ok(rows.iter().map(row_to_entry).collect())
}

pub async fn get_execution(pool: &SqlitePool, id: &str) -> Result<Option<HistoryEntry>, sqlx::Error> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(row_to_entry))
}

#[derive(serde::Serialize, Clone, Debug)]
pub struct HistoryEntry {
    pub id: String,
    pub status: String,
    pub project_name: String,
    pub language: String,
    pub code: String,
    pub success: bool,
    pub output: Option<String>,
    pub stderr: Option<String>,
    pub error_message: Option<String>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub execution_time: f64,
    pub created_at: String,
    pub finished_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionResult, JobStatus};

    async fn memory_pool() -> SqlitePool {
        init_db(Some("sqlite::memory:")).await.unwrap()
    }

    fn job(id: &str, created_at: &str, result: Option<ExecutionResult>) -> Job {
        Job {
            id: id.to_string(),
            project_name: "demo".to_string(),
            language: "python".to_string(),
            status: result.as_ref().map(JobStatus::from_result).unwrap_or(JobStatus::Failed),
            result,
            error: None,
            created_at: created_at.to_string(),
            finished_at: Some(created_at.to_string()),
        }
    }

    #[tokio::test]
    async fn test_save_and_load_history() {
        let pool = memory_pool().await;
        let ok = ExecutionResult {
            success: true,
            output: "hi\n".to_string(),
            exit_code: Some(0),
            execution_time: 0.25,
            ..Default::default()
        };
        save_execution(&pool, &job("a", "2025-01-01T00:00:00+00:00", Some(ok)), "print('hi')").await.unwrap();
        save_execution(
            &pool,
            &job("b", "2025-01-02T00:00:00+00:00", Some(ExecutionResult::failed("Exit code: 1", 0.1))),
            "raise",
        )
        .await
        .unwrap();

        let history = get_all_executions(&pool, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, "b");
        assert_eq!(history[0].status, "failed");
        assert_eq!(history[0].error_message.as_deref(), Some("Exit code: 1"));
        assert_eq!(history[1].output.as_deref(), Some("hi\n"));
        assert!(history[1].success);

        let one = get_execution(&pool, "a").await.unwrap().unwrap();
        assert_eq!(one.code, "print('hi')");
        assert!(get_execution(&pool, "missing").await.unwrap().is_none());
    }

    #[test]
    fn test_db_path_from_url() {
        assert_eq!(get_db_path(Some("sqlite:data/x.db")).unwrap(), PathBuf::from("data/x.db"));
        assert_eq!(get_db_path(Some("sqlite:///tmp/x.db")).unwrap(), PathBuf::from("/tmp/x.db"));
        assert!(get_db_path(Some("postgres://x")).is_err());
    }

    #[tokio::test]
    async fn test_memory_url_does_not_touch_the_filesystem() {
        assert!(is_memory_url("sqlite::memory:"));
        assert!(is_memory_url("sqlite://file:history?mode=memory&cache=shared"));
        assert!(!is_memory_url("sqlite:data/x.db"));

        let pool = init_db(Some("sqlite::memory:")).await.unwrap();
        assert!(get_all_executions(&pool, 10).await.unwrap().is_empty());
        assert!(!std::path::Path::new(":memory:").exists());
    }
}

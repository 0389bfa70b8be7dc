//! SQLite 저장소
//!
//! 단일 연결을 `Mutex`로 감싸고, 모든 쿼리는 `spawn_blocking`에서 실행합니다.
//! 시각은 RFC 3339 문자열로 저장합니다.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use logwarden_core::event::{Event, SensorState};
use logwarden_core::types::Country;

use crate::error::LogPipelineError;

use super::EventStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    created_at TEXT,
    detected_at TEXT NOT NULL,
    happened_at TEXT,
    node_name TEXT NOT NULL,
    address TEXT NOT NULL,
    country_code TEXT NOT NULL DEFAULT '',
    country_name TEXT NOT NULL DEFAULT '',
    sensor TEXT NOT NULL,
    rule TEXT NOT NULL,
    payload TEXT NOT NULL,
    reported_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_events_reported_at ON events(reported_at);
CREATE INDEX IF NOT EXISTS idx_events_address ON events(address);

CREATE TABLE IF NOT EXISTS sensor_states (
    node_name TEXT NOT NULL,
    sensor_name TEXT NOT NULL,
    last_position INTEGER NOT NULL,
    PRIMARY KEY (node_name, sensor_name)
);
"#;

const EVENT_COLUMNS: &str = "id, created_at, detected_at, happened_at, node_name, address, \
     country_code, country_name, sensor, rule, payload, reported_at";

/// SQLite 기반 [`EventStore`]
#[derive(Clone)]
pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventStore {
    /// 데이터베이스 파일을 엽니다. 없으면 생성합니다.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogPipelineError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            LogPipelineError::Storage(format!("open {}: {e}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), "opened event database");
        Ok(Self::from_connection(conn))
    }

    /// 메모리 데이터베이스를 엽니다.
    pub fn open_in_memory() -> Result<Self, LogPipelineError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// 연결을 잠그고 블로킹 스레드에서 `f`를 실행합니다.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, LogPipelineError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, LogPipelineError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| LogPipelineError::Storage("connection mutex poisoned".to_owned()))?;
            f(&guard)
        })
        .await
        .map_err(|e| LogPipelineError::Storage(format!("storage task failed: {e}")))?
    }
}

fn to_text(at: &DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn from_text(value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn optional_time(value: Option<String>) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    value.as_deref().map(from_text).transpose()
}

fn row_to_event(row: &Row<'_>) -> Result<Event, rusqlite::Error> {
    let detected_at: String = row.get(2)?;
    Ok(Event {
        id: row.get(0)?,
        created_at: optional_time(row.get(1)?)?,
        detected_at: from_text(&detected_at)?,
        happened_at: optional_time(row.get(3)?)?,
        node_name: row.get(4)?,
        address: row.get(5)?,
        country_code: row.get(6)?,
        country_name: row.get(7)?,
        sensor: row.get(8)?,
        rule: row.get(9)?,
        payload: row.get(10)?,
        reported_at: optional_time(row.get(11)?)?,
    })
}

fn position_to_sql(position: u64) -> Result<i64, LogPipelineError> {
    i64::try_from(position)
        .map_err(|_| LogPipelineError::Storage(format!("position {position} out of range")))
}

fn query_events(conn: &Connection, filter: &str) -> Result<Vec<Event>, LogPipelineError> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events {filter} ORDER BY detected_at");
    let mut stmt = conn.prepare(&sql)?;
    let events = stmt
        .query_map([], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

impl EventStore for SqliteEventStore {
    async fn migrate(&self) -> Result<(), LogPipelineError> {
        self.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
    }

    async fn insert_event(&self, event: &Event) -> Result<(), LogPipelineError> {
        let event = event.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO events (id, created_at, detected_at, happened_at, node_name, \
                 address, country_code, country_name, sensor, rule, payload, reported_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    event.id,
                    event.created_at.as_ref().map(to_text),
                    to_text(&event.detected_at),
                    event.happened_at.as_ref().map(to_text),
                    event.node_name,
                    event.address,
                    event.country_code,
                    event.country_name,
                    event.sensor,
                    event.rule,
                    event.payload,
                    event.reported_at.as_ref().map(to_text),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn unreported_events(&self) -> Result<Vec<Event>, LogPipelineError> {
        self.with_conn(|conn| query_events(conn, "WHERE reported_at IS NULL"))
            .await
    }

    async fn mark_reported(
        &self,
        event_id: &str,
        reported_at: DateTime<Utc>,
    ) -> Result<(), LogPipelineError> {
        let id = event_id.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE events SET reported_at = ?1 WHERE id = ?2",
                params![to_text(&reported_at), id],
            )?;
            Ok(())
        })
        .await
    }

    async fn all_events(&self) -> Result<Vec<Event>, LogPipelineError> {
        self.with_conn(|conn| query_events(conn, "")).await
    }

    async fn update_location(
        &self,
        event_id: &str,
        country: &Country,
    ) -> Result<(), LogPipelineError> {
        let id = event_id.to_owned();
        let country = country.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE events SET country_code = ?1, country_name = ?2 WHERE id = ?3",
                params![country.code, country.name, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn sensor_state(
        &self,
        node_name: &str,
        sensor_name: &str,
    ) -> Result<Option<SensorState>, LogPipelineError> {
        let node = node_name.to_owned();
        let sensor = sensor_name.to_owned();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT node_name, sensor_name, last_position FROM sensor_states \
                     WHERE node_name = ?1 AND sensor_name = ?2",
                    params![node, sensor],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(node_name, sensor_name, position)| {
                let last_position = u64::try_from(position).map_err(|_| {
                    LogPipelineError::Storage(format!("negative position {position}"))
                })?;
                Ok(SensorState {
                    node_name,
                    sensor_name,
                    last_position,
                })
            })
            .transpose()
        })
        .await
    }

    async fn create_sensor_state(&self, state: &SensorState) -> Result<(), LogPipelineError> {
        let state = state.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sensor_states (node_name, sensor_name, last_position) \
                 VALUES (?1, ?2, ?3)",
                params![
                    state.node_name,
                    state.sensor_name,
                    position_to_sql(state.last_position)?
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_sensor_state(&self, state: &SensorState) -> Result<(), LogPipelineError> {
        let state = state.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE sensor_states SET last_position = ?1 \
                 WHERE node_name = ?2 AND sensor_name = ?3",
                params![
                    position_to_sql(state.last_position)?,
                    state.node_name,
                    state.sensor_name
                ],
            )?;
            Ok(())
        })
        .await
    }
}

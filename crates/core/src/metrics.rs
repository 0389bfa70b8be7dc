//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 센서와 집계기는 이 상수로 `metrics::counter!()` 등을 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logwarden_`
//! - 구성요소: `sensor_`, `aggregator_`, `report_`
//! - 접미어: `_total` (counter), `_seconds` (histogram), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 센서 이름 레이블 키
pub const LABEL_SENSOR: &str = "sensor";

/// 규칙 이름 레이블 키
pub const LABEL_RULE: &str = "rule";

// ─── Sensor 메트릭 ─────────────────────────────────────────────────

/// Sensor: 스캔한 라인 수 (counter, label: sensor)
pub const SENSOR_LINES_SCANNED_TOTAL: &str = "logwarden_sensor_lines_scanned_total";

/// Sensor: 파서에 매칭된 라인 수 (counter, label: sensor)
pub const SENSOR_LINES_PARSED_TOTAL: &str = "logwarden_sensor_lines_parsed_total";

/// Sensor: 생성한 이벤트 수 (counter, labels: sensor, rule)
pub const SENSOR_EVENTS_EMITTED_TOTAL: &str = "logwarden_sensor_events_emitted_total";

/// Sensor: datetime 파싱 실패 수 (counter, label: sensor)
pub const SENSOR_DATETIME_ERRORS_TOTAL: &str = "logwarden_sensor_datetime_errors_total";

/// Sensor: I/O 실패로 중단된 사이클 수 (counter, label: sensor)
pub const SENSOR_IO_ERRORS_TOTAL: &str = "logwarden_sensor_io_errors_total";

/// Sensor: 로테이션/잘림 감지 횟수 (counter, label: sensor)
pub const SENSOR_ROTATIONS_TOTAL: &str = "logwarden_sensor_rotations_total";

// ─── Aggregator 메트릭 ─────────────────────────────────────────────

/// Aggregator: 버퍼 내 이벤트 수 (gauge)
pub const AGGREGATOR_BUFFER_SIZE: &str = "logwarden_aggregator_buffer_size";

/// Aggregator: 저장에 성공한 이벤트 수 (counter)
pub const AGGREGATOR_EVENTS_PERSISTED_TOTAL: &str = "logwarden_aggregator_events_persisted_total";

/// Aggregator: 저장에 실패해 버려진 이벤트 수 (counter)
pub const AGGREGATOR_PERSIST_FAILURES_TOTAL: &str = "logwarden_aggregator_persist_failures_total";

/// Aggregator: 지리 정보 조회 실패 수 (counter)
pub const AGGREGATOR_GEO_MISSES_TOTAL: &str = "logwarden_aggregator_geo_misses_total";

/// Aggregator: 실제로 기록된 센서 위치 업데이트 수 (counter)
pub const AGGREGATOR_STATE_WRITES_TOTAL: &str = "logwarden_aggregator_state_writes_total";

/// Aggregator: 한 번의 flush 소요 시간 (histogram, 초)
pub const AGGREGATOR_FLUSH_DURATION_SECONDS: &str = "logwarden_aggregator_flush_duration_seconds";

// ─── Report 메트릭 ─────────────────────────────────────────────────

/// Report: 발행된 리포트 수 (counter)
pub const REPORT_PUBLISHED_TOTAL: &str = "logwarden_report_published_total";

/// Report: 발행 실패 수 (counter)
pub const REPORT_FAILURES_TOTAL: &str = "logwarden_report_failures_total";

// ─── Daemon 메트릭 ─────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "logwarden_daemon_uptime_seconds";

/// Daemon: 실행 중인 센서 태스크 수 (gauge)
pub const DAEMON_SENSORS_RUNNING: &str = "logwarden_daemon_sensors_running";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        SENSOR_LINES_SCANNED_TOTAL,
        "Total number of log lines read by sensors"
    );
    describe_counter!(
        SENSOR_LINES_PARSED_TOTAL,
        "Total number of log lines matched by a sensor parser"
    );
    describe_counter!(
        SENSOR_EVENTS_EMITTED_TOTAL,
        "Total number of events emitted after a rule match"
    );
    describe_counter!(
        SENSOR_DATETIME_ERRORS_TOTAL,
        "Total number of datetime tokens that failed to parse"
    );
    describe_counter!(
        SENSOR_IO_ERRORS_TOTAL,
        "Total number of sensor cycles aborted by an I/O error"
    );
    describe_counter!(
        SENSOR_ROTATIONS_TOTAL,
        "Total number of detected log rotations or truncations"
    );

    describe_gauge!(
        AGGREGATOR_BUFFER_SIZE,
        "Current number of events waiting for the next flush"
    );
    describe_counter!(
        AGGREGATOR_EVENTS_PERSISTED_TOTAL,
        "Total number of events written to storage"
    );
    describe_counter!(
        AGGREGATOR_PERSIST_FAILURES_TOTAL,
        "Total number of events dropped because the storage write failed"
    );
    describe_counter!(
        AGGREGATOR_GEO_MISSES_TOTAL,
        "Total number of failed geolocation lookups"
    );
    describe_counter!(
        AGGREGATOR_STATE_WRITES_TOTAL,
        "Total number of sensor resume positions written to storage"
    );
    describe_histogram!(
        AGGREGATOR_FLUSH_DURATION_SECONDS,
        "Time to enrich and persist one buffered batch in seconds"
    );

    describe_counter!(REPORT_PUBLISHED_TOTAL, "Total number of published reports");
    describe_counter!(
        REPORT_FAILURES_TOTAL,
        "Total number of report publication failures"
    );

    describe_gauge!(DAEMON_UPTIME_SECONDS, "Daemon uptime in seconds");
    describe_gauge!(
        DAEMON_SENSORS_RUNNING,
        "Number of sensor tasks currently running"
    );
}

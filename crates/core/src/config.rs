//! 설정 관리: logwarden.toml 파싱 및 런타임 설정
//!
//! [`LogwardenConfig`]는 노드 전체와 센서 목록을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LOGWARDEN_DATABASE_PATH=/data/events.db` 형식)
//! 3. 설정 파일 (`logwarden.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! 센서 목록(`[[sensors]]`)은 환경변수로 오버라이드하지 않습니다.
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), logwarden_core::error::LogwardenError> {
//! use logwarden_core::config::LogwardenConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = LogwardenConfig::load("logwarden.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = LogwardenConfig::parse("[general]\nnode_name = \"edge-1\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LogwardenError};

/// Logwarden 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogwardenConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 저장소 설정
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 리포트 설정
    #[serde(default)]
    pub reports: ReportConfig,
    /// 알림 설정
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// 센서 목록 (선언 순서 유지)
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

impl LogwardenConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LogwardenError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음, 검증 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LogwardenError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LogwardenError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LogwardenError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LogwardenError> {
        toml::from_str(toml_str).map_err(|e| {
            LogwardenError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LOGWARDEN_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.node_name, "LOGWARDEN_GENERAL_NODE_NAME");
        override_string(&mut self.general.log_level, "LOGWARDEN_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LOGWARDEN_GENERAL_LOG_FORMAT");

        // Database
        override_string(&mut self.database.path, "LOGWARDEN_DATABASE_PATH");
        override_string(&mut self.database.geoip_path, "LOGWARDEN_DATABASE_GEOIP_PATH");
        override_u64(
            &mut self.database.flush_interval_secs,
            "LOGWARDEN_DATABASE_FLUSH_INTERVAL_SECS",
        );

        // Reports
        override_bool(&mut self.reports.enabled, "LOGWARDEN_REPORTS_ENABLED");
        override_u64(&mut self.reports.period_secs, "LOGWARDEN_REPORTS_PERIOD_SECS");
        override_u64(&mut self.reports.warmup_secs, "LOGWARDEN_REPORTS_WARMUP_SECS");
        override_string(&mut self.reports.output_dir, "LOGWARDEN_REPORTS_OUTPUT_DIR");
        override_string(&mut self.reports.base_url, "LOGWARDEN_REPORTS_BASE_URL");

        // Notify
        override_bool(&mut self.notify.enabled, "LOGWARDEN_NOTIFY_ENABLED");

        // Metrics
        override_bool(&mut self.metrics.enabled, "LOGWARDEN_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "LOGWARDEN_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "LOGWARDEN_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 정규식 문법과 필수 토큰은 여기서 검사하지 않습니다.
    /// 센서 컴파일 단계(`logwarden-log-pipeline`)가 담당합니다.
    pub fn validate(&self) -> Result<(), LogwardenError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.general.node_name.trim().is_empty() {
            return Err(invalid("general.node_name", "must not be empty"));
        }

        if self.database.path.is_empty() {
            return Err(invalid("database.path", "must not be empty"));
        }

        if self.database.flush_interval_secs == 0 {
            return Err(invalid(
                "database.flush_interval_secs",
                "must be greater than 0",
            ));
        }

        if self.reports.enabled {
            if self.reports.period_secs == 0 {
                return Err(invalid("reports.period_secs", "must be greater than 0"));
            }
            if self.reports.output_dir.is_empty() {
                return Err(invalid(
                    "reports.output_dir",
                    "must not be empty when reports are enabled",
                ));
            }
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must be greater than 0"));
        }

        let mut seen = HashSet::new();
        for (i, sensor) in self.sensors.iter().enumerate() {
            if sensor.name.trim().is_empty() {
                return Err(invalid(format!("sensors[{i}].name"), "must not be empty"));
            }
            if !seen.insert(sensor.name.as_str()) {
                return Err(invalid(
                    format!("sensors[{i}].name"),
                    format!("duplicate sensor name '{}'", sensor.name),
                ));
            }
            if sensor.filename.is_empty() {
                return Err(invalid(
                    format!("sensors.{}.filename", sensor.name),
                    "must not be empty",
                ));
            }
            if sensor.period_secs == 0 {
                return Err(invalid(
                    format!("sensors.{}.period_secs", sensor.name),
                    "must be greater than 0",
                ));
            }
            if sensor.max_line_length == 0 {
                return Err(invalid(
                    format!("sensors.{}.max_line_length", sensor.name),
                    "must be greater than 0",
                ));
            }
            if sensor.retry_backoff_base_ms > sensor.retry_backoff_max_ms {
                return Err(invalid(
                    format!("sensors.{}.retry_backoff_base_ms", sensor.name),
                    "must not exceed retry_backoff_max_ms",
                ));
            }
        }

        Ok(())
    }

    /// 활성화된 센서만 순회합니다.
    pub fn enabled_sensors(&self) -> impl Iterator<Item = &SensorConfig> {
        self.sensors.iter().filter(|s| s.enabled)
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> LogwardenError {
    ConfigError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 이벤트와 센서 위치에 기록되는 노드명
    pub node_name: String,
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            node_name: "localhost".to_owned(),
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 저장소 및 보강 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite 데이터베이스 파일 경로
    pub path: String,
    /// CIDR → 국가 테이블(JSON) 경로. 비어 있으면 보강하지 않음
    pub geoip_path: String,
    /// 버퍼 flush 주기 (초)
    pub flush_interval_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "/var/lib/logwarden/events.db".to_owned(),
            geoip_path: String::new(),
            flush_interval_secs: 60,
        }
    }
}

/// 리포트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 리포트 주기 (초)
    pub period_secs: u64,
    /// 첫 리포트 전 대기 시간 (초)
    pub warmup_secs: u64,
    /// CSV 출력 디렉토리
    pub output_dir: String,
    /// 리포트 URL 접두어 (파일명이 뒤에 붙음)
    pub base_url: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period_secs: 3600,
            warmup_secs: 120,
            output_dir: "/var/lib/logwarden/reports".to_owned(),
            base_url: String::new(),
        }
    }
}

/// 알림 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// 리포트 발행 후 알림 여부
    pub enabled: bool,
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
        }
    }
}

/// 센서 하나의 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// 센서 이름 (노드 내 고유)
    pub name: String,
    /// 활성화 여부
    pub enabled: bool,
    /// 감시할 로그 파일 경로
    pub filename: String,
    /// 폴링 주기 (초)
    pub period_secs: u64,
    /// 이 길이(바이트)를 넘는 라인은 파싱하지 않음
    pub max_line_length: usize,
    /// I/O 실패 후 재시도 지연 기본값 (밀리초, 0이면 즉시 재시도)
    pub retry_backoff_base_ms: u64,
    /// 재시도 지연 상한 (밀리초)
    pub retry_backoff_max_ms: u64,
    /// 파서 설정
    pub parser: ParserConfig,
    /// 규칙 목록 (선언 순서대로 평가)
    pub rules: Vec<RuleConfig>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            filename: String::new(),
            period_secs: 10,
            max_line_length: 64 * 1024,
            retry_backoff_base_ms: 0,
            retry_backoff_max_ms: 60_000,
            parser: ParserConfig::default(),
            rules: Vec::new(),
        }
    }
}

/// 파서 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// 라인 전체에 적용할 정규식
    pub expression: String,
    /// `datetime` 토큰의 chrono 형식 문자열
    pub datetime_format: String,
    /// 토큰 이름 → 캡처 그룹 인덱스
    pub tokens: BTreeMap<String, usize>,
}

/// 탐지 규칙 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// 규칙 이름
    pub name: String,
    /// 검사할 토큰 이름
    pub token: String,
    /// 사람이 읽는 설명
    pub description: String,
    /// 토큰 값에 적용할 정규식
    pub expression: String,
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SSH_SENSOR_TOML: &str = r#"
[general]
node_name = "edge-1"

[[sensors]]
name = "ssh"
filename = "/var/log/auth.log"
period_secs = 5

[sensors.parser]
expression = '^(\w+\s+\d+\s+[\d:]+) \S+ sshd\[\d+\]: (.*) from ([\d.]+)'
datetime_format = "%Y %b %d %H:%M:%S"

[sensors.parser.tokens]
datetime = 1
line = 2
address = 3

[[sensors.rules]]
name = "failed-password"
token = "line"
description = "Failed password attempt"
expression = "Failed password"

[[sensors.rules]]
name = "invalid-user"
token = "line"
expression = "Invalid user"
"#;

    #[test]
    fn default_config_has_sane_values() {
        let config = LogwardenConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.database.flush_interval_secs, 60);
        assert_eq!(config.reports.warmup_secs, 120);
        assert!(!config.reports.enabled);
        assert!(!config.metrics.enabled);
        assert!(config.sensors.is_empty());
    }

    #[test]
    fn default_config_passes_validation() {
        LogwardenConfig::default().validate().unwrap();
    }

    #[test]
    fn parse_empty_toml_uses_defaults() {
        let config = LogwardenConfig::parse("").unwrap();
        assert_eq!(config.general.node_name, "localhost");
    }

    #[test]
    fn parse_sensor_with_parser_and_ordered_rules() {
        let config = LogwardenConfig::parse(SSH_SENSOR_TOML).unwrap();
        assert_eq!(config.general.node_name, "edge-1");
        assert_eq!(config.sensors.len(), 1);

        let sensor = &config.sensors[0];
        assert_eq!(sensor.name, "ssh");
        assert!(sensor.enabled);
        assert_eq!(sensor.period_secs, 5);
        assert_eq!(sensor.parser.tokens.get("address"), Some(&3));
        assert_eq!(sensor.parser.tokens.get("datetime"), Some(&1));
        assert_eq!(sensor.rules[0].name, "failed-password");
        assert_eq!(sensor.rules[1].name, "invalid-user");
        assert!(sensor.rules[1].description.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn parse_invalid_toml_returns_error() {
        let err = LogwardenConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            LogwardenError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn enabled_sensors_skips_disabled() {
        let mut config = LogwardenConfig::parse(SSH_SENSOR_TOML).unwrap();
        let mut other = config.sensors[0].clone();
        other.name = "cowrie".to_owned();
        other.enabled = false;
        config.sensors.push(other);

        let names: Vec<_> = config.enabled_sensors().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["ssh"]);
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = LogwardenConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_empty_node_name() {
        let mut config = LogwardenConfig::default();
        config.general.node_name = "  ".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("node_name"));
    }

    #[test]
    fn validate_rejects_zero_flush_interval() {
        let mut config = LogwardenConfig::default();
        config.database.flush_interval_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("flush_interval_secs"));
    }

    #[test]
    fn validate_rejects_zero_report_period_only_when_enabled() {
        let mut config = LogwardenConfig::default();
        config.reports.period_secs = 0;
        config.validate().unwrap();

        config.reports.enabled = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reports.period_secs"));
    }

    #[test]
    fn validate_rejects_duplicate_sensor_names() {
        let mut config = LogwardenConfig::parse(SSH_SENSOR_TOML).unwrap();
        let dup = config.sensors[0].clone();
        config.sensors.push(dup);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate sensor name"));
    }

    #[test]
    fn validate_rejects_zero_sensor_period() {
        let mut config = LogwardenConfig::parse(SSH_SENSOR_TOML).unwrap();
        config.sensors[0].period_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sensors.ssh.period_secs"));
    }

    #[test]
    fn validate_rejects_empty_filename() {
        let mut config = LogwardenConfig::parse(SSH_SENSOR_TOML).unwrap();
        config.sensors[0].filename.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("filename"));
    }

    #[test]
    fn validate_rejects_backoff_base_above_max() {
        let mut config = LogwardenConfig::parse(SSH_SENSOR_TOML).unwrap();
        config.sensors[0].retry_backoff_base_ms = 5_000;
        config.sensors[0].retry_backoff_max_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn env_overrides_apply_to_sections() {
        let mut config = LogwardenConfig::default();
        // SAFETY: #[serial]로 환경변수를 쓰는 테스트끼리 직렬화됩니다.
        unsafe {
            std::env::set_var("LOGWARDEN_GENERAL_NODE_NAME", "honeypot-7");
            std::env::set_var("LOGWARDEN_DATABASE_FLUSH_INTERVAL_SECS", "15");
            std::env::set_var("LOGWARDEN_REPORTS_ENABLED", "true");
            std::env::set_var("LOGWARDEN_METRICS_PORT", "9200");
        }
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("LOGWARDEN_GENERAL_NODE_NAME");
            std::env::remove_var("LOGWARDEN_DATABASE_FLUSH_INTERVAL_SECS");
            std::env::remove_var("LOGWARDEN_REPORTS_ENABLED");
            std::env::remove_var("LOGWARDEN_METRICS_PORT");
        }

        assert_eq!(config.general.node_name, "honeypot-7");
        assert_eq!(config.database.flush_interval_secs, 15);
        assert!(config.reports.enabled);
        assert_eq!(config.metrics.port, 9200);
    }

    #[test]
    #[serial]
    fn env_override_invalid_number_keeps_original() {
        let mut val = 60;
        // SAFETY: #[serial]로 환경변수를 쓰는 테스트끼리 직렬화됩니다.
        unsafe { std::env::set_var("TEST_LOGWARDEN_U64_BAD", "sixty") };
        override_u64(&mut val, "TEST_LOGWARDEN_U64_BAD");
        assert_eq!(val, 60);
        unsafe { std::env::remove_var("TEST_LOGWARDEN_U64_BAD") };
    }

    #[test]
    #[serial]
    fn env_override_missing_var_keeps_original() {
        let mut val = "original".to_owned();
        override_string(&mut val, "TEST_LOGWARDEN_DEFINITELY_UNSET");
        assert_eq!(val, "original");
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = LogwardenConfig::parse(SSH_SENSOR_TOML).unwrap();
        let text = toml::to_string(&config).unwrap();
        let back = LogwardenConfig::parse(&text).unwrap();
        assert_eq!(back.sensors[0].rules.len(), 2);
        assert_eq!(back.general.node_name, "edge-1");
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = LogwardenConfig::from_file("/nonexistent/logwarden.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LogwardenError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}

//! 로그 파이프라인 에러 타입
//!
//! [`LogPipelineError`]는 센서/집계기 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<LogPipelineError> for LogwardenError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.
//!
//! 설정 단계 에러(`Config`, `Pattern`)만 치명적이며, 나머지는 에러 버스를
//! 통해 로그로 남고 처리는 계속됩니다.

use logwarden_core::error::{ConfigError, LogwardenError, PipelineError, StorageError};

/// 로그 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum LogPipelineError {
    /// 설정 에러 (필수 토큰 누락 등)
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 정규식 컴파일 실패
    #[error("invalid pattern for '{owner}': {reason}")]
    Pattern {
        /// 정규식을 가진 파서/규칙 이름
        owner: String,
        /// 컴파일 실패 사유
        reason: String,
    },

    /// 파일 I/O 실패 (open/stat/seek/read)
    #[error("io error: {path}: {reason}")]
    Io {
        /// 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// datetime 토큰 파싱 실패
    #[error("could not parse datetime '{value}' with format '{format}': {reason}")]
    Datetime {
        /// 토큰 값
        value: String,
        /// 설정된 형식
        format: String,
        /// 실패 사유
        reason: String,
    },

    /// 저장소 에러
    #[error("storage error: {0}")]
    Storage(String),

    /// 지리 정보 조회 실패
    #[error("geo lookup failed for {address}: {reason}")]
    GeoLookup {
        /// 조회한 주소
        address: String,
        /// 실패 사유
        reason: String,
    },

    /// 리포트 발행 실패
    #[error("report error: {0}")]
    Report(String),

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),
}

impl LogPipelineError {
    /// 프로세스를 중단해야 하는 설정 단계 에러인지 확인합니다.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Pattern { .. })
    }
}

impl From<rusqlite::Error> for LogPipelineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<LogPipelineError> for LogwardenError {
    fn from(err: LogPipelineError) -> Self {
        match err {
            LogPipelineError::Config { field, reason } => {
                LogwardenError::Config(ConfigError::InvalidValue { field, reason })
            }
            LogPipelineError::Pattern { owner, reason } => {
                LogwardenError::Config(ConfigError::InvalidValue {
                    field: owner,
                    reason,
                })
            }
            LogPipelineError::Storage(reason) => {
                LogwardenError::Storage(StorageError::Query(reason))
            }
            LogPipelineError::Channel(reason) => {
                LogwardenError::Pipeline(PipelineError::ChannelSend(reason))
            }
            other => LogwardenError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_error_display() {
        let err = LogPipelineError::Datetime {
            value: "2026 Foo 5".to_owned(),
            format: "%Y %b %e".to_owned(),
            reason: "input contains invalid characters".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("2026 Foo 5"));
        assert!(msg.contains("%Y %b %e"));
    }

    #[test]
    fn only_config_and_pattern_are_fatal() {
        assert!(
            LogPipelineError::Config {
                field: "sensors.ssh.parser.tokens".to_owned(),
                reason: "missing".to_owned(),
            }
            .is_fatal()
        );
        assert!(
            LogPipelineError::Pattern {
                owner: "ssh".to_owned(),
                reason: "unclosed group".to_owned(),
            }
            .is_fatal()
        );
        assert!(
            !LogPipelineError::Io {
                path: "/var/log/auth.log".to_owned(),
                reason: "not found".to_owned(),
            }
            .is_fatal()
        );
        assert!(!LogPipelineError::Storage("locked".to_owned()).is_fatal());
    }

    #[test]
    fn config_error_converts_to_config() {
        let err: LogwardenError = LogPipelineError::Config {
            field: "sensors.ssh.parser.tokens".to_owned(),
            reason: "mandatory token 'address' not found".to_owned(),
        }
        .into();
        assert!(matches!(err, LogwardenError::Config(_)));
        assert!(err.to_string().contains("address"));
    }

    #[test]
    fn storage_error_converts_to_storage() {
        let err: LogwardenError = LogPipelineError::Storage("disk full".to_owned()).into();
        assert!(matches!(err, LogwardenError::Storage(_)));
    }

    #[test]
    fn channel_error_converts_to_pipeline() {
        let err: LogwardenError = LogPipelineError::Channel("receiver closed".to_owned()).into();
        assert!(matches!(err, LogwardenError::Pipeline(_)));
    }
}

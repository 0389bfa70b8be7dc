//! # logwarden-core
//!
//! Logwarden 워크스페이스가 공유하는 기반 크레이트입니다.
//!
//! - [`event`]: 센서가 생성하는 [`Event`]와 재개 위치 [`SensorState`]
//! - [`types`]: 토큰 맵 [`Tokens`], 지리 정보 [`Country`]
//! - [`config`]: `logwarden.toml` 설정 모델
//! - [`error`]: 도메인별 에러 타입
//! - [`metrics`]: 메트릭 이름 상수
//! - [`pipeline`]: 데몬이 관리하는 모듈의 생명주기 trait

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, LogwardenError, PipelineError, StorageError};

// 설정
pub use config::{LogwardenConfig, ParserConfig, RuleConfig, SensorConfig};

// 이벤트
pub use event::{Event, SensorState};

// 파이프라인 trait
pub use pipeline::{HealthStatus, Pipeline};

// 도메인 타입
pub use types::{Country, MANDATORY_TOKENS, TOKEN_ADDRESS, TOKEN_DATETIME, Tokens};

//! Logwarden 로그 파이프라인 -- 센서, 파서, 규칙, 집계기
//!
//! # 모듈 구성
//!
//! - [`parser`]: 센서별 정규식 파서와 datetime 연도 보정
//! - [`rule`]: 토큰 하나를 검사하는 탐지 규칙, 첫 매칭 우선
//! - [`sensor`]: 로그 파일 하나를 주기적으로 읽는 센서 태스크
//! - [`bus`]: 센서와 집계기를 잇는 랑데부 채널
//! - [`buffer`]: flush 전까지 이벤트를 모아 두는 잠금 버퍼
//! - [`aggregator`]: 버스 다중화, flush, 리포트 (Pipeline trait 구현)
//! - [`store`]: 이벤트/센서 위치 저장소 (SQLite)
//! - [`geo`]: 주소 → 국가 조회
//! - [`report`]: CSV 리포트 발행과 알림
//! - [`config`]: 집계기 런타임 설정
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! log file -> Sensor(Parser -> RuleSet) -> event bus -> Aggregator -> EventBuffer
//!                 |                                          |
//!                 +--> state bus --> sensor_states      flush timer -> geo -> EventStore
//!                 +--> error bus --> log                report timer -> publisher -> notifier
//! ```

pub mod aggregator;
pub mod buffer;
pub mod bus;
pub mod config;
pub mod error;
pub mod geo;
pub mod parser;
pub mod report;
pub mod rule;
pub mod sensor;
pub mod store;

// --- 주요 타입 re-export ---

// 집계기
pub use aggregator::{Aggregator, AggregatorBuilder, FlushSummary, RelocateSummary, ReportSummary};

// 설정
pub use config::{PipelineConfig, PipelineConfigBuilder};

// 에러
pub use error::LogPipelineError;

// 파서 / 규칙
pub use parser::Parser;
pub use rule::{Rule, RuleMatch, RuleSet};

// 센서
pub use sensor::{CycleReport, Sensor, SensorChannels, SensorSpec};

// 버스 / 버퍼
pub use buffer::{EventBuffer, FlushBatch};
pub use bus::{BusReceiver, BusSender, bus};

// 저장소 / 보강 / 리포트
pub use geo::{GeoLocator, NullGeoLocator, TableGeoLocator};
pub use report::{CsvReportPublisher, LogNotifier, Notifier, ReportPublisher};
pub use store::{EventStore, SqliteEventStore};

//! 컴파일된 센서 명세
//!
//! [`SensorSpec`]은 설정에서 한 번 컴파일된 불변 값입니다. 정규식과
//! 주기 같은 명세는 `Arc`로 공유되고, 바이트 오프셋 같은 가변 커서는
//! [`Sensor`](super::Sensor)만 소유합니다.

use std::path::{Path, PathBuf};
use std::time::Duration;

use logwarden_core::config::SensorConfig;

use crate::error::LogPipelineError;
use crate::parser::Parser;
use crate::rule::RuleSet;

/// 컴파일된 센서 명세
#[derive(Debug, Clone)]
pub struct SensorSpec {
    name: String,
    path: PathBuf,
    enabled: bool,
    period: Duration,
    max_line_length: usize,
    retry_backoff_base: Duration,
    retry_backoff_max: Duration,
    parser: Parser,
    rules: RuleSet,
}

impl SensorSpec {
    /// 센서 설정을 컴파일합니다.
    ///
    /// 파서를 먼저 컴파일하므로, 필수 토큰이 없으면 규칙 컴파일에
    /// 도달하지 않습니다.
    pub fn compile(config: &SensorConfig) -> Result<Self, LogPipelineError> {
        let parser = Parser::compile(&config.name, &config.parser)?;
        let rules = RuleSet::compile(&config.rules)?;

        Ok(Self {
            name: config.name.clone(),
            path: PathBuf::from(&config.filename),
            enabled: config.enabled,
            period: Duration::from_secs(config.period_secs),
            max_line_length: config.max_line_length,
            retry_backoff_base: Duration::from_millis(config.retry_backoff_base_ms),
            retry_backoff_max: Duration::from_millis(config.retry_backoff_max_ms),
            parser,
            rules,
        })
    }

    /// 설정의 센서 목록을 모두 컴파일합니다. 첫 실패에서 중단합니다.
    pub fn compile_all(configs: &[SensorConfig]) -> Result<Vec<Self>, LogPipelineError> {
        configs.iter().map(Self::compile).collect()
    }

    /// 폴링 주기를 바꿉니다.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// 최대 라인 길이를 바꿉니다.
    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    /// 재시도 백오프 설정을 바꿉니다.
    pub fn with_retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_backoff_base = base;
        self.retry_backoff_max = max;
        self
    }

    /// 센서 이름
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 감시 대상 파일 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 활성화 여부
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 폴링 주기
    pub fn period(&self) -> Duration {
        self.period
    }

    /// 처리할 최대 라인 길이 (바이트)
    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// 재시도 백오프 (기본 간격, 상한)
    pub fn retry_backoff(&self) -> (Duration, Duration) {
        (self.retry_backoff_base, self.retry_backoff_max)
    }

    /// 파서
    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    /// 규칙 목록
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }
}

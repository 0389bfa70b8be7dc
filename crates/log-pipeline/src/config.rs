//! 집계기 런타임 설정
//!
//! [`PipelineConfig`]는 core의 [`LogwardenConfig`]에서 집계기에 필요한
//! 값만 추려 `Duration`으로 변환한 것입니다. 테스트는 빌더로 밀리초 단위
//! 주기를 지정할 수 있습니다.
//!
//! # 사용 예시
//! ```ignore
//! use logwarden_core::config::LogwardenConfig;
//! use logwarden_log_pipeline::config::PipelineConfig;
//!
//! let core_config = LogwardenConfig::default();
//! let config = PipelineConfig::from_core(&core_config);
//! ```

use std::time::Duration;

use logwarden_core::config::LogwardenConfig;

use crate::error::LogPipelineError;

/// 집계기 설정
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 이벤트와 센서 위치에 기록할 노드명
    pub node_name: String,
    /// 버퍼 flush 주기
    pub flush_interval: Duration,
    /// 리포트 태스크 활성화 여부
    pub reports_enabled: bool,
    /// 리포트 주기
    pub report_period: Duration,
    /// 첫 리포트 전 대기 시간
    pub report_warmup: Duration,
    /// 리포트 발행 후 알림 여부
    pub notify_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            node_name: "localhost".to_owned(),
            flush_interval: Duration::from_secs(60),
            reports_enabled: false,
            report_period: Duration::from_secs(3600),
            report_warmup: Duration::from_secs(120),
            notify_enabled: false,
        }
    }
}

impl PipelineConfig {
    /// core 설정에서 집계기 설정을 생성합니다.
    pub fn from_core(core: &LogwardenConfig) -> Self {
        Self {
            node_name: core.general.node_name.clone(),
            flush_interval: Duration::from_secs(core.database.flush_interval_secs),
            reports_enabled: core.reports.enabled,
            report_period: Duration::from_secs(core.reports.period_secs),
            report_warmup: Duration::from_secs(core.reports.warmup_secs),
            notify_enabled: core.notify.enabled,
        }
    }

    /// 빌더를 생성합니다.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogPipelineError> {
        if self.node_name.trim().is_empty() {
            return Err(LogPipelineError::Config {
                field: "node_name".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        if self.flush_interval.is_zero() {
            return Err(LogPipelineError::Config {
                field: "flush_interval".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.reports_enabled && self.report_period.is_zero() {
            return Err(LogPipelineError::Config {
                field: "report_period".to_owned(),
                reason: "must be greater than 0 when reports are enabled".to_owned(),
            });
        }

        Ok(())
    }
}

/// 집계기 설정 빌더
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 노드명을 설정합니다.
    pub fn node_name(mut self, name: impl Into<String>) -> Self {
        self.config.node_name = name.into();
        self
    }

    /// flush 주기를 설정합니다.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    /// 리포트 태스크를 활성화하고 주기와 대기 시간을 설정합니다.
    pub fn reports(mut self, period: Duration, warmup: Duration) -> Self {
        self.config.reports_enabled = true;
        self.config.report_period = period;
        self.config.report_warmup = warmup;
        self
    }

    /// 알림 여부를 설정합니다.
    pub fn notify(mut self, enabled: bool) -> Self {
        self.config.notify_enabled = enabled;
        self
    }

    /// 설정을 검증하고 `PipelineConfig`를 생성합니다.
    pub fn build(self) -> Result<PipelineConfig, LogPipelineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn from_core_converts_seconds_to_durations() {
        let mut core = LogwardenConfig::default();
        core.general.node_name = "edge-2".to_owned();
        core.database.flush_interval_secs = 15;
        core.reports.enabled = true;
        core.reports.period_secs = 600;
        core.reports.warmup_secs = 30;

        let config = PipelineConfig::from_core(&core);
        assert_eq!(config.node_name, "edge-2");
        assert_eq!(config.flush_interval, Duration::from_secs(15));
        assert!(config.reports_enabled);
        assert_eq!(config.report_period, Duration::from_secs(600));
        assert_eq!(config.report_warmup, Duration::from_secs(30));
        assert!(!config.notify_enabled);
    }

    #[test]
    fn validate_rejects_zero_flush_interval() {
        let config = PipelineConfig {
            flush_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn builder_accepts_millisecond_periods() {
        let config = PipelineConfigBuilder::new()
            .node_name("test-node")
            .flush_interval(Duration::from_millis(20))
            .reports(Duration::from_millis(50), Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(config.flush_interval, Duration::from_millis(20));
        assert!(config.reports_enabled);
        assert!(config.report_warmup.is_zero());
    }

    #[test]
    fn builder_rejects_empty_node_name() {
        assert!(PipelineConfigBuilder::new().node_name("").build().is_err());
    }

    #[test]
    fn builder_rejects_zero_report_period() {
        let result = PipelineConfigBuilder::new()
            .reports(Duration::ZERO, Duration::ZERO)
            .build();
        assert!(result.is_err());
    }
}

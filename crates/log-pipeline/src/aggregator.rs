//! 집계기 -- 센서 출력을 모아 보강하고 저장합니다.
//!
//! [`Aggregator`]는 core의 [`Pipeline`] trait을 구현하여
//! `logwarden-daemon`에서 start/stop/health_check 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//!  Sensor ─┐ event bus ┌──────────────┐  flush timer  ┌────────────┐
//!  Sensor ─┼──────────>│ main loop    │──> buffer ───>│ geo + store│
//!  Sensor ─┘ state bus │ (select one) │──> sensor_states            │
//!            error bus │              │──> log      report timer ──> publisher -> notifier
//!                      └──────────────┘
//! ```
//!
//! - 메인 루프는 매 반복마다 세 버스 중 하나만 처리합니다. 버스 간 우선순위는 없습니다.
//! - flush 태스크는 이벤트 추가와 같은 잠금을 flush 패스 전체 동안 쥡니다.
//! - 개별 이벤트 저장 실패는 로그로만 남고, 버퍼는 항상 비워집니다.
//! - 센서 위치는 저장된 값과 다를 때만 기록합니다.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use logwarden_core::error::{LogwardenError, PipelineError};
use logwarden_core::event::{Event, SensorState};
use logwarden_core::metrics as m;
use logwarden_core::pipeline::{HealthStatus, Pipeline};

use crate::buffer::EventBuffer;
use crate::bus::{BusReceiver, bus};
use crate::config::PipelineConfig;
use crate::error::LogPipelineError;
use crate::geo::{GeoLocator, NullGeoLocator};
use crate::report::{Notifier, ReportPublisher};
use crate::sensor::{Sensor, SensorChannels, SensorSpec};
use crate::store::EventStore;

/// 집계기 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregatorState {
    Initialized,
    Running,
    Stopped,
}

/// flush 패스 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// 배치에 있던 이벤트 수
    pub flushed: usize,
    /// 저장에 성공한 이벤트 수
    pub persisted: usize,
    /// 저장에 실패해 버려진 이벤트 수
    pub failed: usize,
    /// 국가 조회에 실패한 이벤트 수
    pub geo_misses: usize,
}

/// 리포트 패스 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    /// 리포트에 포함된 이벤트 수
    pub events: usize,
    /// 발행기가 반환한 URL
    pub url: String,
    /// 보고 완료로 표시된 이벤트 수
    pub marked: usize,
}

/// 위치 재조회 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelocateSummary {
    /// 처리한 이벤트 수
    pub processed: usize,
    /// 국가가 바뀌어 갱신된 이벤트 수
    pub changed: usize,
    /// 조회 또는 저장 실패 수
    pub errors: usize,
}

/// 메인 루프, flush 태스크, 리포트 태스크가 공유하는 상태
struct Shared<S> {
    node_name: String,
    store: Arc<S>,
    geo: Arc<dyn GeoLocator>,
    buffer: EventBuffer,
    publisher: Option<Arc<dyn ReportPublisher>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl<S: EventStore> Shared<S> {
    async fn handle_event(&self, event: Event) {
        debug!(sensor = %event.sensor, rule = %event.rule, address = %event.address, "event received");
        self.buffer.push(event).await;
    }

    /// 위치 기록 정책: 없으면 생성, 다르면 갱신, 같으면 건너뜀
    async fn handle_state(&self, mut state: SensorState) {
        state.node_name.clone_from(&self.node_name);

        let result = match self
            .store
            .sensor_state(&state.node_name, &state.sensor_name)
            .await
        {
            Ok(None) => self.store.create_sensor_state(&state).await.map(|()| true),
            Ok(Some(existing)) if existing.last_position != state.last_position => {
                self.store.update_sensor_state(&state).await.map(|()| true)
            }
            Ok(Some(_)) => Ok(false),
            Err(e) => Err(e),
        };

        match result {
            Ok(true) => {
                metrics::counter!(m::AGGREGATOR_STATE_WRITES_TOTAL).increment(1);
                debug!(
                    sensor = %state.sensor_name,
                    position = state.last_position,
                    "sensor state saved"
                );
            }
            Ok(false) => {}
            Err(e) => error!(
                sensor = %state.sensor_name,
                position = state.last_position,
                error = %e,
                "failed to save sensor state"
            ),
        }
    }

    fn handle_error(&self, err: LogPipelineError) {
        match err {
            LogPipelineError::Datetime { .. } => warn!(error = %err, "sensor parse error"),
            _ => error!(error = %err, "sensor error"),
        }
    }

    async fn flush(&self) -> FlushSummary {
        let mut batch = self.buffer.begin_flush().await;
        if batch.is_empty() {
            return FlushSummary::default();
        }

        let started = Instant::now();
        let mut summary = FlushSummary {
            flushed: batch.len(),
            ..FlushSummary::default()
        };
        debug!(count = summary.flushed, "saving new events");

        for event in batch.iter_mut() {
            event.node_name.clone_from(&self.node_name);
            event.created_at = Some(Utc::now());

            match self.geo.lookup(&event.address) {
                Ok(country) => {
                    event.country_code = country.code;
                    event.country_name = country.name;
                }
                Err(e) => {
                    summary.geo_misses += 1;
                    metrics::counter!(m::AGGREGATOR_GEO_MISSES_TOTAL).increment(1);
                    debug!(address = %event.address, error = %e, "geolocation failed");
                }
            }

            match self.store.insert_event(event).await {
                Ok(()) => summary.persisted += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(event_id = %event.id, error = %e, "failed to save event");
                }
            }
        }
        drop(batch);

        let elapsed = started.elapsed();
        metrics::counter!(m::AGGREGATOR_EVENTS_PERSISTED_TOTAL).increment(summary.persisted as u64);
        metrics::counter!(m::AGGREGATOR_PERSIST_FAILURES_TOTAL).increment(summary.failed as u64);
        metrics::histogram!(m::AGGREGATOR_FLUSH_DURATION_SECONDS).record(elapsed.as_secs_f64());
        info!(
            saved = summary.persisted,
            failed = summary.failed,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "events flushed"
        );

        summary
    }

    async fn report(&self) -> Result<Option<ReportSummary>, LogPipelineError> {
        let Some(publisher) = self.publisher.as_ref().map(Arc::clone) else {
            return Ok(None);
        };

        let unreported = self.store.unreported_events().await?;
        if unreported.is_empty() {
            debug!("no unreported events");
            return Ok(None);
        }
        info!(count = unreported.len(), "unreported events");

        let (url, unreported) = tokio::task::spawn_blocking(move || {
            publisher.publish(&unreported).map(|url| (url, unreported))
        })
        .await
        .map_err(|e| LogPipelineError::Report(format!("report task failed: {e}")))??;

        let reported_at = Utc::now();
        let mut marked = 0;
        for event in &unreported {
            match self.store.mark_reported(&event.id, reported_at).await {
                Ok(()) => marked += 1,
                Err(e) => error!(event_id = %event.id, error = %e, "failed to mark event reported"),
            }
        }

        let summary = ReportSummary {
            events: unreported.len(),
            url: url.clone(),
            marked,
        };

        if url.is_empty() {
            return Ok(Some(summary));
        }
        if let Some(notifier) = self.notifier.as_ref().map(Arc::clone) {
            let notified =
                tokio::task::spawn_blocking(move || notifier.notify(&unreported, &url)).await;
            match notified {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "notification failed"),
                Err(e) => warn!(error = %e, "notification task failed"),
            }
        }

        Ok(Some(summary))
    }

    async fn relocate_all(&self) -> Result<RelocateSummary, LogPipelineError> {
        let events = self.store.all_events().await?;
        let mut summary = RelocateSummary::default();
        info!(count = events.len(), "relocating stored events");

        for event in &events {
            summary.processed += 1;
            let country = match self.geo.lookup(&event.address) {
                Ok(country) => country,
                Err(e) => {
                    summary.errors += 1;
                    warn!(address = %event.address, error = %e, "failed to locate address");
                    continue;
                }
            };
            if country.code == event.country_code {
                continue;
            }

            info!(
                address = %event.address,
                from = %event.country_name,
                to = %country.name,
                "event location changed"
            );
            match self.store.update_location(&event.id, &country).await {
                Ok(()) => summary.changed += 1,
                Err(e) => {
                    summary.errors += 1;
                    error!(event_id = %event.id, error = %e, "failed to save event location");
                }
            }
        }

        info!(
            changed = summary.changed,
            errors = summary.errors,
            "relocation done"
        );
        Ok(summary)
    }
}

/// 센서 출력을 모아 저장하는 집계기
///
/// # 사용 예시
/// ```ignore
/// use std::sync::Arc;
/// use logwarden_log_pipeline::{AggregatorBuilder, SqliteEventStore};
///
/// let store = Arc::new(SqliteEventStore::open("events.db")?);
/// let mut aggregator = AggregatorBuilder::new(store)
///     .config(config)
///     .sensors(specs)
///     .build()?;
///
/// aggregator.start().await?;
/// ```
pub struct Aggregator<S: EventStore> {
    config: PipelineConfig,
    state: AggregatorState,
    shared: Arc<Shared<S>>,
    specs: Vec<Arc<SensorSpec>>,
    cancel: CancellationToken,
    sensors: Vec<(String, JoinHandle<()>)>,
    /// flush 태스크와 메인 루프. 종료 시 취소 후 완료를 기다립니다.
    tasks: Vec<JoinHandle<()>>,
    report_task: Option<JoinHandle<()>>,
}

impl<S: EventStore> Aggregator<S> {
    /// 현재 상태 이름을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            AggregatorState::Initialized => "initialized",
            AggregatorState::Running => "running",
            AggregatorState::Stopped => "stopped",
        }
    }

    /// 집계기 설정
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 저장소
    pub fn store(&self) -> &Arc<S> {
        &self.shared.store
    }

    /// 등록된 센서 명세 (비활성 포함)
    pub fn sensor_specs(&self) -> &[Arc<SensorSpec>] {
        &self.specs
    }

    /// 실행 중인 센서 태스크 수
    pub fn running_sensors(&self) -> usize {
        self.sensors
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    /// 아직 flush되지 않은 이벤트 수
    pub async fn buffered_len(&self) -> usize {
        self.shared.buffer.len().await
    }

    /// 즉시 flush합니다.
    pub async fn flush_now(&self) -> FlushSummary {
        self.shared.flush().await
    }

    /// 즉시 리포트를 발행합니다. 발행기가 없거나 미보고 이벤트가 없으면 `None`.
    pub async fn report_now(&self) -> Result<Option<ReportSummary>, LogPipelineError> {
        self.shared.report().await
    }

    /// 저장된 모든 이벤트의 국가를 다시 조회합니다.
    ///
    /// 센서를 시작하지 않고 실행하는 일회성 작업입니다.
    pub async fn relocate_all(&self) -> Result<RelocateSummary, LogPipelineError> {
        self.shared.store.migrate().await?;
        self.shared.relocate_all().await
    }

    async fn resume_position(&self, sensor_name: &str) -> u64 {
        match self
            .shared
            .store
            .sensor_state(&self.shared.node_name, sensor_name)
            .await
        {
            Ok(Some(state)) => state.last_position,
            Ok(None) => 0,
            Err(e) => {
                warn!(sensor = sensor_name, error = %e, "failed to load sensor state, starting from 0");
                0
            }
        }
    }

    fn spawn_flush_task(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let period = self.config.flush_interval;

        tokio::spawn(async move {
            info!(period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX), "flush timer started");
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 첫 tick은 즉시 완료됨
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        shared.flush().await;
                    }
                }
            }
            debug!("flush timer stopped");
        })
    }

    fn spawn_report_task(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let warmup = self.config.report_warmup;
        let period = self.config.report_period;

        tokio::spawn(async move {
            info!(
                warmup_secs = warmup.as_secs(),
                period_secs = period.as_secs(),
                "report timer started"
            );
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(warmup) => {}
            }

            loop {
                match shared.report().await {
                    Ok(Some(summary)) => {
                        metrics::counter!(m::REPORT_PUBLISHED_TOTAL).increment(1);
                        info!(events = summary.events, url = %summary.url, "report published");
                    }
                    Ok(None) => {}
                    Err(e) => {
                        metrics::counter!(m::REPORT_FAILURES_TOTAL).increment(1);
                        error!(error = %e, "report failed");
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
            debug!("report timer stopped");
        })
    }
}

/// 세 버스를 다중화하는 메인 루프
async fn run_main_loop<S: EventStore>(
    shared: Arc<Shared<S>>,
    mut events: BusReceiver<Event>,
    mut states: BusReceiver<SensorState>,
    mut errors: BusReceiver<LogPipelineError>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(state) = states.recv() => shared.handle_state(state).await,
            Some(event) = events.recv() => shared.handle_event(event).await,
            Some(err) = errors.recv() => shared.handle_error(err),
            else => {
                debug!("all sensors detached from the buses");
                break;
            }
        }
    }
    debug!("aggregator loop stopped");
}

impl<S: EventStore> Pipeline for Aggregator<S> {
    async fn start(&mut self) -> Result<(), LogwardenError> {
        if self.state == AggregatorState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!(node = %self.shared.node_name, "starting aggregator");

        self.shared.store.migrate().await?;
        debug!("database schema ready");

        self.cancel = CancellationToken::new();
        let (event_tx, event_rx) = bus();
        let (state_tx, state_rx) = bus();
        let (error_tx, error_rx) = bus();
        let channels = SensorChannels {
            events: event_tx,
            states: state_tx,
            errors: error_tx,
        };

        for spec in &self.specs {
            if !spec.is_enabled() {
                debug!(sensor = spec.name(), "sensor is disabled");
                continue;
            }
            let offset = self.resume_position(spec.name()).await;
            let sensor = Sensor::new(Arc::clone(spec), offset, channels.clone());
            let handle = sensor.spawn(self.cancel.child_token());
            self.sensors.push((spec.name().to_owned(), handle));
        }
        drop(channels);

        self.tasks.push(self.spawn_flush_task());
        if self.config.reports_enabled {
            self.report_task = Some(self.spawn_report_task());
        } else {
            info!("reporting is disabled for this node");
        }

        self.tasks.push(tokio::spawn(run_main_loop(
            Arc::clone(&self.shared),
            event_rx,
            state_rx,
            error_rx,
            self.cancel.clone(),
        )));

        self.state = AggregatorState::Running;
        info!(sensors = self.sensors.len(), "aggregator started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LogwardenError> {
        if self.state != AggregatorState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping aggregator");

        self.cancel.cancel();
        for (_, handle) in self.sensors.drain(..) {
            handle.abort();
        }
        if let Some(report) = self.report_task.take() {
            report.abort();
        }
        // 진행 중인 flush 패스와 이미 수신한 이벤트의 버퍼 적재가 끝나야 함
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "aggregator task ended abnormally");
            }
        }

        let remaining = self.shared.flush().await;
        if remaining.flushed > 0 {
            info!(count = remaining.flushed, "flushed remaining buffered events");
        }

        self.state = AggregatorState::Stopped;
        info!("aggregator stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            AggregatorState::Running => {
                let exited: Vec<&str> = self
                    .sensors
                    .iter()
                    .filter(|(_, handle)| handle.is_finished())
                    .map(|(name, _)| name.as_str())
                    .collect();
                if exited.is_empty() {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded(format!("sensor tasks exited: {}", exited.join(", ")))
                }
            }
            AggregatorState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            AggregatorState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 집계기 빌더
pub struct AggregatorBuilder<S: EventStore> {
    config: PipelineConfig,
    store: Arc<S>,
    geo: Option<Arc<dyn GeoLocator>>,
    publisher: Option<Arc<dyn ReportPublisher>>,
    notifier: Option<Arc<dyn Notifier>>,
    specs: Vec<SensorSpec>,
}

impl<S: EventStore> AggregatorBuilder<S> {
    /// 저장소를 지정해 새 빌더를 생성합니다.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            config: PipelineConfig::default(),
            store,
            geo: None,
            publisher: None,
            notifier: None,
            specs: Vec::new(),
        }
    }

    /// 집계기 설정을 지정합니다.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// 국가 조회기를 지정합니다. 지정하지 않으면 [`NullGeoLocator`]를 사용합니다.
    pub fn geo_locator(mut self, geo: impl GeoLocator + 'static) -> Self {
        self.geo = Some(Arc::new(geo));
        self
    }

    /// 리포트 발행기를 지정합니다.
    pub fn report_publisher(mut self, publisher: impl ReportPublisher + 'static) -> Self {
        self.publisher = Some(Arc::new(publisher));
        self
    }

    /// 알림기를 지정합니다. `notify_enabled`가 꺼져 있으면 무시됩니다.
    pub fn notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    /// 센서 하나를 추가합니다.
    pub fn sensor(mut self, spec: SensorSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// 센서 여러 개를 추가합니다.
    pub fn sensors(mut self, specs: impl IntoIterator<Item = SensorSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    /// 집계기를 빌드합니다.
    pub fn build(self) -> Result<Aggregator<S>, LogPipelineError> {
        self.config.validate()?;

        let mut names = std::collections::HashSet::new();
        for spec in &self.specs {
            if !names.insert(spec.name()) {
                return Err(LogPipelineError::Config {
                    field: "sensors".to_owned(),
                    reason: format!("duplicate sensor name '{}'", spec.name()),
                });
            }
        }

        if self.config.reports_enabled && self.publisher.is_none() {
            return Err(LogPipelineError::Config {
                field: "reports.enabled".to_owned(),
                reason: "reporting is enabled but no report publisher was given".to_owned(),
            });
        }

        let notifier = if self.config.notify_enabled {
            self.notifier
        } else {
            None
        };

        let shared = Shared {
            node_name: self.config.node_name.clone(),
            store: self.store,
            geo: self.geo.unwrap_or_else(|| Arc::new(NullGeoLocator)),
            buffer: EventBuffer::new(),
            publisher: self.publisher,
            notifier,
        };

        Ok(Aggregator {
            config: self.config,
            state: AggregatorState::Initialized,
            shared: Arc::new(shared),
            specs: self.specs.into_iter().map(Arc::new).collect(),
            cancel: CancellationToken::new(),
            sensors: Vec::new(),
            tasks: Vec::new(),
            report_task: None,
        })
    }
}

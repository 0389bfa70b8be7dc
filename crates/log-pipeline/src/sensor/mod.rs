//! 센서 -- 로그 파일 하나를 주기적으로 읽어 이벤트를 생성합니다.
//!
//! 각 활성 센서는 프로세스 수명 동안 독립 태스크로 실행됩니다.
//!
//! # 사이클
//! ```text
//! OPENING -> SEEKING -> SCANNING -> UPDATING_POSITION -> SLEEPING -> OPENING
//! ```
//!
//! 1. 파일을 엽니다.
//! 2. 파일 크기가 기억한 오프셋보다 작으면 로테이션/잘림으로 보고 0으로 되돌립니다.
//! 3. 오프셋으로 이동해 EOF까지 라인을 읽습니다. 파서에 매칭된 라인은
//!    규칙을 선언 순서대로 평가하고, 처음 매칭된 규칙으로 이벤트를 만들어
//!    이벤트 버스로 보냅니다.
//! 4. 소비한 바이트 위치를 새 오프셋으로 기록하고 상태 버스로 보냅니다.
//! 5. 주기만큼 잠든 뒤 반복합니다.
//!
//! open/stat/seek/read 실패는 에러 버스로 보내고 사이클을 처음부터
//! 다시 시작합니다. 모든 버스 송신은 집계기가 받을 때까지 대기합니다.

pub mod backoff;
pub mod spec;

pub use backoff::Backoff;
pub use spec::SensorSpec;

use std::io::SeekFrom;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logwarden_core::event::{Event, SensorState};
use logwarden_core::metrics as m;

use crate::bus::BusSender;
use crate::error::LogPipelineError;

/// 센서가 집계기로 보내는 세 버스의 송신측
#[derive(Clone)]
pub struct SensorChannels {
    /// 이벤트 버스
    pub events: BusSender<Event>,
    /// 상태 버스
    pub states: BusSender<SensorState>,
    /// 에러 버스
    pub errors: BusSender<LogPipelineError>,
}

/// 한 사이클의 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// 스캔을 시작한 오프셋 (로테이션 감지 시 0)
    pub start_offset: u64,
    /// 스캔을 마친 오프셋
    pub end_offset: u64,
    /// 읽은 라인 수
    pub lines_scanned: u64,
    /// 파서에 매칭된 라인 수
    pub lines_parsed: u64,
    /// 생성한 이벤트 수
    pub events_emitted: u64,
    /// 길이 제한으로 건너뛴 라인 수
    pub lines_skipped: u64,
    /// 로테이션/잘림 감지 여부
    pub rotated: bool,
}

/// 실행 중인 센서
///
/// 불변 명세([`SensorSpec`])는 공유하고, 오프셋 커서만 소유합니다.
pub struct Sensor {
    spec: Arc<SensorSpec>,
    offset: u64,
    channels: SensorChannels,
}

impl Sensor {
    /// 마지막으로 저장된 오프셋에서 시작하는 센서를 생성합니다.
    pub fn new(spec: Arc<SensorSpec>, offset: u64, channels: SensorChannels) -> Self {
        Self {
            spec,
            offset,
            channels,
        }
    }

    /// 센서 이름
    pub fn name(&self) -> &str {
        self.spec.name()
    }

    /// 현재 오프셋
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 센서 명세
    pub fn spec(&self) -> &Arc<SensorSpec> {
        &self.spec
    }

    /// 센서 루프를 별도 태스크로 실행합니다.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// 취소될 때까지 사이클을 반복합니다.
    ///
    /// 버스 수신측이 사라지면 스스로 종료합니다.
    pub async fn run(mut self, cancel: CancellationToken) {
        let spec = Arc::clone(&self.spec);
        let (base, max) = spec.retry_backoff();
        let mut backoff = Backoff::new(base, max);

        info!(
            sensor = spec.name(),
            path = %spec.path().display(),
            offset = self.offset,
            rules = spec.rules().len(),
            "sensor started"
        );

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.cycle() => result,
            };

            match result {
                Ok(report) => {
                    backoff.reset();
                    debug!(
                        sensor = spec.name(),
                        from = report.start_offset,
                        to = report.end_offset,
                        scanned = report.lines_scanned,
                        events = report.events_emitted,
                        "sensor cycle completed"
                    );
                }
                Err(LogPipelineError::Channel(reason)) => {
                    debug!(sensor = spec.name(), reason = %reason, "aggregator gone, stopping sensor");
                    break;
                }
                Err(e) => {
                    metrics::counter!(m::SENSOR_IO_ERRORS_TOTAL, m::LABEL_SENSOR => spec.name().to_owned())
                        .increment(1);

                    let sent = tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = self.channels.errors.send(e) => sent,
                    };
                    if sent.is_err() {
                        break;
                    }

                    let delay = backoff.next_delay();
                    if delay.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        warn!(
                            sensor = spec.name(),
                            attempt = backoff.attempts(),
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "retrying sensor cycle after failure"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(spec.period()) => {}
            }
        }

        info!(sensor = spec.name(), offset = self.offset, "sensor stopped");
    }

    /// 한 번의 전체 사이클을 수행합니다.
    ///
    /// open/stat/seek/read 실패는 `Io`, 버스가 닫히면 `Channel` 에러를 반환합니다.
    /// 읽기 도중 실패하면 그때까지 소비한 위치는 오프셋에 반영됩니다.
    pub async fn cycle(&mut self) -> Result<CycleReport, LogPipelineError> {
        let spec = Arc::clone(&self.spec);
        let io_err = |e: std::io::Error| LogPipelineError::Io {
            path: spec.path().display().to_string(),
            reason: e.to_string(),
        };

        let file = File::open(spec.path()).await.map_err(io_err)?;
        let size = file.metadata().await.map_err(io_err)?.len();

        let mut report = CycleReport::default();
        if size < self.offset {
            info!(
                sensor = spec.name(),
                size,
                offset = self.offset,
                "file shrank below last offset, resetting to start"
            );
            metrics::counter!(m::SENSOR_ROTATIONS_TOTAL, m::LABEL_SENSOR => spec.name().to_owned())
                .increment(1);
            self.offset = 0;
            report.rotated = true;
        }
        report.start_offset = self.offset;

        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(self.offset))
            .await
            .map_err(io_err)?;

        let mut position = self.offset;
        let mut buf = Vec::new();
        // 라인 끝 `\r\n`까지 포함한 한 번의 읽기 상한
        let limit = spec.max_line_length() as u64 + 2;
        loop {
            buf.clear();
            let read = match (&mut reader).take(limit).read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    self.offset = position;
                    return Err(io_err(e));
                }
            };
            position += read as u64;
            report.lines_scanned += 1;

            let truncated = read as u64 == limit && buf.last() != Some(&b'\n');
            if truncated {
                match discard_line(&mut reader).await {
                    Ok(skipped) => position += skipped,
                    Err(e) => {
                        self.offset = position;
                        return Err(io_err(e));
                    }
                }
            }

            let line = trim_line_ending(&buf);
            if truncated || line.len() > spec.max_line_length() {
                report.lines_skipped += 1;
                debug!(
                    sensor = spec.name(),
                    max = spec.max_line_length(),
                    "skipping oversized line"
                );
                continue;
            }

            let text = String::from_utf8_lossy(line);
            self.process_line(&spec, &text, &mut report).await?;
        }

        metrics::counter!(m::SENSOR_LINES_SCANNED_TOTAL, m::LABEL_SENSOR => spec.name().to_owned())
            .increment(report.lines_scanned);
        metrics::counter!(m::SENSOR_LINES_PARSED_TOTAL, m::LABEL_SENSOR => spec.name().to_owned())
            .increment(report.lines_parsed);

        self.offset = position;
        report.end_offset = position;

        self.channels
            .states
            .send(SensorState::new(spec.name(), position))
            .await?;

        Ok(report)
    }

    /// 라인 하나를 파싱하고, 규칙에 매칭되면 이벤트를 보냅니다.
    async fn process_line(
        &self,
        spec: &SensorSpec,
        line: &str,
        report: &mut CycleReport,
    ) -> Result<(), LogPipelineError> {
        let Some(tokens) = spec.parser().parse(line) else {
            return Ok(());
        };
        report.lines_parsed += 1;

        let Some(hit) = spec.rules().first_match(&tokens) else {
            return Ok(());
        };

        let datetime = tokens.datetime().unwrap_or_default();
        let happened_at = match spec.parser().parse_datetime(datetime) {
            Ok(dt) => Some(dt),
            Err(e) => {
                metrics::counter!(m::SENSOR_DATETIME_ERRORS_TOTAL, m::LABEL_SENSOR => spec.name().to_owned())
                    .increment(1);
                self.channels.errors.send(e).await?;
                None
            }
        };

        let event = Event::detected(
            spec.name(),
            hit.rule.name(),
            tokens.address().unwrap_or_default(),
            hit.value,
            happened_at,
        );
        self.channels.events.send(event).await?;

        metrics::counter!(
            m::SENSOR_EVENTS_EMITTED_TOTAL,
            m::LABEL_SENSOR => spec.name().to_owned(),
            m::LABEL_RULE => hit.rule.name().to_owned()
        )
        .increment(1);
        report.events_emitted += 1;
        Ok(())
    }
}

/// 다음 `\n`(포함) 또는 EOF까지 버리고, 버린 바이트 수를 반환합니다.
async fn discard_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<u64> {
    let mut skipped = 0u64;
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(skipped);
        }
        let (used, done) = match chunk.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (chunk.len(), false),
        };
        reader.consume(used);
        skipped += used as u64;
        if done {
            return Ok(skipped);
        }
    }
}

/// 라인 끝의 `\n`, `\r\n`을 제거합니다.
fn trim_line_ending(buf: &[u8]) -> &[u8] {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusReceiver, bus};
    use logwarden_core::config::{ParserConfig, RuleConfig, SensorConfig};
    use std::io::Write;
    use std::time::Duration;

    struct Harness {
        events: BusReceiver<Event>,
        states: BusReceiver<SensorState>,
        errors: BusReceiver<LogPipelineError>,
    }

    fn channels() -> (SensorChannels, Harness) {
        let (event_tx, events) = bus();
        let (state_tx, states) = bus();
        let (error_tx, errors) = bus();
        (
            SensorChannels {
                events: event_tx,
                states: state_tx,
                errors: error_tx,
            },
            Harness {
                events,
                states,
                errors,
            },
        )
    }

    fn spec_for(path: &std::path::Path, rules: &[(&str, &str, &str)]) -> Arc<SensorSpec> {
        let config = SensorConfig {
            name: "sshd".to_owned(),
            filename: path.display().to_string(),
            period_secs: 1,
            parser: ParserConfig {
                expression: r"^(\w+\s+\d+\s+[\d:]+)\s+\S+\s+sshd\[\d+\]:\s+(.+?)\s+from\s+([\d.]+)"
                    .to_owned(),
                datetime_format: "%Y %b %e %H:%M:%S".to_owned(),
                tokens: [("datetime", 1), ("line", 2), ("address", 3)]
                    .into_iter()
                    .map(|(k, v)| (k.to_owned(), v))
                    .collect(),
            },
            rules: rules
                .iter()
                .map(|(name, token, expression)| RuleConfig {
                    name: (*name).to_owned(),
                    token: (*token).to_owned(),
                    description: String::new(),
                    expression: (*expression).to_owned(),
                })
                .collect(),
            ..Default::default()
        };
        Arc::new(SensorSpec::compile(&config).unwrap())
    }

    const FAILED: &str =
        "Jan 5 10:00:00 host sshd[123]: Failed password for root from 10.0.0.5 port 22 ssh2\n";
    const NOISE: &str = "Jan 5 10:00:01 host CRON[9]: session opened for user root\n";

    #[test]
    fn trim_handles_both_line_endings() {
        assert_eq!(trim_line_ending(b"abc\n"), b"abc");
        assert_eq!(trim_line_ending(b"abc\r\n"), b"abc");
        assert_eq!(trim_line_ending(b"abc"), b"abc");
    }

    #[tokio::test]
    async fn cycle_emits_event_and_reports_offset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(NOISE.as_bytes()).unwrap();
        file.write_all(FAILED.as_bytes()).unwrap();
        file.flush().unwrap();
        let total = (NOISE.len() + FAILED.len()) as u64;

        let spec = spec_for(file.path(), &[("failed-password", "line", "^Failed password")]);
        let (tx, mut h) = channels();
        let mut sensor = Sensor::new(spec, 0, tx);

        let cycle = tokio::spawn(async move {
            let report = sensor.cycle().await.unwrap();
            (sensor.offset(), report)
        });

        let event = h.events.recv().await.unwrap();
        assert_eq!(event.address, "10.0.0.5");
        assert_eq!(event.rule, "failed-password");
        assert_eq!(event.sensor, "sshd");
        assert_eq!(event.payload, "Failed password for root");
        assert!(event.happened_at.is_some());

        let state = h.states.recv().await.unwrap();
        assert_eq!(state.sensor_name, "sshd");
        assert_eq!(state.last_position, total);

        let (offset, report) = cycle.await.unwrap();
        assert_eq!(offset, total);
        assert_eq!(report.lines_scanned, 2);
        assert_eq!(report.lines_parsed, 1);
        assert_eq!(report.events_emitted, 1);
        assert!(!report.rotated);
    }

    #[tokio::test]
    async fn zero_rules_still_advances_offset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FAILED.as_bytes()).unwrap();
        file.flush().unwrap();

        let spec = spec_for(file.path(), &[]);
        let (tx, mut h) = channels();
        let mut sensor = Sensor::new(spec, 0, tx);

        let cycle = tokio::spawn(async move { sensor.cycle().await.unwrap() });
        let state = h.states.recv().await.unwrap();
        assert_eq!(state.last_position, FAILED.len() as u64);

        let report = cycle.await.unwrap();
        assert_eq!(report.events_emitted, 0);
    }

    #[tokio::test]
    async fn shrunk_file_resets_offset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FAILED.as_bytes()).unwrap();
        file.flush().unwrap();

        let spec = spec_for(file.path(), &[]);
        let (tx, mut h) = channels();
        let mut sensor = Sensor::new(spec, 9_500, tx);

        let cycle = tokio::spawn(async move { sensor.cycle().await.unwrap() });
        let state = h.states.recv().await.unwrap();
        assert_eq!(state.last_position, FAILED.len() as u64);

        let report = cycle.await.unwrap();
        assert!(report.rotated);
        assert_eq!(report.start_offset, 0);
    }

    #[tokio::test]
    async fn bad_datetime_reports_error_and_still_emits() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"Foo 5 10:00:00 host sshd[1]: Failed password for root from 10.0.0.9 port 22\n",
        )
        .unwrap();
        file.flush().unwrap();

        let spec = spec_for(file.path(), &[("failed-password", "line", "^Failed")]);
        let (tx, mut h) = channels();
        let mut sensor = Sensor::new(spec, 0, tx);
        let cycle = tokio::spawn(async move { sensor.cycle().await });

        let err = h.errors.recv().await.unwrap();
        assert!(matches!(err, LogPipelineError::Datetime { .. }));

        let event = h.events.recv().await.unwrap();
        assert_eq!(event.address, "10.0.0.9");
        assert!(event.happened_at.is_none());

        h.states.recv().await.unwrap();
        cycle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn oversized_lines_are_skipped_but_consumed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FAILED.as_bytes()).unwrap();
        file.flush().unwrap();

        let spec = spec_for(file.path(), &[("any", "line", ".")]);
        let narrow = Arc::new((*spec).clone().with_max_line_length(10));

        let (tx, mut h) = channels();
        let mut sensor = Sensor::new(narrow, 0, tx);
        let cycle = tokio::spawn(async move { sensor.cycle().await.unwrap() });

        let state = h.states.recv().await.unwrap();
        assert_eq!(state.last_position, FAILED.len() as u64);
        let report = cycle.await.unwrap();
        assert_eq!(report.lines_skipped, 1);
        assert_eq!(report.events_emitted, 0);
    }

    #[tokio::test]
    async fn line_far_beyond_cap_is_discarded_without_losing_the_next() {
        let huge = "x".repeat(1 << 20);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(huge.as_bytes()).unwrap();
        file.write_all(b"\n").unwrap();
        file.write_all(FAILED.as_bytes()).unwrap();
        file.flush().unwrap();
        let total = (huge.len() + 1 + FAILED.len()) as u64;

        let spec = spec_for(file.path(), &[("any", "line", ".")]);
        let narrow = Arc::new((*spec).clone().with_max_line_length(128));

        let (tx, mut h) = channels();
        let mut sensor = Sensor::new(narrow, 0, tx);
        let cycle = tokio::spawn(async move { sensor.cycle().await.unwrap() });

        let event = h.events.recv().await.unwrap();
        assert_eq!(event.rule, "any");
        let state = h.states.recv().await.unwrap();
        assert_eq!(state.last_position, total);

        let report = cycle.await.unwrap();
        assert_eq!(report.lines_scanned, 2);
        assert_eq!(report.lines_skipped, 1);
        assert_eq!(report.events_emitted, 1);
    }

    #[tokio::test]
    async fn unterminated_oversized_tail_is_consumed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all("y".repeat(5000).as_bytes()).unwrap();
        file.flush().unwrap();

        let spec = spec_for(file.path(), &[("any", "line", ".")]);
        let narrow = Arc::new((*spec).clone().with_max_line_length(100));

        let (tx, mut h) = channels();
        let mut sensor = Sensor::new(narrow, 0, tx);
        let cycle = tokio::spawn(async move { sensor.cycle().await.unwrap() });

        let state = h.states.recv().await.unwrap();
        assert_eq!(state.last_position, 5000);
        assert_eq!(cycle.await.unwrap().lines_skipped, 1);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec_for(&dir.path().join("absent.log"), &[]);
        let (tx, _h) = channels();
        let mut sensor = Sensor::new(spec, 42, tx);

        let err = sensor.cycle().await.unwrap_err();
        assert!(matches!(err, LogPipelineError::Io { .. }));
        assert_eq!(sensor.offset(), 42);
    }

    #[tokio::test]
    async fn run_reports_open_failure_on_error_bus_and_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec_for(&dir.path().join("absent.log"), &[]);
        let (tx, mut h) = channels();
        let cancel = CancellationToken::new();
        let handle = Sensor::new(spec, 0, tx).spawn(cancel.clone());

        for _ in 0..3 {
            let err = h.errors.recv().await.unwrap();
            assert!(matches!(err, LogPipelineError::Io { .. }));
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sensor must stop after cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn run_stops_when_buses_close() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FAILED.as_bytes()).unwrap();
        file.flush().unwrap();

        let spec = spec_for(file.path(), &[]);
        let (tx, h) = channels();
        drop(h);

        let handle = Sensor::new(spec, 0, tx).spawn(CancellationToken::new());
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sensor must stop once the aggregator is gone")
            .unwrap();
    }
}

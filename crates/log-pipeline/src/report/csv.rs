//! CSV 리포트 발행기
//!
//! 출력 디렉토리에 `report_<timestamp>.csv`를 쓰고 `base_url + 파일명`을
//! 반환합니다.

use std::path::{Path, PathBuf};

use chrono::Utc;

use logwarden_core::event::Event;

use super::{ReportPublisher, summarize};
use crate::error::LogPipelineError;

/// 리포트 헤더 행
pub const HEADER: [&str; 5] = [
    "address",
    "country_code",
    "country_name",
    "total_events",
    "counters",
];

/// CSV 파일 기반 [`ReportPublisher`]
#[derive(Debug, Clone)]
pub struct CsvReportPublisher {
    output_dir: PathBuf,
    base_url: String,
}

impl CsvReportPublisher {
    /// 새 발행기를 생성합니다. `base_url`이 비어 있지 않으면 `/`로 끝나게 맞춥니다.
    pub fn new(output_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.is_empty() && !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            output_dir: output_dir.into(),
            base_url,
        }
    }

    /// 리포트 출력 디렉토리
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 이벤트 배치를 CSV 문자열로 렌더링합니다.
    pub fn render(events: &[Event]) -> Result<String, LogPipelineError> {
        let csv_err = |e: ::csv::Error| LogPipelineError::Report(format!("csv encoding failed: {e}"));

        let mut writer = ::csv::Writer::from_writer(Vec::new());
        writer.write_record(HEADER).map_err(csv_err)?;
        for row in summarize(events) {
            writer
                .write_record([
                    row.address.as_str(),
                    row.country_code.as_str(),
                    row.country_name.as_str(),
                    row.total.to_string().as_str(),
                    row.counters_joined("|").as_str(),
                ])
                .map_err(csv_err)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| LogPipelineError::Report(format!("csv flush failed: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| LogPipelineError::Report(format!("csv output is not utf-8: {e}")))
    }
}

impl ReportPublisher for CsvReportPublisher {
    fn publish(&self, events: &[Event]) -> Result<String, LogPipelineError> {
        let file_name = format!("report_{}.csv", Utc::now().format("%Y-%m-%dT%H:%M:%S%z"));
        let path = self.output_dir.join(&file_name);

        let io_err = |e: std::io::Error| LogPipelineError::Report(format!("{}: {e}", path.display()));
        std::fs::create_dir_all(&self.output_dir).map_err(io_err)?;
        let body = Self::render(events)?;
        std::fs::write(&path, body).map_err(io_err)?;

        let url = format!("{}{file_name}", self.base_url);
        tracing::info!(
            path = %path.display(),
            events = events.len(),
            url = %url,
            "report saved"
        );
        Ok(url)
    }
}

//! 리포트 발행 및 알림
//!
//! 집계기의 리포트 태스크는 미보고 이벤트를 [`ReportPublisher`]에 넘기고,
//! 발행에 성공하면 반환된 URL과 함께 [`Notifier`]를 호출합니다.
//!
//! 두 trait 모두 동기 인터페이스이며, 집계기는 `spawn_blocking`에서
//! 호출합니다.

pub mod csv;
pub mod notify;

pub use self::csv::CsvReportPublisher;
pub use notify::LogNotifier;

use std::collections::{BTreeMap, HashMap};

use logwarden_core::event::Event;

use crate::error::LogPipelineError;

/// 브로드캐스트 문구에 나열하는 최대 국가 수
pub const MAX_BROADCAST_COUNTRIES: usize = 5;

/// 이벤트 배치를 리포트로 발행합니다.
pub trait ReportPublisher: Send + Sync {
    /// 리포트를 발행하고 URL(또는 식별자)을 반환합니다.
    fn publish(&self, events: &[Event]) -> Result<String, LogPipelineError>;
}

/// 발행된 리포트를 알립니다. 실패는 로그로만 남습니다.
pub trait Notifier: Send + Sync {
    /// 배치와 리포트 URL로 알림을 보냅니다.
    fn notify(&self, events: &[Event], url: &str) -> Result<(), LogPipelineError>;
}

/// 출발지 주소별 집계 행
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSummary {
    /// 출발지 주소
    pub address: String,
    /// 주소의 첫 이벤트 기준 국가 코드
    pub country_code: String,
    /// 주소의 첫 이벤트 기준 국가명
    pub country_name: String,
    /// 전체 이벤트 수
    pub total: usize,
    /// `sensor/rule` 별 이벤트 수
    pub counters: BTreeMap<String, usize>,
}

impl AddressSummary {
    /// `sensor/rule:count` 쌍을 `separator`로 이어 붙입니다.
    pub fn counters_joined(&self, separator: &str) -> String {
        self.counters
            .iter()
            .map(|(name, count)| format!("{name}:{count}"))
            .collect::<Vec<_>>()
            .join(separator)
    }
}

/// 이벤트를 주소별로 묶어 이벤트 수 내림차순으로 정렬합니다.
///
/// 이벤트 수가 같으면 주소 순서로 정렬합니다.
pub fn summarize(events: &[Event]) -> Vec<AddressSummary> {
    let mut by_address: HashMap<&str, AddressSummary> = HashMap::new();
    for event in events {
        let row = by_address
            .entry(event.address.as_str())
            .or_insert_with(|| AddressSummary {
                address: event.address.clone(),
                country_code: event.country_code.clone(),
                country_name: event.country_name.clone(),
                total: 0,
                counters: BTreeMap::new(),
            });
        row.total += 1;
        *row.counters.entry(event.type_name()).or_insert(0) += 1;
    }

    let mut rows: Vec<_> = by_address.into_values().collect();
    rows.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.address.cmp(&b.address)));
    rows
}

/// 짧은 브로드캐스트 문구를 만듭니다.
///
/// 형식: `"{n} new event{s} from {countries} {url}"`
pub fn broadcast_text(events: &[Event], url: &str) -> String {
    let mut countries: Vec<&str> = Vec::new();
    for event in events {
        let name = event.country_name.as_str();
        if !name.is_empty() && !countries.contains(&name) {
            countries.push(name);
        }
    }

    let mut listed = countries
        .iter()
        .take(MAX_BROADCAST_COUNTRIES)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    if countries.is_empty() {
        listed.push_str("unknown");
    } else if countries.len() > MAX_BROADCAST_COUNTRIES {
        listed.push_str(", ...");
    }

    let n = events.len();
    let plural = if n == 1 { "" } else { "s" };
    format!("{n} new event{plural} from {listed} {url}")
}

//! 이벤트 모델: 센서가 생성하고 집계기가 보강/저장하는 레코드
//!
//! [`Event`]는 규칙에 매칭된 로그 라인 하나를 나타냅니다.
//! 생성 후에는 보강 필드(국가, 노드명, 저장/보고 시각)만 변경됩니다.
//!
//! [`SensorState`]는 (노드, 센서) 쌍별 마지막 처리 바이트 오프셋으로,
//! 재시작 후 이어 읽기에 사용됩니다.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 탐지 이벤트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// 이벤트 고유 ID (UUID v4)
    pub id: String,
    /// 저장 시각 (flush 시점에 기록)
    pub created_at: Option<DateTime<Utc>>,
    /// 파이프라인이 라인을 관측한 시각
    pub detected_at: DateTime<Utc>,
    /// 로그 라인 자체의 시각 (datetime 파싱 실패 시 None)
    pub happened_at: Option<DateTime<Utc>>,
    /// 이벤트를 수집한 노드명
    pub node_name: String,
    /// 출발지 주소
    pub address: String,
    /// 국가 코드 (보강 전에는 빈 문자열)
    pub country_code: String,
    /// 국가명 (보강 전에는 빈 문자열)
    pub country_name: String,
    /// 센서 이름
    pub sensor: String,
    /// 매칭된 규칙 이름
    pub rule: String,
    /// 매칭된 토큰 값
    pub payload: String,
    /// 리포트 발행 시각 (미보고 시 None)
    pub reported_at: Option<DateTime<Utc>>,
}

impl Event {
    /// 센서가 규칙 매칭 시점에 새 이벤트를 생성합니다.
    ///
    /// 국가/노드명/저장 시각은 집계기가 나중에 채웁니다.
    pub fn detected(
        sensor: impl Into<String>,
        rule: impl Into<String>,
        address: impl Into<String>,
        payload: impl Into<String>,
        happened_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: None,
            detected_at: Utc::now(),
            happened_at,
            node_name: String::new(),
            address: address.into(),
            country_code: String::new(),
            country_name: String::new(),
            sensor: sensor.into(),
            rule: rule.into(),
            payload: payload.into(),
            reported_at: None,
        }
    }

    /// 리포트에 포함된 적이 있는지 확인합니다.
    pub fn is_reported(&self) -> bool {
        self.reported_at.is_some()
    }

    /// `sensor/rule` 형식의 분류 키를 반환합니다.
    pub fn type_name(&self) -> String {
        format!("{}/{}", self.sensor, self.rule)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event[{}] {} {} from {}",
            self.id.get(..8).unwrap_or(self.id.as_str()),
            self.sensor,
            self.rule,
            self.address,
        )
    }
}

/// 센서 재개 위치
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorState {
    /// 노드명 (센서는 비워서 보내고 집계기가 채움)
    pub node_name: String,
    /// 센서 이름
    pub sensor_name: String,
    /// 마지막으로 처리한 바이트 오프셋
    pub last_position: u64,
}

impl SensorState {
    /// 센서가 보내는 위치 업데이트를 생성합니다.
    pub fn new(sensor_name: impl Into<String>, last_position: u64) -> Self {
        Self {
            node_name: String::new(),
            sensor_name: sensor_name.into(),
            last_position,
        }
    }
}

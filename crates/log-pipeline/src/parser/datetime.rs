//! datetime 토큰 보정 및 파싱
//!
//! syslog처럼 연도를 생략하는 형식을 위해, 토큰 값에 최근 6년(올해 ~ 올해-5)
//! 중 어느 연도도 부분 문자열로 나타나지 않으면 올해를 앞에 붙입니다.
//! 날짜 필드를 해석하지 않는 문자열 검사이므로, 포트 번호 같은 우연한
//! 4자리 숫자가 최근 연도와 같으면 보정이 생략됩니다.

use std::borrow::Cow;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};

use crate::error::LogPipelineError;

/// 올해를 포함해 검사할 과거 연도 수
pub const YEAR_WINDOW: i32 = 5;

/// 현재 연도 (UTC)
pub fn current_year() -> i32 {
    Utc::now().year()
}

/// 최근 연도가 없으면 `current_year`를 앞에 붙인 값을 반환합니다.
pub fn backfill_year(value: &str, current_year: i32) -> Cow<'_, str> {
    let has_recent_year = (current_year - YEAR_WINDOW..=current_year)
        .any(|year| value.contains(&year.to_string()));

    if has_recent_year {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(format!("{current_year} {value}"))
    }
}

/// 보정된 datetime 문자열을 chrono 형식 문자열로 파싱합니다.
///
/// 시간대가 없는 형식은 UTC로 간주합니다. 시간대가 있는 형식은
/// UTC로 변환합니다.
pub fn parse_datetime(value: &str, format: &str) -> Result<DateTime<Utc>, LogPipelineError> {
    match NaiveDateTime::parse_from_str(value, format) {
        Ok(naive) => Ok(naive.and_utc()),
        Err(naive_err) => DateTime::parse_from_str(value, format)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| LogPipelineError::Datetime {
                value: value.to_owned(),
                format: format.to_owned(),
                reason: naive_err.to_string(),
            }),
    }
}

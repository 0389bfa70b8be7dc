//! 라인 파서 -- 센서별 정규식으로 토큰 맵을 추출합니다.
//!
//! [`Parser`]는 센서 하나의 정규식과 토큰 이름 → 캡처 그룹 인덱스 매핑을
//! 컴파일한 결과입니다. 컴파일은 설정 로딩 시 한 번만 수행됩니다.
//!
//! # 매칭 규칙
//! - 정규식은 기본적으로 대소문자를 무시합니다 (`(?i)` 자동 접두)
//! - 참조된 최대 인덱스보다 캡처 그룹이 적으면 매칭 실패로 취급합니다
//! - 참여하지 않은 캡처 그룹은 빈 문자열이 됩니다
//! - `datetime` 토큰은 [`datetime::backfill_year`]로 보정됩니다
//!
//! # 사용 예시
//! ```ignore
//! use logwarden_log_pipeline::parser::Parser;
//!
//! let parser = Parser::compile("sshd", &sensor_config.parser)?;
//! if let Some(tokens) = parser.parse(line) {
//!     let happened_at = parser.parse_datetime(tokens.datetime().unwrap_or_default());
//! }
//! ```

pub mod datetime;

use chrono::{DateTime, Utc};
use regex::Regex;

use logwarden_core::config::ParserConfig;
use logwarden_core::types::{MANDATORY_TOKENS, TOKEN_DATETIME, Tokens};

use crate::error::LogPipelineError;

/// 대소문자 무시 인라인 플래그
const CASE_INSENSITIVE_FLAG: &str = "(?i)";

/// 컴파일된 라인 파서
#[derive(Debug, Clone)]
pub struct Parser {
    /// 컴파일된 정규식
    regex: Regex,
    /// `datetime` 토큰의 chrono 형식
    datetime_format: String,
    /// (토큰 이름, 캡처 그룹 인덱스)
    tokens: Vec<(String, usize)>,
    /// 참조된 최대 캡처 그룹 인덱스
    max_index: usize,
}

impl Parser {
    /// 파서 설정을 검증하고 컴파일합니다.
    ///
    /// 필수 토큰이 없으면 `Config`, 정규식이 잘못되면 `Pattern` 에러를
    /// 반환합니다. 필수 토큰 검사가 정규식 컴파일보다 먼저 수행됩니다.
    pub fn compile(owner: &str, config: &ParserConfig) -> Result<Self, LogPipelineError> {
        for token in MANDATORY_TOKENS {
            if !config.tokens.contains_key(token) {
                return Err(LogPipelineError::Config {
                    field: format!("sensors.{owner}.parser.tokens"),
                    reason: format!("mandatory token '{token}' not found in parser"),
                });
            }
        }

        let max_index = config.tokens.values().copied().max().unwrap_or(0);

        let expression = if config.expression.starts_with(CASE_INSENSITIVE_FLAG) {
            config.expression.clone()
        } else {
            format!("{CASE_INSENSITIVE_FLAG}{}", config.expression)
        };

        tracing::debug!(sensor = owner, expression = %expression, "compiling parser");

        let regex = Regex::new(&expression).map_err(|e| LogPipelineError::Pattern {
            owner: owner.to_owned(),
            reason: e.to_string(),
        })?;

        // captures_len()은 그룹 0(전체 매치)을 포함
        if max_index >= regex.captures_len() {
            tracing::warn!(
                sensor = owner,
                max_index,
                groups = regex.captures_len() - 1,
                "parser references more capture groups than the expression defines, no line will match"
            );
        }

        Ok(Self {
            regex,
            datetime_format: config.datetime_format.clone(),
            tokens: config
                .tokens
                .iter()
                .map(|(name, index)| (name.clone(), *index))
                .collect(),
            max_index,
        })
    }

    /// 라인에서 토큰을 추출합니다. 매칭되지 않으면 `None`을 반환합니다.
    pub fn parse(&self, line: &str) -> Option<Tokens> {
        self.parse_with_year(line, datetime::current_year())
    }

    /// 연도 보정 기준을 지정해 라인에서 토큰을 추출합니다.
    pub fn parse_with_year(&self, line: &str, current_year: i32) -> Option<Tokens> {
        let caps = self.regex.captures(line)?;
        if caps.len() <= self.max_index {
            return None;
        }

        let tokens = self
            .tokens
            .iter()
            .map(|(name, index)| {
                let raw = caps.get(*index).map_or("", |m| m.as_str());
                let value = if name == TOKEN_DATETIME {
                    datetime::backfill_year(raw, current_year).into_owned()
                } else {
                    raw.to_owned()
                };
                (name.clone(), value)
            })
            .collect();

        Some(tokens)
    }

    /// 보정된 datetime 토큰 값을 설정된 형식으로 파싱합니다.
    pub fn parse_datetime(&self, value: &str) -> Result<DateTime<Utc>, LogPipelineError> {
        datetime::parse_datetime(value, &self.datetime_format)
    }

    /// 설정된 datetime 형식을 반환합니다.
    pub fn datetime_format(&self) -> &str {
        &self.datetime_format
    }

    /// 참조된 최대 캡처 그룹 인덱스를 반환합니다.
    pub fn max_index(&self) -> usize {
        self.max_index
    }

    /// 실제로 컴파일된 정규식 문자열을 반환합니다.
    pub fn expression(&self) -> &str {
        self.regex.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    const SSHD_LINE: &str =
        "Jan 5 10:00:00 host sshd[123]: Failed password for root from 10.0.0.5 port 22 ssh2";

    fn sshd_config() -> ParserConfig {
        ParserConfig {
            expression: r"^(\w+\s+\d+\s+[\d:]+)\s+\S+\s+sshd\[\d+\]:\s+(.+?)\s+from\s+([\d.]+)"
                .to_owned(),
            datetime_format: "%Y %b %e %H:%M:%S".to_owned(),
            tokens: [("datetime", 1), ("line", 2), ("address", 3)]
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
        }
    }

    #[test]
    fn compile_rejects_missing_address_token() {
        let mut config = sshd_config();
        config.tokens.remove("address");
        let err = Parser::compile("sshd", &config).unwrap_err();
        assert!(matches!(err, LogPipelineError::Config { .. }));
        assert!(err.to_string().contains("address"));
    }

    #[test]
    fn compile_rejects_missing_datetime_before_regex() {
        let mut config = sshd_config();
        config.tokens.remove("datetime");
        config.expression = "([unclosed".to_owned();
        let err = Parser::compile("sshd", &config).unwrap_err();
        // 정규식 에러보다 필수 토큰 에러가 먼저
        assert!(matches!(err, LogPipelineError::Config { .. }));
        assert!(err.to_string().contains("datetime"));
    }

    #[test]
    fn compile_rejects_invalid_regex() {
        let mut config = sshd_config();
        config.expression = "([unclosed".to_owned();
        let err = Parser::compile("sshd", &config).unwrap_err();
        assert!(matches!(err, LogPipelineError::Pattern { .. }));
    }

    #[test]
    fn compile_prefixes_case_insensitive_flag_once() {
        let parser = Parser::compile("sshd", &sshd_config()).unwrap();
        assert!(parser.expression().starts_with("(?i)"));

        let mut config = sshd_config();
        config.expression = format!("(?i){}", config.expression);
        let parser = Parser::compile("sshd", &config).unwrap();
        assert!(!parser.expression().starts_with("(?i)(?i)"));
    }

    #[test]
    fn compile_computes_max_index() {
        let parser = Parser::compile("sshd", &sshd_config()).unwrap();
        assert_eq!(parser.max_index(), 3);
    }

    #[test]
    fn parse_extracts_tokens_and_backfills_year() {
        let parser = Parser::compile("sshd", &sshd_config()).unwrap();
        let tokens = parser.parse_with_year(SSHD_LINE, 2026).unwrap();

        assert_eq!(tokens.address(), Some("10.0.0.5"));
        assert_eq!(tokens.datetime(), Some("2026 Jan 5 10:00:00"));
        assert_eq!(tokens.get("line"), Some("Failed password for root"));
    }

    #[test]
    fn parse_is_case_insensitive() {
        let parser = Parser::compile("sshd", &sshd_config()).unwrap();
        let line = SSHD_LINE.replace("sshd", "SSHD").replace("from", "FROM");
        assert!(parser.parse(&line).is_some());
    }

    #[test]
    fn unmatched_line_yields_none() {
        let parser = Parser::compile("sshd", &sshd_config()).unwrap();
        assert!(parser.parse("kernel: eth0 link up").is_none());
    }

    #[test]
    fn index_beyond_group_count_never_matches() {
        let mut config = sshd_config();
        config.tokens.insert("extra".to_owned(), 9);
        let parser = Parser::compile("sshd", &config).unwrap();
        assert!(parser.parse(SSHD_LINE).is_none());
    }

    #[test]
    fn optional_group_yields_empty_value() {
        let config = ParserConfig {
            expression: r"^(\S+) (\S+)(?: user=(\S+))?".to_owned(),
            datetime_format: "%Y-%m-%d".to_owned(),
            tokens: [("datetime", 1), ("address", 2), ("user", 3)]
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
        };
        let parser = Parser::compile("app", &config).unwrap();
        let tokens = parser.parse_with_year("2025-01-01 1.2.3.4", 2026).unwrap();
        assert_eq!(tokens.get("user"), Some(""));
        assert_eq!(tokens.datetime(), Some("2025-01-01"));
    }

    #[test]
    fn parse_datetime_uses_configured_format() {
        let parser = Parser::compile("sshd", &sshd_config()).unwrap();
        let tokens = parser.parse_with_year(SSHD_LINE, 2026).unwrap();
        let dt = parser
            .parse_datetime(tokens.datetime().unwrap_or_default())
            .unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2026, 1, 5));
    }
}

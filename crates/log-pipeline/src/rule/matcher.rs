//! 단일 탐지 규칙 -- 토큰 하나를 정규식으로 검사합니다.
//!
//! 규칙 정규식은 파서와 달리 대소문자를 구분합니다.
//! 필요하면 설정에서 `(?i)`를 직접 붙입니다.

use regex::Regex;

use logwarden_core::config::RuleConfig;
use logwarden_core::types::Tokens;

use crate::error::LogPipelineError;

/// 컴파일된 탐지 규칙
#[derive(Debug, Clone)]
pub struct Rule {
    /// 규칙 이름
    name: String,
    /// 검사할 토큰 이름
    token: String,
    /// 설명
    description: String,
    /// 컴파일된 정규식
    regex: Regex,
}

impl Rule {
    /// 규칙 설정을 컴파일합니다.
    pub fn compile(config: &RuleConfig) -> Result<Self, LogPipelineError> {
        tracing::debug!(rule = %config.name, expression = %config.expression, "compiling rule");

        let regex = Regex::new(&config.expression).map_err(|e| LogPipelineError::Pattern {
            owner: config.name.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            name: config.name.clone(),
            token: config.token.clone(),
            description: config.description.clone(),
            regex,
        })
    }

    /// 토큰 맵을 검사합니다.
    ///
    /// 대상 토큰이 없거나 정규식에 맞지 않으면 `None`, 맞으면 토큰 값을 반환합니다.
    pub fn matches<'t>(&self, tokens: &'t Tokens) -> Option<&'t str> {
        tokens
            .get(&self.token)
            .filter(|value| self.regex.is_match(value))
    }

    /// 규칙 이름을 반환합니다.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 검사 대상 토큰 이름을 반환합니다.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// 설명을 반환합니다.
    pub fn description(&self) -> &str {
        &self.description
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, token: &str, expression: &str) -> Rule {
        Rule::compile(&RuleConfig {
            name: name.to_owned(),
            token: token.to_owned(),
            description: String::new(),
            expression: expression.to_owned(),
        })
        .unwrap()
    }

    fn tokens() -> Tokens {
        let mut tokens = Tokens::new();
        tokens.insert("address", "10.0.0.5");
        tokens.insert("datetime", "2026 Jan 5 10:00:00");
        tokens.insert("line", "Failed password for root");
        tokens
    }

    #[test]
    fn matching_token_returns_value() {
        let r = rule("failed-password", "line", "^Failed password");
        assert_eq!(r.matches(&tokens()), Some("Failed password for root"));
    }

    #[test]
    fn absent_token_never_matches() {
        let r = rule("any", "user", ".*");
        assert_eq!(r.matches(&tokens()), None);
    }

    #[test]
    fn rule_regex_is_case_sensitive() {
        let r = rule("lower", "line", "failed password");
        assert_eq!(r.matches(&tokens()), None);

        let r = rule("lower-i", "line", "(?i)failed password");
        assert!(r.matches(&tokens()).is_some());
    }

    #[test]
    fn invalid_expression_is_pattern_error() {
        let err = Rule::compile(&RuleConfig {
            name: "broken".to_owned(),
            token: "line".to_owned(),
            description: String::new(),
            expression: "(unclosed".to_owned(),
        })
        .unwrap_err();
        assert!(matches!(err, LogPipelineError::Pattern { ref owner, .. } if owner == "broken"));
    }
}

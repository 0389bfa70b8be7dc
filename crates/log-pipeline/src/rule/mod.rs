//! 탐지 규칙 -- 센서별 규칙 목록과 first-match 평가
//!
//! [`RuleSet`]은 선언 순서를 유지하며, 처음 매칭된 규칙 하나만 발화합니다.
//! 한 라인에서 이벤트는 최대 하나 생성됩니다.
//!
//! # 규칙 형식
//! ```toml
//! [[sensors.rules]]
//! name = "failed-password"
//! token = "line"
//! description = "Password authentication failure"
//! expression = "^Failed password"
//! ```

pub mod matcher;

pub use matcher::Rule;

use logwarden_core::config::RuleConfig;
use logwarden_core::types::Tokens;

use crate::error::LogPipelineError;

/// 규칙 매칭 결과
#[derive(Debug, Clone, Copy)]
pub struct RuleMatch<'a> {
    /// 발화한 규칙
    pub rule: &'a Rule,
    /// 매칭된 토큰 값
    pub value: &'a str,
}

/// 순서가 있는 규칙 목록
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// 규칙 설정 목록을 선언 순서대로 컴파일합니다.
    ///
    /// 하나라도 실패하면 첫 실패를 반환합니다.
    pub fn compile(configs: &[RuleConfig]) -> Result<Self, LogPipelineError> {
        let rules = configs
            .iter()
            .map(Rule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// 처음 매칭되는 규칙을 반환합니다.
    pub fn first_match<'a>(&'a self, tokens: &'a Tokens) -> Option<RuleMatch<'a>> {
        self.rules
            .iter()
            .find_map(|rule| rule.matches(tokens).map(|value| RuleMatch { rule, value }))
    }

    /// 규칙 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// 규칙이 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 규칙을 선언 순서대로 순회합니다.
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }
}

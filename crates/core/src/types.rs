//! 도메인 타입: 파서, 규칙, 집계기가 공유하는 공통 타입

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 출발지 식별자 토큰 이름 (보통 IP 주소)
pub const TOKEN_ADDRESS: &str = "address";

/// 로그 자체의 타임스탬프 토큰 이름
pub const TOKEN_DATETIME: &str = "datetime";

/// 모든 파서 설정에 반드시 존재해야 하는 토큰
pub const MANDATORY_TOKENS: [&str; 2] = [TOKEN_ADDRESS, TOKEN_DATETIME];

/// 한 라인에서 추출한 토큰 맵
///
/// 키는 센서 설정에서 자유롭게 정의하지만, 파싱에 성공한 라인은
/// 항상 [`TOKEN_ADDRESS`]와 [`TOKEN_DATETIME`]을 포함합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens(HashMap<String, String>);

impl Tokens {
    /// 빈 토큰 맵을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 토큰 값을 설정합니다.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// 토큰 값을 조회합니다.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// `address` 토큰 값을 반환합니다.
    pub fn address(&self) -> Option<&str> {
        self.get(TOKEN_ADDRESS)
    }

    /// `datetime` 토큰 값을 반환합니다.
    pub fn datetime(&self) -> Option<&str> {
        self.get(TOKEN_DATETIME)
    }

    /// 토큰 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 토큰이 하나도 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// (이름, 값) 쌍을 순회합니다.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for Tokens {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// 지리 정보 조회 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    /// ISO 국가 코드 (예: "KR")
    pub code: String,
    /// 영문 국가명 (예: "South Korea")
    pub name: String,
}

impl Country {
    /// 새 국가 정보를 생성합니다.
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.code)
    }
}

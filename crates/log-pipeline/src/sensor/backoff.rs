//! I/O 실패 후 재시도 지연

use std::time::Duration;

/// 상한이 있는 지수 백오프
///
/// 기본 간격이 0이면 항상 즉시 재시도합니다.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    /// 새 백오프를 생성합니다.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// 다음 재시도 전 대기 시간을 반환하고 시도 횟수를 늘립니다.
    pub fn next_delay(&mut self) -> Duration {
        if self.base.is_zero() {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// 성공 후 시도 횟수를 초기화합니다.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// 연속 실패 횟수를 반환합니다.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

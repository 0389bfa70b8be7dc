//! 이벤트 버퍼 -- 다음 flush까지 이벤트를 모아 둡니다.
//!
//! [`EventBuffer`]는 두 연산만 노출합니다.
//! - [`push`](EventBuffer::push): 집계기 메인 루프가 이벤트를 추가
//! - [`begin_flush`](EventBuffer::begin_flush): flush 태스크가 배치를 가져감
//!
//! 두 연산은 같은 잠금을 사용합니다. [`FlushBatch`]는 flush 패스 전체 동안
//! 잠금을 쥐고 있으므로, flush 중에 도착한 이벤트는 flush가 끝날 때까지
//! 대기합니다. 배치는 drop될 때 버퍼를 비웁니다. 개별 이벤트 저장에
//! 실패해도 다시 시도하지 않습니다.

use tokio::sync::{Mutex, MutexGuard};

use logwarden_core::event::Event;
use logwarden_core::metrics as m;

/// 잠금으로 보호되는 이벤트 버퍼
#[derive(Debug, Default)]
pub struct EventBuffer {
    inner: Mutex<Vec<Event>>,
}

impl EventBuffer {
    /// 빈 버퍼를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 이벤트를 추가합니다. flush가 진행 중이면 끝날 때까지 대기합니다.
    pub async fn push(&self, event: Event) {
        let mut events = self.inner.lock().await;
        events.push(event);
        metrics::gauge!(m::AGGREGATOR_BUFFER_SIZE).set(events.len() as f64);
    }

    /// flush 패스를 시작합니다.
    ///
    /// 반환된 배치가 살아 있는 동안 `push`는 대기합니다.
    pub async fn begin_flush(&self) -> FlushBatch<'_> {
        FlushBatch {
            guard: self.inner.lock().await,
        }
    }

    /// 현재 버퍼에 있는 이벤트 수를 반환합니다.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// 버퍼가 비어 있는지 확인합니다.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// 진행 중인 flush 패스
///
/// drop 시 버퍼를 비우고 잠금을 해제합니다.
pub struct FlushBatch<'a> {
    guard: MutexGuard<'a, Vec<Event>>,
}

impl FlushBatch<'_> {
    /// 배치의 이벤트 수
    pub fn len(&self) -> usize {
        self.guard.len()
    }

    /// 배치가 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }

    /// 보강을 위해 이벤트를 가변으로 순회합니다.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Event> {
        self.guard.iter_mut()
    }

    /// 이벤트를 순회합니다.
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.guard.iter()
    }
}

impl Drop for FlushBatch<'_> {
    fn drop(&mut self) {
        self.guard.clear();
        metrics::gauge!(m::AGGREGATOR_BUFFER_SIZE).set(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn event(n: usize) -> Event {
        Event::detected("sshd", "failed-password", format!("10.0.0.{n}"), "Failed", None)
    }

    #[tokio::test]
    async fn push_then_flush_clears() {
        let buffer = EventBuffer::new();
        for i in 0..3 {
            buffer.push(event(i)).await;
        }
        assert_eq!(buffer.len().await, 3);

        {
            let batch = buffer.begin_flush().await;
            assert_eq!(batch.len(), 3);
            let addresses: Vec<_> = batch.iter().map(|e| e.address.as_str()).collect();
            assert_eq!(addresses, vec!["10.0.0.0", "10.0.0.1", "10.0.0.2"]);
        }

        assert!(buffer.is_empty().await);
    }

    #[tokio::test]
    async fn batch_mutation_is_visible_during_flush() {
        let buffer = EventBuffer::new();
        buffer.push(event(1)).await;

        let mut batch = buffer.begin_flush().await;
        for e in batch.iter_mut() {
            e.node_name = "edge-1".to_owned();
        }
        assert!(batch.iter().all(|e| e.node_name == "edge-1"));
    }

    #[tokio::test]
    async fn push_waits_for_flush_in_progress() {
        let buffer = Arc::new(EventBuffer::new());
        buffer.push(event(1)).await;

        let batch = buffer.begin_flush().await;
        let pusher = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.push(event(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!pusher.is_finished(), "push must wait for the flush pass");
        assert_eq!(batch.len(), 1);
        drop(batch);

        pusher.await.unwrap();
        // flush 후 도착한 이벤트는 남아 있음
        assert_eq!(buffer.len().await, 1);
    }

    #[tokio::test]
    async fn empty_flush_is_noop() {
        let buffer = EventBuffer::new();
        let batch = buffer.begin_flush().await;
        assert!(batch.is_empty());
    }
}

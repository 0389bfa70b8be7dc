//! 로그 기반 알림

use logwarden_core::event::Event;

use super::{Notifier, broadcast_text};
use crate::error::LogPipelineError;

/// 브로드캐스트 문구를 `info` 로그로 남기는 [`Notifier`]
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, events: &[Event], url: &str) -> Result<(), LogPipelineError> {
        let text = broadcast_text(events, url);
        tracing::info!(events = events.len(), url = %url, broadcast = %text, "report broadcast");
        Ok(())
    }
}

//! 랑데부 채널 -- 센서와 집계기를 잇는 이벤트/상태/에러 버스
//!
//! [`BusSender::send`]는 소비자가 [`BusReceiver::recv`]로 항목을 꺼낸 뒤에야
//! 완료됩니다. 센서는 집계기보다 앞서 달릴 수 없고, 한 송신자가 보낸
//! 항목은 보낸 순서대로 도착합니다. 송신자 간 순서는 보장하지 않습니다.
//!
//! 내부적으로 용량 1의 `mpsc` 채널에 `oneshot` 확인 신호를 실어 보냅니다.

use tokio::sync::{mpsc, oneshot};

use crate::error::LogPipelineError;

type Envelope<T> = (T, oneshot::Sender<()>);

/// 랑데부 채널을 생성합니다.
pub fn bus<T>() -> (BusSender<T>, BusReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (BusSender { tx }, BusReceiver { rx })
}

/// 버스 송신측 (복제 가능)
pub struct BusSender<T> {
    tx: mpsc::Sender<Envelope<T>>,
}

impl<T> Clone for BusSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> BusSender<T> {
    /// 항목을 보내고 소비자가 받을 때까지 대기합니다.
    ///
    /// 수신측이 닫혔거나 확인 전에 버려지면 `Channel` 에러를 반환합니다.
    pub async fn send(&self, item: T) -> Result<(), LogPipelineError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send((item, ack_tx))
            .await
            .map_err(|_| LogPipelineError::Channel("bus receiver closed".to_owned()))?;
        ack_rx.await.map_err(|_| {
            LogPipelineError::Channel("bus receiver dropped item before accepting it".to_owned())
        })
    }

    /// 수신측이 닫혔는지 확인합니다.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 버스 수신측
pub struct BusReceiver<T> {
    rx: mpsc::Receiver<Envelope<T>>,
}

impl<T> BusReceiver<T> {
    /// 다음 항목을 받습니다. 모든 송신측이 사라지면 `None`을 반환합니다.
    ///
    /// 취소 안전합니다. `tokio::select!` 분기에서 사용할 수 있습니다.
    pub async fn recv(&mut self) -> Option<T> {
        let (item, ack) = self.rx.recv().await?;
        // 송신측이 이미 포기했다면 무시
        let _ = ack.send(());
        Some(item)
    }

    /// 수신측을 닫습니다. 대기 중인 송신은 실패합니다.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

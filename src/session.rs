//! 接続中のセッション
//!
//! 1ユーザー1接続。書き込みはセッション単位の非同期Mutexで直列化し、
//! 同じ宛先へのメッセージが混ざったり順序が入れ替わったりしないようにする。

use crate::error::SessionBroken;
use crate::types::{OutboundFrame, UserId};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// 1フレームの書き込み（送信ロック待ちを含む）の上限
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// セッションの送信側
#[async_trait]
pub trait SessionSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SessionBroken>;

    /// 切断フレームを送って送信側を閉じる（失敗は無視）
    async fn close(&mut self);
}

/// 登録済みの接続
pub struct Session {
    id: u64,
    user_id: UserId,
    sink: Mutex<Box<dyn SessionSink>>,
    closed: AtomicBool,
    write_timeout: Duration,
}

impl Session {
    pub fn new(user_id: impl Into<UserId>, sink: Box<dyn SessionSink>) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            user_id: user_id.into(),
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// プロセス内で一意なセッションID
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 以降の書き込みを拒否する
    ///
    /// # Returns
    /// すでに閉じられていた場合は `false`
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    /// フレームを1件書き込む
    ///
    /// 書き込みに失敗した、または書き込みタイムアウトを超えたセッションは
    /// 閉じた状態になる。
    pub async fn send(&self, frame: &OutboundFrame) -> Result<(), SessionBroken> {
        if self.is_closed() {
            return Err(SessionBroken(format!("session {} closed", self.id)));
        }

        let write = async {
            let mut sink = self.sink.lock().await;
            // ロック待ちの間に閉じられた場合
            if self.is_closed() {
                return Err(SessionBroken(format!("session {} closed", self.id)));
            }
            sink.send_text(frame.to_json()).await
        };

        let result = match timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(SessionBroken(format!(
                "session {} write timed out ({:?})",
                self.id, self.write_timeout
            ))),
        };

        if result.is_err() {
            self.closed.store(true, Ordering::SeqCst);
        }
        result
    }

    /// セッションを閉じる
    ///
    /// 書き込み中のフレームがあれば完了を待ってから切断フレームを送る。
    /// 書き込みタイムアウトを超えた場合は切断フレームを諦める。
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let close = async {
            let mut sink = self.sink.lock().await;
            sink.close().await;
        };
        if timeout(self.write_timeout, close).await.is_err() {
            log::debug!("session {}: 切断フレームの送信がタイムアウトしました", self.id);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// axum WebSocket の送信側
pub struct WebSocketSink {
    inner: SplitSink<WebSocket, Message>,
}

impl WebSocketSink {
    pub fn new(inner: SplitSink<WebSocket, Message>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl SessionSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<(), SessionBroken> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SessionBroken(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.inner.send(Message::Close(None)).await {
            log::debug!("切断フレーム送信失敗: {}", e);
        }
        if let Err(e) = self.inner.close().await {
            log::debug!("WebSocket クローズ失敗: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingSink, StalledSink};

    #[tokio::test]
    async fn test_send_writes_json() {
        let sink = RecordingSink::default();
        let session = sink.session("alice");

        session
            .send(&OutboundFrame::message("bob", "hi"))
            .await
            .unwrap();

        assert_eq!(sink.frames(), vec![r#"{"from":"bob","message":"hi"}"#]);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_writes() {
        let sink = RecordingSink::default();
        let session = sink.session("alice");

        assert!(session.mark_closed());
        assert!(!session.mark_closed());
        assert!(session.send(&OutboundFrame::message("bob", "hi")).await.is_err());
        assert!(sink.frames().is_empty());
    }

    #[tokio::test]
    async fn test_broken_sink_closes_session() {
        let sink = RecordingSink::default();
        let session = sink.session("alice");
        sink.break_pipe();

        assert!(session.send(&OutboundFrame::message("bob", "hi")).await.is_err());
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_stalled_write_times_out() {
        let session = StalledSink.session("alice", Duration::from_millis(50));

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            session.send(&OutboundFrame::message("bob", "hi")),
        )
        .await
        .unwrap();

        assert!(result.is_err());
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_close_does_not_hang_on_stalled_sink() {
        let session = StalledSink.session("alice", Duration::from_millis(50));
        let writer = {
            let session = session.clone();
            tokio::spawn(async move { session.send(&OutboundFrame::message("bob", "hi")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        tokio::time::timeout(Duration::from_secs(2), session.close())
            .await
            .unwrap();
        assert!(writer.await.unwrap().is_err());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = RecordingSink::default().session("alice");
        let b = RecordingSink::default().session("alice");
        assert_ne!(a.id(), b.id());
    }
}

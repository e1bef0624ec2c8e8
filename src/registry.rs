//! 接続レジストリ
//!
//! ユーザーIDごとに最大1つのセッションを保持する。新しい接続が登録されると
//! 既存のセッションは閉じられ置き換えられる。
//!
//! マップのロックは差し替え・検索・削除の間だけ保持し、ソケットへの
//! 書き込み中は保持しない。遅いクライアントが他のユーザーへの配送を
//! 止めることはない。

use crate::session::Session;
use crate::types::{OutboundFrame, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// 配送結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered,
    RecipientOffline,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<UserId, Arc<Session>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// セッションを登録する
    ///
    /// 同じユーザーの既存セッションは書き込みを止めてから置き換え、
    /// 切断は別タスクで行う。
    ///
    /// # Returns
    /// 置き換えられたセッション
    pub async fn register(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let evicted = {
            let mut entries = self.entries.lock().await;
            let previous = entries.insert(session.user_id().to_string(), session.clone());
            match previous {
                Some(old) if old.id() != session.id() => {
                    old.mark_closed();
                    Some(old)
                }
                _ => None,
            }
        };

        if let Some(old) = &evicted {
            log::info!(
                "{}: 新しい接続で置き換えます (session {} → {})",
                session.user_id(),
                old.id(),
                session.id()
            );
            // 古い接続への書き込みが詰まっていても登録は待たせない
            let old = old.clone();
            tokio::spawn(async move { old.close().await });
        } else {
            log::info!("{}: 接続しました (session {})", session.user_id(), session.id());
        }

        evicted
    }

    /// セッションを登録解除する
    ///
    /// 登録中のセッションが `session` 自身である場合だけ削除する。
    /// 置き換え済みの古いセッションからの呼び出しは何もしない。
    pub async fn deregister(&self, user_id: &str, session: &Session) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get(user_id) {
            Some(current) if current.id() == session.id() => {
                entries.remove(user_id);
                log::info!("{}: 切断しました (session {})", user_id, session.id());
                true
            }
            _ => false,
        }
    }

    /// 宛先のセッションにフレームを1件書き込む
    ///
    /// 書き込みに失敗した場合はそのセッションを登録解除し、
    /// オフラインとして扱う。
    pub async fn deliver(&self, user_id: &str, frame: &OutboundFrame) -> DeliveryResult {
        let session = {
            let entries = self.entries.lock().await;
            entries.get(user_id).cloned()
        };

        let Some(session) = session else {
            return DeliveryResult::RecipientOffline;
        };

        match session.send(frame).await {
            Ok(()) => DeliveryResult::Delivered,
            Err(e) => {
                log::warn!("{}: 書き込み失敗、登録解除します: {}", user_id, e);
                self.deregister(user_id, &session).await;
                DeliveryResult::RecipientOffline
            }
        }
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.entries.lock().await.contains_key(user_id)
    }

    /// 接続中のユーザー一覧（ソート済み）
    pub async fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.entries.lock().await.keys().cloned().collect();
        users.sort();
        users
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

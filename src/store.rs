//! メッセージストア
//!
//! 受理したメッセージを配送結果に関係なく1件ずつ記録する。
//! `append` は書き込みが永続化されてから返る。

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::types::MessageRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, record: &MessageRecord) -> Result<(), StoreError>;

    /// `user_id` が送信者または受信者のレコードを挿入順で返す
    async fn list(&self, user_id: &str) -> Result<Vec<MessageRecord>, StoreError>;
}

/// 設定からストアを構築
///
/// `path` 未指定時はメモリストアを使う。
pub async fn from_config(config: &StoreConfig) -> Result<Arc<dyn MessageStore>> {
    match &config.path {
        Some(path) => {
            let store = JsonlMessageStore::open(path)
                .await
                .with_context(|| format!("メッセージストアを開けません: {}", path))?;
            log::info!("メッセージストア: {}", path);
            Ok(Arc::new(store))
        }
        None => {
            log::warn!("メッセージストアのパスが未設定です。メモリ上に保持します");
            Ok(Arc::new(MemoryMessageStore::new()))
        }
    }
}

/// JSON Lines ファイルストア
///
/// 1行1レコード。追記ごとに `sync_data` する。
pub struct JsonlMessageStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlMessageStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl MessageStore for JsonlMessageStore {
    async fn append(&self, record: &MessageRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        // 追記途中の行を読まないよう書き込みロックを取る
        let _guard = self.file.lock().await;
        let content = tokio::fs::read_to_string(&self.path).await?;

        let mut records = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MessageRecord>(line) {
                Ok(record) if record.involves(user_id) => records.push(record),
                Ok(_) => {}
                Err(e) => {
                    log::warn!("{:?}:{}: 不正なレコードをスキップ: {}", self.path, lineno + 1, e);
                }
            }
        }
        Ok(records)
    }
}

/// メモリストア（再起動で消える）
#[derive(Default)]
pub struct MemoryMessageStore {
    records: RwLock<Vec<MessageRecord>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全レコード
    pub async fn all(&self) -> Vec<MessageRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, record: &MessageRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.involves(user_id))
            .cloned()
            .collect())
    }
}

//! アカウントサービス
//!
//! 設定ファイルの `[[accounts]]` を唯一のユーザー台帳として使う。
//! トークンの発行は行わず、設定されたトークンとの一致だけを確認する。

use crate::config::AccountConfig;
use crate::error::AuthError;
use crate::types::UserId;
use async_trait::async_trait;
use std::collections::HashMap;

/// 接続時に提示される資格情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub token: Option<String>,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token,
        }
    }
}

#[async_trait]
pub trait AccountService: Send + Sync {
    /// アカウントが存在するか（接続状態とは無関係）
    async fn exists(&self, user_id: &str) -> bool;

    async fn authenticate(&self, credentials: &Credentials) -> Result<UserId, AuthError>;
}

/// 設定ファイルで宣言された固定アカウント
pub struct StaticAccountService {
    tokens: HashMap<UserId, Option<String>>,
}

impl StaticAccountService {
    pub fn from_config(accounts: &[AccountConfig]) -> Self {
        let tokens = accounts
            .iter()
            .map(|a| (a.user_id.clone(), a.token.clone()))
            .collect();
        Self { tokens }
    }

    /// トークンなしのアカウントを作成
    pub fn with_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UserId>,
    {
        let tokens = users.into_iter().map(|u| (u.into(), None)).collect();
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl AccountService for StaticAccountService {
    async fn exists(&self, user_id: &str) -> bool {
        self.tokens.contains_key(user_id)
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<UserId, AuthError> {
        let expected = self
            .tokens
            .get(&credentials.user_id)
            .ok_or_else(|| AuthError::UnknownUser(credentials.user_id.clone()))?;

        match expected {
            None => Ok(credentials.user_id.clone()),
            Some(token) if credentials.token.as_deref() == Some(token.as_str()) => {
                Ok(credentials.user_id.clone())
            }
            Some(_) => Err(AuthError::InvalidToken(credentials.user_id.clone())),
        }
    }
}

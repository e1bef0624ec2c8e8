//! エラー型
//!
//! パイプライン各ステージ、配送、永続化、認証のエラーを型で区別する。
//! `DecodeError` 以外のステージエラーはオーケストレータ内で部分結果に格下げされる。

use std::time::Duration;
use thiserror::Error;

/// 音声デコード失敗（パイプラインを中断する唯一のステージエラー）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("音声データが空です")]
    Empty,

    #[error("音声フォーマットを認識できません: {0}")]
    Unsupported(String),

    #[error("音声デコードに失敗: {0}")]
    Malformed(String),

    #[error("音声デコードがタイムアウト ({0:?})")]
    Timeout(Duration),
}

/// 文字起こし失敗
///
/// 認識結果が空文字列なのはエラーではない（無音）。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranscriptionError {
    #[error("文字起こしエンジンが利用できません")]
    Unavailable,

    #[error("文字起こしエンジンがエラーを返しました: {0}")]
    Engine(String),

    #[error("文字起こしがタイムアウト ({0:?})")]
    Timeout(Duration),
}

/// 翻訳失敗
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("翻訳エンジンが利用できません")]
    Unavailable,

    #[error("翻訳エンジンがエラーを返しました: {0}")]
    Engine(String),

    #[error("翻訳がタイムアウト ({0:?})")]
    Timeout(Duration),
}

/// 音声合成失敗
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("音声合成エンジンが利用できません")]
    Unavailable,

    #[error("音声合成エンジンがエラーを返しました: {0}")]
    Engine(String),

    #[error("音声合成がタイムアウト ({0:?})")]
    Timeout(Duration),
}

/// セッションへの書き込み失敗（切断済み・送信エラー）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("セッションが切断されています: {0}")]
pub struct SessionBroken(pub String);

/// 認証失敗
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("不明なユーザー: {0}")]
    UnknownUser(String),

    #[error("アクセストークンが一致しません: {0}")]
    InvalidToken(String),
}

/// メッセージストアのエラー
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("メッセージストアI/Oエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("メッセージレコードのシリアライズに失敗: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// ルーターが送信者に返すエラー
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("不正なメッセージ形式: {0}")]
    MalformedFrame(String),

    #[error("宛先ユーザーが存在しません: {0}")]
    RecipientUnknown(String),

    #[error("メッセージの保存に失敗しました")]
    StoreFailed,

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("音声が検出されませんでした")]
    NoSpeech,

    #[error("文字起こしに失敗しました")]
    TranscriptionFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        assert_eq!(DecodeError::Empty.to_string(), "音声データが空です");
        assert_eq!(
            DecodeError::Malformed("bad header".to_string()).to_string(),
            "音声デコードに失敗: bad header"
        );
    }

    #[test]
    fn test_route_error_wraps_decode_error() {
        let err: RouteError = DecodeError::Empty.into();
        assert_eq!(err, RouteError::Decode(DecodeError::Empty));
        assert_eq!(err.to_string(), "音声データが空です");
    }

    #[test]
    fn test_store_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: StoreError = io.into();
        assert!(err.to_string().contains("disk full"));
    }
}

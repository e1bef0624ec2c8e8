use crate::error::TranscriptionError;
use crate::types::PcmBuffer;
use async_trait::async_trait;

/// 文字起こしバックエンドの共通トレイト
///
/// 起動時に1度だけ構築され、全リクエストから読み取り専用で共有される。
#[async_trait]
pub trait TranscribeBackend: Send + Sync {
    /// PCMバッファを文字起こし
    ///
    /// # Returns
    /// 認識テキスト。音声が含まれない場合は空文字列（エラーではない）
    async fn transcribe(&self, pcm: &PcmBuffer) -> Result<String, TranscriptionError>;

    /// ログ用のバックエンド名
    fn name(&self) -> &'static str;
}

/// 文字起こし未設定時のバックエンド
///
/// 常に `Unavailable` を返し、パイプラインは空の認識結果として扱う。
pub struct DisabledTranscriber;

#[async_trait]
impl TranscribeBackend for DisabledTranscriber {
    async fn transcribe(&self, _pcm: &PcmBuffer) -> Result<String, TranscriptionError> {
        Err(TranscriptionError::Unavailable)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

//! パイプラインオーケストレータ
//!
//! デコード → 文字起こし → 翻訳 → 音声合成 を1リクエストずつ順に実行する。
//!
//! ```text
//! [audio] → Decode ─(DecodeError: 中断)─┐
//!              ↓                         ↓
//!          Transcribe ─(空 / 失敗)→ 空の結果
//!              ↓
//!          Translate ─(失敗)→ 原文を返し、合成はスキップ
//!              ↓
//!          Synthesize ─(失敗)→ 音声なし
//! ```
//!
//! 各ステージは独立したタイムアウトを持ち、タイムアウトはそのステージの
//! エラーと同じ扱いになる。エンジンは起動時に構築されたものを共有し、
//! リクエスト間で可変状態を持たない。

use crate::config::PipelineConfig;
use crate::error::{DecodeError, SynthesisError, TranscriptionError, TranslationError};
use crate::transcoder::Transcoder;
use crate::transcribe_backend::TranscribeBackend;
use crate::translate::Translator;
use crate::tts::SpeechSynthesizer;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// ステージごとのタイムアウト
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub decode: Duration,
    pub transcribe: Duration,
    pub translate: Duration,
    pub synthesize: Duration,
}

impl From<&PipelineConfig> for StageTimeouts {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            decode: config.decode_timeout(),
            transcribe: config.transcribe_timeout(),
            translate: config.translate_timeout(),
            synthesize: config.synthesize_timeout(),
        }
    }
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

/// 翻訳ステージの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationOutcome {
    Translated(String),
    /// 翻訳失敗。原文をそのまま使う
    Failed(TranslationError),
    /// 翻訳先未指定、または認識テキストが空
    Skipped,
}

/// 音声合成ステージの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    Audio(Vec<u8>),
    Failed(SynthesisError),
    Skipped,
}

/// パイプラインの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResult {
    /// 認識テキスト（テキスト入力の場合は入力そのもの）
    pub recognized_text: String,
    /// 文字起こしエンジンの失敗（空の認識結果に格下げ済み）
    pub transcription_error: Option<TranscriptionError>,
    pub translation: TranslationOutcome,
    pub synthesis: SynthesisOutcome,
}

impl PipelineResult {
    /// 音声が検出されなかった場合の結果
    fn empty(transcription_error: Option<TranscriptionError>) -> Self {
        Self {
            recognized_text: String::new(),
            transcription_error,
            translation: TranslationOutcome::Skipped,
            synthesis: SynthesisOutcome::Skipped,
        }
    }

    /// 受信者に届けるテキスト
    ///
    /// 翻訳に失敗・スキップした場合は認識テキストを返す。
    pub fn translated_text(&self) -> &str {
        match &self.translation {
            TranslationOutcome::Translated(text) => text,
            TranslationOutcome::Failed(_) | TranslationOutcome::Skipped => &self.recognized_text,
        }
    }

    pub fn audio(&self) -> Option<&[u8]> {
        match &self.synthesis {
            SynthesisOutcome::Audio(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.recognized_text.trim().is_empty()
    }
}

/// パイプラインオーケストレータ
///
/// レジストリのロックを一切保持しない。複数リクエストを同時に実行できる。
pub struct PipelineOrchestrator {
    transcoder: Arc<dyn Transcoder>,
    transcriber: Arc<dyn TranscribeBackend>,
    translator: Arc<dyn Translator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    timeouts: StageTimeouts,
}

impl PipelineOrchestrator {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        transcriber: Arc<dyn TranscribeBackend>,
        translator: Arc<dyn Translator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        timeouts: StageTimeouts,
    ) -> Self {
        log::info!(
            "パイプライン: transcribe={}, translate={}, tts={}",
            transcriber.name(),
            translator.name(),
            synthesizer.name()
        );
        Self {
            transcoder,
            transcriber,
            translator,
            synthesizer,
            timeouts,
        }
    }

    /// 音声入力のパイプラインを実行
    ///
    /// `target` が `None` の場合は文字起こしのみ行う。
    ///
    /// # Errors
    ///
    /// デコードに失敗した場合のみエラーを返す。それ以外のステージの失敗は
    /// 結果の中に記録される。
    pub async fn run_audio(
        &self,
        audio: &[u8],
        target: Option<&str>,
    ) -> Result<PipelineResult, DecodeError> {
        // 1. Decode
        let pcm = run_stage(
            self.timeouts.decode,
            self.transcoder.decode(audio),
            DecodeError::Timeout,
        )
        .await?;

        // 2. Transcribe
        let recognized = run_stage(
            self.timeouts.transcribe,
            self.transcriber.transcribe(&pcm),
            TranscriptionError::Timeout,
        )
        .await;

        let recognized = match recognized {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                log::warn!("文字起こし失敗（空の結果として続行）: {}", e);
                return Ok(PipelineResult::empty(Some(e)));
            }
        };

        if recognized.is_empty() {
            log::info!("音声が検出されませんでした");
            return Ok(PipelineResult::empty(None));
        }

        Ok(self.translate_and_synthesize(recognized, target).await)
    }

    /// テキスト入力のパイプラインを実行（翻訳 → 音声合成）
    pub async fn run_text(&self, text: &str, target: &str) -> PipelineResult {
        let text = text.trim();
        if text.is_empty() {
            return PipelineResult::empty(None);
        }
        self.translate_and_synthesize(text.to_string(), Some(target))
            .await
    }

    async fn translate_and_synthesize(
        &self,
        recognized_text: String,
        target: Option<&str>,
    ) -> PipelineResult {
        let Some(target) = target else {
            return PipelineResult {
                recognized_text,
                transcription_error: None,
                translation: TranslationOutcome::Skipped,
                synthesis: SynthesisOutcome::Skipped,
            };
        };

        // 3. Translate
        let translation = match run_stage(
            self.timeouts.translate,
            self.translator.translate(&recognized_text, target),
            TranslationError::Timeout,
        )
        .await
        {
            Ok(text) => TranslationOutcome::Translated(text),
            Err(e) => {
                log::warn!("翻訳失敗（原文を使用）: {}", e);
                TranslationOutcome::Failed(e)
            }
        };

        // 4. Synthesize
        let synthesis = match &translation {
            TranslationOutcome::Translated(text) if is_speakable(text) => {
                match run_stage(
                    self.timeouts.synthesize,
                    self.synthesizer.synthesize(text.trim(), target),
                    SynthesisError::Timeout,
                )
                .await
                {
                    Ok(audio) => SynthesisOutcome::Audio(audio),
                    Err(e) => {
                        log::warn!("音声合成失敗（音声なしで続行）: {}", e);
                        SynthesisOutcome::Failed(e)
                    }
                }
            }
            _ => SynthesisOutcome::Skipped,
        };

        PipelineResult {
            recognized_text,
            transcription_error: None,
            translation,
            synthesis,
        }
    }
}

/// ステージをタイムアウト付きで実行し、タイムアウトをステージのエラーに変換
async fn run_stage<T, E, F>(
    limit: Duration,
    stage: F,
    on_timeout: impl FnOnce(Duration) -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout(limit, stage).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(limit)),
    }
}

/// 音声合成の対象にできるテキストか
///
/// 空文字列と `[...]` 形式のエラーマーカーは読み上げない。
fn is_speakable(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty() && !(text.starts_with('[') && text.ends_with(']'))
}

//! 音声合成アダプタ
//!
//! Google 翻訳の読み上げエンドポイント（gTTS と同じもの）を使う。
//! 1リクエストあたりの文字数に上限があるため、テキストを分割して
//! 取得した MP3 セグメントを連結する。

use crate::config::TtsConfig;
use crate::error::SynthesisError;
use anyhow::{Context, Result};
use async_trait::async_trait;

/// 1リクエストあたりの最大文字数
const MAX_CHUNK_CHARS: usize = 100;

/// 音声合成エンジンの共通トレイト
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// `text` を `lang` の音声に合成（MP3 バイト列）
    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>, SynthesisError>;

    fn name(&self) -> &'static str;
}

pub struct DisabledSynthesizer;

#[async_trait]
impl SpeechSynthesizer for DisabledSynthesizer {
    async fn synthesize(&self, _text: &str, _lang: &str) -> Result<Vec<u8>, SynthesisError> {
        Err(SynthesisError::Unavailable)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Google 翻訳 TTS バックエンド
pub struct GoogleTtsBackend {
    endpoint: String,
    client: reqwest::Client,
}

impl GoogleTtsBackend {
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .context("TTS HTTPクライアント作成失敗")?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
        })
    }

    async fn fetch_segment(&self, segment: &str, lang: &str, idx: usize, total: usize) -> Result<Vec<u8>> {
        let idx = idx.to_string();
        let total = total.to_string();
        let textlen = segment.chars().count().to_string();

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("ie", "UTF-8"),
                ("q", segment),
                ("tl", lang),
                ("client", "tw-ob"),
                ("idx", idx.as_str()),
                ("total", total.as_str()),
                ("textlen", textlen.as_str()),
            ])
            .send()
            .await
            .context("TTS リクエスト失敗")?;

        if !response.status().is_success() {
            anyhow::bail!("TTS エラー: {}", response.status());
        }

        let bytes = response.bytes().await.context("TTS レスポンス読み込み失敗")?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTtsBackend {
    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>, SynthesisError> {
        let segments = split_text(text, MAX_CHUNK_CHARS);
        let total = segments.len();
        let mut audio = Vec::new();

        for (idx, segment) in segments.iter().enumerate() {
            let bytes = self
                .fetch_segment(segment, lang, idx, total)
                .await
                .map_err(|e| SynthesisError::Engine(format!("{e:#}")))?;
            audio.extend_from_slice(&bytes);
        }

        if audio.is_empty() {
            return Err(SynthesisError::Engine("音声データが空です".to_string()));
        }

        log::debug!("音声合成完了: {} セグメント, {} バイト", total, audio.len());
        Ok(audio)
    }

    fn name(&self) -> &'static str {
        "google-tts"
    }
}

/// テキストを `max_chars` 文字以下のセグメントに分割
///
/// 可能なら句読点・空白の直後で区切る。
fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    const BREAKS: [char; 10] = [' ', '\n', '.', ',', '!', '?', '。', '、', '！', '？'];

    let mut segments = Vec::new();
    let mut rest: Vec<char> = text.trim().chars().collect();

    while rest.len() > max_chars {
        let cut = rest[..max_chars]
            .iter()
            .rposition(|c| BREAKS.contains(c))
            .map(|pos| pos + 1)
            .unwrap_or(max_chars);
        let segment: String = rest.drain(..cut).collect();
        let segment = segment.trim();
        if !segment.is_empty() {
            segments.push(segment.to_string());
        }
    }

    let tail: String = rest.into_iter().collect();
    let tail = tail.trim();
    if !tail.is_empty() {
        segments.push(tail.to_string());
    }

    segments
}

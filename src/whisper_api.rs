use crate::config::WhisperConfig;
use crate::error::TranscriptionError;
use crate::transcribe_backend::TranscribeBackend;
use crate::types::PcmBuffer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use std::io::Cursor;

/// OpenAI Whisper API レスポンス
#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
}

/// OpenAI Whisper API バックエンド
pub struct WhisperBackend {
    config: WhisperConfig,
    client: reqwest::Client,
}

impl WhisperBackend {
    pub fn new(config: WhisperConfig) -> Result<Self> {
        // 全体のタイムアウトはパイプライン側で管理する
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Whisper API HTTPクライアント作成失敗")?;

        Ok(Self { config, client })
    }

    /// PCMデータを16ビットWAVフォーマットに変換
    fn pcm_to_wav(pcm: &PcmBuffer) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: pcm.format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer =
                hound::WavWriter::new(&mut cursor, spec).context("WAVライター作成失敗")?;

            for sample in pcm.to_i16() {
                writer.write_sample(sample).context("WAV書き込み失敗")?;
            }

            writer.finalize().context("WAV finalize失敗")?;
        }

        Ok(cursor.into_inner())
    }

    /// Whisper APIを呼び出して文字起こし
    async fn transcribe_audio(&self, wav_data: Vec<u8>) -> Result<String> {
        let part = multipart::Part::bytes(wav_data)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;

        let mut form = multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone());

        if let Some(ref language) = self.config.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .context("Whisper API リクエスト失敗")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Whisper API エラー: {} - {}", status, error_text);
        }

        let whisper_response: WhisperResponse = response
            .json::<WhisperResponse>()
            .await
            .context("Whisper API レスポンスパース失敗")?;

        Ok(whisper_response.text.trim().to_string())
    }
}

#[async_trait]
impl TranscribeBackend for WhisperBackend {
    async fn transcribe(&self, pcm: &PcmBuffer) -> Result<String, TranscriptionError> {
        if pcm.is_empty() {
            return Ok(String::new());
        }

        let wav_data =
            Self::pcm_to_wav(pcm).map_err(|e| TranscriptionError::Engine(format!("{e:#}")))?;
        log::debug!(
            "Whisper API: {:.2}秒 ({} バイト) を文字起こし中",
            pcm.duration_seconds(),
            wav_data.len()
        );

        let text = self
            .transcribe_audio(wav_data)
            .await
            .map_err(|e| TranscriptionError::Engine(format!("{e:#}")))?;

        log::debug!("Whisper API: 文字起こし結果 - {}", text);
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "whisper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AudioFormat;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend_for(server: &MockServer) -> WhisperBackend {
        WhisperBackend::new(WhisperConfig {
            api_key: "sk-test".to_string(),
            model: "whisper-1".to_string(),
            language: Some("en".to_string()),
            endpoint: format!("{}/v1/audio/transcriptions", server.uri()),
        })
        .unwrap()
    }

    fn tone() -> PcmBuffer {
        let samples = (0..1600).map(|i| (i as f32 * 0.1).sin() * 0.3).collect();
        PcmBuffer::new(samples, AudioFormat::SPEECH)
    }

    #[test]
    fn test_pcm_to_wav_header() {
        let wav = WhisperBackend::pcm_to_wav(&tone()).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44バイトのヘッダ + 1600サンプル × 2バイト
        assert_eq!(wav.len(), 44 + 1600 * 2);
    }

    #[tokio::test]
    async fn test_transcribe_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "text": "  hello world \n" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let text = backend_for(&server).transcribe(&tone()).await.unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn test_transcribe_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let err = backend_for(&server).transcribe(&tone()).await.unwrap_err();
        match err {
            TranscriptionError::Engine(msg) => assert!(msg.contains("401"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transcribe_empty_pcm_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let empty = PcmBuffer::new(Vec::new(), AudioFormat::SPEECH);
        let text = backend_for(&server).transcribe(&empty).await.unwrap();
        assert!(text.is_empty());
    }
}

//! 翻訳エンジンアダプタ

use crate::config::TranslateConfig;
use crate::error::TranslationError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 翻訳エンジンの共通トレイト
#[async_trait]
pub trait Translator: Send + Sync {
    /// `text` を `target` 言語に翻訳
    async fn translate(&self, text: &str, target: &str) -> Result<String, TranslationError>;

    fn name(&self) -> &'static str;
}

/// 翻訳未設定時のエンジン
pub struct DisabledTranslator;

#[async_trait]
impl Translator for DisabledTranslator {
    async fn translate(&self, _text: &str, _target: &str) -> Result<String, TranslationError> {
        Err(TranslationError::Unavailable)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    target: &'a str,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Debug, Deserialize)]
struct TranslateData {
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Translation {
    translated_text: String,
    #[serde(default)]
    detected_source_language: Option<String>,
}

/// Google Cloud Translation API v2 バックエンド
pub struct GoogleTranslateBackend {
    config: TranslateConfig,
    client: reqwest::Client,
}

impl GoogleTranslateBackend {
    pub fn new(config: TranslateConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Translation API HTTPクライアント作成失敗")?;

        Ok(Self { config, client })
    }

    async fn request(&self, text: &str, target: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&TranslateRequest {
                q: text,
                target,
                format: "text",
            })
            .send()
            .await
            .context("Translation API リクエスト失敗")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Translation API エラー: {} - {}", status, error_text);
        }

        let body: TranslateResponse = response
            .json()
            .await
            .context("Translation API レスポンスパース失敗")?;

        let translation = body
            .data
            .translations
            .into_iter()
            .next()
            .context("Translation API レスポンスに翻訳結果がありません")?;

        if let Some(source) = translation.detected_source_language {
            log::debug!("翻訳: 検出された言語 {} → {}", source, target);
        }

        Ok(translation.translated_text)
    }
}

#[async_trait]
impl Translator for GoogleTranslateBackend {
    async fn translate(&self, text: &str, target: &str) -> Result<String, TranslationError> {
        self.request(text, target)
            .await
            .map_err(|e| TranslationError::Engine(format!("{e:#}")))
    }

    fn name(&self) -> &'static str {
        "google-translate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend_for(server: &MockServer) -> GoogleTranslateBackend {
        GoogleTranslateBackend::new(TranslateConfig {
            api_key: "g-key".to_string(),
            endpoint: format!("{}/language/translate/v2", server.uri()),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_translate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/language/translate/v2"))
            .and(query_param("key", "g-key"))
            .and(body_json(serde_json::json!({
                "q": "good morning",
                "target": "ja",
                "format": "text"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "translations": [
                        { "translatedText": "おはよう", "detectedSourceLanguage": "en" }
                    ]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = backend_for(&server)
            .translate("good morning", "ja")
            .await
            .unwrap();
        assert_eq!(text, "おはよう");
    }

    #[tokio::test]
    async fn test_translate_empty_translations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "translations": [] }
            })))
            .mount(&server)
            .await;

        let result = backend_for(&server).translate("hi", "ja").await;
        assert!(matches!(result, Err(TranslationError::Engine(_))));
    }

    #[tokio::test]
    async fn test_translate_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let err = backend_for(&server).translate("hi", "ja").await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"), "{err}");
    }

    #[tokio::test]
    async fn test_disabled_translator() {
        let result = DisabledTranslator.translate("hi", "ja").await;
        assert_eq!(result, Err(TranslationError::Unavailable));
    }
}

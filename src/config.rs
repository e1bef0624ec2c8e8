use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub whisper: Option<WhisperConfig>,
    pub translate: Option<TranslateConfig>,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// サーバー設定
///
/// # デフォルト値
///
/// - `host`: "0.0.0.0"
/// - `port`: 8000
/// - `max_upload_bytes`: 10 MiB
/// - `write_timeout_ms`: 10000 (WebSocket 1フレームの書き込み上限)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

/// 音声デコーダの種類
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecoderType {
    /// プロセス内デコード (symphonia)
    Symphonia,
    /// ffmpeg サブプロセス（WebM/Opus など）
    Ffmpeg,
}

/// 音声デコード設定
///
/// # デフォルト値
///
/// - `decoder`: "symphonia"
/// - `sample_rate`: 16000 Hz (文字起こしエンジンの入力)
/// - `ffmpeg_path`: "ffmpeg"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    #[serde(default = "default_decoder")]
    pub decoder: DecoderType,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
}

/// パイプライン設定
///
/// ステージごとのタイムアウトとアップロード時の翻訳先言語。
///
/// # デフォルト値
///
/// - `default_target_language`: "ja"
/// - `decode_timeout_ms`: 10000
/// - `transcribe_timeout_ms`: 30000
/// - `translate_timeout_ms`: 10000
/// - `synthesize_timeout_ms`: 15000
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_target_language")]
    pub default_target_language: String,
    #[serde(default = "default_decode_timeout_ms")]
    pub decode_timeout_ms: u64,
    #[serde(default = "default_transcribe_timeout_ms")]
    pub transcribe_timeout_ms: u64,
    #[serde(default = "default_translate_timeout_ms")]
    pub translate_timeout_ms: u64,
    #[serde(default = "default_synthesize_timeout_ms")]
    pub synthesize_timeout_ms: u64,
}

/// OpenAI Whisper API 設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WhisperConfig {
    /// OpenAI API Key
    pub api_key: String,
    /// Whisper モデル名（通常 "whisper-1"）
    #[serde(default = "default_whisper_model")]
    pub model: String,
    /// 言語コード（"ja", "en" など）。省略時は自動判定
    pub language: Option<String>,
    #[serde(default = "default_whisper_endpoint")]
    pub endpoint: String,
}

/// Google Cloud Translation 設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranslateConfig {
    pub api_key: String,
    #[serde(default = "default_translate_endpoint")]
    pub endpoint: String,
}

/// 音声合成設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_enabled")]
    pub enabled: bool,
    #[serde(default = "default_tts_endpoint")]
    pub endpoint: String,
}

/// メッセージストア設定
///
/// `path` 未指定時はメモリ上に保持する（再起動で消える）。
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    pub path: Option<String>,
}

/// アカウント設定
///
/// `token` を設定した場合、接続時に `?token=` の一致を要求する。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    pub user_id: String,
    pub token: Option<String>,
}

// Default functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_write_timeout_ms() -> u64 {
    10_000
}

fn default_decoder() -> DecoderType {
    DecoderType::Symphonia
}

fn default_sample_rate() -> u32 {
    16000 // Whisper の入力レート
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_target_language() -> String {
    "ja".to_string()
}

fn default_decode_timeout_ms() -> u64 {
    10_000
}

fn default_transcribe_timeout_ms() -> u64 {
    30_000
}

fn default_translate_timeout_ms() -> u64 {
    10_000
}

fn default_synthesize_timeout_ms() -> u64 {
    15_000
}

fn default_whisper_model() -> String {
    "whisper-1".to_string()
}

fn default_whisper_endpoint() -> String {
    "https://api.openai.com/v1/audio/transcriptions".to_string()
}

fn default_translate_endpoint() -> String {
    "https://translation.googleapis.com/language/translate/v2".to_string()
}

fn default_tts_enabled() -> bool {
    true
}

fn default_tts_endpoint() -> String {
    "https://translate.google.com/translate_tts".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            audio: AudioConfig::default(),
            pipeline: PipelineConfig::default(),
            whisper: None,   // デフォルトでは文字起こし無効
            translate: None, // デフォルトでは翻訳無効
            tts: TtsConfig::default(),
            store: StoreConfig::default(),
            accounts: vec![
                AccountConfig {
                    user_id: "alice".to_string(),
                    token: None,
                },
                AccountConfig {
                    user_id: "bob".to_string(),
                    token: None,
                },
            ],
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            decoder: default_decoder(),
            sample_rate: default_sample_rate(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_target_language: default_target_language(),
            decode_timeout_ms: default_decode_timeout_ms(),
            transcribe_timeout_ms: default_transcribe_timeout_ms(),
            translate_timeout_ms: default_translate_timeout_ms(),
            synthesize_timeout_ms: default_synthesize_timeout_ms(),
        }
    }
}

impl ServerConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl PipelineConfig {
    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }

    pub fn transcribe_timeout(&self) -> Duration {
        Duration::from_millis(self.transcribe_timeout_ms)
    }

    pub fn translate_timeout(&self) -> Duration {
        Duration::from_millis(self.translate_timeout_ms)
    }

    pub fn synthesize_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesize_timeout_ms)
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: default_tts_enabled(),
            endpoint: default_tts_endpoint(),
        }
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// TOML形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use lancon::config::Config;
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// 既存のファイルは上書きされる。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use lancon::config::Config;
    /// Config::write_default("config.toml").unwrap();
    /// ```
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
            Ok(Config::default())
        }
    }

    /// 待ち受けアドレス
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.write_timeout_ms, 10_000);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.decoder, DecoderType::Symphonia);
        assert_eq!(config.pipeline.default_target_language, "ja");
        assert!(config.whisper.is_none());
        assert!(config.translate.is_none());
        assert!(config.tts.enabled);
        assert!(config.store.path.is_none());
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
    }

    #[test]
    fn test_write_and_read_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        Config::write_default(path).unwrap();

        let config = Config::from_file(path).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.accounts[0].user_id, "alice");
    }

    #[test]
    fn test_custom_config() {
        let toml_content = r#"
[server]
host = "127.0.0.1"
port = 9000
max_upload_bytes = 1024
write_timeout_ms = 500

[audio]
decoder = "ffmpeg"
ffmpeg_path = "/usr/local/bin/ffmpeg"

[pipeline]
default_target_language = "en"
translate_timeout_ms = 2500

[whisper]
api_key = "sk-test"
language = "en"

[translate]
api_key = "g-test"

[tts]
enabled = false

[store]
path = "/tmp/messages.jsonl"

[[accounts]]
user_id = "alice"
token = "secret"

[[accounts]]
user_id = "bob"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
        assert_eq!(config.server.max_upload_bytes, 1024);
        assert_eq!(config.server.write_timeout(), Duration::from_millis(500));
        assert_eq!(config.audio.decoder, DecoderType::Ffmpeg);
        assert_eq!(config.audio.ffmpeg_path, "/usr/local/bin/ffmpeg");
        assert_eq!(config.pipeline.default_target_language, "en");
        assert_eq!(config.pipeline.translate_timeout(), Duration::from_millis(2500));
        assert_eq!(config.pipeline.decode_timeout_ms, 10_000);

        let whisper = config.whisper.unwrap();
        assert_eq!(whisper.api_key, "sk-test");
        assert_eq!(whisper.model, "whisper-1");
        assert_eq!(whisper.language.as_deref(), Some("en"));
        assert_eq!(
            whisper.endpoint,
            "https://api.openai.com/v1/audio/transcriptions"
        );

        let translate = config.translate.unwrap();
        assert_eq!(translate.api_key, "g-test");

        assert!(!config.tts.enabled);
        assert_eq!(config.store.path.as_deref(), Some("/tmp/messages.jsonl"));
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[0].token.as_deref(), Some("secret"));
        assert!(config.accounts[1].token.is_none());
    }

    #[test]
    fn test_load_or_default_nonexistent() {
        let config = Config::load_or_default("nonexistent_file.toml").unwrap();
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_partial_config() {
        // 一部の設定のみ記述した場合、残りはデフォルト値が使われる
        let toml_content = r#"
[server]
port = 8080
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.pipeline.transcribe_timeout_ms, 30_000);
        assert!(config.accounts.is_empty());
    }
}

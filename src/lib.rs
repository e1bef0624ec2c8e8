//! lancon - 音声文字起こし・翻訳付きの LAN チャットサーバー
//!
//! WebSocket で接続したユーザー同士のテキスト・音声メッセージを中継する。
//! 音声は文字起こしし、必要に応じて翻訳・音声合成してから宛先に届ける。
//!
//! # 主な機能
//!
//! - **接続レジストリ**: ユーザーごとに1接続。再接続で古い接続を置き換え
//! - **メッセージルーター**: 宛先確認 → 永続化 → パイプライン → 配送
//! - **パイプライン**: デコード → 文字起こし → 翻訳 → 音声合成（ステージ単位のタイムアウト）
//! - **メッセージストア**: JSON Lines ファイルへの追記
//! - **音声アップロード**: `POST /upload-audio` で単発の変換
//!
//! # アーキテクチャ
//!
//! ```text
//! [WebSocket] → [Session task] → [MessageRouter] ─→ [MessageStore]
//!                                      │
//!                                      ↓
//!                            [PipelineOrchestrator]
//!                     Transcoder → Transcribe → Translate → TTS
//!                                      │
//!                                      ↓
//!                            [ConnectionRegistry] → [WebSocket]
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use lancon::config::Config;
//!
//! // 設定ファイルを読み込み
//! let config = Config::load_or_default("config.toml").unwrap();
//!
//! // またはデフォルト設定を生成
//! Config::write_default("config.toml").unwrap();
//! ```

pub mod accounts;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod store;
pub mod transcoder;
pub mod transcribe_backend;
pub mod translate;
pub mod tts;
pub mod types;
pub mod whisper_api;

#[cfg(test)]
mod test_utils;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// 32ビット浮動小数点のオーディオサンプル
///
/// -1.0 から 1.0 の範囲に正規化されたPCM値。
pub type SampleF32 = f32;

/// ユーザー識別子
pub type UserId = String;

/// オーディオフォーマット情報
///
/// 音声データのサンプリングレートとチャンネル数を保持する。
///
/// # Examples
///
/// ```
/// # use lancon::types::AudioFormat;
/// let format = AudioFormat::SPEECH;
/// assert_eq!(format.sample_rate, 16000);
/// assert_eq!(format.channels, 1);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    /// サンプリングレート (Hz)
    pub sample_rate: u32,

    /// チャンネル数
    ///
    /// 1: モノラル, 2: ステレオ
    pub channels: u16,
}

impl AudioFormat {
    /// 文字起こしエンジンに渡す固定フォーマット (16kHz モノラル)
    pub const SPEECH: AudioFormat = AudioFormat {
        sample_rate: 16000,
        channels: 1,
    };
}

/// デコード済みPCMバッファ
///
/// トランスコーダの出力であり、文字起こしエンジンの入力。
/// サンプルは常にモノラル・インターリーブなし。
///
/// # Examples
///
/// ```
/// # use lancon::types::{AudioFormat, PcmBuffer};
/// let pcm = PcmBuffer::new(vec![0.0; 8000], AudioFormat::SPEECH);
/// assert_eq!(pcm.duration_seconds(), 0.5);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct PcmBuffer {
    /// PCM音声サンプルの配列
    pub samples: Vec<SampleF32>,

    /// オーディオフォーマット情報
    pub format: AudioFormat,
}

impl PcmBuffer {
    pub fn new(samples: Vec<SampleF32>, format: AudioFormat) -> Self {
        Self { samples, format }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// データ時間（秒）
    pub fn duration_seconds(&self) -> f64 {
        if self.format.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.format.sample_rate as f64
    }

    /// 16ビット整数サンプルに変換（WAVエンコード用）
    pub fn to_i16(&self) -> Vec<i16> {
        self.samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect()
    }
}

/// ユーザーIDとして有効な文字列かどうか
///
/// 英数字と `_` `.` `-` のみ、1〜64文字。
///
/// # Examples
///
/// ```
/// # use lancon::types::is_valid_user_id;
/// assert!(is_valid_user_id("alice"));
/// assert!(!is_valid_user_id(""));
/// assert!(!is_valid_user_id("bob/../admin"));
/// ```
pub fn is_valid_user_id(user_id: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]{1,64}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(user_id))
}

/// WebSocketで受信するフレーム
///
/// ```json
/// { "to": "bob", "message": "こんにちは", "lang": "en" }
/// ```
///
/// `audio` はBase64エンコードされた音声（任意）。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct InboundFrame {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub audio: Option<String>,
}

/// ルーターが処理する受信メッセージ
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// 送信者
    pub from: UserId,

    /// 宛先
    pub to: UserId,

    /// 本文
    pub text: String,

    /// 翻訳先言語コード（指定時のみパイプラインを実行）
    pub translate_to: Option<String>,

    /// 添付音声（デコード前のバイト列）
    pub audio: Option<Vec<u8>>,
}

impl InboundMessage {
    /// テキストのみのメッセージを作成
    pub fn text(from: impl Into<String>, to: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            text: text.into(),
            translate_to: None,
            audio: None,
        }
    }

    /// 翻訳先言語を指定
    pub fn with_translation(mut self, lang: impl Into<String>) -> Self {
        self.translate_to = Some(lang.into());
        self
    }

    /// 添付音声を指定
    pub fn with_audio(mut self, audio: Vec<u8>) -> Self {
        self.audio = Some(audio);
        self
    }

    /// パイプラインを実行するかどうか
    pub fn needs_pipeline(&self) -> bool {
        self.translate_to.is_some() || self.audio.is_some()
    }
}

/// 受信者・送信者に送るフレーム
///
/// # JSON出力例
///
/// ```json
/// { "from": "alice", "message": "hello", "audio": "SUQzBAAAA..." }
/// { "error": "宛先ユーザーが存在しません: carol" }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OutboundFrame {
    Message {
        from: UserId,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
    },
    Error {
        error: String,
    },
}

impl OutboundFrame {
    pub fn message(from: impl Into<String>, message: impl Into<String>) -> Self {
        OutboundFrame::Message {
            from: from.into(),
            message: message.into(),
            audio: None,
        }
    }

    pub fn error(error: impl ToString) -> Self {
        OutboundFrame::Error {
            error: error.to_string(),
        }
    }

    /// JSON文字列に変換
    pub fn to_json(&self) -> String {
        // 文字列フィールドのみなので失敗しない
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"error":"internal"}"#.to_string())
    }
}

/// 永続化されるメッセージレコード
///
/// 配送結果にかかわらず1メッセージにつき1件書き込まれる。
///
/// # JSON出力例
///
/// ```json
/// {
///   "sender": "alice",
///   "receiver": "bob",
///   "text": "こんにちは",
///   "lang": "en",
///   "timestamp": "2025-01-02T14:30:15.234Z"
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub sender: UserId,
    pub receiver: UserId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MessageRecord {
    /// 受信メッセージから現在時刻のレコードを作成
    pub fn from_inbound(inbound: &InboundMessage) -> Self {
        Self {
            sender: inbound.from.clone(),
            receiver: inbound.to.clone(),
            text: inbound.text.clone(),
            lang: inbound.translate_to.clone(),
            timestamp: Utc::now(),
        }
    }

    /// 指定ユーザーが送信者または受信者か
    pub fn involves(&self, user_id: &str) -> bool {
        self.sender == user_id || self.receiver == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_to_i16_clamps() {
        let pcm = PcmBuffer::new(vec![0.0, 1.0, -1.0, 2.0], AudioFormat::SPEECH);
        let samples = pcm.to_i16();
        assert_eq!(samples[0], 0);
        assert_eq!(samples[1], i16::MAX);
        assert_eq!(samples[2], -i16::MAX);
        assert_eq!(samples[3], i16::MAX);
    }

    #[test]
    fn test_user_id_validation() {
        assert!(is_valid_user_id("john.doe-42_x"));
        assert!(!is_valid_user_id("with space"));
        assert!(!is_valid_user_id(&"a".repeat(65)));
        assert!(is_valid_user_id(&"a".repeat(64)));
    }

    #[test]
    fn test_inbound_frame_defaults() {
        let frame: InboundFrame = serde_json::from_str(r#"{"to":"bob","message":"hi"}"#).unwrap();
        assert_eq!(frame.to, "bob");
        assert_eq!(frame.message, "hi");
        assert_eq!(frame.lang, None);
        assert_eq!(frame.audio, None);

        let frame: InboundFrame = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert!(frame.to.is_empty());
    }

    #[test]
    fn test_outbound_frame_json() {
        let json = OutboundFrame::message("alice", "hello").to_json();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["from"], "alice");
        assert_eq!(parsed["message"], "hello");
        assert!(parsed.get("audio").is_none());

        let json = OutboundFrame::error("boom").to_json();
        assert_eq!(json, r#"{"error":"boom"}"#);
    }

    #[test]
    fn test_message_record_serialization() {
        let inbound = InboundMessage::text("alice", "bob", "こんにちは").with_translation("en");
        let record = MessageRecord::from_inbound(&inbound);

        let json = serde_json::to_string(&record).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["sender"], "alice");
        assert_eq!(parsed["receiver"], "bob");
        assert_eq!(parsed["text"], "こんにちは");
        assert_eq!(parsed["lang"], "en");
        assert!(record.involves("bob"));
        assert!(!record.involves("carol"));
    }
}

//! テスト用のダブル

use crate::error::{DecodeError, SessionBroken, SynthesisError, TranscriptionError, TranslationError};
use crate::session::{Session, SessionSink};
use crate::transcoder::Transcoder;
use crate::transcribe_backend::TranscribeBackend;
use crate::translate::Translator;
use crate::tts::SpeechSynthesizer;
use crate::types::{AudioFormat, PcmBuffer};
use async_trait::async_trait;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct SinkState {
    frames: Vec<String>,
    closed: bool,
    broken: bool,
}

/// 書き込まれたフレームを記録するシンク
#[derive(Clone, Default)]
pub struct RecordingSink {
    state: Arc<Mutex<SinkState>>,
}

impl RecordingSink {
    pub fn session(&self, user_id: &str) -> Arc<Session> {
        Arc::new(Session::new(user_id, Box::new(self.clone())))
    }

    pub fn frames(&self) -> Vec<String> {
        self.state.lock().unwrap().frames.clone()
    }

    pub fn frames_json(&self) -> Vec<serde_json::Value> {
        self.frames()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// 切断されるまで待つ（最大2秒）
    pub async fn wait_closed(&self) -> bool {
        for _ in 0..200 {
            if self.is_closed() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// 以降の書き込みを失敗させる
    pub fn break_pipe(&self) {
        self.state.lock().unwrap().broken = true;
    }
}

#[async_trait]
impl SessionSink for RecordingSink {
    async fn send_text(&mut self, text: String) -> Result<(), SessionBroken> {
        let mut state = self.state.lock().unwrap();
        if state.broken {
            return Err(SessionBroken("broken pipe".to_string()));
        }
        state.frames.push(text);
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}

/// 書き込みが完了しないシンク（応答しないクライアント）
#[derive(Clone, Copy)]
pub struct StalledSink;

impl StalledSink {
    pub fn session(&self, user_id: &str, write_timeout: Duration) -> Arc<Session> {
        Arc::new(Session::new(user_id, Box::new(*self)).with_write_timeout(write_timeout))
    }
}

#[async_trait]
impl SessionSink for StalledSink {
    async fn send_text(&mut self, _text: String) -> Result<(), SessionBroken> {
        std::future::pending().await
    }

    async fn close(&mut self) {
        std::future::pending::<()>().await
    }
}

/// 入力をデコードせず 0.1秒の無音を返す
pub struct StubTranscoder;

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn decode(&self, audio: &[u8]) -> Result<PcmBuffer, DecodeError> {
        if audio.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(PcmBuffer::new(vec![0.0; 1600], AudioFormat::SPEECH))
    }
}

pub struct StubTranscriber {
    text: String,
}

impl StubTranscriber {
    pub fn returning(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

#[async_trait]
impl TranscribeBackend for StubTranscriber {
    async fn transcribe(&self, _pcm: &PcmBuffer) -> Result<String, TranscriptionError> {
        Ok(self.text.clone())
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// `"[target] text"` を返す
pub struct StubTranslator;

#[async_trait]
impl Translator for StubTranslator {
    async fn translate(&self, text: &str, target: &str) -> Result<String, TranslationError> {
        Ok(format!("[{target}] {text}"))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

pub struct FailingTranslator;

#[async_trait]
impl Translator for FailingTranslator {
    async fn translate(&self, _text: &str, _target: &str) -> Result<String, TranslationError> {
        Err(TranslationError::Engine("stub failure".to_string()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

pub struct SlowTranslator(pub Duration);

#[async_trait]
impl Translator for SlowTranslator {
    async fn translate(&self, text: &str, _target: &str) -> Result<String, TranslationError> {
        tokio::time::sleep(self.0).await;
        Ok(text.to_string())
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

/// テキストのバイト列を音声として返す
#[derive(Default)]
pub struct StubSynthesizer {
    calls: AtomicUsize,
}

impl StubSynthesizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for StubSynthesizer {
    async fn synthesize(&self, text: &str, _lang: &str) -> Result<Vec<u8>, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(text.as_bytes().to_vec())
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// 440Hz のサイン波を 16bit WAV としてメモリ上に生成
pub fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let value = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5;
            let sample = (value * i16::MAX as f32) as i16;
            for _ in 0..channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

//! 音声トランスコーダ
//!
//! 任意の圧縮音声をパイプライン共通のPCMフォーマット
//! (16kHz / モノラル / f32) に変換する。

use crate::config::{AudioConfig, DecoderType};
use crate::error::DecodeError;
use crate::types::{AudioFormat, PcmBuffer};
use async_trait::async_trait;
use std::io::Cursor;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// 音声デコーダの共通トレイト
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// 音声バイト列をPCMバッファにデコード
    async fn decode(&self, audio: &[u8]) -> Result<PcmBuffer, DecodeError>;
}

/// 設定に応じたトランスコーダを作成
pub fn from_config(config: &AudioConfig) -> Arc<dyn Transcoder> {
    let target = AudioFormat {
        sample_rate: config.sample_rate,
        channels: 1,
    };
    match config.decoder {
        DecoderType::Symphonia => {
            log::info!("音声デコーダ: symphonia ({} Hz)", target.sample_rate);
            Arc::new(SymphoniaTranscoder::new(target))
        }
        DecoderType::Ffmpeg => {
            log::info!(
                "音声デコーダ: ffmpeg ({}, {} Hz)",
                config.ffmpeg_path,
                target.sample_rate
            );
            Arc::new(FfmpegTranscoder::new(&config.ffmpeg_path, target))
        }
    }
}

/// symphonia によるプロセス内デコーダ
///
/// WAV / MP3 / AAC / MP4 コンテナに対応。デコードはCPU負荷が高いので
/// ブロッキングスレッドプールで実行する。
pub struct SymphoniaTranscoder {
    target: AudioFormat,
}

impl SymphoniaTranscoder {
    pub fn new(target: AudioFormat) -> Self {
        Self { target }
    }
}

#[async_trait]
impl Transcoder for SymphoniaTranscoder {
    async fn decode(&self, audio: &[u8]) -> Result<PcmBuffer, DecodeError> {
        if audio.is_empty() {
            return Err(DecodeError::Empty);
        }

        let data = audio.to_vec();
        let target_rate = self.target.sample_rate;
        let (samples, source_rate) = tokio::task::spawn_blocking(move || decode_to_mono_f32(data))
            .await
            .map_err(|e| DecodeError::Malformed(format!("デコードタスク異常終了: {e}")))??;

        if samples.is_empty() {
            return Err(DecodeError::Empty);
        }

        log::debug!(
            "デコード完了: {} サンプル @ {} Hz → {} Hz",
            samples.len(),
            source_rate,
            target_rate
        );

        Ok(PcmBuffer::new(
            resample_linear(&samples, source_rate, target_rate),
            self.target,
        ))
    }
}

fn decode_to_mono_f32(data: Vec<u8>) -> Result<(Vec<f32>, u32), DecodeError> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| DecodeError::Unsupported("音声トラックがありません".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::Malformed("サンプルレート不明".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

    let mut out: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(DecodeError::Malformed(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            // 壊れたパケットは読み飛ばす
            Err(SymphError::DecodeError(_)) => continue,
            Err(e) => return Err(DecodeError::Malformed(e.to_string())),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let frames = decoded.frames() as u64;
        let required = (frames as usize).saturating_mul(channels);

        if sample_buf.as_ref().map_or(true, |b| b.capacity() < required) {
            sample_buf = Some(SampleBuffer::<f32>::new(frames, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        out.extend(downmix(buf.samples(), channels));
    }

    Ok((out, source_rate))
}

/// インターリーブされた多チャンネルサンプルをモノラルに平均化
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// 線形補間によるリサンプル
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64) as f32;
            samples[idx] * (1.0 - frac) + samples[next] * frac
        })
        .collect()
}

/// ffmpeg サブプロセスによるデコーダ
///
/// `ffmpeg -i pipe:0 -f f32le -acodec pcm_f32le -ac 1 -ar <rate> pipe:1`
/// を実行し、標準出力のリトルエンディアンf32を読み取る。
/// ブラウザの MediaRecorder が出力する WebM/Opus はこちらで扱う。
pub struct FfmpegTranscoder {
    program: String,
    target: AudioFormat,
}

impl FfmpegTranscoder {
    pub fn new(program: &str, target: AudioFormat) -> Self {
        Self {
            program: program.to_string(),
            target,
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn decode(&self, audio: &[u8]) -> Result<PcmBuffer, DecodeError> {
        if audio.is_empty() {
            return Err(DecodeError::Empty);
        }

        let rate = self.target.sample_rate.to_string();
        let mut child = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error", "-i", "pipe:0"])
            .args(["-f", "f32le", "-acodec", "pcm_f32le", "-ac", "1", "-ar"])
            .arg(&rate)
            .arg("pipe:1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DecodeError::Unsupported(format!("ffmpeg 起動失敗: {e}")))?;

        // 標準出力を読みながら書き込まないとパイプが詰まる
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| DecodeError::Malformed("ffmpeg stdin を取得できません".to_string()))?;
        let input = audio.to_vec();
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&input).await;
            drop(stdin);
            result
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| DecodeError::Malformed(format!("ffmpeg 実行失敗: {e}")))?;

        if let Ok(Err(e)) = writer.await {
            log::debug!("ffmpeg への書き込みが途中で終了: {}", e);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DecodeError::Malformed(stderr.trim().to_string()));
        }

        let samples = f32le_to_samples(&output.stdout);
        if samples.is_empty() {
            return Err(DecodeError::Empty);
        }

        Ok(PcmBuffer::new(samples, self.target))
    }
}

fn f32le_to_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

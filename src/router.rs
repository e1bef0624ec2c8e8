//! メッセージルーター
//!
//! 1フレームごとに 検証 → 宛先確認 → 永続化 → パイプライン → 配送 を行う。
//! 送信者に返すべき失敗はすべて `{error}` フレームとして送信者に届け、
//! 接続は維持する。

use crate::accounts::AccountService;
use crate::error::RouteError;
use crate::pipeline::{PipelineOrchestrator, PipelineResult};
use crate::registry::{ConnectionRegistry, DeliveryResult};
use crate::store::MessageStore;
use crate::types::{is_valid_user_id, InboundFrame, InboundMessage, MessageRecord, OutboundFrame};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;

/// 1メッセージの処理結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    /// 受理・保存済みだが宛先が未接続
    RecipientOffline,
    /// 送信者にエラーを返した
    Rejected(RouteError),
}

pub struct MessageRouter {
    accounts: Arc<dyn AccountService>,
    store: Arc<dyn MessageStore>,
    registry: Arc<ConnectionRegistry>,
    pipeline: Arc<PipelineOrchestrator>,
}

impl MessageRouter {
    pub fn new(
        accounts: Arc<dyn AccountService>,
        store: Arc<dyn MessageStore>,
        registry: Arc<ConnectionRegistry>,
        pipeline: Arc<PipelineOrchestrator>,
    ) -> Self {
        Self {
            accounts,
            store,
            registry,
            pipeline,
        }
    }

    /// 受信メッセージを処理する
    pub async fn handle(&self, inbound: InboundMessage) -> RouteOutcome {
        match self.route(&inbound).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::info!("{} → {}: 拒否: {}", inbound.from, inbound.to, e);
                self.reject(&inbound.from, &e).await;
                RouteOutcome::Rejected(e)
            }
        }
    }

    /// 送信者にエラーフレームを返す
    pub async fn reject(&self, from: &str, error: &RouteError) {
        let frame = OutboundFrame::error(error);
        if self.registry.deliver(from, &frame).await == DeliveryResult::RecipientOffline {
            log::debug!("{}: 切断済みのためエラーを破棄: {}", from, error);
        }
    }

    async fn route(&self, inbound: &InboundMessage) -> Result<RouteOutcome, RouteError> {
        // 1. Validate
        if !is_valid_user_id(&inbound.to) {
            return Err(RouteError::MalformedFrame(format!(
                "宛先が不正です: {:?}",
                inbound.to
            )));
        }
        if inbound.text.trim().is_empty() && inbound.audio.is_none() {
            return Err(RouteError::MalformedFrame("本文が空です".to_string()));
        }

        // 2. Recipient
        if !self.accounts.exists(&inbound.to).await {
            return Err(RouteError::RecipientUnknown(inbound.to.clone()));
        }

        // 3. Persist
        let record = MessageRecord::from_inbound(inbound);
        self.store.append(&record).await.map_err(|e| {
            log::error!("メッセージ保存失敗: {}", e);
            RouteError::StoreFailed
        })?;

        // 4. Pipeline
        let frame = self.build_frame(inbound).await?;

        // 5. Deliver
        match self.registry.deliver(&inbound.to, &frame).await {
            DeliveryResult::Delivered => {
                log::debug!("{} → {}: 配送しました", inbound.from, inbound.to);
                Ok(RouteOutcome::Delivered)
            }
            DeliveryResult::RecipientOffline => {
                log::info!("{} → {}: 宛先が未接続です", inbound.from, inbound.to);
                Ok(RouteOutcome::RecipientOffline)
            }
        }
    }

    async fn build_frame(&self, inbound: &InboundMessage) -> Result<OutboundFrame, RouteError> {
        if !inbound.needs_pipeline() {
            return Ok(OutboundFrame::message(&inbound.from, &inbound.text));
        }

        if let Some(audio) = &inbound.audio {
            let result = self
                .pipeline
                .run_audio(audio, inbound.translate_to.as_deref())
                .await?;

            if !result.is_empty() {
                return Ok(pipeline_frame(&inbound.from, &result));
            }
            // 認識できなかった場合は添えられた本文を届ける
            if inbound.text.trim().is_empty() {
                return Err(match result.transcription_error {
                    Some(_) => RouteError::TranscriptionFailed,
                    None => RouteError::NoSpeech,
                });
            }
        }

        match &inbound.translate_to {
            Some(target) => {
                let result = self.pipeline.run_text(&inbound.text, target).await;
                Ok(pipeline_frame(&inbound.from, &result))
            }
            None => Ok(OutboundFrame::message(&inbound.from, &inbound.text)),
        }
    }
}

fn pipeline_frame(from: &str, result: &PipelineResult) -> OutboundFrame {
    OutboundFrame::Message {
        from: from.to_string(),
        message: result.translated_text().to_string(),
        audio: result.audio().map(|a| BASE64.encode(a)),
    }
}

/// WebSocket のテキストフレームを受信メッセージに変換
///
/// 空の `lang` は未指定として扱う。
pub fn decode_frame(from: &str, raw: &str) -> Result<InboundMessage, RouteError> {
    let frame: InboundFrame =
        serde_json::from_str(raw).map_err(|e| RouteError::MalformedFrame(e.to_string()))?;

    let audio = match frame.audio.as_deref().map(str::trim) {
        Some(encoded) if !encoded.is_empty() => Some(
            BASE64
                .decode(encoded)
                .map_err(|e| RouteError::MalformedFrame(format!("audio: {}", e)))?,
        ),
        _ => None,
    };

    Ok(InboundMessage {
        from: from.to_string(),
        to: frame.to.trim().to_string(),
        text: frame.message,
        translate_to: frame
            .lang
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty()),
        audio,
    })
}

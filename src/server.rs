//! HTTP / WebSocket サーバー
//!
//! - `GET /ws/{user_id}[?token=]`: チャット用 WebSocket
//! - `POST /upload-audio[?lang=]`: 音声ファイルの文字起こし・翻訳・音声合成
//! - `GET /messages/{user_id}[?token=]`: 保存済みメッセージの一覧
//! - `GET /health`: 稼働確認
//!
//! WebSocket 1接続につき1タスクがフレームを順に読み、ルーターに渡す。

use crate::accounts::{AccountService, Credentials, StaticAccountService};
use crate::config::Config;
use crate::error::RouteError;
use crate::pipeline::{PipelineOrchestrator, StageTimeouts};
use crate::registry::ConnectionRegistry;
use crate::router::{decode_frame, MessageRouter};
use crate::session::{Session, WebSocketSink, DEFAULT_WRITE_TIMEOUT};
use crate::store::{self, MessageStore};
use crate::transcoder;
use crate::transcribe_backend::{DisabledTranscriber, TranscribeBackend};
use crate::translate::{DisabledTranslator, GoogleTranslateBackend, Translator};
use crate::tts::{DisabledSynthesizer, GoogleTtsBackend, SpeechSynthesizer};
use crate::types::{OutboundFrame, UserId};
use crate::whisper_api::WhisperBackend;
use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// アップロードのフォームフィールド名
const AUDIO_FIELD: &str = "audiofile";

/// ハンドラ間で共有する状態
pub struct AppState {
    pub accounts: Arc<dyn AccountService>,
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<dyn MessageStore>,
    pub pipeline: Arc<PipelineOrchestrator>,
    pub router: MessageRouter,
    /// `/upload-audio` で `lang` 未指定時の翻訳先
    pub default_target_language: String,
    /// WebSocket 1フレームの書き込み上限
    pub write_timeout: Duration,
}

impl AppState {
    pub fn new(
        accounts: Arc<dyn AccountService>,
        store: Arc<dyn MessageStore>,
        pipeline: Arc<PipelineOrchestrator>,
        default_target_language: impl Into<String>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(
            accounts.clone(),
            store.clone(),
            registry.clone(),
            pipeline.clone(),
        );
        Self {
            accounts,
            registry,
            store,
            pipeline,
            router,
            default_target_language: default_target_language.into(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// 設定からエンジン・ストア・アカウントを構築
    pub async fn from_config(config: &Config) -> Result<Self> {
        let transcriber: Arc<dyn TranscribeBackend> = match &config.whisper {
            Some(whisper) => Arc::new(
                WhisperBackend::new(whisper.clone()).context("Whisper バックエンドの初期化に失敗")?,
            ),
            None => {
                log::warn!("[whisper] が未設定です。音声メッセージは文字起こしされません");
                Arc::new(DisabledTranscriber)
            }
        };

        let translator: Arc<dyn Translator> = match &config.translate {
            Some(translate) => Arc::new(
                GoogleTranslateBackend::new(translate.clone())
                    .context("翻訳バックエンドの初期化に失敗")?,
            ),
            None => {
                log::warn!("[translate] が未設定です。翻訳せずに原文を届けます");
                Arc::new(DisabledTranslator)
            }
        };

        let synthesizer: Arc<dyn SpeechSynthesizer> = if config.tts.enabled {
            Arc::new(GoogleTtsBackend::new(&config.tts).context("TTS バックエンドの初期化に失敗")?)
        } else {
            Arc::new(DisabledSynthesizer)
        };

        let pipeline = Arc::new(PipelineOrchestrator::new(
            transcoder::from_config(&config.audio),
            transcriber,
            translator,
            synthesizer,
            StageTimeouts::from(&config.pipeline),
        ));

        let store = store::from_config(&config.store).await?;

        let accounts = StaticAccountService::from_config(&config.accounts);
        if accounts.is_empty() {
            log::warn!("[[accounts]] が空です。誰も接続できません");
        } else {
            log::info!("アカウント: {} 件", accounts.len());
        }

        let mut state = Self::new(
            Arc::new(accounts),
            store,
            pipeline,
            config.pipeline.default_target_language.clone(),
        );
        state.write_timeout = config.server.write_timeout();
        Ok(state)
    }
}

/// ルーティングを構築
pub fn app(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/ws/{user_id}", get(ws_handler))
        .route("/upload-audio", post(upload_audio))
        .route("/messages/{user_id}", get(list_messages))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// `shutdown` が完了するまで待ち受ける
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("待ち受けアドレスの取得に失敗")?;
    log::info!("待ち受けを開始しました: http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("サーバーエラー")?;

    log::info!("サーバーを停止しました");
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct AuthParams {
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UploadParams {
    lang: Option<String>,
}

/// `/upload-audio` の応答
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadResponse {
    pub recognized_text: String,
    pub translated_text: String,
    /// Base64 の MP3。合成しなかった場合は空文字列
    pub audio: String,
}

type ApiError = (StatusCode, Json<OutboundFrame>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (status, Json(OutboundFrame::error(error)))
}

async fn authenticate(
    state: &AppState,
    user_id: String,
    token: Option<String>,
) -> Result<UserId, ApiError> {
    state
        .accounts
        .authenticate(&Credentials::new(user_id, token))
        .await
        .map_err(|e| {
            log::warn!("認証失敗: {}", e);
            api_error(StatusCode::UNAUTHORIZED, e)
        })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    Query(params): Query<AuthParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match authenticate(&state, user_id, params.token).await {
        Ok(user_id) => ws.on_upgrade(move |socket| handle_socket(socket, user_id, state)),
        Err(e) => e.into_response(),
    }
}

async fn handle_socket(socket: WebSocket, user_id: UserId, state: Arc<AppState>) {
    let (sink, mut stream) = socket.split();
    let session = Arc::new(
        Session::new(user_id.clone(), Box::new(WebSocketSink::new(sink)))
            .with_write_timeout(state.write_timeout),
    );
    state.registry.register(session.clone()).await;

    while let Some(message) = stream.next().await {
        // 新しい接続に置き換えられた
        if session.is_closed() {
            break;
        }

        match message {
            Ok(Message::Text(text)) => match decode_frame(&user_id, text.as_str()) {
                Ok(inbound) => {
                    state.router.handle(inbound).await;
                }
                Err(e) => {
                    log::info!("{}: 不正なフレーム: {}", user_id, e);
                    if let Err(e) = session.send(&OutboundFrame::error(&e)).await {
                        log::debug!("{}: エラー送信失敗: {}", user_id, e);
                    }
                }
            },
            Ok(Message::Binary(_)) => {
                let e = RouteError::MalformedFrame("バイナリフレームは受け付けません".to_string());
                if let Err(e) = session.send(&OutboundFrame::error(&e)).await {
                    log::debug!("{}: エラー送信失敗: {}", user_id, e);
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                log::debug!("{}: 受信エラー: {}", user_id, e);
                break;
            }
        }
    }

    if state.registry.deregister(&user_id, &session).await {
        session.close().await;
    }
}

async fn upload_audio(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut audio = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?
    {
        if field.name() == Some(AUDIO_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
            audio = Some(bytes);
            break;
        }
    }

    let Some(audio) = audio else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("フィールド {} がありません", AUDIO_FIELD),
        ));
    };

    let lang = params
        .lang
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| state.default_target_language.clone());

    log::info!("音声アップロード: {} バイト → {}", audio.len(), lang);

    let result = state
        .pipeline
        .run_audio(&audio, Some(&lang))
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, RouteError::from(e)))?;

    if result.is_empty() {
        return Err(match result.transcription_error {
            Some(_) => api_error(StatusCode::BAD_GATEWAY, RouteError::TranscriptionFailed),
            None => api_error(StatusCode::UNPROCESSABLE_ENTITY, RouteError::NoSpeech),
        });
    }

    Ok(Json(UploadResponse {
        recognized_text: result.recognized_text.clone(),
        translated_text: result.translated_text().to_string(),
        audio: result.audio().map(|a| BASE64.encode(a)).unwrap_or_default(),
    }))
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(params): Query<AuthParams>,
) -> Response {
    let user_id = match authenticate(&state, user_id, params.token).await {
        Ok(user_id) => user_id,
        Err(e) => return e.into_response(),
    };

    match state.store.list(&user_id).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => {
            log::error!("メッセージ一覧の取得に失敗: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e).into_response()
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "online": state.registry.len().await,
    }))
}

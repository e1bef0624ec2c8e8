use anyhow::{Context, Result};
use env_logger::Env;
use lancon::config::Config;
use lancon::server::{self, AppState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    // ロガーを初期化
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .filter_module("hyper", log::LevelFilter::Warn)
        .filter_module("reqwest", log::LevelFilter::Warn)
        .filter_module("symphonia_core", log::LevelFilter::Warn)
        .filter_module("symphonia_bundle_mp3", log::LevelFilter::Warn)
        .filter_module("symphonia_format_isomp4", log::LevelFilter::Warn)
        .init();

    // コマンドライン引数をパース
    let args: Vec<String> = std::env::args().collect();

    // 設定ファイル生成モード
    if args.len() > 1 && args[1] == "--generate-config" {
        let config_path = if args.len() > 2 {
            &args[2]
        } else {
            "config.toml"
        };
        Config::write_default(config_path)?;
        println!("設定ファイルを生成しました: {}", config_path);
        return Ok(());
    }

    // 設定ファイルのパス
    let config_path = if args.len() > 1 && !args[1].starts_with("--") {
        &args[1]
    } else {
        "config.toml"
    };

    // 設定を読み込み
    let config = Config::load_or_default(config_path)?;

    log::info!("lancon を起動します");
    log::debug!("設定: {:?}", config.server);

    let state = Arc::new(AppState::from_config(&config).await?);
    let app = server::app(state, config.server.max_upload_bytes);

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("{} で待ち受けできません", config.bind_addr()))?;

    // Ctrl+C ハンドラを設定
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        let _ = shutdown_tx.send(true);
    })?;

    server::serve(listener, app, async move {
        // ctrlc ハンドラから停止が通知されるまで待つ
        let _ = shutdown_rx.changed().await;
    })
    .await?;

    log::info!("lancon を終了しました");

    Ok(())
}

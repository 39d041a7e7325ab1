use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use tg_stickerpack::config;
use tg_stickerpack::credentials::{CredentialField, CredentialStore};
use tg_stickerpack::model::{ImageItem, Stage, StatusEvent};
use tg_stickerpack::orchestrator::{CredentialInput, Orchestrator};
use tg_stickerpack::remover::{ensure_remover_available, RembgRemover};
use tg_stickerpack::telegram::TelegramClient;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Bot API token; falls back to the cached value from a previous run
    #[arg(long)]
    token: Option<String>,

    /// Sticker pack name; falls back to the cached value from a previous run
    #[arg(long)]
    pack_name: Option<String>,

    /// Telegram user id owning the pack; discovered from the bot's updates
    /// when omitted
    #[arg(long)]
    user_id: Option<i64>,

    /// Emoji per image, in image order; remaining images get the default
    #[arg(long = "emoji")]
    emojis: Vec<String>,

    /// JPEG/PNG images to publish, in sticker order
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let store = CredentialStore::open(&cfg.app.data_dir);
    let token = args.token.or_else(|| store.get(CredentialField::Token));
    let pack_name = args
        .pack_name
        .or_else(|| store.get(CredentialField::PackName));
    let user_id = args.user_id.or_else(|| {
        store
            .get(CredentialField::UserId)
            .and_then(|v| v.parse().ok())
    });

    ensure_remover_available(&cfg.remover.command).await?;

    let base_url =
        reqwest::Url::parse(&cfg.telegram.api_base).context("invalid telegram.api_base")?;

    let client = TelegramClient::with_base_url(token.clone().unwrap_or_default(), base_url);
    let remover = RembgRemover::from_config(&cfg);

    let emojis = args.emojis;
    let items: Vec<ImageItem> = args
        .images
        .into_iter()
        .enumerate()
        .map(|(idx, path)| ImageItem::new(path, emojis.get(idx).cloned()))
        .collect();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                StatusEvent::Stage(stage) => match stage {
                    Stage::Idle | Stage::Done | Stage::Error => {}
                    stage => println!("{}", stage.describe()),
                },
                StatusEvent::Item { stage, done, total } => {
                    println!("{} ({}/{})", stage.describe(), done, total);
                }
                StatusEvent::Message(message) => println!("{}", message),
            }
        }
    });

    let orchestrator = Orchestrator::new(
        Arc::new(client),
        Arc::new(remover),
        store,
        cfg.pipeline.clone(),
        tx,
    );

    let input = CredentialInput {
        token,
        pack_name,
        user_id,
    };
    let result = orchestrator.publish(input, items).await;

    // Dropping the orchestrator closes the status channel so the printer
    // can drain and finish.
    drop(orchestrator);
    let _ = printer.await;

    let report = result?;
    info!(
        pack = %report.pack_name,
        stickers = report.stickers,
        "publish complete"
    );
    Ok(())
}

//! Publish workflow: validate credentials, run the image pipeline stage by
//! stage, then create and fill the sticker set against the Bot API.

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument};

use crate::config;
use crate::credentials::{CredentialField, CredentialStore};
use crate::model::{ImageItem, PublishReport, Stage, StatusEvent};
use crate::pipeline;
use crate::remover::BackgroundRemover;
use crate::telegram::StickerApi;

const STICKER_PACK_URL: &str = "https://t.me/addstickers/";

static NON_ALPHANUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new("[^a-zA-Z0-9]").unwrap());

/// Force a pack name into the shape the Bot API accepts: alphanumerics and
/// underscores, starting with a letter, ending in `_by_<bot_username>`.
pub fn sanitize_pack_name(name: &str, bot_username: &str) -> String {
    let mut sanitized = NON_ALPHANUMERIC.replace_all(name, "_").into_owned();

    if sanitized
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_digit())
    {
        sanitized.insert(0, 'a');
    }
    if sanitized.starts_with('_') {
        sanitized.replace_range(..1, "a");
    }

    let suffix = format!("_by_{}", bot_username);
    if !sanitized.ends_with(&suffix) {
        sanitized.push_str(&suffix);
    }
    sanitized
}

fn is_supported_image(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("jpg" | "jpeg" | "png")
    )
}

/// Credential values resolved by the presentation layer (flags merged with
/// the cache). The orchestrator fills in whatever is still missing.
#[derive(Debug, Clone, Default)]
pub struct CredentialInput {
    pub token: Option<String>,
    pub pack_name: Option<String>,
    pub user_id: Option<i64>,
}

struct ResolvedCredentials {
    pack_name: String,
    user_id: i64,
}

pub struct Orchestrator {
    api: Arc<dyn StickerApi>,
    remover: Arc<dyn BackgroundRemover>,
    store: CredentialStore,
    pipeline: config::Pipeline,
    status: UnboundedSender<StatusEvent>,
}

impl Orchestrator {
    pub fn new(
        api: Arc<dyn StickerApi>,
        remover: Arc<dyn BackgroundRemover>,
        store: CredentialStore,
        pipeline: config::Pipeline,
        status: UnboundedSender<StatusEvent>,
    ) -> Self {
        Self {
            api,
            remover,
            store,
            pipeline,
            status,
        }
    }

    /// Run the whole workflow. Every failure, whatever the stage, ends in a
    /// terminal Error event carrying one human-readable message.
    #[instrument(skip_all)]
    pub async fn publish(
        &self,
        input: CredentialInput,
        items: Vec<ImageItem>,
    ) -> Result<PublishReport> {
        match self.run(input, &items).await {
            Ok(report) => {
                self.stage(Stage::Done);
                self.send(StatusEvent::Message(format!(
                    "Sticker pack created successfully. You can add it to your Telegram here: {}",
                    report.pack_url
                )));
                Ok(report)
            }
            Err(err) => {
                self.stage(Stage::Error);
                self.send(StatusEvent::Message(format!(
                    "Error during generation: {:#}",
                    err
                )));
                Err(err)
            }
        }
    }

    async fn run(&self, input: CredentialInput, items: &[ImageItem]) -> Result<PublishReport> {
        self.stage(Stage::Validating);
        let creds = self.validate(input, items).await?;

        self.stage(Stage::Processing);
        let cutouts = self.remove_backgrounds(items).await?;

        self.stage(Stage::Resizing);
        let resized = self.resize_all(cutouts).await?;

        self.stage(Stage::Compressing);
        let payloads = self.compress_all(resized).await?;

        self.stage(Stage::Publishing);
        self.publish_stickers(&creds, items, payloads).await?;

        Ok(PublishReport {
            pack_url: format!("{}{}", STICKER_PACK_URL, creds.pack_name),
            pack_name: creds.pack_name,
            stickers: items.len(),
        })
    }

    async fn validate(
        &self,
        input: CredentialInput,
        items: &[ImageItem],
    ) -> Result<ResolvedCredentials> {
        if items.is_empty() {
            bail!("no images to publish");
        }
        for item in items {
            if !is_supported_image(&item.path) {
                bail!(
                    "unsupported image format: {} (only JPEG and PNG are accepted)",
                    item.path.display()
                );
            }
        }

        let token = input.token.filter(|t| !t.trim().is_empty());
        let pack_name = input.pack_name.filter(|n| !n.trim().is_empty());
        let (token, pack_name) = match (token, pack_name) {
            (Some(token), Some(pack_name)) => (token, pack_name),
            _ => bail!("Please provide Telegram API token and sticker pack name."),
        };

        let bot_username = match self.store.get(CredentialField::BotUsername) {
            Some(username) => username,
            None => self.fetch_bot_username().await?,
        };

        let user_id = match input.user_id {
            Some(id) => id,
            None => self.fetch_user_id().await?,
        };

        let pack_name = sanitize_pack_name(&pack_name, &bot_username);
        info!(%pack_name, user_id, "validated publish request");

        self.store.put(CredentialField::Token, &token)?;
        self.store.put(CredentialField::PackName, &pack_name)?;
        self.store.put(CredentialField::UserId, &user_id.to_string())?;
        self.store.put(CredentialField::BotUsername, &bot_username)?;

        Ok(ResolvedCredentials { pack_name, user_id })
    }

    async fn fetch_bot_username(&self) -> Result<String> {
        let me = self
            .api
            .get_me()
            .await
            .context("failed to fetch bot identity")?;
        me.username
            .filter(|u| !u.is_empty())
            .ok_or_else(|| anyhow!("bot has no username"))
    }

    /// Discover the publishing user from the bot's recent updates: the
    /// first update that carries a sender.
    async fn fetch_user_id(&self) -> Result<i64> {
        let updates = self
            .api
            .get_updates()
            .await
            .context("failed to fetch updates")?;
        updates
            .iter()
            .find_map(|u| u.message.as_ref().and_then(|m| m.from.as_ref()).map(|f| f.id))
            .ok_or_else(|| {
                anyhow!("No updates found. Please send a message to the bot to get the user ID.")
            })
    }

    async fn remove_backgrounds(&self, items: &[ImageItem]) -> Result<Vec<Vec<u8>>> {
        let total = items.len();
        let done = AtomicUsize::new(0);
        let tasks = items.iter().map(|item| {
            let done = &done;
            async move {
                let cutout = self
                    .remover
                    .remove_background(&item.path)
                    .await
                    .with_context(|| format!("failed to remove background for {}", item.name))?;
                let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                self.item_done(Stage::Processing, finished, total);
                Ok::<_, anyhow::Error>(cutout)
            }
        });
        futures::future::try_join_all(tasks).await
    }

    async fn resize_all(&self, cutouts: Vec<Vec<u8>>) -> Result<Vec<image::DynamicImage>> {
        let total = cutouts.len();
        let max_dimension = self.pipeline.max_dimension;
        let handles: Vec<_> = cutouts
            .into_iter()
            .map(|bytes| {
                tokio::task::spawn_blocking(move || {
                    let img = pipeline::load_image(&bytes)?;
                    Ok::<_, pipeline::PipelineError>(pipeline::resize_to_limit(&img, max_dimension))
                })
            })
            .collect();

        let mut resized = Vec::with_capacity(total);
        for (idx, handle) in handles.into_iter().enumerate() {
            let img = handle.await.context("resize task failed")??;
            self.item_done(Stage::Resizing, idx + 1, total);
            resized.push(img);
        }
        Ok(resized)
    }

    async fn compress_all(&self, images: Vec<image::DynamicImage>) -> Result<Vec<Vec<u8>>> {
        let total = images.len();
        let opts = self.pipeline.clone();
        let handles: Vec<_> = images
            .into_iter()
            .map(|img| {
                let opts = opts.clone();
                tokio::task::spawn_blocking(move || pipeline::compress_under_budget(&img, &opts))
            })
            .collect();

        let mut payloads = Vec::with_capacity(total);
        for (idx, handle) in handles.into_iter().enumerate() {
            let out = handle.await.context("compress task failed")??;
            debug!(
                index = idx,
                quality = out.quality,
                iterations = out.iterations,
                size = out.bytes.len(),
                "compressed sticker"
            );
            self.item_done(Stage::Compressing, idx + 1, total);
            payloads.push(out.bytes);
        }
        Ok(payloads)
    }

    /// Strictly sequential: the first payload creates the set, the rest are
    /// appended one at a time in input order. A failure mid-way leaves the
    /// stickers already accepted by the remote side in place.
    async fn publish_stickers(
        &self,
        creds: &ResolvedCredentials,
        items: &[ImageItem],
        payloads: Vec<Vec<u8>>,
    ) -> Result<()> {
        let total = items.len();
        for (idx, (item, payload)) in items.iter().zip(payloads).enumerate() {
            if idx == 0 {
                self.api
                    .create_new_sticker_set(
                        creds.user_id,
                        &creds.pack_name,
                        &creds.pack_name,
                        payload,
                        &item.emoji,
                    )
                    .await
                    .with_context(|| format!("failed to create sticker set with {}", item.name))?;
            } else {
                self.api
                    .add_sticker_to_set(creds.user_id, &creds.pack_name, payload, &item.emoji)
                    .await
                    .with_context(|| format!("failed to add {} to the sticker set", item.name))?;
            }
            self.item_done(Stage::Publishing, idx + 1, total);
        }
        Ok(())
    }

    fn stage(&self, stage: Stage) {
        info!(stage = stage.as_str(), "stage");
        self.send(StatusEvent::Stage(stage));
    }

    fn item_done(&self, stage: Stage, done: usize, total: usize) {
        self.send(StatusEvent::Item { stage, done, total });
    }

    fn send(&self, event: StatusEvent) {
        let _ = self.status.send(event);
    }
}

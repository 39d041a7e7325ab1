use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use tracing::{debug, warn};

use crate::telegram::model::{ApiResponse, TgUser, Update};

pub mod model;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org/";

/// Bot API surface the publish workflow needs.
#[async_trait]
pub trait StickerApi: Send + Sync {
    async fn get_me(&self) -> Result<TgUser>;

    async fn get_updates(&self) -> Result<Vec<Update>>;

    async fn create_new_sticker_set(
        &self,
        user_id: i64,
        name: &str,
        title: &str,
        png_sticker: Vec<u8>,
        emojis: &str,
    ) -> Result<()>;

    async fn add_sticker_to_set(
        &self,
        user_id: i64,
        name: &str,
        png_sticker: Vec<u8>,
        emojis: &str,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    pub fn new(token: String) -> Self {
        let base_url = Url::parse(TELEGRAM_API_BASE).expect("valid default Telegram URL");
        Self::with_base_url(token, base_url)
    }

    pub fn with_base_url(token: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("tg-stickerpack/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            token,
        }
    }

    /// Bot API URL for `method`, with the token embedded in the path.
    /// Built segment by segment: tokens contain `:`, which `Url::join`
    /// would read as a scheme separator.
    pub fn method_url(&self, method: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("invalid Telegram base URL"))?
            .pop_if_empty()
            .push(&format!("bot{}", self.token))
            .push(method);
        Ok(url)
    }

    async fn call<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder, method: &str) -> Result<T> {
        let res = request
            .send()
            .await
            .with_context(|| format!("failed to reach Telegram for {}", method))?;
        let status = res.status();
        let body = res
            .text()
            .await
            .with_context(|| format!("failed to read Telegram response for {}", method))?;
        debug!(method, %status, "telegram call finished");
        parse_response(status, &body).map_err(|err| {
            warn!(method, %status, "telegram call failed");
            err
        })
    }

    async fn get<T: DeserializeOwned>(&self, method: &str) -> Result<T> {
        let url = self.method_url(method)?;
        self.call(self.http.get(url), method).await
    }

    async fn post_sticker(&self, method: &str, form: Form) -> Result<()> {
        let url = self.method_url(method)?;
        // createNewStickerSet/addStickerToSet answer with a bare `true`.
        let _: bool = self.call(self.http.post(url).multipart(form), method).await?;
        Ok(())
    }
}

/// Decode a Bot API response body, normalizing failures into a single
/// message. The remote `description` wins when present; otherwise the HTTP
/// status and raw body are surfaced.
fn parse_response<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T> {
    let parsed: ApiResponse<T> = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) if !status.is_success() => {
            return Err(anyhow!("telegram error {}: {}", status, body.trim()));
        }
        Err(err) => {
            return Err(anyhow!("invalid Telegram response JSON: {}", err));
        }
    };

    if !parsed.ok {
        let message = parsed
            .description
            .unwrap_or_else(|| format!("telegram error {}", status));
        return Err(anyhow!(message));
    }
    parsed
        .result
        .ok_or_else(|| anyhow!("telegram response missing result"))
}

fn sticker_form(
    user_id: i64,
    name: &str,
    title: Option<&str>,
    png_sticker: Vec<u8>,
    emojis: &str,
) -> Result<Form> {
    let part = Part::bytes(png_sticker)
        .file_name("sticker.png")
        .mime_str("image/png")
        .context("invalid sticker mime type")?;

    let mut form = Form::new()
        .text("user_id", user_id.to_string())
        .text("name", name.to_string());
    if let Some(title) = title {
        form = form.text("title", title.to_string());
    }
    Ok(form.part("png_sticker", part).text("emojis", emojis.to_string()))
}

#[async_trait]
impl StickerApi for TelegramClient {
    async fn get_me(&self) -> Result<TgUser> {
        self.get("getMe").await
    }

    async fn get_updates(&self) -> Result<Vec<Update>> {
        self.get("getUpdates").await
    }

    async fn create_new_sticker_set(
        &self,
        user_id: i64,
        name: &str,
        title: &str,
        png_sticker: Vec<u8>,
        emojis: &str,
    ) -> Result<()> {
        let form = sticker_form(user_id, name, Some(title), png_sticker, emojis)?;
        self.post_sticker("createNewStickerSet", form).await
    }

    async fn add_sticker_to_set(
        &self,
        user_id: i64,
        name: &str,
        png_sticker: Vec<u8>,
        emojis: &str,
    ) -> Result<()> {
        let form = sticker_form(user_id, name, None, png_sticker, emojis)?;
        self.post_sticker("addStickerToSet", form).await
    }
}

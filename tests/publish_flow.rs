use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use tg_stickerpack::config;
use tg_stickerpack::credentials::{CredentialField, CredentialStore};
use tg_stickerpack::model::{ImageItem, PublishReport, Stage, StatusEvent};
use tg_stickerpack::orchestrator::{CredentialInput, Orchestrator};
use tg_stickerpack::remover::BackgroundRemover;
use tg_stickerpack::telegram::model::{TgUser, Update, UpdateMessage};
use tg_stickerpack::telegram::StickerApi;

#[derive(Debug, Clone, PartialEq)]
enum ApiCall {
    GetMe,
    GetUpdates,
    Create {
        user_id: i64,
        name: String,
        title: String,
        emojis: String,
        payload_len: usize,
    },
    Add {
        user_id: i64,
        name: String,
        emojis: String,
        payload_len: usize,
    },
}

#[derive(Clone)]
struct RecordingApi {
    calls: Arc<Mutex<Vec<ApiCall>>>,
    username: Option<String>,
    updates: Vec<Update>,
    publish_errors: Arc<Mutex<VecDeque<String>>>,
}

impl RecordingApi {
    fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            username: Some("FooBot".into()),
            updates: Vec::new(),
            publish_errors: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    fn with_updates(mut self, updates: Vec<Update>) -> Self {
        self.updates = updates;
        self
    }

    async fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().await.clone()
    }

    async fn queue_publish_error(&self, message: &str) {
        self.publish_errors
            .lock()
            .await
            .push_back(message.to_string());
    }

    async fn maybe_fail(&self) -> Result<()> {
        if let Some(message) = self.publish_errors.lock().await.pop_front() {
            bail!(message);
        }
        Ok(())
    }
}

#[async_trait]
impl StickerApi for RecordingApi {
    async fn get_me(&self) -> Result<TgUser> {
        self.calls.lock().await.push(ApiCall::GetMe);
        Ok(TgUser {
            id: 1,
            is_bot: Some(true),
            first_name: Some("Foo".into()),
            username: self.username.clone(),
        })
    }

    async fn get_updates(&self) -> Result<Vec<Update>> {
        self.calls.lock().await.push(ApiCall::GetUpdates);
        Ok(self.updates.clone())
    }

    async fn create_new_sticker_set(
        &self,
        user_id: i64,
        name: &str,
        title: &str,
        png_sticker: Vec<u8>,
        emojis: &str,
    ) -> Result<()> {
        self.calls.lock().await.push(ApiCall::Create {
            user_id,
            name: name.to_string(),
            title: title.to_string(),
            emojis: emojis.to_string(),
            payload_len: png_sticker.len(),
        });
        self.maybe_fail().await
    }

    async fn add_sticker_to_set(
        &self,
        user_id: i64,
        name: &str,
        png_sticker: Vec<u8>,
        emojis: &str,
    ) -> Result<()> {
        self.calls.lock().await.push(ApiCall::Add {
            user_id,
            name: name.to_string(),
            emojis: emojis.to_string(),
            payload_len: png_sticker.len(),
        });
        self.maybe_fail().await
    }
}

struct FakeRemover {
    png: Vec<u8>,
    fail: bool,
}

impl FakeRemover {
    fn new() -> Self {
        Self {
            png: sample_png(),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            png: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl BackgroundRemover for FakeRemover {
    async fn remove_background(&self, input: &Path) -> Result<Vec<u8>> {
        if self.fail {
            bail!("background removal failed for {}", input.display());
        }
        Ok(self.png.clone())
    }
}

/// A 600x400 gradient PNG, large enough that resizing has real work to do.
fn sample_png() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgba8(image::ImageBuffer::from_fn(600, 400, |x, y| {
        image::Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
    }));
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageOutputFormat::Png).unwrap();
    buf.into_inner()
}

fn pipeline_opts() -> config::Pipeline {
    config::Pipeline {
        max_dimension: 512,
        size_budget_kb: 490,
        quality_start: 95,
        quality_step: 5,
        quality_floor: 10,
    }
}

fn picture_items(emojis: &[&str]) -> Vec<ImageItem> {
    emojis
        .iter()
        .enumerate()
        .map(|(idx, emoji)| {
            ImageItem::new(
                PathBuf::from(format!("photo{}.png", idx)),
                Some(emoji.to_string()),
            )
        })
        .collect()
}

fn update_from(user_id: i64) -> Update {
    Update {
        update_id: 1,
        message: Some(UpdateMessage {
            message_id: 10,
            from: Some(TgUser {
                id: user_id,
                is_bot: Some(false),
                first_name: Some("Ann".into()),
                username: None,
            }),
            text: Some("hi".into()),
        }),
    }
}

async fn run_publish(
    api: &RecordingApi,
    remover: FakeRemover,
    store: CredentialStore,
    input: CredentialInput,
    items: Vec<ImageItem>,
) -> (Result<PublishReport>, Vec<StatusEvent>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(
        Arc::new(api.clone()),
        Arc::new(remover),
        store,
        pipeline_opts(),
        tx,
    );
    let result = orchestrator.publish(input, items).await;
    drop(orchestrator);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (result, events)
}

fn stages(events: &[StatusEvent]) -> Vec<Stage> {
    events
        .iter()
        .filter_map(|e| match e {
            StatusEvent::Stage(stage) => Some(*stage),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn publish_creates_once_then_appends_in_order() {
    let td = tempdir().unwrap();
    let store = CredentialStore::open(td.path().to_str().unwrap());
    let api = RecordingApi::new();

    let input = CredentialInput {
        token: Some("123:abc".into()),
        pack_name: Some("my pack".into()),
        user_id: Some(42),
    };
    let (result, events) = run_publish(
        &api,
        FakeRemover::new(),
        store,
        input,
        picture_items(&["😀", "😎", "🔥"]),
    )
    .await;

    let report = result.unwrap();
    assert_eq!(report.pack_name, "my_pack_by_FooBot");
    assert_eq!(report.pack_url, "https://t.me/addstickers/my_pack_by_FooBot");
    assert_eq!(report.stickers, 3);

    let calls = api.calls().await;
    let publish_calls: Vec<_> = calls
        .iter()
        .filter(|c| matches!(c, ApiCall::Create { .. } | ApiCall::Add { .. }))
        .collect();
    assert_eq!(publish_calls.len(), 3);

    match publish_calls[0] {
        ApiCall::Create {
            user_id,
            name,
            title,
            emojis,
            payload_len,
        } => {
            assert_eq!(*user_id, 42);
            assert_eq!(name, "my_pack_by_FooBot");
            assert_eq!(title, "my_pack_by_FooBot");
            assert_eq!(emojis, "😀");
            assert!(*payload_len <= 490 * 1024);
        }
        other => panic!("expected create first, got {:?}", other),
    }
    for (call, expected_emoji) in publish_calls[1..].iter().zip(["😎", "🔥"]) {
        match call {
            ApiCall::Add {
                user_id,
                name,
                emojis,
                payload_len,
            } => {
                assert_eq!(*user_id, 42);
                assert_eq!(name, "my_pack_by_FooBot");
                assert_eq!(emojis, expected_emoji);
                assert!(*payload_len <= 490 * 1024);
            }
            other => panic!("expected add, got {:?}", other),
        }
    }

    assert_eq!(
        stages(&events),
        vec![
            Stage::Validating,
            Stage::Processing,
            Stage::Resizing,
            Stage::Compressing,
            Stage::Publishing,
            Stage::Done,
        ]
    );
    assert!(events.iter().any(|e| matches!(
        e,
        StatusEvent::Message(m) if m.contains("https://t.me/addstickers/my_pack_by_FooBot")
    )));
}

#[tokio::test]
async fn user_id_discovered_from_first_update_with_sender() {
    let td = tempdir().unwrap();
    let store = CredentialStore::open(td.path().to_str().unwrap());
    let api = RecordingApi::new().with_updates(vec![
        Update {
            update_id: 0,
            message: None,
        },
        update_from(99),
    ]);

    let input = CredentialInput {
        token: Some("123:abc".into()),
        pack_name: Some("cats".into()),
        user_id: None,
    };
    let (result, _) = run_publish(
        &api,
        FakeRemover::new(),
        store,
        input,
        picture_items(&["😀"]),
    )
    .await;
    result.unwrap();

    let calls = api.calls().await;
    assert!(calls.contains(&ApiCall::GetUpdates));
    assert!(matches!(
        calls.iter().find(|c| matches!(c, ApiCall::Create { .. })),
        Some(ApiCall::Create { user_id: 99, .. })
    ));
}

#[tokio::test]
async fn fails_when_no_usable_update_exists() {
    let td = tempdir().unwrap();
    let store = CredentialStore::open(td.path().to_str().unwrap());
    let api = RecordingApi::new();

    let input = CredentialInput {
        token: Some("123:abc".into()),
        pack_name: Some("cats".into()),
        user_id: None,
    };
    let (result, events) = run_publish(
        &api,
        FakeRemover::new(),
        store,
        input,
        picture_items(&["😀"]),
    )
    .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("No updates found"));
    assert!(stages(&events).contains(&Stage::Error));

    let calls = api.calls().await;
    assert!(!calls
        .iter()
        .any(|c| matches!(c, ApiCall::Create { .. } | ApiCall::Add { .. })));
}

#[tokio::test]
async fn fails_without_token_and_pack_name() {
    let td = tempdir().unwrap();
    let store = CredentialStore::open(td.path().to_str().unwrap());
    let api = RecordingApi::new();

    let (result, events) = run_publish(
        &api,
        FakeRemover::new(),
        store,
        CredentialInput::default(),
        picture_items(&["😀"]),
    )
    .await;

    let err = result.unwrap_err();
    assert!(err
        .to_string()
        .contains("Please provide Telegram API token and sticker pack name."));
    assert!(api.calls().await.is_empty());
    assert!(events.iter().any(|e| matches!(
        e,
        StatusEvent::Message(m) if m.starts_with("Error during generation:")
    )));
}

#[tokio::test]
async fn rejects_non_image_files() {
    let td = tempdir().unwrap();
    let store = CredentialStore::open(td.path().to_str().unwrap());
    let api = RecordingApi::new();

    let input = CredentialInput {
        token: Some("123:abc".into()),
        pack_name: Some("cats".into()),
        user_id: Some(42),
    };
    let items = vec![ImageItem::new(PathBuf::from("clip.gif"), None)];
    let (result, _) = run_publish(&api, FakeRemover::new(), store, input, items).await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("unsupported image format"));
    assert!(api.calls().await.is_empty());
}

#[tokio::test]
async fn remover_failure_aborts_before_any_publish() {
    let td = tempdir().unwrap();
    let store = CredentialStore::open(td.path().to_str().unwrap());
    let api = RecordingApi::new();

    let input = CredentialInput {
        token: Some("123:abc".into()),
        pack_name: Some("cats".into()),
        user_id: Some(42),
    };
    let (result, events) = run_publish(
        &api,
        FakeRemover::failing(),
        store,
        input,
        picture_items(&["😀", "😎"]),
    )
    .await;

    assert!(result.is_err());
    let calls = api.calls().await;
    assert!(!calls
        .iter()
        .any(|c| matches!(c, ApiCall::Create { .. } | ApiCall::Add { .. })));

    let seen = stages(&events);
    assert!(seen.contains(&Stage::Processing));
    assert!(!seen.contains(&Stage::Publishing));
    assert!(seen.contains(&Stage::Error));
}

#[tokio::test]
async fn publish_error_surfaces_remote_description() {
    let td = tempdir().unwrap();
    let store = CredentialStore::open(td.path().to_str().unwrap());
    let api = RecordingApi::new();
    api.queue_publish_error("Bad Request: sticker set name is already occupied")
        .await;

    let input = CredentialInput {
        token: Some("123:abc".into()),
        pack_name: Some("cats".into()),
        user_id: Some(42),
    };
    let (result, events) = run_publish(
        &api,
        FakeRemover::new(),
        store,
        input,
        picture_items(&["😀", "😎"]),
    )
    .await;

    let err = result.unwrap_err();
    assert!(format!("{:#}", err).contains("sticker set name is already occupied"));

    // Create failed, so nothing was appended afterwards.
    let calls = api.calls().await;
    assert!(!calls.iter().any(|c| matches!(c, ApiCall::Add { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        StatusEvent::Message(m) if m.contains("sticker set name is already occupied")
    )));
}

#[tokio::test]
async fn credentials_are_persisted_after_validation() {
    let td = tempdir().unwrap();
    let store = CredentialStore::open(td.path().to_str().unwrap());
    let api = RecordingApi::new().with_updates(vec![update_from(7)]);

    let input = CredentialInput {
        token: Some("123:abc".into()),
        pack_name: Some("winter pack".into()),
        user_id: None,
    };
    let (result, _) = run_publish(
        &api,
        FakeRemover::new(),
        store.clone(),
        input,
        picture_items(&["😀"]),
    )
    .await;
    result.unwrap();

    assert_eq!(store.get(CredentialField::Token).as_deref(), Some("123:abc"));
    assert_eq!(
        store.get(CredentialField::PackName).as_deref(),
        Some("winter_pack_by_FooBot")
    );
    assert_eq!(store.get(CredentialField::UserId).as_deref(), Some("7"));
    assert_eq!(
        store.get(CredentialField::BotUsername).as_deref(),
        Some("FooBot")
    );
}

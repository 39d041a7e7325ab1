use serde::Deserialize;

/// Envelope every Bot API response arrives in.
#[derive(Deserialize, Debug)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}

/// A Telegram user, as returned by `getMe` or embedded in updates.
#[derive(Deserialize, Debug, Clone)]
pub struct TgUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: Option<bool>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// One entry from `getUpdates`. Only the message branch is of interest;
/// other update kinds deserialize with `message: None`.
#[derive(Deserialize, Debug, Clone)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<UpdateMessage>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct UpdateMessage {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TgUser>,
    #[serde(default)]
    pub text: Option<String>,
}

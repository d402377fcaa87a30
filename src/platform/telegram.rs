// src/platform/telegram.rs
//! Telegram Bot API adapter: the four detector calls, webhook registration
//! and update decoding.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tracing::debug;
use url::Url;

use super::{ChatPlatform, ParseMode, PlatformError};
use crate::model::{ChatId, InboundEvent, MessageId, Participant, UserId};

/// Cap for downloaded profile images (5 MiB).
pub const MAX_PROFILE_IMAGE_BYTES: usize = 5 * 1024 * 1024;
const HTTP_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: Client,
    api_base: Url,
    token: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: impl Into<String>) -> Result<Self, PlatformError> {
        let http = Client::builder()
            .user_agent("spamwatch/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Self::with_client(http, api_base, token)
    }

    pub fn with_client(
        http: Client,
        api_base: &str,
        token: impl Into<String>,
    ) -> Result<Self, PlatformError> {
        // join() drops the last path segment unless the base ends with '/'
        let base = if api_base.ends_with('/') {
            api_base.to_string()
        } else {
            format!("{}/", api_base)
        };
        let api_base =
            Url::parse(&base).map_err(|e| PlatformError::Decode(format!("api base {base}: {e}")))?;
        Ok(Self {
            http,
            api_base,
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, PlatformError> {
        self.api_base
            .join(path)
            .map_err(|e| PlatformError::Decode(format!("bad url: {e}")))
    }

    async fn call<P, T>(&self, method: &str, params: &P) -> Result<T, PlatformError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(&format!("bot{}/{}", self.token, method))?;
        let resp = self.http.post(url).json(params).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;

        let body: ApiResponse<T> = serde_json::from_slice(&bytes).map_err(|e| {
            PlatformError::Decode(format!("{method}: http {status}: {e}"))
        })?;

        if body.ok {
            body.result
                .ok_or_else(|| PlatformError::Decode(format!("{method}: ok without result")))
        } else {
            Err(PlatformError::from_api(
                body.error_code.unwrap_or(status.as_u16() as i64),
                body.description.unwrap_or_default(),
            ))
        }
    }

    /// Registers `url` as the update webhook.
    pub async fn set_webhook(
        &self,
        url: &str,
        drop_pending_updates: bool,
        secret_token: Option<&str>,
    ) -> Result<(), PlatformError> {
        let mut params = json!({
            "url": url,
            "drop_pending_updates": drop_pending_updates,
        });
        if let Some(secret) = secret_token {
            params["secret_token"] = json!(secret);
        }
        let _: bool = self.call("setWebhook", &params).await?;
        Ok(())
    }

    async fn download_file(&self, file_path: &str) -> Result<Vec<u8>, PlatformError> {
        let url = self.url(&format!("file/bot{}/{}", self.token, file_path))?;
        let resp = self.http.get(url).send().await?;

        if !resp.status().is_success() {
            return Err(PlatformError::from_api(
                resp.status().as_u16() as i64,
                format!("file download failed: {}", resp.status()),
            ));
        }
        if let Some(len) = resp.content_length() {
            if len > MAX_PROFILE_IMAGE_BYTES as u64 {
                return Err(PlatformError::Oversized {
                    limit: MAX_PROFILE_IMAGE_BYTES,
                });
            }
        }

        let mut stream = resp.bytes_stream();
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if bytes.len() + chunk.len() > MAX_PROFILE_IMAGE_BYTES {
                return Err(PlatformError::Oversized {
                    limit: MAX_PROFILE_IMAGE_BYTES,
                });
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

#[async_trait]
impl ChatPlatform for TelegramClient {
    async fn duplicate_message(
        &self,
        target: ChatId,
        source: ChatId,
        message_id: MessageId,
    ) -> Result<MessageId, PlatformError> {
        let copied: MessageIdResult = self
            .call(
                "copyMessage",
                &json!({
                    "chat_id": target.get(),
                    "from_chat_id": source.get(),
                    "message_id": message_id.get(),
                    "disable_notification": true,
                }),
            )
            .await?;
        Ok(MessageId(copied.message_id))
    }

    async fn remove_message(&self, chat: ChatId, message_id: MessageId) -> Result<(), PlatformError> {
        let _: bool = self
            .call(
                "deleteMessage",
                &json!({ "chat_id": chat.get(), "message_id": message_id.get() }),
            )
            .await?;
        Ok(())
    }

    async fn send_alert(
        &self,
        chat: ChatId,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<(), PlatformError> {
        let mut params = json!({ "chat_id": chat.get(), "text": text });
        if let Some(mode) = parse_mode {
            params["parse_mode"] = json!(mode.as_str());
        }
        let _: serde_json::Value = self.call("sendMessage", &params).await?;
        Ok(())
    }

    async fn fetch_profile_image(&self, user: UserId) -> Result<Option<Vec<u8>>, PlatformError> {
        let photos: UserProfilePhotos = self
            .call(
                "getUserProfilePhotos",
                &json!({ "user_id": user.get(), "limit": 1 }),
            )
            .await?;

        let Some(size) = photos
            .photos
            .first()
            .and_then(|sizes| sizes.first())
            .filter(|_| photos.total_count > 0)
        else {
            return Ok(None);
        };

        let file: TgFile = self
            .call("getFile", &json!({ "file_id": size.file_id }))
            .await?;
        let Some(path) = file.file_path else {
            debug!(user = %user, "profile photo has no file_path");
            return Ok(None);
        };

        self.download_file(&path).await.map(Some)
    }
}

/* ===========================
   Wire types
   =========================== */

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MessageIdResult {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct UserProfilePhotos {
    total_count: i64,
    #[serde(default)]
    photos: Vec<Vec<PhotoSize>>,
}

#[derive(Debug, Deserialize)]
struct PhotoSize {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    file_path: Option<String>,
}

/// Webhook payload. Only the `message` branch feeds the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<TgMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgMessage {
    pub message_id: i64,
    pub from: Option<TgUser>,
    pub chat: TgChat,
    pub text: Option<String>,
    #[serde(default)]
    pub new_chat_members: Vec<TgUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl From<TgUser> for Participant {
    fn from(u: TgUser) -> Self {
        Participant {
            id: UserId(u.id),
            handle: u.username,
            first_name: u.first_name,
            last_name: u.last_name,
        }
    }
}

impl Update {
    pub fn into_event(self) -> Option<InboundEvent> {
        let msg = self.message?;
        Some(InboundEvent {
            chat_id: ChatId(msg.chat.id),
            message_id: MessageId(msg.message_id),
            sender: msg.from.map(Participant::from),
            text: msg.text,
            new_members: msg.new_chat_members.into_iter().map(Participant::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let len = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Answers each accepted connection with the next canned body; returns the requests seen.
    async fn serve(responses: Vec<(u16, Vec<u8>)>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                seen.push(read_request(&mut socket).await);
                let header = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                socket.write_all(header.as_bytes()).await.unwrap();
                socket.write_all(&body).await.unwrap();
                socket.shutdown().await.ok();
            }
            seen
        });
        (format!("http://{}", addr), handle)
    }

    #[tokio::test]
    async fn copy_of_deleted_message_is_not_found() {
        let body = br#"{"ok":false,"error_code":400,"description":"Bad Request: message to copy not found"}"#;
        let (base, server) = serve(vec![(400, body.to_vec())]).await;
        let tg = TelegramClient::new(&base, "T0KEN").unwrap();

        let err = tg
            .duplicate_message(ChatId(-1), ChatId(-2), MessageId(5))
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{err:?}");

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /botT0KEN/copyMessage"));
        assert!(requests[0].contains("\"disable_notification\":true"));
    }

    #[tokio::test]
    async fn rate_limit_is_not_a_deletion() {
        let body = br#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 3"}"#;
        let (base, _server) = serve(vec![(429, body.to_vec())]).await;
        let tg = TelegramClient::new(&base, "t").unwrap();

        let err = tg
            .duplicate_message(ChatId(-1), ChatId(-2), MessageId(5))
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Api { code: 429, .. }));
    }

    #[tokio::test]
    async fn copy_returns_new_message_id() {
        let body = br#"{"ok":true,"result":{"message_id":991}}"#;
        let (base, _server) = serve(vec![(200, body.to_vec())]).await;
        let tg = TelegramClient::new(&base, "t").unwrap();

        let id = tg
            .duplicate_message(ChatId(-1), ChatId(-2), MessageId(5))
            .await
            .unwrap();
        assert_eq!(id, MessageId(991));
    }

    #[tokio::test]
    async fn user_without_photos_has_no_image() {
        let body = br#"{"ok":true,"result":{"total_count":0,"photos":[]}}"#;
        let (base, _server) = serve(vec![(200, body.to_vec())]).await;
        let tg = TelegramClient::new(&base, "t").unwrap();

        assert!(tg.fetch_profile_image(UserId(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn profile_image_is_resolved_and_downloaded() {
        let photos = br#"{"ok":true,"result":{"total_count":1,"photos":[[{"file_id":"AbC","file_unique_id":"u","width":160,"height":160}]]}}"#;
        let file = br#"{"ok":true,"result":{"file_id":"AbC","file_path":"photos/file_1.jpg"}}"#;
        let image = vec![0xFFu8, 0xD8, 0xFF, 1, 2, 3];
        let (base, server) = serve(vec![
            (200, photos.to_vec()),
            (200, file.to_vec()),
            (200, image.clone()),
        ])
        .await;
        let tg = TelegramClient::new(&base, "t").unwrap();

        let got = tg.fetch_profile_image(UserId(3)).await.unwrap();
        assert_eq!(got, Some(image));

        let requests = server.await.unwrap();
        assert!(requests[1].contains("\"file_id\":\"AbC\""));
        assert!(requests[2].starts_with("GET /file/bott/photos/file_1.jpg"));
    }

    #[tokio::test]
    async fn oversized_download_is_rejected() {
        let photos = br#"{"ok":true,"result":{"total_count":1,"photos":[[{"file_id":"A"}]]}}"#;
        let file = br#"{"ok":true,"result":{"file_path":"big.jpg"}}"#;
        let (base, _server) = serve(vec![
            (200, photos.to_vec()),
            (200, file.to_vec()),
            (200, vec![0u8; MAX_PROFILE_IMAGE_BYTES + 1]),
        ])
        .await;
        let tg = TelegramClient::new(&base, "t").unwrap();

        let err = tg.fetch_profile_image(UserId(3)).await.unwrap_err();
        assert!(matches!(err, PlatformError::Oversized { .. }));
    }

    #[test]
    fn join_update_becomes_event_with_members() {
        let raw = r#"{
            "update_id": 10,
            "message": {
                "message_id": 55,
                "from": {"id": 9, "is_bot": false, "first_name": "Ann", "username": "ann"},
                "chat": {"id": -1001, "type": "supergroup"},
                "date": 0,
                "new_chat_members": [
                    {"id": 9, "is_bot": false, "first_name": "Ann", "username": "ann"},
                    {"id": 10, "is_bot": false, "first_name": "Bob", "last_name": "B"}
                ]
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        let ev = update.into_event().unwrap();
        assert_eq!(ev.chat_id, ChatId(-1001));
        assert_eq!(ev.message_id, MessageId(55));
        assert_eq!(ev.text, None);
        assert_eq!(ev.new_members.len(), 2);
        assert_eq!(ev.new_members[0].handle.as_deref(), Some("ann"));
        assert_eq!(ev.new_members[1].full_name(), "Bob B");
    }

    #[test]
    fn non_message_update_is_ignored() {
        let raw = r#"{"update_id": 11, "edited_message": {"message_id": 1, "chat": {"id": 1}}}"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        assert!(update.into_event().is_none());
    }
}

//! HTTP client for the content service endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{CollectionName, Item, ItemId};
use crate::remote::{ContentService, RemoteCollections, ADMIN_SECRET_HEADER};
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Clone)]
pub struct HttpContentService {
    base_url: String,
    admin_secret: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpContentService {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpContentService")
            .field("base_url", &self.base_url)
            .field(
                "admin_secret",
                &self.admin_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct IncrementRequest<'a> {
    field: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl HttpContentService {
    pub fn new(
        base_url: impl Into<String>,
        admin_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            admin_secret: normalize_text_option(admin_secret),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, collection: &CollectionName) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(collection.as_str()))
    }

    fn item_url(&self, collection: &CollectionName, id: &ItemId) -> String {
        format!(
            "{}/{}",
            self.collection_url(collection),
            urlencoding::encode(id.as_str())
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(reqwest::header::ACCEPT, "application/json");
        match &self.admin_secret {
            Some(secret) => request.header(ADMIN_SECRET_HEADER, secret),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authorized(request).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(parse_api_error(status, &body)));
        }
        Err(Error::Api(parse_api_error(status, &body)))
    }
}

#[async_trait]
impl ContentService for HttpContentService {
    async fn fetch_all(&self) -> Result<RemoteCollections> {
        let url = format!("{}/content/all", self.base_url);
        let response = self.send(self.client.get(url)).await?;
        Ok(response.json::<RemoteCollections>().await?)
    }

    async fn create(&self, collection: &CollectionName, item: &Item) -> Result<Item> {
        let request = self.client.post(self.collection_url(collection)).json(item);
        Ok(self.send(request).await?.json::<Item>().await?)
    }

    async fn update(&self, collection: &CollectionName, item: &Item) -> Result<Item> {
        let request = self
            .client
            .put(self.item_url(collection, &item.id))
            .json(item);
        Ok(self.send(request).await?.json::<Item>().await?)
    }

    async fn delete(&self, collection: &CollectionName, id: &ItemId) -> Result<()> {
        let request = self.client.delete(self.item_url(collection, id));
        self.send(request).await?;
        Ok(())
    }

    async fn increment_counter(
        &self,
        collection: &CollectionName,
        id: &ItemId,
        field: &str,
    ) -> Result<Item> {
        let url = format!("{}/increment-counter", self.item_url(collection, id));
        let request = self.client.post(url).json(&IncrementRequest { field });
        Ok(self.send(request).await?.json::<Item>().await?)
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let base_url = normalize_text_option(Some(raw)).ok_or_else(|| {
        Error::Config("content service base URL must not be empty".to_string())
    })?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "content service base URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url(" https://api.example.com/ ".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn item_urls_escape_ids() {
        let service =
            HttpContentService::new("https://api.example.com", None, Duration::from_secs(5))
                .unwrap();
        let url = service.item_url(&CollectionName::from("offices"), &ItemId::from("a b/c"));
        assert_eq!(url, "https://api.example.com/offices/a%20b%2Fc");
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        let message = parse_api_error(StatusCode::UNAUTHORIZED, r#"{"error":"bad secret"}"#);
        assert_eq!(message, "bad secret (401)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
    }

    #[test]
    fn debug_redacts_admin_secret() {
        let service = HttpContentService::new(
            "https://api.example.com",
            Some("hunter2".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let debug = format!("{service:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}

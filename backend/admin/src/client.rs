use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use contact::{
    CallableResponse, ContactForm, ErrorBody, ListQuery, Page, QueueStats, SessionRequest,
    StatusCounts, Submission, SubmissionPatch,
};
use folio::{DraftStorage, FileStorage};
use reqwest::{
    Client, Method, RequestBuilder, Response,
    header::{COOKIE, SET_COOKIE},
};
use serde::de::DeserializeOwned;

pub const SESSION_KEY: &str = "session";

pub struct AdminClient {
    http: Client,
    base: String,
    storage: Arc<FileStorage>,
}

impl AdminClient {
    pub fn new(base: &str, storage: Arc<FileStorage>) -> Self {
        Self {
            http: Client::new(),
            base: base.trim_end_matches('/').to_string(),
            storage,
        }
    }

    fn request(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        let builder = self.http.request(method, format!("{}{path}", self.base));

        Ok(match self.storage.get(SESSION_KEY)? {
            Some(cookie) => builder.header(COOKIE, cookie),
            None => builder,
        })
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> anyhow::Result<T> {
        let response = checked(builder.send().await?).await?;

        Ok(response.json().await?)
    }

    pub async fn login(&self, api_key: &str) -> anyhow::Result<()> {
        let request = SessionRequest {
            api_key: api_key.to_string(),
        };

        let response = checked(
            self.request(Method::POST, "/api/admin/session")?
                .json(&request)
                .send()
                .await?,
        )
        .await?;

        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(session_pair)
            .ok_or_else(|| anyhow!("Server did not return a session cookie"))?;

        self.storage.set(SESSION_KEY, &cookie)?;

        Ok(())
    }

    pub async fn logout(&self) -> anyhow::Result<()> {
        let result: anyhow::Result<CallableResponse> = self
            .send(self.request(Method::DELETE, "/api/admin/session")?)
            .await;

        self.storage.remove(SESSION_KEY)?;
        result.map(|_| ())
    }

    pub async fn list(&self, query: &ListQuery) -> anyhow::Result<Page<Submission>> {
        self.send(self.request(Method::GET, "/api/admin/submissions")?.query(query))
            .await
    }

    pub async fn get(&self, id: &str) -> anyhow::Result<Submission> {
        self.send(self.request(Method::GET, &format!("/api/admin/submissions/{id}"))?)
            .await
    }

    pub async fn update(&self, id: &str, patch: &SubmissionPatch) -> anyhow::Result<Submission> {
        self.send(
            self.request(Method::PATCH, &format!("/api/admin/submissions/{id}"))?
                .json(patch),
        )
        .await
    }

    pub async fn delete(&self, id: &str) -> anyhow::Result<CallableResponse> {
        self.send(self.request(Method::DELETE, &format!("/api/admin/submissions/{id}"))?)
            .await
    }

    pub async fn stats(&self) -> anyhow::Result<StatusCounts> {
        self.send(self.request(Method::GET, "/api/admin/stats")?)
            .await
    }

    pub async fn queue(&self) -> anyhow::Result<QueueStats> {
        self.send(self.request(Method::GET, "/api/admin/email-queue")?)
            .await
    }

    pub async fn retry_failed(&self) -> anyhow::Result<CallableResponse> {
        self.send(self.request(Method::POST, "/api/admin/email-queue/retry")?)
            .await
    }

    pub async fn clear_sent(&self) -> anyhow::Result<CallableResponse> {
        self.send(self.request(Method::DELETE, "/api/admin/email-queue/sent")?)
            .await
    }

    pub async fn submit_contact(&self, form: &ContactForm) -> anyhow::Result<CallableResponse> {
        self.send(self.request(Method::POST, "/api/contact")?.json(form))
            .await
    }
}

/// Turns a non-2xx response into an error carrying the server's message.
async fn checked(response: Response) -> anyhow::Result<Response> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.context("Failed to read error body")?;

    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(error) => bail!("{status}: {}", describe(&error)),
        Err(_) => bail!("{status}: {body}"),
    }
}

pub fn describe(error: &ErrorBody) -> String {
    let mut message = error.message.clone();

    for detail in &error.details {
        message.push_str(&format!("\n  {}: {}", detail.field, detail.message));
    }

    message
}

/// `name=value` from a `Set-Cookie` header, ignoring attributes.
pub fn session_pair(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;

    (!name.is_empty() && !value.is_empty()).then(|| pair.to_string())
}

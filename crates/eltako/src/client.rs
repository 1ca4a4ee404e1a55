use std::sync::RwLock;

use reqwest::{Method, Response};

use serde::Serialize;

use crate::error::Result;

/// A session-authenticated `HTTPS` client for a single shading actor.
///
/// The client owns the bearer token obtained through the `/login`
/// route and attaches it as an `Authorization` header to every request
/// once present.
///
/// Certificate verification is disabled because the devices ship with
/// self-signed certificates; callers must not rely on transport-level
/// trust.
///
/// The client never retries on its own. Retrying is a caller-level
/// concern, see [`crate::retry`].
#[derive(Debug)]
pub struct HttpClient {
    base_url: String,
    client: reqwest::Client,
    token: RwLock<String>,
}

impl HttpClient {
    /// Creates an [`HttpClient`] for the given device API base URL.
    ///
    /// # Errors
    ///
    /// An error is returned when the underlying `TLS` backend cannot
    /// be initialized.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            base_url: base_url.into(),
            client,
            token: RwLock::new(String::new()),
        })
    }

    /// Returns the device API base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replaces the session token.
    ///
    /// The previous token is silently discarded. Requests issued after
    /// this call carry the new token.
    pub fn set_token(&self, token: String) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = token;
    }

    /// Sends a `GET` request to the given route.
    ///
    /// # Errors
    ///
    /// Network failures or timeouts may prevent the request from being
    /// sent.
    pub async fn get(&self, route: &str) -> Result<Response> {
        self.request(Method::GET, route, None::<&()>).await
    }

    /// Sends a `POST` request with a `JSON` body to the given route.
    ///
    /// # Errors
    ///
    /// Network failures or timeouts may prevent the request from being
    /// sent.
    pub async fn post<T: Serialize>(&self, route: &str, body: &T) -> Result<Response> {
        self.request(Method::POST, route, Some(body)).await
    }

    /// Sends a `PUT` request with a `JSON` body to the given route.
    ///
    /// # Errors
    ///
    /// Network failures or timeouts may prevent the request from being
    /// sent.
    pub async fn put<T: Serialize>(&self, route: &str, body: &T) -> Result<Response> {
        self.request(Method::PUT, route, Some(body)).await
    }

    async fn request<T: Serialize>(
        &self,
        method: Method,
        route: &str,
        body: Option<&T>,
    ) -> Result<Response> {
        let url = format!("{}{route}", self.base_url);
        let mut request = self.client.request(method, url);

        // The guard must not be held across the await point below.
        let token = {
            let guard = self.token.read().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        if !token.is_empty() {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }

        if let Some(body) = body {
            request = request.json(body);
        }

        Ok(request.send().await?)
    }
}

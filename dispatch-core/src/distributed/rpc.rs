// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Shared RPC client plumbing.
//!
//! Every role calls its peer through a thin `reqwest`-backed client that
//! posts one JSON body and deserializes one JSON body back. Each role
//! builds its own `axum::Router` (see `rc::server`, `coordinator::server`)
//! but all of them call out through this same helper, mirroring the
//! request/reply RPC convention spec.md describes as "simple scalar
//! tuples" — JSON objects take the place of tuples here, but the contract
//! (one call, one reply, no streaming) is unchanged.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::DispatchError;

/// A minimal JSON-RPC-over-HTTP client shared by the Coordinator (calling
/// the RC) and the Processor (calling its Coordinator).
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    base_url: String,
}

impl RpcClient {
    /// Build a client pointed at `base_url` (e.g. `http://host:9753`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// `POST {base_url}{path}` with a JSON body, deserializing a JSON
    /// response.
    pub async fn call<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, DispatchError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|source| DispatchError::Rpc {
                peer: url.clone(),
                source: anyhow::Error::new(source),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rpc {
                peer: url,
                source: anyhow::anyhow!("peer returned {status}: {text}"),
            });
        }

        response
            .json::<Resp>()
            .await
            .map_err(|source| DispatchError::Rpc {
                peer: url,
                source: anyhow::Error::new(source),
            })
    }

    /// Base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_stored() {
        let client = RpcClient::new("http://127.0.0.1:9753");
        assert_eq!(client.base_url(), "http://127.0.0.1:9753");
    }
}

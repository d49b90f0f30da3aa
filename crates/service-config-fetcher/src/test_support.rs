//! Shared fixtures for unit tests: a scripted [`RemoteCaller`] and a counting
//! [`TokenSource`], plus builders for rollout listings.

#![cfg(test)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use prost::Message;
use reqwest::StatusCode;
use service_management_proto::{
    rollout, ListServiceRolloutsResponse, Rollout, TrafficPercentStrategy,
};

use crate::credentials::{AccessToken, TokenError, TokenSource};
use crate::error::FetchError;
use crate::http::RemoteCaller;

/// Scripted reply of [`CannedCaller`].
enum CannedReply {
    Body(Vec<u8>),
    Status(u16),
}

/// [`RemoteCaller`] replaying queued replies in order and recording requests.
///
/// An exhausted queue answers `404 Not Found`.
#[derive(Default)]
pub(crate) struct CannedCaller {
    replies: Mutex<VecDeque<CannedReply>>,
    urls: Mutex<Vec<String>>,
    tokens: Mutex<Vec<String>>,
}

impl CannedCaller {
    pub(crate) fn push_ok(&self, message: impl Message) {
        self.push_body(message.encode_to_vec());
    }

    pub(crate) fn push_body(&self, body: Vec<u8>) {
        self.replies
            .lock()
            .unwrap()
            .push_back(CannedReply::Body(body));
    }

    pub(crate) fn push_status(&self, status: u16) {
        self.replies
            .lock()
            .unwrap()
            .push_back(CannedReply::Status(status));
    }

    pub(crate) fn requested_urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub(crate) fn tokens_seen(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteCaller for CannedCaller {
    async fn call_authenticated(&self, url: &str, token: &str) -> Result<Vec<u8>, FetchError> {
        self.urls.lock().unwrap().push(url.to_string());
        self.tokens.lock().unwrap().push(token.to_string());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(CannedReply::Body(body)) => Ok(body),
            Some(CannedReply::Status(code)) => Err(FetchError::Status {
                url: url.to_string(),
                status: StatusCode::from_u16(code).unwrap(),
            }),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: StatusCode::NOT_FOUND,
            }),
        }
    }
}

/// [`TokenSource`] handing out `token-1`, `token-2`, ... and counting calls.
#[derive(Default)]
pub(crate) struct CountingTokenSource {
    acquired: AtomicUsize,
    failing: bool,
}

impl CountingTokenSource {
    pub(crate) fn failing() -> Self {
        Self {
            acquired: AtomicUsize::new(0),
            failing: true,
        }
    }

    pub(crate) fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for CountingTokenSource {
    async fn acquire(&self) -> Result<AccessToken, TokenError> {
        let count = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing {
            return Err(TokenError::Status(StatusCode::SERVICE_UNAVAILABLE));
        }
        Ok(AccessToken {
            token: format!("token-{count}"),
            expires_in: Duration::from_secs(3600),
        })
    }
}

/// Builds a rollout carrying a traffic split.
pub(crate) fn traffic_rollout(rollout_id: &str, split: &[(&str, f64)]) -> Rollout {
    Rollout {
        rollout_id: rollout_id.to_string(),
        strategy: Some(rollout::Strategy::TrafficPercentStrategy(
            TrafficPercentStrategy {
                percentages: split
                    .iter()
                    .map(|(id, percent)| (id.to_string(), *percent))
                    .collect(),
            },
        )),
        ..Default::default()
    }
}

pub(crate) fn rollouts_response(rollouts: Vec<Rollout>) -> ListServiceRolloutsResponse {
    ListServiceRolloutsResponse {
        rollouts,
        next_page_token: String::new(),
    }
}

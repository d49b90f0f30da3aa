//! Protobuf models for the Service Management API.
//!
//! Only the messages consumed by the config fetcher are modelled: the rollout
//! listing (`google.api.servicemanagement.v1.ListServiceRolloutsResponse`) and
//! the service configuration document (`google.api.Service`). Field tags match
//! the published schema. Fields the fetcher never reads are left out, and
//! prost skips unknown fields while decoding, so full payloads from the
//! backend decode into these partial views.
//!
//! Every message also derives `serde` so it can be rendered as JSON in logs
//! and diagnostics.

use std::collections::HashMap;

/// Response of `GET /v1/services/{service}/rollouts`.
#[derive(Clone, PartialEq, ::prost::Message, ::serde::Serialize, ::serde::Deserialize)]
#[serde(default)]
pub struct ListServiceRolloutsResponse {
    /// Rollouts ordered newest first.
    #[prost(message, repeated, tag = "1")]
    pub rollouts: Vec<Rollout>,
    #[prost(string, tag = "2")]
    pub next_page_token: String,
}

/// A single rollout event describing how traffic is split across config ids.
#[derive(Clone, PartialEq, ::prost::Message, ::serde::Serialize, ::serde::Deserialize)]
#[serde(default)]
pub struct Rollout {
    /// Opaque id; newer rollouts sort first in listings.
    #[prost(string, tag = "1")]
    pub rollout_id: String,
    #[prost(string, tag = "3")]
    pub created_by: String,
    #[prost(enumeration = "RolloutStatus", tag = "4")]
    pub status: i32,
    #[prost(string, tag = "8")]
    pub service_name: String,
    #[prost(oneof = "rollout::Strategy", tags = "5, 200")]
    pub strategy: Option<rollout::Strategy>,
}

/// Nested types of [`Rollout`].
pub mod rollout {
    /// How the rollout distributes traffic.
    #[derive(Clone, PartialEq, ::prost::Oneof, ::serde::Serialize, ::serde::Deserialize)]
    pub enum Strategy {
        #[prost(message, tag = "5")]
        TrafficPercentStrategy(super::TrafficPercentStrategy),
        #[prost(message, tag = "200")]
        DeleteServiceStrategy(super::DeleteServiceStrategy),
    }
}

/// Maps config ids to the percentage of traffic (0-100) they should receive.
#[derive(Clone, PartialEq, ::prost::Message, ::serde::Serialize, ::serde::Deserialize)]
#[serde(default)]
pub struct TrafficPercentStrategy {
    #[prost(map = "string, double", tag = "1")]
    pub percentages: HashMap<String, f64>,
}

/// Marks a rollout that deletes the service; carries no payload.
#[derive(Clone, Copy, PartialEq, ::prost::Message, ::serde::Serialize, ::serde::Deserialize)]
pub struct DeleteServiceStrategy {}

/// Lifecycle state of a rollout.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    ::prost::Enumeration,
    ::serde::Serialize,
    ::serde::Deserialize,
)]
#[repr(i32)]
pub enum RolloutStatus {
    Unspecified = 0,
    InProgress = 1,
    Success = 2,
    Cancelled = 3,
    Failed = 4,
    Pending = 5,
    FailedRolledBack = 6,
}

impl Rollout {
    /// Returns the traffic split of this rollout, if it carries one.
    pub fn traffic_percentages(&self) -> Option<&HashMap<String, f64>> {
        match &self.strategy {
            Some(rollout::Strategy::TrafficPercentStrategy(strategy)) => {
                Some(&strategy.percentages)
            }
            _ => None,
        }
    }
}

/// Service configuration document (`google.api.Service`), partial view.
#[derive(Clone, PartialEq, ::prost::Message, ::serde::Serialize, ::serde::Deserialize)]
#[serde(default)]
pub struct Service {
    /// Service name, e.g. `bookstore.endpoints.my-project.cloud.goog`.
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub title: String,
    #[prost(string, tag = "22")]
    pub producer_project_id: String,
    /// Config id assigned by Service Management.
    #[prost(string, tag = "33")]
    pub id: String,
}

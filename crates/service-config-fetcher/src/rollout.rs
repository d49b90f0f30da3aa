//! Rollout resolution: decides which config id should be served.
//!
//! Service Management lists successful rollouts newest first. Only the newest
//! rollout is inspected, and the config id receiving the largest share of its
//! traffic becomes the active config. Partial splits (canaries) are not
//! special-cased: the majority config is served to everyone and a warning is
//! logged.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::credentials::TokenSource;
use crate::error::FetchError;
use crate::http::ServiceManagementClient;

/// Percentages closer than this to 100 count as a full rollout.
const FULL_TRAFFIC_TOLERANCE: f64 = 1e-9;

/// The rollout and config id currently believed to be served.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActiveSelection {
    pub rollout_id: String,
    pub config_id: String,
}

impl ActiveSelection {
    pub fn new(rollout_id: impl Into<String>, config_id: impl Into<String>) -> Self {
        Self {
            rollout_id: rollout_id.into(),
            config_id: config_id.into(),
        }
    }
}

/// Picks the config id with the strictly largest traffic percentage.
///
/// Config ids are scanned in lexical order, so on an exact tie the
/// lexically smallest id wins. Returns `None` only for an empty split: a
/// split where every share is zero (or NaN) still yields its lexically first
/// id rather than no selection, and the caller flags it as a partial rollout.
pub fn select_config_id(percentages: &HashMap<String, f64>) -> Option<(&str, f64)> {
    let mut ids: Vec<&String> = percentages.keys().collect();
    ids.sort();

    let mut best: Option<(&str, f64)> = None;
    for id in ids {
        let percent = percentages[id];
        match best {
            Some((_, best_percent)) if percent <= best_percent || percent.is_nan() => {}
            _ => best = Some((id.as_str(), percent)),
        }
    }
    best
}

/// Returns `true` when `percent` is not within tolerance of a full rollout.
pub fn is_partial_rollout(percent: f64) -> bool {
    (100.0 - percent).abs() >= FULL_TRAFFIC_TOLERANCE || percent.is_nan()
}

/// Computes the next [`ActiveSelection`] from the latest rollout listing.
#[derive(Clone)]
pub struct RolloutResolver {
    client: ServiceManagementClient,
    tokens: Arc<dyn TokenSource>,
}

impl std::fmt::Debug for RolloutResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RolloutResolver")
            .field("client", &self.client)
            .finish()
    }
}

impl RolloutResolver {
    pub fn new(client: ServiceManagementClient, tokens: Arc<dyn TokenSource>) -> Self {
        Self { client, tokens }
    }

    /// Resolves the selection `service_name` should serve next.
    ///
    /// When the newest rollout id equals `current`'s, `current` is returned
    /// untouched without looking at the traffic split. The rollout id still
    /// advances when a new rollout keeps the same config.
    pub async fn resolve(
        &self,
        service_name: &str,
        current: Option<&ActiveSelection>,
    ) -> Result<ActiveSelection, FetchError> {
        let token = self.tokens.acquire().await?;
        let response = self
            .client
            .fetch_rollouts(service_name, &token.token)
            .await?;

        let newest = response
            .rollouts
            .first()
            .ok_or(FetchError::NoActiveRollouts)?;
        if let Some(current) = current {
            if newest.rollout_id == current.rollout_id {
                info!(
                    service = %service_name,
                    rollout_id = %current.rollout_id,
                    "rollout unchanged"
                );
                return Ok(current.clone());
            }
        }
        info!(
            service = %service_name,
            rollout_id = %newest.rollout_id,
            rollout = ?newest,
            "found new rollout"
        );

        let (config_id, percent) = newest
            .traffic_percentages()
            .and_then(select_config_id)
            .ok_or(FetchError::NoActiveRollouts)?;

        if let Some(current) = current {
            if config_id == current.config_id {
                info!(
                    service = %service_name,
                    config_id = %current.config_id,
                    "no new configuration to load"
                );
                return Ok(ActiveSelection::new(
                    newest.rollout_id.clone(),
                    current.config_id.clone(),
                ));
            }
        }

        if is_partial_rollout(percent) {
            warn!(
                service = %service_name,
                config_id = %config_id,
                percent,
                "partial rollout: serving config to all traffic"
            );
        }
        info!(
            service = %service_name,
            config_id = %config_id,
            "found new configuration"
        );
        Ok(ActiveSelection::new(newest.rollout_id.clone(), config_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::{
        rollouts_response, traffic_rollout, CannedCaller, CountingTokenSource,
    };
    use service_management_proto::{
        rollout, DeleteServiceStrategy, ListServiceRolloutsResponse, Rollout,
    };
    use tracing_test::traced_test;

    fn percentages(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries
            .iter()
            .map(|(id, percent)| (id.to_string(), *percent))
            .collect()
    }

    fn resolver(caller: &Arc<CannedCaller>) -> RolloutResolver {
        RolloutResolver::new(
            ServiceManagementClient::new(caller.clone(), "https://sm.example"),
            Arc::new(CountingTokenSource::default()),
        )
    }

    #[test]
    fn selects_largest_percentage() {
        let split = percentages(&[("cfgA", 40.0), ("cfgB", 60.0)]);
        assert_eq!(select_config_id(&split), Some(("cfgB", 60.0)));
    }

    #[test]
    fn ties_resolve_to_first_id_in_lexical_order() {
        let split = percentages(&[("cfgB", 50.0), ("cfgA", 50.0)]);
        for _ in 0..16 {
            assert_eq!(select_config_id(&split), Some(("cfgA", 50.0)));
        }
    }

    #[test]
    fn empty_split_selects_nothing() {
        assert_eq!(select_config_id(&HashMap::new()), None);
    }

    #[test]
    fn nan_never_beats_a_number() {
        let split = percentages(&[("a", f64::NAN), ("b", 10.0)]);
        assert_eq!(select_config_id(&split), Some(("b", 10.0)));
    }

    #[test]
    fn zero_or_nan_only_split_still_selects_first_id() {
        let zeros = percentages(&[("cfgB", 0.0), ("cfgA", 0.0)]);
        assert_eq!(select_config_id(&zeros), Some(("cfgA", 0.0)));
        assert!(is_partial_rollout(0.0));

        let nans = percentages(&[("cfgB", f64::NAN), ("cfgA", f64::NAN)]);
        let (id, percent) = select_config_id(&nans).unwrap();
        assert_eq!(id, "cfgA");
        assert!(percent.is_nan());
        assert!(is_partial_rollout(percent));
    }

    #[test]
    fn partial_rollout_tolerance() {
        assert!(!is_partial_rollout(100.0));
        assert!(!is_partial_rollout(99.999_999_999_9));
        assert!(is_partial_rollout(99.0));
        assert!(is_partial_rollout(60.0));
    }

    #[tokio::test]
    async fn empty_listing_has_no_active_rollouts() {
        let caller = Arc::new(CannedCaller::default());
        caller.push_ok(ListServiceRolloutsResponse::default());

        let err = resolver(&caller).resolve("svc", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoActiveRollouts);
    }

    #[tokio::test]
    async fn empty_split_has_no_active_rollouts() {
        let caller = Arc::new(CannedCaller::default());
        caller.push_ok(rollouts_response(vec![traffic_rollout("r1", &[])]));

        let err = resolver(&caller).resolve("svc", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoActiveRollouts);
    }

    #[tokio::test]
    async fn delete_strategy_has_no_active_rollouts() {
        let caller = Arc::new(CannedCaller::default());
        caller.push_ok(rollouts_response(vec![Rollout {
            rollout_id: "r1".to_string(),
            strategy: Some(rollout::Strategy::DeleteServiceStrategy(
                DeleteServiceStrategy {},
            )),
            ..Default::default()
        }]));

        let err = resolver(&caller).resolve("svc", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoActiveRollouts);
    }

    #[tokio::test]
    async fn first_poll_selects_majority_config() {
        let caller = Arc::new(CannedCaller::default());
        caller.push_ok(rollouts_response(vec![
            traffic_rollout("r2", &[("cfgA", 40.0), ("cfgB", 60.0)]),
            traffic_rollout("r1", &[("cfgA", 100.0)]),
        ]));

        let selection = resolver(&caller).resolve("svc", None).await.unwrap();
        assert_eq!(selection, ActiveSelection::new("r2", "cfgB"));
        assert_eq!(
            caller.requested_urls(),
            vec!["https://sm.example/v1/services/svc/rollouts?filter=status=SUCCESS".to_string()]
        );
    }

    #[tokio::test]
    async fn same_rollout_id_is_a_no_op() {
        let caller = Arc::new(CannedCaller::default());
        // The split disagrees with `current`; it must not be consulted.
        let listing = rollouts_response(vec![traffic_rollout("r1", &[("cfgZ", 100.0)])]);
        caller.push_ok(listing.clone());
        caller.push_ok(listing);

        let current = ActiveSelection::new("r1", "cfgA");
        let resolver = resolver(&caller);
        let first = resolver.resolve("svc", Some(&current)).await.unwrap();
        let second = resolver.resolve("svc", Some(&first)).await.unwrap();

        assert_eq!(first, current);
        assert_eq!(second, current);
    }

    #[tokio::test]
    #[traced_test]
    async fn new_rollout_with_same_config_advances_rollout_id() {
        let caller = Arc::new(CannedCaller::default());
        caller.push_ok(rollouts_response(vec![traffic_rollout(
            "r2",
            &[("cfgA", 100.0)],
        )]));

        let current = ActiveSelection::new("r1", "cfgA");
        let selection = resolver(&caller).resolve("svc", Some(&current)).await.unwrap();
        assert_eq!(selection, ActiveSelection::new("r2", "cfgA"));
        // Only the rollout listing was fetched.
        assert_eq!(caller.requested_urls().len(), 1);
        assert!(logs_contain("no new configuration to load"));
        assert!(!logs_contain("found new configuration"));
    }

    #[tokio::test]
    async fn new_rollout_with_new_config_switches() {
        let caller = Arc::new(CannedCaller::default());
        caller.push_ok(rollouts_response(vec![traffic_rollout(
            "r2",
            &[("cfgB", 100.0)],
        )]));

        let current = ActiveSelection::new("r1", "cfgA");
        let selection = resolver(&caller).resolve("svc", Some(&current)).await.unwrap();
        assert_eq!(selection, ActiveSelection::new("r2", "cfgB"));
    }

    #[tokio::test]
    #[traced_test]
    async fn near_full_rollout_is_not_flagged() {
        let caller = Arc::new(CannedCaller::default());
        caller.push_ok(rollouts_response(vec![traffic_rollout(
            "r2",
            &[("cfgB", 99.999_999_999_9)],
        )]));

        let selection = resolver(&caller).resolve("svc", None).await.unwrap();
        assert_eq!(selection.config_id, "cfgB");
        assert!(!logs_contain("partial rollout"));
    }

    #[tokio::test]
    #[traced_test]
    async fn partial_rollout_is_flagged_but_selected() {
        let caller = Arc::new(CannedCaller::default());
        caller.push_ok(rollouts_response(vec![traffic_rollout(
            "r2",
            &[("cfgA", 1.0), ("cfgB", 99.0)],
        )]));

        let selection = resolver(&caller).resolve("svc", None).await.unwrap();
        assert_eq!(selection, ActiveSelection::new("r2", "cfgB"));
        assert!(logs_contain("partial rollout"));
    }

    #[tokio::test]
    #[traced_test]
    async fn unchanged_rollout_is_logged_at_info() {
        let caller = Arc::new(CannedCaller::default());
        caller.push_ok(rollouts_response(vec![traffic_rollout(
            "r1",
            &[("cfgA", 100.0)],
        )]));

        let current = ActiveSelection::new("r1", "cfgA");
        resolver(&caller).resolve("svc", Some(&current)).await.unwrap();
        assert!(logs_contain("INFO"));
        assert!(logs_contain("rollout unchanged"));
    }

    #[tokio::test]
    async fn transport_failure_is_propagated() {
        let caller = Arc::new(CannedCaller::default());
        caller.push_status(503);

        let err = resolver(&caller).resolve("svc", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
    }

    #[tokio::test]
    async fn malformed_listing_is_a_deserialization_failure() {
        let caller = Arc::new(CannedCaller::default());
        caller.push_body(vec![0x0a, 0xff]);

        let err = resolver(&caller).resolve("svc", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeserializationFailure);
    }

    #[tokio::test]
    async fn token_is_acquired_for_every_resolution() {
        let caller = Arc::new(CannedCaller::default());
        let listing = rollouts_response(vec![traffic_rollout("r1", &[("cfgA", 100.0)])]);
        caller.push_ok(listing.clone());
        caller.push_ok(listing);
        let tokens = Arc::new(CountingTokenSource::default());
        let resolver = RolloutResolver::new(
            ServiceManagementClient::new(caller.clone(), "https://sm.example"),
            tokens.clone(),
        );

        resolver.resolve("svc", None).await.unwrap();
        resolver.resolve("svc", None).await.unwrap();
        assert_eq!(tokens.acquired(), 2);
        assert_eq!(caller.tokens_seen(), vec!["token-1", "token-2"]);
    }

    #[tokio::test]
    async fn credential_failure_is_reported() {
        let caller = Arc::new(CannedCaller::default());
        let resolver = RolloutResolver::new(
            ServiceManagementClient::new(caller.clone(), "https://sm.example"),
            Arc::new(CountingTokenSource::failing()),
        );

        let err = resolver.resolve("svc", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialUnavailable);
        assert!(caller.requested_urls().is_empty());
    }
}

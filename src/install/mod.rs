//! Pairs install notifications with authorization codes.
//!
//! The platform delivers an install in two halves that race each other: the
//! OAuth redirect brings the authorization code (usually without the
//! location id) and the INSTALL webhook brings the location id. Whichever
//! half arrives first is parked in the store; the second half claims the most
//! recent parked counterpart inside the correlation window and completes the
//! install.
//!
//! ```text
//!   webhook INSTALL ──► claim code? ──yes──► complete(location, code)
//!                          │no
//!                          └──► park install
//!   redirect code  ──► redeemed before? ──yes──► refuse
//!                          │no
//!                          ├──► locationId given? ──yes──► complete(location, code)
//!                          │no
//!                          └──► claim install? ──yes──► complete(location, code)
//!                                   │no
//!                                   └──► park code
//! ```
//!
//! Each check-then-park step is a single store transaction, so two halves
//! arriving together cannot both be parked. A code is recorded as redeemed
//! the moment it is paired, whether or not the exchange then succeeds, and is
//! never paired again. When a paired exchange fails, the install goes back to
//! waiting for its own code.
//!
//! With several installs in flight at once, "most recent" can pair a code
//! with the wrong location. An explicit `locationId` on the redirect, or one
//! reported by the token endpoint, takes precedence.

mod cleanup;
mod menu;

pub use cleanup::run_pending_cleanup;
pub use menu::MenuSync;

use crate::error::BridgeResult;
use crate::mapping::{build_mappings, FieldCatalog};
use crate::notify::{LifecycleEvent, Notifier};
use crate::oauth::TokenManager;
use crate::store::{CodeClaim, Store};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Tokens exchanged and the account saved for this location.
    Completed { location_id: String },
    /// This half was parked until its counterpart arrives.
    Pending,
    /// The authorization code was handed to an exchange before.
    AlreadyRedeemed,
}

pub struct InstallCorrelator {
    tokens: Arc<TokenManager>,
    store: Arc<Store>,
    notifier: Notifier,
    menu: Option<MenuSync>,
    window: Duration,
}

impl InstallCorrelator {
    pub fn new(
        tokens: Arc<TokenManager>,
        store: Arc<Store>,
        notifier: Notifier,
        menu: Option<MenuSync>,
        window: Duration,
    ) -> Self {
        Self {
            tokens,
            store,
            notifier,
            menu,
            window,
        }
    }

    /// Handles the INSTALL webhook.
    pub async fn on_install(&self, location_id: &str) -> BridgeResult<InstallOutcome> {
        self.store.add_menu_install(location_id)?;
        self.push_menu().await;

        let received_at = Utc::now();
        let Some(pending) =
            self.store
                .claim_code_or_park_install(location_id, received_at, self.cutoff())?
        else {
            info!(location_id = %location_id, "Install recorded, waiting for authorization code");
            return Ok(InstallOutcome::Pending);
        };

        info!(location_id = %location_id, "Install matched a parked authorization code");
        match self.complete(location_id, &pending.code).await {
            Ok(location_id) => Ok(InstallOutcome::Completed { location_id }),
            Err(e) => {
                // The parked code was not usable; this install still waits for its own.
                self.store.insert_pending_install(location_id, received_at)?;
                Err(e)
            }
        }
    }

    /// Handles the OAuth redirect.
    pub async fn on_authorization_code(
        &self,
        code: &str,
        location_id: Option<&str>,
    ) -> BridgeResult<InstallOutcome> {
        let received_at = Utc::now();
        let (location_id, claimed) = match location_id.filter(|id| !id.is_empty()) {
            Some(explicit) => {
                if !self.store.redeem_code(code, received_at)? {
                    warn!(location_id = %explicit, "Authorization code already redeemed");
                    return Ok(InstallOutcome::AlreadyRedeemed);
                }
                (explicit.to_string(), None)
            }
            None => match self
                .store
                .claim_install_or_park_code(code, received_at, self.cutoff())?
            {
                CodeClaim::Install(pending) => (pending.location_id.clone(), Some(pending)),
                CodeClaim::Parked => {
                    info!("Authorization code parked, waiting for install notification");
                    return Ok(InstallOutcome::Pending);
                }
                CodeClaim::Redeemed => {
                    warn!("Authorization code already redeemed");
                    return Ok(InstallOutcome::AlreadyRedeemed);
                }
            },
        };

        let completed = match self.complete(&location_id, code).await {
            Ok(completed) => completed,
            Err(e) => {
                if let Some(pending) = claimed {
                    self.store
                        .insert_pending_install(&pending.location_id, pending.received_at)?;
                }
                return Err(e);
            }
        };

        self.store.delete_pending_installs(&location_id)?;
        if completed != location_id {
            self.store.delete_pending_installs(&completed)?;
        }

        Ok(InstallOutcome::Completed {
            location_id: completed,
        })
    }

    /// Exchanges the code, builds the catalog and saves the account.
    /// Returns the location the tokens were saved under.
    pub async fn complete(&self, location_id: &str, code: &str) -> BridgeResult<String> {
        let grant = self.tokens.exchange_code(location_id, code).await?;

        // The code is spent at this point, so a catalog failure must not lose
        // the tokens; the catalog can be rebuilt later.
        let catalog = match build_mappings(
            self.tokens.provider(),
            &grant.location_id,
            &grant.tokens.access_token,
        )
        .await
        {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(
                    location_id = %grant.location_id,
                    "Saving install with empty field catalog: {}",
                    e
                );
                FieldCatalog::default()
            }
        };

        self.store
            .save_install(&grant.location_id, &grant.tokens, &catalog)?;
        info!(
            location_id = %grant.location_id,
            fields = catalog.mappings.len(),
            "Install completed"
        );

        self.notifier
            .send(LifecycleEvent::Install, &grant.location_id, Some(&grant.tokens));
        Ok(grant.location_id)
    }

    /// Handles the UNINSTALL webhook. Returns whether an account existed.
    pub async fn on_uninstall(&self, location_id: &str) -> BridgeResult<bool> {
        let removed = self.store.delete(location_id)?;
        self.store.delete_pending_installs(location_id)?;
        self.tokens.forget(location_id);

        self.store.remove_menu_install(location_id)?;
        self.push_menu().await;

        self.notifier
            .send(LifecycleEvent::Uninstall, location_id, None);
        info!(location_id = %location_id, removed, "Location uninstalled");
        Ok(removed)
    }

    fn cutoff(&self) -> chrono::DateTime<Utc> {
        Utc::now() - self.window
    }

    async fn push_menu(&self) {
        if let Some(menu) = &self.menu {
            menu.push(&self.store).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MenuConfig, NotifyConfig};
    use crate::error::BridgeError;
    use crate::provider::{test_config, ProviderClient};
    use crate::store::test_store;
    use mockito::{Matcher, Mock, Server, ServerGuard};

    struct Harness {
        server: ServerGuard,
        store: Arc<Store>,
        correlator: InstallCorrelator,
    }

    async fn harness(menu: bool) -> Harness {
        let server = Server::new_async().await;
        let store = Arc::new(test_store());
        let provider = ProviderClient::new(&test_config(&server.url())).unwrap();
        let tokens = Arc::new(TokenManager::new(
            provider.clone(),
            Arc::clone(&store),
            Duration::hours(22),
        ));
        let menu = menu
            .then(|| {
                MenuSync::from_config(
                    provider.clone(),
                    &MenuConfig {
                        menu_id: Some("menu-1".to_string()),
                        api_token: Some("agency".to_string()),
                        ..MenuConfig::default()
                    },
                )
            })
            .flatten();
        let notifier = Notifier::new(reqwest::Client::new(), &NotifyConfig::default());
        let correlator = InstallCorrelator::new(
            tokens,
            Arc::clone(&store),
            notifier,
            menu,
            Duration::seconds(600),
        );
        Harness {
            server,
            store,
            correlator,
        }
    }

    async fn mock_exchange(server: &mut ServerGuard, code: &str, expect: usize) -> Mock {
        server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::UrlEncoded("code".into(), code.into()))
            .with_status(200)
            .with_body(r#"{"access_token":"at","refresh_token":"rt"}"#)
            .expect(expect)
            .create_async()
            .await
    }

    async fn mock_catalog(server: &mut ServerGuard, location_id: &str) -> Mock {
        server
            .mock("GET", format!("/locations/{location_id}/customValues").as_str())
            .with_status(200)
            .with_body(
                r#"{"customValues":[{"id":"fld9","name":"Business Phone","fieldKey":"{{ custom_values.business_phone_no }}"}]}"#,
            )
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_install_then_code() {
        let mut h = harness(false).await;
        let exchange = mock_exchange(&mut h.server, "abc", 1).await;
        let _catalog = mock_catalog(&mut h.server, "loc1").await;

        assert_eq!(
            h.correlator.on_install("loc1").await.unwrap(),
            InstallOutcome::Pending
        );
        assert_eq!(
            h.correlator.on_authorization_code("abc", None).await.unwrap(),
            InstallOutcome::Completed {
                location_id: "loc1".to_string()
            }
        );

        let record = h.store.get("loc1").unwrap().unwrap();
        assert_eq!(record.field_catalog.mappings.len(), 1);
        assert_eq!(h.store.pending_counts().unwrap(), (0, 0));
        exchange.assert_async().await;
    }

    #[tokio::test]
    async fn test_code_then_install() {
        let mut h = harness(false).await;
        let exchange = mock_exchange(&mut h.server, "abc", 1).await;
        let _catalog = mock_catalog(&mut h.server, "loc1").await;

        assert_eq!(
            h.correlator.on_authorization_code("abc", None).await.unwrap(),
            InstallOutcome::Pending
        );
        assert_eq!(
            h.correlator.on_install("loc1").await.unwrap(),
            InstallOutcome::Completed {
                location_id: "loc1".to_string()
            }
        );

        assert!(h.store.get("loc1").unwrap().is_some());
        assert_eq!(h.store.pending_counts().unwrap(), (0, 0));
        exchange.assert_async().await;
    }

    #[tokio::test]
    async fn test_replayed_code_is_refused() {
        let mut h = harness(false).await;
        let exchange = mock_exchange(&mut h.server, "abc", 1).await;
        let _catalog = mock_catalog(&mut h.server, "loc1").await;

        h.correlator.on_install("loc1").await.unwrap();
        h.correlator.on_authorization_code("abc", None).await.unwrap();
        let replay = h.correlator.on_authorization_code("abc", None).await.unwrap();

        assert_eq!(replay, InstallOutcome::AlreadyRedeemed);
        assert_eq!(h.store.pending_counts().unwrap(), (0, 0));
        exchange.assert_async().await;
    }

    #[tokio::test]
    async fn test_out_of_order_replay_does_not_exchange_again() {
        let mut h = harness(false).await;
        let exchange = mock_exchange(&mut h.server, "abc", 1).await;
        let _catalog = mock_catalog(&mut h.server, "loc1").await;

        h.correlator.on_install("loc1").await.unwrap();
        h.correlator.on_authorization_code("abc", None).await.unwrap();

        assert_eq!(
            h.correlator.on_authorization_code("abc", None).await.unwrap(),
            InstallOutcome::AlreadyRedeemed
        );
        assert_eq!(
            h.correlator.on_install("loc1").await.unwrap(),
            InstallOutcome::Pending
        );
        exchange.assert_async().await;
    }

    #[tokio::test]
    async fn test_explicit_location_code_redeemed_once() {
        let mut h = harness(false).await;
        let exchange = mock_exchange(&mut h.server, "abc", 1).await;
        let _catalog = mock_catalog(&mut h.server, "loc1").await;

        h.correlator
            .on_authorization_code("abc", Some("loc1"))
            .await
            .unwrap();
        let replay = h
            .correlator
            .on_authorization_code("abc", Some("loc1"))
            .await
            .unwrap();

        assert_eq!(replay, InstallOutcome::AlreadyRedeemed);
        exchange.assert_async().await;
    }

    #[tokio::test]
    async fn test_stale_code_does_not_swallow_next_install() {
        let mut h = harness(false).await;
        let _stale = h
            .server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::UrlEncoded("code".into(), "stale".into()))
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .expect(1)
            .create_async()
            .await;
        let fresh = mock_exchange(&mut h.server, "fresh", 1).await;
        let _catalog = mock_catalog(&mut h.server, "loc2").await;

        assert_eq!(
            h.correlator.on_authorization_code("stale", None).await.unwrap(),
            InstallOutcome::Pending
        );
        let err = h.correlator.on_install("loc2").await.unwrap_err();
        assert!(matches!(err, BridgeError::Exchange(_)));
        assert_eq!(h.store.pending_counts().unwrap(), (1, 0));

        assert_eq!(
            h.correlator.on_authorization_code("fresh", None).await.unwrap(),
            InstallOutcome::Completed {
                location_id: "loc2".to_string()
            }
        );
        assert!(h.store.get("loc2").unwrap().is_some());
        assert_eq!(h.store.pending_counts().unwrap(), (0, 0));
        fresh.assert_async().await;

        // The rejected code is spent too
        assert_eq!(
            h.correlator.on_authorization_code("stale", None).await.unwrap(),
            InstallOutcome::AlreadyRedeemed
        );
    }

    #[tokio::test]
    async fn test_concurrent_halves_exchange_exactly_once() {
        for _ in 0..20 {
            let mut h = harness(false).await;
            let exchange = mock_exchange(&mut h.server, "abc", 1).await;
            let _catalog = mock_catalog(&mut h.server, "loc1").await;

            let (install, code) = tokio::join!(
                h.correlator.on_install("loc1"),
                h.correlator.on_authorization_code("abc", None),
            );
            let outcomes = [install.unwrap(), code.unwrap()];

            assert_eq!(
                outcomes
                    .iter()
                    .filter(|o| matches!(o, InstallOutcome::Completed { .. }))
                    .count(),
                1
            );
            assert_eq!(h.store.pending_counts().unwrap(), (0, 0));
            exchange.assert_async().await;
        }
    }

    #[tokio::test]
    async fn test_explicit_location_skips_correlation() {
        let mut h = harness(false).await;
        let _exchange = mock_exchange(&mut h.server, "abc", 1).await;
        let _catalog = mock_catalog(&mut h.server, "loc2").await;

        h.correlator.on_install("loc1").await.unwrap();
        h.correlator.on_install("loc2").await.unwrap();

        let outcome = h
            .correlator
            .on_authorization_code("abc", Some("loc2"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            InstallOutcome::Completed {
                location_id: "loc2".to_string()
            }
        );
        // loc1 still waits for its own code
        assert_eq!(h.store.pending_counts().unwrap(), (1, 0));
    }

    #[tokio::test]
    async fn test_catalog_failure_still_saves_tokens() {
        let mut h = harness(false).await;
        let _exchange = mock_exchange(&mut h.server, "abc", 1).await;
        let _catalog = h
            .server
            .mock("GET", "/locations/loc1/customValues")
            .with_status(500)
            .create_async()
            .await;

        h.correlator
            .on_authorization_code("abc", Some("loc1"))
            .await
            .unwrap();

        let record = h.store.get("loc1").unwrap().unwrap();
        assert!(record.field_catalog.is_empty());
        assert_eq!(h.store.decrypt_tokens(&record).unwrap().access_token, "at");
    }

    #[tokio::test]
    async fn test_rejected_code_saves_nothing() {
        let mut h = harness(false).await;
        let _exchange = h
            .server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let err = h
            .correlator
            .on_authorization_code("bad", Some("loc1"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Exchange(_)));
        assert!(h.store.get("loc1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_uninstall_removes_account_and_updates_menu() {
        let mut h = harness(true).await;
        let _exchange = mock_exchange(&mut h.server, "abc", 1).await;
        let _catalog = mock_catalog(&mut h.server, "loc1").await;
        let menu_with = h
            .server
            .mock("PUT", "/custom-menus/menu-1")
            .match_body(Matcher::Regex(r#""locations":\["loc1"\]"#.to_string()))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let menu_without = h
            .server
            .mock("PUT", "/custom-menus/menu-1")
            .match_body(Matcher::Regex(r#""locations":\[\]"#.to_string()))
            .with_status(200)
            .expect(2)
            .create_async()
            .await;

        h.correlator.on_install("loc1").await.unwrap();
        h.correlator.on_authorization_code("abc", None).await.unwrap();
        assert!(h.correlator.on_uninstall("loc1").await.unwrap());
        assert!(!h.correlator.on_uninstall("loc1").await.unwrap());

        assert!(h.store.get("loc1").unwrap().is_none());
        assert!(h.store.list_menu_installs().unwrap().is_empty());
        menu_with.assert_async().await;
        // Every uninstall pushes the list, even a repeated one
        menu_without.assert_async().await;
    }
}

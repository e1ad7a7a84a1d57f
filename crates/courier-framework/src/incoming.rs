//! The inbound webhook pipeline shared by every event source.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use courier_core::{AuthError, CourierError, CourierResult, Store, TokenVerifier, fold_sequential};

use crate::matcher::RuleMatcher;
use crate::sources::EventSource;

/// Default retention of incoming logs.
pub const DEFAULT_LOG_RETENTION_DAYS: i64 = 2;

/// What a webhook sender gets back on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum IncomingOutcome {
    /// Number of distinct users notified across the delivery.
    Queued { notifications: usize },
    /// The payload was accepted but maps to nothing.
    Unsupported { error: String },
}

impl IncomingOutcome {
    pub fn notifications(&self) -> usize {
        match self {
            Self::Queued { notifications } => *notifications,
            Self::Unsupported { .. } => 0,
        }
    }
}

/// Runs authentication, logging, classification and rule matching for one
/// delivery.
pub struct IncomingProcessor {
    store: Arc<dyn Store>,
    verifier: Arc<dyn TokenVerifier>,
    matcher: RuleMatcher,
    sources: HashMap<&'static str, Arc<dyn EventSource>>,
    retention: Duration,
}

impl IncomingProcessor {
    pub fn new(store: Arc<dyn Store>, verifier: Arc<dyn TokenVerifier>, matcher: RuleMatcher) -> Self {
        Self {
            store,
            verifier,
            matcher,
            sources: HashMap::new(),
            retention: Duration::days(DEFAULT_LOG_RETENTION_DAYS),
        }
    }

    /// Sets how long incoming logs are kept.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Registers a source, replacing any previous one of the same kind.
    pub fn register(&mut self, source: Arc<dyn EventSource>) -> &mut Self {
        self.sources.insert(source.kind(), source);
        self
    }

    /// Registers several sources.
    pub fn with_sources(mut self, sources: impl IntoIterator<Item = Arc<dyn EventSource>>) -> Self {
        for source in sources {
            self.register(source);
        }
        self
    }

    pub fn has_source(&self, kind: &str) -> bool {
        self.sources.contains_key(kind)
    }

    /// Processes one delivery for `source`.
    ///
    /// Authentication and lookup failures abort with an error; an
    /// unsupported payload is a successful [`IncomingOutcome::Unsupported`].
    pub async fn process_incoming(
        &self,
        source: &str,
        token: Option<&str>,
        payload: &Value,
        hint: Option<&str>,
    ) -> CourierResult<IncomingOutcome> {
        let handler = self
            .sources
            .get(source)
            .ok_or_else(|| CourierError::not_found("source", source))?;

        let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::Missing)?;
        let claims = self.verifier.verify(token)?;

        let service = self
            .store
            .get_service(&claims.service_id)
            .await?
            .filter(|s| s.kind == source && s.validation_key() == Some(claims.validation_key.as_str()))
            .ok_or_else(|| CourierError::not_found("service", claims.service_id.clone()))?;

        self.store
            .insert_incoming_log(source, &service.id, payload)
            .await?;
        match self
            .store
            .prune_incoming_logs(source, Utc::now() - self.retention)
            .await
        {
            Ok(0) => {}
            Ok(removed) => debug!(source, removed, "Pruned incoming logs"),
            Err(e) => warn!(source, error = %e, "Failed to prune incoming logs"),
        }

        let triggers = match handler.classify(payload, hint) {
            Ok(triggers) => triggers,
            Err(unsupported) => {
                debug!(source, service_id = %service.id, error = %unsupported, "Unsupported event");
                return Ok(IncomingOutcome::Unsupported {
                    error: unsupported.to_string(),
                });
            }
        };

        let notified = fold_sequential(triggers, HashSet::new(), |mut notified, trigger| {
            let service_id = service.id.clone();
            async move {
                let newly = self
                    .matcher
                    .process_rules(&service_id, &trigger, payload, &notified)
                    .await?;
                notified.extend(newly);
                Ok::<_, CourierError>(notified)
            }
        })
        .await?;

        info!(
            source,
            service_id = %service.id,
            notifications = notified.len(),
            "Processed incoming event"
        );
        Ok(IncomingOutcome::Queued {
            notifications: notified.len(),
        })
    }
}

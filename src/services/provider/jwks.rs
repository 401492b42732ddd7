//! Provider signing keys.
//!
//! `JwksCache` is read on every bearer/callback validation and written only
//! by the refresh task. Reads never block: the current set lives behind an
//! `ArcSwapOption` and is replaced wholesale.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use arc_swap::ArcSwapOption;
use jsonwebtoken::{
    Algorithm, DecodingKey,
    jwk::{Jwk, JwkSet},
};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use super::client::{KeySetFetcher, ProviderError};
use crate::services::{
    clock::Clock,
    token::{CodecError, VerificationKey, VerificationKeys},
};

#[derive(Debug, Clone, Default)]
pub struct KeySet {
    by_kid: HashMap<String, Arc<VerificationKey>>,
    unnamed: Vec<Arc<VerificationKey>>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: VerificationKey) {
        match key.kid() {
            Some(kid) => {
                self.by_kid.insert(kid.to_string(), Arc::new(key));
            }
            None => self.unnamed.push(Arc::new(key)),
        }
    }

    /// Keys advertising another `alg` are skipped, as are keys
    /// `DecodingKey::from_jwk` cannot use.
    pub fn from_jwks(set: &JwkSet, expected: Algorithm) -> Self {
        let mut keys = Self::new();
        for jwk in &set.keys {
            if let Some(alg) = jwk_algorithm(jwk)
                && alg != expected
            {
                debug!(kid = ?jwk.common.key_id, ?alg, "skipping jwk for another algorithm");
                continue;
            }

            match DecodingKey::from_jwk(jwk) {
                Ok(decoding) => keys.insert(VerificationKey::new(
                    expected,
                    decoding,
                    jwk.common.key_id.clone(),
                )),
                Err(e) => warn!(kid = ?jwk.common.key_id, error = ?e, "skipping unusable jwk"),
            }
        }
        keys
    }

    pub fn len(&self) -> usize {
        self.by_kid.len() + self.unnamed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A token without `kid` is only accepted when the set holds one key.
    pub fn lookup(&self, kid: Option<&str>) -> Option<Arc<VerificationKey>> {
        match kid {
            Some(kid) => self.by_kid.get(kid).cloned(),
            None if self.len() == 1 => self
                .by_kid
                .values()
                .chain(self.unnamed.iter())
                .next()
                .cloned(),
            None => None,
        }
    }
}

fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    let declared = jwk.common.key_algorithm.as_ref()?;
    let name = serde_json::to_value(declared).ok()?;
    name.as_str()?.parse().ok()
}

struct CachedKeys {
    keys: KeySet,
    fetched_at: i64,
}

pub struct JwksCache {
    current: ArcSwapOption<CachedKeys>,
    fetcher: Arc<dyn KeySetFetcher>,
    clock: Arc<dyn Clock>,
    ttl: i64,
}

impl JwksCache {
    pub fn new(fetcher: Arc<dyn KeySetFetcher>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            fetcher,
            clock,
            ttl: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        }
    }

    /// Replace the current set, stamping it with the current time.
    pub fn store(&self, keys: KeySet) {
        self.current.store(Some(Arc::new(CachedKeys {
            keys,
            fetched_at: self.clock.timestamp(),
        })));
    }

    /// Fetch once. A failed or empty fetch leaves the previous set in place.
    pub async fn refresh(&self) -> Result<usize, ProviderError> {
        match self.fetcher.fetch_signing_keys().await {
            Ok(keys) if keys.is_empty() => {
                warn!("jwks refresh returned no usable keys, keeping previous set");
                Err(ProviderError::Rejected("no usable signing keys".to_string()))
            }
            Ok(keys) => {
                let count = keys.len();
                self.store(keys);
                info!(count, "jwks refreshed");
                Ok(count)
            }
            Err(e) => {
                warn!(error = ?e, "jwks refresh failed, keeping previous set");
                Err(e)
            }
        }
    }

    /// The only writer. First refresh happens one interval from now; callers
    /// load the initial set with `refresh`.
    pub fn spawn_refresh(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // failures are logged inside refresh
                let _ = self.refresh().await;
            }
        })
    }
}

impl VerificationKeys for JwksCache {
    fn key_for(
        &self,
        kid: Option<&str>,
        alg: Algorithm,
    ) -> Result<Arc<VerificationKey>, CodecError> {
        let guard = self.current.load();
        let Some(cached) = guard.as_ref() else {
            warn!("no signing keys loaded yet");
            return Err(CodecError::KeysUnavailable);
        };

        if self.clock.timestamp() >= cached.fetched_at.saturating_add(self.ttl) {
            warn!(fetched_at = cached.fetched_at, "cached signing keys are stale");
            return Err(CodecError::KeysUnavailable);
        }

        let key = cached.keys.lookup(kid).ok_or_else(|| {
            debug!(?kid, "no signing key for kid");
            CodecError::UnknownKey
        })?;

        if key.algorithm() != alg {
            return Err(CodecError::AlgorithmMismatch);
        }
        Ok(key)
    }
}

impl fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.current.load();
        f.debug_struct("JwksCache")
            .field("keys", &guard.as_ref().map(|c| c.keys.len()))
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

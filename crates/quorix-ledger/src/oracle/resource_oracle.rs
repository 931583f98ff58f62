//! Resource oracle
//!
//! Issues time-bounded offers over shard indices and single-use challenge
//! nonces. Every offer lands in a live index (evicted lazily once its TTL
//! has passed) and, unless asked otherwise, in an append-only ledger used
//! for pagination.

use crate::measurement::MeasurementSource;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use quorix_common::{
    Clock, OfferError, OfferKind, OfferPage, QuorixError, ResourceOffer, Result, ShardIndex,
    SystemClock, VerificationHint, DEFAULT_OFFER_TTL_SECS, MIN_OFFER_SHARDS,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Bytes of entropy in offer ids and nonce tokens
const TOKEN_BYTES: usize = 16;

/// Upper bound for a single `random_bits` request
pub const MAX_RANDOM_BITS: usize = 65_536;

/// Oracle configuration
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// TTL used by callers that do not pick one
    pub default_ttl: Duration,
    /// Shots requested from the source for a quick verification hint
    pub quick_verify_repetitions: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(DEFAULT_OFFER_TTL_SECS),
            quick_verify_repetitions: 128,
        }
    }
}

/// Per-call offer options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferOptions {
    pub run_quick_verify: bool,
    /// Append the offer to the ledger
    pub persist: bool,
}

impl Default for OfferOptions {
    fn default() -> Self {
        Self {
            run_quick_verify: false,
            persist: true,
        }
    }
}

/// Detailed nonce lookup outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonceStatus {
    Valid,
    NotFound,
    Expired,
}

impl NonceStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, NonceStatus::Valid)
    }
}

/// CSPRNG output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomBits {
    pub n_bits: usize,
    /// `ceil(n_bits / 8)` bytes, unused low bits of the last byte zeroed
    pub hex: String,
}

/// Offer and nonce authority
pub struct ResourceOracle {
    config: OracleConfig,
    /// Live offers by id
    offers: DashMap<String, ResourceOffer>,
    /// Append-only offer history
    ledger: RwLock<Vec<ResourceOffer>>,
    /// Nonce token -> expiry
    nonces: DashMap<String, DateTime<Utc>>,
    source: Option<Arc<dyn MeasurementSource>>,
    clock: Arc<dyn Clock>,
}

impl ResourceOracle {
    pub fn new(config: OracleConfig) -> Self {
        Self {
            config,
            offers: DashMap::new(),
            ledger: RwLock::new(Vec::new()),
            nonces: DashMap::new(),
            source: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Attach the source used for quick verification hints
    pub fn with_source(mut self, source: Arc<dyn MeasurementSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create an offer over `shard_indices`.
    ///
    /// Duplicate indices are dropped keeping first-occurrence order; fewer
    /// than two distinct indices is an error. `kind` accepts `pair`/`bell`
    /// and `group`/`ghz`. A failing quick verification is recorded in the
    /// offer's hint and never fails creation.
    #[instrument(skip(self, shard_indices), fields(shards = shard_indices.len()))]
    pub async fn create_offer(
        &self,
        shard_indices: &[ShardIndex],
        kind: &str,
        ttl: Duration,
        options: OfferOptions,
    ) -> Result<ResourceOffer> {
        let shard_indices = dedup_indices(shard_indices);
        if shard_indices.len() < MIN_OFFER_SHARDS {
            return Err(OfferError::InsufficientShards {
                count: shard_indices.len(),
            }
            .into());
        }
        let kind = OfferKind::from_str(kind)?;
        if ttl.is_zero() || chrono::Duration::from_std(ttl).is_err() {
            return Err(OfferError::InvalidTtl(format!("{:?}", ttl)).into());
        }

        let verification_hint = if options.run_quick_verify {
            Some(self.quick_verify(shard_indices.len()).await)
        } else {
            None
        };

        let offer = ResourceOffer {
            offer_id: random_token(),
            created_at: self.clock.now(),
            expected_unit_count: shard_indices.len(),
            shard_indices,
            kind,
            ttl,
            verification_hint,
        };

        self.offers.insert(offer.offer_id.clone(), offer.clone());
        if options.persist {
            self.ledger.write().push(offer.clone());
        }

        info!(
            offer_id = %offer.offer_id,
            kind = %offer.kind,
            units = offer.expected_unit_count,
            ttl_ms = ttl.as_millis() as u64,
            persisted = options.persist,
            "Offer created"
        );
        Ok(offer)
    }

    async fn quick_verify(&self, shard_count: usize) -> VerificationHint {
        let Some(source) = &self.source else {
            return VerificationHint::Unavailable {
                error: "no measurement source attached".to_string(),
            };
        };
        match source
            .quick_verify(shard_count, self.config.quick_verify_repetitions)
            .await
        {
            Ok(hint) => hint,
            Err(e) => {
                warn!(error = %e, "Quick verification failed");
                VerificationHint::Unavailable {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Live offer by id. An offer past its TTL is evicted and `None` is
    /// returned; at exactly `created_at + ttl` it is still live.
    pub fn get_offer(&self, offer_id: &str) -> Option<ResourceOffer> {
        let now = self.clock.now();
        {
            let entry = self.offers.get(offer_id)?;
            if !entry.is_expired_at(now) {
                return Some(entry.value().clone());
            }
        }
        if self
            .offers
            .remove_if(offer_id, |_, offer| offer.is_expired_at(now))
            .is_some()
        {
            debug!(offer_id, "Expired offer evicted");
        }
        None
    }

    /// Sweep expired offers, then return the live set ordered by creation
    pub fn list_live_offers(&self) -> Vec<ResourceOffer> {
        let now = self.clock.now();
        self.offers.retain(|_, offer| !offer.is_expired_at(now));
        let mut live: Vec<_> = self.offers.iter().map(|e| e.value().clone()).collect();
        live.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        live
    }

    /// Page through the ledger. Pages are 1-based; anything below 1 is
    /// read as 1.
    pub fn list_offers(&self, page: i64, page_size: u64) -> OfferPage {
        let page = page.max(1) as u64;
        let ledger = self.ledger.read();
        let start = (page - 1).saturating_mul(page_size);
        let offers = ledger
            .iter()
            .skip(usize::try_from(start).unwrap_or(usize::MAX))
            .take(usize::try_from(page_size).unwrap_or(usize::MAX))
            .cloned()
            .collect();

        OfferPage {
            page,
            page_size,
            total: ledger.len() as u64,
            offers,
        }
    }

    pub fn ledger_len(&self) -> usize {
        self.ledger.read().len()
    }

    /// Offers in the live index, without sweeping expired entries
    pub fn live_len(&self) -> usize {
        self.offers.len()
    }

    /// Issue a single-use token valid for `ttl`
    pub fn issue_nonce(&self, ttl: Duration) -> String {
        let token = random_token();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.clock.now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.nonces.insert(token.clone(), expires_at);
        debug!(expires_at = %expires_at, "Nonce issued");
        token
    }

    /// Consume `token`; true iff it existed and had not expired
    pub fn verify_nonce(&self, token: &str) -> bool {
        self.verify_nonce_status(token).is_valid()
    }

    /// Consume `token` and report why it was or was not accepted. The
    /// token is removed on every lookup.
    pub fn verify_nonce_status(&self, token: &str) -> NonceStatus {
        match self.nonces.remove(token) {
            None => NonceStatus::NotFound,
            Some((_, expires_at)) if self.clock.now() > expires_at => NonceStatus::Expired,
            Some(_) => NonceStatus::Valid,
        }
    }

    /// `n_bits` bits from the OS CSPRNG, `1..=65536`
    pub fn random_bits(&self, n_bits: usize) -> Result<RandomBits> {
        if n_bits == 0 || n_bits > MAX_RANDOM_BITS {
            return Err(QuorixError::Config(format!(
                "n_bits must be within 1..={}, got {}",
                MAX_RANDOM_BITS, n_bits
            )));
        }
        let mut bytes = vec![0u8; n_bits.div_ceil(8)];
        OsRng.fill_bytes(&mut bytes);
        let spare = bytes.len() * 8 - n_bits;
        if let Some(last) = bytes.last_mut() {
            *last &= 0xffu8 << spare;
        }
        Ok(RandomBits {
            n_bits,
            hex: hex::encode(bytes),
        })
    }
}

impl Default for ResourceOracle {
    fn default() -> Self {
        Self::new(OracleConfig::default())
    }
}

impl std::fmt::Debug for ResourceOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceOracle")
            .field("config", &self.config)
            .field("live_offers", &self.live_len())
            .field("ledger_len", &self.ledger_len())
            .field("nonces", &self.nonces.len())
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn dedup_indices(indices: &[ShardIndex]) -> Vec<ShardIndex> {
    let mut seen = HashSet::with_capacity(indices.len());
    indices.iter().copied().filter(|i| seen.insert(*i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::SyntheticSource;
    use chrono::TimeZone;
    use quorix_common::ManualClock;

    fn oracle() -> (Arc<ManualClock>, ResourceOracle) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()));
        let oracle = ResourceOracle::default().with_clock(clock.clone());
        (clock, oracle)
    }

    #[tokio::test]
    async fn test_offer_ttl_boundary() {
        let (clock, oracle) = oracle();
        let offer = oracle
            .create_offer(&[0, 1, 2], "group", Duration::from_secs(10), OfferOptions::default())
            .await
            .unwrap();

        assert_eq!(offer.offer_id.len(), 32);
        assert_eq!(offer.expected_unit_count, 3);

        clock.advance(chrono::Duration::seconds(10));
        assert!(oracle.get_offer(&offer.offer_id).is_some());

        let other = oracle
            .create_offer(&[0, 1], "pair", Duration::from_secs(10), OfferOptions::default())
            .await
            .unwrap();
        assert_eq!(oracle.live_len(), 2);

        clock.advance(chrono::Duration::milliseconds(1));
        assert!(oracle.get_offer(&offer.offer_id).is_none());
        // the lookup alone evicts; the newer offer stays
        assert_eq!(oracle.live_len(), 1);
        assert!(oracle.get_offer(&other.offer_id).is_some());
        assert_eq!(oracle.list_live_offers().len(), 1);
        assert_eq!(oracle.ledger_len(), 2);
    }

    #[tokio::test]
    async fn test_offer_validation() {
        let (_, oracle) = oracle();
        let ttl = Duration::from_secs(5);

        let err = oracle
            .create_offer(&[4, 4, 4], "pair", ttl, OfferOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QuorixError::Offer(OfferError::InsufficientShards { count: 1 })
        ));

        let err = oracle
            .create_offer(&[0, 1], "triplet", ttl, OfferOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QuorixError::Offer(OfferError::InvalidKind(_))));

        let offer = oracle
            .create_offer(&[3, 1, 3, 2], "GHZ", ttl, OfferOptions::default())
            .await
            .unwrap();
        assert_eq!(offer.shard_indices, vec![3, 1, 2]);
        assert_eq!(offer.kind, OfferKind::GroupGhz);
        assert_eq!(oracle.ledger_len(), 1);
    }

    #[tokio::test]
    async fn test_unpersisted_offer_skips_ledger() {
        let (_, oracle) = oracle();
        let options = OfferOptions {
            persist: false,
            ..Default::default()
        };
        let offer = oracle
            .create_offer(&[0, 1], "bell", Duration::from_secs(5), options)
            .await
            .unwrap();
        assert!(oracle.get_offer(&offer.offer_id).is_some());
        assert_eq!(oracle.ledger_len(), 0);
    }

    #[tokio::test]
    async fn test_quick_verify_hint() {
        let (_, oracle) = oracle();
        let options = OfferOptions {
            run_quick_verify: true,
            ..Default::default()
        };

        let offer = oracle
            .create_offer(&[0, 1], "pair", Duration::from_secs(5), options)
            .await
            .unwrap();
        assert!(matches!(
            offer.verification_hint,
            Some(VerificationHint::Unavailable { .. })
        ));

        let oracle = oracle.with_source(Arc::new(SyntheticSource::new()));
        let offer = oracle
            .create_offer(&[0, 1, 2], "group", Duration::from_secs(5), options)
            .await
            .unwrap();
        match offer.verification_hint {
            Some(VerificationHint::Sampled { agreement_rate, .. }) => assert_eq!(agreement_rate, 1.0),
            other => panic!("unexpected hint {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_offers_pagination() {
        let (_, oracle) = oracle();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let offer = oracle
                .create_offer(&[0, 1], "pair", Duration::from_secs(5), OfferOptions::default())
                .await
                .unwrap();
            ids.push(offer.offer_id);
        }

        let first = oracle.list_offers(0, 2);
        assert_eq!(first.page, 1);
        assert_eq!(first.total, 5);
        let first_ids: Vec<_> = first.offers.iter().map(|o| o.offer_id.clone()).collect();
        assert_eq!(first_ids, ids[0..2]);

        let last = oracle.list_offers(3, 2);
        assert_eq!(last.offers.len(), 1);
        assert_eq!(last.offers[0].offer_id, ids[4]);

        assert!(oracle.list_offers(4, 2).offers.is_empty());
        assert!(oracle.list_offers(-7, 0).offers.is_empty());
    }

    #[test]
    fn test_nonce_single_use() {
        let (clock, oracle) = oracle();
        let token = oracle.issue_nonce(Duration::from_secs(60));
        assert_eq!(token.len(), 32);

        assert!(oracle.verify_nonce(&token));
        assert!(!oracle.verify_nonce(&token));
        assert_eq!(oracle.verify_nonce_status(&token), NonceStatus::NotFound);

        let stale = oracle.issue_nonce(Duration::from_secs(1));
        clock.advance(chrono::Duration::seconds(2));
        assert_eq!(oracle.verify_nonce_status(&stale), NonceStatus::Expired);
        // consumed even though it was rejected
        assert_eq!(oracle.verify_nonce_status(&stale), NonceStatus::NotFound);
    }

    #[test]
    fn test_nonce_consumed_once_under_contention() {
        let (_, oracle) = oracle();
        for _ in 0..20 {
            let token = oracle.issue_nonce(Duration::from_secs(60));
            let accepted = std::thread::scope(|s| {
                let handles: Vec<_> = (0..8)
                    .map(|_| s.spawn(|| oracle.verify_nonce(&token)))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap())
                    .filter(|ok| *ok)
                    .count()
            });
            assert_eq!(accepted, 1);
        }
        assert_eq!(oracle.verify_nonce_status("missing"), NonceStatus::NotFound);
    }

    #[test]
    fn test_random_bits() {
        let oracle = ResourceOracle::default();
        let bits = oracle.random_bits(12).unwrap();
        assert_eq!(bits.n_bits, 12);
        assert_eq!(bits.hex.len(), 4);
        let bytes = hex::decode(&bits.hex).unwrap();
        assert_eq!(bytes[1] & 0x0f, 0);

        assert!(oracle.random_bits(0).is_err());
        assert!(oracle.random_bits(MAX_RANDOM_BITS + 1).is_err());
        assert_eq!(oracle.random_bits(MAX_RANDOM_BITS).unwrap().hex.len(), 16_384);
    }
}

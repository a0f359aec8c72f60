//! Consensus Orchestrator - fans out to reasoning providers and votes
//!
//! The orchestrator manages:
//! - Concurrent provider requests, each under its own timeout
//! - One overall deadline per round; stragglers are abandoned
//! - Exclusion of failed providers and weight renormalization
//! - Weighted voting into a single consensus
//! - Single-flight caching per (instrument, timeframe)
//!
//! Every request works on the configuration snapshot it started with.

use crate::agent::{FailureCategory, ProviderFailure, ProviderRequest, SignalProvider};
use crate::cache::{CacheKey, SignalCache};
use crate::config::{ConfigError, ConsensusConfig};
use crate::registry::ProviderRegistry;
use crate::voting::{weighted_vote, VoteResult};
use chrono::Utc;
use common::{ConsensusSignal, ProviderSignal, ProviderWeight};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A provider that was excluded from a round, and why
#[derive(Debug, Clone, PartialEq)]
pub struct FailedProvider {
    pub provider_id: String,
    pub failure: ProviderFailure,
}

impl FailedProvider {
    pub fn category(&self) -> FailureCategory {
        self.failure.category()
    }
}

/// No consensus this cycle.
///
/// Callers must skip the decision cycle; this is never a neutral signal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsensusUnavailable {
    #[error("no active providers configured for {instrument}")]
    NoActiveProviders { instrument: String },
    #[error("no provider produced a signal for {instrument} ({} failed)", .failures.len())]
    NoSuccessfulProviders {
        instrument: String,
        failures: Vec<FailedProvider>,
    },
    #[error("all providers are required but {} failed for {instrument}", .failures.len())]
    RequiredProviderFailed {
        instrument: String,
        failures: Vec<FailedProvider>,
    },
    #[error("consensus request for {instrument} was cancelled")]
    Cancelled { instrument: String },
}

impl ConsensusUnavailable {
    /// Provider failures behind this condition, if any
    pub fn failures(&self) -> &[FailedProvider] {
        match self {
            ConsensusUnavailable::NoSuccessfulProviders { failures, .. }
            | ConsensusUnavailable::RequiredProviderFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// Per-request parameters beyond the instrument
#[derive(Debug, Clone, Default)]
pub struct ConsensusContext {
    pub timeframe: String,
    /// Falls back to the configured default
    pub lookback_window: Option<u32>,
    pub extra: Option<serde_json::Value>,
}

impl ConsensusContext {
    pub fn new(timeframe: impl Into<String>) -> Self {
        Self {
            timeframe: timeframe.into(),
            ..Default::default()
        }
    }

    pub fn with_lookback(mut self, bars: u32) -> Self {
        self.lookback_window = Some(bars);
        self
    }
}

/// Orchestrator - coordinates the reasoning providers
pub struct ConsensusOrchestrator {
    registry: ProviderRegistry,
    config: Arc<RwLock<Arc<ConsensusConfig>>>,
    cache: Arc<SignalCache>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConsensusOrchestrator {
    /// Create an orchestrator; every configured provider must be registered
    pub fn new(config: ConsensusConfig, registry: ProviderRegistry) -> Result<Self, ConfigError> {
        config.validate()?;
        registry.check(&config)?;

        let (shutdown_tx, _) = watch::channel(false);
        info!(
            "Consensus orchestrator created with {} providers ({} active)",
            config.providers.len(),
            config.active_providers().count()
        );

        Ok(Self {
            registry,
            config: Arc::new(RwLock::new(Arc::new(config))),
            cache: Arc::new(SignalCache::new()),
            shutdown_tx,
        })
    }

    /// Current configuration snapshot
    pub async fn config(&self) -> Arc<ConsensusConfig> {
        self.config.read().await.clone()
    }

    /// Swap in a new configuration; in-flight requests keep their snapshot
    pub async fn update_config(&self, config: ConsensusConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.registry.check(&config)?;
        *self.config.write().await = Arc::new(config);
        info!("Consensus configuration updated");
        Ok(())
    }

    pub fn cache(&self) -> &SignalCache {
        &self.cache
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Cached consensus for an instrument/timeframe with default context
    pub async fn get_consensus(
        &self,
        instrument: &str,
        timeframe: &str,
    ) -> Result<ConsensusSignal, ConsensusUnavailable> {
        self.generate_consensus(instrument, ConsensusContext::new(timeframe)).await
    }

    /// Produce the consensus for `instrument`, served from the cache when fresh.
    ///
    /// Concurrent calls for the same (instrument, timeframe) share a single
    /// provider round. The cache key ignores lookback and extra context.
    pub async fn generate_consensus(
        &self,
        instrument: &str,
        context: ConsensusContext,
    ) -> Result<ConsensusSignal, ConsensusUnavailable> {
        if self.is_shut_down() {
            return Err(ConsensusUnavailable::Cancelled {
                instrument: instrument.to_string(),
            });
        }

        let snapshot = self.config().await;
        let key = CacheKey::new(instrument, context.timeframe.clone());
        let ttl = snapshot.cache_ttl();

        let providers = self.registry.resolve(&snapshot).map_err(|e| {
            error!("Provider registry out of sync with configuration: {}", e);
            ConsensusUnavailable::NoActiveProviders {
                instrument: instrument.to_string(),
            }
        })?;

        let request = ProviderRequest {
            instrument: instrument.to_string(),
            timeframe: context.timeframe,
            lookback_window: context.lookback_window.unwrap_or(snapshot.default_lookback_bars),
            context: context.extra,
        };
        let shutdown_rx = self.shutdown_tx.subscribe();

        self.cache
            .get_or_compute(key, ttl, move || run_round(snapshot, providers, request, shutdown_rx))
            .await
    }

    /// Discard any cached consensus and compute a fresh one
    pub async fn refresh_consensus(
        &self,
        instrument: &str,
        context: ConsensusContext,
    ) -> Result<ConsensusSignal, ConsensusUnavailable> {
        self.cache
            .invalidate(&CacheKey::new(instrument, context.timeframe.clone()));
        self.generate_consensus(instrument, context).await
    }

    /// Cancel in-flight rounds and refuse new ones
    pub fn shutdown(&self) {
        info!("Consensus orchestrator shutting down");
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

/// Resolves once shutdown is requested; never resolves if the sender is gone
async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// One fan-out round: query, classify, vote
async fn run_round(
    config: Arc<ConsensusConfig>,
    providers: Vec<(ProviderWeight, Arc<dyn SignalProvider>)>,
    request: ProviderRequest,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<ConsensusSignal, ConsensusUnavailable> {
    let instrument = request.instrument.clone();
    if providers.is_empty() {
        warn!("No active providers for {}", instrument);
        return Err(ConsensusUnavailable::NoActiveProviders { instrument });
    }

    let started = Instant::now();
    let request = Arc::new(request);
    let mut tasks = JoinSet::new();

    for (index, (weight, provider)) in providers.iter().enumerate() {
        let limit = config.timeout_for(weight);
        let provider = Arc::clone(provider);
        let request = Arc::clone(&request);
        let provider_id = weight.provider_id.clone();

        tasks.spawn(async move {
            let outcome = match timeout(limit, provider.request(&request)).await {
                Ok(Ok(opinion)) => opinion.validate().map(|_| opinion.into_signal(&provider_id)),
                Ok(Err(failure)) => Err(failure),
                Err(_) => Err(ProviderFailure::Timeout {
                    after_ms: limit.as_millis() as u64,
                }),
            };
            (index, outcome)
        });
    }

    let mut outcomes: Vec<Option<Result<ProviderSignal, ProviderFailure>>> =
        vec![None; providers.len()];
    let mut deadline_hit = false;
    let deadline = sleep(config.request_deadline());
    let shutdown = wait_for_shutdown(shutdown_rx);
    tokio::pin!(deadline);
    tokio::pin!(shutdown);

    loop {
        // Finished providers are collected before the deadline is checked
        tokio::select! {
            biased;
            joined = tasks.join_next() => match joined {
                Some(Ok((index, outcome))) => outcomes[index] = Some(outcome),
                Some(Err(e)) => error!("Provider task for {} did not complete: {}", instrument, e),
                None => break,
            },
            _ = &mut shutdown => {
                tasks.abort_all();
                warn!("Consensus round for {} cancelled", instrument);
                return Err(ConsensusUnavailable::Cancelled { instrument });
            }
            _ = &mut deadline => {
                deadline_hit = true;
                warn!(
                    "Consensus deadline of {}ms reached for {}, {} provider(s) still pending",
                    config.request_deadline_ms,
                    instrument,
                    tasks.len()
                );
                break;
            }
        }
    }
    // Abandon anything still running
    tasks.abort_all();

    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for ((weight, _), outcome) in providers.into_iter().zip(outcomes) {
        let outcome = outcome.unwrap_or_else(|| {
            Err(if deadline_hit {
                ProviderFailure::Timeout {
                    after_ms: config.request_deadline_ms,
                }
            } else {
                ProviderFailure::MalformedResponse("provider task aborted".to_string())
            })
        });

        match outcome {
            Ok(signal) => {
                debug!(
                    "Provider {} voted {} ({:.2}) for {}",
                    weight.provider_id, signal.direction, signal.confidence, instrument
                );
                successes.push((weight, signal));
            }
            Err(failure) => {
                warn!(
                    "Provider {} failed for {} ({}): {}",
                    weight.provider_id,
                    instrument,
                    failure.category(),
                    failure
                );
                failures.push(FailedProvider {
                    provider_id: weight.provider_id,
                    failure,
                });
            }
        }
    }

    if config.require_all_providers && !failures.is_empty() {
        warn!(
            "{} provider(s) failed for {} with require_all_providers set",
            failures.len(),
            instrument
        );
        return Err(ConsensusUnavailable::RequiredProviderFailed { instrument, failures });
    }

    let Some(vote) = weighted_vote(&successes) else {
        warn!("No provider produced a signal for {}", instrument);
        return Err(ConsensusUnavailable::NoSuccessfulProviders { instrument, failures });
    };

    let consensus = build_consensus(&request, vote, &successes, &failures);
    info!(
        "Consensus for {} {}: {} (confidence {:.2}, agreement {:.2}, {}/{} providers, {}ms)",
        consensus.instrument,
        consensus.timeframe,
        consensus.direction,
        consensus.confidence,
        consensus.provider_agreement,
        successes.len(),
        successes.len() + failures.len(),
        started.elapsed().as_millis()
    );
    Ok(consensus)
}

fn build_consensus(
    request: &ProviderRequest,
    vote: VoteResult,
    successes: &[(ProviderWeight, ProviderSignal)],
    failures: &[FailedProvider],
) -> ConsensusSignal {
    let mut reasoning = format!(
        "{} consensus from {}/{} providers (score {:.3}, agreement {:.3})",
        vote.direction,
        successes.len(),
        successes.len() + failures.len(),
        vote.confidence,
        vote.provider_agreement
    );
    for (vote_entry, (_, signal)) in vote.votes.iter().zip(successes) {
        reasoning.push_str(&format!(
            "\n- {} [{} {:.2}, weight {:.3}]: {}",
            vote_entry.provider_id,
            vote_entry.direction,
            vote_entry.confidence,
            vote_entry.weight,
            signal.reasoning.trim()
        ));
    }
    for failed in failures {
        reasoning.push_str(&format!(
            "\n- {} excluded ({})",
            failed.provider_id,
            failed.category()
        ));
    }

    ConsensusSignal {
        id: Uuid::new_v4(),
        instrument: request.instrument.clone(),
        timeframe: request.timeframe.clone(),
        direction: vote.direction,
        confidence: vote.confidence,
        provider_agreement: vote.provider_agreement,
        contributing_providers: vote.votes.iter().map(|v| v.provider_id.clone()).collect(),
        votes: vote.votes,
        excluded_providers: failures.iter().map(|f| f.provider_id.clone()).collect(),
        reasoning,
        generated_at: Utc::now(),
    }
}

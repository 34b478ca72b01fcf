use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::backoff::calculate_backoff;
use crate::database::ChainTipStore;
use crate::error::{Error, Result};
use crate::header::{self, build_header, canonical_hash, hash_hex};
use crate::models::{BlockHeaderFields, ChainTipSnapshot, SubmissionOutcome};
use crate::oracle::{Candidate, CandidateGenerator};
use crate::rpc::NodeRpc;

const DEFAULT_PREV_BLOCK_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";
const DEFAULT_BITS: &str = "1d00ffff";

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Delay between iterations while nothing is failing.
    pub interval: Duration,
    /// Upper bound of the delay after consecutive failures.
    pub max_backoff: Duration,
    pub store_timeout: Duration,
    pub version: i32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            store_timeout: Duration::from_secs(10),
            version: header::BLOCK_VERSION,
        }
    }
}

/// Result of an iteration that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Iteration {
    /// The store had no snapshot yet.
    Skipped,
    Submitted {
        height: u64,
        hash: String,
        outcome: SubmissionOutcome,
    },
}

/// Header fields for the block after `snapshot`. Missing snapshot fields fall
/// back to a zero previous hash and minimum-difficulty bits.
pub fn header_fields(
    snapshot: &ChainTipSnapshot,
    version: i32,
    candidate: &Candidate,
    timestamp: u32,
) -> BlockHeaderFields {
    BlockHeaderFields {
        version,
        prev_block_hash: snapshot
            .prev_block_hash()
            .unwrap_or(DEFAULT_PREV_BLOCK_HASH)
            .to_string(),
        merkle_root: candidate.merkle_root.clone(),
        timestamp,
        bits: snapshot.bits().unwrap_or(DEFAULT_BITS).to_string(),
        nonce: candidate.nonce,
    }
}

/// Poll the store, build a header, submit it, sleep, forever.
///
/// Every failure is logged and absorbed; consecutive failures stretch the
/// sleep with capped exponential backoff until an iteration succeeds again.
pub struct SubmissionLoop {
    store: Arc<dyn ChainTipStore>,
    rpc: Arc<dyn NodeRpc>,
    generator: Box<dyn CandidateGenerator>,
    config: LoopConfig,
    iteration: u64,
    consecutive_failures: u32,
    height: Option<u64>,
}

impl SubmissionLoop {
    pub fn new(
        store: Arc<dyn ChainTipStore>,
        rpc: Arc<dyn NodeRpc>,
        generator: Box<dyn CandidateGenerator>,
        config: LoopConfig,
    ) -> Self {
        Self {
            store,
            rpc,
            generator,
            config,
            iteration: 0,
            consecutive_failures: 0,
            height: None,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Read, build, hash and submit once. Errors are returned, not absorbed.
    pub async fn iterate(&mut self) -> Result<Iteration> {
        let snapshot = match timeout(self.config.store_timeout, self.store.latest()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Storage(format!(
                    "reading latest snapshot timed out after {:?}",
                    self.config.store_timeout
                )))
            }
        };

        let Some(snapshot) = snapshot else {
            warn!(iteration = self.iteration, "No chain tip snapshot in store, skipping iteration");
            return Ok(Iteration::Skipped);
        };

        let height = snapshot
            .height()
            .unwrap_or(0)
            .checked_add(1)
            .ok_or_else(|| Error::Protocol("chain height overflows u64".to_string()))?;
        self.height = Some(height);
        info!(
            iteration = self.iteration,
            min_fee_rate = %field(snapshot.min_fee_rate()),
            avg_fee_rate = %field(snapshot.avg_fee_rate()),
            tip_height = height - 1,
            "Loaded latest chain tip"
        );

        let candidate = self.generator.next_candidate();
        let timestamp = Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        let fields = header_fields(&snapshot, self.config.version, &candidate, timestamp);

        let raw_header = build_header(&fields)?;
        let digest = canonical_hash(&raw_header);
        let hash = hash_hex(&digest);

        let bits = header::parse_bits(&fields.bits)?;
        info!(
            iteration = self.iteration,
            height,
            nonce = candidate.nonce,
            hash = %hash,
            difficulty = ?header::difficulty(bits).ok(),
            "Built candidate header"
        );
        // Submitted either way; the candidate source performs no search.
        debug!(meets_target = header::meets_target(&digest, bits), "Checked candidate against target");

        let response = self
            .rpc
            .call("submitblock", vec![json!(hex::encode(raw_header))])
            .await?;
        let outcome = SubmissionOutcome::from_response(&response);

        match &outcome {
            SubmissionOutcome::Accepted => {
                info!(iteration = self.iteration, height, hash = %hash, "Block submission accepted")
            }
            SubmissionOutcome::Rejected(detail) => {
                warn!(iteration = self.iteration, height, hash = %hash, detail = %detail, "Block submission rejected")
            }
        }

        Ok(Iteration::Submitted { height, hash, outcome })
    }

    /// One iteration with recovery. Returns how long to wait before the next.
    pub async fn tick(&mut self) -> Duration {
        self.iteration += 1;
        self.height = None;

        let failure = self.iterate().await.err();
        self.consecutive_failures = match failure {
            Some(_) => self.consecutive_failures.saturating_add(1),
            None => 0,
        };

        let delay = calculate_backoff(
            self.consecutive_failures,
            self.config.interval,
            self.config.max_backoff,
        );

        if let Some(e) = failure {
            error!(
                iteration = self.iteration,
                height = ?self.height,
                error = %e,
                consecutive_failures = self.consecutive_failures,
                retry_in_ms = delay.as_millis() as u64,
                "Submission iteration failed"
            );
        }
        delay
    }

    /// Run until `shutdown` resolves.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            max_backoff_secs = self.config.max_backoff.as_secs_f64(),
            "Submission loop started"
        );

        loop {
            let delay = tokio::select! {
                _ = &mut shutdown => break,
                delay = self.tick() => delay,
            };

            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep(delay) => {}
            }
        }

        info!(iterations = self.iteration, "Submission loop stopped");
    }
}

fn field(value: Option<&Value>) -> String {
    value.map_or_else(|| "N/A".to_string(), Value::to_string)
}

//! Publisher - hands each window's aggregates to the storage backend

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::Aggregate;

/// Storage collaborator for aggregated reference prices
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn set_aggregate_price(&self, asset: &str, vwap: f64, ts: DateTime<Utc>) -> Result<()>;
}

/// Fire-and-forget publisher: one failed write never blocks the others
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn AggregateStore>,
}

impl Publisher {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }

    /// Persist every aggregate keyed by the tick timestamp.
    ///
    /// Returns how many writes succeeded.
    pub async fn publish(&self, aggregates: &[Aggregate], ts: DateTime<Utc>) -> usize {
        let mut written = 0;
        for aggregate in aggregates {
            match self
                .store
                .set_aggregate_price(&aggregate.asset, aggregate.vwap, ts)
                .await
            {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::error!(
                        asset = %aggregate.asset,
                        vwap = aggregate.vwap,
                        error = %e,
                        "Failed to store aggregate price"
                    );
                }
            }
        }
        written
    }
}

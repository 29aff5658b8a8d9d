//! Time series query client
//!
//! [`TimeSeriesClient`] is the context object that ties a [`RangeExecutor`]
//! to planner settings. It owns no global state: create one per connection
//! target (or per timezone) and pass it where queries are made.
//!
//! ```rust,no_run
//! use kuba_tsquery::aggregation::{Aggregation, AggregationType};
//! use kuba_tsquery::calendar::CalendarUnit;
//! use kuba_tsquery::client::TimeSeriesClient;
//! use kuba_tsquery::config::ApplicationConfig;
//! use kuba_tsquery::range::RangeRequest;
//!
//! # async fn example() -> kuba_tsquery::Result<()> {
//! let client = TimeSeriesClient::connect(&ApplicationConfig::from_env()).await?;
//!
//! let request = RangeRequest::new("energy:meter1")
//!     .between(1_704_067_200_000, 1_735_689_599_999)
//!     .aggregation(Aggregation::calendar(AggregationType::Sum, CalendarUnit::Month));
//!
//! let samples = client.range(&request).await?;
//! if samples.has_errors() {
//!     eprintln!("some buckets failed: {:?}", samples.errors());
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tracing::debug;

use crate::config::ApplicationConfig;
use crate::error::{Error, Result};
use crate::executor::RangeExecutor;
use crate::merge::MergePolicy;
use crate::planner::{QueryPlan, QueryPlanner};
use crate::range::RangeRequest;
use crate::reconcile::reconcile;
use crate::redis::{RedisPool, RedisRangeExecutor};
use crate::types::Samples;

/// Planner plus executor
#[derive(Debug, Clone)]
pub struct TimeSeriesClient<E> {
    executor: E,
    planner: QueryPlanner,
}

impl TimeSeriesClient<RedisRangeExecutor> {
    /// Connect to Redis using `config`
    pub async fn connect(config: &ApplicationConfig) -> Result<Self> {
        config.validate()?;
        let pool = RedisPool::new(config.redis_config()).await?;
        let planner = QueryPlanner::with_config(config.planner_config()?)?;
        Ok(Self::with_planner(
            RedisRangeExecutor::new(Arc::new(pool)),
            planner,
        ))
    }
}

impl<E: RangeExecutor> TimeSeriesClient<E> {
    /// Client with a UTC planner
    pub fn new(executor: E) -> Self {
        Self::with_planner(executor, QueryPlanner::new())
    }

    /// Client with a custom planner
    pub fn with_planner(executor: E, planner: QueryPlanner) -> Self {
        Self { executor, planner }
    }

    /// The executor
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// The planner
    pub fn planner(&self) -> &QueryPlanner {
        &self.planner
    }

    /// Plan without executing
    pub fn plan(&self, request: &RangeRequest) -> Result<QueryPlan> {
        self.planner.plan(request)
    }

    /// Run one logical range query in a single round trip
    pub async fn range(&self, request: &RangeRequest) -> Result<Samples> {
        let plan = self.planner.plan(request)?;
        let replies = if plan.is_empty() {
            Vec::new()
        } else {
            self.executor.execute_batch(&plan.commands()).await?
        };
        reconcile(&plan, replies)
    }

    /// Run several logical queries in a single round trip
    ///
    /// Every request is planned before anything is sent, so one invalid
    /// request fails the call without touching the network.
    pub async fn range_many(&self, requests: &[RangeRequest]) -> Result<Vec<Samples>> {
        let plans = requests
            .iter()
            .map(|request| self.planner.plan(request))
            .collect::<Result<Vec<_>>>()?;

        let commands: Vec<_> = plans.iter().flat_map(|plan| plan.commands()).collect();
        debug!(
            "Sending {} sub-queries for {} requests",
            commands.len(),
            requests.len()
        );

        let mut replies = if commands.is_empty() {
            Vec::new()
        } else {
            self.executor.execute_batch(&commands).await?
        };
        if replies.len() != commands.len() {
            return Err(Error::Protocol(format!(
                "expected {} replies for the batch, got {}",
                commands.len(),
                replies.len()
            )));
        }

        let mut results = Vec::with_capacity(plans.len());
        for plan in plans.iter().rev() {
            let own = replies.split_off(replies.len() - plan.len());
            results.push(reconcile(plan, own)?);
        }
        results.reverse();
        Ok(results)
    }

    /// Fetch several series in one round trip and merge them
    ///
    /// The result is in merged form, ready for a reduction.
    pub async fn range_merged(
        &self,
        requests: &[RangeRequest],
        policy: MergePolicy,
    ) -> Result<Samples> {
        let results = self.range_many(requests).await?;
        Ok(Samples::merge(&results, policy))
    }
}

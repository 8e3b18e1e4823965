//! The pluggable unit of work executed by VUs.

use std::{future::Future, marker::PhantomData, sync::Arc, time::Duration};

use rama::{
    error::{BoxError, ErrorContext as _},
    utils::str::arcstr::ArcStr,
};
use serde::de::DeserializeOwned;

use crate::vu::VuId;

/// Position of an iteration within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationContext {
    pub scenario: ArcStr,
    pub vu: VuId,
    /// Per-VU iteration counter, starting at 0.
    pub iteration: u64,
}

/// What a workload reports about a finished iteration.
///
/// Checks are recorded as their own rate metrics
/// and do not affect the iteration success.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    success: bool,
    timings: Vec<(ArcStr, Duration)>,
    checks: Vec<(ArcStr, bool)>,
}

impl IterationReport {
    pub fn success() -> Self {
        Self::new(true)
    }

    pub fn failure() -> Self {
        Self::new(false)
    }

    fn new(success: bool) -> Self {
        Self {
            success,
            timings: Vec::new(),
            checks: Vec::new(),
        }
    }

    /// Add a named sub-timing, aggregated as a trend metric with the same name.
    pub fn with_timing(mut self, name: impl Into<ArcStr>, duration: Duration) -> Self {
        self.timings.push((name.into(), duration));
        self
    }

    /// Add a named check, aggregated as a rate metric with the same name.
    pub fn with_check(mut self, name: impl Into<ArcStr>, ok: bool) -> Self {
        self.checks.push((name.into(), ok));
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub(crate) fn into_parts(self) -> (bool, Vec<(ArcStr, Duration)>, Vec<(ArcStr, bool)>) {
        (self.success, self.timings, self.checks)
    }
}

/// A unit of work, executed once per iteration.
///
/// An `Err` (or a panic) results in a failed iteration sample,
/// the scenario itself keeps running.
pub trait Workload: Send + Sync + 'static {
    /// Input selected once per VU, see [`WorkItemSelector`].
    type Item: Clone + Send + Sync + 'static;

    fn iteration(
        &self,
        ctx: IterationContext,
        item: Self::Item,
    ) -> impl Future<Output = Result<IterationReport, BoxError>> + Send;
}

/// Create a [`Workload`] from an async function.
pub fn workload_fn<F, Fut, T>(f: F) -> WorkloadFn<F, T>
where
    F: Fn(IterationContext, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<IterationReport, BoxError>> + Send,
    T: Clone + Send + Sync + 'static,
{
    WorkloadFn {
        f,
        _item: PhantomData,
    }
}

/// See [`workload_fn`].
pub struct WorkloadFn<F, T> {
    f: F,
    _item: PhantomData<fn() -> T>,
}

impl<F: std::fmt::Debug, T> std::fmt::Debug for WorkloadFn<F, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadFn").field("f", &self.f).finish()
    }
}

impl<F, Fut, T> Workload for WorkloadFn<F, T>
where
    F: Fn(IterationContext, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<IterationReport, BoxError>> + Send,
    T: Clone + Send + Sync + 'static,
{
    type Item = T;

    fn iteration(
        &self,
        ctx: IterationContext,
        item: Self::Item,
    ) -> impl Future<Output = Result<IterationReport, BoxError>> + Send {
        (self.f)(ctx, item)
    }
}

/// Selects the work item of a VU.
///
/// Must be a pure function of the [`VuId`],
/// which makes VU to item assignment reproducible.
pub trait WorkItemSelector<T>: Send + Sync + 'static {
    fn select(&self, vu: VuId) -> T;
}

impl<T, F> WorkItemSelector<T> for F
where
    F: Fn(VuId) -> T + Send + Sync + 'static,
{
    fn select(&self, vu: VuId) -> T {
        self(vu)
    }
}

/// Non-empty list of work items, one row per VU.
///
/// VU `i` gets the item at `i % len`.
#[derive(Debug)]
pub struct Dataset<T> {
    items: Arc<[T]>,
}

impl<T> Clone for Dataset<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T> Dataset<T> {
    pub fn try_new(items: Vec<T>) -> Result<Self, BoxError> {
        if items.is_empty() {
            return Err(BoxError::from("dataset cannot be empty"));
        }
        Ok(Self {
            items: items.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, vu: VuId) -> &T {
        let index = vu.index() % self.items.len() as u64;
        &self.items[index as usize]
    }
}

impl<T: DeserializeOwned> Dataset<T> {
    /// Load a dataset from a JSON array.
    pub fn from_json_slice(data: &[u8]) -> Result<Self, BoxError> {
        let items: Vec<T> = serde_json::from_slice(data).context("json decode dataset")?;
        Self::try_new(items)
    }
}

impl<T> WorkItemSelector<T> for Dataset<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn select(&self, vu: VuId) -> T {
        self.get(vu).clone()
    }
}

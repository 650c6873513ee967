use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use obre_model::{
    BatchRecord, DetectedIssue, IssuePriority, Record, RecordType, Trigger,
    ViewModelBridge, TYPE_TAG,
};
use serde_json::Value;
use tracing::warn;

use crate::pool::{DispatchContext, ExecutorPool};
use crate::traits::{RuleChainHost, TypeBinder};

/// Tag attached to a record returned unchanged because its rule chain
/// raised. Consumers can surface it; persistence proceeds regardless.
pub const BRE_ERROR_TAG: &str = "$bre.error";

/// Lifecycle hooks a persistence layer drives before and after each
/// storage operation. Implementations form a chain; each link runs its
/// own work and then forwards to the next.
#[async_trait]
pub trait BusinessRules<R: Record>: Send + Sync {
    async fn before_insert(&self, data: R) -> R;
    async fn after_insert(&self, data: R) -> R;
    async fn before_update(&self, data: R) -> R;
    async fn after_update(&self, data: R) -> R;
    async fn before_obsolete(&self, data: R) -> R;
    async fn after_obsolete(&self, data: R) -> R;
    async fn after_retrieve(&self, data: R) -> R;
    async fn after_query(&self, results: Vec<R>) -> Vec<R>;
    async fn validate(&self, data: &R) -> Vec<DetectedIssue>;
}

/// Chain link that feeds records through the script executors. Fails
/// open: a rule error returns the input record tagged with
/// [`BRE_ERROR_TAG`] instead of blocking the storage operation.
pub struct ScriptRule<R: Record> {
    bound: RecordType,
    pool: Arc<ExecutorPool>,
    bridge: Arc<dyn ViewModelBridge<R>>,
    next: Option<Arc<dyn BusinessRules<R>>>,
}

impl<R: Record> ScriptRule<R> {
    pub fn new(
        bound: RecordType,
        pool: Arc<ExecutorPool>,
        bridge: Arc<dyn ViewModelBridge<R>>,
    ) -> Self {
        Self {
            bound,
            pool,
            bridge,
            next: None,
        }
    }

    pub fn with_next(mut self, next: Arc<dyn BusinessRules<R>>) -> Self {
        self.next = Some(next);
        self
    }

    async fn dispatch(&self, trigger: Trigger, data: R) -> R {
        let ctx = DispatchContext::current();
        let original = data.clone();
        let outcome = self
            .pool
            .execute(&ctx, |ex| {
                let ctx = ctx.clone();
                let bound = &self.bound;
                let bridge = self.bridge.as_ref();
                async move { ex.invoke(&ctx, trigger, bound, data, bridge).await }
            })
            .await;
        match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    trigger = %trigger,
                    ty = %self.bound,
                    error = %e,
                    "business rule failed, returning input record"
                );
                let mut out = original;
                out.set_tag(BRE_ERROR_TAG, &e.to_string());
                out
            }
        }
    }

    async fn dispatch_query(&self, results: Vec<R>) -> Vec<R> {
        if results.is_empty() {
            return results;
        }
        let ctx = DispatchContext::current();
        let fallback = results.clone();
        let outcome = self
            .pool
            .execute(&ctx, |ex| {
                let ctx = ctx.clone();
                let bound = &self.bound;
                let bridge = self.bridge.as_ref();
                async move {
                    let mut out = Vec::with_capacity(results.len());
                    for item in results {
                        let original = item.clone();
                        match ex
                            .invoke(&ctx, Trigger::AfterQuery, bound, item, bridge)
                            .await
                        {
                            Ok(mapped) => out.push(mapped),
                            Err(e) => {
                                warn!(
                                    ty = %bound,
                                    error = %e,
                                    "after-query rule failed, keeping original result"
                                );
                                let mut kept = original;
                                kept.set_tag(BRE_ERROR_TAG, &e.to_string());
                                out.push(kept);
                            }
                        }
                    }
                    Ok(out)
                }
            })
            .await;
        match outcome {
            Ok(mapped) => mapped,
            Err(e) => {
                warn!(ty = %self.bound, error = %e, "after-query dispatch failed");
                fallback
            }
        }
    }

    async fn forward(&self, trigger: Trigger, data: R) -> R {
        let out = self.dispatch(trigger, data).await;
        match (&self.next, trigger) {
            (Some(next), Trigger::BeforeInsert) => next.before_insert(out).await,
            (Some(next), Trigger::AfterInsert) => next.after_insert(out).await,
            (Some(next), Trigger::BeforeUpdate) => next.before_update(out).await,
            (Some(next), Trigger::AfterUpdate) => next.after_update(out).await,
            (Some(next), Trigger::BeforeObsolete) => next.before_obsolete(out).await,
            (Some(next), Trigger::AfterObsolete) => next.after_obsolete(out).await,
            (Some(next), Trigger::AfterRetrieve) => next.after_retrieve(out).await,
            _ => out,
        }
    }
}

#[async_trait]
impl<R: Record> BusinessRules<R> for ScriptRule<R> {
    async fn before_insert(&self, data: R) -> R {
        self.forward(Trigger::BeforeInsert, data).await
    }

    async fn after_insert(&self, data: R) -> R {
        self.forward(Trigger::AfterInsert, data).await
    }

    async fn before_update(&self, data: R) -> R {
        self.forward(Trigger::BeforeUpdate, data).await
    }

    async fn after_update(&self, data: R) -> R {
        self.forward(Trigger::AfterUpdate, data).await
    }

    async fn before_obsolete(&self, data: R) -> R {
        self.forward(Trigger::BeforeObsolete, data).await
    }

    async fn after_obsolete(&self, data: R) -> R {
        self.forward(Trigger::AfterObsolete, data).await
    }

    async fn after_retrieve(&self, data: R) -> R {
        self.forward(Trigger::AfterRetrieve, data).await
    }

    async fn after_query(&self, results: Vec<R>) -> Vec<R> {
        let mapped = self.dispatch_query(results).await;
        match &self.next {
            Some(next) => next.after_query(mapped).await,
            None => mapped,
        }
    }

    async fn validate(&self, data: &R) -> Vec<DetectedIssue> {
        let ctx = DispatchContext::current();
        let outcome = self
            .pool
            .execute(&ctx, |ex| {
                let ctx = ctx.clone();
                async move {
                    Ok(ex
                        .validate(&ctx, &self.bound, data, self.bridge.as_ref())
                        .await)
                }
            })
            .await;
        let mut issues = match outcome {
            Ok(list) => list,
            Err(e) => vec![DetectedIssue::new(
                IssuePriority::Error,
                format!("error validating {} - {}", data.describe(), e),
            )],
        };
        if let Some(next) = &self.next {
            issues.extend(next.validate(data).await);
        }
        issues
    }
}

/// Chain link for heterogeneous batches. Looks ahead at the batch's
/// item types before touching the executors: when no item type has any
/// registered rules, the batch passes through without marshaling.
pub struct BundleRule<B: BatchRecord> {
    pool: Arc<ExecutorPool>,
    chain_host: Arc<dyn RuleChainHost>,
    binder: Arc<dyn TypeBinder>,
    next: Option<Arc<dyn BusinessRules<B>>>,
    _marker: PhantomData<fn() -> B>,
}

impl<B: BatchRecord> BundleRule<B> {
    pub fn new(
        pool: Arc<ExecutorPool>,
        chain_host: Arc<dyn RuleChainHost>,
        binder: Arc<dyn TypeBinder>,
    ) -> Self {
        Self {
            pool,
            chain_host,
            binder,
            next: None,
            _marker: PhantomData,
        }
    }

    pub fn with_next(mut self, next: Arc<dyn BusinessRules<B>>) -> Self {
        self.next = Some(next);
        self
    }

    fn has_registered_rules(&self, items: &[Value]) -> bool {
        let mut seen = HashSet::new();
        items
            .iter()
            .filter_map(|v| v.as_object())
            .filter_map(|map| map.get(TYPE_TAG))
            .filter_map(|v| v.as_str())
            .filter(|tag| seen.insert(tag.to_string()))
            .filter_map(|tag| self.binder.bind(tag))
            .any(|ty| self.chain_host.has_adapter(&ty))
    }

    async fn dispatch(&self, trigger: Trigger, mut batch: B) -> B {
        let items = batch.item_values();
        if !self.has_registered_rules(&items) {
            return batch;
        }
        let ctx = DispatchContext::current();
        let outcome = self
            .pool
            .execute(&ctx, |ex| {
                let ctx = ctx.clone();
                async move {
                    let mut out = Vec::with_capacity(items.len());
                    let mut failed: Option<crate::error::RuleError> = None;
                    for item in items {
                        let original = item.clone();
                        match ex.invoke_raw(&ctx, trigger, item).await {
                            Ok(mapped) => out.push(mapped),
                            Err(e) => {
                                warn!(
                                    trigger = %trigger,
                                    error = %e,
                                    "bundle item rule failed, keeping original item"
                                );
                                out.push(original);
                                failed = Some(e);
                            }
                        }
                    }
                    Ok((out, failed))
                }
            })
            .await;
        match outcome {
            Ok((items, failed)) => {
                batch.replace_items(items);
                if let Some(e) = failed {
                    batch.set_tag(BRE_ERROR_TAG, &e.to_string());
                }
                batch
            }
            Err(e) => {
                warn!(trigger = %trigger, error = %e, "bundle dispatch failed");
                batch.set_tag(BRE_ERROR_TAG, &e.to_string());
                batch
            }
        }
    }

    async fn forward(&self, trigger: Trigger, batch: B) -> B {
        let out = self.dispatch(trigger, batch).await;
        match (&self.next, trigger) {
            (Some(next), Trigger::BeforeInsert) => next.before_insert(out).await,
            (Some(next), Trigger::AfterInsert) => next.after_insert(out).await,
            (Some(next), Trigger::BeforeUpdate) => next.before_update(out).await,
            (Some(next), Trigger::AfterUpdate) => next.after_update(out).await,
            (Some(next), Trigger::BeforeObsolete) => next.before_obsolete(out).await,
            (Some(next), Trigger::AfterObsolete) => next.after_obsolete(out).await,
            (Some(next), Trigger::AfterRetrieve) => next.after_retrieve(out).await,
            _ => out,
        }
    }
}

#[async_trait]
impl<B: BatchRecord> BusinessRules<B> for BundleRule<B> {
    async fn before_insert(&self, data: B) -> B {
        self.forward(Trigger::BeforeInsert, data).await
    }

    async fn after_insert(&self, data: B) -> B {
        self.forward(Trigger::AfterInsert, data).await
    }

    async fn before_update(&self, data: B) -> B {
        self.forward(Trigger::BeforeUpdate, data).await
    }

    async fn after_update(&self, data: B) -> B {
        self.forward(Trigger::AfterUpdate, data).await
    }

    async fn before_obsolete(&self, data: B) -> B {
        self.forward(Trigger::BeforeObsolete, data).await
    }

    async fn after_obsolete(&self, data: B) -> B {
        self.forward(Trigger::AfterObsolete, data).await
    }

    async fn after_retrieve(&self, data: B) -> B {
        self.forward(Trigger::AfterRetrieve, data).await
    }

    async fn after_query(&self, results: Vec<B>) -> Vec<B> {
        let mut out = Vec::with_capacity(results.len());
        for batch in results {
            out.push(self.dispatch(Trigger::AfterQuery, batch).await);
        }
        match &self.next {
            Some(next) => next.after_query(out).await,
            None => out,
        }
    }

    async fn validate(&self, data: &B) -> Vec<DetectedIssue> {
        let items = data.item_values();
        let mut issues = Vec::new();
        if self.has_registered_rules(&items) {
            let ctx = DispatchContext::current();
            let outcome = self
                .pool
                .execute(&ctx, |ex| {
                    let ctx = ctx.clone();
                    let items = &items;
                    async move {
                        let mut all = Vec::new();
                        for item in items {
                            all.extend(ex.validate_raw(&ctx, item).await);
                        }
                        Ok(all)
                    }
                })
                .await;
            match outcome {
                Ok(list) => issues.extend(list),
                Err(e) => issues.push(DetectedIssue::new(
                    IssuePriority::Error,
                    format!("error validating {} - {}", data.describe(), e),
                )),
            }
        }
        if let Some(next) = &self.next {
            issues.extend(next.validate(data).await);
        }
        issues
    }
}

/// Default in-process [`RuleChainHost`]: records which types have rule
/// adapters so the bundle look-ahead can probe them. Hosts with a real
/// dispatch chain supply their own implementation.
#[derive(Default)]
pub struct ChainDirectory {
    types: scc::HashSet<RecordType>,
}

impl ChainDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn types(&self) -> Vec<RecordType> {
        let mut out = Vec::new();
        self.types.scan(|ty| out.push(ty.clone()));
        out
    }
}

impl RuleChainHost for ChainDirectory {
    fn ensure_adapter(&self, ty: &RecordType) {
        let _ = self.types.insert(ty.clone());
    }

    fn has_adapter(&self, ty: &RecordType) -> bool {
        self.types.contains(ty)
    }
}

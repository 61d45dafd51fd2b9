//! Recursive check resolution over relation rewrites.
//!
//! A check walks the rewrite expression of `(object, relation)` against
//! tuples read at one fixed revision. Union and existential fan-out
//! branches run as parallel tasks; the first allowing branch cancels its
//! siblings. Every request carries a visited set so relation data that
//! loops back into itself (group-in-group membership) terminates: the
//! looping path resolves to false and is never memoized.

#![allow(clippy::too_many_arguments)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_recursion::async_recursion;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, instrument};

use muster_cache::{CheckCache, CheckCacheKey};
use muster_store::MusterStore;
use muster_types::{
    CheckOutcome, CheckRequest, Decision, ObjectRef, Revision, StoreError, SubjectRef,
};

use crate::consistency::{RevisionFloor, TokenManager};
use crate::schema::{RewriteExpr, SchemaRegistry, SchemaSnapshot};
use crate::{ResolveError, Result};

mod expand;

/// Hard bounds on a single resolution.
#[derive(Debug, Clone, Copy)]
pub struct ResolveLimits {
    /// Maximum nesting of sub-checks.
    pub max_depth: usize,
    /// Maximum targets expanded from one tupleset or userset step.
    pub max_fanout: usize,
    /// Maximum concurrent branch tasks per operator.
    pub max_concurrency: usize,
}

impl Default for ResolveLimits {
    fn default() -> Self {
        Self { max_depth: 32, max_fanout: 256, max_concurrency: 10 }
    }
}

/// Per-request traversal state: the path of `(object, relation)` nodes
/// above the current one, and how deep we are. Cloned into each branch
/// so parallel siblings track their own paths.
#[derive(Debug, Clone, Default)]
struct ResolveContext {
    visited: HashSet<String>,
    depth: usize,
}

impl ResolveContext {
    fn new() -> Self {
        Self::default()
    }

    fn path_key(object: &ObjectRef, relation: &str) -> String {
        format!("{object}#{relation}")
    }

    fn is_visited(&self, object: &ObjectRef, relation: &str) -> bool {
        self.visited.contains(&Self::path_key(object, relation))
    }

    fn visit(&mut self, object: &ObjectRef, relation: &str) {
        self.visited.insert(Self::path_key(object, relation));
    }
}

/// Outcome of one node: the boolean plus whether the derivation saw a
/// visited-path cut anywhere beneath it. Only complete results are safe
/// to memoize; an incomplete false is an artifact of the path taken.
#[derive(Debug, Clone, Copy)]
struct NodeResult {
    allowed: bool,
    complete: bool,
}

impl NodeResult {
    fn definite(allowed: bool) -> Self {
        Self { allowed, complete: true }
    }
}

/// The check resolver.
///
/// Cheap to clone: branch tasks hold their own handle.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn MusterStore>,
    registry: Arc<SchemaRegistry>,
    cache: Option<Arc<CheckCache>>,
    tokens: TokenManager,
    limits: ResolveLimits,
}

impl Resolver {
    pub fn new(store: Arc<dyn MusterStore>, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            store,
            registry,
            cache: None,
            tokens: TokenManager::new(),
            limits: ResolveLimits::default(),
        }
    }

    /// Attach a memoization cache for resolved sub-checks.
    pub fn with_cache(mut self, cache: Arc<CheckCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_limits(mut self, limits: ResolveLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Check whether `subject` holds `relation` on `object`.
    ///
    /// The returned outcome carries the revision the decision was
    /// computed at, so callers can mint a consistency token from it.
    #[instrument(skip(self, request), fields(
        object = %request.object,
        relation = %request.relation,
        subject = %request.subject,
    ))]
    pub async fn check(&self, request: CheckRequest) -> Result<CheckOutcome> {
        debug!("Evaluating access check");
        let start = Instant::now();

        let floor = self.tokens.floor_for_request(request.token.as_deref(), request.mode)?;
        let revision = self.resolve_revision(floor).await?;
        let snapshot = self.registry.snapshot();

        let result = self
            .check_node(
                &snapshot,
                &request.object,
                &request.relation,
                &request.subject,
                revision,
                ResolveContext::new(),
            )
            .await?;

        let decision = Decision::from(result.allowed);
        metrics::counter!(
            "muster_checks_total",
            "decision" => if result.allowed { "allow" } else { "deny" }
        )
        .increment(1);
        metrics::histogram!("muster_check_duration_seconds").record(start.elapsed().as_secs_f64());
        debug!(decision = ?decision, revision = %revision, duration = ?start.elapsed(), "Access check complete");

        Ok(CheckOutcome { decision, revision })
    }

    /// Pick the revision to resolve at: head, unless the floor demands
    /// a revision the store has not reached yet.
    async fn resolve_revision(&self, floor: RevisionFloor) -> Result<Revision> {
        let head = self.store.head_revision().await?;
        match floor {
            RevisionFloor::Latest => Ok(head),
            RevisionFloor::AtLeast(required) if required > head => Err(ResolveError::Store(
                StoreError::RevisionNotAvailable { requested: required, latest: head },
            )),
            RevisionFloor::AtLeast(_) => Ok(head),
        }
    }

    /// Resolve one `(object, relation, subject)` node: cycle cut, depth
    /// bound, memo lookup, then rewrite dispatch.
    #[async_recursion]
    async fn check_node(
        &self,
        snapshot: &Arc<SchemaSnapshot>,
        object: &ObjectRef,
        relation: &str,
        subject: &SubjectRef,
        revision: Revision,
        mut ctx: ResolveContext,
    ) -> Result<NodeResult> {
        if ctx.is_visited(object, relation) {
            // Relation data loops back into this node. Fail closed on
            // this path and taint the result against memoization.
            return Ok(NodeResult { allowed: false, complete: false });
        }
        if ctx.depth >= self.limits.max_depth {
            return Err(ResolveError::DepthExceeded { max: self.limits.max_depth });
        }
        ctx.depth += 1;

        let mut cache_key = None;
        if let Some(cache) = &self.cache {
            let key = CheckCacheKey::new(object, relation, subject, snapshot.version, revision);
            if let Some(decision) = cache.get(&key).await {
                return Ok(NodeResult::definite(decision.is_allowed()));
            }
            cache_key = Some(key);
        }

        let expr = snapshot.resolve(&object.object_type, relation)?;
        ctx.visit(object, relation);

        let result =
            self.eval_expr(snapshot, expr, object, relation, subject, revision, &ctx).await?;

        if result.complete {
            if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
                cache.insert(key, Decision::from(result.allowed)).await;
            }
        }

        Ok(result)
    }

    #[async_recursion]
    async fn eval_expr(
        &self,
        snapshot: &Arc<SchemaSnapshot>,
        expr: &RewriteExpr,
        object: &ObjectRef,
        relation: &str,
        subject: &SubjectRef,
        revision: Revision,
        ctx: &ResolveContext,
    ) -> Result<NodeResult> {
        match expr {
            RewriteExpr::This => {
                self.eval_this(snapshot, object, relation, subject, revision, ctx).await
            },
            RewriteExpr::ComputedUserset { relation: target } => {
                self.check_node(snapshot, object, target, subject, revision, ctx.clone()).await
            },
            RewriteExpr::TupleToUserset { tupleset, computed } => {
                self.eval_tuple_to_userset(
                    snapshot, object, tupleset, computed, subject, revision, ctx,
                )
                .await
            },
            RewriteExpr::Union(branches) => {
                self.eval_union(snapshot, branches, object, relation, subject, revision, ctx).await
            },
            RewriteExpr::Intersection(branches) => {
                self.eval_intersection(snapshot, branches, object, relation, subject, revision, ctx)
                    .await
            },
            RewriteExpr::Exclusion { base, subtract } => {
                self.eval_exclusion(snapshot, base, subtract, object, relation, subject, revision, ctx)
                    .await
            },
        }
    }

    /// Direct tuples: an exact or wildcard grant decides immediately;
    /// userset subjects become nested checks on the set they name.
    async fn eval_this(
        &self,
        snapshot: &Arc<SchemaSnapshot>,
        object: &ObjectRef,
        relation: &str,
        subject: &SubjectRef,
        revision: Revision,
        ctx: &ResolveContext,
    ) -> Result<NodeResult> {
        let tuples = self.store.read(object, relation, revision).await?;

        if tuples.iter().any(|t| t.subject.grants(subject)) {
            return Ok(NodeResult::definite(true));
        }

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for tuple in &tuples {
            let Some(target_relation) = &tuple.subject.relation else { continue };
            let target = (tuple.subject.as_object(), target_relation.clone());
            if seen.insert(target.clone()) {
                targets.push(target);
            }
        }

        self.eval_existential(snapshot, targets, subject, revision, ctx).await
    }

    /// Walk `object --tupleset--> intermediate` tuples, then test
    /// `computed` on each intermediate object.
    async fn eval_tuple_to_userset(
        &self,
        snapshot: &Arc<SchemaSnapshot>,
        object: &ObjectRef,
        tupleset: &str,
        computed: &str,
        subject: &SubjectRef,
        revision: Revision,
        ctx: &ResolveContext,
    ) -> Result<NodeResult> {
        let tuples = self.store.read(object, tupleset, revision).await?;

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for tuple in &tuples {
            let intermediate = tuple.subject.as_object();
            if seen.insert(intermediate.clone()) {
                targets.push((intermediate, computed.to_string()));
            }
        }

        self.eval_existential(snapshot, targets, subject, revision, ctx).await
    }

    /// True if any `(object, relation)` target resolves true for the
    /// subject. Targets run as parallel tasks under the concurrency
    /// limit; the first true cancels the rest.
    async fn eval_existential(
        &self,
        snapshot: &Arc<SchemaSnapshot>,
        targets: Vec<(ObjectRef, String)>,
        subject: &SubjectRef,
        revision: Revision,
        ctx: &ResolveContext,
    ) -> Result<NodeResult> {
        if targets.is_empty() {
            return Ok(NodeResult::definite(false));
        }
        if targets.len() > self.limits.max_fanout {
            return Err(ResolveError::FanoutExceeded { max: self.limits.max_fanout });
        }
        if let [(object, relation)] = targets.as_slice() {
            return self
                .check_node(snapshot, object, relation, subject, revision, ctx.clone())
                .await;
        }

        let mut join_set = JoinSet::new();
        let mut all_complete = true;
        let mut first_err = None;

        for (object, relation) in targets {
            if join_set.len() >= self.limits.max_concurrency {
                if let Some(joined) = join_set.join_next().await {
                    if let Some(win) = absorb_allow(joined, &mut all_complete, &mut first_err) {
                        join_set.shutdown().await;
                        return Ok(win);
                    }
                }
            }

            join_set.spawn(self.clone().check_target(
                Arc::clone(snapshot),
                object,
                relation,
                subject.clone(),
                revision,
                ctx.clone(),
            ));
        }

        while let Some(joined) = join_set.join_next().await {
            if let Some(win) = absorb_allow(joined, &mut all_complete, &mut first_err) {
                join_set.shutdown().await;
                return Ok(win);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(NodeResult { allowed: false, complete: all_complete }),
        }
    }

    async fn eval_union(
        &self,
        snapshot: &Arc<SchemaSnapshot>,
        branches: &[RewriteExpr],
        object: &ObjectRef,
        relation: &str,
        subject: &SubjectRef,
        revision: Revision,
        ctx: &ResolveContext,
    ) -> Result<NodeResult> {
        if branches.is_empty() {
            return Ok(NodeResult::definite(false));
        }
        if let [branch] = branches {
            return self.eval_expr(snapshot, branch, object, relation, subject, revision, ctx).await;
        }

        let mut join_set = JoinSet::new();
        let mut all_complete = true;
        let mut first_err = None;

        for branch in branches {
            if join_set.len() >= self.limits.max_concurrency {
                if let Some(joined) = join_set.join_next().await {
                    if let Some(win) = absorb_allow(joined, &mut all_complete, &mut first_err) {
                        join_set.shutdown().await;
                        return Ok(win);
                    }
                }
            }

            join_set.spawn(self.clone().eval_branch(
                Arc::clone(snapshot),
                branch.clone(),
                object.clone(),
                relation.to_string(),
                subject.clone(),
                revision,
                ctx.clone(),
            ));
        }

        while let Some(joined) = join_set.join_next().await {
            if let Some(win) = absorb_allow(joined, &mut all_complete, &mut first_err) {
                join_set.shutdown().await;
                return Ok(win);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(NodeResult { allowed: false, complete: all_complete }),
        }
    }

    /// Intersection branches also run in parallel; the first definite
    /// deny vetoes and cancels the rest.
    async fn eval_intersection(
        &self,
        snapshot: &Arc<SchemaSnapshot>,
        branches: &[RewriteExpr],
        object: &ObjectRef,
        relation: &str,
        subject: &SubjectRef,
        revision: Revision,
        ctx: &ResolveContext,
    ) -> Result<NodeResult> {
        if branches.is_empty() {
            return Ok(NodeResult::definite(false));
        }
        if let [branch] = branches {
            return self.eval_expr(snapshot, branch, object, relation, subject, revision, ctx).await;
        }

        let mut join_set = JoinSet::new();
        let mut all_complete = true;
        let mut first_err = None;

        for branch in branches {
            if join_set.len() >= self.limits.max_concurrency {
                if let Some(joined) = join_set.join_next().await {
                    if let Some(veto) = absorb_deny(joined, &mut all_complete, &mut first_err) {
                        join_set.shutdown().await;
                        return Ok(veto);
                    }
                }
            }

            join_set.spawn(self.clone().eval_branch(
                Arc::clone(snapshot),
                branch.clone(),
                object.clone(),
                relation.to_string(),
                subject.clone(),
                revision,
                ctx.clone(),
            ));
        }

        while let Some(joined) = join_set.join_next().await {
            if let Some(veto) = absorb_deny(joined, &mut all_complete, &mut first_err) {
                join_set.shutdown().await;
                return Ok(veto);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(NodeResult { allowed: true, complete: all_complete }),
        }
    }

    /// Exclusion evaluates base and subtract together. Errors in either
    /// branch fail the whole node; a subtract failure never widens
    /// access.
    async fn eval_exclusion(
        &self,
        snapshot: &Arc<SchemaSnapshot>,
        base: &RewriteExpr,
        subtract: &RewriteExpr,
        object: &ObjectRef,
        relation: &str,
        subject: &SubjectRef,
        revision: Revision,
        ctx: &ResolveContext,
    ) -> Result<NodeResult> {
        let (base_result, subtract_result) = tokio::join!(
            self.eval_expr(snapshot, base, object, relation, subject, revision, ctx),
            self.eval_expr(snapshot, subtract, object, relation, subject, revision, ctx),
        );

        let base = base_result?;
        let subtract = subtract_result?;

        if !base.allowed {
            return Ok(NodeResult { allowed: false, complete: base.complete });
        }
        Ok(NodeResult {
            allowed: !subtract.allowed,
            complete: base.complete && subtract.complete,
        })
    }

    /// Owned-argument wrapper so a sub-check can run as a spawned task.
    async fn check_target(
        self,
        snapshot: Arc<SchemaSnapshot>,
        object: ObjectRef,
        relation: String,
        subject: SubjectRef,
        revision: Revision,
        ctx: ResolveContext,
    ) -> Result<NodeResult> {
        self.check_node(&snapshot, &object, &relation, &subject, revision, ctx).await
    }

    /// Owned-argument wrapper so an operator branch can run as a
    /// spawned task.
    async fn eval_branch(
        self,
        snapshot: Arc<SchemaSnapshot>,
        expr: RewriteExpr,
        object: ObjectRef,
        relation: String,
        subject: SubjectRef,
        revision: Revision,
        ctx: ResolveContext,
    ) -> Result<NodeResult> {
        self.eval_expr(&snapshot, &expr, &object, &relation, &subject, revision, &ctx).await
    }
}

/// Fold one joined branch into union state. Returns the winner when the
/// branch allowed. Errors are held back so a later true can still win;
/// the merge is order-independent: any true beats any error beats false.
fn absorb_allow(
    joined: std::result::Result<Result<NodeResult>, JoinError>,
    all_complete: &mut bool,
    first_err: &mut Option<ResolveError>,
) -> Option<NodeResult> {
    match joined {
        Ok(Ok(result)) if result.allowed => Some(result),
        Ok(Ok(result)) => {
            *all_complete &= result.complete;
            None
        },
        Ok(Err(err)) => {
            if first_err.is_none() {
                *first_err = Some(err);
            }
            None
        },
        Err(err) => {
            if first_err.is_none() {
                *first_err = Some(ResolveError::Task(err.to_string()));
            }
            None
        },
    }
}

/// Intersection dual of [`absorb_allow`]: any deny beats any error
/// beats allow.
fn absorb_deny(
    joined: std::result::Result<Result<NodeResult>, JoinError>,
    all_complete: &mut bool,
    first_err: &mut Option<ResolveError>,
) -> Option<NodeResult> {
    match joined {
        Ok(Ok(result)) if !result.allowed => Some(result),
        Ok(Ok(result)) => {
            *all_complete &= result.complete;
            None
        },
        Ok(Err(err)) => {
            if first_err.is_none() {
                *first_err = Some(err);
            }
            None
        },
        Err(err) => {
            if first_err.is_none() {
                *first_err = Some(ResolveError::Task(err.to_string()));
            }
            None
        },
    }
}

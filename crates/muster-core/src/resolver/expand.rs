//! Relation set expansion

use muster_types::{ExpandOutcome, ExpandRequest};

use super::*;

impl Resolver {
    /// Expand the set of subjects holding `relation` on `object` at a
    /// consistent revision. Userset references appear in the output
    /// alongside their resolved members; looping membership paths are
    /// cut the same way checks cut them.
    #[instrument(skip(self, request), fields(
        object = %request.object,
        relation = %request.relation,
    ))]
    pub async fn expand(&self, request: ExpandRequest) -> Result<ExpandOutcome> {
        debug!("Expanding relation set");
        let start = Instant::now();

        let floor = self.tokens.floor_for_request(request.token.as_deref(), request.mode)?;
        let revision = self.resolve_revision(floor).await?;
        let snapshot = self.registry.snapshot();

        let set = self
            .expand_node(
                &snapshot,
                &request.object,
                &request.relation,
                revision,
                ResolveContext::new(),
            )
            .await?;

        let mut subjects: Vec<SubjectRef> = set.into_iter().collect();
        subjects.sort();

        metrics::counter!("muster_expands_total").increment(1);
        debug!(
            subjects = subjects.len(),
            revision = %revision,
            duration = ?start.elapsed(),
            "Relation set expanded"
        );

        Ok(ExpandOutcome { subjects, revision })
    }

    #[async_recursion]
    async fn expand_node(
        &self,
        snapshot: &Arc<SchemaSnapshot>,
        object: &ObjectRef,
        relation: &str,
        revision: Revision,
        mut ctx: ResolveContext,
    ) -> Result<HashSet<SubjectRef>> {
        if ctx.is_visited(object, relation) {
            // A looping path contributes nothing further.
            return Ok(HashSet::new());
        }
        if ctx.depth >= self.limits.max_depth {
            return Err(ResolveError::DepthExceeded { max: self.limits.max_depth });
        }
        ctx.depth += 1;

        let expr = snapshot.resolve(&object.object_type, relation)?;
        ctx.visit(object, relation);
        self.expand_expr(snapshot, expr, object, relation, revision, &ctx).await
    }

    #[async_recursion]
    async fn expand_expr(
        &self,
        snapshot: &Arc<SchemaSnapshot>,
        expr: &RewriteExpr,
        object: &ObjectRef,
        relation: &str,
        revision: Revision,
        ctx: &ResolveContext,
    ) -> Result<HashSet<SubjectRef>> {
        match expr {
            RewriteExpr::This => {
                let tuples = self.store.read(object, relation, revision).await?;

                let mut subjects = HashSet::new();
                let mut targets = Vec::new();
                for tuple in tuples {
                    if let Some(target_relation) = &tuple.subject.relation {
                        targets.push((tuple.subject.as_object(), target_relation.clone()));
                    }
                    subjects.insert(tuple.subject);
                }

                if targets.len() > self.limits.max_fanout {
                    return Err(ResolveError::FanoutExceeded { max: self.limits.max_fanout });
                }
                for (target_object, target_relation) in targets {
                    subjects.extend(
                        self.expand_node(
                            snapshot,
                            &target_object,
                            &target_relation,
                            revision,
                            ctx.clone(),
                        )
                        .await?,
                    );
                }
                Ok(subjects)
            },
            RewriteExpr::ComputedUserset { relation: target } => {
                self.expand_node(snapshot, object, target, revision, ctx.clone()).await
            },
            RewriteExpr::TupleToUserset { tupleset, computed } => {
                let tuples = self.store.read(object, tupleset, revision).await?;

                let mut seen = HashSet::new();
                let mut intermediates = Vec::new();
                for tuple in &tuples {
                    let intermediate = tuple.subject.as_object();
                    if seen.insert(intermediate.clone()) {
                        intermediates.push(intermediate);
                    }
                }
                if intermediates.len() > self.limits.max_fanout {
                    return Err(ResolveError::FanoutExceeded { max: self.limits.max_fanout });
                }

                let mut subjects = HashSet::new();
                for intermediate in intermediates {
                    subjects.extend(
                        self.expand_node(snapshot, &intermediate, computed, revision, ctx.clone())
                            .await?,
                    );
                }
                Ok(subjects)
            },
            RewriteExpr::Union(branches) => {
                let mut subjects = HashSet::new();
                for branch in branches {
                    subjects.extend(
                        self.expand_expr(snapshot, branch, object, relation, revision, ctx).await?,
                    );
                }
                Ok(subjects)
            },
            RewriteExpr::Intersection(branches) => {
                let mut iter = branches.iter();
                let Some(first) = iter.next() else { return Ok(HashSet::new()) };

                let mut subjects =
                    self.expand_expr(snapshot, first, object, relation, revision, ctx).await?;
                for branch in iter {
                    if subjects.is_empty() {
                        break;
                    }
                    let branch_subjects =
                        self.expand_expr(snapshot, branch, object, relation, revision, ctx).await?;
                    subjects.retain(|s| branch_subjects.contains(s));
                }
                Ok(subjects)
            },
            RewriteExpr::Exclusion { base, subtract } => {
                let mut subjects =
                    self.expand_expr(snapshot, base, object, relation, revision, ctx).await?;
                if subjects.is_empty() {
                    return Ok(subjects);
                }
                let removed =
                    self.expand_expr(snapshot, subtract, object, relation, revision, ctx).await?;
                subjects.retain(|s| !removed.contains(s));
                Ok(subjects)
            },
        }
    }
}

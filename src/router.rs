//! Transition routing
//!
//! Two tiers, in order:
//!
//! 1. Gated: only when the current state is complete and has legal targets.
//!    The classifier chooses among those targets.
//! 2. Global: the classifier may name any state; the jump is taken only if the
//!    transition table allows it.
//!
//! Classifier trouble of any kind means "stay".

mod classifier;
mod oracle;
mod rules;

pub use classifier::{
    Classification, ClassificationRequest, Classifier, ClassifyError, RoutingScope, STAY,
};
pub use oracle::LlmClassifier;
pub use rules::{RoutingRule, RoutingRules, RuleClassifier};

use crate::state_machine::{StateData, StateGraph, WorkflowState};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision<S> {
    Transition(S),
    Stay,
}

pub struct TransitionRouter {
    classifier: Arc<dyn Classifier>,
    call_timeout: Option<Duration>,
}

impl TransitionRouter {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier,
            call_timeout: None,
        }
    }

    /// Bound each classifier call
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub async fn decide<S: WorkflowState>(
        &self,
        graph: &StateGraph<S>,
        current: S,
        data: &StateData,
        message: &str,
        context: &str,
    ) -> RoutingDecision<S> {
        let legal = graph.legal_targets(current);
        if graph.is_complete(current, data) && !legal.is_empty() {
            if let Some(target) = self
                .ask(RoutingScope::Gated, current, legal, message, context)
                .await
            {
                return RoutingDecision::Transition(target);
            }
        }

        if let Some(target) = self
            .ask(RoutingScope::Global, current, S::ALL, message, context)
            .await
        {
            if target != current && graph.can_transition(current, target) {
                return RoutingDecision::Transition(target);
            }
            tracing::debug!(
                state = current.name(),
                target = target.name(),
                "Global route not allowed from current state"
            );
        }

        RoutingDecision::Stay
    }

    /// One classifier round. `None` for stay, failure or an out-of-set reply.
    async fn ask<S: WorkflowState>(
        &self,
        scope: RoutingScope,
        current: S,
        candidates: &[S],
        message: &str,
        context: &str,
    ) -> Option<S> {
        let request = ClassificationRequest {
            current: current.name(),
            candidates: candidates.iter().map(|s| s.name()).collect(),
            scope,
            message,
            context,
        };

        let result = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, self.classifier.classify(&request))
                .await
                .unwrap_or(Err(ClassifyError::Timeout(limit))),
            None => self.classifier.classify(&request).await,
        };

        let classification = match result {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(
                    classifier = self.classifier.name(),
                    scope = %scope,
                    state = current.name(),
                    error = %e,
                    "Classifier failed, staying"
                );
                return None;
            }
        };

        if classification.is_stay() {
            return None;
        }

        let target = S::from_name(classification.target.trim())
            .filter(|target| candidates.contains(target));
        if target.is_none() {
            tracing::warn!(
                classifier = self.classifier.name(),
                scope = %scope,
                state = current.name(),
                target = %classification.target,
                "Classifier chose a state outside the offered set"
            );
        }
        target
    }
}

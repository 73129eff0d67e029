//! Activation strategies.
//!
//! A strategy is a named predicate over its configured parameters and the evaluation context.
//! [`StrategyRegistry`] resolves names from feature definitions to implementations, falling back
//! to [`UnknownStrategy`] (or a caller-supplied fallback) for names it does not know.
use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    constraints::constraints_all_match, models::StrategyConfig, snapshot::Snapshot,
    EvaluationContext,
};

mod rollout;
mod targeting;

pub use rollout::{
    FlexibleRolloutStrategy, GradualRolloutRandomStrategy, GradualRolloutSessionIdStrategy,
    GradualRolloutUserIdStrategy, RandomGenerator,
};
pub use targeting::{
    ApplicationHostnameStrategy, GradualContextMatchingStrategy, RemoteAddressStrategy,
    UserWithIdStrategy,
};

/// Activation strategy capability.
///
/// Implementations must be side-effect free apart from logging: evaluation may short-circuit and
/// skip strategies.
pub trait Strategy: Send + Sync {
    /// Name this strategy is registered under and referenced by in feature definitions.
    fn name(&self) -> &str;

    fn is_enabled(&self, parameters: &HashMap<String, String>, context: &EvaluationContext) -> bool;
}

/// Always on.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStrategy;

impl Strategy for DefaultStrategy {
    fn name(&self) -> &str {
        "default"
    }

    fn is_enabled(
        &self,
        _parameters: &HashMap<String, String>,
        _context: &EvaluationContext,
    ) -> bool {
        true
    }
}

/// Resolution target for strategy names nobody registered. Always off.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownStrategy;

impl Strategy for UnknownStrategy {
    fn name(&self) -> &str {
        "unknown"
    }

    fn is_enabled(
        &self,
        _parameters: &HashMap<String, String>,
        _context: &EvaluationContext,
    ) -> bool {
        false
    }
}

/// Maps strategy names to implementations. One registry is owned by each client.
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn Strategy>>,
    fallback: Arc<dyn Strategy>,
}

impl StrategyRegistry {
    /// Registry with all built-in strategies and [`UnknownStrategy`] as fallback.
    pub fn new() -> StrategyRegistry {
        let mut registry = StrategyRegistry::empty();
        registry.register(DefaultStrategy);
        registry.register(UserWithIdStrategy);
        registry.register(RemoteAddressStrategy);
        registry.register(ApplicationHostnameStrategy::new());
        registry.register(GradualRolloutUserIdStrategy);
        registry.register(GradualRolloutSessionIdStrategy);
        registry.register(GradualRolloutRandomStrategy);
        registry.register(FlexibleRolloutStrategy::new());
        registry.register(GradualContextMatchingStrategy);
        registry
    }

    /// Registry without any strategies.
    pub fn empty() -> StrategyRegistry {
        StrategyRegistry {
            strategies: HashMap::new(),
            fallback: Arc::new(UnknownStrategy),
        }
    }

    /// Register `strategy` under its name, replacing a previous strategy with the same name.
    pub fn register<S: Strategy + 'static>(&mut self, strategy: S) {
        self.register_arc(Arc::new(strategy));
    }

    pub fn register_arc(&mut self, strategy: Arc<dyn Strategy>) {
        let name = strategy.name().to_owned();
        if self.strategies.insert(name.clone(), strategy).is_some() {
            log::debug!(target: "flagkit", strategy = name.as_str();
                "replaced registered strategy");
        }
    }

    /// Set the strategy used for names that are not registered.
    pub fn set_fallback<S: Strategy + 'static>(&mut self, strategy: S) {
        self.fallback = Arc::new(strategy);
    }

    /// Resolve `name`. Never fails: unknown names resolve to the fallback strategy.
    pub fn resolve(&self, name: &str) -> &dyn Strategy {
        match self.strategies.get(name) {
            Some(strategy) => strategy.as_ref(),
            None => {
                log::warn!(target: "flagkit", strategy = name;
                    "unknown strategy, using fallback strategy");
                self.fallback.as_ref()
            }
        }
    }

    /// Evaluate one configured strategy: its own constraints, then the constraints of every
    /// segment it references, then its predicate.
    ///
    /// Segments are looked up in `snapshot`. A reference to a segment the snapshot does not have
    /// never matches.
    pub fn eval(
        &self,
        config: &StrategyConfig,
        snapshot: &Snapshot,
        context: &EvaluationContext,
    ) -> bool {
        constraints_all_match(&config.constraints, context)
            && config.segments.iter().all(|&id| match snapshot.segment(id) {
                Some(segment) => constraints_all_match(&segment.constraints, context),
                None => {
                    log::warn!(target: "flagkit", strategy = config.name.as_str(), segment = id;
                        "strategy references an unknown segment");
                    false
                }
            })
            && self
                .resolve(&config.name)
                .is_enabled(&config.parameters, context)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        StrategyRegistry::new()
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.strategies.keys().collect();
        names.sort();
        f.debug_struct("StrategyRegistry")
            .field("strategies", &names)
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

/// Comma-separated parameter list, trimmed, without empty entries.
pub(crate) fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

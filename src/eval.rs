use crate::{
    models::{FeatureDefinition, FeatureDependency, StrategyConfig, Variant},
    snapshot::Snapshot,
    strategy::StrategyRegistry,
    variant::VariantHashing,
    EvaluationContext,
};

/// Decides whether features are enabled and which variant they hand out. Owns the strategy
/// registry of one client.
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    registry: StrategyRegistry,
    name_prefix: Option<String>,
    variant_hashing: VariantHashing,
}

/// Outcome of evaluating one defined feature.
#[derive(Debug, Clone)]
pub struct Evaluation<'a> {
    pub feature: &'a FeatureDefinition,
    pub enabled: bool,
    /// The strategy that enabled the feature. `None` when the feature is off or has no
    /// strategies.
    pub strategy: Option<&'a StrategyConfig>,
    /// Parents consulted through the feature's dependencies, in declaration order.
    pub parents: Vec<Evaluation<'a>>,
}

impl<'a> Evaluation<'a> {
    fn off(feature: &'a FeatureDefinition) -> Evaluation<'a> {
        Evaluation {
            feature,
            enabled: false,
            strategy: None,
            parents: Vec::new(),
        }
    }
}

impl Evaluator {
    pub fn new(
        registry: StrategyRegistry,
        name_prefix: Option<String>,
        variant_hashing: VariantHashing,
    ) -> Evaluator {
        Evaluator {
            registry,
            name_prefix,
            variant_hashing,
        }
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Evaluate `feature_name` against `snapshot`.
    ///
    /// Features missing from the snapshot resolve through `fallback`.
    pub fn is_enabled<F>(
        &self,
        snapshot: &Snapshot,
        feature_name: &str,
        context: &EvaluationContext,
        fallback: F,
    ) -> bool
    where
        F: FnOnce(&str, &EvaluationContext) -> bool,
    {
        match self.evaluate(snapshot, feature_name, context) {
            Some(evaluation) => evaluation.enabled,
            None => {
                log::debug!(target: "flagkit", feature_name;
                    "feature is not defined, using fallback");
                fallback(feature_name, context)
            }
        }
    }

    /// Evaluate `feature_name`, or `None` when the snapshot does not define it.
    ///
    /// Kill switch first, then dependencies, then any strategy. An enabled feature without
    /// strategies is on.
    pub fn evaluate<'a>(
        &self,
        snapshot: &'a Snapshot,
        feature_name: &str,
        context: &EvaluationContext,
    ) -> Option<Evaluation<'a>> {
        if let Some(prefix) = &self.name_prefix {
            if !feature_name.starts_with(prefix.as_str()) {
                log::warn!(target: "flagkit", feature_name, prefix = prefix.as_str();
                    "feature name does not start with the configured prefix");
            }
        }

        let feature = snapshot.get(feature_name)?;
        Some(self.evaluate_feature(snapshot, feature, context))
    }

    /// Variant handed out by `evaluation`.
    ///
    /// Variants of the enabling strategy win over the feature's own. Off features get
    /// `default_variant`.
    pub fn variant(
        &self,
        evaluation: &Evaluation<'_>,
        context: &EvaluationContext,
        default_variant: &Variant,
    ) -> Variant {
        if !evaluation.enabled {
            return default_variant.clone();
        }
        match evaluation.strategy {
            Some(strategy) if !strategy.variants.is_empty() => {
                self.variant_hashing.select_strategy_variant(
                    evaluation.feature,
                    strategy,
                    context,
                    default_variant,
                )
            }
            _ => self
                .variant_hashing
                .select_variant(Some(evaluation.feature), context, default_variant),
        }
    }

    fn evaluate_feature<'a>(
        &self,
        snapshot: &'a Snapshot,
        feature: &'a FeatureDefinition,
        context: &EvaluationContext,
    ) -> Evaluation<'a> {
        let mut evaluation = Evaluation::off(feature);
        if !feature.enabled {
            return evaluation;
        }

        for dependency in &feature.dependencies {
            if !self.dependency_satisfied(snapshot, dependency, context, &mut evaluation.parents) {
                return evaluation;
            }
        }

        if feature.strategies.is_empty() {
            evaluation.enabled = true;
            return evaluation;
        }

        evaluation.strategy = feature
            .strategies
            .iter()
            .find(|strategy| self.registry.eval(strategy, snapshot, context));
        evaluation.enabled = evaluation.strategy.is_some();
        evaluation
    }

    fn dependency_satisfied<'a>(
        &self,
        snapshot: &'a Snapshot,
        dependency: &FeatureDependency,
        context: &EvaluationContext,
        parents: &mut Vec<Evaluation<'a>>,
    ) -> bool {
        let parent_name = dependency.feature.as_str();
        let Some(parent) = snapshot.get(parent_name) else {
            log::debug!(target: "flagkit", parent = parent_name; "parent feature is not defined");
            return false;
        };
        if !parent.dependencies.is_empty() {
            log::warn!(target: "flagkit", parent = parent_name;
                "parent feature has dependencies of its own, treating it as unsatisfied");
            return false;
        }

        let parent = self.evaluate_feature(snapshot, parent, context);
        let satisfied = if !dependency.enabled {
            !parent.enabled
        } else if dependency.variants.is_empty() {
            parent.enabled
        } else {
            parent.enabled
                && dependency
                    .variants
                    .contains(&self.variant(&parent, context, &Variant::disabled()).name)
        };
        parents.push(parent);
        satisfied
    }
}

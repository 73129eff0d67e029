use std::borrow::Cow;

use rand::{thread_rng, Rng};

use crate::{
    bucketing::{normalized_number_with_seed, VARIANT_NORMALIZATION_SEED},
    models::{FeatureDefinition, StrategyConfig, Variant, VariantDefinition, DEFAULT_STICKINESS},
    EvaluationContext,
};

const GROUP_ID: &str = "groupId";
const STICKINESS: &str = "stickiness";

/// Variant bucketing algorithm.
///
/// The two algorithms hash with different seeds and choose the stickiness identifier differently,
/// so switching an existing deployment between them reshuffles users.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum VariantHashing {
    /// Hashes with the variant normalization seed. Stickiness is read from the first variant.
    /// `default` resolves to `userId`, then `sessionId`, then a random identifier.
    #[default]
    Standard,
    /// Hashes with seed `0`, as clients did before the variant seed was introduced. Stickiness is
    /// read from the first variant declaring a non-default one. `default` resolves to `userId`,
    /// then `sessionId`, then `remoteAddress`, then a random identifier.
    Legacy,
}

impl VariantHashing {
    /// Select a variant of `feature` for `context`.
    ///
    /// Returns `default_variant` when there is no feature or its variants carry no weight.
    /// Overrides win over weighted selection, in declared variant-then-override order.
    pub fn select_variant(
        self,
        feature: Option<&FeatureDefinition>,
        context: &EvaluationContext,
        default_variant: &Variant,
    ) -> Variant {
        let Some(feature) = feature else {
            return default_variant.clone();
        };
        self.select(
            &feature.variants,
            &feature.name,
            None,
            context,
            default_variant,
        )
    }

    /// Select one of the variants declared on `strategy`, which enabled `feature`.
    ///
    /// Buckets within the strategy's `groupId` parameter (the feature name when absent). With
    /// [`VariantHashing::Standard`], the strategy's `stickiness` parameter wins over the
    /// variants' own.
    pub fn select_strategy_variant(
        self,
        feature: &FeatureDefinition,
        strategy: &StrategyConfig,
        context: &EvaluationContext,
        default_variant: &Variant,
    ) -> Variant {
        let group_id = strategy
            .parameters
            .get(GROUP_ID)
            .map(String::as_str)
            .unwrap_or(&feature.name);
        let stickiness = strategy.parameters.get(STICKINESS).map(String::as_str);
        self.select(
            &strategy.variants,
            group_id,
            stickiness,
            context,
            default_variant,
        )
    }

    fn select(
        self,
        variants: &[VariantDefinition],
        group_id: &str,
        stickiness: Option<&str>,
        context: &EvaluationContext,
        default_variant: &Variant,
    ) -> Variant {
        let total_weight = match variants
            .iter()
            .try_fold(0u32, |total, variant| total.checked_add(variant.weight))
        {
            Some(0) => return default_variant.clone(),
            Some(total) => total,
            None => {
                log::warn!(target: "flagkit", group_id;
                    "variant weights overflow, using default variant");
                return default_variant.clone();
            }
        };

        if let Some(overridden) = find_override(variants, context) {
            return overridden.to_variant();
        }

        let (identifier, seed) = match self {
            VariantHashing::Standard => (
                standard_identifier(variants, stickiness, context),
                VARIANT_NORMALIZATION_SEED,
            ),
            VariantHashing::Legacy => (legacy_identifier(variants, context), 0),
        };
        let target = normalized_number_with_seed(&identifier, group_id, total_weight, seed);

        pick_by_weight(variants, target)
            .map(VariantDefinition::to_variant)
            .unwrap_or_else(|| default_variant.clone())
    }
}

/// First variant with an override matching `context`.
fn find_override<'a>(
    variants: &'a [VariantDefinition],
    context: &EvaluationContext,
) -> Option<&'a VariantDefinition> {
    variants.iter().find(|variant| {
        variant.overrides.iter().any(|o| {
            context
                .get_by_name(&o.context_name)
                .is_some_and(|value| o.values.iter().any(|v| *v == value))
        })
    })
}

/// Walk cumulative weights until reaching `target`, which is in `[1, total_weight]`.
fn pick_by_weight(variants: &[VariantDefinition], target: u32) -> Option<&VariantDefinition> {
    let mut counter = 0u32;
    variants
        .iter()
        .filter(|variant| variant.weight > 0)
        .find(|variant| {
            counter += variant.weight;
            counter >= target
        })
}

fn standard_identifier<'a>(
    variants: &[VariantDefinition],
    stickiness: Option<&str>,
    context: &'a EvaluationContext,
) -> Cow<'a, str> {
    let stickiness = stickiness
        .or_else(|| variants.first().map(|variant| variant.stickiness.as_str()))
        .unwrap_or(DEFAULT_STICKINESS);

    match stickiness {
        DEFAULT_STICKINESS => context
            .user_id
            .as_deref()
            .or(context.session_id.as_deref())
            .map(Cow::Borrowed)
            .unwrap_or_else(|| Cow::Owned(random_identifier())),
        "random" => Cow::Owned(random_identifier()),
        field => context
            .get_by_name(field)
            .unwrap_or_else(|| Cow::Owned(random_identifier())),
    }
}

fn legacy_identifier<'a>(
    variants: &[VariantDefinition],
    context: &'a EvaluationContext,
) -> Cow<'a, str> {
    let custom_stickiness = variants
        .iter()
        .map(|variant| variant.stickiness.as_str())
        .find(|stickiness| *stickiness != DEFAULT_STICKINESS);

    match custom_stickiness {
        Some(field) => context
            .get_by_name(field)
            .unwrap_or_else(|| Cow::Owned(thread_rng().gen_range(0..100_000u32).to_string())),
        None => context
            .user_id
            .as_deref()
            .or(context.session_id.as_deref())
            .or(context.remote_address.as_deref())
            .map(Cow::Borrowed)
            .unwrap_or_else(|| Cow::Owned(thread_rng().gen::<f64>().to_string())),
    }
}

fn random_identifier() -> String {
    thread_rng().gen_range(0..100_000u32).to_string()
}

use std::{borrow::Cow, collections::HashMap, fmt, sync::Arc};

use rand::{thread_rng, Rng};

use crate::{
    bucketing::{is_within_percentage, parse_percentage},
    EvaluationContext,
};

use super::Strategy;

const PERCENTAGE: &str = "percentage";
const ROLLOUT: &str = "rollout";
const GROUP_ID: &str = "groupId";
const STICKINESS: &str = "stickiness";

/// Source of identifiers for random stickiness.
pub type RandomGenerator = Arc<dyn Fn() -> String + Send + Sync>;

fn random_identifier() -> String {
    thread_rng().gen_range(1..=100_000u32).to_string()
}

fn group_id(parameters: &HashMap<String, String>) -> &str {
    parameters.get(GROUP_ID).map(String::as_str).unwrap_or("")
}

fn percentage(parameters: &HashMap<String, String>, key: &str) -> u32 {
    parse_percentage(parameters.get(key).map(String::as_str))
}

/// `userId` bucketed within `groupId`, compared against `percentage`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GradualRolloutUserIdStrategy;

impl Strategy for GradualRolloutUserIdStrategy {
    fn name(&self) -> &str {
        "gradualRolloutUserId"
    }

    fn is_enabled(
        &self,
        parameters: &HashMap<String, String>,
        context: &EvaluationContext,
    ) -> bool {
        context.user_id.as_deref().is_some_and(|user_id| {
            is_within_percentage(user_id, group_id(parameters), percentage(parameters, PERCENTAGE))
        })
    }
}

/// `sessionId` bucketed within `groupId`, compared against `percentage`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GradualRolloutSessionIdStrategy;

impl Strategy for GradualRolloutSessionIdStrategy {
    fn name(&self) -> &str {
        "gradualRolloutSessionId"
    }

    fn is_enabled(
        &self,
        parameters: &HashMap<String, String>,
        context: &EvaluationContext,
    ) -> bool {
        context.session_id.as_deref().is_some_and(|session_id| {
            let percentage = percentage(parameters, PERCENTAGE);
            is_within_percentage(session_id, group_id(parameters), percentage)
        })
    }
}

/// Fresh random draw on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct GradualRolloutRandomStrategy;

impl Strategy for GradualRolloutRandomStrategy {
    fn name(&self) -> &str {
        "gradualRolloutRandom"
    }

    fn is_enabled(
        &self,
        parameters: &HashMap<String, String>,
        _context: &EvaluationContext,
    ) -> bool {
        let percentage = percentage(parameters, PERCENTAGE);
        percentage > 0 && thread_rng().gen_range(1..=100u32) <= percentage
    }
}

/// Percentage rollout with configurable stickiness.
///
/// The `stickiness` parameter selects the bucketing identifier:
/// - `default`: `userId`, then `sessionId`, then a random identifier
/// - `userId` / `sessionId`: that field, off when absent
/// - `random`: a random identifier on every call
/// - anything else: the named context field, off when absent
#[derive(Clone)]
pub struct FlexibleRolloutStrategy {
    random: RandomGenerator,
}

impl FlexibleRolloutStrategy {
    pub fn new() -> FlexibleRolloutStrategy {
        FlexibleRolloutStrategy::with_random_generator(Arc::new(random_identifier))
    }

    /// Use `random` for `random` stickiness and the end of the `default` chain.
    pub fn with_random_generator(random: RandomGenerator) -> FlexibleRolloutStrategy {
        FlexibleRolloutStrategy { random }
    }

    fn resolve_stickiness<'a>(
        &self,
        stickiness: &str,
        context: &'a EvaluationContext,
    ) -> Option<Cow<'a, str>> {
        match stickiness {
            "userId" => context.user_id.as_deref().map(Cow::Borrowed),
            "sessionId" => context.session_id.as_deref().map(Cow::Borrowed),
            "random" => Some(Cow::Owned((self.random)())),
            "default" => Some(
                context
                    .user_id
                    .as_deref()
                    .or(context.session_id.as_deref())
                    .map(Cow::Borrowed)
                    .unwrap_or_else(|| Cow::Owned((self.random)())),
            ),
            field => context.get_by_name(field),
        }
    }
}

impl Default for FlexibleRolloutStrategy {
    fn default() -> Self {
        FlexibleRolloutStrategy::new()
    }
}

impl fmt::Debug for FlexibleRolloutStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlexibleRolloutStrategy").finish_non_exhaustive()
    }
}

impl Strategy for FlexibleRolloutStrategy {
    fn name(&self) -> &str {
        "flexibleRollout"
    }

    fn is_enabled(
        &self,
        parameters: &HashMap<String, String>,
        context: &EvaluationContext,
    ) -> bool {
        let stickiness = parameters
            .get(STICKINESS)
            .map(String::as_str)
            .unwrap_or("default");
        let percentage = percentage(parameters, ROLLOUT);

        self.resolve_stickiness(stickiness, context)
            .is_some_and(|identifier| {
                is_within_percentage(&identifier, group_id(parameters), percentage)
            })
    }
}

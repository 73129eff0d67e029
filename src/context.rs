use std::{borrow::Cow, collections::HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request-scoped data that strategies, constraints and variant selection read from.
///
/// Well-known fields take priority over same-named entries in `properties`.
///
/// ```
/// # use flagkit::EvaluationContext;
/// let context = EvaluationContext::builder()
///     .user_id("user-42")
///     .property("tenant", "acme")
///     .build();
/// assert_eq!(context.get_by_name("tenant").as_deref(), Some("acme"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub remote_address: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub current_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl EvaluationContext {
    /// Create an empty context.
    pub fn new() -> EvaluationContext {
        EvaluationContext::default()
    }

    pub fn builder() -> EvaluationContextBuilder {
        EvaluationContextBuilder::default()
    }

    /// Resolve a context field by name: well-known fields first, then `properties`.
    pub fn get_by_name(&self, name: &str) -> Option<Cow<'_, str>> {
        let well_known = match name {
            "userId" => self.user_id.as_deref(),
            "sessionId" => self.session_id.as_deref(),
            "remoteAddress" => self.remote_address.as_deref(),
            "environment" => self.environment.as_deref(),
            "appName" => self.app_name.as_deref(),
            "currentTime" => {
                if let Some(time) = self.current_time {
                    return Some(Cow::Owned(time.to_rfc3339()));
                }
                None
            }
            _ => None,
        };

        well_known
            .or_else(|| self.properties.get(name).map(String::as_str))
            .map(Cow::Borrowed)
    }

    /// Fill in `appName` and `environment` from process-wide settings when the caller did not
    /// set them. Borrows `self` unchanged when both are already present.
    pub fn with_static_fields(
        &self,
        app_name: &str,
        environment: &str,
    ) -> Cow<'_, EvaluationContext> {
        if self.app_name.is_some() && self.environment.is_some() {
            return Cow::Borrowed(self);
        }

        let mut context = self.clone();
        context.app_name.get_or_insert_with(|| app_name.to_owned());
        context.environment.get_or_insert_with(|| environment.to_owned());
        Cow::Owned(context)
    }
}

/// Builder for [`EvaluationContext`].
#[derive(Debug, Default)]
pub struct EvaluationContextBuilder {
    context: EvaluationContext,
}

impl EvaluationContextBuilder {
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.context.user_id = Some(user_id.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.context.session_id = Some(session_id.into());
        self
    }

    pub fn remote_address(mut self, remote_address: impl Into<String>) -> Self {
        self.context.remote_address = Some(remote_address.into());
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.context.environment = Some(environment.into());
        self
    }

    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.context.app_name = Some(app_name.into());
        self
    }

    pub fn current_time(mut self, current_time: DateTime<Utc>) -> Self {
        self.context.current_time = Some(current_time);
        self
    }

    /// Add a custom property.
    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.properties.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> EvaluationContext {
        self.context
    }
}

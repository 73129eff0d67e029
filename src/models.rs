use std::collections::{hash_map::Entry, HashMap};

use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize};

/// Feature definitions document, as returned by `/client/features` and stored in backup and
/// bootstrap files.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureCollection {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub features: Vec<TryParse<FeatureDefinition>>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub segments: Vec<TryParse<Segment>>,
}

fn default_version() -> u32 {
    2
}

impl FeatureCollection {
    pub fn from_definitions<I: IntoIterator<Item = FeatureDefinition>>(
        definitions: I,
    ) -> FeatureCollection {
        FeatureCollection {
            version: default_version(),
            features: definitions.into_iter().map(TryParse::Parsed).collect(),
            segments: Vec::new(),
        }
    }

    /// Index features by name, dropping the ones that failed to parse. When a name appears more
    /// than once, the first definition wins.
    pub fn into_definitions(self) -> HashMap<String, FeatureDefinition> {
        self.into_parts().0
    }

    /// Features indexed by name and segments indexed by id. Entries that failed to parse are
    /// dropped; for duplicate names or ids the first entry wins.
    pub fn into_parts(self) -> (HashMap<String, FeatureDefinition>, HashMap<u32, Segment>) {
        let mut segments = HashMap::with_capacity(self.segments.len());
        for segment in self.segments {
            match segment {
                TryParse::Parsed(segment) => {
                    segments.entry(segment.id).or_insert(segment);
                }
                TryParse::ParseFailed(value) => {
                    let id = value.get("id").and_then(|id| id.as_u64());
                    log::warn!(target: "flagkit", id; "skipping segment that failed to parse");
                }
            }
        }

        let mut definitions = HashMap::with_capacity(self.features.len());
        for feature in self.features {
            let feature = match feature {
                TryParse::Parsed(feature) => feature,
                TryParse::ParseFailed(value) => {
                    let name = value.get("name").and_then(|name| name.as_str()).unwrap_or("");
                    log::warn!(target: "flagkit", name;
                        "skipping feature definition that failed to parse");
                    continue;
                }
            };
            match definitions.entry(feature.name.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(feature);
                }
                Entry::Occupied(entry) => {
                    let name = entry.key().as_str();
                    log::warn!(target: "flagkit", name;
                        "duplicate feature definition, keeping the first one");
                }
            }
        }
        (definitions, segments)
    }
}

/// `TryParse` allows a single feature to fail parsing without failing the whole document.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TryParse<T> {
    Parsed(T),
    ParseFailed(serde_json::Value),
}

impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDefinition {
    pub name: String,
    pub enabled: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub strategies: Vec<StrategyConfig>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub variants: Vec<VariantDefinition>,
    /// Parent features that must evaluate as declared for this feature to be on.
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub dependencies: Vec<FeatureDependency>,
    /// Report evaluations of this feature to
    /// [`Subscriber::on_impression`](crate::Subscriber::on_impression).
    #[serde(default, deserialize_with = "null_as_default")]
    pub impression_data: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub feature_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FeatureDefinition {
    /// An enabled feature with no strategies and no variants.
    pub fn new(name: impl Into<String>, enabled: bool) -> FeatureDefinition {
        FeatureDefinition {
            name: name.into(),
            enabled,
            strategies: Vec::new(),
            variants: Vec::new(),
            dependencies: Vec::new(),
            impression_data: false,
            project: None,
            feature_type: None,
            description: None,
        }
    }

    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn with_variant(mut self, variant: VariantDefinition) -> Self {
        self.variants.push(variant);
        self
    }

    pub fn with_dependency(mut self, dependency: FeatureDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_impression_data(mut self) -> Self {
        self.impression_data = true;
        self
    }
}

/// Requirement on a parent feature.
///
/// With `enabled` (the default) the parent must be on and, when `variants` is not empty, hand out
/// one of them. Otherwise the parent must be off. Parents cannot have dependencies of their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDependency {
    pub feature: String,
    #[serde(default = "default_true", deserialize_with = "null_as_true")]
    pub enabled: bool,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub variants: Vec<String>,
}

impl FeatureDependency {
    /// The parent must be enabled.
    pub fn enabled(feature: impl Into<String>) -> FeatureDependency {
        FeatureDependency {
            feature: feature.into(),
            enabled: true,
            variants: Vec::new(),
        }
    }

    /// The parent must be disabled.
    pub fn disabled(feature: impl Into<String>) -> FeatureDependency {
        FeatureDependency {
            enabled: false,
            ..FeatureDependency::enabled(feature)
        }
    }

    /// The parent must be enabled and hand out one of `variants`.
    pub fn with_variants<I, S>(feature: impl Into<String>, variants: I) -> FeatureDependency
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FeatureDependency {
            variants: variants.into_iter().map(Into::into).collect(),
            ..FeatureDependency::enabled(feature)
        }
    }
}

/// Named, reusable list of constraints that strategies reference by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub constraints: Vec<Constraint>,
}

impl Segment {
    pub fn new(id: u32, constraints: Vec<Constraint>) -> Segment {
        Segment {
            id,
            name: None,
            constraints,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_parameters")]
    pub parameters: HashMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub constraints: Vec<Constraint>,
    /// Ids of segments whose constraints must match as well.
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub segments: Vec<u32>,
    /// Variants handed out when this strategy enables the feature. Take priority over the
    /// feature's own variants.
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub variants: Vec<VariantDefinition>,
}

impl StrategyConfig {
    pub fn new(name: impl Into<String>) -> StrategyConfig {
        StrategyConfig {
            name: name.into(),
            parameters: HashMap::new(),
            constraints: Vec::new(),
            segments: Vec::new(),
            variants: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_segment(mut self, id: u32) -> Self {
        self.segments.push(id);
        self
    }

    pub fn with_variant(mut self, variant: VariantDefinition) -> Self {
        self.variants.push(variant);
        self
    }
}

/// `null` reads like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(true))
}

fn default_true() -> bool {
    true
}

/// Servers occasionally send numeric or boolean parameter values. Strategies read parameters as
/// strings, so everything is stringified and `null` entries are dropped.
fn deserialize_parameters<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<HashMap<String, serde_json::Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some((key, s)),
            other => Some((key, other.to_string())),
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    pub context_name: String,
    pub operator: Operator,
    #[serde(default, deserialize_with = "null_as_default")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub inverted: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub case_insensitive: bool,
}

impl Constraint {
    pub fn new<I, S>(context_name: impl Into<String>, operator: Operator, values: I) -> Constraint
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Constraint {
            context_name: context_name.into(),
            operator,
            values: values.into_iter().map(Into::into).collect(),
            value: None,
            inverted: false,
            case_insensitive: false,
        }
    }

    /// Constraint with a single `value` operand.
    pub fn single(
        context_name: impl Into<String>,
        operator: Operator,
        value: impl Into<String>,
    ) -> Constraint {
        Constraint {
            value: Some(value.into()),
            ..Constraint::new(context_name, operator, Vec::<String>::new())
        }
    }

    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    In,
    NotIn,
    StrContains,
    StrStartsWith,
    StrEndsWith,
    NumLt,
    NumLte,
    NumEq,
    NumGte,
    NumGt,
    SemverLt,
    SemverEq,
    SemverGt,
    DateBefore,
    DateAfter,
    /// Any operator this client does not know about. Always evaluates to `false`.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantDefinition {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub overrides: Vec<VariantOverride>,
    #[serde(
        default = "default_stickiness",
        deserialize_with = "deserialize_stickiness"
    )]
    pub stickiness: String,
}

pub(crate) const DEFAULT_STICKINESS: &str = "default";

fn default_stickiness() -> String {
    DEFAULT_STICKINESS.to_owned()
}

fn deserialize_stickiness<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_stickiness))
}

impl VariantDefinition {
    pub fn new(name: impl Into<String>, weight: u32) -> VariantDefinition {
        VariantDefinition {
            name: name.into(),
            weight,
            payload: None,
            overrides: Vec::new(),
            stickiness: default_stickiness(),
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_override<I, S>(mut self, context_name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.overrides.push(VariantOverride {
            context_name: context_name.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_stickiness(mut self, stickiness: impl Into<String>) -> Self {
        self.stickiness = stickiness.into();
        self
    }

    pub(crate) fn to_variant(&self) -> Variant {
        Variant {
            name: self.name.clone(),
            payload: self.payload.clone(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantOverride {
    pub context_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub values: Vec<String>,
}

/// Opaque, typed variant payload (`string`, `json`, `csv`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "type")]
    pub payload_type: String,
    pub value: String,
}

/// Variant handed out to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    pub enabled: bool,
}

impl Variant {
    /// Variant returned when a feature is off or declares no variants.
    pub fn disabled() -> Variant {
        Variant {
            name: "disabled".to_owned(),
            payload: None,
            enabled: false,
        }
    }
}

impl Default for Variant {
    fn default() -> Self {
        Variant::disabled()
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::BufReader};

    use super::{FeatureCollection, FeatureDependency, Operator, TryParse};

    #[test]
    fn parse_features_fixture() {
        let f = File::open("tests/data/features.json")
            .expect("Failed to open tests/data/features.json");
        let collection: FeatureCollection = serde_json::from_reader(BufReader::new(f)).unwrap();
        let definitions = collection.into_definitions();
        assert!(definitions.contains_key("checkout.new-flow"));
    }

    #[test]
    fn parse_partially_if_unexpected() {
        let collection: FeatureCollection = serde_json::from_str(
            r#"
              {
                "version": 2,
                "features": [
                  { "name": "success", "enabled": true, "strategies": [] },
                  { "name": "fail_parsing", "enabled": "maybe" }
                ]
              }
            "#,
        )
        .unwrap();
        assert!(matches!(collection.features[0], TryParse::Parsed(_)));
        assert!(matches!(collection.features[1], TryParse::ParseFailed(_)));

        let definitions = collection.into_definitions();
        assert_eq!(definitions.len(), 1);
        assert!(definitions.contains_key("success"));
    }

    #[test]
    fn first_duplicate_wins() {
        let collection: FeatureCollection = serde_json::from_str(
            r#"{"features": [
                {"name": "dup", "enabled": true},
                {"name": "dup", "enabled": false}
            ]}"#,
        )
        .unwrap();
        let definitions = collection.into_definitions();
        assert!(definitions["dup"].enabled);
    }

    #[test]
    fn parameters_are_stringified() {
        let collection: FeatureCollection = serde_json::from_str(
            r#"{"features": [{
                "name": "f",
                "enabled": true,
                "strategies": [{
                    "name": "flexibleRollout",
                    "parameters": {"rollout": 25, "groupId": "f", "sticky": true, "gone": null}
                }]
            }]}"#,
        )
        .unwrap();
        let definitions = collection.into_definitions();
        let parameters = &definitions["f"].strategies[0].parameters;
        assert_eq!(parameters["rollout"], "25");
        assert_eq!(parameters["groupId"], "f");
        assert_eq!(parameters["sticky"], "true");
        assert!(!parameters.contains_key("gone"));
    }

    #[test]
    fn unknown_operator_is_tolerated() {
        let collection: FeatureCollection = serde_json::from_str(
            r#"{"features": [{
                "name": "f",
                "enabled": true,
                "strategies": [{
                    "name": "default",
                    "constraints": [
                        {"contextName": "userId", "operator": "REGEX_MATCH", "values": ["x"]}
                    ]
                }]
            }]}"#,
        )
        .unwrap();
        let definitions = collection.into_definitions();
        assert_eq!(
            definitions["f"].strategies[0].constraints[0].operator,
            Operator::Unknown
        );
    }

    #[test]
    fn variant_stickiness_defaults() {
        let collection: FeatureCollection = serde_json::from_str(
            r#"{"features": [{
                "name": "f",
                "enabled": true,
                "variants": [
                    {"name": "a", "weight": 50, "payload": {"type": "string", "value": "x"}}
                ]
            }]}"#,
        )
        .unwrap();
        let definitions = collection.into_definitions();
        let variant = &definitions["f"].variants[0];
        assert_eq!(variant.stickiness, "default");
        assert_eq!(variant.payload.as_ref().unwrap().value, "x");
    }

    #[test]
    fn null_lists_read_as_empty() {
        let collection: FeatureCollection = serde_json::from_str(
            r#"{"features": [
                {"name": "legacy", "enabled": true, "strategies": null, "variants": null},
                {
                    "name": "nullstick",
                    "enabled": true,
                    "strategies": [{
                        "name": "default",
                        "parameters": null,
                        "constraints": [{
                            "contextName": "userId",
                            "operator": "IN",
                            "values": null,
                            "value": "7",
                            "inverted": null
                        }],
                        "segments": null,
                        "variants": null
                    }],
                    "variants": [{"name": "a", "weight": 1, "overrides": null, "stickiness": null}],
                    "dependencies": null,
                    "impressionData": null
                }
            ], "segments": null}"#,
        )
        .unwrap();
        let definitions = collection.into_definitions();
        assert_eq!(definitions.len(), 2);

        assert!(definitions["legacy"].variants.is_empty());
        assert!(definitions["legacy"].strategies.is_empty());

        let nullstick = &definitions["nullstick"];
        assert_eq!(nullstick.variants[0].stickiness, "default");
        assert!(nullstick.variants[0].overrides.is_empty());
        assert!(!nullstick.impression_data);
        let constraint = &nullstick.strategies[0].constraints[0];
        assert!(constraint.values.is_empty());
        assert!(!constraint.inverted);
    }

    #[test]
    fn segments_and_dependencies() {
        let collection: FeatureCollection = serde_json::from_str(
            r#"{
                "features": [{
                    "name": "child",
                    "enabled": true,
                    "impressionData": true,
                    "strategies": [{"name": "default", "segments": [1, 2]}],
                    "dependencies": [
                        {"feature": "parent"},
                        {"feature": "gate", "enabled": false},
                        {"feature": "colors", "variants": ["red"]}
                    ]
                }],
                "segments": [
                    {"id": 1, "name": "beta", "constraints": [
                        {"contextName": "beta", "operator": "IN", "values": ["yes"]}
                    ]},
                    {"id": "two"},
                    {"id": 1, "constraints": []}
                ]
            }"#,
        )
        .unwrap();
        let (definitions, segments) = collection.into_parts();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[&1].name.as_deref(), Some("beta"));
        assert_eq!(segments[&1].constraints.len(), 1);

        let child = &definitions["child"];
        assert!(child.impression_data);
        assert_eq!(child.strategies[0].segments, vec![1, 2]);
        assert_eq!(
            child.dependencies,
            vec![
                FeatureDependency::enabled("parent"),
                FeatureDependency::disabled("gate"),
                FeatureDependency::with_variants("colors", ["red"]),
            ]
        );
    }
}

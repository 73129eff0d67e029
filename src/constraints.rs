use std::borrow::Cow;

use chrono::{DateTime, NaiveDateTime, Utc};
use semver::Version;

use crate::{
    models::{Constraint, Operator},
    EvaluationContext,
};

/// All constraints must match. An empty list matches vacuously.
pub fn constraints_all_match(constraints: &[Constraint], context: &EvaluationContext) -> bool {
    constraints
        .iter()
        .all(|constraint| constraint.eval(context))
}

impl Constraint {
    /// Evaluate the constraint against `context`, applying `inverted` last.
    pub fn eval(&self, context: &EvaluationContext) -> bool {
        let field = context.get_by_name(&self.context_name);
        let result = self
            .operator
            .eval(field.as_deref(), self, context);
        self.inverted ^ result
    }

    /// `values` when present, otherwise the single `value`.
    fn operands(&self) -> Vec<&str> {
        if !self.values.is_empty() {
            self.values.iter().map(String::as_str).collect()
        } else {
            self.value.as_deref().into_iter().collect()
        }
    }

    fn single_operand(&self) -> Option<&str> {
        self.value
            .as_deref()
            .or_else(|| self.values.first().map(String::as_str))
    }
}

impl Operator {
    /// Apply the operator to a resolved context field. Returns `false` if the operator cannot be
    /// applied or the constraint is misconfigured.
    pub fn eval(
        &self,
        field: Option<&str>,
        constraint: &Constraint,
        context: &EvaluationContext,
    ) -> bool {
        self.try_eval(field, constraint, context).unwrap_or(false)
    }

    fn try_eval(
        &self,
        field: Option<&str>,
        constraint: &Constraint,
        context: &EvaluationContext,
    ) -> Option<bool> {
        match self {
            Self::In | Self::NotIn => {
                let is_in = field.is_some_and(|field| {
                    let field = fold(field, constraint.case_insensitive);
                    constraint
                        .operands()
                        .into_iter()
                        .any(|v| fold(v, constraint.case_insensitive) == field)
                });
                Some(if *self == Self::In { is_in } else { !is_in })
            }

            Self::StrContains | Self::StrStartsWith | Self::StrEndsWith => {
                let field = fold(field?, constraint.case_insensitive);
                Some(constraint.operands().into_iter().any(|v| {
                    let v = fold(v, constraint.case_insensitive);
                    match self {
                        Self::StrContains => field.contains(&*v),
                        Self::StrStartsWith => field.starts_with(&*v),
                        _ => field.ends_with(&*v),
                    }
                }))
            }

            Self::NumLt | Self::NumLte | Self::NumEq | Self::NumGte | Self::NumGt => {
                let field: f64 = field?.trim().parse().ok()?;
                // ANY: one satisfied operand is enough.
                Some(
                    constraint
                        .operands()
                        .into_iter()
                        .filter_map(|v| v.trim().parse::<f64>().ok())
                        .any(|v| match self {
                            Self::NumLt => field < v,
                            Self::NumLte => field <= v,
                            Self::NumEq => field == v,
                            Self::NumGte => field >= v,
                            _ => field > v,
                        }),
                )
            }

            Self::SemverLt | Self::SemverEq | Self::SemverGt => {
                let field = field?;
                let field_version = match Version::parse(field.trim()) {
                    Ok(version) => version,
                    Err(err) => {
                        log::info!(target: "flagkit", version = field;
                            "could not parse version from context: {err}");
                        return None;
                    }
                };

                let versions: Vec<Version> = constraint
                    .operands()
                    .into_iter()
                    .filter_map(|v| match Version::parse(v.trim()) {
                        Ok(version) => Some(version),
                        Err(err) => {
                            let context_name = constraint.context_name.as_str();
                            log::warn!(target: "flagkit", context_name, version = v;
                                "skipping unparsable semver operand: {err}");
                            None
                        }
                    })
                    .collect();
                if versions.is_empty() {
                    return None;
                }

                // ALL: every operand must be satisfied.
                Some(versions.iter().all(|v| {
                    let ordering = field_version.cmp_precedence(v);
                    match self {
                        Self::SemverLt => ordering.is_lt(),
                        Self::SemverEq => ordering.is_eq(),
                        _ => ordering.is_gt(),
                    }
                }))
            }

            Self::DateBefore | Self::DateAfter => {
                let now = field
                    .and_then(parse_date)
                    .or(context.current_time)
                    .unwrap_or_else(Utc::now);
                let operand = constraint.single_operand().and_then(parse_date)?;
                Some(if *self == Self::DateAfter {
                    now > operand
                } else {
                    now < operand
                })
            }

            Self::Unknown => None,
        }
    }
}

fn fold(value: &str, case_insensitive: bool) -> Cow<'_, str> {
    if case_insensitive {
        Cow::Owned(value.to_lowercase())
    } else {
        Cow::Borrowed(value)
    }
}

/// RFC 3339 instants, or local date-times without an offset read as UTC.
pub(crate) fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|date| date.and_utc())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::{
        models::{Constraint, Operator},
        EvaluationContext,
    };

    use super::{constraints_all_match, parse_date};

    fn user(id: &str) -> EvaluationContext {
        EvaluationContext::builder().user_id(id).build()
    }

    fn with_prop(name: &str, value: &str) -> EvaluationContext {
        EvaluationContext::builder().property(name, value).build()
    }

    #[test]
    fn in_and_not_in() {
        let c = Constraint::new("userId", Operator::In, ["alice", "bob"]);
        assert!(c.eval(&user("alice")));
        assert!(!c.eval(&user("charlie")));
        assert!(!c.eval(&EvaluationContext::new()));

        let c = Constraint::new("userId", Operator::NotIn, ["alice", "bob"]);
        assert!(!c.eval(&user("alice")));
        assert!(c.eval(&user("charlie")));
    }

    #[test]
    fn not_in_with_absent_field_is_true() {
        let c = Constraint::new("userId", Operator::NotIn, ["alice"]);
        assert!(c.eval(&EvaluationContext::new()));
        assert!(!c.inverted().eval(&EvaluationContext::new()));
    }

    #[test]
    fn inversion_applies_last() {
        let c = Constraint::new("userId", Operator::In, ["alice"]).inverted();
        assert!(!c.eval(&user("alice")));
        assert!(c.eval(&user("bob")));
        // Absent field: IN is false, inverted gives true.
        assert!(c.eval(&EvaluationContext::new()));
    }

    #[test]
    fn string_operators_respect_case_flag() {
        let ctx = with_prop("email", "Someone@Example.COM");

        let c = Constraint::new("email", Operator::StrEndsWith, ["@example.com"]);
        assert!(!c.eval(&ctx));
        assert!(c.case_insensitive().eval(&ctx));

        let c = Constraint::new("email", Operator::StrStartsWith, ["some", "Some"]);
        assert!(c.eval(&ctx));

        let c = Constraint::new("email", Operator::StrContains, ["EXAMPLE"]).case_insensitive();
        assert!(c.eval(&ctx));

        let c = Constraint::new("email", Operator::StrContains, ["nothing"]);
        assert!(!c.eval(&ctx));
    }

    #[test]
    fn case_insensitive_in() {
        let c = Constraint::new("country", Operator::In, ["NO", "SE"]).case_insensitive();
        assert!(c.eval(&with_prop("country", "no")));
    }

    #[test]
    fn numeric_any_semantics() {
        let c = Constraint::new("age", Operator::NumGt, ["50", "18"]);
        // 20 > 18 although 20 <= 50.
        assert!(c.eval(&with_prop("age", "20")));
        assert!(!c.eval(&with_prop("age", "10")));

        let c = Constraint::single("age", Operator::NumEq, "42");
        assert!(c.eval(&with_prop("age", "42.0")));
        assert!(!c.eval(&with_prop("age", "forty-two")));
    }

    #[test]
    fn numeric_operators() {
        let ctx = with_prop("n", "5");
        assert!(Constraint::single("n", Operator::NumLt, "6").eval(&ctx));
        assert!(Constraint::single("n", Operator::NumLte, "5").eval(&ctx));
        assert!(Constraint::single("n", Operator::NumGte, "5").eval(&ctx));
        assert!(!Constraint::single("n", Operator::NumGt, "5").eval(&ctx));
        assert!(!Constraint::single("missing", Operator::NumLt, "6").eval(&ctx));
    }

    #[test]
    fn semver_all_semantics() {
        let c = Constraint::new("version", Operator::SemverGt, ["1.0.0", "2.0.0"]);
        // 1.5.0 > 1.0.0 but not > 2.0.0.
        assert!(!c.eval(&with_prop("version", "1.5.0")));
        assert!(c.eval(&with_prop("version", "2.1.0")));
    }

    #[test]
    fn semver_prerelease_precedence() {
        let c = Constraint::single("version", Operator::SemverLt, "1.0.0");
        assert!(c.eval(&with_prop("version", "1.0.0-rc.1")));

        let c = Constraint::single("version", Operator::SemverGt, "1.0.0-beta.2");
        assert!(c.eval(&with_prop("version", "1.0.0-beta.11")));

        let c = Constraint::single("version", Operator::SemverEq, "1.0.0+build.1");
        assert!(c.eval(&with_prop("version", "1.0.0+build.2")));
    }

    #[test]
    fn semver_unparsable_operands_are_skipped() {
        let c = Constraint::new("version", Operator::SemverLt, ["not-a-version", "2.0.0"]);
        assert!(c.eval(&with_prop("version", "1.0.0")));

        let c = Constraint::new("version", Operator::SemverLt, ["garbage"]);
        assert!(!c.eval(&with_prop("version", "1.0.0")));

        let c = Constraint::single("version", Operator::SemverLt, "2.0.0");
        assert!(!c.eval(&with_prop("version", "v1")));
    }

    #[test]
    fn date_operators_use_context_time() {
        let time = Utc.with_ymd_and_hms(2022, 1, 22, 0, 0, 0).unwrap();
        let ctx = EvaluationContext::builder().current_time(time).build();

        let now = |operator, value| Constraint::single("currentTime", operator, value).eval(&ctx);

        assert!(now(Operator::DateAfter, "2022-01-21T00:00:00Z"));
        assert!(!now(Operator::DateBefore, "2022-01-21T00:00:00Z"));
        assert!(now(Operator::DateBefore, "2022-01-23T00:00:00.000+01:00"));
    }

    #[test]
    fn date_operators_fall_back_to_now() {
        let ctx = EvaluationContext::new();
        let now = |operator, value| Constraint::single("currentTime", operator, value).eval(&ctx);

        assert!(now(Operator::DateAfter, "2000-01-01T00:00:00Z"));
        assert!(now(Operator::DateBefore, "2999-01-01T00:00:00Z"));
        assert!(!now(Operator::DateAfter, "not a date"));
    }

    #[test]
    fn date_reads_custom_field() {
        let ctx = with_prop("signupDate", "2020-06-01T10:00:00");
        let constraint =
            Constraint::single("signupDate", Operator::DateBefore, "2021-01-01T00:00:00Z");
        assert!(constraint.eval(&ctx));
    }

    #[test]
    fn parses_dates() {
        let expected = Utc.with_ymd_and_hms(2022, 1, 22, 10, 30, 0).unwrap();
        assert_eq!(parse_date("2022-01-22T10:30:00Z"), Some(expected));
        assert_eq!(parse_date("2022-01-22T11:30:00+01:00"), Some(expected));
        assert_eq!(parse_date("2022-01-22T10:30:00"), Some(expected));
        assert_eq!(parse_date("2022-01-22T10:30"), Some(expected));
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn unknown_operator_is_false() {
        let c = Constraint::new("userId", Operator::Unknown, ["alice"]);
        assert!(!c.eval(&user("alice")));
    }

    #[test]
    fn all_constraints_must_match() {
        let constraints = vec![
            Constraint::new("userId", Operator::In, ["alice"]),
            Constraint::new("plan", Operator::In, ["pro"]),
        ];
        let ctx = EvaluationContext::builder()
            .user_id("alice")
            .property("plan", "pro")
            .build();
        assert!(constraints_all_match(&constraints, &ctx));
        assert!(!constraints_all_match(&constraints, &user("alice")));
        assert!(constraints_all_match(&[], &user("alice")));
    }
}

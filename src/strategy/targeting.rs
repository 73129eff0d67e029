use std::{collections::HashMap, net::IpAddr};

use ipnet::IpNet;

use crate::{
    bucketing::{is_within_percentage, parse_percentage},
    EvaluationContext,
};

use super::{split_list, Strategy};

/// `userId` is one of the comma-separated `userIds`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UserWithIdStrategy;

impl Strategy for UserWithIdStrategy {
    fn name(&self) -> &str {
        "userWithId"
    }

    fn is_enabled(
        &self,
        parameters: &HashMap<String, String>,
        context: &EvaluationContext,
    ) -> bool {
        let (Some(user_id), Some(user_ids)) =
            (context.user_id.as_deref(), parameters.get("userIds"))
        else {
            return false;
        };
        split_list(user_ids).any(|id| id == user_id)
    }
}

/// `remoteAddress` matches one of the comma-separated `IPs`, each a single address or a CIDR
/// range.
#[derive(Debug, Default, Clone, Copy)]
pub struct RemoteAddressStrategy;

impl RemoteAddressStrategy {
    fn matches(entry: &str, remote: &str, remote_ip: Option<IpAddr>) -> bool {
        if entry == remote {
            return true;
        }
        let Some(remote_ip) = remote_ip else {
            return false;
        };

        if entry.contains('/') {
            match entry.parse::<IpNet>() {
                Ok(net) => net.contains(&remote_ip),
                Err(_) => {
                    log::warn!(target: "flagkit", entry;
                        "skipping malformed CIDR range in remoteAddress strategy");
                    false
                }
            }
        } else {
            match entry.parse::<IpAddr>() {
                Ok(ip) => ip == remote_ip,
                Err(_) => {
                    log::warn!(target: "flagkit", entry;
                        "skipping malformed address in remoteAddress strategy");
                    false
                }
            }
        }
    }
}

impl Strategy for RemoteAddressStrategy {
    fn name(&self) -> &str {
        "remoteAddress"
    }

    fn is_enabled(
        &self,
        parameters: &HashMap<String, String>,
        context: &EvaluationContext,
    ) -> bool {
        let (Some(remote), Some(ips)) = (context.remote_address.as_deref(), parameters.get("IPs"))
        else {
            return false;
        };
        let remote = remote.trim();
        let remote_ip = remote.parse::<IpAddr>().ok();
        split_list(ips).any(|entry| Self::matches(entry, remote, remote_ip))
    }
}

/// Process hostname is one of the comma-separated `hostNames`, case-insensitively.
///
/// The hostname is resolved once, when the strategy is created.
#[derive(Debug, Clone)]
pub struct ApplicationHostnameStrategy {
    hostname: String,
}

impl ApplicationHostnameStrategy {
    pub fn new() -> ApplicationHostnameStrategy {
        let hostname = std::env::var("hostname")
            .ok()
            .or_else(|| hostname::get().ok().and_then(|name| name.into_string().ok()))
            .unwrap_or_else(|| {
                log::warn!(target: "flagkit", "could not resolve hostname");
                "undefined".to_owned()
            });
        ApplicationHostnameStrategy::with_hostname(hostname)
    }

    pub fn with_hostname(hostname: impl Into<String>) -> ApplicationHostnameStrategy {
        ApplicationHostnameStrategy {
            hostname: hostname.into().to_lowercase(),
        }
    }
}

impl Default for ApplicationHostnameStrategy {
    fn default() -> Self {
        ApplicationHostnameStrategy::new()
    }
}

impl Strategy for ApplicationHostnameStrategy {
    fn name(&self) -> &str {
        "applicationHostname"
    }

    fn is_enabled(
        &self,
        parameters: &HashMap<String, String>,
        _context: &EvaluationContext,
    ) -> bool {
        parameters.get("hostNames").is_some_and(|host_names| {
            split_list(host_names).any(|name| name.to_lowercase() == self.hostname)
        })
    }
}

/// Every field parameter must match the context.
///
/// - `<field>`: comma-separated allow-list for the context field.
/// - `<field>::percentage`: the context field's value is bucketed (grouped by field name) and
///   must fall within the percentage.
///
/// `percentage`, `rollout` and `groupId` are not field parameters. A strategy without any field
/// parameter is off.
#[derive(Debug, Default, Clone, Copy)]
pub struct GradualContextMatchingStrategy;

const PERCENTAGE_SUFFIX: &str = "::percentage";

impl Strategy for GradualContextMatchingStrategy {
    fn name(&self) -> &str {
        "gradualContextMatching"
    }

    fn is_enabled(
        &self,
        parameters: &HashMap<String, String>,
        context: &EvaluationContext,
    ) -> bool {
        let mut has_field = false;
        for (key, value) in parameters {
            if matches!(key.as_str(), "percentage" | "rollout" | "groupId") {
                continue;
            }
            has_field = true;

            let matched = match key.strip_suffix(PERCENTAGE_SUFFIX) {
                Some(field) => context.get_by_name(field).is_some_and(|field_value| {
                    let percentage = parse_percentage(Some(value.as_str()));
                    is_within_percentage(&field_value, field, percentage)
                }),
                None => context
                    .get_by_name(key)
                    .is_some_and(|field_value| {
                        split_list(value).any(|allowed| allowed == field_value)
                    }),
            };
            if !matched {
                return false;
            }
        }
        has_field
    }
}

//! Action types and their static rate limit configuration.
//!
//! Every rate-limited operation belongs to a closed set of [`ActionType`]s.
//! Each action maps to exactly one [`ActionConfig`] in an [`ActionTable`],
//! which is built once at startup (optionally with overrides) and never
//! mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::{LimiterError, Result};

const SECOND_MS: u64 = 1_000;
const MINUTE_MS: u64 = 60 * SECOND_MS;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// A named category of rate-limited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Creating a post or activity
    Create,
    /// Editing existing content
    Update,
    /// Deleting content
    Delete,
    /// Posting a comment
    Comment,
    /// Liking a post or comment
    Like,
    /// Bookmarking a post
    Bookmark,
    /// Following another user
    Follow,
    /// Reporting content to moderators
    Report,
    /// Search queries
    Search,
    /// Media uploads
    Upload,
}

impl ActionType {
    /// Every action type, in declaration order.
    pub const ALL: [ActionType; 10] = [
        ActionType::Create,
        ActionType::Update,
        ActionType::Delete,
        ActionType::Comment,
        ActionType::Like,
        ActionType::Bookmark,
        ActionType::Follow,
        ActionType::Report,
        ActionType::Search,
        ActionType::Upload,
    ];

    /// Stable name used in keys, metrics and configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Create => "create",
            ActionType::Update => "update",
            ActionType::Delete => "delete",
            ActionType::Comment => "comment",
            ActionType::Like => "like",
            ActionType::Bookmark => "bookmark",
            ActionType::Follow => "follow",
            ActionType::Report => "report",
            ActionType::Search => "search",
            ActionType::Upload => "upload",
        }
    }

    /// Built-in configuration for this action.
    fn default_config(&self) -> ActionConfig {
        match self {
            ActionType::Create => ActionConfig::new(
                HOUR_MS,
                10,
                "You are creating posts too quickly. Please try again later.",
            ),
            ActionType::Update => ActionConfig::new(
                15 * MINUTE_MS,
                30,
                "Too many edits. Please wait a few minutes before editing again.",
            ),
            ActionType::Delete => ActionConfig::new(
                15 * MINUTE_MS,
                20,
                "Too many deletions. Please wait a few minutes.",
            ),
            ActionType::Comment => ActionConfig::new(
                5 * MINUTE_MS,
                20,
                "You are commenting too quickly. Please slow down.",
            ),
            ActionType::Like => ActionConfig::new(
                MINUTE_MS,
                60,
                "Too many likes in a short time. Please slow down.",
            ),
            ActionType::Bookmark => ActionConfig::new(
                MINUTE_MS,
                30,
                "Too many bookmarks in a short time. Please slow down.",
            ),
            ActionType::Follow => ActionConfig::new(
                HOUR_MS,
                50,
                "You are following users too quickly. Please try again later.",
            ),
            ActionType::Report => ActionConfig::new(
                HOUR_MS,
                5,
                "Too many reports submitted. Please try again later.",
            ),
            ActionType::Search => ActionConfig::new(
                MINUTE_MS,
                60,
                "Too many searches. Please wait a moment.",
            ),
            ActionType::Upload => ActionConfig::new(
                HOUR_MS,
                20,
                "Upload limit reached. Please try again later.",
            ),
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self> {
        ActionType::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| LimiterError::Config(format!("unknown action type: {}", s)))
    }
}

/// Rate limit configuration for a single action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Length of the fixed window in milliseconds
    pub window_ms: u64,
    /// Maximum requests allowed in one window
    pub max_requests: u64,
    /// Human-readable denial reason surfaced to the caller
    pub message: String,
}

impl ActionConfig {
    /// Create a new action configuration.
    pub fn new(window_ms: u64, max_requests: u64, message: impl Into<String>) -> Self {
        Self {
            window_ms,
            max_requests,
            message: message.into(),
        }
    }

    /// The window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// A partial override for one action, applied on top of the built-in table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOverride {
    #[serde(default)]
    pub window_ms: Option<u64>,
    #[serde(default)]
    pub max_requests: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The complete action → configuration mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTable {
    configs: HashMap<ActionType, ActionConfig>,
}

impl Default for ActionTable {
    fn default() -> Self {
        let configs = ActionType::ALL
            .iter()
            .map(|action| (*action, action.default_config()))
            .collect();
        Self { configs }
    }
}

impl ActionTable {
    /// Build the default table with the given overrides applied.
    pub fn with_overrides(overrides: &HashMap<ActionType, ActionOverride>) -> Self {
        let mut table = Self::default();
        for (action, ov) in overrides {
            let config = table.entry_mut(*action);
            if let Some(window_ms) = ov.window_ms {
                config.window_ms = window_ms;
            }
            if let Some(max_requests) = ov.max_requests {
                config.max_requests = max_requests;
            }
            if let Some(ref message) = ov.message {
                config.message = message.clone();
            }
        }
        table
    }

    /// Replace the configuration for one action while building a table.
    pub fn set(mut self, action: ActionType, config: ActionConfig) -> Self {
        self.configs.insert(action, config);
        self
    }

    /// Get the configuration for an action.
    pub fn get(&self, action: ActionType) -> &ActionConfig {
        // Every variant is inserted by `default()` and entries are never removed.
        &self.configs[&action]
    }

    fn entry_mut(&mut self, action: ActionType) -> &mut ActionConfig {
        self.configs
            .entry(action)
            .or_insert_with(|| action.default_config())
    }

    /// Iterate over the table in action declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (ActionType, &ActionConfig)> {
        ActionType::ALL
            .into_iter()
            .map(move |action| (action, self.get(action)))
    }

    /// The longest window across all actions.
    pub fn longest_window(&self) -> Duration {
        self.configs
            .values()
            .map(ActionConfig::window)
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

/// Caller role used to scale quotas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular member
    #[default]
    Standard,
    /// Trusted or moderator accounts
    Elevated,
    /// Administrators
    Admin,
}

impl std::str::FromStr for Role {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "standard" => Ok(Role::Standard),
            "elevated" => Ok(Role::Elevated),
            "admin" => Ok(Role::Admin),
            other => Err(LimiterError::Config(format!("unknown role: {}", other))),
        }
    }
}

/// Static per-role quota multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMultipliers {
    #[serde(default = "default_standard_multiplier")]
    pub standard: u64,
    #[serde(default = "default_elevated_multiplier")]
    pub elevated: u64,
    #[serde(default = "default_admin_multiplier")]
    pub admin: u64,
}

impl Default for RoleMultipliers {
    fn default() -> Self {
        Self {
            standard: default_standard_multiplier(),
            elevated: default_elevated_multiplier(),
            admin: default_admin_multiplier(),
        }
    }
}

fn default_standard_multiplier() -> u64 {
    1
}

fn default_elevated_multiplier() -> u64 {
    10
}

fn default_admin_multiplier() -> u64 {
    50
}

impl RoleMultipliers {
    /// The multiplier for a role.
    pub fn for_role(&self, role: Role) -> u64 {
        match role {
            Role::Standard => self.standard,
            Role::Elevated => self.elevated,
            Role::Admin => self.admin,
        }
    }

    /// Return a copy of `base` with `max_requests` scaled for `role`.
    pub fn apply(&self, base: &ActionConfig, role: Role) -> ActionConfig {
        ActionConfig {
            max_requests: base.max_requests.saturating_mul(self.for_role(role)),
            ..base.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_covers_every_action() {
        let table = ActionTable::default();
        for action in ActionType::ALL {
            let config = table.get(action);
            assert!(config.max_requests > 0, "{} has no quota", action);
            assert!(config.window_ms > 0, "{} has no window", action);
            assert!(!config.message.is_empty());
        }
    }

    #[test]
    fn test_action_names_round_trip_through_from_str() {
        for action in ActionType::ALL {
            assert_eq!(action.as_str().parse::<ActionType>().unwrap(), action);
        }
        assert!("retweet".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_overrides_are_partial() {
        let mut overrides = HashMap::new();
        overrides.insert(
            ActionType::Like,
            ActionOverride {
                max_requests: Some(3),
                ..Default::default()
            },
        );

        let table = ActionTable::with_overrides(&overrides);
        let like = table.get(ActionType::Like);
        assert_eq!(like.max_requests, 3);
        assert_eq!(like.window_ms, MINUTE_MS);
        assert_eq!(like.message, ActionType::Like.default_config().message);
        assert_eq!(table.get(ActionType::Follow), &ActionType::Follow.default_config());
    }

    #[test]
    fn test_longest_window() {
        let table = ActionTable::default().set(
            ActionType::Search,
            ActionConfig::new(24 * HOUR_MS, 1, "daily"),
        );
        assert_eq!(table.longest_window(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_role_multiplier_does_not_mutate_base() {
        let multipliers = RoleMultipliers::default();
        let base = ActionConfig::new(MINUTE_MS, 10, "slow down");

        let elevated = multipliers.apply(&base, Role::Elevated);
        assert_eq!(elevated.max_requests, 100);
        assert_eq!(elevated.window_ms, base.window_ms);
        assert_eq!(base.max_requests, 10);

        let standard = multipliers.apply(&base, Role::Standard);
        assert_eq!(standard, base);
    }

    #[test]
    fn test_overrides_parse_from_yaml() {
        let yaml = r#"
like:
  max_requests: 5
comment:
  window_ms: 1000
  message: "hold on"
"#;
        let overrides: HashMap<ActionType, ActionOverride> = serde_yaml::from_str(yaml).unwrap();
        let table = ActionTable::with_overrides(&overrides);
        assert_eq!(table.get(ActionType::Like).max_requests, 5);
        assert_eq!(table.get(ActionType::Comment).window_ms, 1000);
        assert_eq!(table.get(ActionType::Comment).message, "hold on");
    }
}

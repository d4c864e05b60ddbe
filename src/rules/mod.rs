//! # Gateway Rules
//!
//! Blacklist rules and route rules are independent aggregates that share one storage
//! scheme: each rule type owns a Redis hash whose fields are rule ids and whose values
//! are the rule serialized as JSON. Blacklist rules also own a second hash of visit
//! counters, kept apart from the rule body so increments never rewrite the JSON.
//!
//! `RuleType` is the closed set of rule categories and knows its own key names.
//! `Rule` ties a concrete struct to its category so the store can be generic.

pub mod model;
pub mod store;

pub use model::{BlacklistRule, FilterArg, FilterDefinition, PredicateDefinition, RouteRule};
pub use store::RuleStore;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::core::error::FieldError;

/// Rule categories and their key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleType {
    Blacklist,
    Route,
}

impl RuleType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Blacklist => "blacklist",
            Self::Route => "route",
        }
    }

    /// Hash holding rule bodies, e.g. `gateway:rule:blacklist`
    pub fn hash_key(&self, prefix: &str) -> String {
        format!("{}rule:{}", prefix, self.name())
    }

    /// Hash holding visit counters, e.g. `gateway:rule:blacklist:visits`
    pub fn visits_key(&self, prefix: &str) -> String {
        format!("{}rule:{}:visits", prefix, self.name())
    }

    /// Whether reads merge the visit counter into the rule
    pub fn tracks_visits(&self) -> bool {
        matches!(self, Self::Blacklist)
    }
}

/// A rule struct the [`RuleStore`] can persist
pub trait Rule: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const RULE_TYPE: RuleType;

    fn id(&self) -> Option<&str>;

    fn set_id(&mut self, id: String);

    fn create_time(&self) -> Option<DateTime<Utc>>;

    fn set_create_time(&mut self, at: DateTime<Utc>);

    /// Overwrite the derived visit count; rule types without counters ignore it
    fn set_visits(&mut self, _visits: u64) {}

    /// Field-level validation, empty when the rule is acceptable
    fn validate(&self) -> Vec<FieldError>;
}

/// Fill in a missing id (UUID v4, simple form) and creation time; returns the id
pub fn assign_identity<R: Rule>(rule: &mut R) -> String {
    let id = match rule.id() {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => {
            let id = Uuid::new_v4().simple().to_string();
            rule.set_id(id.clone());
            id
        }
    };
    if rule.create_time().is_none() {
        rule.set_create_time(Utc::now());
    }
    id
}

//! Domain enums shared between the API and billing crates

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Returned when a stored string does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Role of a user inside an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Owner => "owner",
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }

    /// Only owners may change what an organization pays for
    pub fn can_manage_billing(&self) -> bool {
        matches!(self, MemberRole::Owner)
    }
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MemberRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "owner" => Ok(MemberRole::Owner),
            "admin" => Ok(MemberRole::Admin),
            "member" => Ok(MemberRole::Member),
            other => Err(ParseEnumError {
                kind: "member role",
                value: other.to_string(),
            }),
        }
    }
}

/// Subscription state of an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    #[default]
    None,
    Active,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::None => "none",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(SubscriptionStatus::None),
            "active" => Ok(SubscriptionStatus::Active),
            // Older rows were written with the American spelling
            "cancelled" | "canceled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(ParseEnumError {
                kind: "subscription status",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_owner_manages_billing() {
        assert!(MemberRole::Owner.can_manage_billing());
        assert!(!MemberRole::Admin.can_manage_billing());
        assert!(!MemberRole::Member.can_manage_billing());
    }

    #[test]
    fn test_member_role_parsing() {
        assert_eq!("owner".parse::<MemberRole>().unwrap(), MemberRole::Owner);
        assert_eq!("ADMIN".parse::<MemberRole>().unwrap(), MemberRole::Admin);
        let err = "viewer".parse::<MemberRole>().unwrap_err();
        assert_eq!(err.value, "viewer");
    }

    #[test]
    fn test_subscription_status_accepts_both_spellings() {
        assert_eq!(
            "canceled".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Cancelled
        );
        assert_eq!(
            "cancelled".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Cancelled
        );
        assert_eq!(SubscriptionStatus::default(), SubscriptionStatus::None);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&SubscriptionStatus::Active).unwrap();
        assert_eq!(json, "\"active\"");
        let role: MemberRole = serde_json::from_str("\"member\"").unwrap();
        assert_eq!(role, MemberRole::Member);
    }
}

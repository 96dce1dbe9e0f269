use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::api_key::ApiKey;

pub const SCOPE_ADMIN: &str = "admin";
pub const SCOPE_WILDCARD: &str = "*";
pub const SCOPE_API_MANAGE: &str = "api:manage";
pub const SCOPE_WORKFLOWS_EXECUTE: &str = "workflows:execute";
pub const SCOPE_METRICS_READ: &str = "metrics:read";

/// Every scope an operator may grant, with a short description.
pub const KNOWN_SCOPES: &[(&str, &str)] = &[
    ("user", "Basic user access"),
    (SCOPE_ADMIN, "Administrative access"),
    ("notion:read", "Read Notion data"),
    ("notion:write", "Write Notion data"),
    ("slack:read", "Read Slack data"),
    ("slack:write", "Write Slack data"),
    (SCOPE_WORKFLOWS_EXECUTE, "Execute workflows"),
    (SCOPE_API_MANAGE, "Manage API keys"),
    ("users:manage", "Manage users"),
    (SCOPE_METRICS_READ, "Read system metrics"),
];

pub fn is_known_scope(scope: &str) -> bool {
    scope == SCOPE_WILDCARD || KNOWN_SCOPES.iter().any(|(name, _)| *name == scope)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    PowerUser,
    Admin,
}

impl Role {
    pub fn scopes(self) -> BTreeSet<String> {
        let names: Vec<&str> = match self {
            Self::User => vec!["user", "notion:read", "slack:read"],
            Self::PowerUser => vec![
                "user",
                "notion:read",
                "notion:write",
                "slack:read",
                "slack:write",
                SCOPE_WORKFLOWS_EXECUTE,
            ],
            Self::Admin => KNOWN_SCOPES.iter().map(|(name, _)| *name).collect(),
        };
        names.into_iter().map(str::to_string).collect()
    }
}

/// Requested scopes plus everything `role` grants.
pub fn with_role_scopes(mut scopes: Vec<String>, role: Option<Role>) -> Vec<String> {
    if let Some(role) = role {
        scopes.extend(role.scopes());
    }
    scopes
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "power_user" => Ok(Self::PowerUser),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role `{other}` (expected user|power_user|admin)")),
        }
    }
}

/// Decides whether a key's scope set covers a required scope.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScopePolicy {
    legacy_open_scopes: bool,
}

impl ScopePolicy {
    pub fn new(legacy_open_scopes: bool) -> Self {
        Self { legacy_open_scopes }
    }

    pub fn legacy_open_scopes(&self) -> bool {
        self.legacy_open_scopes
    }

    pub fn allows(&self, key: &ApiKey, required: &str) -> bool {
        if key.scopes.is_empty() {
            if self.legacy_open_scopes {
                warn!(
                    event_name = "auth.scope.legacy_open",
                    key_id = %key.key_id,
                    required,
                    "granting access to key with empty scope set"
                );
                return true;
            }
            return false;
        }

        key.scopes.contains(required)
            || key.scopes.contains(SCOPE_ADMIN)
            || key.scopes.contains(SCOPE_WILDCARD)
    }

    /// Checks that `grantor` may mint a key holding `requested`.
    ///
    /// Full-access keys may grant anything. Other keys may only grant a subset
    /// of their own scopes. On failure returns the first scope out of reach.
    pub fn check_grant(
        &self,
        grantor: &ApiKey,
        requested: &BTreeSet<String>,
    ) -> Result<(), String> {
        if self.allows(grantor, SCOPE_ADMIN) {
            return Ok(());
        }
        // An empty set is itself full access under legacy open scopes.
        if requested.is_empty() && self.legacy_open_scopes {
            return Err(SCOPE_WILDCARD.to_string());
        }
        match requested.iter().find(|scope| !grantor.scopes.contains(*scope)) {
            Some(scope) => Err(scope.clone()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;

    use super::{is_known_scope, with_role_scopes, Role, ScopePolicy, SCOPE_API_MANAGE};
    use crate::domain::api_key::{ApiKey, KeyId, UsageCounters};

    fn key_with(scopes: &[&str]) -> ApiKey {
        let now = Utc::now();
        ApiKey {
            key_id: KeyId("kid_test".to_owned()),
            key_hash: "digest".to_owned(),
            name: "test".to_owned(),
            scopes: scopes.iter().map(|scope| scope.to_string()).collect(),
            quota_per_hour: 10,
            active: true,
            created_at: now,
            expires_at: None,
            last_used_at: None,
            usage: UsageCounters::new(now),
        }
    }

    #[test]
    fn explicit_scope_admin_and_wildcard_pass() {
        let policy = ScopePolicy::default();

        assert!(policy.allows(&key_with(&["notion:read"]), "notion:read"));
        assert!(!policy.allows(&key_with(&["notion:read"]), "notion:write"));
        assert!(policy.allows(&key_with(&["admin"]), "notion:write"));
        assert!(policy.allows(&key_with(&["*"]), SCOPE_API_MANAGE));
    }

    #[test]
    fn empty_scopes_depend_on_legacy_flag() {
        let key = key_with(&[]);

        assert!(!ScopePolicy::new(false).allows(&key, "notion:read"));
        assert!(ScopePolicy::new(true).allows(&key, "notion:read"));
    }

    #[test]
    fn roles_expand_to_known_scopes() {
        let admin = Role::Admin.scopes();
        assert!(admin.contains("admin"));
        assert!(admin.iter().all(|scope| is_known_scope(scope)));

        let power_user = Role::PowerUser.scopes();
        assert!(power_user.contains("workflows:execute"));
        assert!(!power_user.contains(SCOPE_API_MANAGE));

        let user: BTreeSet<String> = Role::User.scopes();
        assert_eq!(user.len(), 3);
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn roles_merge_with_explicit_scopes() {
        let merged = with_role_scopes(vec![SCOPE_API_MANAGE.to_owned()], Some(Role::User));
        assert!(merged.iter().any(|scope| scope == SCOPE_API_MANAGE));
        assert!(merged.iter().any(|scope| scope == "slack:read"));
        assert_eq!(with_role_scopes(vec!["user".to_owned()], None), vec!["user".to_owned()]);
    }

    fn scope_set(scopes: &[&str]) -> BTreeSet<String> {
        scopes.iter().map(|scope| scope.to_string()).collect()
    }

    #[test]
    fn narrow_keys_cannot_grant_beyond_their_own_scopes() {
        let policy = ScopePolicy::default();
        let manager = key_with(&[SCOPE_API_MANAGE, "notion:read"]);

        assert!(policy.check_grant(&manager, &scope_set(&["notion:read"])).is_ok());
        assert_eq!(policy.check_grant(&manager, &scope_set(&["*"])), Err("*".to_owned()));
        assert_eq!(policy.check_grant(&manager, &scope_set(&["admin"])), Err("admin".to_owned()));
        assert_eq!(
            policy.check_grant(&manager, &scope_set(&["notion:read", "notion:write"])),
            Err("notion:write".to_owned())
        );
    }

    #[test]
    fn full_access_keys_grant_anything() {
        let policy = ScopePolicy::default();
        let everything = scope_set(&["*", "admin", "users:manage"]);

        assert!(policy.check_grant(&key_with(&["admin"]), &everything).is_ok());
        assert!(policy.check_grant(&key_with(&["*"]), &everything).is_ok());
        assert!(ScopePolicy::new(true).check_grant(&key_with(&[]), &everything).is_ok());
    }

    #[test]
    fn empty_grant_is_full_access_only_in_legacy_mode() {
        let manager = key_with(&[SCOPE_API_MANAGE]);

        assert!(ScopePolicy::new(false).check_grant(&manager, &BTreeSet::new()).is_ok());
        assert!(ScopePolicy::new(true).check_grant(&manager, &BTreeSet::new()).is_err());
    }
}

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    AuthzError,
    permission::{WILDCARD, split_name},
    role::{KnownRole, RoleMetadata},
};

const BUILTIN_CATALOG: &str = include_str!("../../../catalog/rbac.json");

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PermissionSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(default)]
    pub description: String,
}

impl PermissionSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource: String::new(),
            action: String::new(),
            description: description.into(),
        }
    }

    pub fn wildcard() -> Self {
        Self::new(WILDCARD, "Every capability")
    }

    /// Explicit resource/action, falling back to the halves of `name`.
    pub fn resource_action(&self) -> (String, String) {
        let name = self.name.trim();
        let (derived_resource, derived_action) = split_name(name).unwrap_or((name, name));
        let resource = if self.resource.is_empty() {
            derived_resource
        } else {
            self.resource.as_str()
        };
        let action = if self.action.is_empty() {
            derived_action
        } else {
            self.action.as_str()
        };
        (resource.to_string(), action.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoleSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RoleMetadata>,
}

impl RoleSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            metadata: None,
        }
    }

    pub fn known(&self) -> Result<KnownRole, AuthzError> {
        self.name.parse()
    }

    pub fn resolved_metadata(&self) -> Result<RoleMetadata, AuthzError> {
        let known = self.known()?;
        Ok(self.metadata.unwrap_or_else(|| known.default_metadata()))
    }
}

/// Declarative description of every permission, role and grant.
///
/// The JSON form is checked in under `catalog/` and seeding reconciles the
/// database against it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Catalog {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub permissions: Vec<PermissionSpec>,
    #[serde(default)]
    pub roles: Vec<RoleSpec>,
    #[serde(default)]
    pub grants: BTreeMap<String, Vec<String>>,
}

impl Catalog {
    pub fn builtin() -> Result<Self, AuthzError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn from_json(raw: &str) -> Result<Self, AuthzError> {
        let catalog: Catalog =
            serde_json::from_str(raw).map_err(|err| AuthzError::InvalidCatalog(err.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn to_json_pretty(&self) -> Result<String, AuthzError> {
        serde_json::to_string_pretty(self).map_err(|err| AuthzError::InvalidCatalog(err.to_string()))
    }

    pub fn with_permission(mut self, spec: PermissionSpec) -> Self {
        self.permissions.push(spec);
        self
    }

    pub fn with_role(mut self, spec: RoleSpec) -> Self {
        self.roles.push(spec);
        self
    }

    pub fn with_grants<I, S>(mut self, role: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grants
            .insert(role.into(), permissions.into_iter().map(Into::into).collect());
        self
    }

    /// Permission names granted to `role`, in declaration order.
    pub fn grants_for(&self, role: &str) -> &[String] {
        self.grants.get(role).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn role_names(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(|role| role.name.as_str())
    }

    /// Structural checks. Grants naming undeclared permissions pass here and
    /// are skipped during seeding instead.
    pub fn validate(&self) -> Result<(), AuthzError> {
        let mut seen = HashSet::new();
        for permission in &self.permissions {
            let name = permission.name.trim();
            if name.is_empty() {
                return Err(AuthzError::EmptyPermissionName);
            }
            if !seen.insert(name) {
                return Err(AuthzError::DuplicatePermission(name.to_string()));
            }
        }

        let mut roles = HashSet::new();
        for role in &self.roles {
            role.known()?;
            if !roles.insert(role.name.as_str()) {
                return Err(AuthzError::DuplicateRole(role.name.clone()));
            }
        }

        if let Some(role) = self.grants.keys().find(|name| !roles.contains(name.as_str())) {
            return Err(AuthzError::UndeclaredRole(role.clone()));
        }

        let master = KnownRole::MasterAdmin.as_str();
        if roles.contains(master) && !self.grants_for(master).iter().any(|p| p == WILDCARD) {
            return Err(AuthzError::MissingWildcardGrant(master.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = Catalog::builtin().unwrap();
        assert_eq!(catalog.roles.len(), 10);
        assert_eq!(catalog.permissions.len(), 53);
        for role in KnownRole::ALL {
            assert!(catalog.role_names().any(|name| name == role.as_str()));
        }
        assert_eq!(catalog.grants_for("Master Admin"), ["*".to_string()]);

        let declared: HashSet<&str> = catalog.permissions.iter().map(|p| p.name.as_str()).collect();
        for (role, grants) in &catalog.grants {
            for grant in grants.iter().filter(|g| g.as_str() != WILDCARD) {
                assert!(declared.contains(grant.as_str()), "{role} grants undeclared {grant}");
            }
        }
    }

    #[test]
    fn resource_action_derivation() {
        assert_eq!(
            PermissionSpec::new("content.publish", "").resource_action(),
            ("content".to_string(), "publish".to_string())
        );
        let mut explicit = PermissionSpec::new("files.media.view", "");
        explicit.action = "media.view".into();
        assert_eq!(
            explicit.resource_action(),
            ("files".to_string(), "media.view".to_string())
        );
        assert_eq!(
            PermissionSpec::new(" content.read\n", "").resource_action(),
            ("content".to_string(), "read".to_string())
        );
        assert_eq!(
            PermissionSpec::wildcard().resource_action(),
            ("*".to_string(), "*".to_string())
        );
    }

    #[test]
    fn rejects_structural_errors() {
        let dup = Catalog::default()
            .with_permission(PermissionSpec::new("content.read", ""))
            .with_permission(PermissionSpec::new("content.read", ""));
        assert_eq!(
            dup.validate(),
            Err(AuthzError::DuplicatePermission("content.read".into()))
        );

        let unknown = Catalog::default().with_role(RoleSpec::new("Intern", ""));
        assert_eq!(unknown.validate(), Err(AuthzError::UnknownRole("Intern".into())));

        let undeclared = Catalog::default()
            .with_role(RoleSpec::new("Reviewers", ""))
            .with_grants("Contributors", ["content.create"]);
        assert_eq!(
            undeclared.validate(),
            Err(AuthzError::UndeclaredRole("Contributors".into()))
        );

        let no_wildcard = Catalog::default()
            .with_role(RoleSpec::new("Master Admin", ""))
            .with_grants("Master Admin", ["content.create"]);
        assert_eq!(
            no_wildcard.validate(),
            Err(AuthzError::MissingWildcardGrant("Master Admin".into()))
        );
    }

    #[test]
    fn explicit_metadata_wins_over_defaults() {
        let raw = r#"{
            "permissions": [{"name": "content.review"}],
            "roles": [
                {"name": "Reviewers", "metadata": {"access_level": 3, "is_admin": true}},
                {"name": "Contributors"}
            ],
            "grants": {"Reviewers": ["content.review", "content.bogus"]}
        }"#;
        let catalog = Catalog::from_json(raw).unwrap();
        let reviewers = catalog.roles[0].resolved_metadata().unwrap();
        assert_eq!(reviewers.access_level, 3);
        assert!(reviewers.is_admin);
        assert!(!reviewers.can_manage_users);
        assert_eq!(
            catalog.roles[1].resolved_metadata().unwrap(),
            KnownRole::Contributors.default_metadata()
        );
        assert!(catalog.grants_for("Contributors").is_empty());
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(
            Catalog::from_json("{ not json"),
            Err(AuthzError::InvalidCatalog(_))
        ));
    }
}

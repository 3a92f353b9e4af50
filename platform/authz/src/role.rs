use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{AuthzError, permission::covers};

/// The fixed set of administrative roles recognized by the console.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum KnownRole {
    MasterAdmin,
    Webmaster,
    ContentAdmin,
    EditorInChief,
    SectionEditors,
    SeniorWriters,
    StaffWriters,
    Contributors,
    Reviewers,
    SocialMediaManager,
}

impl KnownRole {
    pub const ALL: [KnownRole; 10] = [
        KnownRole::MasterAdmin,
        KnownRole::Webmaster,
        KnownRole::ContentAdmin,
        KnownRole::EditorInChief,
        KnownRole::SectionEditors,
        KnownRole::SeniorWriters,
        KnownRole::StaffWriters,
        KnownRole::Contributors,
        KnownRole::Reviewers,
        KnownRole::SocialMediaManager,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            KnownRole::MasterAdmin => "Master Admin",
            KnownRole::Webmaster => "Webmaster",
            KnownRole::ContentAdmin => "Content Admin",
            KnownRole::EditorInChief => "Editor-in-Chief",
            KnownRole::SectionEditors => "Section Editors",
            KnownRole::SeniorWriters => "Senior Writers",
            KnownRole::StaffWriters => "Staff Writers",
            KnownRole::Contributors => "Contributors",
            KnownRole::Reviewers => "Reviewers",
            KnownRole::SocialMediaManager => "Social Media Manager",
        }
    }

    pub fn access_level(self) -> i32 {
        match self {
            KnownRole::MasterAdmin => 10,
            KnownRole::Webmaster => 9,
            KnownRole::ContentAdmin => 8,
            KnownRole::EditorInChief => 7,
            KnownRole::SectionEditors => 6,
            KnownRole::SeniorWriters => 5,
            KnownRole::StaffWriters => 4,
            KnownRole::Contributors => 3,
            KnownRole::Reviewers => 2,
            KnownRole::SocialMediaManager => 1,
        }
    }

    /// Metadata applied when a catalog entry does not spell it out.
    pub fn default_metadata(self) -> RoleMetadata {
        let admin = matches!(
            self,
            KnownRole::MasterAdmin | KnownRole::Webmaster | KnownRole::ContentAdmin
        );
        let manager = matches!(self, KnownRole::MasterAdmin | KnownRole::Webmaster);
        RoleMetadata {
            access_level: self.access_level(),
            is_admin: admin,
            can_manage_users: manager,
            can_manage_roles: manager,
        }
    }
}

impl FromStr for KnownRole {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        KnownRole::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| AuthzError::UnknownRole(value.to_string()))
    }
}

impl fmt::Display for KnownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability flags stored alongside a role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoleMetadata {
    pub access_level: i32,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub can_manage_users: bool,
    #[serde(default)]
    pub can_manage_roles: bool,
}

/// A role together with the permission set it holds.
///
/// Every check is default-deny: absent keys, empty keys and roles with no
/// permissions all evaluate to `false`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedRole {
    pub name: String,
    #[serde(flatten)]
    pub metadata: RoleMetadata,
    permissions: BTreeSet<String>,
}

impl ResolvedRole {
    pub fn new<I, S>(name: impl Into<String>, metadata: RoleMetadata, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            metadata,
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn permissions(&self) -> impl Iterator<Item = &str> {
        self.permissions.iter().map(String::as_str)
    }

    pub fn permission_count(&self) -> usize {
        self.permissions.len()
    }

    pub fn has_permission(&self, key: Option<&str>) -> bool {
        let Some(key) = key.filter(|key| !key.is_empty()) else {
            return false;
        };
        if self.permissions.contains(key) {
            return true;
        }
        self.permissions.iter().any(|grant| covers(grant, key))
    }

    pub fn has_any_permission<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> bool {
        keys.into_iter().any(|key| self.has_permission(Some(key)))
    }

    /// `false` for an empty key list.
    pub fn has_all_permissions<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> bool {
        let mut any = false;
        for key in keys {
            if !self.has_permission(Some(key)) {
                return false;
            }
            any = true;
        }
        any
    }

    pub fn require_permission(&self, key: &str) -> Result<(), AuthzError> {
        if self.has_permission(Some(key)) {
            Ok(())
        } else {
            Err(self.denied(key))
        }
    }

    pub fn require_admin(&self) -> Result<(), AuthzError> {
        self.require_flag(self.metadata.is_admin, "admin")
    }

    pub fn require_user_management(&self) -> Result<(), AuthzError> {
        self.require_flag(self.metadata.can_manage_users, "user_management")
    }

    pub fn require_role_management(&self) -> Result<(), AuthzError> {
        self.require_flag(self.metadata.can_manage_roles, "role_management")
    }

    fn require_flag(&self, flag: bool, what: &str) -> Result<(), AuthzError> {
        if flag { Ok(()) } else { Err(self.denied(what)) }
    }

    fn denied(&self, permission: &str) -> AuthzError {
        AuthzError::Denied {
            role: self.name.clone(),
            permission: permission.to_string(),
        }
    }
}

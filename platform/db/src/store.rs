use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
};

use chrono::Utc;
use entity::{permission, role, role_permission};
use platform_authz::{AuthzError, PermissionSpec, ResolvedRole, RoleMetadata, RoleSpec};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait, prelude::DateTimeWithTimeZone,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{DbError, DbResult};

/// What `ensure_role` does with metadata of a role that already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RoleMetadataPolicy {
    /// Bring stored flags and access level in line with the catalog.
    #[default]
    Overwrite,
    /// Only create missing roles; leave existing rows untouched.
    Preserve,
}

impl FromStr for RoleMetadataPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "preserve" => Ok(Self::Preserve),
            other => Err(format!("unknown role metadata policy {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleChange {
    Created,
    Updated,
    Unchanged,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AssignmentReport {
    pub role_id: Uuid,
    pub granted: Vec<String>,
    pub skipped: Vec<String>,
    pub revoked: u64,
}

/// Find-or-create a permission by its unique name.
///
/// Existing rows are returned as stored; a differing description is not
/// written back.
#[instrument(name = "rbac.ensure_permission", skip_all, fields(permission = %spec.name))]
pub async fn ensure_permission<C>(
    conn: &C,
    spec: &PermissionSpec,
) -> DbResult<(permission::Model, bool)>
where
    C: ConnectionTrait,
{
    let name = spec.name.trim();
    if name.is_empty() {
        return Err(AuthzError::EmptyPermissionName.into());
    }
    if let Some(existing) = permission::Entity::find()
        .filter(permission::Column::Name.eq(name))
        .one(conn)
        .await?
    {
        debug!("permission already exists");
        return Ok((existing, false));
    }

    let (resource, action) = spec.resource_action();
    let created = permission::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        resource: Set(resource),
        action: Set(action),
        description: Set(spec.description.clone()),
        created_at: Set(Utc::now().into()),
    }
    .insert(conn)
    .await?;
    info!("permission created");
    Ok((created, true))
}

/// Find-or-create a role by name. The name must be one of the recognized
/// roles.
#[instrument(name = "rbac.ensure_role", skip_all, fields(role = %spec.name))]
pub async fn ensure_role<C>(
    conn: &C,
    spec: &RoleSpec,
    policy: RoleMetadataPolicy,
) -> DbResult<(role::Model, RoleChange)>
where
    C: ConnectionTrait,
{
    let metadata = spec.resolved_metadata()?;
    let now: DateTimeWithTimeZone = Utc::now().into();

    let Some(existing) = role::Entity::find()
        .filter(role::Column::Name.eq(spec.name.as_str()))
        .one(conn)
        .await?
    else {
        let created = role::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(spec.name.clone()),
            description: Set(spec.description.clone()),
            access_level: Set(metadata.access_level),
            is_admin: Set(metadata.is_admin),
            can_manage_users: Set(metadata.can_manage_users),
            can_manage_roles: Set(metadata.can_manage_roles),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;
        info!("role created");
        return Ok((created, RoleChange::Created));
    };

    if policy == RoleMetadataPolicy::Preserve || !drifted(&existing, spec, &metadata) {
        debug!("role already exists");
        return Ok((existing, RoleChange::Unchanged));
    }

    let mut active: role::ActiveModel = existing.into();
    active.description = Set(spec.description.clone());
    active.access_level = Set(metadata.access_level);
    active.is_admin = Set(metadata.is_admin);
    active.can_manage_users = Set(metadata.can_manage_users);
    active.can_manage_roles = Set(metadata.can_manage_roles);
    active.updated_at = Set(now);
    let updated = active.update(conn).await?;
    info!(access_level = metadata.access_level, "role metadata updated");
    Ok((updated, RoleChange::Updated))
}

fn drifted(existing: &role::Model, spec: &RoleSpec, metadata: &RoleMetadata) -> bool {
    existing.description != spec.description || stored_metadata(existing) != *metadata
}

fn stored_metadata(model: &role::Model) -> RoleMetadata {
    RoleMetadata {
        access_level: model.access_level,
        is_admin: model.is_admin,
        can_manage_users: model.can_manage_users,
        can_manage_roles: model.can_manage_roles,
    }
}

/// Replace the full permission set of a role.
///
/// Runs in its own transaction (a savepoint when `conn` already is one), so a
/// failure leaves the previous assignment intact. Names that do not resolve
/// to a stored permission are skipped and logged.
#[instrument(name = "rbac.assign_permissions", skip(conn, names))]
pub async fn assign_permissions<C, S>(
    conn: &C,
    role_id: Uuid,
    names: &[S],
) -> DbResult<AssignmentReport>
where
    C: ConnectionTrait + TransactionTrait,
    S: AsRef<str>,
{
    let txn = conn.begin().await?;
    let report = replace_assignments(&txn, role_id, names).await?;
    txn.commit().await?;
    info!(
        granted = report.granted.len(),
        skipped = report.skipped.len(),
        revoked = report.revoked,
        "role permissions replaced"
    );
    Ok(report)
}

async fn replace_assignments<S: AsRef<str>>(
    txn: &DatabaseTransaction,
    role_id: Uuid,
    names: &[S],
) -> DbResult<AssignmentReport> {
    role::Entity::find_by_id(role_id)
        .one(txn)
        .await?
        .ok_or(DbError::RoleNotFound(role_id))?;

    let revoked = role_permission::Entity::delete_many()
        .filter(role_permission::Column::RoleId.eq(role_id))
        .exec(txn)
        .await?
        .rows_affected;

    let mut seen = HashSet::new();
    let requested: Vec<&str> = names
        .iter()
        .map(|name| name.as_ref().trim())
        .filter(|name| seen.insert(*name))
        .collect();

    let stored: HashMap<String, Uuid> = permission::Entity::find()
        .filter(permission::Column::Name.is_in(requested.iter().copied()))
        .all(txn)
        .await?
        .into_iter()
        .map(|model| (model.name, model.id))
        .collect();

    let mut report = AssignmentReport {
        role_id,
        revoked,
        ..AssignmentReport::default()
    };
    let mut rows = Vec::with_capacity(requested.len());
    for name in requested {
        match stored.get(name) {
            Some(permission_id) => {
                rows.push(role_permission::ActiveModel {
                    role_id: Set(role_id),
                    permission_id: Set(*permission_id),
                });
                report.granted.push(name.to_string());
            }
            None => {
                warn!(permission = name, "skipping unknown permission");
                report.skipped.push(name.to_string());
            }
        }
    }

    if !rows.is_empty() {
        role_permission::Entity::insert_many(rows)
            .exec_without_returning(txn)
            .await?;
    }
    Ok(report)
}

/// Look up a role by name and load its permission set.
#[instrument(name = "rbac.load_role", skip(conn))]
pub async fn load_role<C>(conn: &C, name: &str) -> DbResult<Option<ResolvedRole>>
where
    C: ConnectionTrait,
{
    let Some(model) = role::Entity::find()
        .filter(role::Column::Name.eq(name))
        .one(conn)
        .await?
    else {
        return Ok(None);
    };
    resolve_role(conn, &model).await.map(Some)
}

pub async fn resolve_role<C>(conn: &C, model: &role::Model) -> DbResult<ResolvedRole>
where
    C: ConnectionTrait,
{
    let permissions = model.find_related(permission::Entity).all(conn).await?;
    Ok(ResolvedRole::new(
        model.name.clone(),
        stored_metadata(model),
        permissions.into_iter().map(|p| p.name),
    ))
}

/// Every stored role, most senior first.
pub async fn list_roles<C>(conn: &C) -> DbResult<Vec<role::Model>>
where
    C: ConnectionTrait,
{
    Ok(role::Entity::find()
        .order_by_desc(role::Column::AccessLevel)
        .order_by_asc(role::Column::Name)
        .all(conn)
        .await?)
}

/// Sorted permission names assigned to `role_id`.
pub async fn role_permission_names<C>(conn: &C, role_id: Uuid) -> DbResult<Vec<String>>
where
    C: ConnectionTrait,
{
    let model = role::Entity::find_by_id(role_id)
        .one(conn)
        .await?
        .ok_or(DbError::RoleNotFound(role_id))?;
    let mut names: Vec<String> = model
        .find_related(permission::Entity)
        .all(conn)
        .await?
        .into_iter()
        .map(|p| p.name)
        .collect();
    names.sort();
    Ok(names)
}

use std::collections::HashSet;

use entity::{permission, role, role_permission};
use platform_authz::{Catalog, PermissionSpec};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, TransactionTrait};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    DbResult,
    store::{
        AssignmentReport, RoleChange, RoleMetadataPolicy, assign_permissions, ensure_permission,
        ensure_role,
    },
};

#[derive(Clone, Copy, Debug, Default)]
pub struct SeedOptions {
    pub role_metadata: RoleMetadataPolicy,
    /// Delete stored roles that the catalog no longer declares.
    pub prune: bool,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub permissions_existing: usize,
    pub roles_created: usize,
    pub roles_updated: usize,
    pub roles_unchanged: usize,
    pub roles_pruned: Vec<String>,
    pub assignments: Vec<(String, AssignmentReport)>,
}

impl SeedReport {
    pub fn skipped(&self) -> impl Iterator<Item = (&str, &str)> {
        self.assignments.iter().flat_map(|(role, report)| {
            report
                .skipped
                .iter()
                .map(move |name| (role.as_str(), name.as_str()))
        })
    }
}

/// Reconcile the stored permissions, roles and assignments with `catalog`.
///
/// Permissions are created first, then roles, then every declared role's
/// assignment is replaced. The whole run shares one transaction; nothing is
/// visible to other connections until it commits.
#[instrument(name = "rbac.seed", skip_all, fields(version = catalog.version))]
pub async fn seed<C>(conn: &C, catalog: &Catalog, options: SeedOptions) -> DbResult<SeedReport>
where
    C: ConnectionTrait + TransactionTrait,
{
    catalog.validate()?;
    let txn = conn.begin().await?;
    let mut report = SeedReport::default();

    let wildcard = PermissionSpec::wildcard();
    for spec in std::iter::once(&wildcard).chain(catalog.permissions.iter()) {
        let (_, created) = ensure_permission(&txn, spec).await?;
        if created {
            report.permissions_created += 1;
        } else {
            report.permissions_existing += 1;
        }
    }

    let mut roles = Vec::with_capacity(catalog.roles.len());
    for spec in &catalog.roles {
        let (model, change) = ensure_role(&txn, spec, options.role_metadata).await?;
        match change {
            RoleChange::Created => report.roles_created += 1,
            RoleChange::Updated => report.roles_updated += 1,
            RoleChange::Unchanged => report.roles_unchanged += 1,
        }
        roles.push(model);
    }

    for model in &roles {
        let grants = catalog.grants_for(&model.name);
        let assignment = assign_permissions(&txn, model.id, grants).await?;
        report.assignments.push((model.name.clone(), assignment));
    }

    if options.prune {
        report.roles_pruned = prune_roles(&txn, catalog).await?;
    }

    txn.commit().await?;
    info!(
        permissions_created = report.permissions_created,
        roles_created = report.roles_created,
        roles_updated = report.roles_updated,
        roles_pruned = report.roles_pruned.len(),
        "catalog seeded"
    );
    Ok(report)
}

async fn prune_roles<C>(conn: &C, catalog: &Catalog) -> DbResult<Vec<String>>
where
    C: ConnectionTrait,
{
    let declared: Vec<&str> = catalog.role_names().collect();
    let stale = role::Entity::find()
        .filter(role::Column::Name.is_not_in(declared))
        .all(conn)
        .await?;
    if stale.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = stale.iter().map(|model| model.id).collect();
    role_permission::Entity::delete_many()
        .filter(role_permission::Column::RoleId.is_in(ids.clone()))
        .exec(conn)
        .await?;
    role::Entity::delete_many()
        .filter(role::Column::Id.is_in(ids))
        .exec(conn)
        .await?;

    let names: Vec<String> = stale.into_iter().map(|model| model.name).collect();
    for name in &names {
        warn!(role = %name, "pruned role missing from catalog");
    }
    Ok(names)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Assignments whose role or permission no longer exists.
    pub dangling_assignments: usize,
    pub roles_without_permissions: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.dangling_assignments == 0
    }
}

pub async fn verify_integrity<C>(conn: &C) -> DbResult<IntegrityReport>
where
    C: ConnectionTrait,
{
    let roles = role::Entity::find().all(conn).await?;
    let role_ids: HashSet<Uuid> = roles.iter().map(|model| model.id).collect();
    let permission_ids: HashSet<Uuid> = permission::Entity::find()
        .all(conn)
        .await?
        .into_iter()
        .map(|model| model.id)
        .collect();
    let assignments = role_permission::Entity::find().all(conn).await?;

    let dangling_assignments = assignments
        .iter()
        .filter(|row| !role_ids.contains(&row.role_id) || !permission_ids.contains(&row.permission_id))
        .count();
    let assigned: HashSet<Uuid> = assignments.iter().map(|row| row.role_id).collect();
    let mut roles_without_permissions: Vec<String> = roles
        .into_iter()
        .filter(|model| !assigned.contains(&model.id))
        .map(|model| model.name)
        .collect();
    roles_without_permissions.sort();

    Ok(IntegrityReport {
        dangling_assignments,
        roles_without_permissions,
    })
}

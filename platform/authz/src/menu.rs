use serde::Serialize;

use crate::role::ResolvedRole;

/// Admin sidebar entry gated by a single permission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MenuItem {
    pub name: &'static str,
    pub path: &'static str,
    pub icon: &'static str,
    pub permission: &'static str,
}

const fn item(
    name: &'static str,
    path: &'static str,
    icon: &'static str,
    permission: &'static str,
) -> MenuItem {
    MenuItem {
        name,
        path,
        icon,
        permission,
    }
}

pub const ADMIN_MENU: &[MenuItem] = &[
    item("Dashboard", "/admin/dashboard", "dashboard", "content.read"),
    item("Articles", "/admin/articles", "article", "content.read"),
    item("Categories", "/admin/categories", "category", "category.read"),
    item("Tags", "/admin/tags", "tag", "tag.read"),
    item("Media", "/admin/media", "media", "media.read"),
    item("Comments", "/admin/comments", "comment", "comment.moderate"),
    item("Newsletter", "/admin/newsletter", "newsletter", "newsletter.create"),
    item("Social", "/admin/social", "social", "social.post"),
    item("Analytics", "/admin/analytics", "analytics", "analytics.view"),
    item("Users", "/admin/users", "users", "user.read"),
    item("Roles", "/admin/roles", "roles", "user.manage_roles"),
    item("Settings", "/admin/settings", "settings", "system.configure"),
    item("Security", "/admin/security", "security", "system.security"),
];

/// Sidebar entries the role may open, in menu order.
pub fn accessible_menu(role: &ResolvedRole) -> Vec<MenuItem> {
    ADMIN_MENU
        .iter()
        .filter(|entry| role.has_permission(Some(entry.permission)))
        .copied()
        .collect()
}

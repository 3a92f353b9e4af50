pub use sea_orm_migration::prelude::*;

mod m20261017_000001_rbac;
mod m20261017_000002_role_lookup_indexes;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261017_000001_rbac::Migration),
            Box::new(m20261017_000002_role_lookup_indexes::Migration),
        ]
    }
}

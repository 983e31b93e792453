pub use sea_orm_migration::prelude::*;

mod m20240101_000001_tenancy;
mod m20240102_000002_metering;
mod m20240103_000003_row_security;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_tenancy::Migration),
            Box::new(m20240102_000002_metering::Migration),
            Box::new(m20240103_000003_row_security::Migration),
        ]
    }
}

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{ConnectionTrait, DatabaseBackend};

const UP_SQL: &str = r#"
CREATE OR REPLACE FUNCTION current_tenant() RETURNS uuid
    LANGUAGE sql STABLE
    AS $$ SELECT NULLIF(current_setting('app.current_tenant', true), '')::uuid $$;

ALTER TABLE cases ENABLE ROW LEVEL SECURITY;

CREATE POLICY org_isolation ON cases
    USING (org_id = current_tenant())
    WITH CHECK (org_id = current_tenant());
"#;

const DOWN_SQL: &str = r#"
DROP POLICY IF EXISTS org_isolation ON cases;
ALTER TABLE cases DISABLE ROW LEVEL SECURITY;
DROP FUNCTION IF EXISTS current_tenant();
"#;

/// Postgres-only second line of defence under the query-level tenant filter.
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        if manager.get_database_backend() != DatabaseBackend::Postgres {
            return Ok(());
        }
        manager
            .get_connection()
            .execute_unprepared(UP_SQL)
            .await
            .map(|_| ())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        if manager.get_database_backend() != DatabaseBackend::Postgres {
            return Ok(());
        }
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await
            .map(|_| ())
    }
}

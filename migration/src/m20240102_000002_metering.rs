use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(DeriveIden)]
enum UsageCounters {
    Table,
    OrgId,
    ResourceType,
    PeriodStart,
    PeriodEnd,
    Count,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CreditBalances {
    Table,
    OrgId,
    CreditType,
    Balance,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CreditEntries {
    Table,
    Id,
    OrgId,
    CreditType,
    Kind,
    Amount,
    BalanceAfter,
    Action,
    Resource,
    IdempotencyKey,
    CreatedAt,
}

#[derive(DeriveIden)]
enum AuditEvents {
    Table,
    EventId,
    OccurredAt,
    UserId,
    OrgId,
    Role,
    Decision,
    Resource,
    Reason,
    Details,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UsageCounters::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(UsageCounters::OrgId).uuid().not_null())
                    .col(
                        ColumnDef::new(UsageCounters::ResourceType)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(UsageCounters::PeriodStart).date().not_null())
                    .col(ColumnDef::new(UsageCounters::PeriodEnd).date().not_null())
                    .col(
                        ColumnDef::new(UsageCounters::Count)
                            .big_integer()
                            .not_null()
                            .default(0)
                            .check(Expr::col(UsageCounters::Count).gte(0)),
                    )
                    .col(
                        ColumnDef::new(UsageCounters::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(UsageCounters::OrgId)
                            .col(UsageCounters::ResourceType)
                            .col(UsageCounters::PeriodStart),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CreditBalances::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CreditBalances::OrgId).uuid().not_null())
                    .col(
                        ColumnDef::new(CreditBalances::CreditType)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CreditBalances::Balance)
                            .big_integer()
                            .not_null()
                            .default(0)
                            .check(Expr::col(CreditBalances::Balance).gte(0)),
                    )
                    .col(
                        ColumnDef::new(CreditBalances::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(CreditBalances::OrgId)
                            .col(CreditBalances::CreditType),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CreditEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CreditEntries::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CreditEntries::OrgId).uuid().not_null())
                    .col(
                        ColumnDef::new(CreditEntries::CreditType)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(CreditEntries::Kind).string_len(16).not_null())
                    .col(ColumnDef::new(CreditEntries::Amount).big_integer().not_null())
                    .col(
                        ColumnDef::new(CreditEntries::BalanceAfter)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CreditEntries::Action).string())
                    .col(ColumnDef::new(CreditEntries::Resource).string())
                    .col(ColumnDef::new(CreditEntries::IdempotencyKey).string_len(128))
                    .col(
                        ColumnDef::new(CreditEntries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_credit_entries_idempotency")
                    .table(CreditEntries::Table)
                    .col(CreditEntries::OrgId)
                    .col(CreditEntries::IdempotencyKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AuditEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuditEvents::EventId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AuditEvents::OccurredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AuditEvents::UserId).uuid())
                    .col(ColumnDef::new(AuditEvents::OrgId).uuid())
                    .col(ColumnDef::new(AuditEvents::Role).string_len(32))
                    .col(ColumnDef::new(AuditEvents::Decision).string_len(32).not_null())
                    .col(ColumnDef::new(AuditEvents::Resource).string().not_null())
                    .col(ColumnDef::new(AuditEvents::Reason).text())
                    .col(ColumnDef::new(AuditEvents::Details).json().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_audit_events_org_time")
                    .table(AuditEvents::Table)
                    .col(AuditEvents::OrgId)
                    .col(AuditEvents::OccurredAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for table in [
            AuditEvents::Table.into_iden(),
            CreditEntries::Table.into_iden(),
            CreditBalances::Table.into_iden(),
            UsageCounters::Table.into_iden(),
        ] {
            manager
                .drop_table(Table::drop().table(table).if_exists().to_owned())
                .await?;
        }
        Ok(())
    }
}

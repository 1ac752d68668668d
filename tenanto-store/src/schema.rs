//! Registry tables, described with sea-query so that the master migrations and the
//! `pg` engine agree on names.

use sea_query::{
    ColumnDef, Expr, Iden, Index, IndexCreateStatement, PostgresQueryBuilder, Table,
    TableCreateStatement, TableDropStatement,
};

#[derive(Iden, Clone, Copy)]
pub enum Tenant {
    Table,
    Id,
    Name,
    RoutingCode,
    PrimaryDomain,
    ContactEmail,
    PackageId,
    DbHost,
    DbPort,
    DbName,
    CredentialsRef,
    State,
    Stage,
    FailedStage,
    LastError,
    FailedAt,
    Revision,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum TenantSubscription {
    Table,
    Id,
    TenantId,
    PackageId,
    Status,
    StartedAt,
    TrialEndsAt,
}

#[derive(Iden, Clone, Copy)]
pub enum MigrationRun {
    Table,
    Id,
    RunId,
    Scope,
    Version,
    Outcome,
    Error,
    CreatedAt,
}

pub fn create_tenant_table() -> TableCreateStatement {
    Table::create()
        .table(Tenant::Table)
        .if_not_exists()
        .col(ColumnDef::new(Tenant::Id).uuid().not_null().primary_key())
        .col(ColumnDef::new(Tenant::Name).string_len(100).not_null())
        .col(ColumnDef::new(Tenant::RoutingCode).string_len(63).not_null())
        .col(ColumnDef::new(Tenant::PrimaryDomain).string_len(255).not_null())
        .col(ColumnDef::new(Tenant::ContactEmail).string_len(255).not_null())
        .col(ColumnDef::new(Tenant::PackageId).string_len(50).not_null())
        .col(ColumnDef::new(Tenant::DbHost).string_len(255).not_null())
        .col(ColumnDef::new(Tenant::DbPort).integer().not_null())
        .col(ColumnDef::new(Tenant::DbName).string_len(63).not_null())
        .col(ColumnDef::new(Tenant::CredentialsRef).string_len(100).not_null())
        .col(ColumnDef::new(Tenant::State).string_len(20).not_null())
        .col(ColumnDef::new(Tenant::Stage).string_len(20).not_null())
        .col(ColumnDef::new(Tenant::FailedStage).string_len(20).null())
        .col(ColumnDef::new(Tenant::LastError).text().null())
        .col(ColumnDef::new(Tenant::FailedAt).timestamp_with_time_zone().null())
        .col(
            ColumnDef::new(Tenant::Revision)
                .big_integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(Tenant::CreatedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(Tenant::UpdatedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .to_owned()
}

/// Routing code uniqueness lives in the database, not in a check-then-insert.
pub fn create_tenant_routing_code_idx() -> IndexCreateStatement {
    Index::create()
        .name("uq_tenant_routing_code")
        .table(Tenant::Table)
        .col(Tenant::RoutingCode)
        .unique()
        .if_not_exists()
        .to_owned()
}

pub fn create_tenant_state_idx() -> IndexCreateStatement {
    Index::create()
        .name("idx_tenant_state_created_at")
        .table(Tenant::Table)
        .col(Tenant::State)
        .col(Tenant::CreatedAt)
        .col(Tenant::Id)
        .if_not_exists()
        .to_owned()
}

pub fn create_subscription_table() -> TableCreateStatement {
    Table::create()
        .table(TenantSubscription::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(TenantSubscription::Id)
                .uuid()
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(TenantSubscription::TenantId)
                .uuid()
                .not_null()
                .unique_key(),
        )
        .col(
            ColumnDef::new(TenantSubscription::PackageId)
                .string_len(50)
                .not_null(),
        )
        .col(
            ColumnDef::new(TenantSubscription::Status)
                .string_len(20)
                .not_null(),
        )
        .col(
            ColumnDef::new(TenantSubscription::StartedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(TenantSubscription::TrialEndsAt)
                .timestamp_with_time_zone()
                .null(),
        )
        .to_owned()
}

pub fn create_migration_run_table() -> TableCreateStatement {
    Table::create()
        .table(MigrationRun::Table)
        .if_not_exists()
        .col(ColumnDef::new(MigrationRun::Id).uuid().not_null().primary_key())
        .col(ColumnDef::new(MigrationRun::RunId).uuid().not_null())
        .col(ColumnDef::new(MigrationRun::Scope).string_len(36).not_null())
        .col(ColumnDef::new(MigrationRun::Version).string_len(100).not_null())
        .col(ColumnDef::new(MigrationRun::Outcome).string_len(10).not_null())
        .col(ColumnDef::new(MigrationRun::Error).text().null())
        .col(
            ColumnDef::new(MigrationRun::CreatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned()
}

pub fn create_migration_run_scope_idx() -> IndexCreateStatement {
    Index::create()
        .name("idx_migration_run_scope_version")
        .table(MigrationRun::Table)
        .col(MigrationRun::Scope)
        .col(MigrationRun::Version)
        .if_not_exists()
        .to_owned()
}

pub fn drop_tenant_table() -> TableDropStatement {
    Table::drop().table(Tenant::Table).if_exists().to_owned()
}

pub fn drop_subscription_table() -> TableDropStatement {
    Table::drop()
        .table(TenantSubscription::Table)
        .if_exists()
        .to_owned()
}

pub fn drop_migration_run_table() -> TableDropStatement {
    Table::drop().table(MigrationRun::Table).if_exists().to_owned()
}

/// Postgres DDL creating every registry table, in dependency order.
pub fn up_statements() -> Vec<String> {
    vec![
        create_tenant_table().to_string(PostgresQueryBuilder),
        create_tenant_routing_code_idx().to_string(PostgresQueryBuilder),
        create_tenant_state_idx().to_string(PostgresQueryBuilder),
        create_subscription_table().to_string(PostgresQueryBuilder),
        create_migration_run_table().to_string(PostgresQueryBuilder),
        create_migration_run_scope_idx().to_string(PostgresQueryBuilder),
    ]
}

pub fn down_statements() -> Vec<String> {
    vec![
        drop_migration_run_table().to_string(PostgresQueryBuilder),
        drop_subscription_table().to_string(PostgresQueryBuilder),
        drop_tenant_table().to_string(PostgresQueryBuilder),
    ]
}

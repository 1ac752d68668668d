//! Bundled schema of the master and tenant databases.

use sea_query::{ColumnDef, Expr, Iden, PostgresQueryBuilder, Table};
use std::sync::Arc;
use tenanto_migrator::{Migration, MigrationSet, SqlMigration};
use tenanto_store::schema as registry;

#[derive(Iden, Clone, Copy)]
pub enum TenantSetting {
    Table,
    Key,
    Value,
    UpdatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum TenantModule {
    Table,
    Code,
    Enabled,
    ActivatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum SetupChecklist {
    Table,
    Step,
    Completed,
    CompletedAt,
}

pub fn master_migrations() -> MigrationSet {
    let mut registry_migration = SqlMigration::new("20240101000000_registry", "tenant registry");

    for statement in registry::up_statements() {
        registry_migration = registry_migration.sql(statement);
    }

    for statement in registry::down_statements() {
        registry_migration = registry_migration.down_sql(statement);
    }

    MigrationSet::new(vec![Arc::new(registry_migration) as Arc<dyn Migration>])
        .unwrap_or_default()
}

pub fn tenant_migrations() -> MigrationSet {
    let settings = SqlMigration::new("20240101000000_tenant_settings", "tenant settings")
        .sql(
            Table::create()
                .table(TenantSetting::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(TenantSetting::Key)
                        .string_len(100)
                        .not_null()
                        .primary_key(),
                )
                .col(ColumnDef::new(TenantSetting::Value).text().not_null())
                .col(
                    ColumnDef::new(TenantSetting::UpdatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .default(Expr::current_timestamp()),
                )
                .to_string(PostgresQueryBuilder),
        )
        .down_sql(
            Table::drop()
                .table(TenantSetting::Table)
                .to_string(PostgresQueryBuilder),
        );

    let modules = SqlMigration::new("20240115000000_tenant_modules", "tenant modules")
        .sql(
            Table::create()
                .table(TenantModule::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(TenantModule::Code)
                        .string_len(50)
                        .not_null()
                        .primary_key(),
                )
                .col(
                    ColumnDef::new(TenantModule::Enabled)
                        .boolean()
                        .not_null()
                        .default(true),
                )
                .col(
                    ColumnDef::new(TenantModule::ActivatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .default(Expr::current_timestamp()),
                )
                .to_string(PostgresQueryBuilder),
        )
        .down_sql(
            Table::drop()
                .table(TenantModule::Table)
                .to_string(PostgresQueryBuilder),
        );

    let checklist = SqlMigration::new("20240201000000_setup_checklist", "setup checklist")
        .sql(
            Table::create()
                .table(SetupChecklist::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(SetupChecklist::Step)
                        .string_len(50)
                        .not_null()
                        .primary_key(),
                )
                .col(
                    ColumnDef::new(SetupChecklist::Completed)
                        .boolean()
                        .not_null()
                        .default(false),
                )
                .col(
                    ColumnDef::new(SetupChecklist::CompletedAt)
                        .timestamp_with_time_zone()
                        .null(),
                )
                .to_string(PostgresQueryBuilder),
        )
        .down_sql(
            Table::drop()
                .table(SetupChecklist::Table)
                .to_string(PostgresQueryBuilder),
        );

    MigrationSet::new(vec![
        Arc::new(settings) as Arc<dyn Migration>,
        Arc::new(modules),
        Arc::new(checklist),
    ])
    .unwrap_or_default()
}

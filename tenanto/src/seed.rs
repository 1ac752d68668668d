use async_trait::async_trait;
use sea_query::{OnConflict, PostgresQueryBuilder, Query};
use tenanto_migrator::{Database, MigrateError};
use tenanto_store::TenantRecord;

use crate::{
    config::Package,
    schema::{SetupChecklist, TenantModule, TenantSetting},
};

/// Writes reference data into a freshly migrated tenant database.
///
/// Must be safe to run again on a database it already seeded.
#[async_trait]
pub trait Seeder: Send + Sync {
    async fn seed(
        &self,
        database: &dyn Database,
        tenant: &TenantRecord,
        package: &Package,
    ) -> Result<(), MigrateError>;
}

const CHECKLIST: [&str; 4] = ["company_profile", "invite_users", "import_products", "configure_taxes"];

/// Settings, package modules and the setup checklist, all inserted with `ON CONFLICT DO NOTHING`.
#[derive(Debug, Clone, Default)]
pub struct BaselineSeeder;

impl BaselineSeeder {
    pub fn statements(tenant: &TenantRecord, package: &Package) -> Vec<String> {
        let mut statements = Vec::new();

        let mut settings = Query::insert();
        settings
            .into_table(TenantSetting::Table)
            .columns([TenantSetting::Key, TenantSetting::Value])
            .on_conflict(OnConflict::column(TenantSetting::Key).do_nothing().to_owned());

        for (key, value) in [
            ("company_name", tenant.name.as_str()),
            ("contact_email", tenant.contact_email.as_str()),
            ("primary_domain", tenant.primary_domain.as_str()),
            ("package", package.id.as_str()),
        ] {
            settings.values_panic([key.into(), value.into()]);
        }

        statements.push(settings.to_string(PostgresQueryBuilder));

        if !package.modules.is_empty() {
            let mut modules = Query::insert();
            modules
                .into_table(TenantModule::Table)
                .columns([TenantModule::Code])
                .on_conflict(OnConflict::column(TenantModule::Code).do_nothing().to_owned());

            for module in package.modules.iter() {
                modules.values_panic([module.as_str().into()]);
            }

            statements.push(modules.to_string(PostgresQueryBuilder));
        }

        let mut checklist = Query::insert();
        checklist
            .into_table(SetupChecklist::Table)
            .columns([SetupChecklist::Step])
            .on_conflict(OnConflict::column(SetupChecklist::Step).do_nothing().to_owned());

        for step in CHECKLIST {
            checklist.values_panic([step.into()]);
        }

        statements.push(checklist.to_string(PostgresQueryBuilder));

        statements
    }
}

#[async_trait]
impl Seeder for BaselineSeeder {
    async fn seed(
        &self,
        database: &dyn Database,
        tenant: &TenantRecord,
        package: &Package,
    ) -> Result<(), MigrateError> {
        let mut tx = database.begin().await?;

        for statement in Self::statements(tenant, package) {
            if let Err(e) = tx.execute(&statement).await {
                tx.rollback().await?;
                return Err(e);
            }
        }

        tx.commit().await
    }
}

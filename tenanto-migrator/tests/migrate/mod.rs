use futures_util::future::join_all;
use std::sync::Arc;
use tenanto_migrator::{
    Consistency, Database, MigrateError, Migration, MigrationSet, Migrator, OutcomeStatus,
    SqlMigration, Version,
};

pub fn migrations() -> MigrationSet {
    MigrationSet::new(vec![
        Arc::new(
            SqlMigration::new("20240101000000_settings", "create settings")
                .sql("CREATE TABLE tenant_setting (key VARCHAR(100) PRIMARY KEY, value TEXT)")
                .down_sql("DROP TABLE tenant_setting"),
        ) as Arc<dyn Migration>,
        Arc::new(
            SqlMigration::new("20240201000000_modules", "create modules")
                .sql("CREATE TABLE tenant_module (code VARCHAR(50) PRIMARY KEY)")
                .down_sql("DROP TABLE tenant_module"),
        ),
        Arc::new(
            SqlMigration::new("20240301000000_checklist", "create setup checklist")
                .sql("CREATE TABLE setup_checklist (step VARCHAR(50) PRIMARY KEY)"),
        ),
    ])
    .expect("migrations are ordered")
}

pub async fn test_apply_all(database: &dyn Database) -> anyhow::Result<()> {
    let migrator = Migrator::new(migrations());

    assert_eq!(migrator.pending(database).await?.len(), 3);

    let outcomes = migrator.apply_all(database).await?;
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes
        .iter()
        .all(|outcome| outcome.status == OutcomeStatus::Success));

    assert!(migrator.pending(database).await?.is_empty());

    let history = migrator.history(database).await?;
    assert_eq!(history.count, 3);
    assert_eq!(history.applied[0].id, "20240101000000_settings");

    Ok(())
}

pub async fn test_apply_all_twice_is_noop(database: &dyn Database) -> anyhow::Result<()> {
    let migrator = Migrator::new(migrations());
    migrator.apply_all(database).await?;

    let outcomes = migrator.apply_all(database).await?;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes
        .iter()
        .all(|outcome| outcome.status == OutcomeStatus::Skipped));
    assert_eq!(migrator.history(database).await?.count, 3);

    Ok(())
}

pub async fn test_out_of_order(database: &dyn Database) -> anyhow::Result<()> {
    let migrator = Migrator::new(migrations());

    let res = migrator
        .apply(database, "20240201000000_modules")
        .await;

    assert!(matches!(
        res,
        Err(MigrateError::OutOfOrder { expected, .. }) if expected == "20240101000000_settings"
    ));
    assert!(migrator.history(database).await?.applied.is_empty());

    assert!(matches!(
        migrator.apply(database, "20990101000000_nope").await,
        Err(MigrateError::UnknownVersion(_))
    ));

    Ok(())
}

pub async fn test_apply_to(database: &dyn Database) -> anyhow::Result<()> {
    let migrator = Migrator::new(migrations());

    let outcomes = migrator
        .apply_to(database, Some("20240201000000_modules"))
        .await?;

    assert_eq!(outcomes.len(), 2);

    let status = migrator.status(database).await?;
    assert_eq!(status.consistency, Consistency::Consistent);
    assert_eq!(
        status.pending.iter().map(|v| v.id.as_str()).collect::<Vec<_>>(),
        vec!["20240301000000_checklist"]
    );

    Ok(())
}

pub async fn test_revert(database: &dyn Database) -> anyhow::Result<()> {
    let migrator = Migrator::new(migrations());
    migrator
        .apply_to(database, Some("20240201000000_modules"))
        .await?;

    assert!(matches!(
        migrator.revert(database, "20240101000000_settings").await,
        Err(MigrateError::NotLatest { latest: Some(latest), .. }) if latest == "20240201000000_modules"
    ));

    let reverted = migrator
        .revert(database, "20240201000000_modules")
        .await?;
    assert_eq!(reverted.id, "20240201000000_modules");
    assert_eq!(migrator.pending(database).await?.len(), 2);

    migrator.apply_all(database).await?;

    assert!(matches!(
        migrator.revert(database, "20240301000000_checklist").await,
        Err(MigrateError::Irreversible(_))
    ));
    assert!(migrator.pending(database).await?.is_empty());

    Ok(())
}

pub async fn test_concurrent_apply(database: &dyn Database) -> anyhow::Result<()> {
    let migrator = Migrator::new(migrations());

    let results = join_all((0..4).map(|_| migrator.apply_all(database))).await;

    let mut successes = 0;
    for outcomes in results {
        successes += outcomes?
            .iter()
            .filter(|outcome| outcome.status == OutcomeStatus::Success)
            .count();
    }

    assert_eq!(successes, 3);
    assert_eq!(migrator.history(database).await?.count, 3);

    Ok(())
}

pub async fn test_preview(database: &dyn Database) -> anyhow::Result<()> {
    let migrator = Migrator::new(migrations());
    migrator
        .apply_to(database, Some("20240101000000_settings"))
        .await?;

    let preview = migrator.preview(database, None).await?;
    assert_eq!(
        preview
            .iter()
            .map(|p| p.version.id.as_str())
            .collect::<Vec<_>>(),
        vec!["20240201000000_modules", "20240301000000_checklist"]
    );
    assert_eq!(
        preview[0].statements,
        vec!["CREATE TABLE tenant_module (code VARCHAR(50) PRIMARY KEY)".to_owned()]
    );

    let preview = migrator
        .preview(database, Some("20240201000000_modules"))
        .await?;
    assert_eq!(preview.len(), 1);

    let preview = migrator
        .preview(database, Some("20240101000000_settings"))
        .await?;
    assert!(preview.is_empty());

    assert!(matches!(
        migrator.preview(database, Some("20990101000000_nope")).await,
        Err(MigrateError::UnknownVersion(_))
    ));

    assert_eq!(migrator.history(database).await?.count, 1);
    assert_eq!(migrator.pending(database).await?.len(), 2);

    Ok(())
}

pub fn version(id: &str) -> Version {
    Version {
        id: id.to_owned(),
        description: id.to_owned(),
    }
}

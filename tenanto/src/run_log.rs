use std::collections::HashSet;
use tenanto_migrator::{MigrationOutcome, MigrationSet, OutcomeStatus};
use tenanto_store::{RunOutcome, RunRecord, RunScope, Store, StoreError};
use uuid::Uuid;

/// Appends one record per outcome.
///
/// A skip is only logged while the log holds no success for that version, so re-running
/// a finished migration leaves the log unchanged.
pub(crate) async fn record_outcomes(
    store: &Store,
    run_id: Uuid,
    scope: RunScope,
    outcomes: &[MigrationOutcome],
) -> Result<(), StoreError> {
    let completed = if outcomes.iter().any(|o| o.status == OutcomeStatus::Skipped) {
        store.completed(scope).await?
    } else {
        HashSet::new()
    };

    let mut runs = Vec::new();

    for outcome in outcomes {
        let version = &outcome.version.id;
        let run = match &outcome.status {
            OutcomeStatus::Success => RunRecord::new(run_id, scope, version, RunOutcome::Success),
            OutcomeStatus::Failed(reason) => {
                RunRecord::new(run_id, scope, version, RunOutcome::Failed).error(reason)
            }
            OutcomeStatus::Skipped => {
                if completed.contains(version) {
                    continue;
                }

                RunRecord::new(run_id, scope, version, RunOutcome::Skipped)
            }
        };

        runs.push(run);
    }

    store.append_run(runs).await
}

/// Versions the run log does not show as completed for `scope`, in order.
pub(crate) async fn pending_from_log(
    store: &Store,
    scope: RunScope,
    migrations: &MigrationSet,
) -> Result<Vec<String>, StoreError> {
    let completed = store.completed(scope).await?;

    Ok(migrations
        .versions()
        .into_iter()
        .filter(|version| !completed.contains(&version.id))
        .map(|version| version.id)
        .collect())
}

/// Logs a failure that happened before any version could be attempted, against the
/// first version the log does not show as completed.
pub(crate) async fn record_unreachable(
    store: &Store,
    run_id: Uuid,
    scope: RunScope,
    migrations: &MigrationSet,
    reason: &str,
) -> Result<(), StoreError> {
    let pending = pending_from_log(store, scope, migrations).await?;
    let version = match pending.into_iter().next() {
        Some(version) => version,
        None => match migrations.latest() {
            Some(latest) => latest.id,
            None => return Ok(()),
        },
    };

    store
        .append_run(vec![
            RunRecord::new(run_id, scope, version, RunOutcome::Failed).error(reason)
        ])
        .await
}

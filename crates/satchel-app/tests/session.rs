use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use satchel_app::{AppError, CANCELLED_BY_USER, PullSession, SessionOptions};
use satchel_core::{
    FormDescriptor, FormServerClient, InMemoryPreferences, PreferenceStore, ServerEndpoint,
    SourceError, SourceKind, TransferConfiguration, TransferRegistry,
};
use satchel_events::{Event, EventChannel, RecordId};
use satchel_sources::{ClientFactory, SourceFactory};
use satchel_test_support::fixtures::{CollectDirFixture, build_descriptor_list, record_id};
use satchel_test_support::mocks::{FakeFormServer, PullTracker, Script, ScriptedSource};

type TestResult = Result<(), Box<dyn std::error::Error>>;

struct Harness {
    session: PullSession,
    pull_prefs: Arc<InMemoryPreferences>,
    app_prefs: Arc<InMemoryPreferences>,
}

fn harness(workspace: &Path, factory: SourceFactory, store_passwords: bool) -> Harness {
    harness_with_prefs(
        workspace,
        factory,
        store_passwords,
        Arc::new(InMemoryPreferences::empty()),
    )
}

fn harness_with_prefs(
    workspace: &Path,
    factory: SourceFactory,
    store_passwords: bool,
    pull_prefs: Arc<InMemoryPreferences>,
) -> Harness {
    let app_prefs = Arc::new(InMemoryPreferences::empty());
    let options = SessionOptions {
        workspace: workspace.to_path_buf(),
        max_parallel: 2,
        start_from_last: false,
        store_passwords,
    };
    let session = PullSession::new(
        &options,
        factory,
        EventChannel::new(),
        pull_prefs.clone(),
        app_prefs.clone(),
    );
    Harness {
        session,
        pull_prefs,
        app_prefs,
    }
}

fn collect_fixture() -> std::io::Result<CollectDirFixture> {
    let fixture = CollectDirFixture::new()?;
    fixture.add_form("household", "household-v3", "Household survey", false)?;
    fixture.add_form("clinic", "clinic", "Clinic visit", false)?;
    fixture.add_instance("household_2024-05-01_10-00-00", "household-v3")?;
    fixture.add_instance("household_2024-05-02_11-30-00", "household-v3")?;
    Ok(fixture)
}

fn collect_kind(fixture: &CollectDirFixture) -> SourceKind {
    SourceKind::FilesystemDirectory {
        path: fixture.path().to_path_buf(),
    }
}

fn remote_factory(workspace: &Path, server: Arc<FakeFormServer>) -> SourceFactory {
    let clients: ClientFactory = Arc::new(move |_: &SourceKind| {
        let client: Arc<dyn FormServerClient> = server.clone();
        Some(client)
    });
    SourceFactory::new(workspace).with_client_factory(clients)
}

fn remote_kind() -> SourceKind {
    SourceKind::RemoteServer {
        endpoint: ServerEndpoint::new("https://forms.example.org")
            .with_credentials("enumerator", Some("s3cret".to_string())),
    }
}

#[tokio::test]
async fn pulls_a_collect_form_and_persists_its_timestamp() -> TestResult {
    let fixture = collect_fixture()?;
    let workspace = tempfile::tempdir()?;
    let h = harness(workspace.path(), SourceFactory::new(workspace.path()), false);

    assert_eq!(h.session.select_source(collect_kind(&fixture)).await?, 2);
    assert_eq!(
        h.pull_prefs.get("pull.source.selected.type").as_deref(),
        Some("filesystem_directory")
    );

    let id = RecordId::from("household-v3");
    h.session.registry().set_selected(&id, true)?;
    assert!(h.session.action_state().pull_enabled);

    let batch = h.session.pull()?;
    let summary = batch.wait_for_completion().await?;
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);

    let record = h.session.registry().find(&id)?;
    assert_eq!(
        record.status_history().last().map(|entry| entry.message.as_str()),
        Some("Success: pulled 2 of 2 submissions")
    );
    assert!(record.last_transfer().is_some());
    assert!(h.pull_prefs.get("exportDateTime.household-v3").is_some());
    assert!(h.pull_prefs.get("exportDateTime.clinic").is_none());
    assert!(
        workspace
            .path()
            .join("forms")
            .join("Household survey")
            .is_dir()
    );
    assert!(
        !h.pull_prefs
            .keys()
            .iter()
            .any(|key| key.starts_with("pull.source.form."))
    );

    let state = h.session.action_state();
    assert!(state.pull_enabled);
    assert!(!state.cancel_enabled);
    assert!(!state.reload_enabled);
    Ok(())
}

#[tokio::test]
async fn a_later_run_restores_source_configuration_and_timestamps() -> TestResult {
    let fixture = collect_fixture()?;
    let workspace = tempfile::tempdir()?;
    let target = tempfile::tempdir()?;
    let prefs = Arc::new(InMemoryPreferences::empty());
    let id = RecordId::from("household-v3");

    let first = harness_with_prefs(
        workspace.path(),
        SourceFactory::new(workspace.path()),
        false,
        prefs.clone(),
    );
    first.session.select_source(collect_kind(&fixture)).await?;
    first
        .session
        .put_configuration(&id, TransferConfiguration::with_target_dir(target.path()))?;
    first.session.registry().set_selected(&id, true)?;
    first.session.pull()?.wait_for_completion().await?;
    let pulled_at = first.session.registry().last_transfer_timestamp(&id);
    assert!(target.path().join("forms").join("Household survey").is_dir());

    let second = harness_with_prefs(
        workspace.path(),
        SourceFactory::new(workspace.path()),
        false,
        prefs,
    );
    assert!(second.session.restore_selected_source().await?);
    let registry = second.session.registry();
    assert_eq!(registry.size(), 2);
    assert!(registry.has_configuration(&id));
    assert_eq!(
        registry.configuration(&id)?.target_dir.as_deref(),
        Some(target.path())
    );
    assert_eq!(
        registry
            .last_transfer_timestamp(&id)
            .map(|at| at.timestamp_millis()),
        pulled_at.map(|at| at.timestamp_millis())
    );
    Ok(())
}

#[tokio::test]
async fn an_older_success_never_rewinds_the_stored_timestamp() -> TestResult {
    let workspace = tempfile::tempdir()?;
    let prefs = Arc::new(InMemoryPreferences::empty());
    let h = harness_with_prefs(
        workspace.path(),
        SourceFactory::new(workspace.path()),
        false,
        prefs.clone(),
    );
    let source = ScriptedSource::new(build_descriptor_list(1), Script::Succeed { submissions: 1 });
    h.session.use_source(Arc::new(source)).await?;
    let id = record_id(0);
    let newer = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();
    let older = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();

    for at in [newer, older] {
        h.session.events().publish_at(
            Event::Succeeded {
                record_id: id.clone(),
                message: "Success".into(),
            },
            at,
        );
    }

    assert_eq!(h.session.registry().last_transfer_timestamp(&id), Some(newer));
    let key = format!("exportDateTime.{}", id.as_str());
    assert_eq!(
        prefs.get(&key).as_deref(),
        Some("2024-05-02T09:00:00.000Z")
    );

    let reopened = TransferRegistry::load(
        TransferConfiguration::default(),
        build_descriptor_list(1),
        prefs.as_ref(),
    );
    assert_eq!(reopened.last_transfer_timestamp(&id), Some(newer));
    Ok(())
}

#[tokio::test]
async fn sources_inside_the_workspace_are_rejected() -> TestResult {
    let workspace = tempfile::tempdir()?;
    let nested = workspace.path().join("collect");
    std::fs::create_dir_all(nested.join("forms"))?;
    let h = harness(workspace.path(), SourceFactory::new(workspace.path()), false);

    let err = h
        .session
        .select_source(SourceKind::FilesystemDirectory { path: nested })
        .await
        .expect_err("workspace subdirectory");
    assert!(matches!(
        err,
        AppError::Source {
            source: SourceError::Validation { .. },
            ..
        }
    ));
    assert!(h.pull_prefs.keys().is_empty());
    assert!(h.session.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn cancel_marks_every_selected_record_and_completes_once() -> TestResult {
    let workspace = tempfile::tempdir()?;
    let tracker = PullTracker::new();
    let h = harness(workspace.path(), SourceFactory::new(workspace.path()), false);
    let source = ScriptedSource::new(build_descriptor_list(3), Script::UntilCancelled)
        .with_tracker(&tracker);
    h.session.use_source(Arc::new(source)).await?;
    h.session.registry().select_all();

    let batch = h.session.pull()?;
    let state = h.session.action_state();
    assert!(state.cancel_enabled);
    assert!(!state.pull_enabled);
    assert!(!state.reload_enabled);
    assert!(matches!(h.session.pull(), Err(AppError::Jobs { .. })));
    assert!(matches!(
        h.session.reload().await,
        Err(AppError::InvalidConfig { field: "batch", .. })
    ));

    assert!(h.session.cancel());
    let summary = batch.wait_for_completion().await?;
    assert_eq!(summary.total(), 3);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 0);

    for n in 0..3 {
        let record = h.session.registry().find(&record_id(n))?;
        let lines: Vec<_> = record
            .status_history()
            .iter()
            .map(|entry| entry.message.as_str())
            .collect();
        assert!(lines.contains(&CANCELLED_BY_USER), "{lines:?}");
        assert!(record.last_transfer().is_none());
    }
    assert!(!h.session.cancel());
    assert!(!h.session.action_state().cancel_enabled);
    Ok(())
}

#[tokio::test]
async fn reload_keeps_selection_for_reloadable_sources() -> TestResult {
    let workspace = tempfile::tempdir()?;
    let h = harness(workspace.path(), SourceFactory::new(workspace.path()), false);
    let source = ScriptedSource::new(build_descriptor_list(4), Script::Succeed { submissions: 1 });
    h.session.use_source(Arc::new(source)).await?;
    h.session.registry().set_selected(&record_id(2), true)?;

    assert_eq!(h.session.reload().await?, 4);
    assert!(h.session.registry().find(&record_id(2))?.is_selected());
    assert_eq!(h.session.registry().selected_forms().len(), 1);
    Ok(())
}

#[tokio::test]
async fn collect_sources_cannot_be_reloaded() -> TestResult {
    let fixture = collect_fixture()?;
    let workspace = tempfile::tempdir()?;
    let h = harness(workspace.path(), SourceFactory::new(workspace.path()), false);
    h.session.select_source(collect_kind(&fixture)).await?;

    assert!(matches!(
        h.session.reload().await,
        Err(AppError::InvalidConfig { field: "source", .. })
    ));
    Ok(())
}

#[tokio::test]
async fn reset_forgets_records_and_the_stored_source() -> TestResult {
    let fixture = collect_fixture()?;
    let workspace = tempfile::tempdir()?;
    let h = harness(workspace.path(), SourceFactory::new(workspace.path()), false);
    h.session.select_source(collect_kind(&fixture)).await?;

    h.session.reset()?;
    assert!(h.session.registry().is_empty());
    assert!(h.session.source_description().is_none());
    assert!(h.pull_prefs.get("pull.source.selected.type").is_none());
    assert!(!h.session.restore_selected_source().await?);
    assert!(!h.session.action_state().select_all_enabled);
    Ok(())
}

#[tokio::test]
async fn remote_pulls_remember_the_server_and_revoking_consent_forgets_it() -> TestResult {
    let workspace = tempfile::tempdir()?;
    let server = Arc::new(FakeFormServer::new().with_form(
        FormDescriptor::new("household", "Household survey", "household.xml"),
        &["uuid:a"],
    ));
    let h = harness(workspace.path(), remote_factory(workspace.path(), server), true);
    h.app_prefs.put("pull.source.form.census.url", "https://old.example.org")?;
    h.app_prefs.put("ui.theme", "dark")?;

    h.session.select_source(remote_kind()).await?;
    assert_eq!(
        h.pull_prefs.get("pull.source.selected.password").as_deref(),
        Some("s3cret")
    );

    h.session.registry().select_all();
    let summary = h.session.pull()?.wait_for_completion().await?;
    assert_eq!(summary.succeeded, 1);
    assert_eq!(
        h.app_prefs.get("pull.source.form.household.url").as_deref(),
        Some("https://forms.example.org")
    );
    assert_eq!(
        h.app_prefs.get("pull.source.form.household.password").as_deref(),
        Some("s3cret")
    );
    assert!(
        !h.pull_prefs
            .keys()
            .iter()
            .any(|key| key.starts_with("pull.source.form."))
    );
    assert!(h.pull_prefs.get("exportDateTime.household").is_some());

    h.session.set_store_passwords(false)?;
    assert!(h.app_prefs.get("pull.source.form.household.url").is_none());
    assert!(h.pull_prefs.get("pull.source.selected.password").is_none());
    assert_eq!(
        h.pull_prefs.get("pull.source.selected.username").as_deref(),
        Some("enumerator")
    );
    assert!(h.app_prefs.get("pull.source.form.census.url").is_none());
    assert_eq!(h.app_prefs.get("ui.theme").as_deref(), Some("dark"));
    Ok(())
}

#[tokio::test]
async fn remote_kinds_without_a_client_are_reported() -> TestResult {
    let workspace = tempfile::tempdir()?;
    let h = harness(workspace.path(), SourceFactory::new(workspace.path()), false);

    let err = h
        .session
        .select_source(remote_kind())
        .await
        .expect_err("no client factory");
    assert!(matches!(err, AppError::Adapter { .. }));
    Ok(())
}

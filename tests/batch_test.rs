use std::sync::Arc;

use nfse_harvest::models::parse_accounts;
use nfse_harvest::services::{MemoryHistory, SqliteHistory};
use nfse_harvest::{
    App, BatchCoordinator, Category, Config, ExecutionMode, JobDirector, RunStatus,
    ScriptedFactory, ScriptedSurface,
};
use tokio_test::assert_ok;

const ACCOUNTS: &str = r#"
[[accounts]]
id = "10"
name = "Empresa A"
login = "11222333000181"
password = "segredo"

[[accounts]]
id = "11"
name = "Empresa B"
"#;

fn config(output: &std::path::Path) -> Config {
    Config {
        live: true,
        output_dir: output.to_path_buf(),
        categories: vec![Category::Emitidas],
        mode: ExecutionMode::Lote,
        capture_timeout_ms: 1_000,
        login_wait_ms: 50,
        settle_timeout_ms: 50,
        ..Config::default()
    }
}

#[tokio::test]
async fn test_batch_skips_account_without_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let accounts = parse_accounts(ACCOUNTS).unwrap();
    let history = Arc::new(MemoryHistory::new());
    let factory = ScriptedFactory::new([ScriptedSurface::new().logged_in()]);
    let coordinator = BatchCoordinator::new(JobDirector::new(
        config(dir.path()),
        factory.clone(),
        history.clone(),
    ));

    let summary = coordinator.run_batch(&accounts).await;

    let records = history.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].account_id, "10");
    assert_ne!(records[0].status, RunStatus::Erro);

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert!(summary.log.contains("Empresa B"));
    assert_eq!(factory.opened().len(), 1);
}

#[tokio::test]
async fn test_batch_isolates_account_dirs_and_continues_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    let accounts = parse_accounts(
        r#"
        [[accounts]]
        id = "1"
        name = "Falha"
        login = "a"
        password = "b"

        [[accounts]]
        id = "2"
        name = "Ok"
        login = "c"
        password = "d"
        "#,
    )
    .unwrap();

    // 第一个会话一直停留在登录页
    let failing = ScriptedSurface::new()
        .with_login_element(
            nfse_harvest::workflow::authenticator::password_field(),
            "pwd",
        );
    let ok = ScriptedSurface::new().logged_in();

    let history = Arc::new(MemoryHistory::new());
    let coordinator = BatchCoordinator::new(JobDirector::new(
        config(dir.path()),
        ScriptedFactory::new([failing, ok]),
        history.clone(),
    ));

    let summary = coordinator.run_batch(&accounts).await;

    let statuses: Vec<_> = history.records().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![RunStatus::Erro, RunStatus::Sucesso]);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 1);

    let period = std::fs::read_dir(dir.path().join("jobs"))
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let stamp = std::fs::read_dir(&period).unwrap().next().unwrap().unwrap().path();
    assert!(stamp.join("1-Falha").exists());
    assert!(stamp.join("2-Ok").exists());
}

#[tokio::test]
async fn test_simulated_batch_runs_every_account() {
    let dir = tempfile::tempdir().unwrap();
    let accounts = parse_accounts(ACCOUNTS).unwrap();
    let history = Arc::new(MemoryHistory::new());
    let coordinator = BatchCoordinator::new(JobDirector::new(
        Config {
            live: false,
            ..config(dir.path())
        },
        ScriptedFactory::new(Vec::<ScriptedSurface>::new()),
        history.clone(),
    ));

    let summary = coordinator.run_batch(&accounts).await;

    assert_eq!(summary.skipped, 0);
    assert!(history
        .records()
        .iter()
        .all(|r| r.status == RunStatus::Simulado));
    assert_eq!(history.records().len(), 2);
}

#[tokio::test]
async fn test_app_without_accounts_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let history = assert_ok!(SqliteHistory::open(&dir.path().join("historico.db")));
    let app = App::with_history(config(dir.path()), Vec::new(), Arc::new(history.clone()));

    let summary = assert_ok!(app.run().await);
    assert_eq!(summary.reports.len(), 0);
    assert_eq!(assert_ok!(history.count()), 0);
}

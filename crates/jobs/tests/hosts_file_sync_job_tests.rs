use hostdb_application::ports::HostsFileCheckOutcome;
use hostdb_domain::HostDbConfig;
use hostdb_jobs::HostsFileSyncJob;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

mod helpers;
use helpers::MockHostDbMaintenancePort;

#[tokio::test(start_paused = true)]
async fn test_hosts_file_sync_checks_immediately() {
    let mock = Arc::new(MockHostDbMaintenancePort::new());
    let job = Arc::new(HostsFileSyncJob::new(mock.clone()).with_interval(60));

    job.start().await;
    sleep(Duration::from_millis(10)).await;

    assert_eq!(mock.hosts_check_count(), 1, "first tick fires at startup");
}

#[tokio::test(start_paused = true)]
async fn test_hosts_file_sync_fires_on_interval() {
    let mock = Arc::new(MockHostDbMaintenancePort::new().with_hosts_outcome(
        HostsFileCheckOutcome {
            reloaded: true,
            entries: 12,
        },
    ));
    let job = Arc::new(HostsFileSyncJob::new(mock.clone()).with_interval(1));

    job.start().await;
    sleep(Duration::from_millis(2100)).await;

    assert!(mock.hosts_check_count() >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_hosts_file_sync_error_is_non_fatal() {
    let mock = Arc::new(MockHostDbMaintenancePort::new());
    mock.set_should_fail_hosts_check(true).await;
    let job = Arc::new(HostsFileSyncJob::new(mock.clone()).with_interval(1));

    job.start().await;
    sleep(Duration::from_millis(2100)).await;

    assert!(
        mock.hosts_check_count() >= 2,
        "Job should continue running after check errors"
    );
}

#[tokio::test(start_paused = true)]
async fn test_hosts_file_sync_zero_interval_disables() {
    let mock = Arc::new(MockHostDbMaintenancePort::new());
    let job = Arc::new(HostsFileSyncJob::new(mock.clone()).with_interval(0));

    job.start().await;
    sleep(Duration::from_secs(5)).await;

    assert_eq!(mock.hosts_check_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hosts_file_sync_shuts_down_on_cancellation() {
    let mock = Arc::new(MockHostDbMaintenancePort::new());
    let token = CancellationToken::new();
    let job = Arc::new(
        HostsFileSyncJob::new(mock.clone())
            .with_interval(1)
            .with_cancellation(token.clone()),
    );

    job.start().await;
    sleep(Duration::from_millis(1100)).await;
    assert!(mock.hosts_check_count() >= 1);

    token.cancel();
    sleep(Duration::from_millis(100)).await;
    let count_after = mock.hosts_check_count();
    sleep(Duration::from_millis(3000)).await;

    assert_eq!(
        mock.hosts_check_count(),
        count_after,
        "Should not fire after cancellation"
    );
}

#[tokio::test(start_paused = true)]
async fn test_hosts_file_sync_from_config_zero_interval_disables() {
    let mock = Arc::new(MockHostDbMaintenancePort::new());
    let config = HostDbConfig {
        hostfile_check_interval: 0,
        ..HostDbConfig::default()
    };
    let job = Arc::new(HostsFileSyncJob::from_config(mock.clone(), &config));

    job.start().await;
    sleep(Duration::from_secs(5)).await;

    assert_eq!(mock.hosts_check_count(), 0);
}

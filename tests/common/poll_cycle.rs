use crate::{
    common::{
        bin_cmd::{BinCommand, BinOutput, FakeZpoolMode},
        EXPECTED_METRICS_OUTPUT,
    },
    metrics_url, HTTP_OK,
};
use std::time::Duration;

/// Long enough for at least one update at `--parse-seconds 1`
const WAIT_FOR_UPDATES: Duration = Duration::from_millis(2500);

const TANK_ALLOCATED: &str =
    r#"zpool_capacity_allocable_bytes{hostname="test-host",zpool_name="tank"} "#;

#[test]
fn values_follow_latest_poll() -> anyhow::Result<()> {
    const PORT: u16 = crate::common::LISTEN_PORT_POLL_CHANGING;

    let counter_dir = tempfile::tempdir()?;

    let (output, (metrics_before, metrics_after)) = BinCommand::new()
        .port(PORT)
        .arg("--parse-seconds")
        .arg("1")
        .fake_zpool_mode(FakeZpoolMode::Changing)
        .fake_zpool_counter_file(counter_dir.path().join("counter"))
        .spawn_cleanup_with(|| {
            let before = minreq::get(metrics_url(PORT)).send();
            std::thread::sleep(WAIT_FOR_UPDATES);
            let after = minreq::get(metrics_url(PORT)).send();
            (before, after)
        })?;

    {
        let BinOutput {
            status,
            stdout: _,
            stderr,
        } = output;
        assert!(!stderr.contains("WARN"), "stderr {stderr:?}");
        assert!(status.success());
    }

    let tank_allocated = |response: minreq::Response| -> anyhow::Result<f64> {
        assert_eq!(response.status_code, HTTP_OK);
        let content = response.as_str()?;
        let value = content
            .lines()
            .find_map(|line| line.strip_prefix(TANK_ALLOCATED))
            .ok_or_else(|| anyhow::anyhow!("missing tank series in {content:?}"))?;
        Ok(value.parse::<f64>()?)
    };

    let before = tank_allocated(metrics_before?)?;
    let after = tank_allocated(metrics_after?)?;
    assert!(before < 201e6 + 1.0, "before {before}");
    assert!(after >= 201e6, "after {after}");
    assert!(after > before, "before {before}, after {after}");

    Ok(())
}

#[test]
fn failed_cycle_keeps_previous_values() -> anyhow::Result<()> {
    const PORT: u16 = crate::common::LISTEN_PORT_POLL_FAIL_AFTER_FIRST;

    let counter_dir = tempfile::tempdir()?;

    let (output, response_metrics) = BinCommand::new()
        .port(PORT)
        .arg("--parse-seconds")
        .arg("1")
        .fake_zpool_mode(FakeZpoolMode::FailAfterFirst)
        .fake_zpool_counter_file(counter_dir.path().join("counter"))
        .spawn_cleanup_with(|| {
            std::thread::sleep(WAIT_FOR_UPDATES);
            minreq::get(metrics_url(PORT)).send()
        })?;

    {
        let BinOutput {
            status,
            stdout: _,
            stderr,
        } = output;

        let warning = stderr
            .lines()
            .find(|line| line.contains("WARN"))
            .ok_or_else(|| anyhow::anyhow!("no warning in stderr {stderr:?}"))?;
        assert!(
            warning.ends_with(concat!(
                "poll cycle failed, keeping previous values: ",
                "failed to parse zpool iostat: ",
                r#"could not convert capacity free field for pool "tank": "#,
                r#"unknown unit 'X' in "792X""#,
            )),
            "warning {warning:?}"
        );
        assert!(
            status.success(),
            "failed cycles must not stop the exporter, stderr {stderr:?}"
        );
    }

    let response_metrics = response_metrics?;
    assert_eq!(response_metrics.status_code, HTTP_OK);
    assert_eq!(response_metrics.as_str()?, EXPECTED_METRICS_OUTPUT);

    Ok(())
}

#[test]
fn new_pool_does_not_block_known_pools() -> anyhow::Result<()> {
    const PORT: u16 = crate::common::LISTEN_PORT_POLL_NEW_POOL;

    let counter_dir = tempfile::tempdir()?;

    let (output, response_metrics) = BinCommand::new()
        .port(PORT)
        .arg("--parse-seconds")
        .arg("1")
        .fake_zpool_mode(FakeZpoolMode::NewPoolAfterFirst)
        .fake_zpool_counter_file(counter_dir.path().join("counter"))
        .spawn_cleanup_with(|| {
            std::thread::sleep(WAIT_FOR_UPDATES);
            minreq::get(metrics_url(PORT)).send()
        })?;

    {
        let BinOutput {
            status,
            stdout: _,
            stderr,
        } = output;

        let warning = stderr
            .lines()
            .find(|line| line.contains("WARN"))
            .ok_or_else(|| anyhow::anyhow!("no warning in stderr {stderr:?}"))?;
        assert!(
            warning.contains(r#"1 of 4 pools not registered at startup, first "scratch": "#),
            "warning {warning:?}"
        );
        assert!(status.success(), "stderr {stderr:?}");
    }

    let response_metrics = response_metrics?;
    assert_eq!(response_metrics.status_code, HTTP_OK);
    let content = response_metrics.as_str()?;
    assert!(!content.contains("scratch"), "metrics {content:?}");

    let tank_allocated = content
        .lines()
        .find_map(|line| line.strip_prefix(TANK_ALLOCATED))
        .ok_or_else(|| anyhow::anyhow!("missing tank series in {content:?}"))?
        .parse::<f64>()?;
    assert!(tank_allocated >= 201e6, "tank allocated {tank_allocated}");

    Ok(())
}

use crate::common::bin_cmd::{BinCommand, BinOutput, FakeZpoolMode};

#[test]
fn exitcode_caught_1() -> anyhow::Result<()> {
    const PORT: u16 = crate::common::LISTEN_PORT_CHILD_EXITCODE_1;

    let (output, ()) = BinCommand::new()
        .port(PORT)
        .fake_zpool_mode(FakeZpoolMode::ExitCode1)
        .spawn_cleanup_with(|| {})?;

    {
        let BinOutput {
            status,
            stdout,
            stderr,
        } = output;

        assert_eq!(stdout, "");
        assert!(
            stderr.starts_with("Error: failed to create metrics\n\nCaused by:\n"),
            "stderr {stderr:?}"
        );
        assert!(
            stderr.contains("0: failed to execute zpool command"),
            "stderr {stderr:?}"
        );
        assert!(
            stderr.contains(r#"(args ["iostat"]) failed with exit status: 1, stderr: "exit1 stderr contents\n""#),
            "stderr {stderr:?}"
        );
        assert!(!status.success());
    }

    Ok(())
}

//! End-to-end update flow against fake hardware.

mod common;

use {
    common::*,
    dcflash::{
        CancelReason, Confirmation, Error, FlashOutcome, Recovery, State, UpdateOptions,
        UpdateStatus,
    },
};

#[test]
fn test_validated_flash_with_ready_marker_succeeds_and_cleans_up() {
    let workspace = Workspace::new();
    let tool = FakeTool::new();
    let serial = FakeSerial::new(vec![
        Script::closing(&[BANNER, VALID_BOOT]),
        Script::silent_after(&[BANNER, READY]),
    ]);
    let mut operator = Operator::default();

    let report = run(
        &workspace,
        workspace.options(),
        &FakePlatform::with_target(),
        &tool,
        &serial,
        &mut operator,
    )
    .unwrap();

    assert_eq!(report.port.as_deref(), Some("/dev/ttyACM0"));
    assert_eq!(report.validated, Some(true));
    assert_eq!(
        report.status,
        UpdateStatus::Finished {
            first: FlashOutcome::Success,
            recovery: Recovery::NotNeeded,
        }
    );
    assert_eq!(
        report.trail,
        [
            State::Idle,
            State::ToolReady,
            State::PortSelected,
            State::PreFlashCapture,
            State::Validated,
            State::Flashing,
            State::PostFlashCapture,
            State::Success,
            State::Done,
        ]
    );
    assert!(operator.asked.is_empty());
    assert_eq!(operator.offered, ["/dev/ttyACM0", "/dev/ttyS0"]);
    assert_eq!(tool.writes().len(), 1);
    assert_eq!(tool.count("erase-flash"), 0);
    assert_eq!(workspace.staged_files_left(), 0);
    assert_eq!(workspace.logs_left(), 0);
}

#[test]
fn test_unvalidated_device_declined_is_cancelled_without_flashing() {
    let workspace = Workspace::new();
    let tool = FakeTool::new();
    let serial = FakeSerial::new(vec![Script::closing(&[STOCK_BOOT])]);
    let mut operator = Operator::answering(&[false]);

    let report = run(
        &workspace,
        workspace.options(),
        &FakePlatform::with_target(),
        &tool,
        &serial,
        &mut operator,
    )
    .unwrap();

    assert_eq!(
        report.status,
        UpdateStatus::Cancelled {
            reason: CancelReason::UnvalidatedDeclined,
        }
    );
    assert_eq!(report.validated, Some(false));
    assert_eq!(operator.asked, [Confirmation::FlashUnvalidated]);
    assert_eq!(tool.writes().len(), 0);
    assert_eq!(report.trail.last(), Some(&State::Done));
    assert_eq!(workspace.staged_files_left(), 0);
    assert_eq!(workspace.logs_left(), 0);
}

#[test]
fn test_unvalidated_device_confirmed_is_flashed() {
    let workspace = Workspace::new();
    let tool = FakeTool::new();
    let serial = FakeSerial::new(vec![
        Script::closing(&[STOCK_BOOT]),
        Script::silent_after(&["Doppelgänger Core v2.0 booted\r\n"]),
    ]);
    let mut operator = Operator::answering(&[true]);

    let report = run(
        &workspace,
        workspace.options(),
        &FakePlatform::with_target(),
        &tool,
        &serial,
        &mut operator,
    )
    .unwrap();

    assert_eq!(report.status.outcome(), Some(FlashOutcome::Success));
    assert!(report.trail.contains(&State::Unvalidated));
    assert_eq!(tool.writes().len(), 1);
}

#[test]
fn test_boot_loop_recovery_reflash_succeeds_once() {
    let workspace = Workspace::new();
    let tool = FakeTool::new();
    let serial = FakeSerial::new(vec![
        Script::closing(&[VALID_BOOT]),
        Script::silent_after(&[BANNER, BANNER, BANNER]),
        Script::silent_after(&[BANNER, READY]),
    ]);
    let mut operator = Operator::answering(&[true]);

    let report = run(
        &workspace,
        workspace.options(),
        &FakePlatform::with_target(),
        &tool,
        &serial,
        &mut operator,
    )
    .unwrap();

    assert_eq!(
        report.status,
        UpdateStatus::Finished {
            first: FlashOutcome::BootLoop,
            recovery: Recovery::Performed {
                outcome: FlashOutcome::Success,
            },
        }
    );
    assert_eq!(report.status.outcome(), Some(FlashOutcome::Success));
    assert_eq!(operator.asked, [Confirmation::RecoveryReflash]);
    assert_eq!(tool.count("erase-flash"), 1);
    assert_eq!(tool.writes().len(), 2);

    let recovery_write = &tool.writes()[1];
    assert!(recovery_write.contains(&"--no-stub".to_string()));
    assert!(recovery_write.contains(&"dio".to_string()));

    assert_eq!(
        &report.trail[report.trail.len() - 6..],
        [
            State::BootLoop,
            State::RecoveryConfirm,
            State::RecoveryFlashing,
            State::RecoveryVerify,
            State::Success,
            State::Done,
        ]
    );
    assert_eq!(workspace.staged_files_left(), 0);
    assert_eq!(workspace.logs_left(), 0);
}

#[test]
fn test_recovery_is_not_repeated_when_it_still_loops() {
    let workspace = Workspace::new();
    let tool = FakeTool::new();
    let serial = FakeSerial::new(vec![
        Script::closing(&[VALID_BOOT]),
        Script::silent_after(&[BANNER, BANNER, BANNER]),
        Script::silent_after(&["Guru Meditation Error: Core  0 panic'ed (IllegalInstruction)\r\n"]),
    ]);
    let mut operator = Operator::answering(&[true, true]);

    let report = run(
        &workspace,
        workspace.options(),
        &FakePlatform::with_target(),
        &tool,
        &serial,
        &mut operator,
    )
    .unwrap();

    assert_eq!(report.status.outcome(), Some(FlashOutcome::BootLoop));
    assert_eq!(operator.asked, [Confirmation::RecoveryReflash]);
    assert_eq!(tool.count("erase-flash"), 1);
    assert_eq!(serial.opens(), 3);
}

#[test]
fn test_declined_recovery_reports_boot_loop() {
    let workspace = Workspace::new();
    let tool = FakeTool::new();
    let serial = FakeSerial::new(vec![
        Script::closing(&[VALID_BOOT]),
        Script::silent_after(&["abort() was called at PC 0x4200c5e1 on core 1\r\n"]),
    ]);
    let mut operator = Operator::answering(&[false]);

    let report = run(
        &workspace,
        workspace.options(),
        &FakePlatform::with_target(),
        &tool,
        &serial,
        &mut operator,
    )
    .unwrap();

    assert_eq!(
        report.status,
        UpdateStatus::Finished {
            first: FlashOutcome::BootLoop,
            recovery: Recovery::Declined,
        }
    );
    assert_eq!(tool.count("erase-flash"), 0);
}

#[test]
fn test_silent_device_is_unknown_without_recovery_offer() {
    let workspace = Workspace::new();
    let tool = FakeTool::new();
    let serial = FakeSerial::new(vec![
        Script::closing(&[VALID_BOOT]),
        Script::silent_after(&[BANNER, BANNER]),
    ]);
    let mut operator = Operator::default();

    let report = run(
        &workspace,
        workspace.options(),
        &FakePlatform::with_target(),
        &tool,
        &serial,
        &mut operator,
    )
    .unwrap();

    assert_eq!(report.status.outcome(), Some(FlashOutcome::Unknown));
    assert!(operator.asked.is_empty());
    assert!(operator.states.contains(&State::Unknown));
    assert_eq!(workspace.logs_left(), 0);
}

#[test]
fn test_port_lost_during_verification_is_unknown() {
    let workspace = Workspace::new();
    let tool = FakeTool::new();
    let serial = FakeSerial::new(vec![Script::closing(&[VALID_BOOT])]);
    let mut operator = Operator::default();

    let report = run(
        &workspace,
        workspace.options(),
        &FakePlatform::with_target(),
        &tool,
        &serial,
        &mut operator,
    )
    .unwrap();

    assert_eq!(report.status.outcome(), Some(FlashOutcome::Unknown));
    assert_eq!(serial.opens(), 2);
}

#[test]
fn test_port_unavailable_before_flashing_is_fatal() {
    let workspace = Workspace::new();
    let tool = FakeTool::new();
    let serial = FakeSerial::new(vec![]);
    let mut operator = Operator::default();

    let err = run(
        &workspace,
        workspace.options(),
        &FakePlatform::with_target(),
        &tool,
        &serial,
        &mut operator,
    )
    .unwrap_err();

    assert!(matches!(err, Error::PortUnavailable { .. }));
    assert_eq!(tool.writes().len(), 0);
    assert_eq!(workspace.staged_files_left(), 0);
}

#[test]
fn test_fast_parameters_fall_back_once() {
    let workspace = Workspace::new();
    let tool = FakeTool::new().with_write_codes(&[2, 0]);
    let serial = FakeSerial::new(vec![
        Script::closing(&[VALID_BOOT]),
        Script::silent_after(&[READY]),
    ]);
    let mut operator = Operator::default();
    let options = UpdateOptions {
        params: dcflash::FlashParams {
            mode: dcflash::FlashMode::Qio,
            frequency: dcflash::FlashFrequency::F80m,
            baud: 460_800,
            use_stub: false,
        },
        ..workspace.options()
    };

    let report = run(
        &workspace,
        options,
        &FakePlatform::with_target(),
        &tool,
        &serial,
        &mut operator,
    )
    .unwrap();

    assert_eq!(report.status.outcome(), Some(FlashOutcome::Success));
    assert_eq!(operator.retries, 1);
    let writes = tool.writes();
    assert_eq!(writes.len(), 2);
    assert!(writes[0].contains(&"460800".to_string()));
    assert!(writes[1].contains(&"115200".to_string()));
}

#[test]
fn test_write_failure_at_safe_parameters_is_fatal_and_cleans_up() {
    let workspace = Workspace::new();
    let tool = FakeTool::new().with_write_codes(&[2, 0]);
    let serial = FakeSerial::new(vec![Script::closing(&[VALID_BOOT])]);
    let mut operator = Operator::default();

    let err = run(
        &workspace,
        workspace.options(),
        &FakePlatform::with_target(),
        &tool,
        &serial,
        &mut operator,
    )
    .unwrap_err();

    assert!(matches!(err, Error::WriteFailed { .. }));
    assert_eq!(tool.writes().len(), 1);
    assert_eq!(operator.retries, 0);
    assert_eq!(workspace.staged_files_left(), 0);
    assert_eq!(operator.states.last(), Some(&State::Done));
}

#[test]
fn test_no_ports_is_fatal() {
    let workspace = Workspace::new();
    let tool = FakeTool::new();
    let serial = FakeSerial::new(vec![]);
    let mut operator = Operator::default();

    let err = run(
        &workspace,
        workspace.options(),
        &FakePlatform { ports: vec![] },
        &tool,
        &serial,
        &mut operator,
    )
    .unwrap_err();

    assert!(matches!(err, Error::NoPortsFound));
    assert_eq!(serial.opens(), 0);
    assert_eq!(workspace.staged_files_left(), 0);
}

#[test]
fn test_old_tool_stops_before_touching_the_device() {
    let workspace = Workspace::new();
    let tool = FakeTool {
        version: "esptool.py v4.2.1",
        ..FakeTool::new()
    };
    let serial = FakeSerial::new(vec![]);
    let mut operator = Operator::default();

    let err = run(
        &workspace,
        workspace.options(),
        &FakePlatform::with_target(),
        &tool,
        &serial,
        &mut operator,
    )
    .unwrap_err();

    assert!(matches!(err, Error::VersionTooOld { .. }));
    assert!(operator.offered.is_empty());
    assert_eq!(tool.calls.borrow().len(), 1);
}

#[test]
fn test_configured_port_skips_selection() {
    let workspace = Workspace::new();
    let tool = FakeTool::new();
    let serial = FakeSerial::new(vec![
        Script::closing(&[VALID_BOOT]),
        Script::silent_after(&[READY]),
    ]);
    let mut operator = Operator::default();
    let options = UpdateOptions {
        port: Some("/dev/ttyUSB3".into()),
        ..workspace.options()
    };

    let report = run(
        &workspace,
        options,
        &FakePlatform { ports: vec![] },
        &tool,
        &serial,
        &mut operator,
    )
    .unwrap();

    assert_eq!(report.port.as_deref(), Some("/dev/ttyUSB3"));
    assert!(operator.offered.is_empty());
    assert!(
        tool.writes()[0]
            .windows(2)
            .any(|w| w[0] == "--port" && w[1] == "/dev/ttyUSB3")
    );
}

// SPDX-License-Identifier: BSD-3-Clause

use std::{collections::HashMap, sync::Arc, time::Duration};

use archon_driver::{
    cfg::config::{CcdRegion, Observatory},
    coordinator::{Coordinator, ExposureFlavor, ExposureParams},
    device::{ControllerStatus, Device},
    external::{ShutterActor, ShutterReply, SimpleFitsSink},
    CoreError,
};
use async_trait::async_trait;
use tokio::net::TcpListener;

use super::common;

struct AlwaysOkShutter;

#[async_trait]
impl ShutterActor for AlwaysOkShutter {
    async fn open(&self) -> Result<ShutterReply, CoreError> {
        Ok(ShutterReply { status: "open".to_string() })
    }

    async fn close(&self) -> Result<ShutterReply, CoreError> {
        Ok(ShutterReply { status: "closed".to_string() })
    }
}

/// Reports a status that isn't `"open"`/`"closed"`, exercising the
/// `SHUTTER_UNKNOWN` path of the exposure handshake.
struct GibberishShutter;

#[async_trait]
impl ShutterActor for GibberishShutter {
    async fn open(&self) -> Result<ShutterReply, CoreError> {
        Ok(ShutterReply { status: "ajar".to_string() })
    }

    async fn close(&self) -> Result<ShutterReply, CoreError> {
        Ok(ShutterReply { status: "ajar".to_string() })
    }
}

/// Fails every request outright, exercising the `SHUTTER_FAILED` path of
/// the exposure handshake.
struct FailingShutter;

#[async_trait]
impl ShutterActor for FailingShutter {
    async fn open(&self) -> Result<ShutterReply, CoreError> {
        Err(CoreError::ConnClosed)
    }

    async fn close(&self) -> Result<ShutterReply, CoreError> {
        Err(CoreError::ConnClosed)
    }
}

/// Answers the full exposure sequence (§4.7.1): parameter sets, a readout
/// poll that completes on its second `FRAME` reply, then lock/fetch/lock.
async fn run_cooperative_controller(listener: TcpListener) {
    let (mut socket, _) = listener.accept().await.expect("accept");
    let mut frame_calls = 0u32;
    while let Some((id, cmd)) = common::read_command(&mut socket).await {
        if cmd.starts_with("FASTLOADPARAM") || cmd == "RESETTIMING" || cmd.starts_with("LOCK") {
            common::write_ok(&mut socket, id, "").await;
        } else if cmd == "FRAME" {
            frame_calls += 1;
            let complete = if frame_calls <= 1 { 0 } else { 1 };
            let text = format!(
                "WBUF=1 BUF1COMPLETE={complete} BUF1WIDTH=2 BUF1HEIGHT=2 BUF1SAMPLE=0 BUF1BASE=0 BUF1TIMESTAMP=1"
            );
            common::write_ok(&mut socket, id, &text).await;
        } else if cmd.starts_with("FETCH") {
            let body = common::chunk_with_u16_pixels(&[1, 2, 3, 4]);
            common::write_binary_chunk(&mut socket, id, &body).await;
        } else {
            common::write_err(&mut socket, id).await;
        }
    }
}

/// Fails the very first command it receives, per the "uncooperative
/// device" half of the sibling-cancellation scenario.
async fn run_uncooperative_controller(listener: TcpListener) {
    let (mut socket, _) = listener.accept().await.expect("accept");
    if let Some((id, _)) = common::read_command(&mut socket).await {
        common::write_err(&mut socket, id).await;
    }
}

fn one_ccd_covering_whole_frame() -> HashMap<String, CcdRegion> {
    let mut ccds = HashMap::new();
    ccds.insert("sci".to_string(), CcdRegion { x0: 0, y0: 0, x1: 2, y1: 2 });
    ccds
}

#[tokio::test]
async fn successful_batch_writes_fits_and_advances_counter() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(run_cooperative_controller(listener));

    let device = Device::connect("sp1", addr, Duration::from_secs(2), one_ccd_covering_whole_frame())
        .await
        .expect("connect");
    device.status.set(ControllerStatus::IDLE);

    let data_dir = std::env::temp_dir().join(format!("archon-coordinator-test-{}-ok", std::process::id()));
    std::fs::create_dir_all(&data_dir).expect("mkdir");

    let coordinator = Coordinator::new(
        data_dir.clone(),
        "{controller}-{exposure_no}.fits".to_string(),
        Observatory::Apo,
        Duration::from_secs(5),
        Arc::new(AlwaysOkShutter),
        Arc::new(SimpleFitsSink),
    );

    coordinator
        .expose(
            &[Arc::new(device)],
            ExposureParams {
                flavor: ExposureFlavor::Object,
                exposure_time_s: 0.01,
            },
        )
        .await
        .expect("expose");

    let counter_text = std::fs::read_to_string(data_dir.join("nextExposureNumber")).expect("counter");
    assert_eq!(counter_text, "2");

    let written = std::fs::read_dir(&data_dir)
        .expect("read_dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .flat_map(|mjd_dir| std::fs::read_dir(mjd_dir.path()).expect("read mjd dir").filter_map(|f| f.ok()))
        .any(|f| f.file_name().to_string_lossy().ends_with(".fits"));
    assert!(written, "expected a .fits file under an mjd subdirectory");

    std::fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test]
async fn failing_sibling_fails_whole_batch_without_advancing_counter() {
    let good_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let good_addr = good_listener.local_addr().expect("local_addr");
    tokio::spawn(run_cooperative_controller(good_listener));

    let bad_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let bad_addr = bad_listener.local_addr().expect("local_addr");
    tokio::spawn(run_uncooperative_controller(bad_listener));

    let good_device = Device::connect("sp1", good_addr, Duration::from_secs(2), one_ccd_covering_whole_frame())
        .await
        .expect("connect good");
    let bad_device = Device::connect("sp2", bad_addr, Duration::from_secs(2), HashMap::new())
        .await
        .expect("connect bad");
    good_device.status.set(ControllerStatus::IDLE);
    bad_device.status.set(ControllerStatus::IDLE);

    let data_dir = std::env::temp_dir().join(format!("archon-coordinator-test-{}-fail", std::process::id()));
    std::fs::create_dir_all(&data_dir).expect("mkdir");

    let coordinator = Coordinator::new(
        data_dir.clone(),
        "{controller}-{exposure_no}.fits".to_string(),
        Observatory::Apo,
        Duration::from_secs(5),
        Arc::new(AlwaysOkShutter),
        Arc::new(SimpleFitsSink),
    );

    let result = coordinator
        .expose(
            &[Arc::new(good_device), Arc::new(bad_device)],
            ExposureParams {
                flavor: ExposureFlavor::Object,
                exposure_time_s: 0.01,
            },
        )
        .await;

    assert!(result.is_err());
    assert!(
        !data_dir.join("nextExposureNumber").exists()
            || std::fs::read_to_string(data_dir.join("nextExposureNumber")).expect("counter") != "2"
    );

    std::fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test]
async fn unrecognized_shutter_status_fails_the_exposure_with_shutter_unknown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(run_cooperative_controller(listener));

    let device = Device::connect("sp1", addr, Duration::from_secs(2), one_ccd_covering_whole_frame())
        .await
        .expect("connect");
    device.status.set(ControllerStatus::IDLE);

    let data_dir = std::env::temp_dir().join(format!("archon-coordinator-test-{}-unknown", std::process::id()));
    std::fs::create_dir_all(&data_dir).expect("mkdir");

    let coordinator = Coordinator::new(
        data_dir.clone(),
        "{controller}-{exposure_no}.fits".to_string(),
        Observatory::Apo,
        Duration::from_secs(5),
        Arc::new(GibberishShutter),
        Arc::new(SimpleFitsSink),
    );

    let result = coordinator
        .expose(
            &[Arc::new(device)],
            ExposureParams {
                flavor: ExposureFlavor::Object,
                exposure_time_s: 0.01,
            },
        )
        .await;

    assert!(matches!(result, Err(CoreError::ShutterUnknown(_))));
    std::fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test]
async fn failing_shutter_fails_the_exposure_with_shutter_failed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(run_cooperative_controller(listener));

    let device = Device::connect("sp1", addr, Duration::from_secs(2), one_ccd_covering_whole_frame())
        .await
        .expect("connect");
    device.status.set(ControllerStatus::IDLE);

    let data_dir = std::env::temp_dir().join(format!("archon-coordinator-test-{}-failed", std::process::id()));
    std::fs::create_dir_all(&data_dir).expect("mkdir");

    let coordinator = Coordinator::new(
        data_dir.clone(),
        "{controller}-{exposure_no}.fits".to_string(),
        Observatory::Apo,
        Duration::from_secs(5),
        Arc::new(FailingShutter),
        Arc::new(SimpleFitsSink),
    );

    let result = coordinator
        .expose(
            &[Arc::new(device)],
            ExposureParams {
                flavor: ExposureFlavor::Object,
                exposure_time_s: 0.01,
            },
        )
        .await;

    assert!(matches!(result, Err(CoreError::ShutterFailed(_))));
    std::fs::remove_dir_all(&data_dir).ok();
}

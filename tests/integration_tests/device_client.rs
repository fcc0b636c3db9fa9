// SPDX-License-Identifier: BSD-3-Clause

use std::{collections::HashMap, time::Duration};

use archon_driver::device::Device;
use tokio::net::TcpListener;

use super::common;

#[tokio::test]
async fn parses_status_system_and_frame_replies() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        while let Some((id, cmd)) = common::read_command(&mut socket).await {
            match cmd.as_str() {
                "STATUS" => common::write_ok(&mut socket, id, "POWER=1 BACKPLANE_TEMP=25.5").await,
                "SYSTEM" => common::write_ok(&mut socket, id, "MOD2_TYPE=5 BACKPLANE_TYPE=1").await,
                "FRAME" => {
                    common::write_ok(
                        &mut socket,
                        id,
                        "WBUF=1 BUF1COMPLETE=1 BUF1WIDTH=2 BUF1HEIGHT=2 BUF1SAMPLE=0 BUF1BASE=0 BUF1TIMESTAMP=ABCDEF01",
                    )
                    .await
                },
                _ => common::write_err(&mut socket, id).await,
            }
        }
    });

    let device = Device::connect("sp1", addr, Duration::from_secs(2), HashMap::new())
        .await
        .expect("connect");

    let status = device.get_status().await.expect("status");
    assert_eq!(status.get("power").map(|v| format!("{v:?}")), Some("Int(1)".to_string()));

    let system = device.get_system().await.expect("system");
    assert_eq!(system.get("mod2_name").map(String::as_str), Some("HEATER"));

    let frame = device.get_frame().await.expect("frame");
    assert_eq!(frame.get("buf1width").map(|v| format!("{v:?}")), Some("Int(2)".to_string()));
    assert_eq!(
        frame.get("buf1timestamp").map(|v| format!("{v:?}")),
        Some("Hex(2882400001)".to_string())
    );
}

#[tokio::test]
async fn fails_with_device_cmd_failed_on_error_reply() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        if let Some((id, _)) = common::read_command(&mut socket).await {
            common::write_err(&mut socket, id).await;
        }
    });

    let device = Device::connect("sp1", addr, Duration::from_secs(2), HashMap::new())
        .await
        .expect("connect");

    let result = device.get_status().await;
    assert!(matches!(result, Err(archon_driver::CoreError::DeviceCmdFailed { .. })));
}

#[tokio::test]
async fn fetch_reassembles_binary_chunks_into_pixels() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        while let Some((id, cmd)) = common::read_command(&mut socket).await {
            if cmd == "FRAME" {
                common::write_ok(
                    &mut socket,
                    id,
                    "WBUF=1 BUF1COMPLETE=1 BUF1WIDTH=2 BUF1HEIGHT=2 BUF1SAMPLE=0 BUF1BASE=0 BUF1TIMESTAMP=1",
                )
                .await;
            } else if cmd.starts_with("LOCK") {
                common::write_ok(&mut socket, id, "").await;
            } else if cmd.starts_with("FETCH") {
                let body = common::chunk_with_u16_pixels(&[1, 2, 3, 4]);
                common::write_binary_chunk(&mut socket, id, &body).await;
            } else {
                common::write_err(&mut socket, id).await;
            }
        }
    });

    let device = Device::connect("sp1", addr, Duration::from_secs(2), HashMap::new())
        .await
        .expect("connect");

    let frame = device.fetch(1).await.expect("fetch");
    assert_eq!(frame.width, 2);
    assert_eq!(frame.height, 2);
    assert_eq!(frame.pixels, vec![1, 2, 3, 4]);
}

// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Drives a controller over the real transport: a fake worker and a fake
//! generator exchange the full HELLO / REGISTER / DEPLOY / DEPLOYED /
//! PROFILE_DATA / QUERY choreography with it.

use gpufleet_channel::BlockingQueue;
use gpufleet_config::{
    ControllerParams, EngineConfig, EngineKind, Parameters, RemoteEndpoint, SchedulingPolicy,
};
use gpufleet_controller::Controller;
use gpufleet_state::ProfileRecord;
use gpufleet_transport::{Inlet, Message, MessageKind, Outlet};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tokio::time::timeout;

const GIB: u64 = 1 << 30;
const WAIT: Duration = Duration::from_secs(15);

/// resnet50 profiled at batch size 32 only: 200 qps, 2 GiB.
fn write_profiles(root: &Path) {
    let memory_dir = root.join("memory/xavier");
    let timing_dir = root.join("inference-times/xavier");
    fs::create_dir_all(&memory_dir).expect("create memory dir");
    fs::create_dir_all(&timing_dir).expect("create timing dir");
    fs::write(
        memory_dir.join("resnet50.csv"),
        "batch_size,total_reserved\n32,2147483648\n",
    )
    .expect("write memory table");
    fs::write(
        timing_dir.join("resnet50.csv"),
        "batch_size,inference_time\n32,0.16\n",
    )
    .expect("write timing table");
}

async fn expect(sink: &BlockingQueue<Message>, kind: MessageKind) -> Message {
    let message = timeout(WAIT, sink.pop())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {kind}"));
    assert_eq!(message.kind, kind, "unexpected message: {message}");
    message
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn registration_deployment_and_dispatch_flow() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    write_profiles(data_dir.path());

    // The fake worker's listening side.
    let worker_sink = BlockingQueue::new();
    let worker_inlet = Inlet::bind("127.0.0.1", 0, worker_sink.clone())
        .await
        .expect("bind worker inlet");

    let controller_port = portpicker::pick_unused_port().expect("no free port");
    let config = EngineConfig {
        id: 1,
        kind: EngineKind::Controller,
        host: "127.0.0.1".to_owned(),
        port: controller_port,
        parameters: Parameters::Controller(ControllerParams {
            scheduling: SchedulingPolicy::Infaas,
            log_dir: None,
            data_dir: Some(data_dir.path().to_path_buf()),
        }),
        remote_engines: vec![RemoteEndpoint {
            remote_host: "127.0.0.1".to_owned(),
            remote_port: worker_inlet.local_addr().port(),
        }],
    };
    let controller = Controller::new(&config).expect("controller");
    let runner = controller.clone();
    let _ = tokio::spawn(async move { runner.run().await });

    // Handshake: the controller greets, the worker reports its memory.
    let hello = expect(&worker_sink, MessageKind::Hello).await;
    let worker_id: u32 = hello.parse_field("worker_id").expect("worker_id");

    let worker_out = Outlet::connect(worker_id, "127.0.0.1", controller_port);
    worker_out.push(Message::with_data(
        MessageKind::Hello,
        [
            ("worker_id", worker_id.to_string()),
            ("total_mem", (64 * GIB).to_string()),
            ("hardware_platform", "xavier".to_owned()),
        ],
    ));

    // A generator registers one application.
    let generator_out = Outlet::connect(9, "127.0.0.1", controller_port);
    generator_out.push(Message::with_data(
        MessageKind::Register,
        [("app1", "resnet50")],
    ));

    let deploy = expect(&worker_sink, MessageKind::Deploy).await;
    assert_eq!(deploy.field("name").expect("name"), "resnet50");
    assert_eq!(deploy.field("batch_size").expect("batch_size"), "32");
    let variant_id: u32 = deploy.parse_field("id").expect("id");
    assert!((999..=9999).contains(&variant_id));

    worker_out.push(Message::with_data(
        MessageKind::Deployed,
        [
            ("worker_id", worker_id.to_string()),
            ("free_memory", (62 * GIB).to_string()),
            ("total_memory", (64 * GIB).to_string()),
        ],
    ));

    // Telemetry hands the load balancer its first weights.
    let records = vec![ProfileRecord {
        variant_id,
        variant_name: "resnet50".to_owned(),
        throughput: 200.0,
        input_rate: vec![0; 10],
    }];
    worker_out.push(Message::with_data(
        MessageKind::ProfileData,
        [
            ("worker_id", worker_id.to_string()),
            (
                "variants",
                serde_json::to_string(&records).expect("serialize records"),
            ),
        ],
    ));

    // 64 queries fill exactly two batches of 32.
    for _ in 0..64 {
        generator_out.push(Message::with_data(MessageKind::Query, [("app_id", "app1")]));
    }

    for _ in 0..2 {
        let query = expect(&worker_sink, MessageKind::Query).await;
        assert_eq!(
            query.parse_field::<u32>("variant_id").expect("variant_id"),
            variant_id
        );
        assert_eq!(query.field("batch_size").expect("batch_size"), "32");
    }

    // A third batch never fills, so nothing else reaches the worker.
    let extra = timeout(Duration::from_millis(500), worker_sink.pop()).await;
    assert!(extra.is_err(), "unexpected extra message: {extra:?}");
}

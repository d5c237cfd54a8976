//! End-to-end scenario tests driving the public crate surface the way a
//! caller would: construct a `VirtualTransport`, open a `DeviceActor`
//! against it, and exercise probe/transfer/journal reconciliation together.
//!
//! Covers S1 (open/probe/enumerate/close on an empty device) and S6
//! (write reconciliation on reopen); S2-S5 are covered at the unit level
//! next to the modules they exercise.

use mtp_core::journal::{BeginTransfer, InMemoryJournal, TransferJournal, TransferKind, TransferState};
use mtp_core::ptp::{AccessCapability, Container, DeviceInfo, OperationCode, StorageInfo, StorageType};
use mtp_core::quirks::DevicePolicy;
use mtp_core::transport::{DeviceSummary, UsbSpeed, VirtualTransport};
use mtp_core::{ActorState, DeviceActor, TransferEngine};
use std::sync::Arc;

fn summary() -> DeviceSummary {
    DeviceSummary { device_id: "dev-1".to_string(), vid: 0x0001, pid: 0x0001, bus: 1, address: 1, speed: UsbSpeed::High }
}

fn empty_device_info() -> DeviceInfo {
    DeviceInfo {
        standard_version: 100,
        vendor_extension_id: 6,
        vendor_extension_version: 100,
        functional_mode: 0,
        operations_supported: vec![0x1001, 0x1002, 0x1003, 0x1004, 0x1005, 0x1006, 0x1007, 0x1008, 0x100B, 0x100C, 0x100D],
        events_supported: vec![],
        device_properties_supported: vec![],
        manufacturer: "Virtual".to_string(),
        model: "EmptyDevice".to_string(),
        device_version: "1.0".to_string(),
        serial_number: "0001".to_string(),
    }
}

async fn push_open_sequence(transport: &VirtualTransport, info: &DeviceInfo) {
    use mtp_core::codec::{Encode, Writer};
    let mut w = Writer::new();
    info.encode(&mut w);
    transport.push_reply(Container::data(OperationCode::GetDeviceInfo as u16, 1, w.into_bytes()).encode());
    transport.push_reply(Container::response(mtp_core::error::response_code::OK, 1, vec![]).encode());
    transport.push_reply(Container::response(mtp_core::error::response_code::OK, 2, vec![]).encode());
}

#[tokio::test]
async fn s1_open_probe_enumerate_close_on_empty_device() {
    use mtp_core::codec::{Encode, Writer};

    let transport = VirtualTransport::new(summary());
    let info = empty_device_info();
    push_open_sequence(&transport, &info).await;

    let actor = DeviceActor::new("dev-1", DevicePolicy::conservative_default());
    actor.open(&transport).await.unwrap();
    assert_eq!(actor.state().await, ActorState::Ready);

    let policy = actor.policy().await;
    let receipt = mtp_core::probe::run_probe(&actor, policy.skip_get_object_prop_list).await.unwrap();
    assert!(!receipt.prop_list_usable, "0x9805 is absent from operations_supported, so propListUsable must stay false");

    transport.push_reply(
        Container::data(OperationCode::GetStorageIDs as u16, 3, {
            let mut w = Writer::new();
            w.write_array(&[0x0001_0001u32], |w, v| w.write_u32(*v));
            w.into_bytes()
        })
        .encode(),
    );
    transport.push_reply(Container::response(mtp_core::error::response_code::OK, 3, vec![]).encode());

    let storage_outcome = actor.transact(OperationCode::GetStorageIDs as u16, vec![], None, true).await.unwrap();
    let storage_ids = mtp_core::codec::Reader::new(&storage_outcome.payload.unwrap())
        .read_array(|r| r.read_u32())
        .unwrap();
    assert_eq!(storage_ids, vec![0x0001_0001]);

    let storage_info = StorageInfo {
        storage_type: StorageType::FixedRam,
        filesystem_type: 2,
        access_capability: AccessCapability::ReadWrite,
        max_capacity: 1 << 30,
        free_space_bytes: 1 << 30,
        storage_description: "Internal".to_string(),
        volume_label: "".to_string(),
    };
    let mut sw = Writer::new();
    storage_info.encode(&mut sw);
    transport.push_reply(Container::data(OperationCode::GetStorageInfo as u16, 4, sw.into_bytes()).encode());
    transport.push_reply(Container::response(mtp_core::error::response_code::OK, 4, vec![]).encode());

    let info_outcome = actor.transact(OperationCode::GetStorageInfo as u16, vec![0x0001_0001], None, true).await.unwrap();
    let payload = info_outcome.payload.unwrap();
    let decoded = <StorageInfo as mtp_core::codec::Decode>::decode(&mut mtp_core::codec::Reader::new(&payload)).unwrap();
    assert_eq!(decoded.max_capacity, 1 << 30);
    assert_eq!(decoded.free_space_bytes, 1 << 30);

    // `list(nil, storageId)` yields an empty batch exactly once: empty device, empty GetObjectHandles.
    transport.push_reply(
        Container::data(OperationCode::GetObjectHandles as u16, 5, {
            let mut w = Writer::new();
            w.write_array(&Vec::<u32>::new(), |w, v: &u32| w.write_u32(*v));
            w.into_bytes()
        })
        .encode(),
    );
    transport.push_reply(Container::response(mtp_core::error::response_code::OK, 5, vec![]).encode());

    let handles_outcome = actor
        .transact(OperationCode::GetObjectHandles as u16, vec![0x0001_0001, 0, 0xFFFF_FFFF], None, true)
        .await
        .unwrap();
    let handles = mtp_core::codec::Reader::new(&handles_outcome.payload.unwrap()).read_array(|r| r.read_u32()).unwrap();
    assert!(handles.is_empty());

    actor.close().await;
    assert_eq!(actor.state().await, ActorState::Closed);
}

#[tokio::test]
async fn s6_reconciliation_on_reopen_deletes_the_orphaned_remote_handle() {
    let transport = VirtualTransport::new(summary());
    let info = empty_device_info();
    push_open_sequence(&transport, &info).await;

    let actor = DeviceActor::new("dev-1", DevicePolicy::conservative_default());
    actor.open(&transport).await.unwrap();

    let journal: Arc<InMemoryJournal> = Arc::new(InMemoryJournal::new());
    let id = journal
        .begin(BeginTransfer {
            device_id: "dev-1".to_string(),
            kind: TransferKind::Write,
            handle: None,
            parent_handle: None,
            path_key: None,
            name: "note.txt".to_string(),
            total_bytes: Some(11),
            supports_partial: false,
            local_temp_url: "/tmp/note.txt".to_string(),
            final_url: None,
        })
        .unwrap();
    journal.record_remote_handle(&id, 900).unwrap();
    journal.fail(&id, "device disappeared mid-upload").unwrap();

    // The engine's reconciliation is best-effort: it issues DeleteObject(900)
    // without first checking existence, so a single OK response suffices.
    transport.push_reply(Container::response(mtp_core::error::response_code::OK, 3, vec![]).encode());

    let engine = TransferEngine::new(journal.clone() as Arc<dyn TransferJournal>);
    engine.reconcile_on_reopen(&actor, "dev-1").await.unwrap();

    let record = journal.get(&id).unwrap();
    assert_eq!(record.state, TransferState::Failed, "a failed record stays failed; reconciliation only cleans up the remote side");
    assert_eq!(record.remote_handle, Some(900));

    let log = transport.bulk_out_log();
    let delete_issued = log
        .iter()
        .filter_map(|bytes| Container::decode(bytes).ok())
        .any(|c| c.code == OperationCode::DeleteObject as u16 && c.params.first() == Some(&900));
    assert!(delete_issued, "reconciliation must issue DeleteObject(900) before any resume is honored");
}

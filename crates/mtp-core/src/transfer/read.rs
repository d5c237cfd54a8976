//! Chunked object download (spec §4.6 "Read contract").

use crate::actor::DeviceActor;
use crate::codec::{Decode, Reader};
use crate::error::MtpError;
use crate::journal::{BeginTransfer, TransferId, TransferJournal, TransferKind};
use crate::ptp::{ObjectInfo, OperationCode};
use std::path::PathBuf;
use std::time::Instant;
use tokio::io::AsyncWriteExt;

/// Inputs to [`read`]. `range` narrows the download to a byte window; the
/// device policy must support partial reads for this to be honored (spec
/// §4.6 "If device policy declares partial read unsupported and a range is
/// supplied, fails with Unsupported").
pub struct ReadRequest {
    pub device_id: String,
    pub handle: u32,
    pub name: String,
    pub range: Option<(u64, u64)>,
    pub temp_path: PathBuf,
    pub final_path: PathBuf,
}

/// Runs the full read algorithm of spec §4.6 steps 1-7 against an already
/// `Ready` actor, journaling progress as it goes.
pub async fn read(actor: &DeviceActor, journal: &dyn TransferJournal, request: ReadRequest) -> Result<TransferId, MtpError> {
    if request.handle == 0 {
        return Err(MtpError::Internal { reason: "read() requires a non-zero object handle".to_string() });
    }

    let policy = actor.policy().await;
    if request.range.is_some() && !policy.supports_partial_read {
        return Err(MtpError::Unsupported { reason: "device policy declares partial read unsupported".to_string() });
    }

    let info_outcome = actor.transact(OperationCode::GetObjectInfo as u16, vec![request.handle], None, true).await?;
    let info_payload = info_outcome.payload.ok_or_else(|| MtpError::Internal { reason: "GetObjectInfo returned no data phase".to_string() })?;
    let info = ObjectInfo::decode(&mut Reader::new(&info_payload))?;

    let total_bytes = match info.effective_size() {
        Some(size) => Some(size),
        None => super::fetch_object_size64(actor, request.handle).await?,
    };

    let id = journal.begin(BeginTransfer {
        device_id: request.device_id.clone(),
        kind: TransferKind::Read,
        handle: Some(request.handle),
        parent_handle: if info.parent_object == 0 { None } else { Some(info.parent_object) },
        path_key: None,
        name: request.name.clone(),
        total_bytes,
        supports_partial: policy.supports_partial_read,
        local_temp_url: request.temp_path.display().to_string(),
        final_url: Some(request.final_path.display().to_string()),
    })?;

    match run_chunks(actor, journal, &id, &request, total_bytes).await {
        Ok(()) => Ok(id),
        Err(e) => {
            let _ = journal.fail(&id, &e.to_string());
            Err(e)
        }
    }
}

async fn run_chunks(
    actor: &DeviceActor,
    journal: &dyn TransferJournal,
    id: &TransferId,
    request: &ReadRequest,
    total_bytes: Option<u64>,
) -> Result<(), MtpError> {
    let policy = actor.policy().await;
    let max_chunk = policy.max_chunk_bytes as u64;
    let (start, remaining_total) = request.range.unwrap_or((0, total_bytes.unwrap_or(0)));

    let mut file = tokio::fs::File::create(&request.temp_path)
        .await
        .map_err(|e| MtpError::Internal { reason: format!("failed to create temp file: {e}") })?;

    let started = Instant::now();
    let mut committed: u64 = 0;
    let mut offset = start;
    let end = start + remaining_total;

    while offset < end {
        let chunk_len = max_chunk.min(end - offset);
        let outcome = if request.range.is_none() && offset == 0 && chunk_len == remaining_total {
            actor.transact(OperationCode::GetObject as u16, vec![request.handle], None, true).await?
        } else {
            actor
                .transact(OperationCode::GetPartialObject64 as u16, vec![request.handle, offset as u32, (offset >> 32) as u32, chunk_len as u32], None, true)
                .await?
        };
        let chunk = outcome.payload.unwrap_or_default();
        file.write_all(&chunk)
            .await
            .map_err(|e| MtpError::Internal { reason: format!("failed writing temp file: {e}") })?;
        committed += chunk.len() as u64;
        offset += chunk.len() as u64;
        journal.update_progress(id, committed)?;
        if chunk.is_empty() {
            break;
        }
    }
    file.flush().await.map_err(|e| MtpError::Internal { reason: format!("failed flushing temp file: {e}") })?;
    drop(file);

    let elapsed = started.elapsed().as_secs_f64().max(1e-6);
    let mbps = (committed as f64 / 1_000_000.0) / elapsed;
    journal.record_throughput(id, mbps)?;
    journal.complete(id)?;

    tokio::fs::rename(&request.temp_path, &request.final_path)
        .await
        .map_err(|e| MtpError::Internal { reason: format!("failed to rename temp file to final path: {e}") })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Encode, Writer};
    use crate::error::response_code;
    use crate::journal::InMemoryJournal;
    use crate::ptp::{AssociationType, Container, DeviceInfo, ObjectFormat};
    use crate::quirks::DevicePolicy;
    use crate::transport::{DeviceSummary, UsbSpeed, VirtualTransport};

    async fn opened_actor(transport: &VirtualTransport) -> DeviceActor {
        let device_info = DeviceInfo {
            standard_version: 100,
            vendor_extension_id: 6,
            vendor_extension_version: 100,
            functional_mode: 0,
            operations_supported: vec![0x1001, 0x1002, 0x1003, 0x1008, 0x1009],
            events_supported: vec![],
            device_properties_supported: vec![],
            manufacturer: "Virtual".to_string(),
            model: "TestDevice".to_string(),
            device_version: "1.0".to_string(),
            serial_number: "0001".to_string(),
        };
        let mut w = Writer::new();
        device_info.encode(&mut w);
        transport.push_reply(Container::data(OperationCode::GetDeviceInfo as u16, 1, w.into_bytes()).encode());
        transport.push_reply(Container::response(response_code::OK, 1, vec![]).encode());
        transport.push_reply(Container::response(response_code::OK, 2, vec![]).encode());
        let actor = DeviceActor::new("dev-1", DevicePolicy::conservative_default());
        actor.open(transport).await.unwrap();
        actor
    }

    #[tokio::test]
    async fn reads_a_known_1024_byte_object_s2() {
        let transport = VirtualTransport::new(DeviceSummary { device_id: "dev-1".to_string(), vid: 1, pid: 1, bus: 1, address: 1, speed: UsbSpeed::High });
        let actor = opened_actor(&transport).await;

        let info = ObjectInfo {
            storage_id: 1,
            format: ObjectFormat(0x3000),
            parent_object: 0,
            association_type: AssociationType::Undefined,
            size32: Some(1024),
            size64: None,
            filename: "photo.jpg".to_string(),
            capture_date: None,
            modification_date: None,
        };
        let mut info_w = Writer::new();
        info.encode(&mut info_w);
        transport.push_reply(Container::data(OperationCode::GetObjectInfo as u16, 3, info_w.into_bytes()).encode());
        transport.push_reply(Container::response(response_code::OK, 3, vec![]).encode());

        transport.push_reply(Container::data(OperationCode::GetObject as u16, 4, vec![0xAB; 1024]).encode());
        transport.push_reply(Container::response(response_code::OK, 4, vec![]).encode());

        let dir = tempfile::tempdir().unwrap();
        let journal = InMemoryJournal::new();
        let request = ReadRequest {
            device_id: "dev-1".to_string(),
            handle: 100,
            name: "photo.jpg".to_string(),
            range: None,
            temp_path: dir.path().join("photo.jpg.part"),
            final_path: dir.path().join("photo.jpg"),
        };
        let id = read(&actor, &journal, request).await.unwrap();

        let record = journal.get(&id).unwrap();
        assert_eq!(record.state, crate::journal::TransferState::Done);
        assert_eq!(record.committed_bytes, 1024);
        assert!(record.throughput_mbps.is_some());
        assert!(!dir.path().join("photo.jpg.part").exists());
        let bytes = tokio::fs::read(dir.path().join("photo.jpg")).await.unwrap();
        assert_eq!(bytes.len(), 1024);
    }
}

//! Chunked object upload with write-target ladder walking (spec §4.6 "Write
//! contract"). Grounded on scenario S3: a rejected `SendObjectInfo` advances
//! to the next ladder rung rather than failing the whole transfer.

use crate::actor::DeviceActor;
use crate::codec::{Decode, Encode, Reader, Writer};
use crate::error::MtpError;
use crate::journal::{BeginTransfer, TransferId, TransferJournal, TransferKind};
use crate::ptp::{AssociationType, ObjectFormat, ObjectInfo, OperationCode, OBJECT_FORMAT_ASSOCIATION};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

/// A ladder rung that resolved to an existing folder handle, versus one that
/// had to be created because no matching child existed at the storage root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTargetKind {
    Existing,
    Created,
}

/// Inputs to [`write`].
pub struct WriteRequest {
    pub device_id: String,
    pub storage_id: u32,
    pub name: String,
    pub source_path: PathBuf,
    pub size_bytes: u64,
    pub format: ObjectFormat,
}

/// Result of a completed [`write`]: the journal id plus every ladder rung
/// name tried along the way, in the order attempted (spec S3
/// `attemptedTargets`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub id: TransferId,
    pub attempted_targets: Vec<String>,
}

/// Walks `policy.write_target_ladder` to find or create a parent folder,
/// then uploads `request.source_path` into it, journaling progress
/// throughout (spec §4.6 steps 1-6).
pub async fn write(actor: &DeviceActor, journal: &dyn TransferJournal, request: WriteRequest) -> Result<WriteOutcome, MtpError> {
    let policy = actor.policy().await;
    let ladder = if policy.write_target_ladder.is_empty() { vec!["SwiftMTP".to_string()] } else { policy.write_target_ladder.clone() };
    let max_attempts = ladder.len().min(6);

    let id = journal.begin(BeginTransfer {
        device_id: request.device_id.clone(),
        kind: TransferKind::Write,
        handle: None,
        parent_handle: None,
        path_key: None,
        name: request.name.clone(),
        total_bytes: Some(request.size_bytes),
        supports_partial: false,
        local_temp_url: request.source_path.display().to_string(),
        final_url: None,
    })?;

    let mut attempted_targets = Vec::new();
    let mut last_error = None;

    for rung_name in ladder.iter().take(max_attempts) {
        attempted_targets.push(rung_name.clone());
        let parent_handle = match resolve_or_create_target(actor, request.storage_id, rung_name, rung_name == ladder.last().unwrap()).await {
            Ok(handle) => handle,
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        };

        let info = ObjectInfo {
            storage_id: request.storage_id,
            format: request.format,
            parent_object: parent_handle,
            association_type: AssociationType::Undefined,
            size32: Some(u32::try_from(request.size_bytes).unwrap_or(0xFFFF_FFFF)),
            size64: None,
            filename: request.name.clone(),
            capture_date: None,
            modification_date: None,
        };
        let mut w = Writer::new();
        info.encode(&mut w);

        match actor.transact(OperationCode::SendObjectInfo as u16, vec![request.storage_id, parent_handle], Some(w.into_bytes()), false).await {
            Ok(outcome) => {
                let remote_handle = *outcome.response_params.first().unwrap_or(&0);
                journal.record_remote_handle(&id, remote_handle)?;

                match send_data(actor, journal, &id, &request).await {
                    Ok(()) => {
                        journal.complete(&id)?;
                        return Ok(WriteOutcome { id, attempted_targets });
                    }
                    Err(e) => {
                        super::TransferEngine::reconcile_partial(actor, remote_handle).await;
                        let _ = journal.fail(&id, &e.to_string());
                        return Err(e);
                    }
                }
            }
            Err(e) if e.is_retryable_write_rejection() => {
                last_error = Some(e);
                continue;
            }
            Err(e) => {
                let _ = journal.fail(&id, &e.to_string());
                return Err(e);
            }
        }
    }

    let e = last_error.unwrap_or(MtpError::Unsupported { reason: "write-target ladder exhausted".to_string() });
    let _ = journal.fail(&id, &e.to_string());
    Err(e)
}

/// Finds a child association named `name` directly under the storage root,
/// creating it (only on the final ladder rung) if absent.
async fn resolve_or_create_target(actor: &DeviceActor, storage_id: u32, name: &str, is_final_rung: bool) -> Result<u32, MtpError> {
    let handles_outcome = actor.transact(OperationCode::GetObjectHandles as u16, vec![storage_id, 0, 0xFFFF_FFFF], None, true).await?;
    let payload = handles_outcome.payload.unwrap_or_default();
    let handles = Reader::new(&payload).read_array(|r| r.read_u32())?;

    for handle in handles {
        let info_outcome = actor.transact(OperationCode::GetObjectInfo as u16, vec![handle], None, true).await?;
        let Some(info_payload) = info_outcome.payload else { continue };
        let Ok(info) = ObjectInfo::decode(&mut Reader::new(&info_payload)) else { continue };
        if info.is_association() && info.filename.eq_ignore_ascii_case(name) {
            return Ok(handle);
        }
    }

    if !is_final_rung {
        return Err(MtpError::Unsupported { reason: format!("no existing folder named {name}") });
    }

    let folder_info = ObjectInfo {
        storage_id,
        format: ObjectFormat(OBJECT_FORMAT_ASSOCIATION),
        parent_object: 0,
        association_type: AssociationType::GenericFolder,
        size32: Some(0),
        size64: None,
        filename: name.to_string(),
        capture_date: None,
        modification_date: None,
    };
    let mut w = Writer::new();
    folder_info.encode(&mut w);
    let outcome = actor.transact(OperationCode::SendObjectInfo as u16, vec![storage_id, 0], Some(w.into_bytes()), false).await?;
    Ok(*outcome.response_params.first().unwrap_or(&0))
}

async fn send_data(actor: &DeviceActor, journal: &dyn TransferJournal, id: &TransferId, request: &WriteRequest) -> Result<(), MtpError> {
    let mut file = tokio::fs::File::open(&request.source_path)
        .await
        .map_err(|e| MtpError::Internal { reason: format!("failed to open source file: {e}") })?;
    let mut bytes = Vec::with_capacity(request.size_bytes as usize);
    file.read_to_end(&mut bytes).await.map_err(|e| MtpError::Internal { reason: format!("read failed: {e}") })?;

    actor.transact(OperationCode::SendObject as u16, vec![], Some(bytes), false).await?;
    journal.update_progress(id, request.size_bytes)?;
    Ok(())
}

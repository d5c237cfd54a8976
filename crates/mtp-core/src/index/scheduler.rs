//! Crawl scheduler and event bridge (spec §4.8, §4.9): drains the priority
//! queue into the local catalog and reacts to the actor's event stream.

use super::object::{build_path_key, IndexedObject};
use super::queue::{CrawlPriority, CrawlQueue};
use super::store::LiveIndexStore;
use crate::actor::DeviceActor;
use crate::codec::{Decode, Reader};
use crate::error::MtpError;
use crate::ptp::{DeviceEvent, ObjectInfo, OperationCode};
use std::sync::Arc;
use std::time::Duration;

/// Default pause between folder jobs, to avoid starving user-driven
/// operations on the same actor (spec §4.8 step 5).
pub const DEFAULT_INTER_FOLDER_YIELD: Duration = Duration::from_millis(50);
/// Default cadence for devices with an empty supported-events set.
pub const DEFAULT_PERIODIC_REFRESH: Duration = Duration::from_secs(30);

/// A catalog mutation external observers (file-provider extension, UI) can
/// invalidate listings on (spec §4.8 "Change notifications").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub device_id: String,
    pub parent_handle: Option<u32>,
}

/// Drains [`CrawlQueue`] jobs into a [`LiveIndexStore`] and reacts to device
/// events, per spec §4.8/§4.9. Holds no transport state of its own; every
/// device call goes through the caller-supplied [`DeviceActor`].
pub struct CrawlScheduler {
    queue: CrawlQueue,
    store: Arc<dyn LiveIndexStore>,
    inter_folder_yield: Duration,
    notifications: tokio::sync::mpsc::UnboundedSender<ChangeNotification>,
}

impl CrawlScheduler {
    pub fn new(store: Arc<dyn LiveIndexStore>) -> (Self, tokio::sync::mpsc::UnboundedReceiver<ChangeNotification>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { queue: CrawlQueue::new(), store, inter_folder_yield: DEFAULT_INTER_FOLDER_YIELD, notifications: tx }, rx)
    }

    pub fn queue(&self) -> &CrawlQueue {
        &self.queue
    }

    pub fn enqueue(&self, device_id: impl Into<String>, storage_id: u32, parent_handle: Option<u32>, priority: CrawlPriority) -> u64 {
        self.queue.enqueue(device_id.into(), storage_id, parent_handle, priority)
    }

    fn notify(&self, device_id: &str, parent_handle: Option<u32>) {
        let _ = self.notifications.send(ChangeNotification { device_id: device_id.to_string(), parent_handle });
    }

    /// Runs the scheduler loop until the queue is drained once. A long-lived
    /// caller re-invokes this (or loops it) alongside event handling.
    pub async fn drain(&self, actor: &DeviceActor) -> Result<(), MtpError> {
        while let Some(job) = self.queue.dequeue() {
            self.run_job(actor, job.device_id, job.storage_id, job.parent_handle).await?;
            if !self.queue.is_empty() {
                tokio::time::sleep(self.inter_folder_yield).await;
            }
        }
        Ok(())
    }

    /// Runs one crawl job: mark-stale, enumerate, upsert, purge (spec §4.8
    /// steps 1-4). Discovered associations are enqueued as `background` jobs.
    async fn run_job(&self, actor: &DeviceActor, device_id: String, storage_id: u32, parent_handle: Option<u32>) -> Result<(), MtpError> {
        let generation = self.store.begin_generation(&device_id, storage_id)?;
        let parent_path_key = match parent_handle {
            Some(h) => self.store.get_by_handle(&device_id, h)?.map(|o| o.path_key),
            None => None,
        };

        let handles_outcome = actor
            .transact(
                OperationCode::GetObjectHandles as u16,
                vec![storage_id, 0, parent_handle.unwrap_or(0xFFFF_FFFF)],
                None,
                true,
            )
            .await?;
        let payload = handles_outcome.payload.unwrap_or_default();
        let handles = Reader::new(&payload).read_array(|r| r.read_u32()).unwrap_or_default();

        for handle in handles {
            let info_outcome = actor.transact(OperationCode::GetObjectInfo as u16, vec![handle], None, true).await?;
            let Some(info_payload) = info_outcome.payload else { continue };
            let Ok(info) = ObjectInfo::decode(&mut Reader::new(&info_payload)) else { continue };

            let path_key = build_path_key(parent_path_key.as_deref(), storage_id, &info.filename);
            self.store.upsert_object(IndexedObject {
                device_id: device_id.clone(),
                storage_id,
                handle,
                parent_handle,
                name: info.filename.clone(),
                path_key,
                size_bytes: info.effective_size(),
                mtime: info.modification_date.clone(),
                format_code: info.format.0,
                is_directory: info.is_association(),
                generation,
                change_counter: 0,
                tombstone: false,
            })?;

            if info.is_association() {
                self.queue.enqueue(device_id.clone(), storage_id, Some(handle), CrawlPriority::Background);
            }
        }

        self.store.purge_stale(&device_id, storage_id, parent_handle, generation)?;
        self.notify(&device_id, parent_handle);
        Ok(())
    }

    /// Reacts to one decoded device event (spec §4.8 "Event handling").
    pub async fn handle_event(&self, actor: &DeviceActor, device_id: &str, storage_id: u32, event: &DeviceEvent) -> Result<(), MtpError> {
        match *event {
            DeviceEvent::ObjectAdded(handle) | DeviceEvent::ObjectInfoChanged(handle) => {
                let outcome = actor.transact(OperationCode::GetObjectInfo as u16, vec![handle], None, true).await?;
                let Some(payload) = outcome.payload else { return Ok(()) };
                let Ok(info) = ObjectInfo::decode(&mut Reader::new(&payload)) else { return Ok(()) };
                let parent_handle = if info.parent_object == 0 { None } else { Some(info.parent_object) };
                let parent_path_key = match parent_handle {
                    Some(h) => self.store.get_by_handle(device_id, h)?.map(|o| o.path_key),
                    None => None,
                };
                // Tagged with the in-progress generation so a concurrent
                // crawl's purgeStale does not remove it (spec scenario S5).
                let generation = self.store.current_generation(device_id, storage_id)?;
                let path_key = build_path_key(parent_path_key.as_deref(), storage_id, &info.filename);
                self.store.upsert_object(IndexedObject {
                    device_id: device_id.to_string(),
                    storage_id,
                    handle,
                    parent_handle,
                    name: info.filename.clone(),
                    path_key,
                    size_bytes: info.effective_size(),
                    mtime: info.modification_date.clone(),
                    format_code: info.format.0,
                    is_directory: info.is_association(),
                    generation,
                    change_counter: 0,
                    tombstone: false,
                })?;
                self.notify(device_id, parent_handle);
            }
            DeviceEvent::ObjectRemoved(handle) => {
                let former_parent = self.store.get_by_handle(device_id, handle)?.and_then(|o| o.parent_handle);
                self.store.remove_by_handle(device_id, handle)?;
                self.notify(device_id, former_parent);
            }
            DeviceEvent::StorageInfoChanged(storage) => {
                self.queue.enqueue(device_id.to_string(), storage, None, CrawlPriority::Foreground);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Encode, Writer};
    use crate::index::store::InMemoryLiveIndex;
    use crate::ptp::{AssociationType, Container};
    use crate::quirks::DevicePolicy;
    use crate::transport::{DeviceSummary, UsbSpeed, VirtualTransport};

    fn object_info(parent: u32, format: u16, name: &str) -> ObjectInfo {
        ObjectInfo {
            storage_id: 1,
            format: crate::ptp::ObjectFormat(format),
            parent_object: parent,
            association_type: AssociationType::Undefined,
            size32: Some(1024),
            size64: None,
            filename: name.to_string(),
            capture_date: None,
            modification_date: None,
        }
    }

    async fn opened_actor(transport: &VirtualTransport) -> DeviceActor {
        use crate::error::response_code;
        use crate::ptp::DeviceInfo;
        let device_info = DeviceInfo {
            standard_version: 100,
            vendor_extension_id: 6,
            vendor_extension_version: 100,
            functional_mode: 0,
            operations_supported: vec![0x1001, 0x1002, 0x1003, 0x1004, 0x1005, 0x1007, 0x1008],
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
    async fn drains_a_folder_job_and_upserts_its_children() {
        use crate::error::response_code;
        let transport = VirtualTransport::new(DeviceSummary { device_id: "dev-1".to_string(), vid: 1, pid: 1, bus: 1, address: 1, speed: UsbSpeed::High });
        let actor = opened_actor(&transport).await;

        let mut w = Writer::new();
        w.write_array(&[100u32], |w, v| w.write_u32(*v));
        transport.push_reply(Container::data(OperationCode::GetObjectHandles as u16, 3, w.into_bytes()).encode());
        transport.push_reply(Container::response(response_code::OK, 3, vec![]).encode());

        let mut w2 = Writer::new();
        object_info(0, 0x3000, "file.bin").encode(&mut w2);
        transport.push_reply(Container::data(OperationCode::GetObjectInfo as u16, 4, w2.into_bytes()).encode());
        transport.push_reply(Container::response(response_code::OK, 4, vec![]).encode());

        let store: Arc<dyn LiveIndexStore> = Arc::new(InMemoryLiveIndex::new());
        let (scheduler, _rx) = CrawlScheduler::new(store.clone());
        scheduler.enqueue("dev-1", 1, None, CrawlPriority::Foreground);
        scheduler.drain(&actor).await.unwrap();

        let children = store.list_children("dev-1", 1, None).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].handle, 100);
        assert_eq!(children[0].name, "file.bin");
    }

    #[tokio::test]
    async fn object_added_event_inserts_and_notifies_former_parent_on_removal() {
        use crate::error::response_code;
        let transport = VirtualTransport::new(DeviceSummary { device_id: "dev-1".to_string(), vid: 1, pid: 1, bus: 1, address: 1, speed: UsbSpeed::High });
        let actor = opened_actor(&transport).await;

        let mut w = Writer::new();
        object_info(5, 0x3000, "new.jpg").encode(&mut w);
        transport.push_reply(Container::data(OperationCode::GetObjectInfo as u16, 3, w.into_bytes()).encode());
        transport.push_reply(Container::response(response_code::OK, 3, vec![]).encode());

        let store: Arc<dyn LiveIndexStore> = Arc::new(InMemoryLiveIndex::new());
        let (scheduler, mut rx) = CrawlScheduler::new(store.clone());
        scheduler.handle_event(&actor, "dev-1", 1, &DeviceEvent::ObjectAdded(999)).await.unwrap();

        let stored = store.get_by_handle("dev-1", 999).unwrap().unwrap();
        assert_eq!(stored.parent_handle, Some(5));
        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.parent_handle, Some(5));

        scheduler.handle_event(&actor, "dev-1", 1, &DeviceEvent::ObjectRemoved(999)).await.unwrap();
        assert!(store.get_by_handle("dev-1", 999).unwrap().unwrap().tombstone);
    }
}

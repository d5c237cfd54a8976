//! Event bridge (spec §4.9): routes the actor's interrupt-endpoint event
//! broadcast to the crawl scheduler. No business logic beyond routing and
//! periodic-refresh fallback selection; single-owner, started on device open
//! and stopped on device close.

use crate::actor::DeviceActor;
use crate::index::{CrawlPriority, CrawlScheduler};
use crate::ptp::DeviceEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Debounce window collapsing bursts of the same event kind for the same
/// object into a single scheduler reaction.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Owns the background task that pumps `actor.poll_event()` into
/// `scheduler.handle_event()`, falling back to a periodic full-storage
/// refresh for devices that advertise no events at all.
pub struct EventBridge {
    task: JoinHandle<()>,
}

impl EventBridge {
    /// Starts the bridge for one already-open device. `storage_id` scopes
    /// the periodic-refresh fallback; a device with multiple storages needs
    /// one bridge per storage.
    pub fn start(actor: Arc<DeviceActor>, scheduler: Arc<CrawlScheduler>, storage_id: u32) -> Self {
        let task = tokio::spawn(async move {
            let supports_events = actor.device_info().await.map(|info| !info.events_supported.is_empty()).unwrap_or(false);

            if !supports_events {
                loop {
                    scheduler.enqueue(actor.device_id(), storage_id, None, CrawlPriority::Background);
                    if let Err(e) = scheduler.drain(&actor).await {
                        log::warn!("periodic refresh drain failed for {}: {e}", actor.device_id());
                    }
                    tokio::time::sleep(super::index::DEFAULT_PERIODIC_REFRESH).await;
                }
            }

            let mut debounced: Option<DeviceEvent> = None;
            loop {
                match actor.poll_event().await {
                    Ok(Some(event)) => {
                        if debounced.as_ref() == Some(&event) {
                            continue;
                        }
                        debounced = Some(event.clone());
                        if let Err(e) = scheduler.handle_event(&actor, actor.device_id(), storage_id, &event).await {
                            log::warn!("event handling failed for {}: {e}", actor.device_id());
                        }
                        tokio::time::sleep(DEBOUNCE).await;
                    }
                    Ok(None) => {
                        debounced = None;
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    Err(e) => {
                        log::error!("event poll failed for {}: {e}", actor.device_id());
                        break;
                    }
                }
            }
        });
        Self { task }
    }

    /// Stops the bridge task (spec §4.9 "stopped on device close").
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Encode, Writer};
    use crate::error::response_code;
    use crate::index::{InMemoryLiveIndex, LiveIndexStore};
    use crate::ptp::{Container, DeviceInfo, OperationCode};
    use crate::quirks::DevicePolicy;
    use crate::transport::{DeviceSummary, UsbSpeed, VirtualTransport};
    use std::sync::Arc;

    #[tokio::test]
    async fn bridge_falls_back_to_periodic_refresh_when_no_events_supported() {
        let transport = VirtualTransport::new(DeviceSummary { device_id: "dev-1".to_string(), vid: 1, pid: 1, bus: 1, address: 1, speed: UsbSpeed::High });
        let device_info = DeviceInfo {
            standard_version: 100,
            vendor_extension_id: 6,
            vendor_extension_version: 100,
            functional_mode: 0,
            operations_supported: vec![0x1001, 0x1002, 0x1003, 0x1007],
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
        actor.open(&transport).await.unwrap();
        let actor = Arc::new(actor);

        // The periodic-refresh loop's first drain enumerates an empty root.
        let mut handles_w = Writer::new();
        handles_w.write_array(&Vec::<u32>::new(), |w, v: &u32| w.write_u32(*v));
        transport.push_reply(Container::data(OperationCode::GetObjectHandles as u16, 3, handles_w.into_bytes()).encode());
        transport.push_reply(Container::response(response_code::OK, 3, vec![]).encode());

        let store: Arc<dyn LiveIndexStore> = Arc::new(InMemoryLiveIndex::new());
        let (scheduler, _rx) = CrawlScheduler::new(store.clone());
        let scheduler = Arc::new(scheduler);
        let bridge = EventBridge::start(actor, scheduler, 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        bridge.stop().await;
    }
}

//! Capability prober: runs once per successful open, before callers issue
//! operations (spec §4.5). Grounded on the teacher's
//! `probe_write_capability`/`get_storages` live-capability classification.

use crate::actor::DeviceActor;
use crate::error::{response_code, MtpError};
use crate::ptp::OperationCode;
use crate::transport::UsbSpeed;

/// Reasons `propListUsable` was downgraded, recorded for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropListDisableReason {
    NotInSupportedOps,
    OperationNotSupported,
    EmptyPropList,
    PolicyForcedDisable,
}

/// Computed once per open; monotonic downgrade only (spec §3 `ProbeReceipt`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReceipt {
    pub supported_ops: Vec<u16>,
    pub prop_list_usable: bool,
    pub disable_reason: Option<PropListDisableReason>,
    pub speed: UsbSpeed,
    pub stabilize_ms_applied: u32,
}

impl ProbeReceipt {
    pub fn supports(&self, opcode: OperationCode) -> bool {
        self.supported_ops.contains(&(opcode as u16))
    }
}

/// PTP `GetObjectPropsSupported` probe target: the "Undefined" object format
/// (0x3000), per spec §4.5 step 2.
const UNDEFINED_OBJECT_FORMAT: u32 = 0x3000;

/// Runs the deterministic probe algorithm of spec §4.5 against an already
/// `Ready` actor. Never fails fatally on a downgradeable condition; the only
/// failure this can surface is one that already happened during `open()`
/// (this function assumes `GetDeviceInfo` already succeeded).
pub async fn run_probe(actor: &DeviceActor, policy_skips_prop_list: bool) -> Result<ProbeReceipt, MtpError> {
    let device_info = actor.device_info().await.ok_or_else(|| MtpError::Internal {
        reason: "probe run before device info was populated".to_string(),
    })?;
    let supported_ops = device_info.operations_supported.clone();

    let (prop_list_usable, disable_reason) = if policy_skips_prop_list {
        (false, Some(PropListDisableReason::PolicyForcedDisable))
    } else if !supported_ops.contains(&(OperationCode::GetObjectPropsSupported as u16)) {
        (false, Some(PropListDisableReason::NotInSupportedOps))
    } else {
        match actor
            .transact(OperationCode::GetObjectPropsSupported as u16, vec![UNDEFINED_OBJECT_FORMAT], None, true)
            .await
        {
            Ok(outcome) => {
                let payload = outcome.payload.unwrap_or_default();
                let is_empty = payload.len() < 4 || u32::from_le_bytes(payload[0..4].try_into().unwrap()) == 0;
                if is_empty {
                    (false, Some(PropListDisableReason::EmptyPropList))
                } else {
                    (true, None)
                }
            }
            Err(MtpError::ProtocolError { code, .. }) if code == response_code::OPERATION_NOT_SUPPORTED => {
                (false, Some(PropListDisableReason::OperationNotSupported))
            }
            Err(e) => return Err(e),
        }
    };

    let policy = actor.policy().await;
    let speed = actor.speed().await.ok_or_else(|| MtpError::Internal {
        reason: "probe run before the actor negotiated a USB speed".to_string(),
    })?;
    Ok(ProbeReceipt {
        supported_ops,
        prop_list_usable,
        disable_reason,
        speed,
        stabilize_ms_applied: policy.stabilize_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Encode, Writer};
    use crate::ptp::{Container, DeviceInfo};
    use crate::quirks::DevicePolicy;
    use crate::transport::{DeviceSummary, UsbSpeed as Speed, VirtualTransport};

    fn summary() -> DeviceSummary {
        DeviceSummary { device_id: "dev-1".to_string(), vid: 1, pid: 1, bus: 1, address: 1, speed: Speed::High }
    }

    fn open_with_ops(ops: Vec<u16>) -> (VirtualTransport, DeviceActor) {
        let transport = VirtualTransport::new(summary());
        let info = DeviceInfo {
            standard_version: 100,
            vendor_extension_id: 6,
            vendor_extension_version: 100,
            functional_mode: 0,
            operations_supported: ops,
            events_supported: vec![],
            device_properties_supported: vec![],
            manufacturer: "V".to_string(),
            model: "M".to_string(),
            device_version: "1".to_string(),
            serial_number: "S".to_string(),
        };
        let mut w = Writer::new();
        info.encode(&mut w);
        transport.push_reply(Container::data(OperationCode::GetDeviceInfo as u16, 1, w.into_bytes()).encode());
        transport.push_reply(Container::response(crate::error::response_code::OK, 1, vec![]).encode());
        transport.push_reply(Container::response(crate::error::response_code::OK, 2, vec![]).encode());
        let actor = DeviceActor::new("dev-1", DevicePolicy::conservative_default());
        (transport, actor)
    }

    #[tokio::test]
    async fn no_prop_list_op_downgrades_without_a_call() {
        let (transport, actor) = open_with_ops(vec![OperationCode::GetDeviceInfo as u16, OperationCode::OpenSession as u16]);
        actor.open(&transport).await.unwrap();
        let receipt = run_probe(&actor, false).await.unwrap();
        assert!(!receipt.prop_list_usable);
        assert_eq!(receipt.disable_reason, Some(PropListDisableReason::NotInSupportedOps));
    }

    #[tokio::test]
    async fn prop_list_op_present_and_non_empty_enables_it() {
        let (transport, actor) = open_with_ops(vec![OperationCode::GetObjectPropsSupported as u16]);
        actor.open(&transport).await.unwrap();
        transport.push_reply(Container::data(OperationCode::GetObjectPropsSupported as u16, 3, vec![2, 0, 0, 0]).encode());
        transport.push_reply(Container::response(crate::error::response_code::OK, 3, vec![]).encode());
        let receipt = run_probe(&actor, false).await.unwrap();
        assert!(receipt.prop_list_usable);
        assert!(receipt.disable_reason.is_none());
    }

    #[tokio::test]
    async fn policy_forced_disable_skips_the_call_entirely() {
        let (transport, actor) = open_with_ops(vec![OperationCode::GetObjectPropsSupported as u16]);
        actor.open(&transport).await.unwrap();
        let receipt = run_probe(&actor, true).await.unwrap();
        assert!(!receipt.prop_list_usable);
        assert_eq!(receipt.disable_reason, Some(PropListDisableReason::PolicyForcedDisable));
        assert!(transport.bulk_out_log().len() <= 2); // only the GetDeviceInfo/OpenSession commands from open()
    }
}

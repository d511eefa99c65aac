//! BLE protocol constants and advertisement helpers

use std::collections::HashMap;

use beaconchat_core::{BroadcastFailure, SenderId};
use btleplug::api::BDAddr;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Service UUID
// ----------------------------------------------------------------------------

/// Service UUID chat payloads are advertised under
///
/// The 16-bit Battery Service id on the Bluetooth base UUID, so the service
/// data header stays at four bytes.
pub const BEACONCHAT_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180F_0000_1000_8000_00805F9B34FB);

/// Legacy advertising data limit
pub const LEGACY_ADVERTISEMENT_LEN: usize = 31;

/// Bytes spent around the payload: the 16-bit service UUID list (4) and the
/// service data header (4)
pub const ADVERTISEMENT_OVERHEAD: usize = 4 + 4;

/// Largest payload that fits one legacy advertisement
pub const MAX_ADVERTISED_PAYLOAD: usize = LEGACY_ADVERTISEMENT_LEN - ADVERTISEMENT_OVERHEAD;

// ----------------------------------------------------------------------------
// Advertisement Helpers
// ----------------------------------------------------------------------------

/// Chat payload carried in an advertisement's service data, if any
pub fn extract_payload<'a>(
    service_data: &'a HashMap<Uuid, Vec<u8>>,
    service_uuid: &Uuid,
) -> Option<&'a [u8]> {
    service_data
        .get(service_uuid)
        .map(Vec::as_slice)
        .filter(|payload| !payload.is_empty())
}

/// Sender id for an advertiser
///
/// Uses the device address; platforms that hide it (all-zero address) fall
/// back to the platform peripheral id.
pub fn sender_id(address: BDAddr, fallback: impl FnOnce() -> String) -> SenderId {
    if address == BDAddr::default() {
        SenderId::new(fallback())
    } else {
        SenderId::new(address.to_string())
    }
}

/// Reject payloads the advertisement cannot carry
pub fn check_payload_len(len: usize, max: usize) -> Result<(), BroadcastFailure> {
    if len > max {
        return Err(BroadcastFailure::DataTooLarge { size: len, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_payload_filters_by_service() {
        let mut data = HashMap::new();
        data.insert(BEACONCHAT_SERVICE_UUID, b"0001:1/1:hi".to_vec());
        data.insert(Uuid::from_u128(1), b"other".to_vec());

        assert_eq!(
            extract_payload(&data, &BEACONCHAT_SERVICE_UUID),
            Some(&b"0001:1/1:hi"[..])
        );
        assert_eq!(extract_payload(&data, &Uuid::from_u128(2)), None);
    }

    #[test]
    fn test_empty_service_data_ignored() {
        let mut data = HashMap::new();
        data.insert(BEACONCHAT_SERVICE_UUID, Vec::new());
        assert_eq!(extract_payload(&data, &BEACONCHAT_SERVICE_UUID), None);
    }

    #[test]
    fn test_sender_id_prefers_address() {
        let address = BDAddr::from([0xAA, 0xBB, 0xCC, 0x01, 0x02, 0x03]);
        assert_eq!(
            sender_id(address, || "unused".to_string()).as_str(),
            "AA:BB:CC:01:02:03"
        );
        assert_eq!(
            sender_id(BDAddr::default(), || "peripheral-7".to_string()).as_str(),
            "peripheral-7"
        );
    }

    #[test]
    fn test_payload_limit() {
        assert!(check_payload_len(27, 27).is_ok());
        assert_eq!(
            check_payload_len(28, 27),
            Err(BroadcastFailure::DataTooLarge { size: 28, max: 27 })
        );
    }

    #[test]
    fn test_largest_payload_fills_legacy_advertisement() {
        // length + type + 16-bit uuid for the list, plus the same header for service data
        let uuid_list = 1 + 1 + 2;
        let service_data = 1 + 1 + 2 + MAX_ADVERTISED_PAYLOAD;
        assert_eq!(uuid_list + service_data, LEGACY_ADVERTISEMENT_LEN);
        assert_eq!(MAX_ADVERTISED_PAYLOAD, 23);
    }
}

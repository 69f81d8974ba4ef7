//! Client identity derived from a hardware device identifier.
//!
//! Brokers require a unique client identifier per connected device. This
//! module derives one, exactly once, from whatever unique id the hardware
//! exposes (MCU serial number, MAC address, fuse bytes) by hex-encoding the
//! raw bytes. Two concurrently running clients must never present the same
//! identity to a broker; the broker would disconnect one of them.

use heapless::String;

/// Maximum raw device id length consumed, in bytes.
pub const DEVICE_ID_MAX_LEN: usize = 12;

/// Hex-encoded client identity, two characters per raw byte.
pub type ClientId = String<{ 2 * DEVICE_ID_MAX_LEN }>;

/// Hardware identity collaborator.
pub trait DeviceIdentity {
    /// Writes the raw device id into `buf` and returns the number of bytes
    /// written. Ids longer than `buf` must be truncated by the implementor.
    fn device_id(&self, buf: &mut [u8]) -> usize;
}

/// Derives the hex client identity from the hardware collaborator.
pub fn client_id<I: DeviceIdentity>(identity: &I) -> ClientId {
    let mut raw = [0u8; DEVICE_ID_MAX_LEN];
    let len = identity.device_id(&mut raw).min(DEVICE_ID_MAX_LEN);

    let mut out = ClientId::new();
    for byte in &raw[..len] {
        // Capacity is exactly two characters per raw byte.
        out.push(HEX_DIGITS[(byte >> 4) as usize] as char).unwrap();
        out.push(HEX_DIGITS[(byte & 0x0F) as usize] as char).unwrap();
    }
    out
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedId(&'static [u8]);

    impl DeviceIdentity for FixedId {
        fn device_id(&self, buf: &mut [u8]) -> usize {
            let len = self.0.len().min(buf.len());
            buf[..len].copy_from_slice(&self.0[..len]);
            len
        }
    }

    #[test]
    fn encodes_id_as_lowercase_hex() {
        let id = client_id(&FixedId(&[0xDE, 0xAD, 0x00, 0x42]));
        assert_eq!(id.as_str(), "dead0042");
    }

    #[test]
    fn truncates_oversized_ids() {
        let id = client_id(&FixedId(&[0xAB; 32]));
        assert_eq!(id.len(), 2 * DEVICE_ID_MAX_LEN);
    }
}

#![no_main]
use libfuzzer_sys::fuzz_target;

use dispenser_core::{STATE_RECORD_LEN, StateRecord, crc16};

// Decoders that face raw EEPROM bytes must never panic, whatever a torn
// write or a dying chip left behind.
fuzz_target!(|data: &[u8]| {
    if data.len() >= STATE_RECORD_LEN {
        let mut raw = [0u8; STATE_RECORD_LEN];
        raw.copy_from_slice(&data[..STATE_RECORD_LEN]);
        if let Some(rec) = StateRecord::decode(&raw) {
            // Anything that decodes must re-encode to the same bytes.
            assert_eq!(rec.encode(), raw);
        }
    }
    let _ = crc16(data);
});

use proptest::collection::vec;
use proptest::prelude::*;
use realmwire_core::crypto::arc4::StreamCipher;
use realmwire_core::crypto::bignum::{BigInt, Endian};
use realmwire_core::{PackedGuid, WireBuffer};

proptest! {
    #[test]
    fn bignum_bytes_round_trip(bytes in vec(any::<u8>(), 0..48), pad in 0usize..8) {
        let value = BigInt::from_bytes(&bytes, Endian::Little);
        let min_size = value.num_bytes() + pad;

        let exported = value.to_bytes(min_size, Endian::Little);
        prop_assert_eq!(exported.len(), min_size);
        prop_assert_eq!(BigInt::from_bytes(&exported, Endian::Little), value.clone());

        let big_endian = value.to_bytes(min_size, Endian::Big);
        let mut reversed = big_endian.clone();
        reversed.reverse();
        prop_assert_eq!(reversed, exported);
        prop_assert_eq!(BigInt::from_bytes(&big_endian, Endian::Big), value);
    }

    #[test]
    fn bit_sequences_round_trip(fields in vec((any::<u32>(), 1u32..=32), 0..64)) {
        let mut buf = WireBuffer::new();
        for (value, count) in &fields {
            buf.write_bits(*value, *count);
        }
        buf.flush_bits();

        let total_bits: u32 = fields.iter().map(|(_, count)| count).sum();
        prop_assert_eq!(buf.len(), total_bits.div_ceil(8) as usize);

        for (value, count) in &fields {
            let mask = if *count == 32 { u32::MAX } else { (1u32 << count) - 1 };
            prop_assert_eq!(buf.read_bits(*count).unwrap(), value & mask);
        }
    }

    #[test]
    fn packed_guid_round_trip(value in any::<u64>()) {
        let guid = PackedGuid(value);
        let non_zero = value.to_le_bytes().iter().filter(|b| **b != 0).count();
        prop_assert_eq!(guid.encoded_len(), 1 + non_zero);

        let mut buf = WireBuffer::new();
        buf.append_packed_guid(value);
        prop_assert_eq!(buf.len(), guid.encoded_len());
        prop_assert_eq!(buf.read_packed_guid().unwrap(), value);
        prop_assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn cipher_is_self_inverse_when_rekeyed(
        key in vec(any::<u8>(), 1..64),
        data in vec(any::<u8>(), 16..256),
    ) {
        let mut encrypted = data.clone();
        StreamCipher::new(&key).unwrap().apply(&mut encrypted);

        let mut decrypted = encrypted.clone();
        StreamCipher::new(&key).unwrap().apply(&mut decrypted);
        prop_assert_eq!(&decrypted, &data);

        // A cipher that already advanced produces a different keystream.
        let mut reused = StreamCipher::new(&key).unwrap();
        let mut first = data.clone();
        reused.apply(&mut first);
        let mut second = data.clone();
        reused.apply(&mut second);
        prop_assert_ne!(first, second);
    }
}

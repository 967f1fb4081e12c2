use std::io::{Read, Seek, Write};

use binrw::{BinRead, BinResult, BinWrite, Endian};

use super::buffer::WireBuffer;
use crate::error::WireError;

/// 64-bit object id sent as a presence mask followed by its non-zero bytes.
#[derive(Default, PartialEq, Clone, Copy, Eq, Hash, Debug)]
pub struct PackedGuid(pub u64);

impl PackedGuid {
    /// Mask byte plus one byte per non-zero byte of the id.
    pub fn encoded_len(&self) -> usize {
        1 + self.0.to_le_bytes().iter().filter(|b| **b != 0).count()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut packed = Vec::with_capacity(9);
        packed.push(0u8);
        for (index, byte) in self.0.to_le_bytes().into_iter().enumerate() {
            if byte != 0 {
                packed[0] |= 1 << index;
                packed.push(byte);
            }
        }
        packed
    }
}

impl From<u64> for PackedGuid {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl BinRead for PackedGuid {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let mask = <u8>::read_options(reader, endian, args)?;
        let mut guid: u64 = 0;
        for i in 0..8 {
            if (mask & (1 << i)) != 0 {
                guid |= (<u8>::read_options(reader, endian, args)? as u64) << (i * 8);
            }
        }
        Ok(Self(guid))
    }
}

impl BinWrite for PackedGuid {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        _: Endian,
        _: Self::Args<'_>,
    ) -> BinResult<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }
}

impl WireBuffer {
    pub fn append_packed_guid(&mut self, guid: u64) -> &mut Self {
        self.append(&PackedGuid(guid).to_bytes())
    }

    pub fn read_packed_guid(&mut self) -> Result<u64, WireError> {
        let mask = self.read_u8()?;
        let mut guid = 0u64;
        for i in 0..8 {
            if mask & (1 << i) != 0 {
                guid |= u64::from(self.read_u8()?) << (i * 8);
            }
        }
        Ok(guid)
    }
}

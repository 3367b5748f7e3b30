use super::{FilterError, Size};

const TABLE_VERSION: u8 = 1;
const HEADER_LEN: usize = 7;

/// Byte-level form of a cuckoo filter table.
///
/// Layout: `[version][bucket capacity][fingerprint length][bucket count, u32
/// big endian]` followed by every slot packed at `fingerprint length` bits,
/// least significant bit first, buckets in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedCuckooFilterTable {
    bytes: Vec<u8>,
}

impl SerializedCuckooFilterTable {
    /// Validates the header and payload length of `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FilterError> {
        parse_header(&bytes)?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub(crate) fn encode(size: Size, slots: &[u64]) -> Self {
        debug_assert_eq!(slots.len(), size.slot_count());
        let width = usize::from(size.fingerprint_length());
        let mut bytes = Vec::with_capacity(HEADER_LEN + payload_len(size));
        bytes.push(TABLE_VERSION);
        bytes.push(size.bucket_capacity());
        bytes.push(size.fingerprint_length());
        bytes.extend_from_slice(&size.bucket_count().to_be_bytes());

        let mut payload = vec![0_u8; payload_len(size)];
        for (index, &fingerprint) in slots.iter().enumerate() {
            if fingerprint != 0 {
                write_bits(&mut payload, index * width, width, fingerprint);
            }
        }
        bytes.extend_from_slice(&payload);
        Self { bytes }
    }

    pub(crate) fn decode(&self) -> Result<(Size, Vec<u64>), FilterError> {
        let size = parse_header(&self.bytes)?;
        let payload = &self.bytes[HEADER_LEN..];
        let width = usize::from(size.fingerprint_length());
        let slots = (0..size.slot_count())
            .map(|index| read_bits(payload, index * width, width))
            .collect();
        Ok((size, slots))
    }
}

fn parse_header(bytes: &[u8]) -> Result<Size, FilterError> {
    if bytes.len() < HEADER_LEN {
        return Err(FilterError::MalformedTable(format!(
            "table is {} bytes, header needs {HEADER_LEN}",
            bytes.len()
        )));
    }
    if bytes[0] != TABLE_VERSION {
        return Err(FilterError::MalformedTable(format!(
            "unsupported table version {}",
            bytes[0]
        )));
    }
    let bucket_count = u32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);
    let size = Size::new(bucket_count, bytes[1], bytes[2])?;
    let expected = HEADER_LEN + payload_len(size);
    if bytes.len() != expected {
        return Err(FilterError::MalformedTable(format!(
            "expected {expected} bytes for {bucket_count} buckets, got {}",
            bytes.len()
        )));
    }
    Ok(size)
}

fn payload_len(size: Size) -> usize {
    (size.slot_count() * usize::from(size.fingerprint_length())).div_ceil(8)
}

fn write_bits(buf: &mut [u8], offset: usize, width: usize, value: u64) {
    for bit in 0..width {
        if (value >> bit) & 1 == 1 {
            let position = offset + bit;
            buf[position / 8] |= 1 << (position % 8);
        }
    }
}

fn read_bits(buf: &[u8], offset: usize, width: usize) -> u64 {
    let mut value = 0_u64;
    for bit in 0..width {
        let position = offset + bit;
        if (buf[position / 8] >> (position % 8)) & 1 == 1 {
            value |= 1 << bit;
        }
    }
    value
}

//! Characteristic value marshalling
//!
//! The platform transport carries each value byte in a wider unsigned cell.
//! Every value crossing the platform boundary goes through [`decode`] or
//! [`encode`], so the rest of the crate only ever deals in bytes.

/// One cell of the platform's value transport
pub type WideCell = u32;

/// Narrow platform cells to bytes, keeping bits 0-7 of each cell
///
/// Cells outside the byte range are masked, not rejected.
pub fn decode(cells: &[WideCell]) -> Vec<u8> {
    cells.iter().map(|cell| (cell & 0xFF) as u8).collect()
}

/// Widen bytes to platform cells
pub fn encode(bytes: &[u8]) -> Vec<WideCell> {
    bytes.iter().map(|&b| WideCell::from(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_masks_out_of_range_cells() {
        assert_eq!(decode(&[0x141, 0x02]), vec![0x41, 0x02]);
        assert_eq!(decode(&[0xFFFF_FFFF, 0x100, 0xFF]), vec![0xFF, 0x00, 0xFF]);
    }

    #[test]
    fn decode_keeps_low_byte_of_every_cell() {
        let cells: Vec<WideCell> = (0..2048u32).map(|i| i.wrapping_mul(0x9E37_79B9)).collect();
        let bytes = decode(&cells);
        assert_eq!(bytes.len(), cells.len());
        for (cell, byte) in cells.iter().zip(&bytes) {
            assert_eq!(u32::from(*byte), cell & 0xFF);
        }
    }

    #[test]
    fn byte_values_survive_the_wide_transport() {
        for len in 0..=512usize {
            let bytes: Vec<u8> = (0..len).map(|i| (i * 31 + len) as u8).collect();
            let cells = encode(&bytes);
            assert_eq!(cells.len(), len);
            assert!(cells.iter().all(|c| *c <= 0xFF));
            assert_eq!(decode(&cells), bytes);
        }
    }

    #[test]
    fn empty_values() {
        assert!(encode(&[]).is_empty());
        assert!(decode(&[]).is_empty());
    }
}

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DramError {
    #[error("offset {offset:#x} + {len} bytes exceeds memory size {size:#x}")]
    OutOfBounds { offset: u64, len: usize, size: usize },
}

/// Flat backing store for the memory window, addressed by offset from the
/// window base.
pub struct Dram {
    data: Vec<u8>,
}

impl Dram {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    fn range(&self, offset: u64, len: usize) -> Result<std::ops::Range<usize>, DramError> {
        let err = DramError::OutOfBounds {
            offset,
            len,
            size: self.data.len(),
        };
        let start = usize::try_from(offset).map_err(|_| err.clone())?;
        let end = start.checked_add(len).ok_or_else(|| err.clone())?;
        if end > self.data.len() {
            return Err(err);
        }
        Ok(start..end)
    }

    pub fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<(), DramError> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> Result<(), DramError> {
        let range = self.range(offset, data.len())?;
        self.data[range].copy_from_slice(data);
        Ok(())
    }

    /// Little-endian load of `size` bytes (at most 8), zero-extended.
    pub fn load(&self, offset: u64, size: usize) -> Result<u64, DramError> {
        let mut bytes = [0u8; 8];
        self.read_bytes(offset, &mut bytes[..size.min(8)])?;
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn store(&mut self, offset: u64, size: usize, value: u64) -> Result<(), DramError> {
        let bytes = value.to_le_bytes();
        self.write_bytes(offset, &bytes[..size.min(8)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_store_little_endian() {
        let mut dram = Dram::new(64);
        dram.store(8, 4, 0xDDCC_BBAA).unwrap();

        assert_eq!(dram.load(8, 1).unwrap(), 0xAA);
        assert_eq!(dram.load(9, 2).unwrap(), 0xCCBB);
        assert_eq!(dram.load(8, 8).unwrap(), 0xDDCC_BBAA);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut dram = Dram::new(16);
        assert!(dram.load(12, 4).is_ok());
        assert_eq!(
            dram.load(13, 4),
            Err(DramError::OutOfBounds {
                offset: 13,
                len: 4,
                size: 16
            })
        );
        assert!(dram.write_bytes(u64::MAX, &[1]).is_err());
    }
}

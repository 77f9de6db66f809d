use std::fs::File;
use memmap2::{Mmap, MmapMut, MmapOptions};
use crate::core::error::{Error, Result};

enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

/// Memory-mapped view of a whole segment file.
pub struct MmapFile {
    mapping: Mapping,
    pub len: usize,
}

impl MmapFile {
    pub fn open_read_only(file: &File) -> Result<Self> {
        let len = file.metadata()?.len() as usize;
        // The store never truncates a mapped file; external mutation is
        // caught by header validation on the next open.
        let mmap = unsafe { MmapOptions::new().len(len).map(file)? };
        Ok(MmapFile { mapping: Mapping::ReadOnly(mmap), len })
    }

    pub fn open_read_write(file: &File) -> Result<Self> {
        let len = file.metadata()?.len() as usize;
        let mmap = unsafe { MmapOptions::new().len(len).map_mut(file)? };
        Ok(MmapFile { mapping: Mapping::ReadWrite(mmap), len })
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.mapping, Mapping::ReadWrite(_))
    }

    pub fn data(&self) -> &[u8] {
        match &self.mapping {
            Mapping::ReadOnly(mmap) => &mmap[..],
            Mapping::ReadWrite(mmap) => &mmap[..],
        }
    }

    pub fn data_mut(&mut self) -> Result<&mut [u8]> {
        match &mut self.mapping {
            Mapping::ReadWrite(mmap) => Ok(&mut mmap[..]),
            Mapping::ReadOnly(_) => Err(Error::invalid_state("segment is mapped read-only")),
        }
    }

    /// Synchronously write dirty pages back to the file.
    pub fn flush(&self) -> Result<()> {
        if let Mapping::ReadWrite(mmap) = &self.mapping {
            mmap.flush()?;
        }
        Ok(())
    }
}

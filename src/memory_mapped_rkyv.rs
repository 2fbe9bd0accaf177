use anyhow::Result;
use std::path::Path;

/// A memory-mapped rkyv archive whose bytes are validated on every access.
pub struct MemoryMappedRkyv {
    mmap: memmap2::Mmap,
}

impl MemoryMappedRkyv {
    // Safety: This is safe for as long as the underlying file is not modified.
    pub unsafe fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(MemoryMappedRkyv { mmap })
    }

    pub fn access<Archive>(&self) -> Result<&Archive>
    where
        Archive: rkyv::Portable
            + for<'a> rkyv::bytecheck::CheckBytes<
                rkyv::api::high::HighValidator<'a, rkyv::rancor::Error>,
            >,
    {
        Ok(rkyv::access::<Archive, rkyv::rancor::Error>(&self.mmap[..])?)
    }
}

//! Raw image readers: positioned file reads with an mmap fast path.

use memmap2::Mmap;
use relic_core::{CoreError, ImageSource, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// File-handle reader with positioned reads; works on block devices too.
#[derive(Debug)]
pub struct RawImage {
    file: File,
    size: u64,
}

impl RawImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(false)
            .open(path.as_ref())?;

        #[cfg(target_os = "linux")]
        {
            use rustix::fs::{fadvise, Advice};
            let _ = fadvise(&file, 0, None, Advice::Sequential);
        }

        let size = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Self { file, size })
    }
}

impl ImageSource for RawImage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut read = 0usize;
        while read < buf.len() {
            match self.file.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CoreError::Io(e)),
            }
        }
        Ok(read)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Memory-mapped reader for plain files.
#[derive(Debug)]
pub struct MmapImage {
    mmap: Mmap,
}

impl MmapImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(CoreError::UnsupportedImageFormat(
                "cannot map an empty file".into(),
            ));
        }
        let mmap = unsafe { Mmap::map(&file) }.map_err(CoreError::Io)?;
        if mmap.is_empty() {
            return Err(CoreError::UnsupportedImageFormat(
                "mmap returned an empty mapping (block device?)".into(),
            ));
        }

        #[cfg(target_os = "linux")]
        {
            use memmap2::Advice;
            let _ = mmap.advise(Advice::Sequential);
        }

        Ok(Self { mmap })
    }
}

impl ImageSource for MmapImage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let start = offset as usize;
        if offset >= self.mmap.len() as u64 {
            return Ok(0);
        }
        let end = start.saturating_add(buf.len()).min(self.mmap.len());
        let n = end - start;
        buf[..n].copy_from_slice(&self.mmap[start..end]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }
}

/// Preferred reader: mmap when the target maps, file reads otherwise.
#[derive(Debug)]
pub enum Image {
    Mmap(MmapImage),
    Raw(RawImage),
}

impl Image {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match MmapImage::open(path) {
            Ok(img) => Ok(Image::Mmap(img)),
            Err(_) => Ok(Image::Raw(RawImage::open(path)?)),
        }
    }
}

impl ImageSource for Image {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        match self {
            Image::Mmap(img) => img.read_at(offset, buf),
            Image::Raw(img) => img.read_at(offset, buf),
        }
    }

    fn size(&self) -> u64 {
        match self {
            Image::Mmap(img) => img.size(),
            Image::Raw(img) => img.size(),
        }
    }
}

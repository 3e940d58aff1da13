//! EnCase E01/EWF capability probe.
//!
//! Relic does not decode EWF containers itself. An embedder may provide an
//! [`EwfCapability`]; without one, an E01 input fails up front with
//! `UnsupportedImageFormat` instead of being misread as a raw image.

use relic_core::{CoreError, ImageSource, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// EWF segment signature: `EVF\x09\x0d\x0a\xff\x00`.
const EWF_MAGIC: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];
/// EWF2 (Ex01) segment signature: `EVF2\x0d\x0a\x81\x00`.
const EWF2_MAGIC: [u8; 8] = [0x45, 0x56, 0x46, 0x32, 0x0D, 0x0A, 0x81, 0x00];

/// Optional decoder for EWF containers, supplied by the embedder.
pub trait EwfCapability {
    fn open(&self, path: &Path) -> Result<Box<dyn ImageSource>>;
}

/// True when the file starts with an EWF/EWF2 segment signature.
pub fn is_ewf(path: impl AsRef<Path>) -> Result<bool> {
    let mut head = [0u8; 8];
    let mut file = File::open(path.as_ref())?;
    let mut read = 0usize;
    while read < head.len() {
        match file.read(&mut head[read..]) {
            Ok(0) => return Ok(false),
            Ok(n) => read += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CoreError::Io(e)),
        }
    }
    Ok(head == EWF_MAGIC || head == EWF2_MAGIC)
}

/// Opens an image, routing E01 inputs through the capability when present.
pub fn open_image(
    path: impl AsRef<Path>,
    ewf: Option<&dyn EwfCapability>,
) -> Result<Box<dyn ImageSource>> {
    let path = path.as_ref();
    if is_ewf(path)? {
        return match ewf {
            Some(capability) => capability.open(path),
            None => Err(CoreError::UnsupportedImageFormat(
                "EnCase E01/EWF container; no EWF capability is built in".into(),
            )),
        };
    }
    Ok(Box::new(crate::reader::Image::open(path)?))
}

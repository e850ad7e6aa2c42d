// Cheap early-reject gate for incoming firmware images.
//
// This is deliberately not a full integrity check: the flash transaction
// computes and checks a running checksum as data streams in, and
// `finish_upgrade` fails if that check fails. Rejecting obviously bogus
// uploads here just saves an erase/write cycle on the target slot.

/// First byte of every valid ESP application image (esp_image_header_t).
pub const IMAGE_MAGIC: u8 = 0xE9;

/// Size of esp_image_header_t; anything shorter cannot be an image at all.
pub const IMAGE_HEADER_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("image is {len} bytes, shorter than the {IMAGE_HEADER_LEN}-byte header")]
    TooSmall { len: usize },

    #[error("bad image magic 0x{found:02X}, expected 0x{IMAGE_MAGIC:02X}")]
    BadMagic { found: u8 },
}

/// Validate the header of an incoming firmware image before any write begins.
pub fn verify_image(image: &[u8]) -> Result<(), VerifyError> {
    if image.len() < IMAGE_HEADER_LEN {
        return Err(VerifyError::TooSmall { len: image.len() });
    }
    if image[0] != IMAGE_MAGIC {
        return Err(VerifyError::BadMagic { found: image[0] });
    }
    Ok(())
}

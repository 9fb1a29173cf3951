//! Safety codes for out-of-band identity verification
//!
//! A safety code is a short deterministic fingerprint of two devices'
//! identity signing keys. Two users compare codes over a trusted channel
//! (reading aloud, scanning) to detect impersonation. The two keys are
//! sorted bytewise before hashing, so both parties compute the same code
//! without agreeing on who is "me" and who is "them".

use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use ed25519_dalek::VerifyingKey;
use qrcode::render::{svg, unicode};
use qrcode::QrCode;

use crate::error::{Error, Result};

type Blake2b128 = Blake2b<U16>;

/// Size of the safety-code digest in bytes
pub const SAFETY_CODE_SIZE: usize = 16;

/// Hex characters per display block
const BLOCK_WIDTH: usize = 4;

/// A derived safety code; never persisted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SafetyCode {
    digest: [u8; SAFETY_CODE_SIZE],
}

impl SafetyCode {
    /// Derive the safety code for two identities
    ///
    /// Deterministic and symmetric: `derive(a, b) == derive(b, a)`.
    pub fn derive(mine: &VerifyingKey, theirs: &VerifyingKey) -> Self {
        Self::from_key_bytes(mine.as_bytes(), theirs.as_bytes())
    }

    fn from_key_bytes(a: &[u8; 32], b: &[u8; 32]) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };

        let mut hasher = Blake2b128::new();
        hasher.update(first);
        hasher.update(second);
        let hash = hasher.finalize();

        let mut digest = [0u8; SAFETY_CODE_SIZE];
        digest.copy_from_slice(&hash);
        Self { digest }
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; SAFETY_CODE_SIZE] {
        &self.digest
    }

    /// Uppercase hex rendering of the digest
    pub fn hex(&self) -> String {
        hex::encode(self.digest).to_uppercase()
    }

    /// Grouped hex for human comparison, e.g. `1A2B 3C4D ...`
    pub fn display_blocks(&self) -> String {
        let hex = self.hex();
        hex.as_bytes()
            .chunks(BLOCK_WIDTH)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// QR encoding of the raw hex as an SVG document
    pub fn qr_svg(&self) -> Result<String> {
        let code = QrCode::new(self.hex()).map_err(|e| Error::QrEncoding(e.to_string()))?;
        Ok(code
            .render::<svg::Color>()
            .min_dimensions(200, 200)
            .build())
    }

    /// QR encoding of the raw hex for terminal display
    pub fn qr_unicode(&self) -> Result<String> {
        let code = QrCode::new(self.hex()).map_err(|e| Error::QrEncoding(e.to_string()))?;
        Ok(code.render::<unicode::Dense1x2>().build())
    }
}

impl std::fmt::Display for SafetyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_blocks())
    }
}

//! Hands a staged image to the bootloader for the next boot.

use ufmt::{uDisplay, uWrite, Formatter};

use crate::boot::{BootUtil, BootUtilError};
use crate::updater::StagedImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ActivationError {
    pub permanent: bool,
    pub source: BootUtilError,
}

impl uDisplay for ActivationError {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        let kind = if self.permanent { "permanent" } else { "test" };
        ufmt::uwrite!(f, "{} swap request rejected: {}", kind, self.source)
    }
}

/// Marks the secondary slot as the next boot candidate.
///
/// The request cannot be taken back before the next reset.
pub struct PendingActivator<'a, B> {
    bootutil: &'a mut B,
}

impl<'a, B: BootUtil> PendingActivator<'a, B> {
    pub fn new(bootutil: &'a mut B) -> Self {
        Self { bootutil }
    }

    /// `permanent = false` asks for a test swap that reverts unless the new
    /// image confirms itself.
    pub fn mark_pending(
        &mut self,
        _image: &StagedImage,
        permanent: bool,
    ) -> Result<(), ActivationError> {
        self.bootutil
            .set_pending(permanent)
            .map_err(|source| ActivationError { permanent, source })
    }
}

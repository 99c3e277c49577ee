//! Opening target disks

use refurb_errors::{DiskError, Error};
use refurb_types::Disk;
use std::io::{ErrorKind, SeekFrom};
use std::path::Path;
use tokio::io::AsyncSeekExt;

/// Open `device` and measure it.
///
/// Works for block devices and for regular image files; block devices
/// report no length in their metadata, so the size comes from seeking to
/// the end.
///
/// # Errors
///
/// Returns `DiskError::DeviceNotFound` when the device does not exist and an
/// I/O error when it cannot be opened or measured.
pub async fn probe_disk(device: &Path) -> Result<Disk, Error> {
    let mut file = match tokio::fs::File::open(device).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(DiskError::DeviceNotFound {
                device: device.display().to_string(),
            }
            .into())
        }
        Err(e) => return Err(Error::io_with_path(&e, device)),
    };
    let size = file
        .seek(SeekFrom::End(0))
        .await
        .map_err(|e| Error::io_with_path(&e, device))?;
    tracing::debug!(device = %device.display(), size, "probed disk");
    Ok(Disk::new(device, size))
}

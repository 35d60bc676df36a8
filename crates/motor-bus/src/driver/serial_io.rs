use motor_registry::MotorId;
use std::io::{self, ErrorKind};

use crate::error::{BusError, Result};
use crate::link::SerialLink;

/// Bytes skipped while hunting for a header before giving up on a reply.
const MAX_RESYNC: usize = 64;

fn map_read_err(e: io::Error, id: MotorId) -> BusError {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::UnexpectedEof => {
            BusError::Timeout(id)
        }
        _ => BusError::Io(e),
    }
}

pub(crate) fn read_exact(link: &mut dyn SerialLink, buf: &mut [u8], id: MotorId) -> Result<()> {
    link.read_exact(buf).map_err(|e| map_read_err(e, id))
}

/// Consume bytes until `header` has just been read. Returns the header bytes.
pub(crate) fn sync_to_header(
    link: &mut dyn SerialLink,
    header: &[u8],
    id: MotorId,
) -> Result<Vec<u8>> {
    let mut window: Vec<u8> = Vec::with_capacity(header.len());
    let mut byte = [0u8; 1];
    for _ in 0..MAX_RESYNC + header.len() {
        read_exact(link, &mut byte, id)?;
        window.push(byte[0]);
        if window.len() > header.len() {
            window.remove(0);
        }
        if window == header {
            return Ok(window);
        }
    }
    tracing::debug!(%id, "no packet header in reply stream");
    Err(BusError::Timeout(id))
}

/// Write a request after dropping stale input.
pub(crate) fn send(link: &mut dyn SerialLink, packet: &[u8]) -> Result<()> {
    link.clear_input()?;
    link.write_all(packet)?;
    link.flush()?;
    Ok(())
}

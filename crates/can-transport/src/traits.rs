use crate::{BusInfo, BusState, CanFilter, CanFrame, Result, TransportError};

/// A minimal blocking CAN bus interface.
pub trait CanBus: Send {
    /// Open a CAN interface by name (e.g., "can0", "slcan0").
    fn open(name: &str) -> Result<Self>
    where
        Self: Sized;

    /// Attempt to list available interfaces for this backend.
    fn list() -> Result<Vec<BusInfo>>
    where
        Self: Sized;

    /// Set acceptance filters if supported.
    fn set_filters(&mut self, _filters: &[CanFilter]) -> Result<()> {
        let _ = _filters;
        Err(TransportError::Unsupported("filters not supported"))
    }

    /// Receive one frame (blocking with optional timeout in milliseconds).
    fn recv(&mut self, _timeout_ms: Option<u64>) -> Result<CanFrame>;

    /// Send one frame.
    fn send(&mut self, frame: &CanFrame) -> Result<()>;

    /// Controller error state, as far as the backend can tell.
    fn bus_state(&self) -> BusState {
        BusState::ErrorActive
    }

    /// Discard any frames already queued for reception.
    fn drain(&mut self) {
        while self.recv(Some(0)).is_ok() {}
    }
}

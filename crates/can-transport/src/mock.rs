use crate::{BusInfo, BusState, CanBus, CanFilter, CanFrame, Result, Timestamp, TransportError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Produces the frames a simulated bus answers with for one transmitted frame.
pub type Responder = Box<dyn FnMut(&CanFrame) -> Vec<CanFrame> + Send>;

#[derive(Default)]
struct MockState {
    rx: VecDeque<CanFrame>,
    sent: Vec<CanFrame>,
    bus_state: BusState,
}

/// Shared view of a [`MockBus`] that tests keep after handing the bus to a driver.
#[derive(Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Every frame sent so far, in order.
    pub fn sent(&self) -> Vec<CanFrame> {
        self.state
            .lock()
            .map(|s| s.sent.clone())
            .unwrap_or_default()
    }

    /// Queue a frame for the next `recv`.
    pub fn inject(&self, frame: CanFrame) {
        if let Ok(mut s) = self.state.lock() {
            s.rx.push_back(frame);
        }
    }

    pub fn set_bus_state(&self, state: BusState) {
        if let Ok(mut s) = self.state.lock() {
            s.bus_state = state;
        }
    }
}

/// A simple in-process mock bus. Each bus instance is independent.
///
/// Without a responder the bus accepts every frame and never receives anything, which
/// looks exactly like a wired bus with no powered devices.
pub struct MockBus {
    name: String,
    handle: MockHandle,
    responder: Option<Responder>,
}

impl MockBus {
    pub fn with_responder(name: &str, responder: Responder) -> Self {
        Self {
            name: name.to_string(),
            handle: MockHandle::default(),
            responder: Some(responder),
        }
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl CanBus for MockBus {
    fn open(name: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            handle: MockHandle::default(),
            responder: None,
        })
    }

    fn list() -> Result<Vec<BusInfo>> {
        Ok(vec![BusInfo {
            name: "mock0".to_string(),
            driver: "mock".to_string(),
        }])
    }

    fn set_filters(&mut self, _filters: &[CanFilter]) -> Result<()> {
        let _ = _filters;
        // Mock supports no filters
        Err(TransportError::Unsupported(
            "mock backend has no hardware filters",
        ))
    }

    fn recv(&mut self, _timeout_ms: Option<u64>) -> Result<CanFrame> {
        let mut state = self
            .handle
            .state
            .lock()
            .map_err(|_| TransportError::Io("mock state poisoned".into()))?;
        match state.rx.pop_front() {
            Some(mut frame) => {
                frame.timestamp = Some(Timestamp::now());
                Ok(frame)
            }
            None => Err(TransportError::Timeout),
        }
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        if self.bus_state() == BusState::BusOff {
            return Err(TransportError::BusOff);
        }
        // The responder runs unlocked: simulators keep their own state.
        let replies = match self.responder.as_mut() {
            Some(responder) => responder(frame),
            None => Vec::new(),
        };
        let mut state = self
            .handle
            .state
            .lock()
            .map_err(|_| TransportError::Io("mock state poisoned".into()))?;
        state.sent.push(frame.clone());
        state.rx.extend(replies);
        Ok(())
    }

    fn bus_state(&self) -> BusState {
        self.handle
            .state
            .lock()
            .map(|s| s.bus_state)
            .unwrap_or(BusState::BusOff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CanId;

    #[test]
    fn test_silent_mock_times_out() {
        let mut bus = MockBus::open("mock0").unwrap();
        let frame = CanFrame::new(CanId::standard(0x1).unwrap(), &[1]).unwrap();
        bus.send(&frame).unwrap();
        assert!(matches!(bus.recv(Some(10)), Err(TransportError::Timeout)));
        assert_eq!(bus.handle().sent().len(), 1);
    }

    #[test]
    fn test_responder_echoes_on_other_id() {
        let mut bus = MockBus::with_responder(
            "mock0",
            Box::new(|f: &CanFrame| {
                let id = CanId::standard((f.id.raw() + 0x10) as u16).unwrap();
                vec![CanFrame::new(id, f.payload()).unwrap()]
            }),
        );
        let frame = CanFrame::new(CanId::standard(0x1).unwrap(), &[9, 8]).unwrap();
        bus.send(&frame).unwrap();
        let reply = bus.recv(Some(10)).unwrap();
        assert_eq!(reply.id.raw(), 0x11);
        assert_eq!(reply.payload(), &[9, 8]);
        assert!(reply.timestamp.is_some());
    }

    #[test]
    fn test_bus_off_rejects_send() {
        let mut bus = MockBus::open("mock0").unwrap();
        bus.handle().set_bus_state(BusState::BusOff);
        let frame = CanFrame::new(CanId::standard(0x1).unwrap(), &[]).unwrap();
        assert!(matches!(bus.send(&frame), Err(TransportError::BusOff)));
        assert!(bus.bus_state().is_degraded());
    }
}

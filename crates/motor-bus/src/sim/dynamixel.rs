use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::{SerialDevice, SimPort};
use crate::link::SerialLink;
use crate::protocol::dynamixel::{self as proto, reg, Instruction, BROADCAST_ID, HEADER};

const MEMORY: usize = 256;
const ERR_INSTRUCTION: u8 = 0x02;
const ERR_ACCESS: u8 = 0x07;

struct DynamixelBus {
    baud: u32,
    servos: BTreeMap<u8, Vec<u8>>,
}

impl DynamixelBus {
    fn execute(&mut self, id: u8, packet: &proto::Packet) -> Option<Vec<u8>> {
        let mem = self.servos.get_mut(&id)?;
        let reply = match Instruction::from_u8(packet.instruction) {
            Some(Instruction::Ping) => {
                let model = usize::from(reg::MODEL_NUMBER);
                let fw = mem[usize::from(reg::FIRMWARE_VERSION)];
                proto::status_packet(id, 0, &[mem[model], mem[model + 1], fw])
            }
            Some(Instruction::Read) => match packet.params[..] {
                [a0, a1, l0, l1] => {
                    let addr = usize::from(u16::from_le_bytes([a0, a1]));
                    let len = usize::from(u16::from_le_bytes([l0, l1]));
                    match mem.get(addr..addr + len) {
                        Some(data) => proto::status_packet(id, 0, data),
                        None => proto::status_packet(id, ERR_ACCESS, &[]),
                    }
                }
                _ => proto::status_packet(id, ERR_INSTRUCTION, &[]),
            },
            Some(Instruction::Write) if packet.params.len() >= 2 => {
                let addr = usize::from(u16::from_le_bytes([packet.params[0], packet.params[1]]));
                let data = &packet.params[2..];
                match mem.get_mut(addr..addr + data.len()) {
                    Some(slot) => {
                        slot.copy_from_slice(data);
                        if addr == usize::from(reg::GOAL_POSITION) && data.len() == 4 {
                            let p = usize::from(reg::PRESENT_POSITION);
                            mem[p..p + 4].copy_from_slice(data);
                        }
                        proto::status_packet(id, 0, &[])
                    }
                    None => proto::status_packet(id, ERR_ACCESS, &[]),
                }
            }
            Some(Instruction::Reboot) => {
                mem[usize::from(reg::TORQUE_ENABLE)] = 0;
                mem[usize::from(reg::HARDWARE_ERROR)] = 0;
                proto::status_packet(id, 0, &[])
            }
            _ => proto::status_packet(id, ERR_INSTRUCTION, &[]),
        };
        Some(reply)
    }
}

impl SerialDevice for DynamixelBus {
    fn baud(&self) -> u32 {
        self.baud
    }

    fn receive(&mut self, inbox: &mut Vec<u8>, outbox: &mut VecDeque<u8>) {
        loop {
            let Some(start) = inbox.windows(HEADER.len()).position(|w| w == HEADER) else {
                let keep = inbox.len().min(HEADER.len() - 1);
                inbox.drain(..inbox.len() - keep);
                return;
            };
            inbox.drain(..start);
            let Some(total) = proto::frame_len(inbox) else {
                return;
            };
            if inbox.len() < total {
                return;
            }
            let parsed = proto::parse_packet(&inbox[..total]);
            match parsed {
                Ok(packet) => {
                    inbox.drain(..total);
                    if packet.is_status() {
                        continue;
                    }
                    if packet.id == BROADCAST_ID {
                        let ids: Vec<u8> = self.servos.keys().copied().collect();
                        for id in ids {
                            self.execute(id, &packet);
                        }
                    } else if let Some(reply) = self.execute(packet.id, &packet) {
                        outbox.extend(reply);
                    }
                }
                Err(_) => {
                    inbox.drain(..1);
                }
            }
        }
    }
}

/// Simulated Dynamixel Protocol 2.0 bus.
#[derive(Clone)]
pub struct DynamixelSim {
    bus: Arc<Mutex<DynamixelBus>>,
}

impl DynamixelSim {
    pub fn new(baud: u32) -> Self {
        Self {
            bus: Arc::new(Mutex::new(DynamixelBus {
                baud,
                servos: BTreeMap::new(),
            })),
        }
    }

    /// Add a servo at mid travel, 12.0 V and 32 °C.
    pub fn add_servo(&self, id: u8, model_number: u16, firmware: u8) {
        let mut mem = vec![0u8; MEMORY];
        put(&mut mem, reg::MODEL_NUMBER, &model_number.to_le_bytes());
        mem[usize::from(reg::FIRMWARE_VERSION)] = firmware;
        mem[usize::from(reg::ID)] = id;
        put(&mut mem, reg::PRESENT_POSITION, &2048i32.to_le_bytes());
        put(&mut mem, reg::GOAL_POSITION, &2048i32.to_le_bytes());
        put(&mut mem, reg::PRESENT_INPUT_VOLTAGE, &120u16.to_le_bytes());
        mem[usize::from(reg::PRESENT_TEMPERATURE)] = 32;
        if let Ok(mut bus) = self.bus.lock() {
            bus.servos.insert(id, mem);
        }
    }

    pub fn set_temperature(&self, id: u8, celsius: u8) {
        self.poke(id, reg::PRESENT_TEMPERATURE, &[celsius]);
    }

    /// 0.1 V units.
    pub fn set_voltage(&self, id: u8, decivolts: u16) {
        self.poke(id, reg::PRESENT_INPUT_VOLTAGE, &decivolts.to_le_bytes());
    }

    /// Raw current (or load) register.
    pub fn set_current(&self, id: u8, raw: i16) {
        self.poke(id, reg::PRESENT_CURRENT, &raw.to_le_bytes());
    }

    pub fn set_hardware_error(&self, id: u8, bits: u8) {
        self.poke(id, reg::HARDWARE_ERROR, &[bits]);
    }

    pub fn torque_enabled(&self, id: u8) -> bool {
        self.bus
            .lock()
            .ok()
            .and_then(|bus| {
                bus.servos
                    .get(&id)
                    .map(|mem| mem[usize::from(reg::TORQUE_ENABLE)] != 0)
            })
            .unwrap_or(false)
    }

    pub(crate) fn open(&self, baud: u32) -> Box<dyn SerialLink> {
        Box::new(SimPort::new(self.bus.clone(), baud))
    }

    fn poke(&self, id: u8, addr: u16, data: &[u8]) {
        if let Ok(mut bus) = self.bus.lock() {
            if let Some(mem) = bus.servos.get_mut(&id) {
                put(mem, addr, data);
            }
        }
    }
}

fn put(mem: &mut [u8], addr: u16, data: &[u8]) {
    let start = usize::from(addr);
    mem[start..start + data.len()].copy_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn roundtrip(link: &mut Box<dyn SerialLink>, packet: &[u8]) -> Vec<u8> {
        link.write_all(packet).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        while let Ok(n) = link.read(&mut buf) {
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_ping_reports_model_and_firmware() {
        let sim = DynamixelSim::new(57_600);
        sim.add_servo(1, 1190, 46);
        let mut link = sim.open(57_600);
        let reply = roundtrip(&mut link, &proto::instruction(1, Instruction::Ping, &[]));
        let packet = proto::parse_packet(&reply).unwrap();
        let (err, data) = packet.status().unwrap();
        assert_eq!(err, 0);
        assert_eq!(data, &[0xA6, 0x04, 46]);
    }

    #[test]
    fn test_ignores_feetech_traffic() {
        let sim = DynamixelSim::new(1_000_000);
        sim.add_servo(1, 1060, 45);
        let mut link = sim.open(1_000_000);
        let feetech_ping = [0xFF, 0xFF, 0x01, 0x02, 0x01, 0xFB];
        assert!(roundtrip(&mut link, &feetech_ping).is_empty());
        let reply = roundtrip(&mut link, &proto::instruction(1, Instruction::Ping, &[]));
        assert!(proto::parse_packet(&reply).is_ok());
    }

    #[test]
    fn test_write_torque_enable() {
        let sim = DynamixelSim::new(57_600);
        sim.add_servo(2, 1060, 45);
        let mut link = sim.open(57_600);
        roundtrip(&mut link, &proto::write_request(2, reg::TORQUE_ENABLE, &[1]));
        assert!(sim.torque_enabled(2));
    }
}

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::{SerialDevice, SimPort};
use crate::link::SerialLink;
use crate::protocol::feetech::{self as proto, reg, Instruction, BROADCAST_ID, HEADER};

const MEMORY: usize = 256;

struct FeetechBus {
    baud: u32,
    servos: BTreeMap<u8, [u8; MEMORY]>,
    reboots: BTreeMap<u8, u32>,
}

impl FeetechBus {
    fn handle(&mut self, packet: proto::Packet, outbox: &mut VecDeque<u8>) {
        let targets: Vec<u8> = if packet.id == BROADCAST_ID {
            self.servos.keys().copied().collect()
        } else if self.servos.contains_key(&packet.id) {
            vec![packet.id]
        } else {
            return;
        };
        for id in targets {
            let reply = self.execute(id, &packet);
            // Broadcast instructions are never answered.
            if packet.id != BROADCAST_ID {
                if let Some(reply) = reply {
                    outbox.extend(reply);
                }
            }
        }
    }

    fn execute(&mut self, id: u8, packet: &proto::Packet) -> Option<Vec<u8>> {
        let mem = self.servos.get_mut(&id)?;
        match Instruction::from_u8(packet.code)? {
            Instruction::Ping => Some(proto::build_packet(id, 0, &[])),
            Instruction::Read => {
                let (addr, len) = match packet.params[..] {
                    [addr, len] => (usize::from(addr), usize::from(len)),
                    _ => return Some(proto::build_packet(id, 0x08, &[])),
                };
                let end = (addr + len).min(MEMORY);
                Some(proto::build_packet(id, 0, &mem[addr.min(end)..end]))
            }
            Instruction::Write => {
                let (&addr, data) = packet.params.split_first()?;
                let start = usize::from(addr);
                for (i, b) in data.iter().enumerate() {
                    if let Some(slot) = mem.get_mut(start + i) {
                        *slot = *b;
                    }
                }
                // Goals are reached instantly.
                if start == usize::from(reg::GOAL_POSITION) && data.len() >= 2 {
                    let p = usize::from(reg::PRESENT_POSITION);
                    mem[p] = data[0];
                    mem[p + 1] = data[1];
                }
                Some(proto::build_packet(id, 0, &[]))
            }
            Instruction::Reboot => {
                mem[usize::from(reg::TORQUE_ENABLE)] = 0;
                *self.reboots.entry(id).or_default() += 1;
                None
            }
            _ => Some(proto::build_packet(id, 0, &[])),
        }
    }
}

impl SerialDevice for FeetechBus {
    fn baud(&self) -> u32 {
        self.baud
    }

    fn receive(&mut self, inbox: &mut Vec<u8>, outbox: &mut VecDeque<u8>) {
        loop {
            let Some(start) = inbox.windows(2).position(|w| w == HEADER) else {
                // Keep a lone trailing 0xFF, it may start the next header.
                let keep = usize::from(inbox.last() == Some(&0xFF));
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
            match proto::parse_packet(&inbox[..total]) {
                Ok(packet) => {
                    inbox.drain(..total);
                    self.handle(packet, outbox);
                }
                Err(_) => {
                    inbox.drain(..1);
                }
            }
        }
    }
}

/// Simulated Feetech STS/SCS bus.
#[derive(Clone)]
pub struct FeetechSim {
    bus: Arc<Mutex<FeetechBus>>,
}

impl FeetechSim {
    pub fn new(baud: u32) -> Self {
        Self {
            bus: Arc::new(Mutex::new(FeetechBus {
                baud,
                servos: BTreeMap::new(),
                reboots: BTreeMap::new(),
            })),
        }
    }

    /// Add a servo at mid travel, 7.4 V and 30 °C.
    pub fn add_servo(&self, id: u8, model_number: u16, firmware: (u8, u8)) {
        let mut mem = [0u8; MEMORY];
        mem[usize::from(reg::FIRMWARE_MAJOR)] = firmware.0;
        mem[usize::from(reg::FIRMWARE_MINOR)] = firmware.1;
        put_u16(&mut mem, reg::MODEL_NUMBER, model_number);
        mem[usize::from(reg::ID)] = id;
        put_u16(&mut mem, reg::PRESENT_POSITION, 2048);
        put_u16(&mut mem, reg::GOAL_POSITION, 2048);
        mem[usize::from(reg::PRESENT_VOLTAGE)] = 74;
        mem[usize::from(reg::PRESENT_TEMPERATURE)] = 30;
        self.with(|bus| {
            bus.servos.insert(id, mem);
        });
    }

    pub fn set_temperature(&self, id: u8, celsius: u8) {
        self.poke(id, reg::PRESENT_TEMPERATURE, &[celsius]);
    }

    /// 0.1 V units.
    pub fn set_voltage(&self, id: u8, decivolts: u8) {
        self.poke(id, reg::PRESENT_VOLTAGE, &[decivolts]);
    }

    /// Raw sign-magnitude current register.
    pub fn set_current(&self, id: u8, raw: u16) {
        self.poke(id, reg::PRESENT_CURRENT, &raw.to_le_bytes());
    }

    pub fn set_position(&self, id: u8, raw: u16) {
        self.poke(id, reg::PRESENT_POSITION, &raw.to_le_bytes());
    }

    pub fn torque_enabled(&self, id: u8) -> bool {
        self.peek(id, reg::TORQUE_ENABLE, 1)
            .is_some_and(|b| b[0] != 0)
    }

    pub fn goal_position(&self, id: u8) -> Option<u16> {
        self.peek(id, reg::GOAL_POSITION, 2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn reboot_count(&self, id: u8) -> u32 {
        self.with(|bus| bus.reboots.get(&id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub(crate) fn open(&self, baud: u32) -> Box<dyn SerialLink> {
        Box::new(SimPort::new(self.bus.clone(), baud))
    }

    fn with<R>(&self, f: impl FnOnce(&mut FeetechBus) -> R) -> Option<R> {
        self.bus.lock().ok().map(|mut bus| f(&mut bus))
    }

    fn poke(&self, id: u8, addr: u8, data: &[u8]) {
        self.with(|bus| {
            if let Some(mem) = bus.servos.get_mut(&id) {
                let start = usize::from(addr);
                mem[start..start + data.len()].copy_from_slice(data);
            }
        });
    }

    fn peek(&self, id: u8, addr: u8, len: usize) -> Option<Vec<u8>> {
        self.with(|bus| {
            bus.servos.get(&id).map(|mem| {
                let start = usize::from(addr);
                mem[start..start + len].to_vec()
            })
        })
        .flatten()
    }
}

fn put_u16(mem: &mut [u8; MEMORY], addr: u8, value: u16) {
    let start = usize::from(addr);
    mem[start..start + 2].copy_from_slice(&value.to_le_bytes());
}

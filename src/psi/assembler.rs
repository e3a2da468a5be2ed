// psi/assembler.rs
//! Reassembles PSI sections that span several packets of one PID.

use std::collections::HashMap;

use crate::constants::SECTION_STUFFING;
use crate::packet::TsHeader;

struct Partial {
    buf:     Vec<u8>,
    next_cc: u8,
}

#[derive(Default)]
pub struct SectionAssembler {
    partial: HashMap<u16, Partial>,
}

impl SectionAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one packet payload; returns every section it completes, each
    /// starting at `table_id`.
    pub fn push(&mut self, header: &TsHeader, payload: &[u8]) -> Vec<Vec<u8>> {
        let pid = header.pid;
        let cc = header.continuity_counter;
        let mut out = Vec::new();

        if header.transport_error {
            self.partial.remove(&pid);
            return out;
        }
        if payload.is_empty() {
            return out;
        }

        if header.payload_unit_start {
            let pointer = payload[0] as usize;
            let data = &payload[1..];
            if pointer > data.len() {
                self.partial.remove(&pid);
                return out;
            }
            // tail of the previous section sits before the pointer
            if let Some(mut prev) = self.partial.remove(&pid) {
                if prev.next_cc == cc {
                    prev.buf.extend_from_slice(&data[..pointer]);
                    drain_sections(&mut prev.buf, &mut out);
                }
            }
            let mut buf = data[pointer..].to_vec();
            drain_sections(&mut buf, &mut out);
            if !buf.is_empty() {
                self.partial.insert(pid, Partial { buf, next_cc: (cc + 1) & 0x0F });
            }
        } else if let Some(prev) = self.partial.get_mut(&pid) {
            if cc == (prev.next_cc + 0x0F) & 0x0F {
                return out; // duplicate packet
            }
            if cc != prev.next_cc {
                self.partial.remove(&pid);
                return out;
            }
            prev.buf.extend_from_slice(payload);
            prev.next_cc = (cc + 1) & 0x0F;
            drain_sections(&mut prev.buf, &mut out);
            if prev.buf.is_empty() {
                self.partial.remove(&pid);
            }
        }
        out
    }

    /// Drops any partial section held for `pid`.
    pub fn reset(&mut self, pid: u16) {
        self.partial.remove(&pid);
    }
}

/// Moves complete sections from the front of `buf` into `out`, leaving an
/// incomplete tail. Stuffing ends the packet's sections.
fn drain_sections(buf: &mut Vec<u8>, out: &mut Vec<Vec<u8>>) {
    loop {
        match buf.first() {
            None => return,
            Some(&SECTION_STUFFING) => {
                buf.clear();
                return;
            }
            Some(_) => {}
        }
        if buf.len() < 3 {
            return;
        }
        let len = 3 + (((buf[1] & 0x0F) as usize) << 8 | buf[2] as usize);
        if buf.len() < len {
            return;
        }
        let rest = buf.split_off(len);
        out.push(std::mem::replace(buf, rest));
    }
}

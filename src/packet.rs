//! 188-byte transport packets: header decode, payload access and an async
//! reader that re-synchronises on lost sync bytes.

use anyhow::bail;
use bitstream_io::{BigEndian, BitRead, BitReader};
use bytes::{Buf, BytesMut};
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::constants::{TS_PACKET_SIZE, TS_SYNC_BYTE};

/// Decoded 4-byte packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    pub transport_error:          bool,
    pub payload_unit_start:       bool,
    pub priority:                 bool,
    pub pid:                      u16,
    pub scrambling_control:       u8,
    pub adaptation_field_control: u8,
    pub continuity_counter:       u8,
}

impl TsHeader {
    pub fn parse(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut br = BitReader::endian(bytes, BigEndian);
        let sync = br.read::<8, u8>()?;
        if sync != TS_SYNC_BYTE {
            bail!("bad sync byte {sync:#04x}");
        }
        Ok(Self {
            transport_error:          br.read_bit()?,
            payload_unit_start:       br.read_bit()?,
            priority:                 br.read_bit()?,
            pid:                      br.read::<13, u16>()?,
            scrambling_control:       br.read::<2, u8>()?,
            adaptation_field_control: br.read::<2, u8>()?,
            continuity_counter:       br.read::<4, u8>()?,
        })
    }

    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0x02 != 0
    }

    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0x01 != 0
    }

    /// High bit of `transport_scrambling_control`; `01` counts as clear.
    pub fn is_scrambled(&self) -> bool {
        self.scrambling_control >> 1 != 0
    }
}

/// One owned transport packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsPacket {
    buf:    BytesMut,
    header: TsHeader,
}

impl TsPacket {
    pub fn new(buf: BytesMut) -> anyhow::Result<Self> {
        if buf.len() != TS_PACKET_SIZE {
            bail!("packet is {} bytes", buf.len());
        }
        let header = TsHeader::parse(&buf[..4])?;
        Ok(Self { buf, header })
    }

    pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
        Self::new(BytesMut::from(bytes))
    }

    pub fn header(&self) -> &TsHeader {
        &self.header
    }

    pub fn pid(&self) -> u16 {
        self.header.pid
    }

    pub fn scrambling_control(&self) -> u8 {
        self.header.scrambling_control
    }

    /// Zeroes the two scrambling bits in the header.
    pub fn clear_scrambling_control(&mut self) {
        self.buf[3] &= 0x3F;
        self.header.scrambling_control = 0;
    }

    fn payload_offset(&self) -> usize {
        if !self.header.has_payload() {
            return TS_PACKET_SIZE;
        }
        if self.header.has_adaptation_field() {
            (5 + self.buf[4] as usize).min(TS_PACKET_SIZE)
        } else {
            4
        }
    }

    /// Bytes after the header and adaptation field.
    pub fn payload(&self) -> &[u8] {
        &self.buf[self.payload_offset()..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let offset = self.payload_offset();
        &mut self.buf[offset..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Splits an async byte stream into packets.
pub struct PacketReader<R> {
    inner:   R,
    buf:     BytesMut,
    resyncs: u64,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, buf: BytesMut::with_capacity(TS_PACKET_SIZE * 64), resyncs: 0 }
    }

    /// Next packet, or `None` at end of input.
    ///
    /// Cancel safe: bytes already read stay buffered.
    pub async fn next_packet(&mut self) -> anyhow::Result<Option<TsPacket>> {
        loop {
            if let Some(packet) = self.split_packet() {
                return Ok(Some(packet));
            }
            self.buf.reserve(TS_PACKET_SIZE * 64);
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                if !self.buf.is_empty() {
                    debug!("discarding {} trailing bytes", self.buf.len());
                    self.buf.clear();
                }
                return Ok(None);
            }
        }
    }

    /// Number of times the sync byte had to be searched for.
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    fn split_packet(&mut self) -> Option<TsPacket> {
        while self.buf.len() >= TS_PACKET_SIZE {
            if self.buf[0] != TS_SYNC_BYTE {
                let skip = self.buf.iter().position(|&b| b == TS_SYNC_BYTE).unwrap_or(self.buf.len());
                warn!("sync lost, skipping {skip} bytes");
                self.resyncs += 1;
                self.buf.advance(skip);
                continue;
            }
            match TsPacket::new(self.buf.split_to(TS_PACKET_SIZE)) {
                Ok(packet) => return Some(packet),
                Err(e) => debug!("dropping packet: {e}"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(pid: u16, sc: u8, afc: u8) -> Vec<u8> {
        let mut p = vec![0xAAu8; TS_PACKET_SIZE];
        p[0] = TS_SYNC_BYTE;
        p[1] = 0x40 | (pid >> 8) as u8;
        p[2] = pid as u8;
        p[3] = (sc << 6) | (afc << 4) | 0x07;
        p
    }

    #[test]
    fn test_header_fields() {
        let p = TsPacket::from_slice(&packet(0x1FF, 0b11, 0b01)).unwrap();
        let h = p.header();
        assert_eq!(h.pid, 0x1FF);
        assert!(h.payload_unit_start);
        assert!(!h.transport_error);
        assert_eq!(h.scrambling_control, 0b11);
        assert_eq!(h.continuity_counter, 7);
        assert!(h.is_scrambled());
        assert_eq!(p.payload().len(), 184);
    }

    #[test]
    fn test_payload_skips_adaptation_field() {
        let mut raw = packet(0x100, 0b10, 0b11);
        raw[4] = 10;
        let p = TsPacket::from_slice(&raw).unwrap();
        assert_eq!(p.payload().len(), TS_PACKET_SIZE - 15);

        let p = TsPacket::from_slice(&packet(0x100, 0b10, 0b10)).unwrap();
        assert!(p.payload().is_empty());
    }

    #[test]
    fn test_clear_scrambling_control_touches_only_those_bits() {
        let raw = packet(0x100, 0b11, 0b01);
        let mut p = TsPacket::from_slice(&raw).unwrap();
        p.clear_scrambling_control();
        assert_eq!(p.as_bytes()[3], raw[3] & 0x3F);
        assert_eq!(&p.as_bytes()[4..], &raw[4..]);
        assert_eq!(p.scrambling_control(), 0);
    }

    #[test]
    fn test_bad_sync_rejected() {
        let mut raw = packet(0x100, 0, 0b01);
        raw[0] = 0x00;
        assert!(TsPacket::from_slice(&raw).is_err());
    }

    #[tokio::test]
    async fn test_reader_resyncs_and_drops_tail() {
        let mut stream = vec![0x00, 0x01, 0x02];
        stream.extend(packet(0x10, 0, 0b01));
        stream.extend(packet(0x11, 0, 0b01));
        stream.extend([TS_SYNC_BYTE, 0x00]);

        let mut reader = PacketReader::new(stream.as_slice());
        assert_eq!(reader.next_packet().await.unwrap().unwrap().pid(), 0x10);
        assert_eq!(reader.next_packet().await.unwrap().unwrap().pid(), 0x11);
        assert!(reader.next_packet().await.unwrap().is_none());
        assert_eq!(reader.resyncs(), 1);
    }
}

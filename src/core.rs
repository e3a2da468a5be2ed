//! Async driver: reads packets, runs key exchanges and writes packets back
//! in input order.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

use crate::card::{CardChannel, CasCard, EcmResponse, InitialSetting, SessionManager};
use crate::cipher::DescramblerFactory;
use crate::entitlement::RequestToken;
use crate::error::CardError;
use crate::packet::{PacketReader, TsPacket};
use crate::processor::{KeyRequest, PacketProcessor, Verdict};
use crate::types::{DecoderStats, Options};

/// Answer to one spawned key request.
struct Completion {
    ecm_pid: u16,
    token:   RequestToken,
    outcome: Result<EcmResponse, CardError>,
}

/// One descrambling pipeline bound to a card session owner.
pub struct Decoder {
    card:    CasCard,
    setting: InitialSetting,
    options: Options,
    factory: DescramblerFactory,
}

impl Decoder {
    /// Attaches to the shared card session and runs the initial setting
    /// exchange. Any failure leaves the session as it was.
    pub async fn start(
        manager: &Arc<SessionManager>,
        options: Options,
        factory: DescramblerFactory,
    ) -> Result<Self, CardError> {
        let card = manager.open(&options.reader_name).await?;
        let setting = card.request_initial_setting().await?;
        info!(
            "card ready on {:?}: CA system {:#06x}, card type {:#04x}",
            card.reader().unwrap_or_default(),
            setting.ca_system_id,
            setting.card_type
        );
        Ok(Self { card, setting, options, factory })
    }

    pub fn initial_setting(&self) -> &InitialSetting {
        &self.setting
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Descrambles `input` into `output` until end of input.
    ///
    /// While a packet waits for its key no further input is consumed, so
    /// neither lane runs ahead of the packet that is held.
    pub async fn run<R, W>(&mut self, input: R, output: W) -> anyhow::Result<DecoderStats>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut processor = PacketProcessor::new(self.options.clone(), self.setting.clone(), self.factory.clone());
        let mut reader = PacketReader::new(input);
        let mut out = Output::new(output);
        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
        let channel = self.card.channel();
        let mut held: Option<TsPacket> = None;
        let mut outstanding = 0usize;
        let mut eof = false;

        loop {
            if eof && (held.is_none() || outstanding == 0) {
                break;
            }

            tokio::select! {
                biased;

                Some(done) = rx.recv(), if outstanding > 0 => {
                    outstanding -= 1;
                    processor.complete_request(done.ecm_pid, done.token, done.outcome);
                    if let Some(packet) = held.take() {
                        held = out.offer(&mut processor, packet).await?;
                    }
                }

                next = reader.next_packet(), if !eof && held.is_none() => {
                    let Some(packet) = next? else {
                        debug!("end of input, {outstanding} requests pending");
                        eof = true;
                        continue;
                    };
                    processor.stats_mut().packets_in += 1;
                    for request in processor.observe_sections(&packet) {
                        spawn_request(&channel, request, tx.clone());
                        outstanding += 1;
                    }
                    held = out.offer(&mut processor, packet).await?;
                }

                else => break,
            }
        }

        if let Some(packet) = held {
            warn!("PID {:#06x}: key never arrived", packet.pid());
            out.abandon(&mut processor, packet).await?;
        }
        out.flush().await?;

        let mut stats = processor.stats().clone();
        stats.resyncs = reader.resyncs();
        Ok(stats)
    }

    /// Releases this owner of the card session. Answers still in flight
    /// are discarded.
    pub fn stop(mut self) {
        self.card.close();
        info!("decoder stopped");
    }
}

fn spawn_request(channel: &CardChannel, request: KeyRequest, tx: mpsc::UnboundedSender<Completion>) {
    let channel = channel.clone();
    tokio::spawn(async move {
        let outcome = channel.request_ecm_key(&request.payload).await;
        // the receiver is gone once the run has ended
        let _ = tx.send(Completion { ecm_pid: request.ecm_pid, token: request.token, outcome });
    });
}

/// Buffered packet sink that remembers whether the stream is stalled.
struct Output<W> {
    out:     BufWriter<W>,
    stalled: bool,
}

impl<W: AsyncWrite + Unpin> Output<W> {
    fn new(inner: W) -> Self {
        Self { out: BufWriter::new(inner), stalled: false }
    }

    /// Runs `packet` through the data lane. Returns it back if it has to
    /// wait.
    async fn offer(&mut self, processor: &mut PacketProcessor, packet: TsPacket) -> anyhow::Result<Option<TsPacket>> {
        match processor.descramble(packet) {
            Verdict::Wait(packet) => {
                if !self.stalled {
                    self.stalled = true;
                    processor.stats_mut().stalls += 1;
                }
                return Ok(Some(packet));
            }
            Verdict::Emit(packet) => self.out.write_all(packet.as_bytes()).await?,
            Verdict::Drop => {}
        }
        self.stalled = false;
        Ok(None)
    }

    async fn abandon(&mut self, processor: &mut PacketProcessor, packet: TsPacket) -> anyhow::Result<()> {
        if let Verdict::Emit(packet) = processor.resolve_abandoned(packet) {
            self.out.write_all(packet.as_bytes()).await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        self.out.flush().await?;
        Ok(())
    }
}

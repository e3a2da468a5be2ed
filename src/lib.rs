// src/lib.rs
pub mod decoder {
    use std::sync::Arc;

    use tokio::io::{AsyncRead, AsyncWrite};

    pub use crate::card::{CasCard, InitialSetting, SessionManager};
    pub use crate::cipher::{Descrambler, DescramblerFactory, KeyParity};
    pub use crate::core::Decoder;
    pub use crate::error::CardError;
    pub use crate::types::{DecoderStats, Options};

    /// Starts a decoder, descrambles `input` into `output` until end of
    /// input and releases the card session again.
    pub async fn run<R, W>(
        manager: &Arc<SessionManager>,
        options: Options,
        factory: DescramblerFactory,
        input: R,
        output: W,
    ) -> anyhow::Result<DecoderStats>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut decoder = Decoder::start(manager, options, factory).await?;
        let stats = decoder.run(input, output).await;
        decoder.stop();
        stats
    }
}

pub mod card;
pub mod cipher;
pub mod constants;
mod core;
pub mod entitlement;
pub mod error;
pub mod logger;
pub mod packet;
pub mod processor;
pub mod program;
pub mod psi;
pub mod report;
pub mod types;
pub mod versions;

#[cfg(test)]
mod testutil;

pub use report::Reporter;
pub use types::{DecoderStats, Options};

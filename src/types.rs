use serde::{Deserialize, Serialize};

/// Decoder configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Substring matched against enumerated reader names; empty selects the
    /// first reader.
    pub reader_name:      String,
    /// Reassemble and count EMM sections.
    pub process_emm:      bool,
    /// Emit scrambled packets that cannot be decrypted instead of dropping
    /// them. Off by default.
    pub output_scrambled: bool,
}

impl Options {
    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Counters collected over one decoder run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecoderStats {
    pub packets_in:       u64,
    pub passed_clear:     u64,
    pub decrypted:        u64,
    /// Scrambled packets emitted unchanged.
    pub passed_scrambled: u64,
    pub dropped:          u64,
    /// Times the data lane stopped behind a packet waiting for a key.
    pub stalls:           u64,
    pub ecm_requests:     u64,
    pub ecm_accepted:     u64,
    pub ecm_rejected:     u64,
    pub ecm_failed:       u64,
    /// Card answers discarded because their request had been superseded.
    pub ecm_stale:        u64,
    pub routing_rebuilds: u64,
    pub emm_sections:     u64,
    pub resyncs:          u64,
}

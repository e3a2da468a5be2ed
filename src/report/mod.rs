//! JSON reports for the CLI and embedders.

use serde::Serialize;

use crate::card::InitialSetting;
use crate::types::DecoderStats;

/// Card identity as printed by `card-info`. Key material is never part of it.
#[derive(Debug, Clone, Serialize)]
pub struct CardReport {
    pub reader:                   Option<String>,
    pub return_code:              String,
    pub ca_system_id:             String,
    pub card_id:                  String,
    pub card_type:                u8,
    pub message_partition_length: u8,
}

#[derive(Serialize)]
struct CardJson<'a> {
    ts_time: String,
    card:    &'a CardReport,
}

#[derive(Serialize)]
struct StatsJson<'a> {
    ts_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reader:  Option<&'a str>,
    stats:   &'a DecoderStats,
}

pub struct Reporter;

impl Reporter {
    pub fn card_report(reader: Option<String>, setting: &InitialSetting) -> CardReport {
        CardReport {
            reader,
            return_code: format!("{:#06x}", setting.return_code),
            ca_system_id: format!("{:#06x}", setting.ca_system_id),
            card_id: setting.card_id.iter().map(|b| format!("{b:02x}")).collect(),
            card_type: setting.card_type,
            message_partition_length: setting.message_partition_length,
        }
    }

    /// Pretty JSON for `card-info`.
    pub fn card_json(report: &CardReport) -> anyhow::Result<String> {
        let rep = CardJson { ts_time: chrono::Utc::now().to_rfc3339(), card: report };
        Ok(serde_json::to_string_pretty(&rep)?)
    }

    /// Pretty JSON summary of one decoder run.
    pub fn stats_json(reader: Option<&str>, stats: &DecoderStats) -> anyhow::Result<String> {
        let rep = StatsJson { ts_time: chrono::Utc::now().to_rfc3339(), reader, stats };
        Ok(serde_json::to_string_pretty(&rep)?)
    }
}

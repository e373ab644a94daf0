//! Policy Context Assembler: turns a raw signing request plus the
//! persistence layer's rolling aggregates into the pure snapshot the
//! Rules Engine evaluates. The engine never reads storage or the clock
//! itself — `currentHourUtc` and every spend/rate figure arrive as
//! already-resolved fields.

use std::net::IpAddr;

use chrono::{DateTime, Datelike, Timelike, Utc};
use primitive_types::U256;

use crate::error::WalletResult;
use crate::storage::Storage;

/// Per-request evaluation snapshot ("Policy Context").
#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub signer_address: String,
    pub to_address: Option<String>,
    pub value_wei: U256,
    pub function_selector: Option<[u8; 4]>,
    pub chain_id: u64,
    pub rolling_daily_spend_wei: U256,
    pub rolling_monthly_spend_wei: U256,
    pub request_count_last_hour: u32,
    pub request_count_today: u32,
    pub current_hour_utc: u8,
    pub caller_ip: Option<IpAddr>,
    pub timestamp: DateTime<Utc>,
}

/// One entry in the spend ledger, JSON-serialized per signer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SpendEntry {
    pub value_wei: String,
    pub timestamp_secs: i64,
}

/// View onto the rolling spend / request-rate aggregates a real signing
/// request needs. Production wires this to the signer's `redb` tables;
/// tests substitute a fixed-value fake so Rules Engine tests never depend
/// on wall-clock or storage state.
pub trait AggregateReader: Send + Sync {
    fn rolling_daily_spend_wei(&self, signer_id: &str, now: DateTime<Utc>) -> WalletResult<U256>;
    fn rolling_monthly_spend_wei(&self, signer_id: &str, now: DateTime<Utc>) -> WalletResult<U256>;
    fn request_count_last_hour(&self, signer_id: &str, now: DateTime<Utc>) -> WalletResult<u32>;
    fn request_count_today(&self, signer_id: &str, now: DateTime<Utc>) -> WalletResult<u32>;
}

/// Production `AggregateReader` backed by the `redb` spend ledger and
/// request-counter tables.
pub struct RedbAggregateReader {
    storage: Storage,
}

impl RedbAggregateReader {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    fn sum_spend_since(&self, signer_id: &str, cutoff_secs: i64) -> WalletResult<U256> {
        let entries: Vec<SpendEntry> = self.storage.get_spend_entries(signer_id)?;
        let mut total = U256::zero();
        for entry in entries {
            if entry.timestamp_secs < cutoff_secs {
                continue;
            }
            if let Some(value) = super::criteria::parse_wei(&entry.value_wei) {
                total = total.saturating_add(value);
            }
        }
        Ok(total)
    }

    fn count_requests_since(&self, signer_id: &str, cutoff_secs: i64) -> WalletResult<u32> {
        let timestamps = self.storage.get_request_timestamps(signer_id)?;
        Ok(timestamps.iter().filter(|ts| **ts >= cutoff_secs).count() as u32)
    }
}

impl AggregateReader for RedbAggregateReader {
    fn rolling_daily_spend_wei(&self, signer_id: &str, now: DateTime<Utc>) -> WalletResult<U256> {
        self.sum_spend_since(signer_id, (now - chrono::Duration::days(1)).timestamp())
    }

    fn rolling_monthly_spend_wei(&self, signer_id: &str, now: DateTime<Utc>) -> WalletResult<U256> {
        self.sum_spend_since(signer_id, (now - chrono::Duration::days(30)).timestamp())
    }

    fn request_count_last_hour(&self, signer_id: &str, now: DateTime<Utc>) -> WalletResult<u32> {
        self.count_requests_since(signer_id, (now - chrono::Duration::hours(1)).timestamp())
    }

    fn request_count_today(&self, signer_id: &str, now: DateTime<Utc>) -> WalletResult<u32> {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always a valid time")
            .and_utc();
        self.count_requests_since(signer_id, midnight.timestamp())
    }
}

/// Raw request facts the assembler turns into a `PolicyContext`.
pub struct RequestFacts<'a> {
    pub signer_address: &'a str,
    pub to_address: Option<&'a str>,
    pub value_wei: U256,
    /// Transaction `data` field, if any; the first four bytes (if present)
    /// become `function_selector`.
    pub data: Option<&'a [u8]>,
    pub chain_id: u64,
    pub caller_ip: Option<IpAddr>,
}

/// Builds a `PolicyContext` from request facts, the aggregate reader, and
/// an externally supplied `now` (never read internally — callers own the
/// clock, which is what keeps the Rules Engine itself deterministic).
pub struct PolicyContextAssembler {
    aggregates: std::sync::Arc<dyn AggregateReader>,
}

impl PolicyContextAssembler {
    pub fn new(aggregates: std::sync::Arc<dyn AggregateReader>) -> Self {
        Self { aggregates }
    }

    pub fn assemble(
        &self,
        signer_id: &str,
        facts: RequestFacts<'_>,
        now: DateTime<Utc>,
    ) -> WalletResult<PolicyContext> {
        let function_selector = facts
            .data
            .filter(|d| d.len() >= 4)
            .map(|d| [d[0], d[1], d[2], d[3]]);

        Ok(PolicyContext {
            signer_address: facts.signer_address.to_string(),
            to_address: facts.to_address.map(str::to_string),
            value_wei: facts.value_wei,
            function_selector,
            chain_id: facts.chain_id,
            rolling_daily_spend_wei: self.aggregates.rolling_daily_spend_wei(signer_id, now)?,
            rolling_monthly_spend_wei: self.aggregates.rolling_monthly_spend_wei(signer_id, now)?,
            request_count_last_hour: self.aggregates.request_count_last_hour(signer_id, now)?,
            request_count_today: self.aggregates.request_count_today(signer_id, now)?,
            current_hour_utc: now.hour() as u8,
            caller_ip: facts.caller_ip,
            timestamp: now,
        })
    }
}

#[cfg(test)]
pub mod fakes {
    use super::*;

    /// Deterministic `AggregateReader` for Rules Engine / context tests:
    /// fixed aggregates, no storage, no wall-clock dependency.
    pub struct FixedAggregateReader {
        pub daily_spend_wei: U256,
        pub monthly_spend_wei: U256,
        pub request_count_last_hour: u32,
        pub request_count_today: u32,
    }

    impl Default for FixedAggregateReader {
        fn default() -> Self {
            Self {
                daily_spend_wei: U256::zero(),
                monthly_spend_wei: U256::zero(),
                request_count_last_hour: 0,
                request_count_today: 0,
            }
        }
    }

    impl AggregateReader for FixedAggregateReader {
        fn rolling_daily_spend_wei(&self, _signer_id: &str, _now: DateTime<Utc>) -> WalletResult<U256> {
            Ok(self.daily_spend_wei)
        }

        fn rolling_monthly_spend_wei(&self, _signer_id: &str, _now: DateTime<Utc>) -> WalletResult<U256> {
            Ok(self.monthly_spend_wei)
        }

        fn request_count_last_hour(&self, _signer_id: &str, _now: DateTime<Utc>) -> WalletResult<u32> {
            Ok(self.request_count_last_hour)
        }

        fn request_count_today(&self, _signer_id: &str, _now: DateTime<Utc>) -> WalletResult<u32> {
            Ok(self.request_count_today)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::FixedAggregateReader;
    use super::*;
    use std::sync::Arc;

    #[test]
    fn assembles_context_from_fixed_aggregates() {
        let reader = FixedAggregateReader {
            request_count_last_hour: 5,
            ..Default::default()
        };
        let assembler = PolicyContextAssembler::new(Arc::new(reader));

        let now = DateTime::parse_from_rfc3339("2026-01-01T14:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let ctx = assembler
            .assemble(
                "signer-1",
                RequestFacts {
                    signer_address: "0xabc",
                    to_address: Some("0xdef"),
                    value_wei: U256::from(1000u64),
                    data: Some(&[0xa9, 0x05, 0x9c, 0xbb, 0x01]),
                    chain_id: 1,
                    caller_ip: None,
                },
                now,
            )
            .unwrap();

        assert_eq!(ctx.current_hour_utc, 14);
        assert_eq!(ctx.request_count_last_hour, 5);
        assert_eq!(ctx.function_selector, Some([0xa9, 0x05, 0x9c, 0xbb]));
    }

    #[test]
    fn short_data_yields_no_selector() {
        let assembler = PolicyContextAssembler::new(Arc::new(FixedAggregateReader::default()));
        let ctx = assembler
            .assemble(
                "signer-1",
                RequestFacts {
                    signer_address: "0xabc",
                    to_address: None,
                    value_wei: U256::zero(),
                    data: Some(&[0x01, 0x02]),
                    chain_id: 1,
                    caller_ip: None,
                },
                Utc::now(),
            )
            .unwrap();
        assert!(ctx.function_selector.is_none());
    }
}

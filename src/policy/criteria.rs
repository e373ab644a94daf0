//! Criteria dispatcher: the nine predicate types a `Rule` can combine,
//! each evaluated against a `PolicyContext`. Every criterion fails closed
//! — malformed config or a context that doesn't supply what the criterion
//! needs makes it return `false` rather than propagate an error, which
//! cascades into the owning rule simply not firing.

use std::net::Ipv4Addr;

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use super::context::PolicyContext;

/// Ordering operator shared by the numeric/set-membership criteria.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Lte,
    Lt,
    Gte,
    Gt,
    Eq,
}

/// Set-membership direction for address/network/IP criteria.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SetOperator {
    In,
    NotIn,
}

/// One criterion's configuration. Criteria within a `Rule` are ANDed;
/// `Criterion::evaluate` never panics and never reads anything but the
/// context and its own config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CriterionConfig {
    EthValue {
        operator: Operator,
        /// Decimal (optionally scientific, e.g. `"1e18"`) wei string.
        value: String,
    },
    EvmAddress {
        operator: SetOperator,
        addresses: Vec<String>,
        #[serde(default)]
        allow_deploy: bool,
    },
    EvmNetwork {
        operator: SetOperator,
        chain_ids: Vec<u64>,
    },
    EvmFunction {
        /// 4-byte hex selectors, e.g. `"0xa9059cbb"`.
        selectors: Vec<String>,
        #[serde(default = "default_true")]
        allow_plain_transfer: bool,
    },
    IpAddress {
        operator: SetOperator,
        /// Literal IPv4 addresses or CIDR ranges.
        ips: Vec<String>,
    },
    RateLimit {
        max_per_hour: u32,
    },
    TimeWindow {
        start_hour: u8,
        end_hour: u8,
    },
    DailyLimit {
        max_wei: String,
    },
    MonthlyLimit {
        max_wei: String,
    },
}

fn default_true() -> bool {
    true
}

/// Parse a decimal wei amount, accepting plain decimal digits or simple
/// scientific notation (`"5e17"`). Anything else — empty string, a
/// negative sign, a fractional mantissa, overflow — is a parse failure,
/// which criteria treat as "does not pass" rather than propagate.
pub fn parse_wei(input: &str) -> Option<U256> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Some((mantissa, exponent)) = input.split_once(['e', 'E']) {
        let mantissa = U256::from_dec_str(mantissa).ok()?;
        let exponent: u32 = exponent.parse().ok()?;
        let ten = U256::from(10u64);
        let scale = ten.checked_pow(U256::from(exponent))?;
        return mantissa.checked_mul(scale);
    }

    U256::from_dec_str(input).ok()
}

fn parse_selector(hex_str: &str) -> Option<[u8; 4]> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(hex_str).ok()?;
    bytes.try_into().ok()
}

fn normalize_address(addr: &str) -> String {
    addr.trim().to_lowercase()
}

/// Parse a literal IPv4 address or a CIDR range (`a.b.c.d/n`).
fn parse_cidr(pattern: &str) -> Option<(Ipv4Addr, u32)> {
    if let Some((addr, bits)) = pattern.split_once('/') {
        let addr: Ipv4Addr = addr.parse().ok()?;
        let bits: u32 = bits.parse().ok()?;
        if bits > 32 {
            return None;
        }
        Some((addr, bits))
    } else {
        let addr: Ipv4Addr = pattern.parse().ok()?;
        Some((addr, 32))
    }
}

fn ip_matches(caller: Ipv4Addr, pattern: &str) -> bool {
    let Some((network, prefix_len)) = parse_cidr(pattern) else {
        return false;
    };
    if prefix_len == 0 {
        return true;
    }
    let mask = u32::MAX << (32 - prefix_len);
    let caller_bits = u32::from(caller) & mask;
    let network_bits = u32::from(network) & mask;
    caller_bits == network_bits
}

impl CriterionConfig {
    /// Evaluate this criterion against `ctx`. Returns `false` on any
    /// malformed config or missing context field, never an error.
    pub fn evaluate(&self, ctx: &PolicyContext) -> bool {
        match self {
            Self::EthValue { operator, value } => {
                let Some(threshold) = parse_wei(value) else {
                    return false;
                };
                compare(ctx.value_wei, *operator, threshold)
            }

            Self::EvmAddress {
                operator,
                addresses,
                allow_deploy,
            } => {
                let Some(to) = ctx.to_address.as_deref() else {
                    // No recipient means contract deployment.
                    return match operator {
                        SetOperator::In => *allow_deploy,
                        SetOperator::NotIn => true,
                    };
                };
                let to = normalize_address(to);
                let is_member = addresses.iter().any(|a| normalize_address(a) == to);
                match operator {
                    SetOperator::In => is_member,
                    SetOperator::NotIn => !is_member,
                }
            }

            Self::EvmNetwork {
                operator,
                chain_ids,
            } => {
                let is_member = chain_ids.contains(&ctx.chain_id);
                match operator {
                    SetOperator::In => is_member,
                    SetOperator::NotIn => !is_member,
                }
            }

            Self::EvmFunction {
                selectors,
                allow_plain_transfer,
            } => {
                let Some(selector) = ctx.function_selector else {
                    return *allow_plain_transfer;
                };
                selectors
                    .iter()
                    .filter_map(|s| parse_selector(s))
                    .any(|s| s == selector)
            }

            Self::IpAddress { operator, ips } => {
                let Some(caller) = ctx.caller_ip else {
                    return false;
                };
                let is_member = ips.iter().any(|pattern| ip_matches(caller, pattern));
                match operator {
                    SetOperator::In => is_member,
                    SetOperator::NotIn => !is_member,
                }
            }

            Self::RateLimit { max_per_hour } => {
                if *max_per_hour == 0 {
                    return false;
                }
                ctx.request_count_last_hour < *max_per_hour
            }

            Self::TimeWindow {
                start_hour,
                end_hour,
            } => {
                if *start_hour > 23 || *end_hour > 23 {
                    return false;
                }
                let hour = ctx.current_hour_utc;
                if start_hour <= end_hour {
                    hour >= *start_hour && hour < *end_hour
                } else {
                    // Overnight window, e.g. 22 -> 6.
                    hour >= *start_hour || hour < *end_hour
                }
            }

            Self::DailyLimit { max_wei } => {
                let Some(limit) = parse_wei(max_wei) else {
                    return false;
                };
                match ctx.rolling_daily_spend_wei.checked_add(ctx.value_wei) {
                    Some(total) => total <= limit,
                    None => false,
                }
            }

            Self::MonthlyLimit { max_wei } => {
                let Some(limit) = parse_wei(max_wei) else {
                    return false;
                };
                match ctx.rolling_monthly_spend_wei.checked_add(ctx.value_wei) {
                    Some(total) => total <= limit,
                    None => false,
                }
            }
        }
    }
}

fn compare(lhs: U256, op: Operator, rhs: U256) -> bool {
    match op {
        Operator::Lte => lhs <= rhs,
        Operator::Lt => lhs < rhs,
        Operator::Gte => lhs >= rhs,
        Operator::Gt => lhs > rhs,
        Operator::Eq => lhs == rhs,
    }
}

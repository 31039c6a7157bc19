use ethers::types::U256;
use serde::Deserialize;

/// Confidence bucket requested from an external gas price source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    /// Cheapest bucket, may take several blocks to clear
    Slow,
    /// Expected to clear within a few blocks
    #[default]
    Standard,
    /// Expected to clear next block
    Fast,
    /// Priced above the current head block
    Rapid,
}

/// A gas pricing scheme. Exactly one scheme applies to an outgoing
/// transaction; modeling this as a tagged variant makes mixing the legacy and
/// fee-market fields unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeEstimate {
    /// Pre-EIP-1559 single gas price, in wei
    Legacy {
        /// Offered gas price
        gas_price: U256,
    },
    /// EIP-1559 fee pair, in wei
    Eip1559 {
        /// Absolute fee cap
        max_fee_per_gas: U256,
        /// Tip offered to the block producer
        max_priority_fee_per_gas: U256,
    },
}

impl FeeEstimate {
    /// Scale the offered price up by `percent`. Used when displacing an
    /// existing mempool entry at the same nonce: the replacement must strictly
    /// outbid whatever the pending transaction offered.
    pub fn bump(self, percent: u64) -> Self {
        let scale = |v: U256| v * U256::from(100 + percent) / U256::from(100);
        match self {
            FeeEstimate::Legacy { gas_price } => FeeEstimate::Legacy {
                gas_price: scale(gas_price),
            },
            FeeEstimate::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => FeeEstimate::Eip1559 {
                max_fee_per_gas: scale(max_fee_per_gas),
                max_priority_fee_per_gas: scale(max_priority_fee_per_gas),
            },
        }
    }
}

/// Where a quote came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteSource {
    /// An external price oracle, with the confidence bucket it served
    Oracle {
        /// The bucket that was requested and matched
        confidence: ConfidenceLevel,
    },
    /// The node's own price/fee estimation
    NodeDefault,
}

/// A priced fee, tagged with its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasQuote {
    /// The pricing scheme to apply
    pub fee: FeeEstimate,
    /// Which source produced it
    pub source: QuoteSource,
}

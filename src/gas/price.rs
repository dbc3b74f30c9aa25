//! Gas price values and oracle tiers

use crate::error::{ClientError, ClientResult};

use ethers::types::U256;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

const WEI_PER_GWEI: u64 = 1_000_000_000;
const WEI_PER_TENTH_GWEI: f64 = 100_000_000.0;

/// Named aggressiveness level reported by the oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GasPriority {
    SafeLow,
    Average,
    Fast,
    Fastest,
}

impl GasPriority {
    pub const ALL: [GasPriority; 4] = [
        GasPriority::SafeLow,
        GasPriority::Average,
        GasPriority::Fast,
        GasPriority::Fastest,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            GasPriority::SafeLow => "safe_low",
            GasPriority::Average => "average",
            GasPriority::Fast => "fast",
            GasPriority::Fastest => "fastest",
        }
    }
}

impl fmt::Display for GasPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Gas price in wei
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct GasPrice(U256);

impl GasPrice {
    pub const ZERO: GasPrice = GasPrice(U256([0; 4]));

    pub fn from_wei(wei: U256) -> Self {
        Self(wei)
    }

    pub fn from_gwei(gwei: u64) -> Self {
        Self(U256::from(gwei) * U256::from(WEI_PER_GWEI))
    }

    /// Convert an oracle reading in tenths of a gwei
    pub fn from_gwei_tenths(tenths: f64) -> ClientResult<Self> {
        if !tenths.is_finite() || tenths < 0.0 {
            return Err(ClientError::Oracle(format!(
                "invalid gas price reading: {}",
                tenths
            )));
        }
        let wei = (tenths * WEI_PER_TENTH_GWEI).round() as u128;
        Ok(Self(U256::from(wei)))
    }

    pub fn wei(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Decimal gwei string with at least one fractional digit, e.g. "5.0"
    pub fn to_gwei_string(&self) -> String {
        let (whole, frac) = self.0.div_mod(U256::from(WEI_PER_GWEI));
        let frac = format!("{:09}", frac.low_u64());
        let frac = frac.trim_end_matches('0');
        if frac.is_empty() {
            format!("{}.0", whole)
        } else {
            format!("{}.{}", whole, frac)
        }
    }

    /// Lossy gwei value for gauges
    pub fn as_gwei_f64(&self) -> f64 {
        self.to_gwei_string().parse().unwrap_or(f64::NAN)
    }
}

impl fmt::Display for GasPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} gwei", self.to_gwei_string())
    }
}

impl From<GasPrice> for U256 {
    fn from(price: GasPrice) -> Self {
        price.0
    }
}

/// Oracle response body. Readings are tenths of a gwei.
#[derive(Debug, Deserialize)]
pub(crate) struct OracleResponse {
    #[serde(default, alias = "safeLow", alias = "low")]
    safe_low: Option<f64>,
    #[serde(default, alias = "standard")]
    average: Option<f64>,
    #[serde(default)]
    fast: Option<f64>,
    #[serde(default)]
    fastest: Option<f64>,
}

impl OracleResponse {
    /// Convert every reported tier, failing when none is present
    pub(crate) fn into_prices(self) -> ClientResult<HashMap<GasPriority, GasPrice>> {
        let readings = [
            (GasPriority::SafeLow, self.safe_low),
            (GasPriority::Average, self.average),
            (GasPriority::Fast, self.fast),
            (GasPriority::Fastest, self.fastest),
        ];

        let mut prices = HashMap::new();
        for (priority, reading) in readings {
            if let Some(tenths) = reading {
                prices.insert(priority, GasPrice::from_gwei_tenths(tenths)?);
            }
        }

        if prices.is_empty() {
            return Err(ClientError::Oracle(
                "response contains no gas price tiers".to_string(),
            ));
        }
        Ok(prices)
    }
}

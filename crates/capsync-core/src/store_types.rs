use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Durable store backend types
///
/// Defined in core because it is selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Local,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StoreBackend::Local),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(anyhow::anyhow!("Invalid store backend: {}", s)),
        }
    }
}

impl Display for StoreBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StoreBackend::Local => write!(f, "local"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

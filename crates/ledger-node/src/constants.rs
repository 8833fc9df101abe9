pub(crate) const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub(crate) const DEFAULT_DATA_DIR: &str = "./data";
pub(crate) const DEFAULT_SIM_NODES: usize = 4;
pub(crate) const DEFAULT_SIM_SECONDS: u64 = 30;
pub(crate) const DEFAULT_TX_INTERVAL_MS: u64 = 500;
/// Generated transfers are between 0.10 and 2.00.
pub(crate) const GEN_MIN_AMOUNT: u64 = 10;
pub(crate) const GEN_MAX_AMOUNT: u64 = 200;

pub mod bcv;
pub mod bcv_banks;
pub mod binance_p2p;

pub use bcv::BcvProvider;
pub use bcv_banks::BcvBanksProvider;
pub use binance_p2p::BinanceP2pProvider;

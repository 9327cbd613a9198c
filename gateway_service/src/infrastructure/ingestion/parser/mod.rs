pub mod bsc;
pub mod solana;
pub mod tron;

pub use bsc::BscParser;
pub use solana::SolanaParser;
pub use tron::TronParser;

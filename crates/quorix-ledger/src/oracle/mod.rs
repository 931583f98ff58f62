//! Offer and nonce issuance

pub mod resource_oracle;

pub use resource_oracle::{
    NonceStatus, OfferOptions, OracleConfig, RandomBits, ResourceOracle, MAX_RANDOM_BITS,
};

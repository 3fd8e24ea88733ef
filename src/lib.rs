pub mod spatialmatch;

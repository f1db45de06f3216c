pub mod proxy;
pub mod stats;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

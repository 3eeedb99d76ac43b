pub mod bids;
pub mod deadlines;
pub mod effects;
pub mod matcher;
pub mod packages;
pub mod routes;
pub mod state_machine;

#[cfg(test)]
pub(crate) mod testing;

pub mod autodraft;
pub mod draft;
pub mod ops;
pub mod rating;
pub mod settlement;
pub mod sweeper;
pub mod transitions;

#[cfg(test)]
pub mod testutil;

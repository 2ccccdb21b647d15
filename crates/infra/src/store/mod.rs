//! Persistent implementations of the `gatehouse-auth` store traits.

pub mod postgres;

//! Background tasks of an inflow: the activation signal feeding the
//! expiration-driven refresh scheduler and its load worker.

pub(crate) mod activation;
pub(crate) mod scheduler;

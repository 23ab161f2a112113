#[cfg(feature = "postgres")]
mod postgres_test;

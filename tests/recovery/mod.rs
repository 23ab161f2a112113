mod expiration_test;
mod heartbeat_test;
mod shutdown_test;

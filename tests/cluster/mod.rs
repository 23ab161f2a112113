mod forwarding_test;

mod approval_flow_test;
mod cancel_test;
mod manual_execution_test;
mod query_test;

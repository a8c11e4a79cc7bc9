mod audit_tests;
mod job_queue_tests;

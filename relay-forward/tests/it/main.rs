mod concurrency;
mod egress;
mod forwarding;
mod policy;

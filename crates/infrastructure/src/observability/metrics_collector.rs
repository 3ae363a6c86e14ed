//! 指标采集
//!
//! 基于 `metrics` 宏记录分发与调度指标，导出器（Prometheus）由二进制入口按配置安装；
//! 未安装导出器时所有记录都是空操作。

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

const MESSAGES_RECEIVED: &str = "courier_messages_received_total";
const MESSAGES_DUPLICATE: &str = "courier_messages_duplicate_total";
const MESSAGES_SUCCEEDED: &str = "courier_messages_succeeded_total";
const MESSAGES_FAILED: &str = "courier_messages_failed_total";
const MESSAGES_RETRIED: &str = "courier_messages_retried_total";
const MESSAGES_DEAD_LETTERED: &str = "courier_messages_dead_lettered_total";
const HANDLER_DURATION: &str = "courier_handler_duration_seconds";
const IN_FLIGHT: &str = "courier_in_flight";
const JOB_RUNS: &str = "courier_job_runs_total";
const JOB_SKIPPED: &str = "courier_job_skipped_total";
const JOB_FAILURES: &str = "courier_job_failures_total";
const JOB_DURATION: &str = "courier_job_duration_seconds";

#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// 注册指标说明，安装导出器后调用一次
    pub fn describe() {
        describe_counter!(MESSAGES_RECEIVED, "Messages received per destination");
        describe_counter!(MESSAGES_DUPLICATE, "Messages suppressed as duplicates");
        describe_counter!(MESSAGES_SUCCEEDED, "Messages handled successfully");
        describe_counter!(MESSAGES_FAILED, "Handler invocations that failed");
        describe_counter!(MESSAGES_RETRIED, "Messages sent back for redelivery");
        describe_counter!(MESSAGES_DEAD_LETTERED, "Messages moved to dead letter");
        describe_histogram!(HANDLER_DURATION, "Handler execution time in seconds");
        describe_gauge!(IN_FLIGHT, "Handlers currently running per destination");
        describe_counter!(JOB_RUNS, "Scheduled job runs started");
        describe_counter!(JOB_SKIPPED, "Scheduled firings skipped due to overlap");
        describe_counter!(JOB_FAILURES, "Scheduled job runs that failed");
        describe_histogram!(JOB_DURATION, "Scheduled job execution time in seconds");
    }

    pub fn record_message_received(&self, destination: &str) {
        counter!(MESSAGES_RECEIVED, "destination" => destination.to_string()).increment(1);
    }

    pub fn record_duplicate(&self, destination: &str) {
        counter!(MESSAGES_DUPLICATE, "destination" => destination.to_string()).increment(1);
    }

    pub fn record_handler_execution(
        &self,
        destination: &str,
        message_type: &str,
        success: bool,
        duration_seconds: f64,
    ) {
        let destination = destination.to_string();
        let message_type = message_type.to_string();
        if success {
            counter!(MESSAGES_SUCCEEDED, "destination" => destination.clone(), "message_type" => message_type.clone())
                .increment(1);
        } else {
            counter!(MESSAGES_FAILED, "destination" => destination.clone(), "message_type" => message_type.clone())
                .increment(1);
        }
        histogram!(HANDLER_DURATION, "destination" => destination, "message_type" => message_type)
            .record(duration_seconds);
    }

    pub fn record_retry(&self, destination: &str) {
        counter!(MESSAGES_RETRIED, "destination" => destination.to_string()).increment(1);
    }

    pub fn record_dead_letter(&self, destination: &str) {
        counter!(MESSAGES_DEAD_LETTERED, "destination" => destination.to_string()).increment(1);
    }

    pub fn update_in_flight(&self, destination: &str, in_flight: usize) {
        gauge!(IN_FLIGHT, "destination" => destination.to_string()).set(in_flight as f64);
    }

    pub fn record_job_run(&self, job_name: &str, success: bool, duration_seconds: f64) {
        counter!(JOB_RUNS, "job" => job_name.to_string()).increment(1);
        if !success {
            counter!(JOB_FAILURES, "job" => job_name.to_string()).increment(1);
        }
        histogram!(JOB_DURATION, "job" => job_name.to_string()).record(duration_seconds);
    }

    pub fn record_job_skipped(&self, job_name: &str) {
        counter!(JOB_SKIPPED, "job" => job_name.to_string()).increment(1);
    }
}

//! 结构化日志
//!
//! 统一分发与调度过程中的事件日志，每条都带 `event` 字段，便于在JSON输出中检索。

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_consumer_started(destination: &str, subscription: &str, max_concurrency: usize) {
        info!(
            event = "consumer_started",
            destination = destination,
            subscription = subscription,
            max_concurrency = max_concurrency,
            "Consumer loop started"
        );
    }

    pub fn log_consumer_stopped(destination: &str, drained: usize, aborted: usize) {
        info!(
            event = "consumer_stopped",
            destination = destination,
            drained = drained,
            aborted = aborted,
            "Consumer loop stopped"
        );
    }

    pub fn log_message_received(message_id: &str, type_name: &str, destination: &str, attempt: u32) {
        debug!(
            event = "message_received",
            message.id = message_id,
            message.type = type_name,
            destination = destination,
            attempt = attempt,
            "Message received"
        );
    }

    pub fn log_duplicate_suppressed(message_id: &str, type_name: &str, destination: &str) {
        info!(
            event = "duplicate_suppressed",
            message.id = message_id,
            message.type = type_name,
            destination = destination,
            "Duplicate message suppressed"
        );
    }

    pub fn log_message_completed(
        message_id: &str,
        type_name: &str,
        destination: &str,
        attempt: u32,
        duration_ms: u64,
    ) {
        debug!(
            event = "message_completed",
            message.id = message_id,
            message.type = type_name,
            destination = destination,
            attempt = attempt,
            duration_ms = duration_ms,
            "Message handled"
        );
    }

    pub fn log_handler_failed(
        message_id: &str,
        type_name: &str,
        destination: &str,
        attempt: u32,
        max_attempts: u32,
        error_message: &str,
    ) {
        warn!(
            event = "handler_failed",
            message.id = message_id,
            message.type = type_name,
            destination = destination,
            attempt = attempt,
            max_attempts = max_attempts,
            error = error_message,
            "Message handler failed"
        );
    }

    pub fn log_message_retry(
        message_id: &str,
        type_name: &str,
        destination: &str,
        attempt: u32,
        delay_ms: u64,
    ) {
        info!(
            event = "message_retry",
            message.id = message_id,
            message.type = type_name,
            destination = destination,
            attempt = attempt,
            retry.delay_ms = delay_ms,
            "Message scheduled for redelivery"
        );
    }

    /// 死信属于终态失败，必须携带完整定位信息
    pub fn log_message_dead_lettered(
        message_id: &str,
        type_name: &str,
        destination: &str,
        attempt: u32,
        reason: &str,
    ) {
        error!(
            event = "message_dead_lettered",
            message.id = message_id,
            message.type = type_name,
            destination = destination,
            attempt = attempt,
            reason = reason,
            "Message moved to dead letter"
        );
    }

    pub fn log_job_started(job_name: &str, run_number: u64, fired_at: DateTime<Utc>) {
        debug!(
            event = "job_started",
            job.name = job_name,
            job.run = run_number,
            job.fired_at = %fired_at,
            "Job started"
        );
    }

    pub fn log_job_completed(job_name: &str, run_number: u64, duration_ms: u64) {
        info!(
            event = "job_completed",
            job.name = job_name,
            job.run = run_number,
            job.duration_ms = duration_ms,
            "Job completed"
        );
    }

    pub fn log_job_failed(job_name: &str, run_number: u64, duration_ms: u64, error_message: &str) {
        error!(
            event = "job_failed",
            job.name = job_name,
            job.run = run_number,
            job.duration_ms = duration_ms,
            error = error_message,
            "Job failed"
        );
    }

    pub fn log_job_overlap_skipped(job_name: &str, fired_at: DateTime<Utc>, skipped_total: u64) {
        debug!(
            event = "job_overlap_skipped",
            job.name = job_name,
            job.fired_at = %fired_at,
            job.skipped_total = skipped_total,
            "Previous run still in progress, firing skipped"
        );
    }
}

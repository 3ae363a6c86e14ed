//! 内置作业
//!
//! - `dedup-sweep`：清理去重存储中已过期的记录
//! - `dead-letter-report`：按目标汇总死信数量

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{Job, JobContext};
use courier_dispatcher::DedupStore;
use courier_infrastructure::InMemoryBroker;
use tracing::{debug, info, warn};

pub const DEDUP_SWEEP_JOB: &str = "dedup-sweep";
pub const DEAD_LETTER_REPORT_JOB: &str = "dead-letter-report";

pub struct DedupSweepJob {
    dedup: Arc<DedupStore>,
}

impl DedupSweepJob {
    pub fn new(dedup: Arc<DedupStore>) -> Self {
        Self { dedup }
    }
}

#[async_trait]
impl Job for DedupSweepJob {
    async fn run(&self, context: JobContext) -> anyhow::Result<()> {
        let purged = self.dedup.purge_expired();
        debug!(
            "Dedup sweep run {} purged {} expired record(s), {} remaining",
            context.run_number,
            purged,
            self.dedup.len()
        );
        Ok(())
    }
}

pub struct DeadLetterReportJob {
    broker: InMemoryBroker,
}

impl DeadLetterReportJob {
    pub fn new(broker: InMemoryBroker) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Job for DeadLetterReportJob {
    async fn run(&self, _context: JobContext) -> anyhow::Result<()> {
        let counts = self.broker.dead_letter_counts();
        if counts.is_empty() {
            info!(event = "dead_letter_report", total = 0, "No dead-lettered messages");
            return Ok(());
        }

        let total: usize = counts.iter().map(|(_, count)| count).sum();
        for (destination, count) in &counts {
            warn!(
                event = "dead_letter_report",
                destination = destination.as_str(),
                count = *count,
                "Dead-lettered messages retained"
            );
        }
        info!(
            event = "dead_letter_report",
            total = total,
            destinations = counts.len(),
            "Dead letter report completed"
        );
        Ok(())
    }
}

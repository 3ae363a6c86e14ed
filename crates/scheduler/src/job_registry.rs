use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use courier_core::{job_fn, CourierError, Job, JobContext, JobDescriptor, Result};

use crate::trigger::JobTrigger;

/// 已注册的作业：描述、解析后的触发器与执行体
#[derive(Clone)]
pub struct RegisteredJob {
    pub descriptor: JobDescriptor,
    pub trigger: JobTrigger,
    pub body: Arc<dyn Job>,
}

/// 作业注册表，名称唯一
#[derive(Default, Clone)]
pub struct JobRegistry {
    jobs: Vec<RegisteredJob>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: JobDescriptor, body: Arc<dyn Job>) -> Result<()> {
        if descriptor.name.trim().is_empty() {
            return Err(CourierError::InvalidTrigger("作业名称不能为空".to_string()));
        }
        if self.contains(&descriptor.name) {
            return Err(CourierError::DuplicateJob {
                name: descriptor.name,
            });
        }

        let trigger = JobTrigger::from_spec(&descriptor.trigger)?;
        self.jobs.push(RegisteredJob {
            descriptor,
            trigger,
            body,
        });
        Ok(())
    }

    pub fn register_fn<F, Fut>(&mut self, descriptor: JobDescriptor, f: F) -> Result<()>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(descriptor, Arc::new(job_fn(f)))
    }

    /// 按配置的作业描述绑定执行体，每个描述都必须有同名执行体
    pub fn bind(
        &mut self,
        descriptors: Vec<JobDescriptor>,
        bodies: &HashMap<String, Arc<dyn Job>>,
    ) -> Result<()> {
        for descriptor in descriptors {
            let body = bodies
                .get(&descriptor.name)
                .cloned()
                .ok_or_else(|| CourierError::MissingJobBody {
                    name: descriptor.name.clone(),
                })?;
            self.register(descriptor, body)?;
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.iter().any(|job| job.descriptor.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredJob> {
        self.jobs.iter().find(|job| job.descriptor.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.jobs
            .iter()
            .map(|job| job.descriptor.name.as_str())
            .collect()
    }

    pub fn jobs(&self) -> &[RegisteredJob] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

//! Scripted in-memory provider used by worker, handler and client tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::{JobPoll, JobRequest, JobState, ProviderError, VideoProvider};

pub enum ScriptedPoll {
    TransportError,
    Ok(JobPoll),
}

pub struct MockProvider {
    init_failures: AtomicU32,
    create_transport_failures: AtomicU32,
    create_fatal: Mutex<Option<String>>,
    polls: Mutex<VecDeque<ScriptedPoll>>,
    requests: Mutex<Vec<JobRequest>>,
    poll_count: AtomicU32,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            init_failures: AtomicU32::new(0),
            create_transport_failures: AtomicU32::new(0),
            create_fatal: Mutex::new(None),
            polls: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            poll_count: AtomicU32::new(0),
        }
    }

    /// Fail the first `n` init calls with a transport error.
    pub fn fail_init(self, n: u32) -> Self {
        self.init_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the first `n` create calls with a transport error.
    pub fn fail_create_transport(self, n: u32) -> Self {
        self.create_transport_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every create call with a non-retryable provider error.
    pub fn fail_create_fatal(self, message: &str) -> Self {
        *self.create_fatal.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn with_polls(self, polls: Vec<ScriptedPoll>) -> Self {
        *self.polls.lock().unwrap() = polls.into();
        self
    }

    pub fn processing() -> ScriptedPoll {
        ScriptedPoll::Ok(JobPoll {
            state: JobState::Processing,
            video_url: None,
            detail: None,
        })
    }

    pub fn success(url: &str) -> ScriptedPoll {
        ScriptedPoll::Ok(JobPoll {
            state: JobState::Success,
            video_url: Some(url.to_string()),
            detail: None,
        })
    }

    pub fn success_without_url() -> ScriptedPoll {
        ScriptedPoll::Ok(JobPoll {
            state: JobState::Success,
            video_url: None,
            detail: None,
        })
    }

    pub fn failure(detail: &str) -> ScriptedPoll {
        ScriptedPoll::Ok(JobPoll {
            state: JobState::Fail,
            video_url: None,
            detail: Some(detail.to_string()),
        })
    }

    pub fn requests(&self) -> Vec<JobRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn poll_count(&self) -> u32 {
        self.poll_count.load(Ordering::SeqCst)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoProvider for MockProvider {
    async fn init(&self) -> Result<(), ProviderError> {
        if self
            .init_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    async fn create_job(&self, request: &JobRequest) -> Result<String, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(message) = self.create_fatal.lock().unwrap().clone() {
            return Err(ProviderError::Api(message));
        }
        if self
            .create_transport_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Transport("connection reset".to_string()));
        }
        Ok("provider-job-1".to_string())
    }

    async fn poll_job(&self, _job_id: &str) -> Result<JobPoll, ProviderError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        let next = self.polls.lock().unwrap().pop_front();
        match next {
            Some(ScriptedPoll::TransportError) => {
                Err(ProviderError::Transport("connection reset".to_string()))
            }
            Some(ScriptedPoll::Ok(poll)) => Ok(poll),
            // an exhausted script keeps the job in flight
            None => Ok(JobPoll {
                state: JobState::Processing,
                video_url: None,
                detail: None,
            }),
        }
    }
}

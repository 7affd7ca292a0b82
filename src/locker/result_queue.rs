use tokio::sync::mpsc;

/// Completion signal a worker sends once a job callback returns,
/// successfully or not. The coordinator releases the advisory lock in
/// response; workers never release locks themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobFinished {
    pub job_id: i64,
}

pub(crate) type ResultSender = mpsc::UnboundedSender<JobFinished>;
pub(crate) type ResultReceiver = mpsc::UnboundedReceiver<JobFinished>;

/// Unbounded FIFO from the workers to the coordinator. One sender clone
/// per worker; the channel closes when the last worker exits.
pub(crate) fn result_channel() -> (ResultSender, ResultReceiver) {
    mpsc::unbounded_channel()
}

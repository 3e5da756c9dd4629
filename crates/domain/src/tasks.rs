use tokio::sync::{mpsc, oneshot};
use tracing::warn;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Bounded queue of fire-and-forget jobs executed in order by a single
/// background task. Dispatch never blocks: when the queue is full the job is
/// dropped and logged.
#[derive(Clone)]
pub struct BackgroundTasks {
    name: &'static str,
    sender: mpsc::Sender<Task>,
}

impl BackgroundTasks {
    /// Must be called within a tokio runtime.
    pub fn spawn(name: &'static str, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Task>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                task();
            }
        });
        Self { name, sender }
    }

    pub fn dispatch(&self, task: impl FnOnce() + Send + 'static) -> bool {
        match self.sender.try_send(Box::new(task)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(queue = self.name, "background queue full, task dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(queue = self.name, "background queue closed, task dropped");
                false
            }
        }
    }

    /// Resolves once every task dispatched before this call has run.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        let task: Task = Box::new(move || {
            let _ = done.send(());
        });
        if self.sender.send(task).await.is_ok() {
            let _ = wait.await;
        }
    }
}

//! Consumer side of a streamed run.

use crate::agent::events::StreamEvent;
use crate::agent::runner::RunResult;
use crate::error::RunError;
use futures::Stream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// A run executing on a background task.
///
/// Events are queued in emission order. Draining with
/// [`next_event`](Self::next_event) ends only once the queue is empty *and*
/// the run has finished; if the run failed, the failure is returned at that
/// point.
///
/// ```ignore
/// let mut run = runner.run_streamed(&agent, &input);
/// while let Some(event) = run.next_event().await? {
///     if let EventKind::RawContentDelta { delta } = &event.kind {
///         print!("{delta}");
///     }
/// }
/// let result = run.wait_for_completion().await?;
/// ```
pub struct StreamedRun {
    rx: UnboundedReceiver<StreamEvent>,
    handle: Option<JoinHandle<Result<RunResult, RunError>>>,
    outcome: Option<Result<RunResult, RunError>>,
}

impl StreamedRun {
    pub(crate) fn new(
        rx: UnboundedReceiver<StreamEvent>,
        handle: JoinHandle<Result<RunResult, RunError>>,
    ) -> Self {
        Self {
            rx,
            handle: Some(handle),
            outcome: None,
        }
    }

    /// Next event, or `Ok(None)` once the run is over and every event was
    /// delivered. A failed run surfaces its error here, after its last event.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>, RunError> {
        if let Some(event) = self.rx.recv().await {
            return Ok(Some(event));
        }
        // The sender lives in the background task, so a closed queue means
        // the task has returned.
        self.settle().await;
        match &self.outcome {
            Some(Err(e)) => Err(e.clone()),
            _ => Ok(None),
        }
    }

    /// Drain any remaining events and return the run's result.
    pub async fn wait_for_completion(mut self) -> Result<RunResult, RunError> {
        while self.rx.recv().await.is_some() {}
        self.settle().await;
        self.outcome
            .unwrap_or_else(|| Err(RunError::TaskFailed("run result missing".into())))
    }

    /// Whether the background task has returned.
    pub fn is_complete(&self) -> bool {
        self.outcome.is_some() || self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Adapt into a [`Stream`] of events. A failed run yields one final `Err`.
    pub fn into_stream(self) -> impl Stream<Item = Result<StreamEvent, RunError>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut run = state?;
            match run.next_event().await {
                Ok(Some(event)) => Some((Ok(event), Some(run))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Join the background task once and keep its result.
    async fn settle(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.outcome = Some(match handle.await {
                Ok(result) => result,
                Err(e) => Err(RunError::TaskFailed(e.to_string())),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::EventKind;
    use futures::StreamExt;
    use tokio::sync::mpsc;

    fn spawn_with(
        events: Vec<EventKind>,
        result: Result<RunResult, RunError>,
    ) -> StreamedRun {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            for kind in events {
                let _ = tx.send(StreamEvent::now(kind));
            }
            result
        });
        StreamedRun::new(rx, handle)
    }

    #[tokio::test]
    async fn error_surfaces_after_last_event() {
        let mut run = spawn_with(
            vec![EventKind::StreamError {
                message: "boom".into(),
            }],
            Err(RunError::MaxTurns { max_turns: 1 }),
        );
        let first = run.next_event().await.unwrap().unwrap();
        assert!(matches!(first.kind, EventKind::StreamError { .. }));
        assert!(matches!(
            run.next_event().await,
            Err(RunError::MaxTurns { max_turns: 1 })
        ));
        // Draining again keeps reporting the same failure.
        assert!(run.next_event().await.is_err());
        assert!(run.is_complete());
    }

    #[tokio::test]
    async fn stream_ends_with_error_item() {
        let run = spawn_with(
            vec![EventKind::RawContentDelta { delta: "hi".into() }],
            Err(RunError::AgentNotFound("x".into())),
        );
        let items: Vec<_> = run.into_stream().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(RunError::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn panicking_task_is_reported() {
        let (tx, rx) = mpsc::unbounded_channel::<StreamEvent>();
        let handle = tokio::spawn(async {
            if true {
                panic!("background failure");
            }
            Err(RunError::TaskFailed("unreachable".into()))
        });
        drop(tx);
        let run = StreamedRun::new(rx, handle);
        assert!(matches!(
            run.wait_for_completion().await,
            Err(RunError::TaskFailed(_))
        ));
    }
}

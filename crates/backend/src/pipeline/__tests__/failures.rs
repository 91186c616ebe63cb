//! Failure isolation scenarios: a bad video never derails the batch.

#[cfg(test)]
mod tests {
  use std::sync::{Arc, atomic::Ordering};

  use pretty_assertions::assert_eq;

  use crate::{
    pipeline::{
      Checkpoints, VideoOutcome,
      __tests__::helpers::{
        FakeThumbnailer, FakeWorker, MemoryStore, PipelineTestContext, drain, steps_for, timeout_error,
      },
    },
    progress::Step,
    worker::WorkerError,
  };

  /// Test: five videos, the third fails frame analysis. The others are
  /// indexed, and the failed one keeps only its transcription checkpoint.
  #[tokio::test]
  async fn test_batch_survives_one_analysis_failure() {
    let ctx = PipelineTestContext::new();
    let videos: Vec<_> = ["v1.mp4", "v2.mp4", "v3.mp4", "v4.mp4", "v5.mp4"]
      .iter()
      .map(|n| ctx.video(n))
      .collect();

    let worker = Arc::new(FakeWorker::new().failing_analysis(
      "v3.mp4",
      WorkerError::Remote {
        message: "decoder crashed".into(),
      },
    ));
    let store = Arc::new(MemoryStore::default());
    let (pipeline, mut rx) = ctx.pipeline(worker.clone(), store.clone(), Arc::new(FakeThumbnailer::working()));

    let summary = pipeline.run(&videos).await;

    assert_eq!(summary.videos.len(), 5);
    assert_eq!(summary.indexed(), 4);
    assert_eq!(summary.failed(), 1);
    match summary.outcome(&videos[2]) {
      Some(VideoOutcome::Failed { step, reason }) => {
        assert_eq!(*step, Step::FrameAnalysis);
        assert!(reason.contains("decoder crashed"), "reason: {reason}");
      }
      other => panic!("expected failure for v3, got {other:?}"),
    }

    assert_eq!(
      ctx.job(&videos[2]).probe().await,
      Checkpoints {
        transcription_done: true,
        analysis_done: false,
        scenes_done: false
      }
    );
    for video in [&videos[0], &videos[1], &videos[3], &videos[4]] {
      assert!(ctx.job(video).probe().await.all_done(), "{} should be complete", video.display());
    }

    let events = drain(&mut rx);
    assert_eq!(
      steps_for(&events, &videos[2]),
      vec![
        (Step::Transcription, 0, true),
        (Step::Transcription, 100, true),
        (Step::FrameAnalysis, 0, true),
        (Step::FrameAnalysis, 100, false),
      ]
    );

    // Sequential processing: v4 starts only after v3 ended
    let position = |video: &std::path::Path, step: Step, pct: u8| {
      events
        .iter()
        .position(|e| e.video == video.to_string_lossy() && e.step == step && e.progress == pct)
        .unwrap()
    };
    assert!(position(&videos[2], Step::FrameAnalysis, 100) < position(&videos[3], Step::Transcription, 0));

    assert_eq!(store.documents().len(), 8);
    assert_eq!(worker.analyze_calls.load(Ordering::SeqCst), 5);
  }

  /// Test: a timed-out request is a stage failure for that video only.
  #[tokio::test]
  async fn test_request_timeout_is_stage_failure() {
    let ctx = PipelineTestContext::new();
    let stuck = ctx.video("stuck.mp4");
    let fine = ctx.video("fine.mp4");

    let worker = Arc::new(FakeWorker::new().failing_analysis("stuck.mp4", timeout_error()));
    let (pipeline, _rx) = ctx.pipeline(
      worker,
      Arc::new(MemoryStore::default()),
      Arc::new(FakeThumbnailer::working()),
    );

    let summary = pipeline.run(&[stuck.clone(), fine.clone()]).await;

    match summary.outcome(&stuck) {
      Some(VideoOutcome::Failed { step, reason }) => {
        assert_eq!(*step, Step::FrameAnalysis);
        assert!(reason.contains("timed out"), "reason: {reason}");
      }
      other => panic!("expected timeout failure, got {other:?}"),
    }
    assert!(matches!(summary.outcome(&fine), Some(VideoOutcome::Indexed { .. })));
  }

  /// Test: a failed video resumes from its checkpoints on the next run.
  #[tokio::test]
  async fn test_rerun_resumes_after_failure() {
    let ctx = PipelineTestContext::new();
    let video = ctx.video("flaky.mp4");

    let failing = Arc::new(FakeWorker::new().failing_analysis(
      "flaky.mp4",
      WorkerError::Remote {
        message: "out of memory".into(),
      },
    ));
    let (pipeline, _rx) = ctx.pipeline(
      failing,
      Arc::new(MemoryStore::default()),
      Arc::new(FakeThumbnailer::working()),
    );
    pipeline.run(std::slice::from_ref(&video)).await;

    let healthy = Arc::new(FakeWorker::new());
    let (pipeline, mut rx) = ctx.pipeline(
      healthy.clone(),
      Arc::new(MemoryStore::default()),
      Arc::new(FakeThumbnailer::working()),
    );
    let summary = pipeline.run(std::slice::from_ref(&video)).await;

    assert_eq!(summary.indexed(), 1);
    assert_eq!(healthy.transcribe_calls.load(Ordering::SeqCst), 0);
    assert_eq!(healthy.analyze_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
      steps_for(&drain(&mut rx), &video),
      vec![
        (Step::FrameAnalysis, 0, true),
        (Step::FrameAnalysis, 100, true),
        (Step::Embedding, 0, true),
        (Step::Embedding, 100, true),
      ]
    );
  }

  /// Test: without a representative thumbnail the video is skipped outright.
  #[tokio::test]
  async fn test_thumbnail_failure_skips_video() {
    let ctx = PipelineTestContext::new();
    let video = ctx.video("corrupt.mp4");

    let worker = Arc::new(FakeWorker::new());
    let (pipeline, mut rx) = ctx.pipeline(
      worker.clone(),
      Arc::new(MemoryStore::default()),
      Arc::new(FakeThumbnailer::broken()),
    );
    let summary = pipeline.run(std::slice::from_ref(&video)).await;

    assert!(matches!(summary.outcome(&video), Some(VideoOutcome::Skipped { .. })));
    assert_eq!(summary.skipped(), 1);
    assert_eq!(worker.calls(), 0);
    assert!(drain(&mut rx).is_empty());
  }

  /// Test: with thumbnails optional the video is indexed without thumbnail references.
  #[tokio::test]
  async fn test_optional_thumbnail_failure_is_tolerated() {
    let mut ctx = PipelineTestContext::new();
    ctx.options.require_thumbnail = false;
    let video = ctx.video("corrupt.mp4");

    let store = Arc::new(MemoryStore::default());
    let (pipeline, mut rx) = ctx.pipeline(
      Arc::new(FakeWorker::new()),
      store.clone(),
      Arc::new(FakeThumbnailer::broken()),
    );
    let summary = pipeline.run(std::slice::from_ref(&video)).await;

    assert_eq!(summary.outcome(&video), Some(&VideoOutcome::Indexed { scenes: 2 }));
    let events = drain(&mut rx);
    assert!(events.iter().all(|e| e.thumbnail_url.is_empty()));
    assert!(store.documents().iter().all(|d| d.metadata["thumbnail_url"] == ""));
  }

  /// Test: an unreadable checkpoint fails the embedding stage without touching the worker.
  #[tokio::test]
  async fn test_corrupt_checkpoint_fails_embedding() {
    let ctx = PipelineTestContext::new();
    let video = ctx.video("lake.mp4");
    ctx.seed_checkpoints(&video, true).await;
    std::fs::write(ctx.job(&video).scenes_path(), b"[{ truncated").unwrap();

    let worker = Arc::new(FakeWorker::new());
    let (pipeline, mut rx) = ctx.pipeline(
      worker.clone(),
      Arc::new(MemoryStore::default()),
      Arc::new(FakeThumbnailer::working()),
    );
    let summary = pipeline.run(std::slice::from_ref(&video)).await;

    assert!(matches!(
      summary.outcome(&video),
      Some(VideoOutcome::Failed {
        step: Step::Embedding,
        ..
      })
    ));
    assert_eq!(worker.calls(), 0);
    assert_eq!(
      steps_for(&drain(&mut rx), &video).last(),
      Some(&(Step::Embedding, 100, false))
    );
  }
}

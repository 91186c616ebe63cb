//! Happy-path and resume scenarios for the indexing pipeline.

#[cfg(test)]
mod tests {
  use std::sync::{Arc, atomic::Ordering};

  use pretty_assertions::assert_eq;

  use crate::{
    domain::artifacts::{Scene, Transcription, VideoAnalysis},
    pipeline::{
      Checkpoints, VideoOutcome,
      __tests__::helpers::{
        FakeThumbnailer, FakeWorker, MemoryStore, PipelineTestContext, analysis_with_frames, drain, steps_for,
      },
      read_json,
    },
    progress::Step,
  };

  /// Test: all three checkpoints present, nothing is sent to the worker and
  /// only the two terminal successes precede embedding.
  #[tokio::test]
  async fn test_fast_path_skips_worker() {
    let ctx = PipelineTestContext::new();
    let video = ctx.video("lake.mp4");
    ctx.seed_checkpoints(&video, true).await;

    let worker = Arc::new(FakeWorker::new());
    let store = Arc::new(MemoryStore::default());
    let (pipeline, mut rx) = ctx.pipeline(worker.clone(), store.clone(), Arc::new(FakeThumbnailer::working()));

    let summary = pipeline.run(std::slice::from_ref(&video)).await;

    assert_eq!(worker.calls(), 0, "fast path must not call the worker");
    assert_eq!(summary.outcome(&video), Some(&VideoOutcome::Indexed { scenes: 2 }));
    assert_eq!(
      steps_for(&drain(&mut rx), &video),
      vec![
        (Step::Transcription, 100, true),
        (Step::FrameAnalysis, 100, true),
        (Step::Embedding, 0, true),
        (Step::Embedding, 100, true),
      ]
    );
    assert_eq!(store.documents().len(), 2);
  }

  /// Test: same-named files in different folders each get their own
  /// checkpoints, so the second is analysed rather than served the first's.
  #[tokio::test]
  async fn test_same_stem_in_different_folders_is_indexed_separately() {
    let ctx = PipelineTestContext::new();
    let first = ctx.video("trip1/GOPR0001.MP4");
    let second = ctx.video("trip2/GOPR0001.MP4");
    assert_ne!(ctx.job(&first).work_dir, ctx.job(&second).work_dir);

    let worker = Arc::new(FakeWorker::new());
    let store = Arc::new(MemoryStore::default());
    let (pipeline, _rx) = ctx.pipeline(worker.clone(), store.clone(), Arc::new(FakeThumbnailer::working()));

    let summary = pipeline.run(&[first.clone(), second.clone()]).await;
    assert_eq!(summary.indexed(), 2);
    assert_eq!(worker.transcribe_calls.load(Ordering::SeqCst), 2);
    assert_eq!(worker.analyze_calls.load(Ordering::SeqCst), 2);

    for video in [&first, &second] {
      let analysis: VideoAnalysis = read_json(&ctx.job(video).analysis_path()).await.unwrap();
      assert_eq!(analysis.video_file, video.to_string_lossy());
    }

    let sources: Vec<String> = store
      .documents()
      .iter()
      .filter_map(|doc| doc.metadata.get("source").and_then(|s| s.as_str()).map(str::to_string))
      .collect();
    assert_eq!(sources.len(), 4);
    for video in [&first, &second] {
      let video = video.to_string_lossy();
      assert_eq!(sources.iter().filter(|s| **s == video).count(), 2);
    }
  }

  /// Test: a fresh video runs every stage and leaves three valid checkpoints.
  #[tokio::test]
  async fn test_fresh_video_writes_all_checkpoints() {
    let ctx = PipelineTestContext::new();
    let video = ctx.video("lake.mp4");

    let worker = Arc::new(FakeWorker::new());
    let store = Arc::new(MemoryStore::default());
    let (pipeline, mut rx) = ctx.pipeline(worker.clone(), store.clone(), Arc::new(FakeThumbnailer::working()));

    let summary = pipeline.run(std::slice::from_ref(&video)).await;
    assert_eq!(summary.indexed(), 1);
    assert_eq!(worker.transcribe_calls.load(Ordering::SeqCst), 1);
    assert_eq!(worker.analyze_calls.load(Ordering::SeqCst), 1);

    let job = ctx.job(&video);
    assert!(job.probe().await.all_done());
    let transcription: Transcription = read_json(&job.transcription_path()).await.unwrap();
    let analysis: VideoAnalysis = read_json(&job.analysis_path()).await.unwrap();
    let scenes: Vec<Scene> = read_json(&job.scenes_path()).await.unwrap();
    assert_eq!(transcription.language.as_deref(), Some("en"));
    assert_eq!(analysis.video_file, video.to_string_lossy());
    assert_eq!(scenes.len(), 2);
    assert_eq!(scenes[0].transcription, "welcome to");
    assert_eq!(scenes[1].transcription, "the lake");
    assert!(
      !job.transcription_staging_path().exists(),
      "staging transcription should be promoted"
    );

    assert_eq!(
      steps_for(&drain(&mut rx), &video),
      vec![
        (Step::Transcription, 0, true),
        (Step::Transcription, 100, true),
        (Step::FrameAnalysis, 0, true),
        (Step::FrameAnalysis, 100, true),
        (Step::Embedding, 0, true),
        (Step::Embedding, 100, true),
      ]
    );

    let docs = store.documents();
    assert_eq!(docs[0].metadata["faces"], "Ana");
    assert_eq!(docs[0].metadata["emotions"], "Ana:happy");
    assert_eq!(docs[0].metadata["category"], "aquatic");
    assert!(
      docs[0].metadata["thumbnail_url"].as_str().unwrap().starts_with("file://"),
      "scene thumbnail should be attached"
    );
  }

  /// Test: worker progress is relayed between start and terminal, clamped to 1-99.
  #[tokio::test]
  async fn test_worker_progress_is_forwarded() {
    let ctx = PipelineTestContext::new();
    let video = ctx.video("lake.mp4");

    let worker = Arc::new(FakeWorker::new().with_progress(&[0, 40, 40, 100]));
    let (pipeline, mut rx) = ctx.pipeline(
      worker,
      Arc::new(MemoryStore::default()),
      Arc::new(FakeThumbnailer::working()),
    );
    pipeline.run(std::slice::from_ref(&video)).await;

    let transcription: Vec<u8> = steps_for(&drain(&mut rx), &video)
      .into_iter()
      .filter(|(step, _, _)| *step == Step::Transcription)
      .map(|(_, pct, _)| pct)
      .collect();
    assert_eq!(transcription, vec![0, 1, 40, 99, 100]);
  }

  /// Test: transcription and analysis present but scenes missing - scenes are
  /// synthesized from disk without any worker call.
  #[tokio::test]
  async fn test_missing_scenes_are_synthesized() {
    let ctx = PipelineTestContext::new();
    let video = ctx.video("lake.mp4");
    ctx.seed_checkpoints(&video, false).await;

    let worker = Arc::new(FakeWorker::new());
    let (pipeline, mut rx) = ctx.pipeline(
      worker.clone(),
      Arc::new(MemoryStore::default()),
      Arc::new(FakeThumbnailer::working()),
    );

    let summary = pipeline.run(std::slice::from_ref(&video)).await;

    assert_eq!(worker.calls(), 0);
    assert_eq!(summary.outcome(&video), Some(&VideoOutcome::Indexed { scenes: 2 }));
    assert!(ctx.job(&video).scenes_path().exists());
    assert_eq!(
      steps_for(&drain(&mut rx), &video),
      vec![(Step::Embedding, 0, true), (Step::Embedding, 100, true)]
    );
  }

  /// Test: only the missing stage runs when one checkpoint exists.
  #[tokio::test]
  async fn test_existing_transcription_is_not_rerun() {
    let ctx = PipelineTestContext::new();
    let video = ctx.video("lake.mp4");
    ctx.seed_checkpoints(&video, false).await;
    std::fs::remove_file(ctx.job(&video).analysis_path()).unwrap();

    let worker = Arc::new(FakeWorker::new());
    let (pipeline, mut rx) = ctx.pipeline(
      worker.clone(),
      Arc::new(MemoryStore::default()),
      Arc::new(FakeThumbnailer::working()),
    );
    pipeline.run(std::slice::from_ref(&video)).await;

    assert_eq!(worker.transcribe_calls.load(Ordering::SeqCst), 0);
    assert_eq!(worker.analyze_calls.load(Ordering::SeqCst), 1);
    let steps = steps_for(&drain(&mut rx), &video);
    assert!(steps.iter().all(|(step, _, _)| *step != Step::Transcription));
  }

  /// Test: scene documents reach the store in fixed-size batches.
  #[tokio::test]
  async fn test_scene_documents_are_batched() {
    let ctx = PipelineTestContext::new();
    let video = ctx.video("long.mp4");

    let worker = Arc::new(FakeWorker::new().with_analysis(analysis_with_frames(120)));
    let store = Arc::new(MemoryStore::default());
    let (pipeline, _rx) = ctx.pipeline(worker, store.clone(), Arc::new(FakeThumbnailer::working()));

    let summary = pipeline.run(std::slice::from_ref(&video)).await;
    assert_eq!(summary.outcome(&video), Some(&VideoOutcome::Indexed { scenes: 120 }));
    assert_eq!(store.batch_sizes(), vec![50, 50, 20]);
  }

  /// Test: thumbnails are reused on a second run.
  #[tokio::test]
  async fn test_thumbnails_are_reused() {
    let ctx = PipelineTestContext::new();
    let video = ctx.video("lake.mp4");
    let thumbnailer = Arc::new(FakeThumbnailer::working());

    let (pipeline, _rx) = ctx.pipeline(
      Arc::new(FakeWorker::new()),
      Arc::new(MemoryStore::default()),
      thumbnailer.clone(),
    );
    pipeline.run(std::slice::from_ref(&video)).await;
    let first = thumbnailer.calls.load(Ordering::SeqCst);
    assert_eq!(first, 3, "one representative thumbnail plus one per scene");

    pipeline.run(std::slice::from_ref(&video)).await;
    assert_eq!(thumbnailer.calls.load(Ordering::SeqCst), first);
  }

  /// Test: with concurrency the summary still follows input order.
  #[tokio::test]
  async fn test_concurrent_batch_keeps_input_order() {
    let mut ctx = PipelineTestContext::new();
    ctx.options.concurrency = 3;
    let videos: Vec<_> = ["a.mp4", "b.mp4", "c.mp4", "d.mp4"].iter().map(|n| ctx.video(n)).collect();

    let (pipeline, _rx) = ctx.pipeline(
      Arc::new(FakeWorker::new()),
      Arc::new(MemoryStore::default()),
      Arc::new(FakeThumbnailer::working()),
    );
    let summary = pipeline.run(&videos).await;

    let order: Vec<_> = summary.videos.iter().map(|(p, _)| p.clone()).collect();
    assert_eq!(order, videos);
    assert_eq!(summary.indexed(), 4);
    for video in &videos {
      assert_eq!(
        ctx.job(video).probe().await,
        Checkpoints {
          transcription_done: true,
          analysis_done: true,
          scenes_done: true
        }
      );
    }
  }

  /// Test: face reindexing is delegated to the worker.
  #[tokio::test]
  async fn test_reindex_faces_reports_output() {
    let ctx = PipelineTestContext::new();
    let (pipeline, _rx) = ctx.pipeline(
      Arc::new(FakeWorker::new()),
      Arc::new(MemoryStore::default()),
      Arc::new(FakeThumbnailer::working()),
    );

    let (tx, mut lines) = tokio::sync::mpsc::channel(4);
    let result = pipeline.reindex_faces(Some(tx)).await.unwrap();
    assert_eq!(result["status"], "ok");
    assert_eq!(lines.recv().await.as_deref(), Some("Re-matched 2 faces"));
  }
}

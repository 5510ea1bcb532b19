#[cfg(test)]
mod functional_tests {
    use std::path::Path;
    use std::process::{ExitStatus, Output};
    use std::os::unix::process::ExitStatusExt;
    use std::sync::{Arc, Mutex};

    use tempfile::tempdir;

    use crate::adapters::memory::MemoryTracker;
    use crate::application::orchestrator::RenderOrchestrator;
    use crate::config::RenderConfig;
    use crate::domain::jobs::RenderStatus;
    use crate::domain::spec::{
        AudioConfig, CharacterConfig, OutputConfig, Position, Scene, SpeechProvider, VideoSpec,
    };
    use crate::engines::cmd::{
        MockAnimatorRunner, MockCompositorRunner, MockFfmpegRunner, MockLipSyncRunner,
        MockSpeechClient,
    };
    use crate::error::RenderError;
    use crate::ports::tracker::JobTracker;

    fn ok_output(stdout: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(0),
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }

    fn spec_with_scenes(scenes: Vec<Scene>) -> VideoSpec {
        VideoSpec {
            version: "1.0".into(),
            output: OutputConfig::default(),
            scenes,
        }
    }

    fn silent_scene(id: &str, duration: &str) -> Scene {
        Scene {
            id: id.into(),
            duration: duration.into(),
            character: None,
            audio: None,
            background: None,
        }
    }

    fn narrated_character_scene(id: &str) -> Scene {
        Scene {
            id: id.into(),
            duration: "3s".into(),
            character: Some(CharacterConfig {
                asset: "assets/host.rig".into(),
                position: Position::Center,
                expression: "neutral".into(),
                scale: 1.0,
            }),
            audio: Some(AudioConfig {
                text: "hello".into(),
                voice: "alloy".into(),
                provider: SpeechProvider::OpenAi,
                speed: 1.0,
            }),
            background: None,
        }
    }

    struct MockParts {
        speech_client: MockSpeechClient,
        animator: MockAnimatorRunner,
        lip_sync: MockLipSyncRunner,
        compositor: MockCompositorRunner,
        ffmpeg: MockFfmpegRunner,
    }

    impl MockParts {
        fn new() -> Self {
            Self {
                speech_client: MockSpeechClient::new(),
                animator: MockAnimatorRunner::new(),
                lip_sync: MockLipSyncRunner::new(),
                compositor: MockCompositorRunner::new(),
                ffmpeg: MockFfmpegRunner::new(),
            }
        }

        /// Deny every expectation that was not explicitly set.
        fn strict(mut self) -> Self {
            self.speech_client.expect_synthesize().times(0);
            self.animator.expect_render_frames().times(0);
            self.compositor.expect_run_script().times(0);
            self.ffmpeg.expect_probe_duration().times(0);
            self.ffmpeg.expect_color_clip().times(0);
            self.ffmpeg.expect_color_frames().times(0);
            self.ffmpeg.expect_overlay_frames().times(0);
            self.ffmpeg.expect_concat().times(0);
            self.lip_sync.expect_extract().times(0);
            self
        }

        fn build(self, config: RenderConfig) -> RenderOrchestrator {
            RenderOrchestrator::with_runners(
                config,
                Arc::new(self.speech_client),
                Arc::new(self.animator),
                Arc::new(self.lip_sync),
                Arc::new(self.compositor),
                Arc::new(self.ffmpeg),
            )
        }
    }

    fn expect_concat_to_succeed(ffmpeg: &mut MockFfmpegRunner, times: usize) {
        ffmpeg
            .expect_concat()
            .times(times)
            .returning(|_, output| {
                std::fs::write(output, b"mp4").unwrap();
                Box::pin(async { Ok(ok_output("")) })
            });
    }

    // A spec with one silent scene renders to a flat-color video of the
    // declared duration.
    #[tokio::test]
    async fn single_silent_scene_renders_flat_color() {
        let mut parts = MockParts::new();
        parts.compositor.expect_is_available().return_const(false);
        parts
            .ffmpeg
            .expect_color_clip()
            .withf(|_, duration, _, _, audio, _| *duration == 5.0 && audio.is_none())
            .times(1)
            .returning(|_, _, _, _, _, output| {
                std::fs::write(output, b"mp4").unwrap();
                Box::pin(async { Ok(ok_output("")) })
            });
        expect_concat_to_succeed(&mut parts.ffmpeg, 1);

        let tracker = Arc::new(MemoryTracker::new());
        let mut orchestrator = parts.build(RenderConfig::default());
        orchestrator.set_tracker(tracker.clone());

        let out_dir = tempdir().unwrap();
        let out_path = out_dir.path().join("video.mp4");
        let spec = spec_with_scenes(vec![silent_scene("only", "5s")]);

        let rendered = orchestrator.render(&spec, &out_path).await.unwrap();
        assert_eq!(rendered, out_path);
        assert!(out_path.exists());

        let job = tracker.get_job(1).await.unwrap().unwrap();
        assert_eq!(job.status, RenderStatus::Completed);
        assert_eq!(job.progress, 1.0);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
    }

    // A scene asking for a provider with no credential fails the whole
    // render with a provider error naming that scene, before any engine
    // runs.
    #[tokio::test]
    async fn missing_credential_fails_before_any_engine_call() {
        let parts = MockParts::new().strict();
        let tracker = Arc::new(MemoryTracker::new());
        let mut orchestrator = parts.build(RenderConfig::default());
        orchestrator.set_tracker(tracker.clone());

        let out_dir = tempdir().unwrap();
        let spec = spec_with_scenes(vec![{
            let mut scene = narrated_character_scene("talk");
            scene.character = None;
            scene
        }]);

        let err = orchestrator
            .render(&spec, &out_dir.path().join("video.mp4"))
            .await
            .unwrap_err();
        match err {
            RenderError::ProviderUnavailable { scene_id, provider, .. } => {
                assert_eq!(scene_id, "talk");
                assert_eq!(provider, "openai");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!out_dir.path().join("video.mp4").exists());

        let job = tracker.get_job(1).await.unwrap().unwrap();
        assert_eq!(job.status, RenderStatus::Failed);
        assert!(job.error_message.unwrap().contains("talk"));
    }

    // Two scenes with the animation tool unavailable still produce two
    // segments, in declared order, using placeholder frames.
    #[tokio::test]
    async fn animator_outage_degrades_to_placeholders_in_order() {
        let mut parts = MockParts::new();
        parts
            .speech_client
            .expect_synthesize()
            .times(2)
            .returning(|_, _| Box::pin(async { Ok(vec![1u8; 64]) }));
        parts
            .ffmpeg
            .expect_probe_duration()
            .times(2)
            .returning(|_| Box::pin(async { Ok(ok_output("2.0\n")) }));
        parts.lip_sync.expect_is_available().return_const(false);
        parts.animator.expect_is_available().return_const(false);
        parts.animator.expect_render_frames().times(0);
        parts
            .ffmpeg
            .expect_color_frames()
            .times(2)
            .returning(|_, _, _, _, pattern| {
                std::fs::write(pattern.parent().unwrap().join("frame_00000.png"), b"png")
                    .unwrap();
                Box::pin(async { Ok(ok_output("")) })
            });
        parts.compositor.expect_is_available().return_const(false);
        parts
            .ffmpeg
            .expect_overlay_frames()
            .times(2)
            .returning(|_, _, _, _, _, _, output| {
                std::fs::write(output, b"mp4").unwrap();
                Box::pin(async { Ok(ok_output("")) })
            });
        parts
            .ffmpeg
            .expect_concat()
            .withf(|list_file: &Path, _| {
                let listing = std::fs::read_to_string(list_file).unwrap();
                let lines: Vec<&str> = listing.lines().collect();
                lines.len() == 2
                    && lines[0].contains("first_segment")
                    && lines[1].contains("second_segment")
            })
            .times(1)
            .returning(|_, output| {
                std::fs::write(output, b"mp4").unwrap();
                Box::pin(async { Ok(ok_output("")) })
            });

        let config = RenderConfig {
            openai_api_key: Some("sk-test".into()),
            ..RenderConfig::default()
        };
        let orchestrator = parts.build(config);

        let out_dir = tempdir().unwrap();
        let spec = spec_with_scenes(vec![
            narrated_character_scene("first"),
            narrated_character_scene("second"),
        ]);

        let rendered = orchestrator
            .render(&spec, &out_dir.path().join("video.mp4"))
            .await
            .unwrap();
        assert!(rendered.exists());
    }

    // An empty scene list is rejected up front; no engine is invoked.
    #[tokio::test]
    async fn empty_spec_is_rejected_before_any_engine_call() {
        let parts = MockParts::new().strict();
        let orchestrator = parts.build(RenderConfig::default());

        let out_dir = tempdir().unwrap();
        let spec = spec_with_scenes(vec![]);

        let err = orchestrator
            .render(&spec, &out_dir.path().join("video.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Configuration(_)));
    }

    // Observers see a non-decreasing overall value for the whole render.
    #[tokio::test]
    async fn observed_progress_is_monotonic() {
        let mut parts = MockParts::new();
        parts.compositor.expect_is_available().return_const(false);
        parts
            .ffmpeg
            .expect_color_clip()
            .times(2)
            .returning(|_, _, _, _, _, output| {
                std::fs::write(output, b"mp4").unwrap();
                Box::pin(async { Ok(ok_output("")) })
            });
        expect_concat_to_succeed(&mut parts.ffmpeg, 1);

        let mut orchestrator = parts.build(RenderConfig::default());
        let seen: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        orchestrator.on_progress(move |progress| {
            sink.lock().unwrap().push(progress.overall);
        });

        let out_dir = tempdir().unwrap();
        let spec = spec_with_scenes(vec![
            silent_scene("a", "2s"),
            silent_scene("b", "2s"),
        ]);
        orchestrator
            .render(&spec, &out_dir.path().join("video.mp4"))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(*seen.last().unwrap(), 1.0);
    }

    // One scene failing composition is recorded and skipped; the rest of
    // the render carries on.
    #[tokio::test]
    async fn scene_failure_degrades_and_render_continues() {
        let mut parts = MockParts::new();
        parts.compositor.expect_is_available().return_const(false);
        // First scene's synthesis fails outright, second succeeds.
        let calls = Arc::new(Mutex::new(0usize));
        let counter = calls.clone();
        parts
            .ffmpeg
            .expect_color_clip()
            .times(2)
            .returning(move |_, _, _, _, _, output| {
                let mut calls = counter.lock().unwrap();
                *calls += 1;
                if *calls == 1 {
                    Box::pin(async { Ok(Output {
                        status: ExitStatus::from_raw(1),
                        stdout: Vec::new(),
                        stderr: b"boom".to_vec(),
                    }) })
                } else {
                    std::fs::write(output, b"mp4").unwrap();
                    Box::pin(async { Ok(ok_output("")) })
                }
            });
        parts
            .ffmpeg
            .expect_concat()
            .withf(|list_file: &Path, _| {
                let listing = std::fs::read_to_string(list_file).unwrap();
                // Only the surviving scene's segment is concatenated.
                listing.lines().count() == 1 && listing.contains("b_segment")
            })
            .times(1)
            .returning(|_, output| {
                std::fs::write(output, b"mp4").unwrap();
                Box::pin(async { Ok(ok_output("")) })
            });

        let tracker = Arc::new(MemoryTracker::new());
        let mut orchestrator = parts.build(RenderConfig::default());
        orchestrator.set_tracker(tracker.clone());

        let out_dir = tempdir().unwrap();
        let spec = spec_with_scenes(vec![
            silent_scene("a", "2s"),
            silent_scene("b", "2s"),
        ]);
        orchestrator
            .render(&spec, &out_dir.path().join("video.mp4"))
            .await
            .unwrap();

        let scenes = tracker.list_scene_renders(1).await.unwrap();
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0].status, RenderStatus::Failed);
        assert_eq!(scenes[1].status, RenderStatus::Completed);

        // The failed scene does not count towards the job's success tally.
        let job = tracker.get_job(1).await.unwrap().unwrap();
        assert_eq!(job.status, RenderStatus::Completed);
        assert_eq!(job.completed_scenes, 1);
    }

    // Every scene failing still yields an output via flat-color synthesis.
    #[tokio::test]
    async fn all_scenes_failing_falls_back_to_flat_color() {
        let mut parts = MockParts::new();
        parts.compositor.expect_is_available().return_const(false);
        let calls = Arc::new(Mutex::new(0usize));
        let counter = calls.clone();
        parts
            .ffmpeg
            .expect_color_clip()
            .times(2)
            .returning(move |_, _, _, _, _, output| {
                let mut calls = counter.lock().unwrap();
                *calls += 1;
                if *calls == 1 {
                    // Scene composition fails; the fallback call succeeds.
                    Box::pin(async { Ok(Output {
                        status: ExitStatus::from_raw(1),
                        stdout: Vec::new(),
                        stderr: Vec::new(),
                    }) })
                } else {
                    std::fs::write(output, b"mp4").unwrap();
                    Box::pin(async { Ok(ok_output("")) })
                }
            });
        expect_concat_to_succeed(&mut parts.ffmpeg, 1);

        let orchestrator = parts.build(RenderConfig::default());
        let out_dir = tempdir().unwrap();
        let spec = spec_with_scenes(vec![silent_scene("only", "2s")]);

        let rendered = orchestrator
            .render(&spec, &out_dir.path().join("video.mp4"))
            .await
            .unwrap();
        assert!(rendered.exists());
    }

    // A failed mux leaves no partial output file behind.
    #[tokio::test]
    async fn failed_mux_leaves_no_partial_output() {
        let mut parts = MockParts::new();
        parts.compositor.expect_is_available().return_const(false);
        parts
            .ffmpeg
            .expect_color_clip()
            .times(1)
            .returning(|_, _, _, _, _, output| {
                std::fs::write(output, b"mp4").unwrap();
                Box::pin(async { Ok(ok_output("")) })
            });
        parts.ffmpeg.expect_concat().times(1).returning(|_, _| {
            Box::pin(async {
                Ok(Output {
                    status: ExitStatus::from_raw(1),
                    stdout: Vec::new(),
                    stderr: b"muxer exploded".to_vec(),
                })
            })
        });

        let tracker = Arc::new(MemoryTracker::new());
        let mut orchestrator = parts.build(RenderConfig::default());
        orchestrator.set_tracker(tracker.clone());

        let out_dir = tempdir().unwrap();
        let out_path = out_dir.path().join("video.mp4");
        let spec = spec_with_scenes(vec![silent_scene("only", "2s")]);

        let err = orchestrator.render(&spec, &out_path).await.unwrap_err();
        assert!(matches!(err, RenderError::Mux(_)));
        assert!(!out_path.exists());

        let job = tracker.get_job(1).await.unwrap().unwrap();
        assert_eq!(job.status, RenderStatus::Failed);
    }

    // Narration synthesized before its scene failed is muxed into the
    // flat-color fallback for that scene.
    #[tokio::test]
    async fn fallback_muxes_narration_from_a_failed_scene() {
        let mut parts = MockParts::new();
        parts
            .speech_client
            .expect_synthesize()
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(vec![1u8; 64]) }));
        parts
            .ffmpeg
            .expect_probe_duration()
            .times(1)
            .returning(|_| Box::pin(async { Ok(ok_output("2.0\n")) }));
        parts.compositor.expect_is_available().return_const(false);
        let calls = Arc::new(Mutex::new(0usize));
        let counter = calls.clone();
        parts
            .ffmpeg
            .expect_color_clip()
            .times(2)
            .returning(move |_, _, _, _, audio, output| {
                let mut calls = counter.lock().unwrap();
                *calls += 1;
                if *calls == 1 {
                    // Scene composition fails after speech succeeded.
                    Box::pin(async {
                        Ok(Output {
                            status: ExitStatus::from_raw(1),
                            stdout: Vec::new(),
                            stderr: b"boom".to_vec(),
                        })
                    })
                } else {
                    // The fallback call receives that scene's narration clip.
                    assert!(audio
                        .as_ref()
                        .map_or(false, |clip| clip.ends_with("talk_narration.mp3")));
                    std::fs::write(output, b"mp4").unwrap();
                    Box::pin(async { Ok(ok_output("")) })
                }
            });
        expect_concat_to_succeed(&mut parts.ffmpeg, 1);

        let config = RenderConfig {
            openai_api_key: Some("sk-test".into()),
            ..RenderConfig::default()
        };
        let tracker = Arc::new(MemoryTracker::new());
        let mut orchestrator = parts.build(config);
        orchestrator.set_tracker(tracker.clone());

        let out_dir = tempdir().unwrap();
        let spec = spec_with_scenes(vec![{
            let mut scene = narrated_character_scene("talk");
            scene.character = None;
            scene
        }]);

        let rendered = orchestrator
            .render(&spec, &out_dir.path().join("video.mp4"))
            .await
            .unwrap();
        assert!(rendered.exists());

        let job = tracker.get_job(1).await.unwrap().unwrap();
        assert_eq!(job.status, RenderStatus::Completed);
        assert_eq!(job.completed_scenes, 0);
    }

    // Each render works in a fresh scratch directory; artifacts from an
    // earlier render on the same orchestrator never leak into a later one.
    #[tokio::test]
    async fn second_render_starts_from_a_clean_scratch() {
        let mut parts = MockParts::new();
        parts
            .speech_client
            .expect_synthesize()
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(vec![1u8; 64]) }));
        parts
            .ffmpeg
            .expect_probe_duration()
            .times(1)
            .returning(|_| Box::pin(async { Ok(ok_output("2.0\n")) }));
        parts.compositor.expect_is_available().return_const(false);
        let calls = Arc::new(Mutex::new(0usize));
        let counter = calls.clone();
        parts
            .ffmpeg
            .expect_color_clip()
            .times(3)
            .returning(move |_, _, _, _, audio, output| {
                let mut calls = counter.lock().unwrap();
                *calls += 1;
                match *calls {
                    // First render: the narrated scene composes fine.
                    1 => {
                        std::fs::write(output, b"mp4").unwrap();
                        Box::pin(async { Ok(ok_output("")) })
                    }
                    // Second render: the now-silent scene fails composition.
                    2 => Box::pin(async {
                        Ok(Output {
                            status: ExitStatus::from_raw(1),
                            stdout: Vec::new(),
                            stderr: Vec::new(),
                        })
                    }),
                    // Its fallback must not pick up the first render's clip.
                    _ => {
                        assert!(
                            audio.is_none(),
                            "stale narration leaked into a later render"
                        );
                        std::fs::write(output, b"mp4").unwrap();
                        Box::pin(async { Ok(ok_output("")) })
                    }
                }
            });
        expect_concat_to_succeed(&mut parts.ffmpeg, 2);

        let config = RenderConfig {
            openai_api_key: Some("sk-test".into()),
            ..RenderConfig::default()
        };
        let orchestrator = parts.build(config);
        let out_dir = tempdir().unwrap();

        let narrated = spec_with_scenes(vec![{
            let mut scene = narrated_character_scene("talk");
            scene.character = None;
            scene
        }]);
        orchestrator
            .render(&narrated, &out_dir.path().join("first.mp4"))
            .await
            .unwrap();

        let silent = spec_with_scenes(vec![silent_scene("talk", "2s")]);
        let rendered = orchestrator
            .render(&silent, &out_dir.path().join("second.mp4"))
            .await
            .unwrap();
        assert!(rendered.exists());
    }
}
